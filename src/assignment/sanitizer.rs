//! Post-assignment sanitization
//!
//! [`sanitize_assignments`] is the cheap local pass: it walks every slot of a
//! batch once and evicts duplicate or malformed occupants.
//! [`post_check_match_assignments`] runs the same pass and then re-reads room
//! state to drop anyone a concurrent request claimed in the meantime. Neither
//! ever fails because of a bad occupant; every eviction becomes a
//! [`RemovedMember`].

use crate::error::Result;
use crate::storage::MatchStore;
use crate::types::{ActiveRoom, Assignment, Member, RemovalReason, RemovedMember, RoleSlot};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{debug, info};

/// Knobs for the sanitize pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SanitizeOptions {
    /// Let one owner hold several seats as long as the heroes differ
    pub allow_duplicate_owners: bool,
}

/// Assignments that survived sanitization plus everyone evicted
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SanitizedAssignments {
    pub assignments: Vec<Assignment>,
    pub removed_members: Vec<RemovedMember>,
}

/// Result of the pre-commit check
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostCheckResult {
    pub assignments: Vec<Assignment>,
    /// Freshly read rooms referenced by the batch
    pub rooms: Vec<ActiveRoom>,
    pub removed_members: Vec<RemovedMember>,
}

/// Batch-wide uniqueness bookkeeping
#[derive(Default)]
struct SeenOccupants {
    owners: HashSet<String>,
    heroes: HashSet<String>,
    pairs: HashSet<(String, Option<String>)>,
}

impl SeenOccupants {
    fn rejection(&self, member: &Member, options: SanitizeOptions) -> Option<RemovalReason> {
        if !options.allow_duplicate_owners && self.owners.contains(&member.owner_id) {
            return Some(RemovalReason::DuplicateOwner);
        }
        if let Some(hero) = member.hero_key() {
            if self.heroes.contains(hero) {
                return Some(RemovalReason::DuplicateHero);
            }
        }
        let pair = (member.owner_id.clone(), member.hero_key().map(str::to_string));
        if self.pairs.contains(&pair) {
            return Some(RemovalReason::DuplicateOwner);
        }
        None
    }

    fn record(&mut self, member: &Member) {
        self.owners.insert(member.owner_id.clone());
        if let Some(hero) = member.hero_key() {
            self.heroes.insert(hero.to_string());
        }
        self.pairs.insert((
            member.owner_id.clone(),
            member.hero_key().map(str::to_string),
        ));
    }
}

/// Remove duplicate and invalid occupants from a batch of assignments
pub fn sanitize_assignments(
    assignments: &[Assignment],
    options: SanitizeOptions,
) -> SanitizedAssignments {
    let mut seen = SeenOccupants::default();
    let mut removed_members = Vec::new();
    let mut cleaned = Vec::with_capacity(assignments.len());

    for assignment in assignments {
        let mut slot_keys = HashSet::new();
        let mut role_slots = Vec::with_capacity(assignment.role_slots.len());

        for slot in &assignment.role_slots {
            let role = assignment.slot_role(slot).to_string();
            let occupants = slot.members.iter().filter(|m| m.is_occupant());

            if !slot_keys.insert((role.clone(), slot.slot_index)) {
                removed_members.extend(occupants.map(|member| {
                    RemovedMember::new(member, &role, slot.slot_index, RemovalReason::InvalidSlot)
                }));
                continue;
            }

            let mut kept: Option<Member> = None;
            for member in occupants {
                let rejection = if member.owner_id.is_empty() || kept.is_some() {
                    Some(RemovalReason::InvalidSlot)
                } else {
                    seen.rejection(member, options)
                };

                match rejection {
                    Some(reason) => {
                        debug!(
                            "Evicting owner '{}' from {}#{}: {}",
                            member.owner_id, role, slot.slot_index, reason
                        );
                        removed_members.push(RemovedMember::new(
                            member,
                            &role,
                            slot.slot_index,
                            reason,
                        ));
                    }
                    None => {
                        seen.record(member);
                        let mut member = member.clone();
                        member.slot_index = slot.slot_index;
                        kept = Some(member);
                    }
                }
            }

            role_slots.push(RoleSlot {
                role: slot.role.clone(),
                slot_index: slot.slot_index,
                occupied: kept.is_some(),
                members: kept.into_iter().collect(),
            });
        }

        let mut assignment = Assignment {
            role_slots,
            ..assignment.clone()
        };
        assignment.refresh_members();
        cleaned.push(assignment);
    }

    SanitizedAssignments {
        assignments: cleaned,
        removed_members,
    }
}

/// Sanitize, then drop anyone whose seat was claimed by another request
pub async fn post_check_match_assignments(
    store: &dyn MatchStore,
    game_id: &str,
    mode: &str,
    assignments: &[Assignment],
    options: SanitizeOptions,
) -> Result<PostCheckResult> {
    let SanitizedAssignments {
        assignments: mut checked,
        mut removed_members,
    } = sanitize_assignments(assignments, options);

    let active_rooms = store.load_active_rooms(game_id, mode).await?;
    let referenced: HashSet<String> = checked
        .iter()
        .filter_map(|assignment| assignment.room_id.clone())
        .collect();

    let before = removed_members.len();
    for assignment in &mut checked {
        // None: fresh match; Some(None): the room is no longer active
        let target = assignment
            .room_id
            .as_deref()
            .map(|room_id| active_rooms.iter().find(|room| room.id == room_id));
        let label = assignment.role.clone();

        for slot in &mut assignment.role_slots {
            let role = if slot.role.is_empty() {
                label.clone()
            } else {
                slot.role.clone()
            };
            let slot_index = slot.slot_index;

            let (lost, kept): (Vec<Member>, Vec<Member>) = slot
                .members
                .drain(..)
                .partition(|member| lost_race(member, &role, slot_index, target, &active_rooms));

            removed_members.extend(lost.iter().map(|member| {
                RemovedMember::new(member, &role, slot_index, RemovalReason::PostCheck)
            }));
            slot.members = kept;
        }
        assignment.refresh_members();
    }

    let raced = removed_members.len() - before;
    if raced > 0 {
        info!(
            "Post-check for {}/{} removed {} member(s) claimed concurrently",
            game_id, mode, raced
        );
    }

    let rooms = active_rooms
        .into_iter()
        .filter(|room| referenced.contains(&room.id))
        .collect();

    Ok(PostCheckResult {
        assignments: checked,
        rooms,
        removed_members,
    })
}

fn lost_race(
    member: &Member,
    role: &str,
    slot_index: usize,
    target: Option<Option<&ActiveRoom>>,
    rooms: &[ActiveRoom],
) -> bool {
    match target {
        None => seated_elsewhere(member, None, rooms),
        Some(None) => true,
        Some(Some(room)) => {
            let seat_taken = match room.find_slot(role, slot_index) {
                None => true,
                Some(seat) => {
                    !seat.is_open() && seat.owner_id.as_deref() != Some(member.owner_id.as_str())
                }
            };
            seat_taken || seated_elsewhere(member, Some(room.id.as_str()), rooms)
        }
    }
}

fn seated_elsewhere(member: &Member, except_room: Option<&str>, rooms: &[ActiveRoom]) -> bool {
    rooms
        .iter()
        .filter(|room| Some(room.id.as_str()) != except_room)
        .any(|room| {
            room.seats_owner(&member.owner_id)
                || member.hero_key().is_some_and(|hero| room.seats_hero(hero))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MockMatchStore;
    use crate::types::SlotLayoutEntry;
    use crate::utils::current_timestamp;

    fn member(owner: &str, hero: &str, slot_index: usize) -> Member {
        Member {
            owner_id: owner.to_string(),
            hero_id: Some(hero.to_string()),
            hero_name: None,
            ready: false,
            standin: false,
            slot_index,
        }
    }

    fn assignment(role: &str, slots: Vec<RoleSlot>) -> Assignment {
        let mut assignment = Assignment::new(role);
        assignment.role_slots = slots;
        assignment.refresh_members();
        assignment
    }

    fn room(id: &str, slots: Vec<SlotLayoutEntry>) -> ActiveRoom {
        ActiveRoom {
            id: id.to_string(),
            code: format!("code-{id}"),
            match_code: None,
            updated_at: current_timestamp(),
            slots,
        }
    }

    fn seat(role: &str, slot_index: usize, owner: &str) -> SlotLayoutEntry {
        SlotLayoutEntry {
            owner_id: Some(owner.to_string()),
            hero_id: Some(format!("{owner}-hero")),
            ..SlotLayoutEntry::open(role, slot_index)
        }
    }

    #[test]
    fn test_duplicate_pair_in_composite_role() {
        let batch = vec![assignment(
            "공격 · 수비",
            vec![
                RoleSlot::with_member("", 0, member("A", "H", 0)),
                RoleSlot::with_member("", 1, member("A", "H", 1)),
            ],
        )];

        let result = sanitize_assignments(&batch, SanitizeOptions::default());
        assert_eq!(result.assignments[0].filled_slots(), 1);
        assert_eq!(result.assignments[0].members.len(), 1);
        assert_eq!(result.removed_members.len(), 1);
        assert_eq!(
            result.removed_members[0].reason,
            RemovalReason::DuplicateOwner
        );
        assert_eq!(result.removed_members[0].slot_index, 1);
        assert!(!result.assignments[0].role_slots[1].occupied);
    }

    #[test]
    fn test_duplicate_hero_across_assignments() {
        let batch = vec![
            assignment(
                "공격",
                vec![RoleSlot::with_member("공격", 0, member("A", "H", 0))],
            ),
            assignment(
                "수비",
                vec![RoleSlot::with_member("수비", 0, member("B", "H", 0))],
            ),
        ];

        let result = sanitize_assignments(&batch, SanitizeOptions::default());
        assert_eq!(result.removed_members.len(), 1);
        assert_eq!(result.removed_members[0].reason, RemovalReason::DuplicateHero);
        assert_eq!(result.removed_members[0].role, "수비");
        assert!(result.assignments[1].members.is_empty());
    }

    #[test]
    fn test_allow_duplicate_owners() {
        let batch = vec![assignment(
            "공격",
            vec![
                RoleSlot::with_member("공격", 0, member("A", "H1", 0)),
                RoleSlot::with_member("공격", 1, member("A", "H2", 1)),
                RoleSlot::with_member("공격", 2, member("A", "H1", 2)),
            ],
        )];
        let options = SanitizeOptions {
            allow_duplicate_owners: true,
        };

        let result = sanitize_assignments(&batch, options);
        assert_eq!(result.assignments[0].members.len(), 2);
        assert_eq!(result.removed_members.len(), 1);
        assert_eq!(result.removed_members[0].reason, RemovalReason::DuplicateHero);
    }

    #[test]
    fn test_invalid_slots() {
        let crowded = RoleSlot {
            role: "공격".to_string(),
            slot_index: 0,
            members: vec![member("A", "H1", 0), member("B", "H2", 0)],
            occupied: true,
        };
        let repeated = RoleSlot::with_member("공격", 0, member("C", "H3", 0));
        let hero_only = RoleSlot::with_member("공격", 1, member("", "H4", 1));

        let batch = vec![assignment("공격", vec![crowded, repeated, hero_only])];
        let result = sanitize_assignments(&batch, SanitizeOptions::default());

        assert_eq!(result.assignments[0].role_slots.len(), 2);
        assert_eq!(result.assignments[0].members.len(), 1);
        assert_eq!(result.removed_members.len(), 3);
        assert!(result
            .removed_members
            .iter()
            .all(|removed| removed.reason == RemovalReason::InvalidSlot));
    }

    #[test]
    fn test_member_slot_index_is_normalized() {
        let batch = vec![assignment(
            "공격",
            vec![RoleSlot::with_member("공격", 3, member("A", "H", 0))],
        )];
        let result = sanitize_assignments(&batch, SanitizeOptions::default());
        assert_eq!(result.assignments[0].members[0].slot_index, 3);
    }

    #[test]
    fn test_sanitize_is_idempotent() {
        let batch = vec![assignment(
            "공격 · 수비",
            vec![
                RoleSlot::with_member("공격", 0, member("A", "H", 0)),
                RoleSlot::with_member("수비", 0, member("A", "H", 0)),
                RoleSlot::empty("수비", 1),
            ],
        )];
        let once = sanitize_assignments(&batch, SanitizeOptions::default());
        let twice = sanitize_assignments(&once.assignments, SanitizeOptions::default());
        assert_eq!(once.assignments, twice.assignments);
        assert!(twice.removed_members.is_empty());
    }

    #[tokio::test]
    async fn test_post_check_removes_owners_seated_elsewhere() {
        let mut store = MockMatchStore::new();
        store
            .expect_load_active_rooms()
            .returning(|_, _| Ok(vec![room("room-x", vec![seat("공격", 0, "B")])]));

        let batch = vec![assignment(
            "공격",
            vec![
                RoleSlot::with_member("공격", 0, member("A", "H1", 0)),
                RoleSlot::with_member("공격", 1, member("B", "H2", 1)),
            ],
        )];

        let result =
            post_check_match_assignments(&store, "game", "rank", &batch, SanitizeOptions::default())
                .await
                .unwrap();
        assert_eq!(result.assignments[0].members.len(), 1);
        assert_eq!(result.removed_members.len(), 1);
        assert_eq!(result.removed_members[0].owner_id, "B");
        assert_eq!(result.removed_members[0].reason, RemovalReason::PostCheck);
        assert!(result.rooms.is_empty());
    }

    #[tokio::test]
    async fn test_post_check_room_seat_taken() {
        let mut store = MockMatchStore::new();
        store.expect_load_active_rooms().returning(|_, _| {
            Ok(vec![room(
                "room-1",
                vec![seat("공격", 0, "A"), seat("수비", 0, "racer")],
            )])
        });

        let mut bound = assignment(
            "수비",
            vec![RoleSlot::with_member("수비", 0, member("C", "H3", 0))],
        );
        bound.room_id = Some("room-1".to_string());
        let mut seated = assignment(
            "공격",
            vec![RoleSlot::with_member("공격", 0, member("A", "A-hero", 0))],
        );
        seated.room_id = Some("room-1".to_string());

        let result = post_check_match_assignments(
            &store,
            "game",
            "rank",
            &[seated, bound],
            SanitizeOptions::default(),
        )
        .await
        .unwrap();

        assert_eq!(result.assignments[0].members.len(), 1);
        assert!(result.assignments[1].members.is_empty());
        assert_eq!(result.removed_members.len(), 1);
        assert_eq!(result.removed_members[0].owner_id, "C");
        assert_eq!(result.rooms.len(), 1);
    }

    #[tokio::test]
    async fn test_post_check_room_gone() {
        let mut store = MockMatchStore::new();
        store.expect_load_active_rooms().returning(|_, _| Ok(Vec::new()));

        let mut bound = assignment(
            "공격",
            vec![RoleSlot::with_member("공격", 0, member("A", "H", 0))],
        );
        bound.room_id = Some("closed".to_string());

        let result =
            post_check_match_assignments(&store, "game", "rank", &[bound], SanitizeOptions::default())
                .await
                .unwrap();
        assert!(result.assignments[0].members.is_empty());
        assert_eq!(result.removed_members[0].reason, RemovalReason::PostCheck);
    }

    #[tokio::test]
    async fn test_post_check_propagates_storage_errors() {
        let mut store = MockMatchStore::new();
        store
            .expect_load_active_rooms()
            .returning(|_, _| Err(anyhow::anyhow!("rooms table unavailable")));

        let result =
            post_check_match_assignments(&store, "game", "rank", &[], SanitizeOptions::default())
                .await;
        assert!(result.is_err());
    }
}

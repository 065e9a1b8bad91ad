//! Realtime drop-in into rooms that are already running
//!
//! Rooms are scanned oldest-updated first so idle rooms get filled before
//! busy ones. Inside a room, queued candidates are tried in waiting order and
//! the first one that fits an open seat of a declared role claims it.

use crate::assignment::assignments_from_layout;
use crate::candidate::sort_by_waiting_time;
use crate::error::Result;
use crate::storage::MatchStore;
use crate::types::{ActiveRoom, CandidateEntry, DropInMeta, DropInTarget, GameRules, Role};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

/// Reason reported when no open seat fits any waiting candidate
pub const NO_DROP_IN_TARGET: &str = "no_realtime_drop_in_target";

/// Input of a drop-in lookup
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DropInRequest {
    pub game_id: String,
    pub mode: String,
    pub roles: Vec<Role>,
    pub queue: Vec<CandidateEntry>,
    pub rules: GameRules,
}

/// Finds open seats in active rooms for queued candidates
pub struct DropInLocator {
    store: Arc<dyn MatchStore>,
}

impl DropInLocator {
    pub fn new(store: Arc<dyn MatchStore>) -> Self {
        Self { store }
    }

    /// Look for a seat in an active room
    ///
    /// `Ok(None)` means drop-in does not apply: the rules do not allow it or
    /// the game has no role definitions. A lookup that finds nothing returns
    /// a target with `ready == false` and [`NO_DROP_IN_TARGET`] as reason.
    pub async fn find_realtime_drop_in_target(
        &self,
        request: &DropInRequest,
    ) -> Result<Option<DropInTarget>> {
        if !request.rules.allows_realtime_drop_in() {
            debug!(
                "Drop-in disabled for {}/{} by game rules",
                request.game_id, request.mode
            );
            return Ok(None);
        }
        if request.roles.is_empty() {
            debug!(
                "No role definitions for game {}, skipping drop-in",
                request.game_id
            );
            return Ok(None);
        }

        let rooms = self
            .store
            .load_active_rooms(&request.game_id, &request.mode)
            .await?;
        let target = locate_drop_in(&request.roles, &request.queue, rooms);

        match &target.meta.owner_id {
            Some(owner_id) => info!(
                "Drop-in for {}/{}: owner '{}' joins room {} as {}#{}",
                request.game_id,
                request.mode,
                owner_id,
                target.room_code.as_deref().unwrap_or_default(),
                target.meta.role.as_deref().unwrap_or_default(),
                target.meta.slot_index.unwrap_or_default()
            ),
            None => debug!(
                "No drop-in target for {}/{} among {} candidate(s)",
                request.game_id, request.mode, target.meta.candidates
            ),
        }

        Ok(Some(target))
    }
}

/// Pair the longest-waiting fitting candidate with an open seat
pub fn locate_drop_in(
    roles: &[Role],
    queue: &[CandidateEntry],
    mut rooms: Vec<ActiveRoom>,
) -> DropInTarget {
    rooms.sort_by_key(|room| room.updated_at);

    let mut ordered = queue.to_vec();
    sort_by_waiting_time(&mut ordered);

    let declared = |role: &str| roles.iter().any(|r| r.name == role);

    for room in &rooms {
        for candidate in &ordered {
            let seated = rooms.iter().any(|r| {
                r.seats_owner(&candidate.owner_id)
                    || candidate.hero_key().is_some_and(|hero| r.seats_hero(hero))
            });
            if seated {
                continue;
            }

            let seat = room.slots.iter().position(|slot| {
                slot.is_open() && declared(&slot.role) && candidate.accepts_role(&slot.role)
            });
            let Some(position) = seat else {
                continue;
            };

            let mut layout = room.slots.clone();
            let claimed = &mut layout[position];
            claimed.owner_id = Some(candidate.owner_id.clone());
            claimed.hero_id = candidate.hero_id.clone();
            claimed.hero_name = candidate.hero_name.clone();
            claimed.ready = false;
            claimed.joined_at = candidate.joined_at;
            let (role, slot_index) = (claimed.role.clone(), claimed.slot_index);

            let ready = layout
                .iter()
                .filter(|slot| declared(&slot.role))
                .all(|slot| !slot.is_open());

            return DropInTarget {
                room_id: Some(room.id.clone()),
                room_code: Some(room.code.clone()),
                match_code: room.match_code.clone(),
                ready,
                assignments: assignments_from_layout(roles, &layout, Some(room.id.clone())),
                meta: DropInMeta {
                    candidates: queue.len(),
                    reason: None,
                    role: Some(role),
                    slot_index: Some(slot_index),
                    owner_id: Some(candidate.owner_id.clone()),
                },
            };
        }
    }

    DropInTarget {
        room_id: None,
        room_code: None,
        match_code: None,
        ready: false,
        assignments: Vec::new(),
        meta: DropInMeta {
            candidates: queue.len(),
            reason: Some(NO_DROP_IN_TARGET.to_string()),
            ..Default::default()
        },
    }
}

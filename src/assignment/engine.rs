//! Score-window assignment of candidates to role slots
//!
//! Roles are filled in declaration order. For each role the engine anchors
//! on a score (caller baseline or the first eligible candidate) and takes the
//! earliest-waiting candidates inside the narrowest score window that fills
//! every open seat. Stand-ins rank behind every real candidate. Roles that
//! cannot be filled are left partially open; the pass never aborts.

use crate::candidate::sort_by_waiting_time;
use crate::slots::{RoleGroup, RolePlan, RoleSlotModel};
use crate::types::{
    Assignment, CandidateEntry, Member, MatchResult, Role, RoleSlot, RoomId, SlotLayoutEntry,
};
use crate::utils::{score_difference, scores_within_window};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::{debug, info};

/// Error text reported when a request has nobody to place
pub const NO_CANDIDATES_ERROR: &str = "no matchmaking candidates available";

/// Input of one matching pass
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchRequest {
    pub mode: String,
    pub roles: Vec<Role>,
    /// Existing seat layout, when filling a room that is already partly seated
    #[serde(default)]
    pub layout: Option<Vec<SlotLayoutEntry>>,
    pub queue: Vec<CandidateEntry>,
    /// Ascending score windows; empty means unbounded
    #[serde(default)]
    pub score_windows: Vec<f64>,
    #[serde(default)]
    pub baseline_score: Option<f64>,
    #[serde(default)]
    pub merge_equal_roles: bool,
}

/// Fill every slot the request describes as well as the candidates allow
pub fn run_matching(request: &MatchRequest) -> MatchResult {
    let model = match &request.layout {
        Some(layout) => RoleSlotModel::with_layout(request.roles.clone(), layout.clone()),
        None => RoleSlotModel::new(request.roles.clone()),
    };
    let plans = model.role_plans();
    let total_slots: usize = plans.iter().map(RolePlan::total).sum();

    let mut ordered: Vec<CandidateEntry> = request.queue.clone();
    sort_by_waiting_time(&mut ordered);
    // stand-ins only take seats real players leave
    ordered.sort_by_key(|candidate| candidate.standin);

    let mut used_owners = model.seated_owners();
    let mut used_heroes = model.seated_heroes();
    let mut placements: HashMap<(String, usize), Member> = HashMap::new();
    let mut max_window: f64 = 0.0;

    for plan in &plans {
        let open: Vec<usize> = plan.open_slots().map(|slot| slot.slot_index).collect();
        if open.is_empty() {
            continue;
        }

        let eligible: Vec<&CandidateEntry> = ordered
            .iter()
            .filter(|c| c.accepts_role(&plan.role))
            .filter(|c| !used_owners.contains(&c.owner_id))
            .filter(|c| c.hero_key().map_or(true, |hero| !used_heroes.contains(hero)))
            .collect();
        let Some(first) = eligible.first() else {
            debug!("No eligible candidates left for role '{}'", plan.role);
            continue;
        };

        let anchor = request.baseline_score.unwrap_or(first.score);
        let picked = pick_within_windows(&eligible, anchor, open.len(), &request.score_windows);

        debug!(
            "Role '{}': {} of {} open seats filled around score {:.1}",
            plan.role,
            picked.len(),
            open.len(),
            anchor
        );

        for (slot_index, candidate) in open.into_iter().zip(picked) {
            used_owners.insert(candidate.owner_id.clone());
            if let Some(hero) = candidate.hero_key() {
                used_heroes.insert(hero.to_string());
            }
            max_window = max_window.max(score_difference(candidate.score, anchor));
            placements.insert(
                (plan.role.clone(), slot_index),
                Member::from_candidate(candidate, slot_index),
            );
        }
    }

    let groups = model.groups(&plans, request.merge_equal_roles);
    let assignments = build_assignments(&plans, &groups, &placements, None);

    let filled: usize = assignments.iter().map(Assignment::filled_slots).sum();
    let ready = total_slots > 0 && filled == total_slots;
    let error = (request.queue.is_empty() && !ready).then(|| NO_CANDIDATES_ERROR.to_string());

    info!(
        "Matching pass for mode '{}': {}/{} slots filled, ready: {}, max window: {:.1}",
        request.mode, filled, total_slots, ready, max_window
    );

    MatchResult {
        ready,
        assignments,
        total_slots,
        max_window,
        error,
    }
}

/// Turn a seat layout into assignments without placing anyone new
pub fn assignments_from_layout(
    roles: &[Role],
    layout: &[SlotLayoutEntry],
    room_id: Option<RoomId>,
) -> Vec<Assignment> {
    let present: Vec<Role> = roles
        .iter()
        .filter(|role| layout.iter().any(|entry| entry.role == role.name))
        .cloned()
        .collect();
    let model = RoleSlotModel::with_layout(present, layout.to_vec());
    let plans = model.role_plans();
    let groups = model.groups(&plans, false);
    build_assignments(&plans, &groups, &HashMap::new(), room_id)
}

fn build_assignments(
    plans: &[RolePlan],
    groups: &[RoleGroup],
    placements: &HashMap<(String, usize), Member>,
    room_id: Option<RoomId>,
) -> Vec<Assignment> {
    groups
        .iter()
        .map(|group| {
            let mut assignment = if group.is_composite() {
                Assignment::composite(group.roles.clone())
            } else {
                Assignment::new(group.roles[0].clone())
            };
            assignment.room_id = room_id.clone();

            for plan in plans.iter().filter(|plan| group.roles.contains(&plan.role)) {
                for slot in &plan.slots {
                    let member = slot.occupant.clone().or_else(|| {
                        placements
                            .get(&(plan.role.clone(), slot.slot_index))
                            .cloned()
                    });
                    assignment.role_slots.push(match member {
                        Some(mut member) => {
                            member.slot_index = slot.slot_index;
                            RoleSlot::with_member(plan.role.clone(), slot.slot_index, member)
                        }
                        None => RoleSlot::empty(plan.role.clone(), slot.slot_index),
                    });
                }
            }

            assignment.refresh_members();
            assignment
        })
        .collect()
}

/// Try each window in turn; the first that fills every seat wins, otherwise
/// the widest window's partial pick is used
fn pick_within_windows<'a>(
    eligible: &[&'a CandidateEntry],
    anchor: f64,
    needed: usize,
    windows: &[f64],
) -> Vec<&'a CandidateEntry> {
    if windows.is_empty() {
        return pick(eligible, anchor, needed, f64::INFINITY);
    }

    let mut best = Vec::new();
    for &window in windows {
        best = pick(eligible, anchor, needed, window);
        if best.len() == needed {
            break;
        }
    }
    best
}

fn pick<'a>(
    eligible: &[&'a CandidateEntry],
    anchor: f64,
    needed: usize,
    window: f64,
) -> Vec<&'a CandidateEntry> {
    let mut owners = HashSet::new();
    let mut heroes = HashSet::new();
    let mut picked = Vec::with_capacity(needed);

    for candidate in eligible {
        if picked.len() == needed {
            break;
        }
        if !scores_within_window(candidate.score, anchor, window) {
            continue;
        }
        if owners.contains(candidate.owner_id.as_str()) {
            continue;
        }
        if let Some(hero) = candidate.hero_key() {
            if !heroes.insert(hero) {
                continue;
            }
        }
        owners.insert(candidate.owner_id.as_str());
        picked.push(*candidate);
    }
    picked
}

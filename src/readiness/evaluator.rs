//! Per-role occupancy and the commit gate
//!
//! Totals come from the most specific source available. An explicit seat
//! layout wins; declared slot counts only cover roles the layout does not
//! mention. Without a layout, proposed assignments are counted, then active
//! rooms, and declared counts fill in for roles neither of them shows.

use crate::types::{ActiveRoom, Assignment, Role, SlotLayoutEntry};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// What readiness is computed from
#[derive(Debug, Clone, Copy, Default)]
pub struct ReadinessInput<'a> {
    pub roles: &'a [Role],
    pub slot_layout: Option<&'a [SlotLayoutEntry]>,
    pub assignments: &'a [Assignment],
    pub rooms: &'a [ActiveRoom],
}

/// Occupancy of one role
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleBucket {
    pub role: String,
    pub filled: usize,
    pub total: usize,
    pub missing: usize,
    pub ready: bool,
}

/// Overall readiness plus the per-role buckets behind it
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleReadiness {
    pub ready: bool,
    pub buckets: Vec<RoleBucket>,
}

impl RoleReadiness {
    pub fn total_missing(&self) -> usize {
        self.buckets.iter().map(|bucket| bucket.missing).sum()
    }
}

/// Insertion-ordered filled/total counts per role
#[derive(Default)]
struct Tally {
    order: Vec<String>,
    counts: HashMap<String, (usize, usize)>,
}

impl Tally {
    fn declare(&mut self, role: &str) {
        if !self.counts.contains_key(role) {
            self.order.push(role.to_string());
            self.counts.insert(role.to_string(), (0, 0));
        }
    }

    fn add(&mut self, role: &str, occupied: bool) {
        self.declare(role);
        if let Some((filled, total)) = self.counts.get_mut(role) {
            *total += 1;
            if occupied {
                *filled += 1;
            }
        }
    }

    fn total(&self, role: &str) -> usize {
        self.counts.get(role).map_or(0, |(_, total)| *total)
    }

    fn set(&mut self, role: &str, filled: usize, total: usize) {
        self.declare(role);
        self.counts.insert(role.to_string(), (filled, total));
    }

    fn into_buckets(self) -> Vec<RoleBucket> {
        let Tally { order, counts } = self;
        order
            .into_iter()
            .filter_map(|role| {
                let (filled, total) = counts.get(&role).copied()?;
                if total == 0 {
                    return None;
                }
                let filled = filled.min(total);
                let missing = total - filled;
                Some(RoleBucket {
                    role,
                    filled,
                    total,
                    missing,
                    ready: missing == 0,
                })
            })
            .collect()
    }
}

/// Per-role buckets for progress display and the commit gate
pub fn build_role_summary_buckets(input: &ReadinessInput<'_>) -> Vec<RoleBucket> {
    let mut tally = Tally::default();
    for role in input.roles {
        tally.declare(&role.name);
    }

    match input.slot_layout.filter(|layout| !layout.is_empty()) {
        Some(layout) => {
            for entry in layout {
                tally.add(&entry.role, !entry.is_open());
            }
            for role in input.roles {
                if tally.total(&role.name) == 0 {
                    let filled = occupied_in_assignments(input.assignments, &role.name);
                    tally.set(&role.name, filled, role.slot_count);
                }
            }
        }
        None => {
            if !input.assignments.is_empty() {
                for assignment in input.assignments {
                    for slot in &assignment.role_slots {
                        tally.add(assignment.slot_role(slot), slot.has_occupant());
                    }
                }
            } else {
                for room in input.rooms {
                    for entry in &room.slots {
                        tally.add(&entry.role, !entry.is_open());
                    }
                }
            }
            for role in input.roles {
                if tally.total(&role.name) == 0 {
                    tally.set(&role.name, 0, role.slot_count);
                }
            }
        }
    }

    tally.into_buckets()
}

/// Whether every required slot of every role is filled
pub fn compute_role_readiness(input: &ReadinessInput<'_>) -> RoleReadiness {
    let buckets = build_role_summary_buckets(input);
    let ready = !buckets.is_empty() && buckets.iter().all(|bucket| bucket.ready);
    RoleReadiness { ready, buckets }
}

fn occupied_in_assignments(assignments: &[Assignment], role: &str) -> usize {
    assignments
        .iter()
        .flat_map(|assignment| {
            assignment
                .role_slots
                .iter()
                .filter(move |slot| assignment.slot_role(slot) == role)
        })
        .filter(|slot| slot.has_occupant())
        .count()
}

//! Role and slot modeling
//!
//! A [`RoleSlotModel`] combines the declared role table of a game with the
//! seat layout of an existing room. When a layout is present it decides how
//! many seats a role has; declared slot counts only cover roles the layout
//! does not mention.

use crate::types::{Member, Role, SlotLayoutEntry};
use std::collections::HashSet;
use tracing::warn;

/// One seat the engine has to consider
#[derive(Debug, Clone, PartialEq)]
pub struct SlotPlan {
    pub slot_index: usize,
    /// Who already sits here, if anyone
    pub occupant: Option<Member>,
}

impl SlotPlan {
    pub fn is_open(&self) -> bool {
        self.occupant.is_none()
    }
}

/// All seats of one role
#[derive(Debug, Clone, PartialEq)]
pub struct RolePlan {
    pub role: String,
    pub slots: Vec<SlotPlan>,
}

impl RolePlan {
    pub fn total(&self) -> usize {
        self.slots.len()
    }

    pub fn open_slots(&self) -> impl Iterator<Item = &SlotPlan> {
        self.slots.iter().filter(|slot| slot.is_open())
    }
}

/// Roles that end up in one assignment
#[derive(Debug, Clone, PartialEq)]
pub struct RoleGroup {
    pub roles: Vec<String>,
}

impl RoleGroup {
    pub fn is_composite(&self) -> bool {
        self.roles.len() > 1
    }
}

/// Static role requirements plus optional current occupancy
#[derive(Debug, Clone, Default)]
pub struct RoleSlotModel {
    roles: Vec<Role>,
    layout: Option<Vec<SlotLayoutEntry>>,
}

impl RoleSlotModel {
    /// Model built from declared roles only
    pub fn new(roles: Vec<Role>) -> Self {
        Self {
            roles: dedupe_roles(roles),
            layout: None,
        }
    }

    /// Model for a room that already has a seat layout
    pub fn with_layout(roles: Vec<Role>, layout: Vec<SlotLayoutEntry>) -> Self {
        Self {
            roles: dedupe_roles(roles),
            layout: if layout.is_empty() { None } else { Some(layout) },
        }
    }

    pub fn roles(&self) -> &[Role] {
        &self.roles
    }

    pub fn layout(&self) -> Option<&[SlotLayoutEntry]> {
        self.layout.as_deref()
    }

    /// Seats per role: declared roles first, then roles only the layout knows
    pub fn role_plans(&self) -> Vec<RolePlan> {
        let layout = self.layout.as_deref().unwrap_or(&[]);
        let mut plans = Vec::new();
        let mut seen = HashSet::new();

        for role in &self.roles {
            seen.insert(role.name.as_str());
            let mut slots = layout_slots(layout, &role.name);
            if slots.is_empty() {
                slots = (0..role.slot_count)
                    .map(|slot_index| SlotPlan {
                        slot_index,
                        occupant: None,
                    })
                    .collect();
            }
            if !slots.is_empty() {
                plans.push(RolePlan {
                    role: role.name.clone(),
                    slots,
                });
            }
        }

        for entry in layout {
            if seen.insert(entry.role.as_str()) {
                plans.push(RolePlan {
                    role: entry.role.clone(),
                    slots: layout_slots(layout, &entry.role),
                });
            }
        }

        plans
    }

    /// Total seats across every role
    pub fn total_slots(&self) -> usize {
        self.role_plans().iter().map(RolePlan::total).sum()
    }

    /// Owners already seated in the layout
    pub fn seated_owners(&self) -> HashSet<String> {
        self.layout
            .iter()
            .flatten()
            .filter_map(|entry| entry.owner_id.clone())
            .filter(|owner| !owner.is_empty())
            .collect()
    }

    /// Heroes already seated in the layout
    pub fn seated_heroes(&self) -> HashSet<String> {
        self.layout
            .iter()
            .flatten()
            .filter_map(|entry| entry.hero_id.clone())
            .filter(|hero| !hero.is_empty())
            .collect()
    }

    /// Group role plans into assignments; equal-sized roles share one
    /// composite group when `merge_equal` is set
    pub fn groups(&self, plans: &[RolePlan], merge_equal: bool) -> Vec<RoleGroup> {
        if !merge_equal {
            return plans
                .iter()
                .map(|plan| RoleGroup {
                    roles: vec![plan.role.clone()],
                })
                .collect();
        }

        let mut groups: Vec<(usize, RoleGroup)> = Vec::new();
        for plan in plans {
            match groups.iter_mut().find(|(total, _)| *total == plan.total()) {
                Some((_, group)) => group.roles.push(plan.role.clone()),
                None => groups.push((
                    plan.total(),
                    RoleGroup {
                        roles: vec![plan.role.clone()],
                    },
                )),
            }
        }
        groups.into_iter().map(|(_, group)| group).collect()
    }
}

fn layout_slots(layout: &[SlotLayoutEntry], role: &str) -> Vec<SlotPlan> {
    let mut entries: Vec<&SlotLayoutEntry> = layout.iter().filter(|e| e.role == role).collect();
    entries.sort_by_key(|entry| entry.slot_index);
    entries.dedup_by_key(|entry| entry.slot_index);
    entries
        .into_iter()
        .map(|entry| SlotPlan {
            slot_index: entry.slot_index,
            occupant: Member::from_layout(entry),
        })
        .collect()
}

fn dedupe_roles(roles: Vec<Role>) -> Vec<Role> {
    let mut seen = HashSet::new();
    roles
        .into_iter()
        .filter(|role| {
            let fresh = seen.insert(role.name.clone());
            if !fresh {
                warn!("Ignoring duplicate role declaration '{}'", role.name);
            }
            fresh
        })
        .collect()
}

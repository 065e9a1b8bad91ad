//! Common types used throughout the matchmaking engine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Account-level identifier for whoever owns a hero
pub type OwnerId = String;

/// Character-level identifier
pub type HeroId = String;

/// Identifier of a game (one ruleset + role table)
pub type GameId = String;

/// Identifier of an active room
pub type RoomId = String;

/// Separator used when several roles are shown under one composite label
pub const COMPOSITE_ROLE_SEPARATOR: &str = " · ";

/// A role a match requires and how many seats it has
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Role {
    pub name: String,
    #[serde(default, alias = "slot_count")]
    pub slot_count: usize,
}

impl Role {
    pub fn new(name: impl Into<String>, slot_count: usize) -> Self {
        Self {
            name: name.into(),
            slot_count,
        }
    }
}

/// Rules of a game that affect how matchmaking runs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameRules {
    #[serde(default, alias = "realtime_match")]
    pub realtime_match: bool,
    #[serde(default, alias = "drop_in")]
    pub drop_in: bool,
}

impl GameRules {
    /// Drop-in only applies to realtime games that explicitly allow it
    pub fn allows_realtime_drop_in(&self) -> bool {
        self.realtime_match && self.drop_in
    }
}

/// One concrete seat of an existing room
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotLayoutEntry {
    #[serde(alias = "slot_index")]
    pub slot_index: usize,
    pub role: String,
    #[serde(default, alias = "owner_id")]
    pub owner_id: Option<OwnerId>,
    #[serde(default, alias = "hero_id")]
    pub hero_id: Option<HeroId>,
    #[serde(default, alias = "hero_name")]
    pub hero_name: Option<String>,
    #[serde(default)]
    pub ready: bool,
    #[serde(default, alias = "joined_at")]
    pub joined_at: Option<DateTime<Utc>>,
}

impl SlotLayoutEntry {
    /// Create an unoccupied seat
    pub fn open(role: impl Into<String>, slot_index: usize) -> Self {
        Self {
            slot_index,
            role: role.into(),
            owner_id: None,
            hero_id: None,
            hero_name: None,
            ready: false,
            joined_at: None,
        }
    }

    /// A seat is open when neither an owner nor a hero sits in it
    pub fn is_open(&self) -> bool {
        !is_present(&self.owner_id) && !is_present(&self.hero_id)
    }
}

/// Which pool a candidate was drawn from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateOrigin {
    Queue,
    ParticipantPool,
}

impl std::fmt::Display for CandidateOrigin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CandidateOrigin::Queue => write!(f, "queue"),
            CandidateOrigin::ParticipantPool => write!(f, "participant_pool"),
        }
    }
}

/// Someone eligible to be assigned to a slot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateEntry {
    pub owner_id: OwnerId,
    #[serde(default)]
    pub hero_id: Option<HeroId>,
    #[serde(default)]
    pub hero_name: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub score: f64,
    pub source: CandidateOrigin,
    #[serde(default)]
    pub standin: bool,
    #[serde(default, rename = "match_source")]
    pub match_source: Option<CandidateOrigin>,
    #[serde(default)]
    pub joined_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl CandidateEntry {
    /// Timestamp used for ordering: queue join time, else last update
    pub fn waiting_since(&self) -> Option<DateTime<Utc>> {
        self.joined_at.or(self.updated_at)
    }

    /// Whether this candidate may take a slot of the given role
    pub fn accepts_role(&self, role: &str) -> bool {
        match self.role.as_deref() {
            None | Some("") => true,
            Some(declared) => declared == role,
        }
    }

    /// Whether the candidate brings a usable hero id
    pub fn hero_key(&self) -> Option<&str> {
        self.hero_id.as_deref().filter(|id| !id.is_empty())
    }
}

/// An occupant of a role slot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Member {
    pub owner_id: OwnerId,
    #[serde(default)]
    pub hero_id: Option<HeroId>,
    #[serde(default)]
    pub hero_name: Option<String>,
    #[serde(default)]
    pub ready: bool,
    #[serde(default)]
    pub standin: bool,
    pub slot_index: usize,
}

impl Member {
    /// Build a member for a candidate placed at `slot_index`
    pub fn from_candidate(candidate: &CandidateEntry, slot_index: usize) -> Self {
        Self {
            owner_id: candidate.owner_id.clone(),
            hero_id: candidate.hero_id.clone(),
            hero_name: candidate.hero_name.clone(),
            ready: false,
            standin: candidate.standin,
            slot_index,
        }
    }

    /// Build a member from an occupied layout seat
    pub fn from_layout(entry: &SlotLayoutEntry) -> Option<Self> {
        if entry.is_open() {
            return None;
        }
        Some(Self {
            owner_id: entry.owner_id.clone().unwrap_or_default(),
            hero_id: entry.hero_id.clone(),
            hero_name: entry.hero_name.clone(),
            ready: entry.ready,
            standin: false,
            slot_index: entry.slot_index,
        })
    }

    /// A member counts as an occupant when it names an owner or a hero
    pub fn is_occupant(&self) -> bool {
        !self.owner_id.is_empty() || is_present(&self.hero_id)
    }

    pub fn hero_key(&self) -> Option<&str> {
        self.hero_id.as_deref().filter(|id| !id.is_empty())
    }
}

/// One seat of a role inside an assignment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleSlot {
    pub role: String,
    pub slot_index: usize,
    #[serde(default)]
    pub members: Vec<Member>,
    #[serde(default)]
    pub occupied: bool,
}

impl RoleSlot {
    pub fn empty(role: impl Into<String>, slot_index: usize) -> Self {
        Self {
            role: role.into(),
            slot_index,
            members: Vec::new(),
            occupied: false,
        }
    }

    pub fn with_member(role: impl Into<String>, slot_index: usize, member: Member) -> Self {
        Self {
            role: role.into(),
            slot_index,
            members: vec![member],
            occupied: true,
        }
    }

    pub fn has_occupant(&self) -> bool {
        self.members.iter().any(Member::is_occupant)
    }
}

/// All slots sharing one role label
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Assignment {
    /// Display label; for composites this is the underlying names joined
    pub role: String,
    /// Underlying roles when several equal-sized roles share this assignment
    #[serde(default)]
    pub composite_of: Vec<String>,
    /// Room this assignment seats into, for drop-in placements
    #[serde(default)]
    pub room_id: Option<RoomId>,
    #[serde(default)]
    pub members: Vec<Member>,
    #[serde(default)]
    pub role_slots: Vec<RoleSlot>,
}

impl Assignment {
    pub fn new(role: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            composite_of: Vec::new(),
            room_id: None,
            members: Vec::new(),
            role_slots: Vec::new(),
        }
    }

    /// Assignment covering several roles at once
    pub fn composite(roles: Vec<String>) -> Self {
        Self {
            role: roles.join(COMPOSITE_ROLE_SEPARATOR),
            composite_of: roles,
            room_id: None,
            members: Vec::new(),
            role_slots: Vec::new(),
        }
    }

    pub fn is_composite(&self) -> bool {
        !self.composite_of.is_empty()
    }

    /// Role a slot belongs to, falling back to the assignment label
    pub fn slot_role<'a>(&'a self, slot: &'a RoleSlot) -> &'a str {
        if slot.role.is_empty() {
            &self.role
        } else {
            &slot.role
        }
    }

    /// Recompute `members` and every `occupied` flag from the role slots
    pub fn refresh_members(&mut self) {
        for slot in &mut self.role_slots {
            slot.occupied = slot.has_occupant();
        }
        self.members = self
            .role_slots
            .iter()
            .flat_map(|slot| slot.members.iter().cloned())
            .collect();
    }

    pub fn filled_slots(&self) -> usize {
        self.role_slots.iter().filter(|s| s.has_occupant()).count()
    }
}

/// Why the sanitizer evicted an occupant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemovalReason {
    DuplicateOwner,
    DuplicateHero,
    PostCheck,
    InvalidSlot,
}

impl RemovalReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RemovalReason::DuplicateOwner => "duplicate_owner",
            RemovalReason::DuplicateHero => "duplicate_hero",
            RemovalReason::PostCheck => "post_check",
            RemovalReason::InvalidSlot => "invalid_slot",
        }
    }
}

impl std::fmt::Display for RemovalReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An occupant evicted by sanitize or post-check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemovedMember {
    pub owner_id: OwnerId,
    pub hero_id: Option<HeroId>,
    pub slot_index: usize,
    pub role: String,
    pub reason: RemovalReason,
}

impl RemovedMember {
    pub fn new(member: &Member, role: &str, slot_index: usize, reason: RemovalReason) -> Self {
        Self {
            owner_id: member.owner_id.clone(),
            hero_id: member.hero_id.clone(),
            slot_index,
            role: role.to_string(),
            reason,
        }
    }
}

/// Output of the assignment engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchResult {
    pub ready: bool,
    pub assignments: Vec<Assignment>,
    pub total_slots: usize,
    pub max_window: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Extra information about a drop-in lookup
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DropInMeta {
    pub candidates: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slot_index: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<OwnerId>,
}

/// A seat in an existing room that a waiting candidate can take
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DropInTarget {
    pub room_id: Option<RoomId>,
    pub room_code: Option<String>,
    pub match_code: Option<String>,
    pub ready: bool,
    pub assignments: Vec<Assignment>,
    pub meta: DropInMeta,
}

impl DropInTarget {
    /// Whether the lookup actually placed someone
    pub fn is_hit(&self) -> bool {
        self.meta.reason.is_none() && self.meta.owner_id.is_some()
    }
}

/// A room that is currently filling or playing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveRoom {
    pub id: RoomId,
    pub code: String,
    #[serde(default, alias = "match_code")]
    pub match_code: Option<String>,
    #[serde(alias = "updated_at")]
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub slots: Vec<SlotLayoutEntry>,
}

impl ActiveRoom {
    pub fn seats_owner(&self, owner_id: &str) -> bool {
        self.slots
            .iter()
            .any(|slot| slot.owner_id.as_deref() == Some(owner_id))
    }

    pub fn seats_hero(&self, hero_id: &str) -> bool {
        self.slots
            .iter()
            .any(|slot| slot.hero_id.as_deref() == Some(hero_id))
    }

    pub fn find_slot(&self, role: &str, slot_index: usize) -> Option<&SlotLayoutEntry> {
        self.slots
            .iter()
            .find(|slot| slot.role == role && slot.slot_index == slot_index)
    }
}

/// Display data for a hero
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeroSummary {
    pub id: HeroId,
    pub name: String,
    #[serde(default)]
    pub image_url: Option<String>,
}

/// Helper: an optional id counts only when it is non-empty
pub(crate) fn is_present(value: &Option<String>) -> bool {
    value.as_deref().is_some_and(|v| !v.is_empty())
}

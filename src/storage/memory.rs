//! In-memory storage implementation
//!
//! Backs every storage trait with one `RwLock`-guarded state. The commit runs
//! its conflict check and its writes under a single write guard, so it
//! behaves like the conditional write a database implementation would issue.

use super::{
    CommitGateway, CommitRequest, HeroDirectory, MatchStore, MatchmakingLogEntry,
    MatchmakingLogSink,
};
use crate::candidate::{normalize_rows, sort_by_waiting_time, RawCandidateRow};
use crate::error::{MatchmakingError, Result};
use crate::types::{
    ActiveRoom, Assignment, CandidateEntry, CandidateOrigin, GameId, GameRules, HeroId,
    HeroSummary, Role, SlotLayoutEntry,
};
use crate::utils::current_timestamp;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info};

/// Role table and rules of one game
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameDefinition {
    pub id: GameId,
    #[serde(default)]
    pub roles: Vec<Role>,
    #[serde(default)]
    pub rules: GameRules,
}

/// State of a realtime queue row
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueStatus {
    Waiting,
    Matched { match_code: String },
}

/// Queue row as it appears in a snapshot file
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueRow {
    #[serde(alias = "game_id")]
    pub game_id: GameId,
    pub mode: String,
    #[serde(flatten)]
    pub row: RawCandidateRow,
}

/// Participant pool row as it appears in a snapshot file
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantRow {
    #[serde(alias = "game_id")]
    pub game_id: GameId,
    #[serde(flatten)]
    pub row: RawCandidateRow,
}

/// Active room as it appears in a snapshot file
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomRow {
    #[serde(alias = "game_id")]
    pub game_id: GameId,
    pub mode: String,
    #[serde(flatten)]
    pub room: ActiveRoom,
}

/// Everything needed to seed an [`InMemoryMatchStore`]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    #[serde(default)]
    pub games: Vec<GameDefinition>,
    #[serde(default)]
    pub queue: Vec<QueueRow>,
    #[serde(default)]
    pub participants: Vec<ParticipantRow>,
    #[serde(default)]
    pub rooms: Vec<RoomRow>,
    #[serde(default)]
    pub heroes: Vec<HeroSummary>,
}

#[derive(Debug, Clone)]
struct QueueRecord {
    game_id: GameId,
    mode: String,
    entry: CandidateEntry,
    status: QueueStatus,
}

#[derive(Debug, Clone)]
struct RoomRecord {
    game_id: GameId,
    mode: String,
    room: ActiveRoom,
}

#[derive(Debug, Default)]
struct StoreState {
    games: HashMap<GameId, GameDefinition>,
    queue: Vec<QueueRecord>,
    participants: Vec<(GameId, CandidateEntry)>,
    rooms: Vec<RoomRecord>,
    heroes: HashMap<HeroId, HeroSummary>,
    commits: Vec<CommitRequest>,
    logs: Vec<MatchmakingLogEntry>,
}

impl StoreState {
    fn rooms_of<'a>(&'a self, game_id: &'a str, mode: &'a str) -> impl Iterator<Item = &'a ActiveRoom> {
        self.rooms
            .iter()
            .filter(move |record| record.game_id == game_id && record.mode == mode)
            .map(|record| &record.room)
    }

    /// First reason the commit cannot be applied, if any
    fn find_conflict(&self, request: &CommitRequest) -> Option<String> {
        let game_id = request.game_id.as_str();
        let mode = request.mode.as_str();

        for assignment in &request.assignments {
            let room = match assignment.room_id.as_deref() {
                Some(room_id) => match self.rooms_of(game_id, mode).find(|r| r.id == room_id) {
                    Some(room) => Some(room),
                    None => return Some(format!("room {} is no longer active", room_id)),
                },
                None => None,
            };
            let home = assignment
                .room_id
                .as_deref()
                .unwrap_or(request.match_code.as_str());

            for slot in &assignment.role_slots {
                let role = assignment.slot_role(slot);
                for member in slot.members.iter().filter(|m| m.is_occupant()) {
                    let mut already_seated = false;
                    if let Some(room) = room {
                        match room.find_slot(role, slot.slot_index) {
                            None => {
                                return Some(format!(
                                    "room {} has no seat {}#{}",
                                    room.id, role, slot.slot_index
                                ))
                            }
                            Some(seat) if seat.is_open() => {}
                            Some(seat) if seat.owner_id.as_deref() == Some(member.owner_id.as_str()) => {
                                already_seated = true;
                            }
                            Some(_) => {
                                return Some(format!(
                                    "seat {}#{} in room {} was claimed",
                                    role, slot.slot_index, room.id
                                ))
                            }
                        }
                    }

                    let claimed = self.queue.iter().find_map(|record| match &record.status {
                        QueueStatus::Matched { match_code }
                            if record.game_id == game_id
                                && record.mode == mode
                                && record.entry.owner_id == member.owner_id
                                && *match_code != request.match_code =>
                        {
                            Some(match_code)
                        }
                        _ => None,
                    });
                    if let (false, Some(other)) = (already_seated, claimed) {
                        return Some(format!(
                            "owner {} already matched under {}",
                            member.owner_id, other
                        ));
                    }

                    if self
                        .rooms_of(game_id, mode)
                        .any(|r| r.id != home && r.seats_owner(&member.owner_id))
                    {
                        return Some(format!(
                            "owner {} is seated in another room",
                            member.owner_id
                        ));
                    }
                }
            }
        }
        None
    }

    fn apply_commit(&mut self, request: &CommitRequest) {
        let now = current_timestamp();
        let owners: HashSet<&str> = request
            .assignments
            .iter()
            .flat_map(|assignment| assignment.members.iter())
            .filter(|member| member.is_occupant())
            .map(|member| member.owner_id.as_str())
            .collect();

        for record in self.queue.iter_mut().filter(|record| {
            record.game_id == request.game_id
                && record.mode == request.mode
                && record.status == QueueStatus::Waiting
                && owners.contains(record.entry.owner_id.as_str())
        }) {
            record.status = QueueStatus::Matched {
                match_code: request.match_code.clone(),
            };
        }

        let mut fresh_slots = Vec::new();
        for assignment in &request.assignments {
            match assignment.room_id.as_deref() {
                Some(room_id) => {
                    let record = self.rooms.iter_mut().find(|record| {
                        record.game_id == request.game_id
                            && record.mode == request.mode
                            && record.room.id == room_id
                    });
                    if let Some(record) = record {
                        seat_members(&mut record.room, assignment, now);
                        if record.room.match_code.is_none() {
                            record.room.match_code = Some(request.match_code.clone());
                        }
                        record.room.updated_at = now;
                    }
                }
                None => fresh_slots.extend(layout_of(assignment, now)),
            }
        }

        let exists = self.rooms.iter().any(|record| record.room.id == request.match_code);
        if !fresh_slots.is_empty() && !exists {
            self.rooms.push(RoomRecord {
                game_id: request.game_id.clone(),
                mode: request.mode.clone(),
                room: ActiveRoom {
                    id: request.match_code.clone(),
                    code: request.match_code.clone(),
                    match_code: Some(request.match_code.clone()),
                    updated_at: now,
                    slots: fresh_slots,
                },
            });
        }

        self.commits.push(request.clone());
    }
}

fn seat_members(room: &mut ActiveRoom, assignment: &Assignment, now: chrono::DateTime<chrono::Utc>) {
    for slot in &assignment.role_slots {
        let role = assignment.slot_role(slot).to_string();
        let Some(member) = slot.members.iter().find(|m| m.is_occupant()) else {
            continue;
        };
        if let Some(seat) = room
            .slots
            .iter_mut()
            .find(|seat| seat.role == role && seat.slot_index == slot.slot_index)
        {
            if seat.is_open() {
                seat.owner_id = Some(member.owner_id.clone());
                seat.hero_id = member.hero_id.clone();
                seat.hero_name = member.hero_name.clone();
                seat.ready = member.ready;
                seat.joined_at = Some(now);
            }
        }
    }
}

fn layout_of(assignment: &Assignment, now: chrono::DateTime<chrono::Utc>) -> Vec<SlotLayoutEntry> {
    assignment
        .role_slots
        .iter()
        .map(|slot| {
            let mut seat = SlotLayoutEntry::open(assignment.slot_role(slot), slot.slot_index);
            if let Some(member) = slot.members.iter().find(|m| m.is_occupant()) {
                seat.owner_id = Some(member.owner_id.clone());
                seat.hero_id = member.hero_id.clone();
                seat.hero_name = member.hero_name.clone();
                seat.ready = member.ready;
                seat.joined_at = Some(now);
            }
            seat
        })
        .collect()
}

/// In-memory store implementing every storage trait
#[derive(Debug, Default)]
pub struct InMemoryMatchStore {
    state: RwLock<StoreState>,
}

impl InMemoryMatchStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a store from a snapshot; unusable candidate rows are skipped
    pub fn from_snapshot(snapshot: Snapshot) -> Result<Self> {
        let store = Self::new();
        for game in snapshot.games {
            store.add_game(game)?;
        }

        let mut queues: BTreeMap<(GameId, String), Vec<RawCandidateRow>> = BTreeMap::new();
        for QueueRow { game_id, mode, row } in snapshot.queue {
            queues.entry((game_id, mode)).or_default().push(row);
        }
        for ((game_id, mode), rows) in queues {
            for entry in normalize_rows(rows, CandidateOrigin::Queue) {
                store.enqueue(&game_id, &mode, entry)?;
            }
        }

        let mut pools: BTreeMap<GameId, Vec<RawCandidateRow>> = BTreeMap::new();
        for ParticipantRow { game_id, row } in snapshot.participants {
            pools.entry(game_id).or_default().push(row);
        }
        for (game_id, rows) in pools {
            for entry in normalize_rows(rows, CandidateOrigin::ParticipantPool) {
                store.add_participant(&game_id, entry)?;
            }
        }

        for RoomRow { game_id, mode, room } in snapshot.rooms {
            store.add_room(&game_id, &mode, room)?;
        }
        for hero in snapshot.heroes {
            store.add_hero(hero)?;
        }
        Ok(store)
    }

    fn read_state(&self) -> Result<RwLockReadGuard<'_, StoreState>> {
        self.state.read().map_err(|_| {
            MatchmakingError::InternalError {
                message: "Failed to acquire store read lock".to_string(),
            }
            .into()
        })
    }

    fn write_state(&self) -> Result<RwLockWriteGuard<'_, StoreState>> {
        self.state.write().map_err(|_| {
            MatchmakingError::InternalError {
                message: "Failed to acquire store write lock".to_string(),
            }
            .into()
        })
    }

    pub fn add_game(&self, game: GameDefinition) -> Result<()> {
        self.write_state()?.games.insert(game.id.clone(), game);
        Ok(())
    }

    pub fn enqueue(&self, game_id: &str, mode: &str, entry: CandidateEntry) -> Result<()> {
        self.write_state()?.queue.push(QueueRecord {
            game_id: game_id.to_string(),
            mode: mode.to_string(),
            entry,
            status: QueueStatus::Waiting,
        });
        Ok(())
    }

    pub fn add_participant(&self, game_id: &str, entry: CandidateEntry) -> Result<()> {
        self.write_state()?
            .participants
            .push((game_id.to_string(), entry));
        Ok(())
    }

    pub fn add_room(&self, game_id: &str, mode: &str, room: ActiveRoom) -> Result<()> {
        self.write_state()?.rooms.push(RoomRecord {
            game_id: game_id.to_string(),
            mode: mode.to_string(),
            room,
        });
        Ok(())
    }

    pub fn add_hero(&self, hero: HeroSummary) -> Result<()> {
        self.write_state()?.heroes.insert(hero.id.clone(), hero);
        Ok(())
    }

    pub fn game(&self, game_id: &str) -> Result<Option<GameDefinition>> {
        Ok(self.read_state()?.games.get(game_id).cloned())
    }

    /// Status of an owner's queue row, if the owner is queued at all
    pub fn queue_status(&self, game_id: &str, mode: &str, owner_id: &str) -> Result<Option<QueueStatus>> {
        Ok(self
            .read_state()?
            .queue
            .iter()
            .find(|record| {
                record.game_id == game_id && record.mode == mode && record.entry.owner_id == owner_id
            })
            .map(|record| record.status.clone()))
    }

    pub fn room(&self, room_id: &str) -> Result<Option<ActiveRoom>> {
        Ok(self
            .read_state()?
            .rooms
            .iter()
            .find(|record| record.room.id == room_id)
            .map(|record| record.room.clone()))
    }

    /// Every commit applied so far, oldest first
    pub fn commits(&self) -> Result<Vec<CommitRequest>> {
        Ok(self.read_state()?.commits.clone())
    }

    /// Every audit entry recorded so far, oldest first
    pub fn logs(&self) -> Result<Vec<MatchmakingLogEntry>> {
        Ok(self.read_state()?.logs.clone())
    }
}

#[async_trait]
impl MatchStore for InMemoryMatchStore {
    async fn load_queue_entries(&self, game_id: &str, mode: &str) -> Result<Vec<CandidateEntry>> {
        let mut entries: Vec<CandidateEntry> = self
            .read_state()?
            .queue
            .iter()
            .filter(|record| {
                record.game_id == game_id
                    && record.mode == mode
                    && record.status == QueueStatus::Waiting
            })
            .map(|record| record.entry.clone())
            .collect();
        sort_by_waiting_time(&mut entries);
        Ok(entries)
    }

    async fn load_participant_pool(&self, game_id: &str) -> Result<Vec<CandidateEntry>> {
        Ok(self
            .read_state()?
            .participants
            .iter()
            .filter(|(game, _)| game == game_id)
            .map(|(_, entry)| entry.clone())
            .collect())
    }

    async fn load_active_rooms(&self, game_id: &str, mode: &str) -> Result<Vec<ActiveRoom>> {
        Ok(self.read_state()?.rooms_of(game_id, mode).cloned().collect())
    }
}

#[async_trait]
impl CommitGateway for InMemoryMatchStore {
    async fn mark_assignments_matched(&self, request: &CommitRequest) -> Result<()> {
        let mut state = self.write_state()?;

        if let Some(reason) = state.find_conflict(request) {
            debug!("Rejecting commit {}: {}", request.match_code, reason);
            return Err(MatchmakingError::CommitConflict {
                match_code: request.match_code.clone(),
                reason,
            }
            .into());
        }

        state.apply_commit(request);
        info!(
            "Committed match {} for {}/{} with {} assignment(s)",
            request.match_code,
            request.game_id,
            request.mode,
            request.assignments.len()
        );
        Ok(())
    }
}

#[async_trait]
impl MatchmakingLogSink for InMemoryMatchStore {
    async fn record_matchmaking_log(&self, entry: MatchmakingLogEntry) -> Result<()> {
        self.write_state()?.logs.push(entry);
        Ok(())
    }
}

#[async_trait]
impl HeroDirectory for InMemoryMatchStore {
    async fn load_heroes_by_ids(&self, ids: &[HeroId]) -> Result<HashMap<HeroId, HeroSummary>> {
        let state = self.read_state()?;
        Ok(ids
            .iter()
            .filter_map(|id| state.heroes.get(id).map(|hero| (id.clone(), hero.clone())))
            .collect())
    }
}

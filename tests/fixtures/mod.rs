//! Test fixtures and collaborator doubles for integration testing

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Duration;
use rank_matchmaker::config::MatchmakingSettings;
use rank_matchmaker::error::Result;
use rank_matchmaker::metrics::MetricsCollector;
use rank_matchmaker::storage::{
    GameDefinition, InMemoryMatchStore, LogStage, MatchStore, MatchmakingLogEntry,
    MatchmakingLogSink,
};
use rank_matchmaker::types::{
    ActiveRoom, CandidateEntry, CandidateOrigin, GameRules, Role, SlotLayoutEntry,
};
use rank_matchmaker::utils::current_timestamp;
use rank_matchmaker::{MatchmakingPipeline, MatchmakingRequest};
use std::sync::{Arc, Mutex};

pub const GAME_ID: &str = "arena";
pub const MODE: &str = "rank";

/// Log sink that captures recorded audit entries for testing
#[derive(Debug, Default)]
pub struct CapturingLogSink {
    entries: Arc<Mutex<Vec<MatchmakingLogEntry>>>,
}

impl CapturingLogSink {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Get all recorded entries (for testing)
    pub fn get_recorded_logs(&self) -> Vec<MatchmakingLogEntry> {
        self.entries
            .lock()
            .map(|entries| entries.clone())
            .unwrap_or_default()
    }

    /// Count entries recorded for a stage with the given status
    pub fn count_logs(&self, stage: LogStage, status: &str) -> usize {
        self.get_recorded_logs()
            .iter()
            .filter(|entry| entry.stage == stage && entry.status == status)
            .count()
    }
}

#[async_trait]
impl MatchmakingLogSink for CapturingLogSink {
    async fn record_matchmaking_log(&self, entry: MatchmakingLogEntry) -> Result<()> {
        if let Ok(mut entries) = self.entries.lock() {
            entries.push(entry);
        }
        Ok(())
    }
}

/// Log sink whose audit table is always unavailable
#[derive(Debug, Default)]
pub struct FailingLogSink;

#[async_trait]
impl MatchmakingLogSink for FailingLogSink {
    async fn record_matchmaking_log(&self, _entry: MatchmakingLogEntry) -> Result<()> {
        Err(anyhow::anyhow!("matchmaking log table is read-only"))
    }
}

/// Store where another worker seats a room right after the first room read
///
/// Stands in for a commit that lands between sampling and post-check.
pub struct RacingStore {
    inner: Arc<InMemoryMatchStore>,
    late_room: Mutex<Option<ActiveRoom>>,
}

impl RacingStore {
    pub fn new(inner: Arc<InMemoryMatchStore>, late_room: ActiveRoom) -> Self {
        Self {
            inner,
            late_room: Mutex::new(Some(late_room)),
        }
    }
}

#[async_trait]
impl MatchStore for RacingStore {
    async fn load_queue_entries(&self, game_id: &str, mode: &str) -> Result<Vec<CandidateEntry>> {
        self.inner.load_queue_entries(game_id, mode).await
    }

    async fn load_participant_pool(&self, game_id: &str) -> Result<Vec<CandidateEntry>> {
        self.inner.load_participant_pool(game_id).await
    }

    async fn load_active_rooms(&self, game_id: &str, mode: &str) -> Result<Vec<ActiveRoom>> {
        let rooms = self.inner.load_active_rooms(game_id, mode).await?;
        let late = self
            .late_room
            .lock()
            .map_err(|_| anyhow::anyhow!("racing store lock poisoned"))?
            .take();
        if let Some(room) = late {
            self.inner.add_room(game_id, mode, room)?;
        }
        Ok(rooms)
    }
}

/// Queue candidate who joined `waited_secs` seconds ago
pub fn queued(owner: &str, role: Option<&str>, score: f64, waited_secs: i64) -> CandidateEntry {
    CandidateEntry {
        owner_id: owner.to_string(),
        hero_id: Some(format!("{owner}-hero")),
        hero_name: None,
        role: role.map(str::to_string),
        score,
        source: CandidateOrigin::Queue,
        standin: false,
        match_source: Some(CandidateOrigin::Queue),
        joined_at: Some(current_timestamp() - Duration::seconds(waited_secs)),
        updated_at: None,
    }
}

/// Participant pool entry, usable as a stand-in
pub fn participant(owner: &str, score: f64) -> CandidateEntry {
    CandidateEntry {
        owner_id: owner.to_string(),
        hero_id: Some(format!("{owner}-hero")),
        hero_name: None,
        role: None,
        score,
        source: CandidateOrigin::ParticipantPool,
        standin: false,
        match_source: Some(CandidateOrigin::ParticipantPool),
        joined_at: None,
        updated_at: Some(current_timestamp() - Duration::hours(1)),
    }
}

/// Seat of an active room, occupied when `owner` is given
pub fn seat(role: &str, slot_index: usize, owner: Option<&str>) -> SlotLayoutEntry {
    let mut entry = SlotLayoutEntry::open(role, slot_index);
    if let Some(owner) = owner {
        entry.owner_id = Some(owner.to_string());
        entry.hero_id = Some(format!("{owner}-hero"));
        entry.ready = true;
    }
    entry
}

pub fn room(id: &str, match_code: Option<&str>, idle_secs: i64, slots: Vec<SlotLayoutEntry>) -> ActiveRoom {
    ActiveRoom {
        id: id.to_string(),
        code: format!("{id}-code"),
        match_code: match_code.map(str::to_string),
        updated_at: current_timestamp() - Duration::seconds(idle_secs),
        slots,
    }
}

/// One attacker seat and one defender seat
pub fn two_role_game(rules: GameRules) -> GameDefinition {
    GameDefinition {
        id: GAME_ID.to_string(),
        roles: vec![Role::new("공격", 1), Role::new("수비", 1)],
        rules,
    }
}

pub fn realtime_rules() -> GameRules {
    GameRules {
        realtime_match: true,
        drop_in: false,
    }
}

pub fn drop_in_rules() -> GameRules {
    GameRules {
        realtime_match: true,
        drop_in: true,
    }
}

pub fn request_for(game: &GameDefinition) -> MatchmakingRequest {
    MatchmakingRequest {
        game_id: game.id.clone(),
        mode: MODE.to_string(),
        roles: game.roles.clone(),
        rules: game.rules,
        ..Default::default()
    }
}

/// Store seeded with a game definition
pub fn create_test_store(game: &GameDefinition) -> Arc<InMemoryMatchStore> {
    let store = Arc::new(InMemoryMatchStore::new());
    store.add_game(game.clone()).unwrap();
    store
}

/// Pipeline backed by `store` that records its audit log in a capturing sink
pub fn create_test_pipeline(
    store: Arc<InMemoryMatchStore>,
) -> (MatchmakingPipeline, Arc<CapturingLogSink>) {
    let sink = Arc::new(CapturingLogSink::new());
    let pipeline = MatchmakingPipeline::new(
        store.clone(),
        store.clone(),
        sink.clone(),
        store,
        MatchmakingSettings::default(),
        Arc::new(MetricsCollector::new().unwrap()),
    );
    (pipeline, sink)
}

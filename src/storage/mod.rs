//! Storage collaborator interfaces
//!
//! The engine never talks to a database directly. It reads snapshots through
//! [`MatchStore`], commits through [`CommitGateway`], writes audit entries to a
//! [`MatchmakingLogSink`] and hydrates display data through [`HeroDirectory`].
//! [`InMemoryMatchStore`] implements all four for tests and the CLI.

pub mod memory;

pub use memory::{
    GameDefinition, InMemoryMatchStore, ParticipantRow, QueueRow, QueueStatus, RoomRow, Snapshot,
};

use crate::error::Result;
use crate::types::{ActiveRoom, Assignment, CandidateEntry, GameId, HeroId, HeroSummary};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Snapshot reads the engine needs for one request
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MatchStore: Send + Sync {
    /// Realtime wait-queue for a game mode, oldest first
    async fn load_queue_entries(&self, game_id: &str, mode: &str) -> Result<Vec<CandidateEntry>>;

    /// Recently active participants of a game, usable as fallback or stand-ins
    async fn load_participant_pool(&self, game_id: &str) -> Result<Vec<CandidateEntry>>;

    /// Rooms of a game mode that are still filling or playing
    async fn load_active_rooms(&self, game_id: &str, mode: &str) -> Result<Vec<ActiveRoom>>;
}

/// Proposed assignment handed to the commit gateway
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitRequest {
    pub game_id: GameId,
    pub mode: String,
    pub match_code: String,
    pub assignments: Vec<Assignment>,
}

/// The only writer allowed to mark candidates as matched
///
/// Implementations must apply the whole request as one conditional write and
/// return [`crate::error::MatchmakingError::CommitConflict`] without writing
/// anything when a row was already claimed by another match.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CommitGateway: Send + Sync {
    async fn mark_assignments_matched(&self, request: &CommitRequest) -> Result<()>;
}

/// Pipeline stage an audit entry was written from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogStage {
    DropIn,
    Matching,
    PostCheck,
    Commit,
}

/// One audit entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchmakingLogEntry {
    pub game_id: GameId,
    pub mode: String,
    pub stage: LogStage,
    pub status: String,
    pub match_code: Option<String>,
    pub score_window: Option<f64>,
    pub metadata: serde_json::Value,
    pub recorded_at: DateTime<Utc>,
}

/// Fire-and-forget audit sink; failures never fail a matchmaking request
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MatchmakingLogSink: Send + Sync {
    async fn record_matchmaking_log(&self, entry: MatchmakingLogEntry) -> Result<()>;
}

/// Display data lookup, purely cosmetic
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait HeroDirectory: Send + Sync {
    async fn load_heroes_by_ids(&self, ids: &[HeroId]) -> Result<HashMap<HeroId, HeroSummary>>;
}

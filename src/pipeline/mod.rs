//! Matchmaking pipeline
//!
//! Connects candidate sourcing, assignment, sanitization, readiness and the
//! commit gateway into one request-level operation.

pub mod runner;

pub use runner::{MatchmakingOutcome, MatchmakingPipeline, MatchmakingRequest, MatchmakingStatus};

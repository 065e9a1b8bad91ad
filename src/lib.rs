//! Rank Matchmaker - role-slot matchmaking engine for ranked game modes
//!
//! This crate assigns waiting players and heroes to the role slots of a
//! match. It merges the realtime queue with a participant pool under a
//! stand-in wait policy, fills roles inside score windows, finds drop-in
//! seats in running rooms, removes duplicate or raced occupants before the
//! commit, and reports per-role readiness.

pub mod assignment;
pub mod candidate;
pub mod config;
pub mod dropin;
pub mod error;
pub mod metrics;
pub mod pipeline;
pub mod readiness;
pub mod slots;
pub mod storage;
pub mod summary;
pub mod types;
pub mod utils;

// Re-export commonly used types and traits
pub use error::{MatchmakingError, Result};
pub use types::*;

// Re-export key components
pub use assignment::{post_check_match_assignments, run_matching, sanitize_assignments};
pub use candidate::SampleLoader;
pub use dropin::DropInLocator;
pub use pipeline::{MatchmakingOutcome, MatchmakingPipeline, MatchmakingRequest, MatchmakingStatus};
pub use readiness::{build_role_summary_buckets, compute_role_readiness};
pub use storage::{CommitGateway, InMemoryMatchStore, MatchStore};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

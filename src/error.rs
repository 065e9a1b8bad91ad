//! Error types for the matchmaking engine
//!
//! This module defines all error types using anyhow for consistent error handling
//! throughout the crate. Matchmaking states such as "not enough players yet" are
//! never errors; they are reported through result values.

/// Result type alias for convenience
pub type Result<T> = anyhow::Result<T>;

/// Custom error types for specific matchmaking scenarios
#[derive(Debug, thiserror::Error)]
pub enum MatchmakingError {
    #[error("Invalid candidate row: {reason}")]
    InvalidCandidate { reason: String },

    #[error("Game not found: {game_id}")]
    GameNotFound { game_id: String },

    #[error("Commit conflict for match {match_code}: {reason}")]
    CommitConflict { match_code: String, reason: String },

    #[error("Storage unavailable: {message}")]
    StorageUnavailable { message: String },

    #[error("Configuration error: {message}")]
    ConfigurationError { message: String },

    #[error("Internal engine error: {message}")]
    InternalError { message: String },
}

impl MatchmakingError {
    /// Whether an error chain carries a commit conflict
    pub fn is_commit_conflict(error: &anyhow::Error) -> bool {
        matches!(
            error.downcast_ref::<MatchmakingError>(),
            Some(MatchmakingError::CommitConflict { .. })
        )
    }
}

//! Utility functions for the matchmaking engine

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Generate a new match code shared by every seat of one match
pub fn generate_match_code() -> String {
    let id = Uuid::new_v4().simple().to_string();
    format!("m-{}", &id[..12])
}

/// Get the current UTC timestamp
pub fn current_timestamp() -> DateTime<Utc> {
    Utc::now()
}

/// Seconds elapsed between `since` and `now`, never negative
pub fn elapsed_seconds(since: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    let millis = (now - since).num_milliseconds();
    (millis.max(0) as f64) / 1000.0
}

/// Calculate the absolute difference between two scores
pub fn score_difference(score1: f64, score2: f64) -> f64 {
    (score1 - score2).abs()
}

/// Check if two scores are within the given window
pub fn scores_within_window(score1: f64, score2: f64, window: f64) -> bool {
    score_difference(score1, score2) <= window
}

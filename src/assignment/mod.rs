//! Slot assignment and post-assignment cleanup

pub mod engine;
pub mod sanitizer;

pub use engine::{assignments_from_layout, run_matching, MatchRequest, NO_CANDIDATES_ERROR};
pub use sanitizer::{
    post_check_match_assignments, sanitize_assignments, PostCheckResult, SanitizeOptions,
    SanitizedAssignments,
};

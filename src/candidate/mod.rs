//! Candidate sourcing for the matchmaking engine
//!
//! This module normalizes storage rows into candidates and merges the
//! realtime queue with the participant pool under the stand-in wait policy.

pub mod normalize;
pub mod source;

// Re-export commonly used types
pub use normalize::{normalize_rows, RawCandidateRow};
pub use source::{
    build_sample, open_roles_after_queue, sort_by_waiting_time, CandidateSample, SampleLoader,
    SampleType,
};

//! Readiness evaluation
//!
//! Reduces assignments, layouts or rooms to per-role buckets and the single
//! "ready" flag that gates a commit.

pub mod evaluator;

pub use evaluator::{
    build_role_summary_buckets, compute_role_readiness, ReadinessInput, RoleBucket,
    RoleReadiness,
};

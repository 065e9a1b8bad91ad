//! Metrics for the matchmaking pipeline

pub mod collector;

pub use collector::{MetricsCollector, MetricsTimer};

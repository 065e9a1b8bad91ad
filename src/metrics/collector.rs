//! Metrics collection using Prometheus
//!
//! Counters and histograms for matchmaking runs, registered on a private
//! registry so several pipelines (and tests) can coexist in one process.

use crate::types::RemovedMember;
use anyhow::Result;
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Metrics collector for the matchmaking pipeline
#[derive(Clone)]
pub struct MetricsCollector {
    registry: Arc<Registry>,

    /// Pipeline runs by final status
    runs_total: IntCounterVec,

    /// Participant pool entries injected as stand-ins
    standins_injected_total: IntCounter,

    /// Occupants evicted by sanitize or post-check, by reason
    removed_members_total: IntCounterVec,

    /// Drop-in lookups by outcome (hit, miss, skipped)
    drop_in_total: IntCounterVec,

    /// Wall time of one pipeline run
    pipeline_duration: Histogram,
}

impl MetricsCollector {
    /// Create a new metrics collector with its own registry
    pub fn new() -> Result<Self> {
        Self::with_registry(Arc::new(Registry::new()))
    }

    /// Create a new metrics collector with custom registry
    pub fn with_registry(registry: Arc<Registry>) -> Result<Self> {
        let runs_total = IntCounterVec::new(
            Opts::new("matchmaking_runs_total", "Matchmaking pipeline runs by status"),
            &["status"],
        )?;
        registry.register(Box::new(runs_total.clone()))?;

        let standins_injected_total = IntCounter::new(
            "matchmaking_standins_injected_total",
            "Participant pool entries injected as stand-ins",
        )?;
        registry.register(Box::new(standins_injected_total.clone()))?;

        let removed_members_total = IntCounterVec::new(
            Opts::new(
                "matchmaking_removed_members_total",
                "Occupants removed before commit by reason",
            ),
            &["reason"],
        )?;
        registry.register(Box::new(removed_members_total.clone()))?;

        let drop_in_total = IntCounterVec::new(
            Opts::new("matchmaking_drop_in_total", "Realtime drop-in lookups by outcome"),
            &["outcome"],
        )?;
        registry.register(Box::new(drop_in_total.clone()))?;

        let pipeline_duration = Histogram::with_opts(
            HistogramOpts::new(
                "matchmaking_pipeline_duration_seconds",
                "Time spent in one matchmaking pipeline run",
            )
            .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
        )?;
        registry.register(Box::new(pipeline_duration.clone()))?;

        Ok(Self {
            registry,
            runs_total,
            standins_injected_total,
            removed_members_total,
            drop_in_total,
            pipeline_duration,
        })
    }

    /// Get the Prometheus registry
    pub fn registry(&self) -> Arc<Registry> {
        self.registry.clone()
    }

    /// Record a finished run
    pub fn record_run(&self, status: &str, duration: Duration) {
        self.runs_total.with_label_values(&[status]).inc();
        self.pipeline_duration.observe(duration.as_secs_f64());
    }

    pub fn record_standins(&self, count: usize) {
        self.standins_injected_total.inc_by(count as u64);
    }

    pub fn record_removed_members(&self, removed: &[RemovedMember]) {
        for member in removed {
            self.removed_members_total
                .with_label_values(&[member.reason.as_str()])
                .inc();
        }
    }

    pub fn record_drop_in(&self, outcome: &str) {
        self.drop_in_total.with_label_values(&[outcome]).inc();
    }

    pub fn runs(&self, status: &str) -> u64 {
        self.runs_total.with_label_values(&[status]).get()
    }

    pub fn standins_injected(&self) -> u64 {
        self.standins_injected_total.get()
    }

    pub fn removed_members(&self, reason: &str) -> u64 {
        self.removed_members_total.with_label_values(&[reason]).get()
    }

    /// Render every registered metric in the text exposition format
    pub fn gather_text(&self) -> Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }

    /// Create a timer for measuring operation duration
    pub fn start_timer(&self) -> MetricsTimer {
        MetricsTimer::new()
    }
}

/// Timer for measuring operation durations
pub struct MetricsTimer {
    start: Instant,
}

impl MetricsTimer {
    fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Get the elapsed duration
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Stop the timer and return the duration
    pub fn stop(self) -> Duration {
        self.elapsed()
    }
}

//! Compact summaries embedded in audit-log metadata

use crate::readiness::{RoleBucket, RoleReadiness};
use crate::types::{CandidateEntry, MatchResult};
use crate::utils::elapsed_seconds;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Role label used for candidates without a declared role
pub const ANY_ROLE: &str = "any";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueSummary {
    pub total: usize,
    pub standins: usize,
    pub by_role: BTreeMap<String, usize>,
    pub oldest_wait_seconds: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchSummary {
    pub ready: bool,
    pub total_slots: usize,
    pub filled_slots: usize,
    pub max_window: f64,
    pub standins: usize,
    pub buckets: Vec<RoleBucket>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub fn summarize_queue(entries: &[CandidateEntry], now: DateTime<Utc>) -> QueueSummary {
    let mut by_role = BTreeMap::new();
    for entry in entries {
        let role = entry
            .role
            .as_deref()
            .filter(|role| !role.is_empty())
            .unwrap_or(ANY_ROLE);
        *by_role.entry(role.to_string()).or_insert(0) += 1;
    }

    QueueSummary {
        total: entries.len(),
        standins: entries.iter().filter(|entry| entry.standin).count(),
        by_role,
        oldest_wait_seconds: entries
            .iter()
            .filter_map(CandidateEntry::waiting_since)
            .min()
            .map(|since| elapsed_seconds(since, now)),
    }
}

pub fn summarize_match(result: &MatchResult, readiness: &RoleReadiness) -> MatchSummary {
    let members = result
        .assignments
        .iter()
        .flat_map(|assignment| assignment.members.iter());

    MatchSummary {
        ready: readiness.ready,
        total_slots: result.total_slots,
        filled_slots: result.assignments.iter().map(|a| a.filled_slots()).sum(),
        max_window: result.max_window,
        standins: members.filter(|member| member.standin).count(),
        buckets: readiness.buckets.clone(),
        error: result.error.clone(),
    }
}

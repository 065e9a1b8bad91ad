//! Normalization of loosely shaped candidate rows
//!
//! Storage rows name their fields inconsistently (`owner_id` next to
//! `ownerId`). Everything is folded into [`CandidateEntry`] here so the rest of
//! the engine only sees one shape.

use crate::error::{MatchmakingError, Result};
use crate::types::{CandidateEntry, CandidateOrigin};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// A candidate row as storage hands it over
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawCandidateRow {
    #[serde(default, alias = "ownerId")]
    pub owner_id: Option<String>,
    #[serde(default, alias = "heroId")]
    pub hero_id: Option<String>,
    #[serde(default, alias = "heroName")]
    pub hero_name: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default, alias = "rating")]
    pub score: Option<f64>,
    #[serde(default)]
    pub standin: Option<bool>,
    #[serde(default, alias = "joinedAt")]
    pub joined_at: Option<DateTime<Utc>>,
    #[serde(default, alias = "updatedAt")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl RawCandidateRow {
    /// Convert into a canonical entry drawn from `source`
    pub fn into_candidate(self, source: CandidateOrigin) -> Result<CandidateEntry> {
        let owner_id = self
            .owner_id
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
            .ok_or_else(|| MatchmakingError::InvalidCandidate {
                reason: "row has no owner id".to_string(),
            })?;

        let score = self.score.unwrap_or(0.0);
        if !score.is_finite() {
            return Err(MatchmakingError::InvalidCandidate {
                reason: format!("owner {} has a non-finite score", owner_id),
            }
            .into());
        }

        Ok(CandidateEntry {
            owner_id,
            hero_id: self.hero_id.filter(|id| !id.is_empty()),
            hero_name: self.hero_name,
            role: self.role.filter(|role| !role.is_empty()),
            score,
            source,
            standin: self.standin.unwrap_or(false),
            match_source: Some(source),
            joined_at: self.joined_at,
            updated_at: self.updated_at,
        })
    }
}

/// Normalize a batch of rows, skipping the ones that cannot be used
pub fn normalize_rows(rows: Vec<RawCandidateRow>, source: CandidateOrigin) -> Vec<CandidateEntry> {
    rows.into_iter()
        .filter_map(|row| match row.into_candidate(source) {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!("Skipping {} candidate row: {}", source, e);
                None
            }
        })
        .collect()
}

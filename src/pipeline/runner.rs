//! End-to-end matchmaking runs
//!
//! One run tries a realtime drop-in first, then builds a fresh match from the
//! candidate sample. Only a ready, post-checked proposal reaches the commit
//! gateway. A lost commit race restarts from a fresh snapshot, because the
//! candidate set has changed and the stale proposal cannot be repaired.

use crate::assignment::{
    post_check_match_assignments, run_matching, sanitize_assignments, MatchRequest,
    SanitizeOptions,
};
use crate::candidate::{CandidateSample, SampleLoader};
use crate::config::MatchmakingSettings;
use crate::dropin::{DropInLocator, DropInRequest};
use crate::error::{MatchmakingError, Result};
use crate::metrics::MetricsCollector;
use crate::readiness::{compute_role_readiness, ReadinessInput, RoleReadiness};
use crate::storage::{
    CommitGateway, CommitRequest, HeroDirectory, InMemoryMatchStore, LogStage, MatchStore,
    MatchmakingLogEntry, MatchmakingLogSink,
};
use crate::summary::{summarize_match, summarize_queue};
use crate::types::{
    Assignment, DropInTarget, GameId, GameRules, MatchResult, RemovedMember, Role,
};
use crate::utils::{current_timestamp, generate_match_code};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// One matchmaking request for a game mode
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchmakingRequest {
    pub game_id: GameId,
    pub mode: String,
    pub roles: Vec<Role>,
    #[serde(default)]
    pub rules: GameRules,
    #[serde(default)]
    pub baseline_score: Option<f64>,
    /// Stop before the commit and report the proposal
    #[serde(default)]
    pub dry_run: bool,
}

/// How a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchmakingStatus {
    /// A fresh match was committed
    Matched,
    /// Not enough valid candidates yet
    Pending,
    /// A queued candidate was committed into an active room
    DroppedIn,
    /// Every commit attempt lost a race
    Conflict,
    /// Dry run: ready but not committed
    Proposed,
}

impl MatchmakingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchmakingStatus::Matched => "matched",
            MatchmakingStatus::Pending => "pending",
            MatchmakingStatus::DroppedIn => "dropped_in",
            MatchmakingStatus::Conflict => "conflict",
            MatchmakingStatus::Proposed => "proposed",
        }
    }
}

impl std::fmt::Display for MatchmakingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything a caller needs to report a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchmakingOutcome {
    pub status: MatchmakingStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_code: Option<String>,
    pub result: MatchResult,
    pub readiness: RoleReadiness,
    pub removed_members: Vec<RemovedMember>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample: Option<CandidateSample>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub drop_in: Option<DropInTarget>,
    pub attempts: u32,
}

/// Proposal of one attempt, kept so a final conflict can still be reported
struct Proposal {
    result: MatchResult,
    readiness: RoleReadiness,
    removed_members: Vec<RemovedMember>,
    sample: CandidateSample,
}

/// Wires the engine stages to the storage collaborators
pub struct MatchmakingPipeline {
    store: Arc<dyn MatchStore>,
    gateway: Arc<dyn CommitGateway>,
    log_sink: Arc<dyn MatchmakingLogSink>,
    heroes: Arc<dyn HeroDirectory>,
    sample_loader: SampleLoader,
    drop_in: DropInLocator,
    settings: MatchmakingSettings,
    metrics: Arc<MetricsCollector>,
}

impl MatchmakingPipeline {
    pub fn new(
        store: Arc<dyn MatchStore>,
        gateway: Arc<dyn CommitGateway>,
        log_sink: Arc<dyn MatchmakingLogSink>,
        heroes: Arc<dyn HeroDirectory>,
        settings: MatchmakingSettings,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            sample_loader: SampleLoader::new(store.clone(), settings.wait_threshold()),
            drop_in: DropInLocator::new(store.clone()),
            store,
            gateway,
            log_sink,
            heroes,
            settings,
            metrics,
        }
    }

    /// Pipeline backed entirely by one in-memory store
    pub fn with_in_memory_store(
        store: Arc<InMemoryMatchStore>,
        settings: MatchmakingSettings,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self::new(
            store.clone(),
            store.clone(),
            store.clone(),
            store,
            settings,
            metrics,
        )
    }

    pub fn metrics(&self) -> Arc<MetricsCollector> {
        self.metrics.clone()
    }

    pub fn settings(&self) -> &MatchmakingSettings {
        &self.settings
    }

    /// Run one matchmaking request to a terminal status
    pub async fn run(&self, request: &MatchmakingRequest) -> Result<MatchmakingOutcome> {
        let timer = self.metrics.start_timer();
        let outcome = self.run_stages(request).await;

        match &outcome {
            Ok(outcome) => {
                self.metrics.record_removed_members(&outcome.removed_members);
                if let Some(sample) = &outcome.sample {
                    self.metrics.record_standins(sample.standin_count);
                }
                self.metrics.record_run(outcome.status.as_str(), timer.stop());
                info!(
                    "Matchmaking for {}/{} finished: {} (match code: {:?}, attempts: {})",
                    request.game_id, request.mode, outcome.status, outcome.match_code, outcome.attempts
                );
            }
            Err(e) => {
                self.metrics.record_run("error", timer.stop());
                warn!(
                    "Matchmaking for {}/{} failed: {}",
                    request.game_id, request.mode, e
                );
            }
        }

        outcome
    }

    async fn run_stages(&self, request: &MatchmakingRequest) -> Result<MatchmakingOutcome> {
        let options = SanitizeOptions {
            allow_duplicate_owners: self.settings.allow_duplicate_owners,
        };

        if let Some(outcome) = self.try_drop_in(request, options).await? {
            return Ok(outcome);
        }

        let max_attempts = self.settings.max_commit_attempts.max(1);
        let mut last: Option<Proposal> = None;

        for attempt in 1..=max_attempts {
            let sample = self
                .sample_loader
                .load_sample_source(
                    &request.game_id,
                    &request.mode,
                    request.rules.realtime_match,
                    &request.roles,
                )
                .await?;

            let matched = run_matching(&MatchRequest {
                mode: request.mode.clone(),
                roles: request.roles.clone(),
                layout: None,
                queue: sample.entries.clone(),
                score_windows: self.settings.score_windows.clone(),
                baseline_score: request.baseline_score,
                merge_equal_roles: self.settings.merge_equal_roles,
            });

            let sanitized = sanitize_assignments(&matched.assignments, options);
            let mut removed_members = sanitized.removed_members;
            let (result, readiness) = self.with_readiness(request, matched, sanitized.assignments);

            if !readiness.ready {
                debug!(
                    "Match for {}/{} not ready after matching: {} slot(s) missing",
                    request.game_id,
                    request.mode,
                    readiness.total_missing()
                );
                let proposal = Proposal {
                    result,
                    readiness,
                    removed_members,
                    sample,
                };
                return Ok(self
                    .finish(request, LogStage::Matching, MatchmakingStatus::Pending, None, proposal, attempt)
                    .await);
            }

            let checked = post_check_match_assignments(
                self.store.as_ref(),
                &request.game_id,
                &request.mode,
                &result.assignments,
                options,
            )
            .await?;
            removed_members.extend(checked.removed_members);
            let (mut result, readiness) = self.with_readiness(request, result, checked.assignments);

            if !readiness.ready {
                let proposal = Proposal {
                    result,
                    readiness,
                    removed_members,
                    sample,
                };
                return Ok(self
                    .finish(request, LogStage::PostCheck, MatchmakingStatus::Pending, None, proposal, attempt)
                    .await);
            }

            if request.dry_run {
                let proposal = Proposal {
                    result,
                    readiness,
                    removed_members,
                    sample,
                };
                return Ok(self
                    .finish(request, LogStage::PostCheck, MatchmakingStatus::Proposed, None, proposal, attempt)
                    .await);
            }

            let match_code = generate_match_code();
            let commit = CommitRequest {
                game_id: request.game_id.clone(),
                mode: request.mode.clone(),
                match_code: match_code.clone(),
                assignments: result.assignments.clone(),
            };

            match self.gateway.mark_assignments_matched(&commit).await {
                Ok(()) => {
                    self.hydrate_heroes(&mut result.assignments).await;
                    let proposal = Proposal {
                        result,
                        readiness,
                        removed_members,
                        sample,
                    };
                    return Ok(self
                        .finish(
                            request,
                            LogStage::Commit,
                            MatchmakingStatus::Matched,
                            Some(match_code),
                            proposal,
                            attempt,
                        )
                        .await);
                }
                Err(e) if MatchmakingError::is_commit_conflict(&e) => {
                    warn!(
                        "Commit attempt {} of {} for {}/{} lost a race: {}",
                        attempt, max_attempts, request.game_id, request.mode, e
                    );
                    last = Some(Proposal {
                        result,
                        readiness,
                        removed_members,
                        sample,
                    });
                }
                Err(e) => return Err(e),
            }
        }

        let proposal = last.ok_or_else(|| MatchmakingError::InternalError {
            message: "commit loop ended without a proposal".to_string(),
        })?;
        Ok(self
            .finish(request, LogStage::Commit, MatchmakingStatus::Conflict, None, proposal, max_attempts)
            .await)
    }

    /// Drop-in path; `None` means fall through to regular matching
    async fn try_drop_in(
        &self,
        request: &MatchmakingRequest,
        options: SanitizeOptions,
    ) -> Result<Option<MatchmakingOutcome>> {
        if !request.rules.allows_realtime_drop_in() {
            return Ok(None);
        }

        let queue = self
            .store
            .load_queue_entries(&request.game_id, &request.mode)
            .await?;
        let lookup = DropInRequest {
            game_id: request.game_id.clone(),
            mode: request.mode.clone(),
            roles: request.roles.clone(),
            queue,
            rules: request.rules,
        };

        let Some(target) = self.drop_in.find_realtime_drop_in_target(&lookup).await? else {
            self.metrics.record_drop_in("skipped");
            return Ok(None);
        };
        if !target.is_hit() {
            self.metrics.record_drop_in("miss");
            self.record_log(
                request,
                LogStage::DropIn,
                "miss",
                None,
                None,
                json!({ "candidates": target.meta.candidates, "reason": target.meta.reason }),
            )
            .await;
            return Ok(None);
        }

        let sanitized = sanitize_assignments(&target.assignments, options);
        let checked = post_check_match_assignments(
            self.store.as_ref(),
            &request.game_id,
            &request.mode,
            &sanitized.assignments,
            options,
        )
        .await?;
        let mut removed_members = sanitized.removed_members;
        removed_members.extend(checked.removed_members);

        let placed = target.meta.owner_id.as_deref();
        let survived = checked
            .assignments
            .iter()
            .flat_map(|assignment| assignment.members.iter())
            .any(|member| Some(member.owner_id.as_str()) == placed);
        if !survived {
            debug!(
                "Drop-in candidate {:?} for {}/{} lost the seat during post-check",
                placed, request.game_id, request.mode
            );
            self.metrics.record_drop_in("lost");
            self.metrics.record_removed_members(&removed_members);
            return Ok(None);
        }

        let mut assignments = checked.assignments;
        let readiness = compute_role_readiness(&ReadinessInput {
            roles: &request.roles,
            assignments: &assignments,
            ..Default::default()
        });
        let total_slots = readiness.buckets.iter().map(|bucket| bucket.total).sum();

        let (status, match_code) = if request.dry_run {
            (MatchmakingStatus::Proposed, None)
        } else {
            let match_code = target
                .match_code
                .clone()
                .unwrap_or_else(generate_match_code);
            let commit = CommitRequest {
                game_id: request.game_id.clone(),
                mode: request.mode.clone(),
                match_code: match_code.clone(),
                assignments: assignments.clone(),
            };
            match self.gateway.mark_assignments_matched(&commit).await {
                Ok(()) => {}
                Err(e) if MatchmakingError::is_commit_conflict(&e) => {
                    warn!(
                        "Drop-in commit for {}/{} lost a race, falling back to matching: {}",
                        request.game_id, request.mode, e
                    );
                    self.metrics.record_drop_in("conflict");
                    return Ok(None);
                }
                Err(e) => return Err(e),
            }
            self.hydrate_heroes(&mut assignments).await;
            (MatchmakingStatus::DroppedIn, Some(match_code))
        };
        self.metrics.record_drop_in("hit");

        let result = MatchResult {
            ready: target.ready && readiness.ready,
            assignments,
            total_slots,
            max_window: 0.0,
            error: None,
        };
        self.record_log(
            request,
            LogStage::DropIn,
            status.as_str(),
            match_code.as_deref(),
            None,
            json!({
                "roomCode": target.room_code,
                "role": target.meta.role,
                "slotIndex": target.meta.slot_index,
                "ownerId": target.meta.owner_id,
                "candidates": target.meta.candidates,
                "removedMembers": removed_members.len(),
            }),
        )
        .await;

        Ok(Some(MatchmakingOutcome {
            status,
            match_code,
            result,
            readiness,
            removed_members,
            sample: None,
            drop_in: Some(target),
            attempts: 1,
        }))
    }

    /// Replace the assignments of a result and re-derive readiness from them
    fn with_readiness(
        &self,
        request: &MatchmakingRequest,
        result: MatchResult,
        assignments: Vec<Assignment>,
    ) -> (MatchResult, RoleReadiness) {
        let readiness = compute_role_readiness(&ReadinessInput {
            roles: &request.roles,
            assignments: &assignments,
            ..Default::default()
        });
        let result = MatchResult {
            ready: readiness.ready,
            assignments,
            ..result
        };
        (result, readiness)
    }

    async fn finish(
        &self,
        request: &MatchmakingRequest,
        stage: LogStage,
        status: MatchmakingStatus,
        match_code: Option<String>,
        proposal: Proposal,
        attempts: u32,
    ) -> MatchmakingOutcome {
        let Proposal {
            result,
            readiness,
            removed_members,
            sample,
        } = proposal;

        self.record_log(
            request,
            stage,
            status.as_str(),
            match_code.as_deref(),
            Some(result.max_window),
            json!({
                "sampleType": sample.sample_type,
                "queueWaitSeconds": sample.queue_wait_seconds,
                "queue": summarize_queue(&sample.entries, current_timestamp()),
                "match": summarize_match(&result, &readiness),
                "removedMembers": removed_members,
                "attempts": attempts,
            }),
        )
        .await;

        MatchmakingOutcome {
            status,
            match_code,
            result,
            readiness,
            removed_members,
            sample: Some(sample),
            drop_in: None,
            attempts,
        }
    }

    /// Fill in missing hero names; failures only cost display data
    async fn hydrate_heroes(&self, assignments: &mut [Assignment]) {
        let ids: Vec<String> = assignments
            .iter()
            .flat_map(|assignment| assignment.members.iter())
            .filter(|member| member.hero_name.is_none())
            .filter_map(|member| member.hero_key().map(str::to_string))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        if ids.is_empty() {
            return;
        }

        let heroes = match self.heroes.load_heroes_by_ids(&ids).await {
            Ok(heroes) => heroes,
            Err(e) => {
                warn!("Failed to load hero names for {} hero(es): {}", ids.len(), e);
                return;
            }
        };

        for assignment in assignments.iter_mut() {
            for slot in &mut assignment.role_slots {
                for member in &mut slot.members {
                    if member.hero_name.is_some() {
                        continue;
                    }
                    if let Some(hero) = member.hero_key().and_then(|id| heroes.get(id)) {
                        member.hero_name = Some(hero.name.clone());
                    }
                }
            }
            assignment.refresh_members();
        }
    }

    async fn record_log(
        &self,
        request: &MatchmakingRequest,
        stage: LogStage,
        status: &str,
        match_code: Option<&str>,
        score_window: Option<f64>,
        metadata: serde_json::Value,
    ) {
        let entry = MatchmakingLogEntry {
            game_id: request.game_id.clone(),
            mode: request.mode.clone(),
            stage,
            status: status.to_string(),
            match_code: match_code.map(str::to_string),
            score_window,
            metadata,
            recorded_at: current_timestamp(),
        };
        if let Err(e) = self.log_sink.record_matchmaking_log(entry).await {
            warn!(
                "Failed to record matchmaking log for {}/{}: {}",
                request.game_id, request.mode, e
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MockCommitGateway, MockHeroDirectory, MockMatchmakingLogSink};
    use crate::types::{CandidateEntry, CandidateOrigin, HeroSummary};
    use chrono::Duration;
    use std::collections::HashMap;

    fn queued(owner: &str, age: i64) -> CandidateEntry {
        CandidateEntry {
            owner_id: owner.to_string(),
            hero_id: Some(format!("{owner}-hero")),
            hero_name: None,
            role: None,
            score: 1000.0,
            source: CandidateOrigin::Queue,
            standin: false,
            match_source: Some(CandidateOrigin::Queue),
            joined_at: Some(current_timestamp() - Duration::seconds(age)),
            updated_at: None,
        }
    }

    fn request() -> MatchmakingRequest {
        MatchmakingRequest {
            game_id: "game".to_string(),
            mode: "rank".to_string(),
            roles: vec![Role::new("공격", 1), Role::new("수비", 1)],
            rules: GameRules {
                realtime_match: true,
                drop_in: false,
            },
            ..Default::default()
        }
    }

    fn seeded_store() -> Arc<InMemoryMatchStore> {
        let store = Arc::new(InMemoryMatchStore::new());
        store.enqueue("game", "rank", queued("a", 20)).unwrap();
        store.enqueue("game", "rank", queued("b", 10)).unwrap();
        store
    }

    fn pipeline(
        store: Arc<InMemoryMatchStore>,
        gateway: Arc<dyn CommitGateway>,
        log_sink: Arc<dyn MatchmakingLogSink>,
        heroes: Arc<dyn HeroDirectory>,
    ) -> MatchmakingPipeline {
        MatchmakingPipeline::new(
            store,
            gateway,
            log_sink,
            heroes,
            MatchmakingSettings::default(),
            Arc::new(MetricsCollector::new().unwrap()),
        )
    }

    #[tokio::test]
    async fn test_log_sink_failure_does_not_fail_run() {
        let store = seeded_store();
        let mut sink = MockMatchmakingLogSink::new();
        sink.expect_record_matchmaking_log()
            .returning(|_| Err(anyhow::anyhow!("audit table locked")));

        let pipeline = pipeline(store.clone(), store.clone(), Arc::new(sink), store);
        let outcome = pipeline.run(&request()).await.unwrap();
        assert_eq!(outcome.status, MatchmakingStatus::Matched);
    }

    #[tokio::test]
    async fn test_conflicts_exhaust_attempts() {
        let store = seeded_store();
        let mut gateway = MockCommitGateway::new();
        gateway
            .expect_mark_assignments_matched()
            .times(3)
            .returning(|request| {
                Err(MatchmakingError::CommitConflict {
                    match_code: request.match_code.clone(),
                    reason: "owner already matched".to_string(),
                }
                .into())
            });

        let pipeline = pipeline(store.clone(), Arc::new(gateway), store.clone(), store);
        let outcome = pipeline.run(&request()).await.unwrap();

        assert_eq!(outcome.status, MatchmakingStatus::Conflict);
        assert_eq!(outcome.attempts, 3);
        assert!(outcome.match_code.is_none());
        assert_eq!(pipeline.metrics().runs("conflict"), 1);
    }

    #[tokio::test]
    async fn test_gateway_errors_propagate() {
        let store = seeded_store();
        let mut gateway = MockCommitGateway::new();
        gateway
            .expect_mark_assignments_matched()
            .times(1)
            .returning(|_| {
                Err(MatchmakingError::StorageUnavailable {
                    message: "connection refused".to_string(),
                }
                .into())
            });

        let pipeline = pipeline(store.clone(), Arc::new(gateway), store.clone(), store);
        assert!(pipeline.run(&request()).await.is_err());
        assert_eq!(pipeline.metrics().runs("error"), 1);
    }

    #[tokio::test]
    async fn test_hero_names_are_hydrated() {
        let store = seeded_store();
        let mut heroes = MockHeroDirectory::new();
        heroes.expect_load_heroes_by_ids().returning(|ids| {
            Ok(ids
                .iter()
                .map(|id| {
                    (
                        id.clone(),
                        HeroSummary {
                            id: id.clone(),
                            name: format!("name of {id}"),
                            image_url: None,
                        },
                    )
                })
                .collect::<HashMap<_, _>>())
        });

        let pipeline = pipeline(store.clone(), store.clone(), store, Arc::new(heroes));
        let outcome = pipeline.run(&request()).await.unwrap();
        let member = &outcome.result.assignments[0].members[0];
        assert_eq!(member.hero_name.as_deref(), Some("name of a-hero"));
    }

    #[tokio::test]
    async fn test_hero_lookup_failure_is_cosmetic() {
        let store = seeded_store();
        let mut heroes = MockHeroDirectory::new();
        heroes
            .expect_load_heroes_by_ids()
            .returning(|_| Err(anyhow::anyhow!("hero service down")));

        let pipeline = pipeline(store.clone(), store.clone(), store, Arc::new(heroes));
        let outcome = pipeline.run(&request()).await.unwrap();
        assert_eq!(outcome.status, MatchmakingStatus::Matched);
        assert!(outcome.result.assignments[0].members[0].hero_name.is_none());
    }

    #[tokio::test]
    async fn test_dry_run_does_not_commit() {
        let store = seeded_store();
        let pipeline = MatchmakingPipeline::with_in_memory_store(
            store.clone(),
            MatchmakingSettings::default(),
            Arc::new(MetricsCollector::new().unwrap()),
        );
        let mut req = request();
        req.dry_run = true;

        let outcome = pipeline.run(&req).await.unwrap();
        assert_eq!(outcome.status, MatchmakingStatus::Proposed);
        assert!(outcome.result.ready);
        assert!(store.commits().unwrap().is_empty());
    }
}

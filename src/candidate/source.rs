//! Candidate sample loading
//!
//! Merges the realtime wait-queue with the participant pool into one ordered
//! sample. Real queued players get [`SampleLoader::wait_threshold`] to fill a
//! match on their own; once the oldest one has waited that long, participant
//! pool entries are injected as stand-ins for the seats the queue cannot fill.

use crate::error::Result;
use crate::slots::RoleSlotModel;
use crate::storage::MatchStore;
use crate::types::{ActiveRoom, CandidateEntry, CandidateOrigin, Role};
use crate::utils::{current_timestamp, elapsed_seconds};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// How the sample was put together
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleType {
    /// Realtime queue was empty, the participant pool is used instead
    RealtimeQueueFallbackPool,
    /// Participant pool was empty, the queue is used on its own
    ParticipantPoolFallbackQueue,
    /// Queue players are still inside their grace period
    RealtimeQueueWaiting,
    /// Queue players waited too long; stand-ins fill the rest
    RealtimeQueueWithStandins,
    /// Non-realtime games match straight from the participant pool
    ParticipantPool,
}

impl SampleType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SampleType::RealtimeQueueFallbackPool => "realtime_queue_fallback_pool",
            SampleType::ParticipantPoolFallbackQueue => "participant_pool_fallback_queue",
            SampleType::RealtimeQueueWaiting => "realtime_queue_waiting",
            SampleType::RealtimeQueueWithStandins => "realtime_queue_with_standins",
            SampleType::ParticipantPool => "participant_pool",
        }
    }
}

impl std::fmt::Display for SampleType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered candidates for one matchmaking request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateSample {
    pub entries: Vec<CandidateEntry>,
    pub sample_type: SampleType,
    pub standin_count: usize,
    pub queue_wait_seconds: Option<f64>,
}

/// Loads candidate samples from a [`MatchStore`]
pub struct SampleLoader {
    store: Arc<dyn MatchStore>,
    wait_threshold: Duration,
}

impl SampleLoader {
    pub fn new(store: Arc<dyn MatchStore>, wait_threshold: Duration) -> Self {
        Self {
            store,
            wait_threshold,
        }
    }

    pub fn wait_threshold(&self) -> Duration {
        self.wait_threshold
    }

    /// Load the sample for a game mode using the current time
    pub async fn load_sample_source(
        &self,
        game_id: &str,
        mode: &str,
        realtime_enabled: bool,
        roles: &[Role],
    ) -> Result<CandidateSample> {
        self.load_sample_source_at(current_timestamp(), game_id, mode, realtime_enabled, roles)
            .await
    }

    /// Load the sample as of `now`
    ///
    /// Owners and heroes already seated in an active room of the mode are
    /// left out of both the queue and the pool.
    pub async fn load_sample_source_at(
        &self,
        now: DateTime<Utc>,
        game_id: &str,
        mode: &str,
        realtime_enabled: bool,
        roles: &[Role],
    ) -> Result<CandidateSample> {
        let queue = self.store.load_queue_entries(game_id, mode).await?;
        let pool = self.store.load_participant_pool(game_id).await?;
        let rooms = self.store.load_active_rooms(game_id, mode).await?;

        let queue = without_seated(queue, &rooms);
        let pool = without_seated(pool, &rooms);

        let sample = build_sample(queue, pool, realtime_enabled, roles, self.wait_threshold, now);

        debug!(
            "Loaded candidate sample for {}/{} - type: {}, entries: {}, standins: {}, wait: {:?}",
            game_id,
            mode,
            sample.sample_type,
            sample.entries.len(),
            sample.standin_count,
            sample.queue_wait_seconds
        );

        Ok(sample)
    }
}

/// Stable ordering by waiting time; entries without a timestamp go last
pub fn sort_by_waiting_time(entries: &mut [CandidateEntry]) {
    entries.sort_by_key(|entry| {
        let since = entry.waiting_since();
        (since.is_none(), since)
    });
}

/// Build a sample from already loaded queue and pool snapshots
pub fn build_sample(
    queue: Vec<CandidateEntry>,
    pool: Vec<CandidateEntry>,
    realtime_enabled: bool,
    roles: &[Role],
    wait_threshold: Duration,
    now: DateTime<Utc>,
) -> CandidateSample {
    let mut queue: Vec<CandidateEntry> = queue
        .into_iter()
        .map(|entry| tag_entry(entry, CandidateOrigin::Queue, false))
        .collect();
    sort_by_waiting_time(&mut queue);

    let pool: Vec<CandidateEntry> = pool
        .into_iter()
        .map(|entry| tag_entry(entry, CandidateOrigin::ParticipantPool, false))
        .collect();

    let queue_wait_seconds = oldest_wait_seconds(&queue, now);

    if !realtime_enabled {
        if pool.is_empty() {
            return CandidateSample {
                entries: queue,
                sample_type: SampleType::ParticipantPoolFallbackQueue,
                standin_count: 0,
                queue_wait_seconds,
            };
        }
        return CandidateSample {
            entries: pool,
            sample_type: SampleType::ParticipantPool,
            standin_count: 0,
            queue_wait_seconds,
        };
    }

    if queue.is_empty() {
        return CandidateSample {
            entries: pool,
            sample_type: SampleType::RealtimeQueueFallbackPool,
            standin_count: 0,
            queue_wait_seconds: None,
        };
    }

    if pool.is_empty() {
        return CandidateSample {
            entries: queue,
            sample_type: SampleType::ParticipantPoolFallbackQueue,
            standin_count: 0,
            queue_wait_seconds,
        };
    }

    let threshold = wait_threshold.as_secs_f64();
    let still_waiting = queue_wait_seconds.map_or(true, |wait| wait < threshold);
    if still_waiting {
        return CandidateSample {
            entries: queue,
            sample_type: SampleType::RealtimeQueueWaiting,
            standin_count: 0,
            queue_wait_seconds,
        };
    }

    let open = open_roles_after_queue(&queue, roles);
    let standins = pick_standins(&queue, pool, &open);
    let standin_count = standins.len();

    let mut entries = queue;
    entries.extend(standins);

    CandidateSample {
        entries,
        sample_type: SampleType::RealtimeQueueWithStandins,
        standin_count,
        queue_wait_seconds,
    }
}

/// Role of every seat the queue alone leaves empty, in declaration order
///
/// Queue entries are placed oldest first into roles they accept, each owner
/// and hero at most once. Score windows are not applied here.
pub fn open_roles_after_queue(queue: &[CandidateEntry], roles: &[Role]) -> Vec<String> {
    let mut owners: HashSet<&str> = HashSet::new();
    let mut heroes: HashSet<&str> = HashSet::new();
    let mut open = Vec::new();

    for plan in RoleSlotModel::new(roles.to_vec()).role_plans() {
        let mut seats = plan.open_slots().count();
        for entry in queue {
            if seats == 0 {
                break;
            }
            if !entry.accepts_role(&plan.role) || owners.contains(entry.owner_id.as_str()) {
                continue;
            }
            if let Some(hero) = entry.hero_key() {
                if !heroes.insert(hero) {
                    continue;
                }
            }
            owners.insert(entry.owner_id.as_str());
            seats -= 1;
        }
        open.extend(std::iter::repeat(plan.role.clone()).take(seats));
    }
    open
}

fn tag_entry(mut entry: CandidateEntry, source: CandidateOrigin, standin: bool) -> CandidateEntry {
    entry.source = source;
    entry.match_source = Some(source);
    entry.standin = standin;
    entry
}

fn oldest_wait_seconds(queue: &[CandidateEntry], now: DateTime<Utc>) -> Option<f64> {
    queue
        .iter()
        .filter_map(CandidateEntry::waiting_since)
        .min()
        .map(|oldest| elapsed_seconds(oldest, now))
}

fn without_seated(entries: Vec<CandidateEntry>, rooms: &[ActiveRoom]) -> Vec<CandidateEntry> {
    if rooms.is_empty() {
        return entries;
    }
    entries
        .into_iter()
        .filter(|entry| {
            let seated = rooms.iter().any(|room| {
                room.seats_owner(&entry.owner_id)
                    || entry.hero_key().is_some_and(|hero| room.seats_hero(hero))
            });
            if seated {
                debug!("Skipping {}: already seated in an active room", entry.owner_id);
            }
            !seated
        })
        .collect()
}

/// One pool entry per open role, skipping queued or already picked owners/heroes
///
/// An entry declaring the role is preferred over an any-role entry. The
/// picked entries keep their pool order.
fn pick_standins(
    queue: &[CandidateEntry],
    pool: Vec<CandidateEntry>,
    open: &[String],
) -> Vec<CandidateEntry> {
    if open.is_empty() {
        return Vec::new();
    }

    let mut owners: HashSet<&str> = queue.iter().map(|e| e.owner_id.as_str()).collect();
    let mut heroes: HashSet<&str> = queue.iter().filter_map(CandidateEntry::hero_key).collect();
    let mut picked: Vec<usize> = Vec::with_capacity(open.len());

    for role in open {
        let free = |entry: &CandidateEntry| {
            !owners.contains(entry.owner_id.as_str())
                && entry.hero_key().map_or(true, |hero| !heroes.contains(hero))
        };
        let found = pool
            .iter()
            .position(|e| e.role.as_deref() == Some(role.as_str()) && free(e))
            .or_else(|| pool.iter().position(|e| e.accepts_role(role) && free(e)));

        if let Some(index) = found {
            let entry = &pool[index];
            owners.insert(entry.owner_id.as_str());
            if let Some(hero) = entry.hero_key() {
                heroes.insert(hero);
            }
            picked.push(index);
        }
    }
    picked.sort_unstable();

    pool.into_iter()
        .enumerate()
        .filter(|(index, _)| picked.binary_search(index).is_ok())
        .map(|(_, entry)| tag_entry(entry, CandidateOrigin::ParticipantPool, true))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MockMatchStore;
    use crate::types::SlotLayoutEntry;
    use chrono::Duration as ChronoDuration;

    fn candidate(owner: &str, hero: &str, joined_at: Option<DateTime<Utc>>) -> CandidateEntry {
        CandidateEntry {
            owner_id: owner.to_string(),
            hero_id: Some(hero.to_string()),
            hero_name: None,
            role: None,
            score: 1000.0,
            source: CandidateOrigin::Queue,
            standin: false,
            match_source: None,
            joined_at,
            updated_at: None,
        }
    }

    fn declaring(owner: &str, role: &str, joined_at: Option<DateTime<Utc>>) -> CandidateEntry {
        CandidateEntry {
            role: Some(role.to_string()),
            ..candidate(owner, &format!("{owner}-hero"), joined_at)
        }
    }

    /// `seats` interchangeable seats of a single role
    fn seats(count: usize) -> Vec<Role> {
        vec![Role::new("공격", count)]
    }

    fn attack_and_defence() -> Vec<Role> {
        vec![Role::new("공격", 1), Role::new("수비", 1)]
    }

    const THRESHOLD: Duration = Duration::from_secs(30);

    #[test]
    fn test_empty_queue_falls_back_to_pool() {
        let now = current_timestamp();
        let pool = vec![candidate("creator", "hero-1", None)];

        let sample = build_sample(Vec::new(), pool, true, &seats(2), THRESHOLD, now);
        assert_eq!(sample.sample_type, SampleType::RealtimeQueueFallbackPool);
        assert_eq!(sample.entries.len(), 1);
        assert_eq!(sample.standin_count, 0);
        assert!(sample.queue_wait_seconds.is_none());
    }

    #[test]
    fn test_recent_queue_waits_for_real_players() {
        let now = current_timestamp();
        let queue = vec![candidate(
            "queued",
            "hero-q",
            Some(now - ChronoDuration::seconds(5)),
        )];
        let pool = vec![candidate("pool", "hero-p", None)];

        let sample = build_sample(queue, pool, true, &seats(2), THRESHOLD, now);
        assert_eq!(sample.sample_type, SampleType::RealtimeQueueWaiting);
        assert_eq!(sample.entries.len(), 1);
        assert_eq!(sample.standin_count, 0);
        let wait = sample.queue_wait_seconds.unwrap();
        assert!((0.0..30.0).contains(&wait));
    }

    #[test]
    fn test_standins_allowed_at_exact_threshold() {
        let now = current_timestamp();
        let queue = vec![candidate(
            "queued",
            "hero-q",
            Some(now - ChronoDuration::seconds(30)),
        )];
        let pool = vec![candidate("pool", "hero-p", None)];

        let sample = build_sample(queue.clone(), pool.clone(), true, &seats(2), THRESHOLD, now);
        assert_eq!(sample.queue_wait_seconds, Some(30.0));
        assert_eq!(sample.sample_type, SampleType::RealtimeQueueWithStandins);
        assert_eq!(sample.standin_count, 1);

        let just_before = now - ChronoDuration::milliseconds(1);
        let sample = build_sample(queue, pool, true, &seats(2), THRESHOLD, just_before);
        assert_eq!(sample.sample_type, SampleType::RealtimeQueueWaiting);
        assert_eq!(sample.standin_count, 0);
    }

    #[test]
    fn test_long_wait_injects_standins() {
        let now = current_timestamp();
        let queue = vec![candidate(
            "queued",
            "hero-q",
            Some(now - ChronoDuration::seconds(120)),
        )];
        let pool = vec![candidate("pool", "hero-p", None)];

        let sample = build_sample(queue, pool, true, &seats(2), THRESHOLD, now);
        assert_eq!(sample.sample_type, SampleType::RealtimeQueueWithStandins);
        assert_eq!(sample.entries.len(), 2);
        assert_eq!(sample.standin_count, 1);

        let standin = &sample.entries[1];
        assert!(standin.standin);
        assert_eq!(standin.source, CandidateOrigin::ParticipantPool);
        assert_eq!(standin.match_source, Some(CandidateOrigin::ParticipantPool));
        assert_eq!(sample.entries[0].match_source, Some(CandidateOrigin::Queue));
    }

    #[test]
    fn test_standins_capped_at_missing_seats() {
        let now = current_timestamp();
        let queue = vec![candidate(
            "queued",
            "hero-q",
            Some(now - ChronoDuration::seconds(60)),
        )];
        let pool = (0..5)
            .map(|i| candidate(&format!("pool-{i}"), &format!("hero-{i}"), None))
            .collect();

        let sample = build_sample(queue, pool, true, &seats(3), THRESHOLD, now);
        assert_eq!(sample.standin_count, 2);
        assert_eq!(sample.entries.len(), 3);
    }

    #[test]
    fn test_queue_rows_competing_for_one_role_leave_the_other_open() {
        let now = current_timestamp();
        let queue = vec![
            declaring("q1", "공격", Some(now - ChronoDuration::seconds(120))),
            declaring("q2", "공격", Some(now - ChronoDuration::seconds(100))),
        ];
        let pool = vec![candidate("p1", "p1-hero", None)];

        assert_eq!(open_roles_after_queue(&queue, &attack_and_defence()), vec!["수비"]);

        let sample = build_sample(queue, pool, true, &attack_and_defence(), THRESHOLD, now);
        assert_eq!(sample.sample_type, SampleType::RealtimeQueueWithStandins);
        assert_eq!(sample.standin_count, 1);
        assert_eq!(sample.entries[2].owner_id, "p1");
        assert!(sample.entries[2].standin);
    }

    #[test]
    fn test_standins_must_accept_the_open_role() {
        let now = current_timestamp();
        let queue = vec![declaring("q1", "공격", Some(now - ChronoDuration::seconds(60)))];
        let pool = vec![
            declaring("attacker", "공격", None),
            candidate("flexible", "flex-hero", None),
            declaring("defender", "수비", None),
        ];

        let sample = build_sample(queue, pool, true, &attack_and_defence(), THRESHOLD, now);
        assert_eq!(sample.standin_count, 1);
        assert_eq!(sample.entries[1].owner_id, "defender");
    }

    #[test]
    fn test_standins_skip_queued_owners_and_heroes() {
        let now = current_timestamp();
        let queue = vec![candidate(
            "queued",
            "hero-q",
            Some(now - ChronoDuration::seconds(60)),
        )];
        let pool = vec![
            candidate("queued", "hero-x", None),
            candidate("other", "hero-q", None),
            candidate("fresh", "hero-f", None),
        ];

        let sample = build_sample(queue, pool, true, &seats(4), THRESHOLD, now);
        assert_eq!(sample.standin_count, 1);
        assert_eq!(sample.entries[1].owner_id, "fresh");
    }

    #[test]
    fn test_full_queue_needs_no_standins() {
        let now = current_timestamp();
        let queue = vec![
            candidate("a", "h-a", Some(now - ChronoDuration::seconds(90))),
            candidate("b", "h-b", Some(now - ChronoDuration::seconds(80))),
        ];
        let pool = vec![candidate("pool", "hero-p", None)];

        let sample = build_sample(queue, pool, true, &seats(2), THRESHOLD, now);
        assert_eq!(sample.sample_type, SampleType::RealtimeQueueWithStandins);
        assert_eq!(sample.standin_count, 0);
        assert_eq!(sample.entries.len(), 2);
    }

    #[test]
    fn test_queue_sorted_by_join_time() {
        let now = current_timestamp();
        let queue = vec![
            candidate("late", "h1", Some(now - ChronoDuration::seconds(1))),
            candidate("untimed", "h3", None),
            candidate("early", "h2", Some(now - ChronoDuration::seconds(10))),
        ];

        let sample = build_sample(queue, Vec::new(), true, &seats(3), THRESHOLD, now);
        let owners: Vec<_> = sample.entries.iter().map(|e| e.owner_id.as_str()).collect();
        assert_eq!(owners, vec!["early", "late", "untimed"]);
        assert_eq!(sample.sample_type, SampleType::ParticipantPoolFallbackQueue);
    }

    #[test]
    fn test_non_realtime_uses_pool() {
        let now = current_timestamp();
        let queue = vec![candidate("queued", "hero-q", Some(now))];
        let pool = vec![candidate("pool", "hero-p", None)];

        let sample = build_sample(queue.clone(), pool, false, &seats(2), THRESHOLD, now);
        assert_eq!(sample.sample_type, SampleType::ParticipantPool);
        assert_eq!(sample.entries[0].owner_id, "pool");

        let sample = build_sample(queue, Vec::new(), false, &seats(2), THRESHOLD, now);
        assert_eq!(sample.sample_type, SampleType::ParticipantPoolFallbackQueue);
    }

    #[tokio::test]
    async fn test_loader_reads_both_pools() {
        let now = current_timestamp();
        let joined = now - ChronoDuration::seconds(45);

        let mut store = MockMatchStore::new();
        store
            .expect_load_queue_entries()
            .returning(move |_, _| Ok(vec![candidate("queued", "hero-q", Some(joined))]));
        store
            .expect_load_participant_pool()
            .returning(|_| Ok(vec![candidate("pool", "hero-p", None)]));
        store.expect_load_active_rooms().returning(|_, _| Ok(Vec::new()));

        let loader = SampleLoader::new(Arc::new(store), THRESHOLD);
        let sample = loader
            .load_sample_source_at(now, "game", "rank", true, &seats(2))
            .await
            .unwrap();
        assert_eq!(sample.sample_type, SampleType::RealtimeQueueWithStandins);
        assert_eq!(sample.standin_count, 1);
        assert_eq!(sample.queue_wait_seconds, Some(45.0));
    }

    #[tokio::test]
    async fn test_loader_leaves_out_seated_owners_and_heroes() {
        let now = current_timestamp();

        let mut store = MockMatchStore::new();
        store.expect_load_queue_entries().returning(|_, _| Ok(Vec::new()));
        store.expect_load_participant_pool().returning(|_| {
            Ok(vec![
                candidate("seated", "hero-s", None),
                candidate("hero-taken", "hero-r", None),
                candidate("free", "hero-f", None),
            ])
        });
        store.expect_load_active_rooms().returning(move |_, _| {
            let mut by_owner = SlotLayoutEntry::open("공격", 0);
            by_owner.owner_id = Some("seated".to_string());
            let mut by_hero = SlotLayoutEntry::open("수비", 0);
            by_hero.owner_id = Some("someone".to_string());
            by_hero.hero_id = Some("hero-r".to_string());
            Ok(vec![ActiveRoom {
                id: "room-1".to_string(),
                code: "room-1".to_string(),
                match_code: Some("room-1".to_string()),
                updated_at: now,
                slots: vec![by_owner, by_hero],
            }])
        });

        let loader = SampleLoader::new(Arc::new(store), THRESHOLD);
        let sample = loader
            .load_sample_source_at(now, "game", "rank", true, &seats(2))
            .await
            .unwrap();
        let owners: Vec<_> = sample.entries.iter().map(|e| e.owner_id.as_str()).collect();
        assert_eq!(owners, vec!["free"]);
    }

    #[tokio::test]
    async fn test_loader_propagates_storage_errors() {
        let mut store = MockMatchStore::new();
        store
            .expect_load_queue_entries()
            .returning(|_, _| Err(anyhow::anyhow!("queue table unavailable")));

        let loader = SampleLoader::new(Arc::new(store), THRESHOLD);
        let result = loader.load_sample_source("game", "rank", true, &seats(2)).await;
        assert!(result.is_err());
    }
}

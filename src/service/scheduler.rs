//! Scheduling engine: due selection, in-flight exclusion, the concurrency
//! cap, time-exact timers and the rescheduling policy.
//!
//! # Concurrency
//!
//! - At most one job per AOI holds an [`InFlightGuard`] at any time. The
//!   guard is released on drop, so every exit path of a job (success,
//!   failure, timeout, panic unwinding) frees the AOI.
//! - At most `max_concurrent_jobs` jobs hold a [`JobSlot`] at any time.
//!   Sweep candidates that find no free slot are left for the next cycle.
//! - Sweep and timer producers are independent; the in-flight registry is
//!   what keeps them from running one AOI twice concurrently.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::AbortHandle;

use crate::config::SchedulerConfig;
use crate::domain::{AoiId, DueAoi, JobOutcome, MonitoringFrequency, ScheduledJob};
use crate::error::MonitorError;
use crate::persistence::Persistence;

/// Upper bound on rows fetched by one due-selection query.
const SWEEP_BATCH_LIMIT: usize = 1_000;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Next-run time after an execution that started at `executed_at`.
///
/// Returns `None` for [`MonitoringFrequency::Once`], which disables the
/// schedule after a single attempt.
#[must_use]
pub fn next_run_after(
    frequency: MonitoringFrequency,
    executed_at: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    frequency.interval().map(|interval| executed_at + interval)
}

/// Effect of a reschedule call on the stored schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleChange {
    /// Nothing written (skipped job, or monitoring already disabled).
    Unchanged,
    /// `next_run_at` moved to the given time.
    Advanced(DateTime<Utc>),
    /// Frequency and next-run time were both cleared.
    Disabled,
}

impl ScheduleChange {
    /// The stored next-run time after the change, if one was written.
    #[must_use]
    pub const fn next_run_at(self) -> Option<DateTime<Utc>> {
        match self {
            Self::Advanced(at) => Some(at),
            Self::Unchanged | Self::Disabled => None,
        }
    }
}

/// Registry of AOIs with a job currently executing.
///
/// Each claim is stamped with a generation so that a guard outliving a
/// [`InFlightRegistry::clear`] cannot release a newer claim on the same
/// AOI.
#[derive(Debug, Default)]
pub struct InFlightRegistry {
    held: Mutex<HashMap<AoiId, u64>>,
    generation: AtomicU64,
}

impl InFlightRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims the marker for `aoi_id`, or returns `None` if it is held.
    #[must_use]
    pub fn try_acquire(self: &Arc<Self>, aoi_id: AoiId) -> Option<InFlightGuard> {
        let mut held = lock(&self.held);
        if held.contains_key(&aoi_id) {
            return None;
        }
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        held.insert(aoi_id, generation);
        Some(InFlightGuard {
            registry: Arc::clone(self),
            aoi_id,
            generation,
        })
    }

    /// Whether a job for `aoi_id` is executing.
    #[must_use]
    pub fn is_held(&self, aoi_id: AoiId) -> bool {
        lock(&self.held).contains_key(&aoi_id)
    }

    /// Number of held markers.
    #[must_use]
    pub fn len(&self) -> usize {
        lock(&self.held).len()
    }

    /// Whether no marker is held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        lock(&self.held).is_empty()
    }

    /// Releases every marker, returning how many were held.
    pub fn clear(&self) -> usize {
        let mut held = lock(&self.held);
        let count = held.len();
        held.clear();
        count
    }

    fn release(&self, aoi_id: AoiId, generation: u64) {
        let mut held = lock(&self.held);
        if held.get(&aoi_id) == Some(&generation) {
            held.remove(&aoi_id);
        }
    }
}

/// Exclusive in-flight marker for one AOI. Released on drop.
#[derive(Debug)]
pub struct InFlightGuard {
    registry: Arc<InFlightRegistry>,
    aoi_id: AoiId,
    generation: u64,
}

impl InFlightGuard {
    /// AOI this guard protects.
    #[must_use]
    pub const fn aoi_id(&self) -> AoiId {
        self.aoi_id
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.registry.release(self.aoi_id, self.generation);
    }
}

/// One unit of the global concurrency cap. Released on drop.
#[derive(Debug)]
pub struct JobSlot {
    _permit: OwnedSemaphorePermit,
}

#[derive(Debug)]
struct PendingTimer {
    job: ScheduledJob,
    token: u64,
    handle: AbortHandle,
}

/// Owns the notion of "due" and the bookkeeping around dispatch.
#[derive(Debug)]
pub struct SchedulingEngine {
    store: Arc<dyn Persistence>,
    config: SchedulerConfig,
    in_flight: Arc<InFlightRegistry>,
    slots: Arc<Semaphore>,
    timers: Mutex<HashMap<AoiId, PendingTimer>>,
    timer_tokens: AtomicU64,
}

impl SchedulingEngine {
    /// Creates an engine with `config.max_concurrent_jobs` slots.
    #[must_use]
    pub fn new(store: Arc<dyn Persistence>, config: SchedulerConfig) -> Self {
        let capacity = config.max_concurrent_jobs.max(1);
        Self {
            store,
            config,
            in_flight: Arc::new(InFlightRegistry::new()),
            slots: Arc::new(Semaphore::new(capacity)),
            timers: Mutex::new(HashMap::new()),
            timer_tokens: AtomicU64::new(1),
        }
    }

    /// Engine configuration.
    #[must_use]
    pub const fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Bulk due-selection against the store, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`MonitorError::PersistenceError`] if the store cannot be
    /// queried.
    pub async fn due_aois(&self, now: DateTime<Utc>) -> Result<Vec<DueAoi>, MonitorError> {
        self.store.due_aois(now, SWEEP_BATCH_LIMIT).await
    }

    /// Claims the in-flight marker for `aoi_id`.
    #[must_use]
    pub fn try_claim(&self, aoi_id: AoiId) -> Option<InFlightGuard> {
        self.in_flight.try_acquire(aoi_id)
    }

    /// Whether a job for `aoi_id` is executing.
    #[must_use]
    pub fn is_in_flight(&self, aoi_id: AoiId) -> bool {
        self.in_flight.is_held(aoi_id)
    }

    /// Number of executing jobs.
    #[must_use]
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    /// Releases every in-flight marker.
    pub fn release_all(&self) -> usize {
        self.in_flight.clear()
    }

    /// Takes a concurrency slot if one is free.
    #[must_use]
    pub fn try_reserve_slot(&self) -> Option<JobSlot> {
        Arc::clone(&self.slots)
            .try_acquire_owned()
            .ok()
            .map(|permit| JobSlot { _permit: permit })
    }

    /// Waits for a concurrency slot.
    ///
    /// # Errors
    ///
    /// Returns [`MonitorError::NotRunning`] if the slot pool was closed.
    pub async fn reserve_slot(&self) -> Result<JobSlot, MonitorError> {
        Arc::clone(&self.slots)
            .acquire_owned()
            .await
            .map(|permit| JobSlot { _permit: permit })
            .map_err(|_| MonitorError::NotRunning)
    }

    /// Free concurrency slots.
    #[must_use]
    pub fn available_slots(&self) -> usize {
        self.slots.available_permits()
    }

    /// Resolves once every concurrency slot is free, i.e. no job holds one.
    pub async fn drained(&self) {
        let capacity = u32::try_from(self.config.max_concurrent_jobs.max(1)).unwrap_or(u32::MAX);
        if let Ok(all) = self.slots.acquire_many(capacity).await {
            drop(all);
        }
    }

    /// Applies the rescheduling policy after a job that started at
    /// `executed_at` against a stored `next_run_at` of `admitted`.
    ///
    /// Success and failure both advance `next_run_at` by the frequency
    /// interval; a `once` schedule is disabled. Skipped jobs leave the
    /// schedule untouched. The write only happens while `next_run_at` still
    /// equals `admitted`, so a schedule set while the job ran is kept.
    ///
    /// # Errors
    ///
    /// Returns [`MonitorError::PersistenceError`] if the schedule cannot be
    /// written.
    pub async fn reschedule(
        &self,
        aoi_id: AoiId,
        outcome: &JobOutcome,
        executed_at: DateTime<Utc>,
        admitted: Option<DateTime<Utc>>,
    ) -> Result<ScheduleChange, MonitorError> {
        if !outcome.advances_schedule() {
            return Ok(ScheduleChange::Unchanged);
        }
        let Some(aoi) = self.store.load_aoi(aoi_id).await? else {
            return Ok(ScheduleChange::Unchanged);
        };
        let Some(frequency) = aoi.monitoring_frequency else {
            return Ok(ScheduleChange::Unchanged);
        };

        let next = next_run_after(frequency, executed_at);
        let written = self
            .store
            .advance_schedule(
                aoi_id,
                (Some(frequency), admitted),
                next.map(|_| frequency),
                next,
            )
            .await?;
        if !written {
            tracing::debug!(%aoi_id, "schedule changed while the job ran, keeping it");
            return Ok(ScheduleChange::Unchanged);
        }
        let change = next.map_or(ScheduleChange::Disabled, ScheduleChange::Advanced);
        tracing::debug!(%aoi_id, outcome = outcome.label(), ?change, "schedule updated");
        Ok(change)
    }

    /// Allocates the token a timer task reports back through
    /// [`SchedulingEngine::timer_fired`].
    #[must_use]
    pub fn next_timer_token(&self) -> u64 {
        self.timer_tokens.fetch_add(1, Ordering::Relaxed)
    }

    /// Records a timer task armed for `aoi_id`, aborting any previous one.
    pub fn register_timer(
        &self,
        aoi_id: AoiId,
        due_at: DateTime<Utc>,
        token: u64,
        handle: AbortHandle,
    ) -> ScheduledJob {
        let mut timers = lock(&self.timers);
        let attempt = match timers.remove(&aoi_id) {
            Some(previous) => {
                previous.handle.abort();
                previous.job.attempt + 1
            }
            None => 1,
        };
        let job = ScheduledJob {
            aoi_id,
            due_at,
            attempt,
            in_flight: self.is_in_flight(aoi_id),
        };
        timers.insert(aoi_id, PendingTimer { job, token, handle });
        job
    }

    /// Removes the entry of a fired timer. An entry re-armed since (with a
    /// different token) is kept.
    pub fn timer_fired(&self, aoi_id: AoiId, token: u64) {
        let mut timers = lock(&self.timers);
        if timers.get(&aoi_id).is_some_and(|t| t.token == token) {
            timers.remove(&aoi_id);
        }
    }

    /// Aborts the pending timer of `aoi_id`. Returns whether one existed.
    pub fn disarm_timer(&self, aoi_id: AoiId) -> bool {
        let Some(timer) = lock(&self.timers).remove(&aoi_id) else {
            return false;
        };
        timer.handle.abort();
        true
    }

    /// Aborts every pending timer.
    pub fn disarm_all(&self) -> usize {
        let mut timers = lock(&self.timers);
        let count = timers.len();
        for (_, timer) in timers.drain() {
            timer.handle.abort();
        }
        count
    }

    /// Pending timers, earliest first.
    #[must_use]
    pub fn pending_timers(&self) -> Vec<ScheduledJob> {
        let mut jobs: Vec<ScheduledJob> = lock(&self.timers)
            .values()
            .map(|timer| ScheduledJob {
                in_flight: self.is_in_flight(timer.job.aoi_id),
                ..timer.job
            })
            .collect();
        jobs.sort_by_key(|job| (job.due_at, job.aoi_id));
        jobs
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use std::time::Duration as StdDuration;

    use chrono::Duration;

    use super::*;
    use crate::domain::{FailureReason, ProcessId, QualityFlag, SkipReason};
    use crate::persistence::InMemoryPersistence;
    use crate::test_support::completed_aoi;

    fn engine_with(store: Arc<InMemoryPersistence>, max_concurrent_jobs: usize) -> SchedulingEngine {
        let config = SchedulerConfig {
            max_concurrent_jobs,
            ..SchedulerConfig::default()
        };
        SchedulingEngine::new(store, config)
    }

    fn success() -> JobOutcome {
        JobOutcome::Success {
            score: 1.0,
            result_id: 1,
            process_id: ProcessId::new(),
            quality: QualityFlag::High,
        }
    }

    #[test]
    fn marker_is_exclusive_until_dropped() {
        let registry = Arc::new(InFlightRegistry::new());
        let aoi = AoiId::new(1);

        let Some(guard) = registry.try_acquire(aoi) else {
            panic!("first claim succeeds");
        };
        assert!(registry.try_acquire(aoi).is_none());
        assert!(registry.try_acquire(AoiId::new(2)).is_some());
        assert!(registry.is_held(aoi));

        drop(guard);
        assert!(!registry.is_held(aoi));
        assert!(registry.try_acquire(aoi).is_some());
    }

    #[test]
    fn stale_guard_does_not_release_newer_claim() {
        let registry = Arc::new(InFlightRegistry::new());
        let aoi = AoiId::new(1);
        let Some(stale) = registry.try_acquire(aoi) else {
            panic!("claim");
        };
        assert_eq!(registry.clear(), 1);

        let Some(_fresh) = registry.try_acquire(aoi) else {
            panic!("claim after clear");
        };
        drop(stale);
        assert!(registry.is_held(aoi));
    }

    #[tokio::test]
    async fn marker_is_released_when_task_panics() {
        let registry = Arc::new(InFlightRegistry::new());
        let aoi = AoiId::new(9);
        let Some(guard) = registry.try_acquire(aoi) else {
            panic!("claim");
        };
        let handle = tokio::spawn(async move {
            let _guard = guard;
            panic!("job blew up");
        });
        assert!(handle.await.is_err());
        assert!(!registry.is_held(aoi));
    }

    #[test]
    fn once_has_no_next_run() {
        let now = Utc::now();
        assert_eq!(
            next_run_after(MonitoringFrequency::Weekly, now),
            Some(now + Duration::days(7))
        );
        assert_eq!(
            next_run_after(MonitoringFrequency::Monthly, now),
            Some(now + Duration::days(30))
        );
        assert_eq!(next_run_after(MonitoringFrequency::Once, now), None);
    }

    #[tokio::test]
    async fn slots_cap_concurrency() {
        let engine = engine_with(Arc::new(InMemoryPersistence::new()), 2);
        let Some(first) = engine.try_reserve_slot() else {
            panic!("slot 1");
        };
        let Some(_second) = engine.try_reserve_slot() else {
            panic!("slot 2");
        };
        assert!(engine.try_reserve_slot().is_none());
        drop(first);
        assert_eq!(engine.available_slots(), 1);
    }

    #[tokio::test]
    async fn drained_waits_for_outstanding_slots() {
        let engine = Arc::new(engine_with(Arc::new(InMemoryPersistence::new()), 2));
        let Some(slot) = engine.try_reserve_slot() else {
            panic!("slot");
        };
        let release = tokio::spawn(async move {
            tokio::time::sleep(StdDuration::from_millis(20)).await;
            drop(slot);
        });
        let waited =
            tokio::time::timeout(StdDuration::from_secs(2), engine.drained()).await;
        assert!(waited.is_ok());
        assert!(release.await.is_ok());
        assert_eq!(engine.available_slots(), 2);
    }

    #[tokio::test]
    async fn success_and_failure_both_advance_by_interval() {
        let store = Arc::new(InMemoryPersistence::new());
        store.insert_aoi(completed_aoi(1, 10)).await;
        let engine = engine_with(Arc::clone(&store), 10);
        let executed_at = Utc::now();
        let Ok(Some(aoi)) = store.load_aoi(AoiId::new(1)).await else {
            panic!("aoi");
        };

        let Ok(change) = engine
            .reschedule(AoiId::new(1), &success(), executed_at, aoi.next_run_at)
            .await
        else {
            panic!("reschedule");
        };
        assert_eq!(change, ScheduleChange::Advanced(executed_at + Duration::days(7)));

        let failure = JobOutcome::failure(FailureReason::InsufficientFunds);
        let Ok(change) = engine
            .reschedule(AoiId::new(1), &failure, executed_at, change.next_run_at())
            .await
        else {
            panic!("reschedule");
        };
        assert_eq!(change.next_run_at(), Some(executed_at + Duration::days(7)));

        let Ok(Some(aoi)) = store.load_aoi(AoiId::new(1)).await else {
            panic!("aoi");
        };
        assert_eq!(aoi.next_run_at, Some(executed_at + Duration::days(7)));
    }

    #[tokio::test]
    async fn once_is_disabled_after_any_attempt() {
        let store = Arc::new(InMemoryPersistence::new());
        let mut aoi = completed_aoi(1, 10);
        aoi.monitoring_frequency = Some(MonitoringFrequency::Once);
        store.insert_aoi(aoi).await;
        let engine = engine_with(Arc::clone(&store), 10);
        let Ok(Some(admitted)) = store.load_aoi(AoiId::new(1)).await else {
            panic!("aoi");
        };

        let failure = JobOutcome::failure(FailureReason::Timeout);
        let Ok(change) = engine
            .reschedule(AoiId::new(1), &failure, Utc::now(), admitted.next_run_at)
            .await
        else {
            panic!("reschedule");
        };
        assert_eq!(change, ScheduleChange::Disabled);
        let Ok(Some(aoi)) = store.load_aoi(AoiId::new(1)).await else {
            panic!("aoi");
        };
        assert_eq!(aoi.monitoring_frequency, None);
        assert_eq!(aoi.next_run_at, None);
    }

    #[tokio::test]
    async fn skips_leave_schedule_alone() {
        let store = Arc::new(InMemoryPersistence::new());
        let aoi = completed_aoi(1, 10);
        let before = aoi.next_run_at;
        store.insert_aoi(aoi).await;
        let engine = engine_with(Arc::clone(&store), 10);

        let skipped = JobOutcome::Skipped {
            reason: SkipReason::NotDue,
        };
        let Ok(change) = engine
            .reschedule(AoiId::new(1), &skipped, Utc::now(), before)
            .await
        else {
            panic!("reschedule");
        };
        assert_eq!(change, ScheduleChange::Unchanged);
        let Ok(Some(aoi)) = store.load_aoi(AoiId::new(1)).await else {
            panic!("aoi");
        };
        assert_eq!(aoi.next_run_at, before);
    }

    #[tokio::test]
    async fn schedule_set_during_the_job_is_kept() {
        let store = Arc::new(InMemoryPersistence::new());
        let aoi = completed_aoi(1, 10);
        let admitted = aoi.next_run_at;
        store.insert_aoi(aoi).await;
        let engine = engine_with(Arc::clone(&store), 10);

        let pinned = Utc::now() + Duration::hours(3);
        let Ok(()) = store
            .update_schedule(AoiId::new(1), Some(MonitoringFrequency::Monthly), Some(pinned))
            .await
        else {
            panic!("user schedule");
        };

        let Ok(change) = engine
            .reschedule(AoiId::new(1), &success(), Utc::now(), admitted)
            .await
        else {
            panic!("reschedule");
        };
        assert_eq!(change, ScheduleChange::Unchanged);
        let Ok(Some(aoi)) = store.load_aoi(AoiId::new(1)).await else {
            panic!("aoi");
        };
        assert_eq!(aoi.next_run_at, Some(pinned));
        assert_eq!(aoi.monitoring_frequency, Some(MonitoringFrequency::Monthly));
    }

    #[tokio::test]
    async fn rearming_a_timer_aborts_the_previous_one() {
        let engine = engine_with(Arc::new(InMemoryPersistence::new()), 10);
        let aoi = AoiId::new(4);
        let first = tokio::spawn(tokio::time::sleep(StdDuration::from_secs(60)));
        let second = tokio::spawn(tokio::time::sleep(StdDuration::from_secs(60)));
        let due = Utc::now() + Duration::hours(1);

        let first_token = engine.next_timer_token();
        let job = engine.register_timer(aoi, due, first_token, first.abort_handle());
        assert_eq!(job.attempt, 1);
        let job = engine.register_timer(aoi, due, engine.next_timer_token(), second.abort_handle());
        assert_eq!(job.attempt, 2);

        let Err(aborted) = first.await else {
            panic!("first timer aborted");
        };
        assert!(aborted.is_cancelled());
        assert_eq!(engine.pending_timers().len(), 1);

        // A late fire notification from the first arming keeps the second.
        engine.timer_fired(aoi, first_token);
        assert_eq!(engine.pending_timers().len(), 1);

        assert!(engine.disarm_timer(aoi));
        assert!(engine.pending_timers().is_empty());
        assert!(!engine.disarm_timer(aoi));
    }
}

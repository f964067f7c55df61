//! The running monitoring service.
//!
//! [`MonitoringOrchestrator`] composes the scheduling engine, the job
//! executor, the baseline builder and the token ledger. It owns the sweep
//! loop and the time-exact timers, and is the single entry point for
//! "run now" and schedule management requests.
//!
//! Every job, whichever producer fired it, goes through the same path:
//! claim the AOI's in-flight marker, take a concurrency slot, execute under
//! the job timeout, apply the refund policy, reschedule, publish events,
//! release the marker and the slot.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use utoipa::ToSchema;

use crate::artifacts::ArtifactStore;
use crate::config::{ExecutorConfig, SchedulerConfig};
use crate::domain::{
    AoiId, EventBus, FailureReason, JobOutcome, JobReport, MonitoringEvent, MonitoringFrequency,
    ProcessId, ScheduledJob, Trigger,
};
use crate::error::MonitorError;
use crate::persistence::Persistence;
use crate::provider::ImageProvider;

use super::scheduler::{InFlightGuard, JobSlot, ScheduleChange};
use super::{BaselineBuilder, JobExecutor, SchedulingEngine, TokenLedger};

/// What one sweep cycle did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, ToSchema)]
pub struct SweepSummary {
    /// Due AOIs returned by the store.
    pub selected: usize,
    /// Jobs started.
    pub dispatched: usize,
    /// Candidates another path was already running.
    pub skipped_in_flight: usize,
    /// Candidates left for the next cycle because every slot was taken.
    pub deferred: usize,
}

/// Snapshot of the orchestrator for the operational surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct SchedulerStatus {
    /// Whether the sweep loop is running.
    pub is_running: bool,
    /// Active AOIs with a monitoring frequency.
    pub scheduled_count: u64,
    /// Jobs currently executing.
    pub in_flight: usize,
    /// Armed time-exact timers.
    pub pending_timers: usize,
    /// Sweep period in seconds.
    pub sweep_interval_secs: u64,
    /// Global concurrency cap.
    pub max_concurrent_jobs: usize,
}

/// Result of a schedule update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ScheduleUpdate {
    /// Target AOI.
    pub aoi_id: AoiId,
    /// Stored frequency; `None` when monitoring is disabled.
    pub frequency: Option<MonitoringFrequency>,
    /// Stored next-run time.
    pub next_run_at: Option<DateTime<Utc>>,
    /// Timer armed for a time-exact run, if any.
    pub timer: Option<ScheduledJob>,
}

#[derive(Debug)]
struct Running {
    cancel: CancellationToken,
    sweep: JoinHandle<()>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Lifecycle-managed monitoring service.
///
/// Constructed once at process start and shared behind an `Arc`; the API
/// layer reaches it through the application state.
#[derive(Debug)]
pub struct MonitoringOrchestrator {
    store: Arc<dyn Persistence>,
    ledger: TokenLedger,
    engine: SchedulingEngine,
    executor: JobExecutor,
    baselines: BaselineBuilder,
    event_bus: EventBus,
    running: Mutex<Option<Running>>,
}

impl MonitoringOrchestrator {
    /// Wires the service from its collaborators. Nothing runs until
    /// [`MonitoringOrchestrator::start`].
    #[must_use]
    pub fn new(
        store: Arc<dyn Persistence>,
        provider: Arc<dyn ImageProvider>,
        artifacts: Arc<dyn ArtifactStore>,
        event_bus: EventBus,
        scheduler: SchedulerConfig,
        executor: ExecutorConfig,
    ) -> Self {
        let ledger = TokenLedger::new(Arc::clone(&store));
        let engine = SchedulingEngine::new(Arc::clone(&store), scheduler);
        let job_executor = JobExecutor::new(
            Arc::clone(&store),
            ledger.clone(),
            Arc::clone(&provider),
            Arc::clone(&artifacts),
            event_bus.clone(),
            executor,
        );
        let baselines = BaselineBuilder::new(
            Arc::clone(&store),
            provider,
            artifacts,
            event_bus.clone(),
            executor,
        );
        Self {
            store,
            ledger,
            engine,
            executor: job_executor,
            baselines,
            event_bus,
            running: Mutex::new(None),
        }
    }

    /// Token ledger shared with the executor.
    #[must_use]
    pub const fn ledger(&self) -> &TokenLedger {
        &self.ledger
    }

    /// Scheduling engine.
    #[must_use]
    pub const fn engine(&self) -> &SchedulingEngine {
        &self.engine
    }

    /// Event bus the service publishes on.
    #[must_use]
    pub const fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    /// Whether the sweep loop is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        lock(&self.running).is_some()
    }

    /// Launches the periodic sweep loop. Returns `false` if it was already
    /// running.
    pub fn start(self: &Arc<Self>) -> bool {
        let mut running = lock(&self.running);
        if running.is_some() {
            tracing::warn!("monitoring orchestrator already running");
            return false;
        }
        let cancel = CancellationToken::new();
        let sweep = tokio::spawn(Arc::clone(self).sweep_loop(cancel.clone()));
        *running = Some(Running { cancel, sweep });

        let config = self.engine.config();
        tracing::info!(
            sweep_interval_secs = config.sweep_interval.as_secs(),
            max_concurrent_jobs = config.max_concurrent_jobs,
            "monitoring orchestrator started"
        );
        true
    }

    /// Stops the sweep loop, disarms timers, waits up to the shutdown
    /// timeout for executing jobs, then releases every in-flight marker.
    /// Returns `false` if it was not running.
    pub async fn stop(&self) -> bool {
        let taken = lock(&self.running).take();
        let Some(Running { cancel, sweep }) = taken else {
            return false;
        };
        cancel.cancel();
        if let Err(e) = sweep.await {
            tracing::error!(error = %e, "sweep loop ended abnormally");
        }

        let disarmed = self.engine.disarm_all();
        let shutdown_timeout = self.engine.config().shutdown_timeout;
        if tokio::time::timeout(shutdown_timeout, self.engine.drained())
            .await
            .is_err()
        {
            tracing::warn!(
                in_flight = self.engine.in_flight_count(),
                timeout_secs = shutdown_timeout.as_secs(),
                "jobs still running at shutdown"
            );
        }
        let released = self.engine.release_all();
        tracing::info!(disarmed, released, "monitoring orchestrator stopped");
        true
    }

    async fn sweep_loop(self: Arc<Self>, cancel: CancellationToken) {
        let period = self.engine.config().sweep_interval.max(Duration::from_secs(1));
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await; // skip immediate first tick

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            if let Err(e) = self.sweep_now().await {
                tracing::error!(error = %e, "sweep cycle skipped");
            }
        }
        tracing::debug!("sweep loop exited");
    }

    /// Runs one sweep: selects due AOIs and dispatches as many as there
    /// are free slots. The rest stay due for the next cycle.
    ///
    /// # Errors
    ///
    /// Returns [`MonitorError::PersistenceError`] if due AOIs cannot be
    /// queried; nothing is dispatched in that case.
    pub async fn sweep_now(self: &Arc<Self>) -> Result<SweepSummary, MonitorError> {
        let due = self.engine.due_aois(Utc::now()).await?;
        let mut summary = SweepSummary {
            selected: due.len(),
            ..SweepSummary::default()
        };

        for candidate in due {
            let Some(guard) = self.engine.try_claim(candidate.aoi_id) else {
                tracing::debug!(aoi_id = %candidate.aoi_id, "already in flight");
                summary.skipped_in_flight += 1;
                continue;
            };
            let Some(slot) = self.engine.try_reserve_slot() else {
                summary.deferred += 1;
                continue;
            };
            drop(self.spawn_job(candidate.aoi_id, Trigger::Sweep, guard, slot));
            summary.dispatched += 1;
        }

        tracing::info!(
            selected = summary.selected,
            dispatched = summary.dispatched,
            skipped_in_flight = summary.skipped_in_flight,
            deferred = summary.deferred,
            "sweep completed"
        );
        let _ = self.event_bus.publish(MonitoringEvent::SweepCompleted {
            selected: summary.selected,
            dispatched: summary.dispatched,
            skipped_in_flight: summary.skipped_in_flight,
            deferred: summary.deferred,
            timestamp: Utc::now(),
        });
        Ok(summary)
    }

    /// Runs one analysis of `aoi_id` now, bypassing the due check, and
    /// waits for its report. The job still reschedules afterwards.
    ///
    /// # Errors
    ///
    /// Returns [`MonitorError::AlreadyInFlight`] without side effects if
    /// another job holds the AOI, or [`MonitorError::Internal`] if the job
    /// task could not be joined.
    pub async fn force_analysis(self: &Arc<Self>, aoi_id: AoiId) -> Result<JobReport, MonitorError> {
        let guard = self
            .engine
            .try_claim(aoi_id)
            .ok_or(MonitorError::AlreadyInFlight(aoi_id))?;
        let slot = self.engine.reserve_slot().await?;
        self.spawn_job(aoi_id, Trigger::Force, guard, slot)
            .await
            .map_err(|e| MonitorError::Internal(format!("job task failed: {e}")))
    }

    /// Sets an AOI's monitoring frequency. `None` disables monitoring.
    ///
    /// `next_run_at` becomes `scheduled_at` when given, else one interval
    /// from now. A given `scheduled_at` arms a time-exact timer while the
    /// orchestrator is running.
    ///
    /// # Errors
    ///
    /// Returns [`MonitorError::AoiNotFound`] for an unknown AOI and
    /// [`MonitorError::InvalidRequest`] for `once` without `scheduled_at`.
    pub async fn update_schedule(
        self: &Arc<Self>,
        aoi_id: AoiId,
        frequency: Option<MonitoringFrequency>,
        scheduled_at: Option<DateTime<Utc>>,
    ) -> Result<ScheduleUpdate, MonitorError> {
        let Some(frequency) = frequency else {
            self.cancel_schedule(aoi_id).await?;
            return Ok(ScheduleUpdate {
                aoi_id,
                frequency: None,
                next_run_at: None,
                timer: None,
            });
        };
        if self.store.load_aoi(aoi_id).await?.is_none() {
            return Err(MonitorError::AoiNotFound(aoi_id));
        }

        let next_run_at = match (scheduled_at, frequency.interval()) {
            (Some(at), _) => at,
            (None, Some(interval)) => Utc::now() + interval,
            (None, None) => {
                return Err(MonitorError::InvalidRequest(
                    "frequency `once` requires scheduled_at".to_string(),
                ));
            }
        };
        self.store
            .update_schedule(aoi_id, Some(frequency), Some(next_run_at))
            .await?;

        let timer = match scheduled_at {
            Some(at) if self.is_running() => Some(self.arm_timer(aoi_id, at)),
            _ => {
                self.engine.disarm_timer(aoi_id);
                None
            }
        };
        tracing::info!(%aoi_id, %frequency, %next_run_at, timer = timer.is_some(), "schedule updated");
        let _ = self.event_bus.publish(MonitoringEvent::Rescheduled {
            aoi_id,
            next_run_at: Some(next_run_at),
            timestamp: Utc::now(),
        });
        Ok(ScheduleUpdate {
            aoi_id,
            frequency: Some(frequency),
            next_run_at: Some(next_run_at),
            timer,
        })
    }

    /// Disables monitoring of an AOI and disarms its timer.
    ///
    /// # Errors
    ///
    /// Returns [`MonitorError::AoiNotFound`] for an unknown AOI.
    pub async fn cancel_schedule(&self, aoi_id: AoiId) -> Result<(), MonitorError> {
        self.store.update_schedule(aoi_id, None, None).await?;
        let disarmed = self.engine.disarm_timer(aoi_id);
        tracing::info!(%aoi_id, disarmed, "schedule cancelled");
        let _ = self.event_bus.publish(MonitoringEvent::Rescheduled {
            aoi_id,
            next_run_at: None,
            timestamp: Utc::now(),
        });
        Ok(())
    }

    /// Builds the baseline of an AOI under its in-flight marker, bounded by
    /// the job timeout.
    ///
    /// # Errors
    ///
    /// Returns [`MonitorError::AlreadyInFlight`] if a job holds the AOI and
    /// [`MonitorError::Timeout`] (baseline marked `failed`) when the build
    /// overruns. Otherwise whatever [`BaselineBuilder::build`] returns.
    pub async fn create_baseline(&self, aoi_id: AoiId) -> Result<String, MonitorError> {
        let _guard = self
            .engine
            .try_claim(aoi_id)
            .ok_or(MonitorError::AlreadyInFlight(aoi_id))?;
        let job_timeout = self.engine.config().job_timeout;
        match tokio::time::timeout(job_timeout, self.baselines.build(aoi_id, Utc::now())).await {
            Ok(built) => built,
            Err(_) => {
                let err = MonitorError::Timeout(job_timeout.as_secs());
                self.baselines.record_failure(aoi_id, err.to_string()).await;
                Err(err)
            }
        }
    }

    /// Current status.
    ///
    /// # Errors
    ///
    /// Returns [`MonitorError::PersistenceError`] if the scheduled count
    /// cannot be read.
    pub async fn status(&self) -> Result<SchedulerStatus, MonitorError> {
        let config = self.engine.config();
        Ok(SchedulerStatus {
            is_running: self.is_running(),
            scheduled_count: self.store.count_scheduled().await?,
            in_flight: self.engine.in_flight_count(),
            pending_timers: self.engine.pending_timers().len(),
            sweep_interval_secs: config.sweep_interval.as_secs(),
            max_concurrent_jobs: config.max_concurrent_jobs,
        })
    }

    fn arm_timer(self: &Arc<Self>, aoi_id: AoiId, due_at: DateTime<Utc>) -> ScheduledJob {
        let delay = (due_at - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        let token = self.engine.next_timer_token();
        let this = Arc::clone(self);
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            this.engine.timer_fired(aoi_id, token);
            let Some(guard) = this.engine.try_claim(aoi_id) else {
                tracing::debug!(%aoi_id, "timer fired while in flight");
                return;
            };
            match this.engine.reserve_slot().await {
                Ok(_) if !this.is_running() => {
                    tracing::debug!(%aoi_id, "orchestrator stopped before timer job started");
                }
                Ok(slot) => drop(this.spawn_job(aoi_id, Trigger::Timer, guard, slot)),
                Err(e) => tracing::warn!(%aoi_id, error = %e, "timer could not reserve a slot"),
            }
        });
        let job = self
            .engine
            .register_timer(aoi_id, due_at, token, task.abort_handle());
        tracing::debug!(%aoi_id, %due_at, attempt = job.attempt, "timer armed");
        job
    }

    fn spawn_job(
        self: &Arc<Self>,
        aoi_id: AoiId,
        trigger: Trigger,
        guard: InFlightGuard,
        slot: JobSlot,
    ) -> JoinHandle<JobReport> {
        let this = Arc::clone(self);
        tokio::spawn(async move { this.run_job(aoi_id, trigger, guard, slot).await })
    }

    async fn run_job(
        &self,
        aoi_id: AoiId,
        trigger: Trigger,
        guard: InFlightGuard,
        slot: JobSlot,
    ) -> JobReport {
        let executed_at = Utc::now();
        let process_id = ProcessId::new();
        let _ = self.event_bus.publish(MonitoringEvent::JobStarted {
            aoi_id,
            trigger,
            timestamp: executed_at,
        });
        tracing::debug!(%aoi_id, %trigger, %process_id, "job started");
        let admitted = match self.store.load_aoi(aoi_id).await {
            Ok(aoi) => aoi.and_then(|aoi| aoi.next_run_at),
            Err(e) => {
                tracing::warn!(%aoi_id, error = %e, "could not read schedule at admission");
                None
            }
        };

        let outcome = self.execute_bounded(aoi_id, trigger, executed_at, process_id).await;
        self.apply_refund_policy(&outcome).await;

        let change = match self
            .engine
            .reschedule(aoi_id, &outcome, executed_at, admitted)
            .await
        {
            Ok(change) => change,
            Err(e) => {
                tracing::error!(%aoi_id, error = %e, "reschedule failed");
                ScheduleChange::Unchanged
            }
        };
        self.publish_outcome(aoi_id, &outcome, change);
        drop(guard);
        drop(slot);

        JobReport {
            aoi_id,
            trigger,
            executed_at,
            outcome,
            next_run_at: change.next_run_at(),
        }
    }

    async fn execute_bounded(
        &self,
        aoi_id: AoiId,
        trigger: Trigger,
        executed_at: DateTime<Utc>,
        process_id: ProcessId,
    ) -> JobOutcome {
        let executor = self.executor.clone();
        let mut task = tokio::spawn(async move {
            executor.execute(aoi_id, trigger, executed_at, process_id).await
        });
        let job_timeout = self.engine.config().job_timeout;
        let reason = match tokio::time::timeout(job_timeout, &mut task).await {
            Ok(Ok(outcome)) => return outcome,
            Ok(Err(e)) => {
                tracing::error!(%aoi_id, %process_id, error = %e, "job task panicked");
                FailureReason::Panicked
            }
            Err(_) => {
                task.abort();
                let _ = task.await;
                tracing::warn!(
                    %aoi_id,
                    %process_id,
                    timeout_secs = job_timeout.as_secs(),
                    "job timed out"
                );
                FailureReason::Timeout
            }
        };
        JobOutcome::Failure {
            reason,
            process_id: Some(process_id),
        }
    }

    async fn apply_refund_policy(&self, outcome: &JobOutcome) {
        if !self.executor.config().refund_on_failure {
            return;
        }
        let JobOutcome::Failure {
            reason,
            process_id: Some(process_id),
        } = outcome
        else {
            return;
        };
        if !reason.charged() {
            return;
        }
        if let Err(e) = self.ledger.refund_usage(&process_id.to_string()).await {
            tracing::error!(%process_id, error = %e, "refund failed");
        }
    }

    fn publish_outcome(&self, aoi_id: AoiId, outcome: &JobOutcome, change: ScheduleChange) {
        let timestamp = Utc::now();
        let event = match outcome {
            JobOutcome::Success {
                score,
                result_id,
                process_id,
                quality,
            } => {
                tracing::info!(%aoi_id, %process_id, score, %quality, "job succeeded");
                MonitoringEvent::AnalysisCompleted {
                    aoi_id,
                    process_id: *process_id,
                    result_id: *result_id,
                    score: *score,
                    quality: *quality,
                    timestamp,
                }
            }
            JobOutcome::Failure { reason, .. } => {
                tracing::warn!(%aoi_id, %reason, "job failed");
                MonitoringEvent::AnalysisFailed {
                    aoi_id,
                    reason: reason.to_string(),
                    timestamp,
                }
            }
            JobOutcome::Skipped { reason } => {
                tracing::debug!(%aoi_id, reason = reason.code(), "job skipped");
                MonitoringEvent::JobSkipped {
                    aoi_id,
                    reason: reason.code().to_string(),
                    timestamp,
                }
            }
        };
        let _ = self.event_bus.publish(event);

        if change != ScheduleChange::Unchanged {
            let _ = self.event_bus.publish(MonitoringEvent::Rescheduled {
                aoi_id,
                next_run_at: change.next_run_at(),
                timestamp,
            });
        }
    }
}

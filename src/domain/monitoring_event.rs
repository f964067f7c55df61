//! Domain events emitted by the monitoring orchestrator.
//!
//! Every job transition, reschedule, baseline change and sweep produces a
//! [`MonitoringEvent`]. Events are published through the
//! [`super::EventBus`] and streamed to WebSocket subscribers.

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::{AoiId, ProcessId, QualityFlag, Trigger};

/// All observable state changes of the monitoring service.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MonitoringEvent {
    /// A job claimed its in-flight marker and started.
    JobStarted {
        /// Target AOI.
        aoi_id: AoiId,
        /// Producer that fired it.
        trigger: Trigger,
        /// Event timestamp.
        timestamp: DateTime<Utc>,
    },
    /// A job wrote a result.
    AnalysisCompleted {
        /// Target AOI.
        aoi_id: AoiId,
        /// Correlation token.
        process_id: ProcessId,
        /// Stored result row id.
        result_id: i64,
        /// Change score.
        score: f64,
        /// Comparison quality.
        quality: QualityFlag,
        /// Event timestamp.
        timestamp: DateTime<Utc>,
    },
    /// A job ended without a result.
    AnalysisFailed {
        /// Target AOI.
        aoi_id: AoiId,
        /// Failure code.
        reason: String,
        /// Event timestamp.
        timestamp: DateTime<Utc>,
    },
    /// A job was absorbed as a no-op.
    JobSkipped {
        /// Target AOI.
        aoi_id: AoiId,
        /// Skip code.
        reason: String,
        /// Event timestamp.
        timestamp: DateTime<Utc>,
    },
    /// A score crossed the significant-change threshold.
    SignificantChange {
        /// Target AOI.
        aoi_id: AoiId,
        /// Change score.
        score: f64,
        /// Configured threshold.
        threshold: f64,
        /// Event timestamp.
        timestamp: DateTime<Utc>,
    },
    /// The schedule of an AOI was advanced or disabled.
    Rescheduled {
        /// Target AOI.
        aoi_id: AoiId,
        /// New next-run time; `None` when monitoring was disabled.
        next_run_at: Option<DateTime<Utc>>,
        /// Event timestamp.
        timestamp: DateTime<Utc>,
    },
    /// A baseline was stored.
    BaselineCreated {
        /// Target AOI.
        aoi_id: AoiId,
        /// Artifact reference.
        reference: String,
        /// Event timestamp.
        timestamp: DateTime<Utc>,
    },
    /// A baseline attempt failed.
    BaselineFailed {
        /// Target AOI.
        aoi_id: AoiId,
        /// Error message.
        reason: String,
        /// Event timestamp.
        timestamp: DateTime<Utc>,
    },
    /// A sweep cycle finished dispatching.
    SweepCompleted {
        /// Due AOIs returned by the store.
        selected: usize,
        /// Jobs started.
        dispatched: usize,
        /// Candidates already in flight.
        skipped_in_flight: usize,
        /// Candidates left for the next cycle because of the concurrency cap.
        deferred: usize,
        /// Event timestamp.
        timestamp: DateTime<Utc>,
    },
}

impl MonitoringEvent {
    /// AOI the event concerns; `None` for service-wide events.
    #[must_use]
    pub const fn aoi_id(&self) -> Option<AoiId> {
        match self {
            Self::JobStarted { aoi_id, .. }
            | Self::AnalysisCompleted { aoi_id, .. }
            | Self::AnalysisFailed { aoi_id, .. }
            | Self::JobSkipped { aoi_id, .. }
            | Self::SignificantChange { aoi_id, .. }
            | Self::Rescheduled { aoi_id, .. }
            | Self::BaselineCreated { aoi_id, .. }
            | Self::BaselineFailed { aoi_id, .. } => Some(*aoi_id),
            Self::SweepCompleted { .. } => None,
        }
    }

    /// Event type discriminator string.
    #[must_use]
    pub const fn event_type_str(&self) -> &'static str {
        match self {
            Self::JobStarted { .. } => "job_started",
            Self::AnalysisCompleted { .. } => "analysis_completed",
            Self::AnalysisFailed { .. } => "analysis_failed",
            Self::JobSkipped { .. } => "job_skipped",
            Self::SignificantChange { .. } => "significant_change",
            Self::Rescheduled { .. } => "rescheduled",
            Self::BaselineCreated { .. } => "baseline_created",
            Self::BaselineFailed { .. } => "baseline_failed",
            Self::SweepCompleted { .. } => "sweep_completed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serialized_type_matches_discriminator() {
        let event = MonitoringEvent::Rescheduled {
            aoi_id: AoiId::new(3),
            next_run_at: None,
            timestamp: Utc::now(),
        };
        let value = serde_json::to_value(&event).unwrap_or_default();
        assert_eq!(value["type"], event.event_type_str());
        assert_eq!(value["aoi_id"], 3);
    }

    #[test]
    fn sweep_events_have_no_aoi() {
        let event = MonitoringEvent::SweepCompleted {
            selected: 1,
            dispatched: 1,
            skipped_in_flight: 0,
            deferred: 0,
            timestamp: Utc::now(),
        };
        assert_eq!(event.aoi_id(), None);
    }
}

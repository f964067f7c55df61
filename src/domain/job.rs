//! Job triggers, outcomes, and scheduled-job bookkeeping.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;

use super::{AoiId, ProcessId, QualityFlag};

/// Which producer asked for a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    /// Periodic bulk sweep.
    Sweep,
    /// Precise time-exact request.
    Timer,
    /// Manual "run now" request; bypasses the due check.
    Force,
}

impl Trigger {
    /// String form used in logs and metadata.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Sweep => "sweep",
            Self::Timer => "timer",
            Self::Force => "force",
        }
    }

    /// Scheduled triggers only run AOIs that are actually due.
    #[must_use]
    pub const fn requires_due(self) -> bool {
        !matches!(self, Self::Force)
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a job that started ended without a result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", content = "detail", rename_all = "snake_case")]
pub enum FailureReason {
    /// Owner's balance could not cover the debit.
    InsufficientFunds,
    /// Imagery provider failed or returned nothing.
    Acquisition(String),
    /// The AOI has no loadable baseline artifact.
    BaselineMissing,
    /// Change detection could not run.
    Detection(String),
    /// Artifacts or the result row could not be written.
    Persistence(String),
    /// Wall-clock budget exceeded.
    Timeout,
    /// The job task panicked.
    Panicked,
}

impl FailureReason {
    /// Short machine-readable code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InsufficientFunds => "insufficient_funds",
            Self::Acquisition(_) => "acquisition",
            Self::BaselineMissing => "baseline_missing",
            Self::Detection(_) => "detection",
            Self::Persistence(_) => "persistence",
            Self::Timeout => "timeout",
            Self::Panicked => "panicked",
        }
    }

    /// `true` when the failure happened after the token was debited.
    #[must_use]
    pub const fn charged(&self) -> bool {
        !matches!(self, Self::InsufficientFunds)
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Acquisition(detail) | Self::Detection(detail) | Self::Persistence(detail) => {
                write!(f, "{}: {detail}", self.code())
            }
            _ => f.write_str(self.code()),
        }
    }
}

/// Why a job ended before any side effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// AOI no longer exists.
    NotFound,
    /// AOI was soft-deleted.
    Deactivated,
    /// AOI has no completed baseline.
    NotEligible,
    /// A scheduled trigger fired for an AOI that is no longer due.
    NotDue,
}

impl SkipReason {
    /// Short machine-readable code.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::Deactivated => "deactivated",
            Self::NotEligible => "not_eligible",
            Self::NotDue => "not_due",
        }
    }
}

/// Terminal state of one execution.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JobOutcome {
    /// A result row was written.
    Success {
        /// Change score in `[0, 100]`.
        score: f64,
        /// Stored result row id.
        result_id: i64,
        /// Correlation token.
        process_id: ProcessId,
        /// Comparison quality.
        quality: QualityFlag,
    },
    /// The job started but produced no result.
    Failure {
        /// What went wrong.
        reason: FailureReason,
        /// Correlation token, once one was allocated.
        process_id: Option<ProcessId>,
    },
    /// The job was absorbed as a no-op.
    Skipped {
        /// Why nothing happened.
        reason: SkipReason,
    },
}

impl JobOutcome {
    /// Shorthand for a failure before any process id existed.
    #[must_use]
    pub const fn failure(reason: FailureReason) -> Self {
        Self::Failure {
            reason,
            process_id: None,
        }
    }

    /// Success and failure both advance the schedule; skips do not.
    #[must_use]
    pub const fn advances_schedule(&self) -> bool {
        !matches!(self, Self::Skipped { .. })
    }

    /// Short label for logs.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Success { .. } => "success",
            Self::Failure { .. } => "failure",
            Self::Skipped { .. } => "skipped",
        }
    }
}

/// Outcome of one execution plus its scheduling consequence.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobReport {
    /// Executed AOI.
    pub aoi_id: AoiId,
    /// Producer that fired it.
    pub trigger: Trigger,
    /// Execution start; the base of the next-run computation.
    pub executed_at: DateTime<Utc>,
    /// Terminal state.
    pub outcome: JobOutcome,
    /// Next-run time written by the reschedule step, if any.
    pub next_run_at: Option<DateTime<Utc>>,
}

/// A pending time-exact request held by the scheduling engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ScheduledJob {
    /// Target AOI.
    pub aoi_id: AoiId,
    /// When it fires.
    pub due_at: DateTime<Utc>,
    /// How many times a timer has been armed for this AOI.
    pub attempt: u32,
    /// Whether the AOI currently holds an in-flight marker.
    pub in_flight: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_force_bypasses_due_check() {
        assert!(Trigger::Sweep.requires_due());
        assert!(Trigger::Timer.requires_due());
        assert!(!Trigger::Force.requires_due());
    }

    #[test]
    fn skips_do_not_advance_schedule() {
        assert!(!JobOutcome::Skipped {
            reason: SkipReason::NotFound
        }
        .advances_schedule());
        assert!(JobOutcome::failure(FailureReason::Timeout).advances_schedule());
    }

    #[test]
    fn failure_display_includes_detail() {
        let reason = FailureReason::Acquisition("http 503".to_string());
        assert_eq!(reason.to_string(), "acquisition: http 503");
        assert_eq!(FailureReason::Timeout.to_string(), "timeout");
    }

    #[test]
    fn insufficient_funds_is_not_charged() {
        assert!(!FailureReason::InsufficientFunds.charged());
        assert!(FailureReason::BaselineMissing.charged());
    }
}

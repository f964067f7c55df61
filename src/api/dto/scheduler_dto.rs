//! Request/response DTOs for the scheduler and schedule endpoints.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::domain::{JobOutcome, JobReport, QualityFlag};
use crate::service::ScheduleUpdate;

/// Outcome of a forced analysis.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct TriggerResponse {
    /// AOI analysed.
    pub aoi_id: i64,
    /// Always `force` for this endpoint.
    pub trigger: String,
    /// Start of the run.
    pub executed_at: DateTime<Utc>,
    /// `success`, `failure` or `skipped`.
    pub status: String,
    /// Correlation id of the charged attempt.
    pub process_id: Option<String>,
    /// Stored analysis result.
    pub result_id: Option<i64>,
    /// Change score in percent.
    pub change_score: Option<f64>,
    /// Cloud-derived quality of the result.
    pub quality: Option<QualityFlag>,
    /// Failure or skip reason.
    pub reason: Option<String>,
    /// Next scheduled run after rescheduling.
    pub next_run_at: Option<DateTime<Utc>>,
}

impl From<JobReport> for TriggerResponse {
    fn from(report: JobReport) -> Self {
        let mut response = Self {
            aoi_id: report.aoi_id.get(),
            trigger: report.trigger.to_string(),
            executed_at: report.executed_at,
            status: report.outcome.label().to_string(),
            process_id: None,
            result_id: None,
            change_score: None,
            quality: None,
            reason: None,
            next_run_at: report.next_run_at,
        };
        match report.outcome {
            JobOutcome::Success {
                score,
                result_id,
                process_id,
                quality,
            } => {
                response.process_id = Some(process_id.to_string());
                response.result_id = Some(result_id);
                response.change_score = Some(score);
                response.quality = Some(quality);
            }
            JobOutcome::Failure { reason, process_id } => {
                response.process_id = process_id.map(|id| id.to_string());
                response.reason = Some(reason.to_string());
            }
            JobOutcome::Skipped { reason } => {
                response.reason = Some(reason.code().to_string());
            }
        }
        response
    }
}

/// Body of `PUT /aoi/{aoi_id}/schedule`.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct ScheduleRequest {
    /// `daily`, `weekly`, `monthly`, `once` or `none`.
    pub frequency: String,
    /// `false` disables monitoring regardless of `frequency`.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Exact time of the next run; required for `once`.
    pub scheduled_at: Option<DateTime<Utc>>,
}

fn default_enabled() -> bool {
    true
}

/// Resulting schedule of an AOI.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ScheduleResponse {
    /// AOI id.
    pub aoi_id: i64,
    /// Active frequency, `None` when monitoring is disabled.
    pub frequency: Option<String>,
    /// Next scheduled run.
    pub next_run_at: Option<DateTime<Utc>>,
    /// Whether a time-exact timer was armed.
    pub timer_armed: bool,
    /// Attempt number of the armed timer.
    pub timer_attempt: Option<u32>,
}

impl From<ScheduleUpdate> for ScheduleResponse {
    fn from(update: ScheduleUpdate) -> Self {
        Self {
            aoi_id: update.aoi_id.get(),
            frequency: update.frequency.map(|f| f.to_string()),
            next_run_at: update.next_run_at,
            timer_armed: update.timer.is_some(),
            timer_attempt: update.timer.map(|job| job.attempt),
        }
    }
}

/// Stored baseline of an AOI.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct BaselineResponse {
    /// AOI id.
    pub aoi_id: i64,
    /// Artifact reference of the baseline image.
    pub reference: String,
}

//! Analysis results: the append-only facts produced by successful jobs.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::{AoiId, DateWindow, ProcessId, UserId};

/// Reliability of a comparison, derived from cloud coverage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum QualityFlag {
    /// Cloud coverage below 20%.
    High,
    /// Cloud coverage below 50%.
    Medium,
    /// Cloud coverage of 50% or more; the score is not authoritative.
    Low,
}

impl QualityFlag {
    /// Classifies a cloud-coverage percentage.
    #[must_use]
    pub fn from_cloud_coverage(cloud_coverage_pct: f64) -> Self {
        if cloud_coverage_pct < 20.0 {
            Self::High
        } else if cloud_coverage_pct < 50.0 {
            Self::Medium
        } else {
            Self::Low
        }
    }

    /// String form used in logs and metadata.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }
}

impl fmt::Display for QualityFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Artifact references of one analysis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ArtifactRefs {
    /// Reference image (the AOI baseline).
    pub before: String,
    /// Freshly acquired image.
    pub after: String,
    /// Rendered difference heatmap.
    pub heatmap: String,
}

/// Structured metadata stored alongside a result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct AnalysisMetadata {
    /// Comparison mode, e.g. `baseline_vs_current`.
    pub comparison_mode: String,
    /// What started the job (`sweep`, `timer`, `force`).
    pub trigger: String,
    /// Date window of the fresh acquisition.
    pub current_window: DateWindow,
    /// Acquisition date the baseline represents.
    pub baseline_date: Option<DateTime<Utc>>,
    /// Quality classification.
    pub quality: QualityFlag,
    /// Percentage of pixels flagged as cloud in either frame.
    pub cloud_coverage_pct: f64,
    /// Percentage of pixels that took part in scoring.
    pub usable_area_pct: f64,
    /// Percentage of usable pixels above the change threshold.
    pub changed_area_pct: f64,
    /// Mean colour difference over usable pixels (0-100).
    pub color_shift: f64,
    /// Unblurred luminance difference over usable pixels (0-100).
    pub structural_change: f64,
    /// Strongest single-pixel change over usable pixels (0-100).
    pub max_intensity: f64,
    /// Compared raster width after size reconciliation.
    pub width: u32,
    /// Compared raster height after size reconciliation.
    pub height: u32,
    /// Name of the imagery provider.
    pub provider: String,
}

/// Result about to be inserted.
#[derive(Debug, Clone, PartialEq)]
pub struct NewAnalysisResult {
    /// Correlation token of the attempt.
    pub process_id: ProcessId,
    /// Account that paid for it.
    pub user_id: UserId,
    /// Monitored AOI, if any.
    pub aoi_id: Option<AoiId>,
    /// Change score in `[0, 100]`.
    pub change_score: f64,
    /// Input and output artifacts.
    pub artifacts: ArtifactRefs,
    /// Structured metadata.
    pub metadata: AnalysisMetadata,
    /// Tokens debited for the attempt.
    pub tokens_charged: i64,
    /// Whether the run was scheduled rather than forced.
    pub is_automatic: bool,
    /// Execution start time.
    pub analyzed_at: DateTime<Utc>,
}

/// Stored analysis result. Never updated once written.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct AnalysisResult {
    /// Row id.
    pub id: i64,
    /// Correlation token of the attempt.
    #[schema(value_type = String)]
    pub process_id: ProcessId,
    /// Account that paid for it.
    #[schema(value_type = i64)]
    pub user_id: UserId,
    /// Monitored AOI, if any.
    #[schema(value_type = Option<i64>)]
    pub aoi_id: Option<AoiId>,
    /// Change score in `[0, 100]`.
    pub change_score: f64,
    /// Input and output artifacts.
    pub artifacts: ArtifactRefs,
    /// Structured metadata.
    pub metadata: AnalysisMetadata,
    /// Tokens debited for the attempt.
    pub tokens_charged: i64,
    /// Whether the run was scheduled rather than forced.
    pub is_automatic: bool,
    /// Execution start time.
    pub analyzed_at: DateTime<Utc>,
}

impl AnalysisResult {
    /// Materializes a stored row from the insert payload.
    #[must_use]
    pub fn from_new(id: i64, new: NewAnalysisResult) -> Self {
        Self {
            id,
            process_id: new.process_id,
            user_id: new.user_id,
            aoi_id: new.aoi_id,
            change_score: new.change_score,
            artifacts: new.artifacts,
            metadata: new.metadata,
            tokens_charged: new.tokens_charged,
            is_automatic: new.is_automatic,
            analyzed_at: new.analyzed_at,
        }
    }
}

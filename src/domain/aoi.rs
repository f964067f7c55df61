//! Area-of-interest snapshot and its scheduling attributes.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::{AoiId, UserId};

/// Geographic bounding box in lon/lat order (`[min_lon, min_lat, max_lon, max_lat]`).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct BoundingBox {
    /// Western edge.
    pub min_lon: f64,
    /// Southern edge.
    pub min_lat: f64,
    /// Eastern edge.
    pub max_lon: f64,
    /// Northern edge.
    pub max_lat: f64,
}

impl BoundingBox {
    /// Builds a bounding box from the four-float lon/lat array.
    #[must_use]
    pub const fn from_array(coords: [f64; 4]) -> Self {
        let [min_lon, min_lat, max_lon, max_lat] = coords;
        Self {
            min_lon,
            min_lat,
            max_lon,
            max_lat,
        }
    }

    /// Returns the four-float lon/lat array.
    #[must_use]
    pub const fn to_array(self) -> [f64; 4] {
        [self.min_lon, self.min_lat, self.max_lon, self.max_lat]
    }
}

/// How often an AOI is re-analysed.
///
/// A disabled schedule is represented by the *absence* of a frequency
/// (`Option<MonitoringFrequency>::None`), which is what `"none"` parses to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum MonitoringFrequency {
    /// Every day.
    Daily,
    /// Every seven days.
    Weekly,
    /// Every thirty days.
    Monthly,
    /// A single run, after which the schedule is disabled.
    Once,
}

impl MonitoringFrequency {
    /// Interval between runs, or `None` for [`MonitoringFrequency::Once`].
    #[must_use]
    pub fn interval(self) -> Option<Duration> {
        match self {
            Self::Daily => Some(Duration::days(1)),
            Self::Weekly => Some(Duration::days(7)),
            Self::Monthly => Some(Duration::days(30)),
            Self::Once => None,
        }
    }

    /// Storage representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Daily => "daily",
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
            Self::Once => "once",
        }
    }

    /// Parses a user/storage frequency string. `"none"` (and the empty
    /// string) yield `Ok(None)`; matching is case-insensitive.
    ///
    /// # Errors
    ///
    /// Returns the offending string when it is not a known frequency.
    pub fn parse_optional(s: &str) -> Result<Option<Self>, String> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "none" => Ok(None),
            other => other.parse().map(Some),
        }
    }
}

impl fmt::Display for MonitoringFrequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MonitoringFrequency {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "daily" => Ok(Self::Daily),
            "weekly" => Ok(Self::Weekly),
            "monthly" => Ok(Self::Monthly),
            "once" => Ok(Self::Once),
            other => Err(format!("unknown monitoring frequency: {other}")),
        }
    }
}

/// Lifecycle of an AOI's baseline image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum BaselineStatus {
    /// Not yet attempted.
    Pending,
    /// Baseline job running.
    Processing,
    /// Baseline artifact stored.
    Completed,
    /// Last baseline attempt failed.
    Failed,
}

impl BaselineStatus {
    /// Storage representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl FromStr for BaselineStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown baseline status: {other}")),
        }
    }
}

/// Snapshot of one monitoring target as loaded from the store.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Aoi {
    /// AOI identifier.
    pub id: AoiId,
    /// Owning user; its token account pays for analyses.
    pub user_id: UserId,
    /// Display name.
    pub name: String,
    /// Area under monitoring.
    pub bbox: BoundingBox,
    /// Schedule frequency; `None` means monitoring is disabled.
    pub monitoring_frequency: Option<MonitoringFrequency>,
    /// Next scheduled run; only set while a frequency is set.
    pub next_run_at: Option<DateTime<Utc>>,
    /// Soft-delete flag.
    pub is_active: bool,
    /// Baseline lifecycle state.
    pub baseline_status: BaselineStatus,
    /// Artifact reference of the stored baseline image.
    pub baseline_reference: Option<String>,
    /// Acquisition date the baseline represents.
    pub baseline_date: Option<DateTime<Utc>>,
}

impl Aoi {
    /// Active with a completed baseline: the precondition for any analysis.
    #[must_use]
    pub fn is_eligible(&self) -> bool {
        self.is_active && self.baseline_status == BaselineStatus::Completed
    }

    /// Eligible, scheduled, and its next-run time has passed (a missing
    /// next-run time counts as overdue).
    #[must_use]
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.is_eligible()
            && self.monitoring_frequency.is_some()
            && self.next_run_at.is_none_or(|at| at <= now)
    }
}

/// Row returned by bulk due-selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DueAoi {
    /// AOI identifier.
    pub aoi_id: AoiId,
    /// Owning user.
    pub user_id: UserId,
    /// Scheduled time that made it due.
    pub next_run_at: Option<DateTime<Utc>>,
}

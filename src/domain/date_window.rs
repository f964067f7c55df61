//! Acquisition date windows.
//!
//! Imagery providers return the best scene inside a date range, so every
//! acquisition asks for a window around a target date rather than a single
//! day. A wider window raises the odds of a cloud-free scene.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Inclusive calendar date range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct DateWindow {
    /// First day (inclusive).
    pub from: NaiveDate,
    /// Last day (inclusive).
    pub to: NaiveDate,
}

impl DateWindow {
    /// Window of `half_width_days` on each side of `center`.
    #[must_use]
    pub fn centered(center: DateTime<Utc>, half_width_days: i64) -> Self {
        let day = center.date_naive();
        Self {
            from: day - Duration::days(half_width_days),
            to: day + Duration::days(half_width_days),
        }
    }

    /// Baseline window: centered `offset_days` before `now`.
    #[must_use]
    pub fn baseline(now: DateTime<Utc>, offset_days: i64, half_width_days: i64) -> Self {
        Self::centered(now - Duration::days(offset_days), half_width_days)
    }

    /// Midpoint of the window, at midnight UTC.
    #[must_use]
    pub fn center(&self) -> DateTime<Utc> {
        let half = (self.to - self.from).num_days() / 2;
        (self.from + Duration::days(half))
            .and_time(chrono::NaiveTime::MIN)
            .and_utc()
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        let Some(t) = Utc.with_ymd_and_hms(y, m, d, h, 30, 0).single() else {
            panic!("valid timestamp");
        };
        t
    }

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        let Some(date) = NaiveDate::from_ymd_opt(y, m, d) else {
            panic!("valid date");
        };
        date
    }

    #[test]
    fn centered_window_spans_both_sides() {
        let window = DateWindow::centered(at(2026, 3, 10, 15), 3);
        assert_eq!(window.from, day(2026, 3, 7));
        assert_eq!(window.to, day(2026, 3, 13));
    }

    #[test]
    fn baseline_window_is_offset_into_the_past() {
        let window = DateWindow::baseline(at(2026, 3, 10, 0), 365, 14);
        assert_eq!(window.center().date_naive(), day(2025, 3, 10));
        assert_eq!((window.to - window.from).num_days(), 28);
    }
}

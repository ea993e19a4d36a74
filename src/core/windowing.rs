//! Recency windows used to filter logs for display.
//!
//! Windows are calendar-aligned in the time zone of the reference instant:
//! a log belongs to the "day" window when it falls on the same local date as
//! `now`, and to the "hour" window when it also shares the local hour.

use crate::model::LogEntry;
use chrono::{DateTime, TimeZone, Timelike};
use serde::{Deserialize, Serialize};

/// Calendar span within which a log is considered recent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecencyWindow {
    /// Same local date as the reference instant
    CalendarDay,
    /// Same local date and hour as the reference instant
    ClockHour,
}

impl RecencyWindow {
    /// Check if a unix timestamp falls within the window around `now`.
    pub fn contains<Tz: TimeZone>(&self, timestamp: i64, now: &DateTime<Tz>) -> bool {
        let Some(local) = now.timezone().timestamp_opt(timestamp, 0).single() else {
            return false;
        };

        let same_day = local.date_naive() == now.date_naive();
        match self {
            RecencyWindow::CalendarDay => same_day,
            RecencyWindow::ClockHour => same_day && local.hour() == now.hour(),
        }
    }

    /// Check if a log falls within the window around `now`.
    pub fn contains_log<Tz: TimeZone>(&self, log: &LogEntry, now: &DateTime<Tz>) -> bool {
        self.contains(log.timestamp, now)
    }

    /// Human-readable description for table footers.
    pub fn describe(&self) -> &'static str {
        match self {
            RecencyWindow::CalendarDay => "Data limited to today",
            RecencyWindow::ClockHour => "Data limited to the last hour",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use chrono_tz::Europe::Rome;

    #[test]
    fn test_calendar_day_is_not_rolling() {
        // 2024-03-10 00:30:00 UTC
        let now = Utc.with_ymd_and_hms(2024, 3, 10, 0, 30, 0).unwrap();
        let one_hour_ago = now.timestamp() - 3600;
        let earlier_today = now.timestamp() - 60;

        assert!(RecencyWindow::CalendarDay.contains(earlier_today, &now));
        assert!(!RecencyWindow::CalendarDay.contains(one_hour_ago, &now));
    }

    #[test]
    fn test_clock_hour() {
        let now = Utc.with_ymd_and_hms(2024, 3, 10, 14, 5, 0).unwrap();

        assert!(RecencyWindow::ClockHour.contains(now.timestamp() - 4 * 60, &now));
        assert!(!RecencyWindow::ClockHour.contains(now.timestamp() - 6 * 60, &now));
        // Same hour of a different day is outside
        assert!(!RecencyWindow::ClockHour.contains(now.timestamp() - 86_400, &now));
    }

    #[test]
    fn test_window_follows_reference_timezone() {
        // 23:30 UTC on the 9th is 00:30 on the 10th in Rome
        let utc_log = Utc.with_ymd_and_hms(2024, 3, 9, 23, 30, 0).unwrap().timestamp();
        let now_rome = Rome.with_ymd_and_hms(2024, 3, 10, 9, 0, 0).unwrap();
        let now_utc = now_rome.with_timezone(&Utc);

        assert!(RecencyWindow::CalendarDay.contains(utc_log, &now_rome));
        assert!(!RecencyWindow::CalendarDay.contains(utc_log, &now_utc));
    }
}

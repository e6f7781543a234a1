//! Inclusive reporting window shared by the normalizer and metrics

use crate::config::ConfigError;
use chrono::{DateTime, Duration, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReportingWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl ReportingWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self, ConfigError> {
        if end <= start {
            return Err(ConfigError::InvalidValue(
                "reporting window end must be after start".to_string(),
            ));
        }
        Ok(Self { start, end })
    }

    /// Default window: the last `days` days ending now
    pub fn last_days(days: i64) -> Self {
        let end = Utc::now();
        Self {
            start: end - Duration::days(days),
            end,
        }
    }

    /// Inclusive membership test: start <= ts <= end
    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        self.start <= ts && ts <= self.end
    }

    /// Date folder for report output, derived from the window start
    pub fn date_folder(&self) -> String {
        self.start.format("%Y-%m-%d").to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDateTime;

    fn ts(s: &str) -> DateTime<Utc> {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
            .unwrap()
            .and_utc()
    }

    #[test]
    fn test_bounds_are_inclusive() {
        let window = ReportingWindow::new(ts("2026-01-01 00:00:00"), ts("2026-01-08 00:00:00")).unwrap();

        assert!(window.contains(ts("2026-01-01 00:00:00")));
        assert!(window.contains(ts("2026-01-08 00:00:00")));
        assert!(window.contains(ts("2026-01-04 12:30:00")));
        assert!(!window.contains(ts("2025-12-31 23:59:59")));
        assert!(!window.contains(ts("2026-01-08 00:00:01")));
    }

    #[test]
    fn test_rejects_inverted_window() {
        assert!(ReportingWindow::new(ts("2026-01-08 00:00:00"), ts("2026-01-01 00:00:00")).is_err());
        assert!(ReportingWindow::new(ts("2026-01-01 00:00:00"), ts("2026-01-01 00:00:00")).is_err());
    }

    #[test]
    fn test_date_folder_uses_window_start() {
        let window = ReportingWindow::new(ts("2026-02-03 10:00:00"), ts("2026-02-10 10:00:00")).unwrap();
        assert_eq!(window.date_folder(), "2026-02-03");
    }
}

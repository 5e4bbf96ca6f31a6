//! Retention rules deciding which observations enter the working set.
//!
//! Metrics in the [`RetentionCategory::Always`] category are kept no matter
//! how old they are; the rest are kept only inside a trailing window that
//! ends at the analysis time.

use crate::extract::types::{MetricType, RetentionCategory};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// A trailing retention window anchored at a fixed "now".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionPolicy {
    /// Inclusive lower bound of the window
    pub cutoff: DateTime<Utc>,
    /// The instant the window was anchored at
    pub anchor: DateTime<Utc>,
    /// Window length in days
    pub window_days: u32,
}

impl RetentionPolicy {
    /// Create a window covering the `window_days` days before `now`.
    pub fn trailing_days(now: DateTime<Utc>, window_days: u32) -> Self {
        Self {
            cutoff: now - Duration::days(i64::from(window_days)),
            anchor: now,
            window_days,
        }
    }

    /// Check if a timestamp falls within the window (boundary inclusive).
    pub fn within_window(&self, timestamp: DateTime<Utc>) -> bool {
        timestamp >= self.cutoff
    }

    /// Decide whether an observation of `metric` at `timestamp` is kept.
    pub fn retains(&self, metric: MetricType, timestamp: DateTime<Utc>) -> bool {
        match metric.retention() {
            RetentionCategory::Always => true,
            RetentionCategory::Window => self.within_window(timestamp),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 30, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_window_bounds() {
        let policy = RetentionPolicy::trailing_days(now(), 30);
        assert_eq!(policy.cutoff, Utc.with_ymd_and_hms(2024, 5, 31, 12, 0, 0).unwrap());

        assert!(policy.within_window(policy.cutoff));
        assert!(policy.within_window(now()));
        assert!(!policy.within_window(policy.cutoff - Duration::seconds(1)));
    }

    #[test]
    fn test_always_retained_ignores_window() {
        let policy = RetentionPolicy::trailing_days(now(), 7);
        let ancient = Utc.with_ymd_and_hms(2015, 1, 1, 0, 0, 0).unwrap();

        assert!(policy.retains(MetricType::BodyMass, ancient));
        assert!(policy.retains(MetricType::Height, ancient));
        assert!(!policy.retains(MetricType::StepCount, ancient));
        assert!(!policy.retains(MetricType::HeartRate, ancient));
    }

    #[test]
    fn test_window_retained_inside_window() {
        let policy = RetentionPolicy::trailing_days(now(), 7);
        let recent = now() - Duration::days(3);

        assert!(policy.retains(MetricType::StepCount, recent));
        assert!(policy.retains(MetricType::SleepAnalysis, recent));
    }
}

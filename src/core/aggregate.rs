//! Aggregations over observations.
//!
//! Everything here is a pure function of its input: no state is kept
//! between calls, so repeated calls on the same slice give the same result.

use crate::core::observation::Observation;
use crate::extract::retention::RetentionPolicy;
use crate::extract::types::MetricType;
use chrono::NaiveDate;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;
use std::collections::BTreeMap;

/// The most recent observation per metric.
///
/// Ties on timestamp go to the observation seen last.
pub fn latest_by_type(observations: &[Observation]) -> BTreeMap<MetricType, Observation> {
    let mut latest: BTreeMap<MetricType, Observation> = BTreeMap::new();
    for obs in observations {
        let newer = latest
            .get(&obs.metric_type)
            .map_or(true, |current| obs.timestamp >= current.timestamp);
        if newer {
            latest.insert(obs.metric_type, obs.clone());
        }
    }
    latest
}

/// Observations whose timestamp lies inside the policy's window.
pub fn within_window(observations: &[Observation], policy: &RetentionPolicy) -> Vec<Observation> {
    observations
        .iter()
        .filter(|obs| policy.within_window(obs.timestamp))
        .cloned()
        .collect()
}

/// Mean value per calendar day and metric.
///
/// Combinations without observations are absent rather than zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyPivot {
    /// Reference timezone used to assign days
    pub timezone: Tz,
    cells: BTreeMap<NaiveDate, BTreeMap<MetricType, f64>>,
}

impl DailyPivot {
    pub fn get(&self, date: NaiveDate, metric: MetricType) -> Option<f64> {
        self.cells.get(&date).and_then(|row| row.get(&metric)).copied()
    }

    /// Days with at least one cell, ascending.
    pub fn dates(&self) -> impl Iterator<Item = NaiveDate> + '_ {
        self.cells.keys().copied()
    }

    /// Metrics with at least one cell, in metric order.
    pub fn metrics(&self) -> Vec<MetricType> {
        let mut metrics: Vec<MetricType> = self
            .cells
            .values()
            .flat_map(|row| row.keys().copied())
            .collect();
        metrics.sort();
        metrics.dedup();
        metrics
    }

    /// One row per day.
    pub fn rows(&self) -> impl Iterator<Item = (NaiveDate, &BTreeMap<MetricType, f64>)> + '_ {
        self.cells.iter().map(|(date, row)| (*date, row))
    }

    /// Number of populated (date, metric) cells.
    pub fn cell_count(&self) -> usize {
        self.cells.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}

/// Running sum and count for one pivot cell.
#[derive(Debug, Default, Clone, Copy)]
struct MeanAccumulator {
    sum: f64,
    count: u32,
}

impl MeanAccumulator {
    fn push(&mut self, value: f64) {
        self.sum += value;
        self.count += 1;
    }

    fn mean(self) -> f64 {
        self.sum / f64::from(self.count)
    }
}

/// Group observations by (calendar day in `tz`, metric) and average them.
pub fn daily_mean_pivot(observations: &[Observation], tz: Tz) -> DailyPivot {
    let mut sums: BTreeMap<(NaiveDate, MetricType), MeanAccumulator> = BTreeMap::new();
    for obs in observations {
        let date = obs.timestamp.with_timezone(&tz).date_naive();
        sums.entry((date, obs.metric_type)).or_default().push(obs.value);
    }

    let mut cells: BTreeMap<NaiveDate, BTreeMap<MetricType, f64>> = BTreeMap::new();
    for ((date, metric), acc) in sums {
        cells.entry(date).or_default().insert(metric, acc.mean());
    }

    DailyPivot {
        timezone: tz,
        cells,
    }
}

/// Descriptive statistics for one metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricStats {
    pub count: usize,
    pub mean: f64,
    /// Sample standard deviation; absent with fewer than two values
    pub std_dev: Option<f64>,
    pub min: f64,
    pub max: f64,
}

/// Per-metric statistics over raw observation values.
pub fn metric_stats(observations: &[Observation]) -> BTreeMap<MetricType, MetricStats> {
    let mut grouped: BTreeMap<MetricType, Vec<f64>> = BTreeMap::new();
    for obs in observations {
        grouped.entry(obs.metric_type).or_default().push(obs.value);
    }

    grouped
        .into_iter()
        .map(|(metric, values)| {
            let std_dev = if values.len() >= 2 {
                Some(values.iter().std_dev())
            } else {
                None
            };
            let stats = MetricStats {
                count: values.len(),
                mean: values.iter().mean(),
                std_dev,
                min: Statistics::min(values.iter()),
                max: Statistics::max(values.iter()),
            };
            (metric, stats)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration, TimeZone, Utc};

    fn obs(metric_type: MetricType, timestamp: DateTime<Utc>, value: f64) -> Observation {
        Observation {
            metric_type,
            timestamp,
            value,
            unit: None,
        }
    }

    fn at(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, day, hour, 0, 0).unwrap()
    }

    #[test]
    fn test_latest_by_type() {
        let observations = vec![
            obs(MetricType::BodyMass, at(2, 8), 81.0),
            obs(MetricType::BodyMass, at(5, 8), 80.0),
            obs(MetricType::BodyMass, at(3, 8), 82.0),
            obs(MetricType::Height, at(1, 8), 180.0),
        ];
        let latest = latest_by_type(&observations);
        assert_eq!(latest[&MetricType::BodyMass].value, 80.0);
        assert_eq!(latest[&MetricType::Height].value, 180.0);
        assert!(!latest.contains_key(&MetricType::HeartRate));
    }

    #[test]
    fn test_latest_tie_last_seen_wins() {
        let observations = vec![
            obs(MetricType::BodyMass, at(5, 8), 80.0),
            obs(MetricType::BodyMass, at(5, 8), 79.5),
        ];
        assert_eq!(latest_by_type(&observations)[&MetricType::BodyMass].value, 79.5);
    }

    #[test]
    fn test_daily_mean_pivot() {
        let observations = vec![
            obs(MetricType::HeartRate, at(1, 8), 60.0),
            obs(MetricType::HeartRate, at(1, 20), 80.0),
            obs(MetricType::StepCount, at(1, 12), 1000.0),
            obs(MetricType::HeartRate, at(2, 9), 65.0),
        ];
        let pivot = daily_mean_pivot(&observations, Tz::UTC);
        let day1 = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let day2 = NaiveDate::from_ymd_opt(2024, 3, 2).unwrap();

        assert_eq!(pivot.get(day1, MetricType::HeartRate), Some(70.0));
        assert_eq!(pivot.get(day1, MetricType::StepCount), Some(1000.0));
        assert_eq!(pivot.get(day2, MetricType::HeartRate), Some(65.0));
        assert_eq!(pivot.get(day2, MetricType::StepCount), None);
        assert_eq!(pivot.cell_count(), 3);
        assert_eq!(pivot.metrics(), vec![MetricType::StepCount, MetricType::HeartRate]);

        assert_eq!(daily_mean_pivot(&observations, Tz::UTC), pivot);
    }

    #[test]
    fn test_pivot_day_follows_reference_timezone() {
        // 23:00 UTC is already the next day in Berlin.
        let observations = vec![obs(MetricType::HeartRate, at(1, 23), 60.0)];
        let berlin = daily_mean_pivot(&observations, chrono_tz::Europe::Berlin);
        let utc = daily_mean_pivot(&observations, Tz::UTC);

        assert_eq!(
            berlin.dates().collect::<Vec<_>>(),
            vec![NaiveDate::from_ymd_opt(2024, 3, 2).unwrap()]
        );
        assert_eq!(
            utc.dates().collect::<Vec<_>>(),
            vec![NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()]
        );
    }

    #[test]
    fn test_within_window_boundary() {
        let now = at(20, 0);
        let policy = RetentionPolicy::trailing_days(now, 7);
        let observations = vec![
            obs(MetricType::StepCount, policy.cutoff - Duration::seconds(1), 1.0),
            obs(MetricType::StepCount, policy.cutoff, 2.0),
            obs(MetricType::BodyMass, at(1, 0), 80.0),
        ];
        let recent = within_window(&observations, &policy);
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].value, 2.0);
    }

    #[test]
    fn test_metric_stats() {
        let observations = vec![
            obs(MetricType::HeartRate, at(1, 0), 60.0),
            obs(MetricType::HeartRate, at(1, 1), 70.0),
            obs(MetricType::HeartRate, at(1, 2), 80.0),
            obs(MetricType::BodyMass, at(1, 0), 80.0),
        ];
        let stats = metric_stats(&observations);
        let hr = &stats[&MetricType::HeartRate];
        assert_eq!(hr.count, 3);
        assert!((hr.mean - 70.0).abs() < 1e-9);
        assert!((hr.std_dev.unwrap() - 10.0).abs() < 1e-9);
        assert_eq!(hr.min, 60.0);
        assert_eq!(hr.max, 80.0);
        assert_eq!(stats[&MetricType::BodyMass].std_dev, None);
    }
}

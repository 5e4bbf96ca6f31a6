//! Record types shared by the extractor and the aggregator.
//!
//! Only allow-listed metric types are ever represented; everything else in
//! the export is skipped at the tokenizer boundary.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// A health metric this crate knows how to extract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MetricType {
    BodyMass,
    Height,
    StepCount,
    HeartRate,
    #[serde(rename = "distance")]
    DistanceWalkingRunning,
    #[serde(rename = "sleep")]
    SleepAnalysis,
    #[serde(rename = "bp-systolic")]
    BloodPressureSystolic,
    #[serde(rename = "bp-diastolic")]
    BloodPressureDiastolic,
}

/// How long observations of a metric are kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetentionCategory {
    /// Kept regardless of age (needed for latest-value lookups).
    Always,
    /// Kept only inside the trailing retention window.
    Window,
}

impl MetricType {
    /// Every supported metric, in display order.
    pub const ALL: [MetricType; 8] = [
        MetricType::BodyMass,
        MetricType::Height,
        MetricType::StepCount,
        MetricType::HeartRate,
        MetricType::DistanceWalkingRunning,
        MetricType::SleepAnalysis,
        MetricType::BloodPressureSystolic,
        MetricType::BloodPressureDiastolic,
    ];

    /// The identifier used in the `type` attribute of export records.
    pub fn identifier(self) -> &'static str {
        match self {
            MetricType::BodyMass => "HKQuantityTypeIdentifierBodyMass",
            MetricType::Height => "HKQuantityTypeIdentifierHeight",
            MetricType::StepCount => "HKQuantityTypeIdentifierStepCount",
            MetricType::HeartRate => "HKQuantityTypeIdentifierHeartRate",
            MetricType::DistanceWalkingRunning => "HKQuantityTypeIdentifierDistanceWalkingRunning",
            MetricType::SleepAnalysis => "HKCategoryTypeIdentifierSleepAnalysis",
            MetricType::BloodPressureSystolic => "HKQuantityTypeIdentifierBloodPressureSystolic",
            MetricType::BloodPressureDiastolic => "HKQuantityTypeIdentifierBloodPressureDiastolic",
        }
    }

    /// Short kebab-case name used on the command line and in exports.
    pub fn short_name(self) -> &'static str {
        match self {
            MetricType::BodyMass => "body-mass",
            MetricType::Height => "height",
            MetricType::StepCount => "step-count",
            MetricType::HeartRate => "heart-rate",
            MetricType::DistanceWalkingRunning => "distance",
            MetricType::SleepAnalysis => "sleep",
            MetricType::BloodPressureSystolic => "bp-systolic",
            MetricType::BloodPressureDiastolic => "bp-diastolic",
        }
    }

    /// Unit assumed when a record carries no `unit` attribute.
    pub fn default_unit(self) -> &'static str {
        match self {
            MetricType::BodyMass => "kg",
            MetricType::Height => "cm",
            MetricType::StepCount => "count",
            MetricType::HeartRate => "count/min",
            MetricType::DistanceWalkingRunning => "km",
            MetricType::SleepAnalysis => "h",
            MetricType::BloodPressureSystolic | MetricType::BloodPressureDiastolic => "mmHg",
        }
    }

    pub fn retention(self) -> RetentionCategory {
        match self {
            MetricType::BodyMass | MetricType::Height => RetentionCategory::Always,
            MetricType::StepCount
            | MetricType::HeartRate
            | MetricType::DistanceWalkingRunning
            | MetricType::SleepAnalysis
            | MetricType::BloodPressureSystolic
            | MetricType::BloodPressureDiastolic => RetentionCategory::Window,
        }
    }

    /// Look up a metric by its export identifier.
    pub fn from_identifier(identifier: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|metric| metric.identifier() == identifier)
    }
}

impl fmt::Display for MetricType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.short_name())
    }
}

/// Error returned when a metric name is not recognized.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown metric type '{0}'")]
pub struct UnknownMetric(pub String);

impl FromStr for MetricType {
    type Err = UnknownMetric;

    /// Accepts the short name (case-insensitive) or the full export identifier.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        Self::ALL
            .into_iter()
            .find(|metric| {
                metric.short_name().eq_ignore_ascii_case(trimmed) || metric.identifier() == trimmed
            })
            .ok_or_else(|| UnknownMetric(trimmed.to_string()))
    }
}

/// The type allow-list: which metrics survive extraction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MetricSet(BTreeSet<MetricType>);

impl MetricSet {
    pub fn new(metrics: impl IntoIterator<Item = MetricType>) -> Self {
        Self(metrics.into_iter().collect())
    }

    /// Every supported metric.
    pub fn all() -> Self {
        Self::new(MetricType::ALL)
    }

    /// Parse a comma-separated list of metric names; `all` selects everything.
    pub fn from_csv(s: &str) -> Result<Self, UnknownMetric> {
        let mut set = BTreeSet::new();
        for name in s.split(',').map(str::trim).filter(|n| !n.is_empty()) {
            if name.eq_ignore_ascii_case("all") {
                return Ok(Self::all());
            }
            set.insert(name.parse()?);
        }
        Ok(Self(set))
    }

    pub fn contains(&self, metric: MetricType) -> bool {
        self.0.contains(&metric)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = MetricType> + '_ {
        self.0.iter().copied()
    }
}

impl Default for MetricSet {
    fn default() -> Self {
        Self::new([
            MetricType::BodyMass,
            MetricType::Height,
            MetricType::StepCount,
            MetricType::HeartRate,
        ])
    }
}

/// One record as read from the export document.
///
/// Attribute values are kept verbatim; parsing into an
/// [`Observation`](crate::core::Observation) happens in the aggregator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawRecord {
    pub metric_type: MetricType,
    pub start_date: String,
    pub end_date: Option<String>,
    pub value: Option<String>,
    pub unit: Option<String>,
}

/// Why a single record was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    UnlistedType,
    UnparseableTimestamp,
    OutsideWindow,
    UnparseableValue,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            SkipReason::UnlistedType => "type not in allow-list",
            SkipReason::UnparseableTimestamp => "unparseable timestamp",
            SkipReason::OutsideWindow => "outside retention window",
            SkipReason::UnparseableValue => "unparseable value",
        };
        f.write_str(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identifier_lookup() {
        assert_eq!(
            MetricType::from_identifier("HKQuantityTypeIdentifierBodyMass"),
            Some(MetricType::BodyMass)
        );
        assert_eq!(
            MetricType::from_identifier("HKCategoryTypeIdentifierSleepAnalysis"),
            Some(MetricType::SleepAnalysis)
        );
        assert_eq!(
            MetricType::from_identifier("HKQuantityTypeIdentifierBodyFatPercentage"),
            None
        );
    }

    #[test]
    fn test_metric_from_str() {
        assert_eq!("heart-rate".parse::<MetricType>(), Ok(MetricType::HeartRate));
        assert_eq!("Sleep".parse::<MetricType>(), Ok(MetricType::SleepAnalysis));
        assert_eq!(
            "HKQuantityTypeIdentifierStepCount".parse::<MetricType>(),
            Ok(MetricType::StepCount)
        );
        assert!("calories".parse::<MetricType>().is_err());
    }

    #[test]
    fn test_every_metric_has_one_category() {
        let always: Vec<_> = MetricType::ALL
            .into_iter()
            .filter(|m| m.retention() == RetentionCategory::Always)
            .collect();
        assert_eq!(always, vec![MetricType::BodyMass, MetricType::Height]);
    }

    #[test]
    fn test_metric_set_parsing() {
        let set = MetricSet::from_csv("body-mass, heart-rate").unwrap();
        assert!(set.contains(MetricType::BodyMass));
        assert!(set.contains(MetricType::HeartRate));
        assert!(!set.contains(MetricType::StepCount));

        let set = MetricSet::from_csv("all").unwrap();
        assert_eq!(set, MetricSet::all());

        assert!(MetricSet::from_csv("body-mass,nonsense").is_err());
    }

    #[test]
    fn test_serde_names_match_short_names() {
        for metric in MetricType::ALL {
            let json = serde_json::to_string(&metric).unwrap();
            assert_eq!(json, format!("\"{}\"", metric.short_name()));
        }
    }
}

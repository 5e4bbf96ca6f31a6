//! Typed observations built from raw records.

use crate::extract::timestamp::parse_timestamp;
use crate::extract::types::{MetricType, RawRecord, SkipReason};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

/// A validated health measurement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub metric_type: MetricType,
    /// When the measurement started, normalized to UTC
    pub timestamp: DateTime<Utc>,
    pub value: f64,
    /// Unit as given by the source, if any
    pub unit: Option<String>,
}

impl Observation {
    /// The unit of `value`, falling back to the metric's default.
    pub fn unit_or_default(&self) -> &str {
        self.unit
            .as_deref()
            .unwrap_or_else(|| self.metric_type.default_unit())
    }
}

/// Observations plus the number of records dropped while converting.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObservationSet {
    pub observations: Vec<Observation>,
    pub skipped_timestamp: usize,
    pub skipped_value: usize,
}

/// Sleep categories that count as time asleep.
const ASLEEP_PREFIX: &str = "HKCategoryValueSleepAnalysisAsleep";

/// Convert one raw record, reporting why it was rejected.
pub fn observation_from_raw(raw: &RawRecord, tz: Tz) -> Result<Observation, SkipReason> {
    let timestamp =
        parse_timestamp(&raw.start_date, tz).ok_or(SkipReason::UnparseableTimestamp)?;

    let (value, unit) = match raw.metric_type {
        MetricType::SleepAnalysis => (sleep_hours(raw, timestamp, tz)?, Some("h".to_string())),
        _ => (parse_value(raw.value.as_deref())?, raw.unit.clone()),
    };

    Ok(Observation {
        metric_type: raw.metric_type,
        timestamp,
        value,
        unit,
    })
}

/// Convert raw records, dropping the ones that fail to parse.
///
/// Encounter order is preserved.
pub fn to_observations<I>(raw: I, tz: Tz) -> ObservationSet
where
    I: IntoIterator<Item = RawRecord>,
{
    let mut set = ObservationSet::default();
    for record in raw {
        match observation_from_raw(&record, tz) {
            Ok(observation) => set.observations.push(observation),
            Err(SkipReason::UnparseableTimestamp) => set.skipped_timestamp += 1,
            Err(reason) => {
                tracing::trace!(%reason, metric = %record.metric_type, "dropping record");
                set.skipped_value += 1;
            }
        }
    }

    if set.skipped_timestamp + set.skipped_value > 0 {
        tracing::debug!(
            skipped_timestamp = set.skipped_timestamp,
            skipped_value = set.skipped_value,
            "dropped unparseable records"
        );
    }
    set
}

fn parse_value(value: Option<&str>) -> Result<f64, SkipReason> {
    value
        .and_then(|v| v.trim().parse::<f64>().ok())
        .filter(|v| v.is_finite())
        .ok_or(SkipReason::UnparseableValue)
}

/// Hours asleep for a sleep-analysis record; in-bed and awake samples are
/// rejected.
fn sleep_hours(raw: &RawRecord, start: DateTime<Utc>, tz: Tz) -> Result<f64, SkipReason> {
    let asleep = raw
        .value
        .as_deref()
        .is_some_and(|v| v.starts_with(ASLEEP_PREFIX));
    if !asleep {
        return Err(SkipReason::UnparseableValue);
    }

    let end = raw
        .end_date
        .as_deref()
        .and_then(|end| parse_timestamp(end, tz))
        .ok_or(SkipReason::UnparseableValue)?;
    if end < start {
        return Err(SkipReason::UnparseableValue);
    }
    Ok((end - start).num_seconds() as f64 / 3600.0)
}

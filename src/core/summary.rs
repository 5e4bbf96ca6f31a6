//! Summary report builder.
//!
//! A [`HealthSummary`] collects the scalars a dashboard shows next to the
//! charts: latest values, BMI, data span and per-metric statistics.

use crate::core::aggregate::{metric_stats, DailyPivot, MetricStats};
use crate::core::derived::{
    age_from_birth_date, age_from_birth_year, body_mass_index, data_span_years, Bmi,
};
use crate::core::observation::Observation;
use crate::extract::stream::ExtractionReport;
use crate::extract::types::MetricType;
use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// The name of this producer.
pub const PRODUCER_NAME: &str = "health-twin";

/// Latest reading of one metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatestReading {
    pub value: f64,
    pub unit: String,
    pub observed_at: DateTime<Utc>,
}

impl From<&Observation> for LatestReading {
    fn from(obs: &Observation) -> Self {
        Self {
            value: obs.value,
            unit: obs.unit_or_default().to_string(),
            observed_at: obs.timestamp,
        }
    }
}

/// Producer metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Producer {
    pub name: String,
    pub version: String,
}

/// Scalar summary of one analysis run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthSummary {
    pub report_id: Uuid,
    pub producer: Producer,
    pub generated_at: DateTime<Utc>,
    /// Archive member the records were read from
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    pub extraction: ExtractionReport,
    /// Observations in the full retained set
    pub observation_count: usize,
    /// Records dropped during conversion (bad timestamp or value)
    pub dropped_records: usize,
    pub window_days: u32,
    /// Days with data inside the window
    pub recent_days: usize,
    pub latest: BTreeMap<MetricType, LatestReading>,
    /// Absent when weight or height is unavailable
    pub bmi: Option<Bmi>,
    /// Rough span of recorded data in years, see [`data_span_years`]
    pub data_span_years: Option<i32>,
    pub age_years: Option<i32>,
    pub statistics: BTreeMap<MetricType, MetricStats>,
}

/// Personal details used for derived metrics.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Profile {
    pub height_m: Option<f64>,
    pub birth_date: Option<NaiveDate>,
    pub birth_year: Option<i32>,
}

/// Builder for [`HealthSummary`] reports.
pub struct SummaryBuilder {
    now: DateTime<Utc>,
    tz: Tz,
    window_days: u32,
    profile: Profile,
    source: Option<String>,
}

impl SummaryBuilder {
    pub fn new(now: DateTime<Utc>, tz: Tz, window_days: u32) -> Self {
        Self {
            now,
            tz,
            window_days,
            profile: Profile::default(),
            source: None,
        }
    }

    pub fn with_profile(mut self, profile: Profile) -> Self {
        self.profile = profile;
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Build the summary.
    ///
    /// `latest` comes from the full retained set; `recent` is the windowed
    /// pivot.
    pub fn build(
        &self,
        observations: &[Observation],
        latest: &BTreeMap<MetricType, Observation>,
        recent: &DailyPivot,
        extraction: &ExtractionReport,
        dropped_records: usize,
    ) -> HealthSummary {
        let bmi = body_mass_index(
            latest.get(&MetricType::BodyMass),
            latest.get(&MetricType::Height),
            self.profile.height_m,
        );
        if bmi.is_none() {
            tracing::debug!("BMI unavailable, weight or height missing");
        }

        let today = self.now.with_timezone(&self.tz).date_naive();
        let age_years = match (self.profile.birth_date, self.profile.birth_year) {
            (Some(date), _) => age_from_birth_date(date, today),
            (None, Some(year)) => age_from_birth_year(year, today),
            (None, None) => None,
        };

        HealthSummary {
            report_id: Uuid::new_v4(),
            producer: Producer {
                name: PRODUCER_NAME.to_string(),
                version: crate::VERSION.to_string(),
            },
            generated_at: self.now,
            source: self.source.clone(),
            extraction: extraction.clone(),
            observation_count: observations.len(),
            dropped_records,
            window_days: self.window_days,
            recent_days: recent.dates().count(),
            latest: latest
                .iter()
                .map(|(metric, obs)| (*metric, LatestReading::from(obs)))
                .collect(),
            bmi,
            data_span_years: data_span_years(observations, self.now, self.tz),
            age_years,
            statistics: metric_stats(observations),
        }
    }
}

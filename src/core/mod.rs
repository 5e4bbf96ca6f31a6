//! Core aggregation for health-twin.
//!
//! This module contains:
//! - Conversion of raw records into typed observations
//! - Latest-value lookup, windowing and the daily mean pivot
//! - Derived metrics (BMI, data span, age)
//! - The summary report builder

pub mod aggregate;
pub mod derived;
pub mod observation;
pub mod summary;

// Re-export commonly used types
pub use aggregate::{
    daily_mean_pivot, latest_by_type, metric_stats, within_window, DailyPivot, MetricStats,
};
pub use derived::{body_mass_index, data_span_years, Bmi, BmiCategory, HeightSource};
pub use observation::{observation_from_raw, to_observations, Observation, ObservationSet};
pub use summary::{HealthSummary, LatestReading, Profile, SummaryBuilder, PRODUCER_NAME};

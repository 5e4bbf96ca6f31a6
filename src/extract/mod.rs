//! Streaming extraction of health records from an export document.
//!
//! This module contains:
//! - The metric vocabulary and the type allow-list
//! - Tolerant timestamp parsing
//! - Retention rules (always-kept vs. windowed metrics)
//! - The bounded-memory record stream

pub mod retention;
pub mod stream;
pub mod timestamp;
pub mod types;

// Re-export commonly used types
pub use retention::RetentionPolicy;
pub use stream::{
    ExtractError, ExtractOptions, ExtractionReport, Extractor, RecordStream, DEFAULT_RECORD_CAP,
};
pub use timestamp::parse_timestamp;
pub use types::{MetricSet, MetricType, RawRecord, RetentionCategory, SkipReason, UnknownMetric};

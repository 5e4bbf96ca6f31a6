//! health-twin - summarize exported personal health archives.
//!
//! This library reads the `export.xml` document from a health export
//! archive, extracts a small set of metrics and turns them into a tidy
//! table, latest-value lookups and a daily mean pivot.
//!
//! # Guarantees
//!
//! - **Bounded memory**: the document is streamed; no tree is ever built
//! - **Bounded work**: scanning stops after a configurable record cap
//! - **Tolerant**: a bad timestamp or value skips one record, never the run
//! - **Local only**: nothing leaves the machine
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                         health-twin                          │
//! ├──────────────────────────────────────────────────────────────┤
//! │  ┌─────────────┐   ┌─────────────┐   ┌─────────────┐         │
//! │  │   Archive   │──▶│  Extractor  │──▶│ Aggregator  │         │
//! │  │ (export.xml)│   │ (streaming) │   │ (pivot/BMI) │         │
//! │  └─────────────┘   └─────────────┘   └─────────────┘         │
//! │                                             │                │
//! │                                             ▼                │
//! │                    ┌─────────────┐   ┌─────────────┐         │
//! │                    │    Cache    │◀──│   Summary   │         │
//! │                    │ (optional)  │   │  / Export   │         │
//! │                    └─────────────┘   └─────────────┘         │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use health_twin::{analyze_archive, AnalysisSettings, RunHooks};
//!
//! let file = std::fs::File::open("export.zip").expect("archive");
//! let analysis = analyze_archive(
//!     file,
//!     &AnalysisSettings::default(),
//!     chrono::Utc::now(),
//!     RunHooks::default(),
//! )
//! .expect("analysis");
//!
//! if let Some(bmi) = &analysis.summary.bmi {
//!     println!("BMI: {:.1}", bmi.rounded());
//! }
//! ```

pub mod archive;
pub mod cache;
pub mod config;
pub mod core;
pub mod export;
pub mod extract;
pub mod pipeline;

// Re-export key types at crate root for convenience
pub use archive::{ArchiveError, ExportArchive, EXPORT_FILE_NAME};
pub use cache::{CacheError, Fingerprint, ResultCache};
pub use config::{AnalysisSettings, Config, ConfigError};
pub use core::{
    daily_mean_pivot, latest_by_type, to_observations, Bmi, DailyPivot, HealthSummary,
    Observation, SummaryBuilder,
};
pub use export::{ExportError, ExportFormat};
pub use extract::{
    ExtractError, ExtractOptions, ExtractionReport, Extractor, MetricSet, MetricType, RawRecord,
    RetentionPolicy,
};
pub use pipeline::{
    analyze_archive, analyze_archive_cached, analyze_document, end_of_day, Analysis, AnalysisCache,
    AnalysisError, RunHooks,
};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Privacy notice that can be displayed to users.
pub const PRIVACY_NOTICE: &str = r#"
╔══════════════════════════════════════════════════════════════════╗
║                 HEALTH-TWIN - PRIVACY NOTICE                     ║
╠══════════════════════════════════════════════════════════════════╣
║                                                                  ║
║  Your health export is processed on this machine only.           ║
║                                                                  ║
║  ✓ WHAT WE READ:                                                 ║
║    • Body mass and height                                        ║
║    • Step count and heart rate                                   ║
║    • Optionally distance, sleep and blood pressure               ║
║                                                                  ║
║  ✗ WHAT WE NEVER DO:                                             ║
║    • Upload records anywhere                                     ║
║    • Read record types you did not select                        ║
║    • Keep the archive itself                                     ║
║                                                                  ║
║  Cached results live in the cache directory and can be removed   ║
║  at any time with:                                               ║
║    health-twin cache clear                                       ║
║                                                                  ║
╚══════════════════════════════════════════════════════════════════╝
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_privacy_notice_contents() {
        assert!(PRIVACY_NOTICE.contains("PRIVACY"));
        assert!(PRIVACY_NOTICE.contains("NEVER DO"));
        assert!(PRIVACY_NOTICE.contains("cache clear"));
    }
}

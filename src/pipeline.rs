//! One analysis pass: archive -> extractor -> aggregator.
//!
//! The extractor is drained completely before aggregation starts.

use crate::archive::{ArchiveError, ExportArchive};
use crate::cache::{CacheError, Fingerprint, ResultCache};
use crate::config::AnalysisSettings;
use crate::core::aggregate::{daily_mean_pivot, latest_by_type, within_window, DailyPivot};
use crate::core::observation::{to_observations, Observation};
use crate::core::summary::{HealthSummary, Profile, SummaryBuilder};
use crate::extract::retention::RetentionPolicy;
use crate::extract::stream::{ExtractError, ExtractOptions, ExtractionReport, Extractor};
use crate::extract::types::MetricType;
use chrono::{DateTime, Duration, TimeZone, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

/// Fatal errors of an analysis run.
#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    #[error(transparent)]
    Archive(#[from] ArchiveError),
    #[error(transparent)]
    Extract(#[from] ExtractError),
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Cache of complete analysis results.
pub type AnalysisCache = ResultCache<Analysis>;

/// Everything one run produces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Analysis {
    /// Retained observations in document order (the tidy table)
    pub observations: Vec<Observation>,
    /// Most recent observation per metric over the full retained set
    pub latest: BTreeMap<MetricType, Observation>,
    /// Daily means over the retention window
    pub recent_pivot: DailyPivot,
    pub retention: RetentionPolicy,
    pub summary: HealthSummary,
}

impl Analysis {
    pub fn extraction(&self) -> &ExtractionReport {
        &self.summary.extraction
    }

    /// Observations inside the retention window.
    pub fn recent_observations(&self) -> Vec<Observation> {
        within_window(&self.observations, &self.retention)
    }
}

/// Optional hooks into a run.
#[derive(Default)]
pub struct RunHooks {
    pub cancel: Option<Arc<AtomicBool>>,
    pub progress: Option<Box<dyn FnMut(f64)>>,
}

/// Analyze a zipped export.
pub fn analyze_archive<R: Read + Seek>(
    reader: R,
    settings: &AnalysisSettings,
    now: DateTime<Utc>,
    hooks: RunHooks,
) -> Result<Analysis, AnalysisError> {
    let mut archive = ExportArchive::open(reader)?;
    let source = archive.member_name().to_string();
    let member = archive.open_member()?;
    run(BufReader::new(member), settings, now, hooks, Some(source))
}

/// Analyze a zipped export, reusing a cached result for the same archive
/// bytes, settings and local day.
///
/// The run is anchored on [`end_of_day`] so a cached result and a fresh run
/// on the same day see the same retention window.
pub fn analyze_archive_cached<R: Read + Seek>(
    mut reader: R,
    settings: &AnalysisSettings,
    now: DateTime<Utc>,
    hooks: RunHooks,
    cache: &mut AnalysisCache,
) -> Result<Analysis, AnalysisError> {
    let anchor = end_of_day(now, settings.timezone);
    let day = anchor.with_timezone(&settings.timezone).date_naive();

    let key = Fingerprint::compute(&mut reader, settings, day)?;
    if let Some(hit) = cache.get(&key) {
        tracing::info!(key = %key, "using cached analysis");
        return Ok(hit.clone());
    }

    reader.seek(SeekFrom::Start(0))?;
    let analysis = analyze_archive(reader, settings, anchor, hooks)?;
    if let Err(e) = cache.insert(key, analysis.clone()) {
        tracing::warn!(error = %e, "could not cache analysis result");
    }
    Ok(analysis)
}

/// The last instant of `now`'s calendar day in `tz`.
///
/// Falls back to `now` when the following midnight does not exist locally
/// and the hour after it does not either.
pub fn end_of_day(now: DateTime<Utc>, tz: Tz) -> DateTime<Utc> {
    let today = now.with_timezone(&tz).date_naive();
    today
        .succ_opt()
        .and_then(|next| next.and_hms_opt(0, 0, 0))
        .and_then(|midnight| {
            tz.from_local_datetime(&midnight)
                .earliest()
                .or_else(|| tz.from_local_datetime(&(midnight + Duration::hours(1))).earliest())
        })
        .map(|next_day| next_day.with_timezone(&Utc) - Duration::nanoseconds(1))
        .unwrap_or(now)
}

/// Analyze an export document that is already unpacked.
pub fn analyze_document<R: BufRead>(
    reader: R,
    settings: &AnalysisSettings,
    now: DateTime<Utc>,
    hooks: RunHooks,
) -> Result<Analysis, AnalysisError> {
    run(reader, settings, now, hooks, None)
}

fn run<R: BufRead>(
    reader: R,
    settings: &AnalysisSettings,
    now: DateTime<Utc>,
    hooks: RunHooks,
    source: Option<String>,
) -> Result<Analysis, AnalysisError> {
    let tz = settings.timezone;
    let retention = RetentionPolicy::trailing_days(now, settings.window_days);
    let options = ExtractOptions::new(settings.metrics.clone(), settings.record_cap)
        .with_retention(retention)
        .with_reference_tz(tz);

    let mut stream = Extractor::new(options).stream(reader);
    if let Some(flag) = hooks.cancel {
        stream = stream.with_cancel_flag(flag);
    }
    if let Some(progress) = hooks.progress {
        stream = stream.with_progress(progress);
    }

    let raw = stream.by_ref().collect::<Result<Vec<_>, _>>()?;
    let extraction = stream.into_report();
    tracing::info!(
        inspected = extraction.records_inspected,
        emitted = extraction.records_emitted,
        skipped = extraction.skipped(),
        cap_reached = extraction.cap_reached,
        "extraction finished"
    );

    let converted = to_observations(raw, tz);
    let dropped = converted.skipped_timestamp + converted.skipped_value;
    let observations = converted.observations;

    let latest = latest_by_type(&observations);
    let recent_pivot = daily_mean_pivot(&within_window(&observations, &retention), tz);

    let mut builder = SummaryBuilder::new(now, tz, settings.window_days).with_profile(Profile {
        height_m: settings.height_m(),
        birth_date: settings.birth_date,
        birth_year: settings.birth_year,
    });
    if let Some(source) = source {
        builder = builder.with_source(source);
    }
    let summary = builder.build(&observations, &latest, &recent_pivot, &extraction, dropped);

    tracing::info!(
        observations = observations.len(),
        recent_days = summary.recent_days,
        "analysis finished"
    );

    Ok(Analysis {
        observations,
        latest,
        recent_pivot,
        retention,
        summary,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_pipeline() {
        let now = Utc.with_ymd_and_hms(2024, 1, 15, 0, 0, 0).unwrap();
        let xml = r#"<HealthData>
<Record type="HKQuantityTypeIdentifierBodyMass" unit="kg" startDate="2024-01-01T00:00:00Z" value="88"/>
<Record type="HKQuantityTypeIdentifierHeight" unit="cm" startDate="2024-01-01T00:00:00Z" value="180"/>
<Record type="HKQuantityTypeIdentifierStepCount" unit="count" startDate="2024-01-14T08:00:00Z" value="4000"/>
<Record type="HKQuantityTypeIdentifierStepCount" unit="count" startDate="2024-01-14T18:00:00Z" value="abc"/>
</HealthData>"#;

        let analysis = analyze_document(
            xml.as_bytes(),
            &AnalysisSettings::default(),
            now,
            RunHooks::default(),
        )
        .unwrap();

        assert_eq!(analysis.observations.len(), 3);
        assert_eq!(analysis.summary.dropped_records, 1);
        assert_eq!(analysis.summary.bmi.as_ref().map(|b| b.rounded()), Some(27.2));
        assert_eq!(analysis.extraction().records_inspected, 4);
        assert!(analysis.summary.source.is_none());
        // Body mass and height from Jan 1 also fall inside the 30-day window.
        assert_eq!(analysis.recent_pivot.dates().count(), 2);
    }

    #[test]
    fn test_end_of_day() {
        let morning = Utc.with_ymd_and_hms(2024, 6, 1, 0, 30, 0).unwrap();
        let evening = Utc.with_ymd_and_hms(2024, 6, 1, 23, 30, 0).unwrap();
        let end = end_of_day(morning, Tz::UTC);

        assert_eq!(end, end_of_day(evening, Tz::UTC));
        assert_eq!(end.date_naive(), morning.date_naive());
        assert_eq!(
            end + Duration::nanoseconds(1),
            Utc.with_ymd_and_hms(2024, 6, 2, 0, 0, 0).unwrap()
        );

        // 23:30 UTC is already the next day in Berlin.
        let berlin = end_of_day(evening, chrono_tz::Europe::Berlin);
        assert_eq!(
            berlin + Duration::nanoseconds(1),
            Utc.with_ymd_and_hms(2024, 6, 2, 22, 0, 0).unwrap()
        );
    }
}

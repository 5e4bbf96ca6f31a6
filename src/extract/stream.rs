//! Streaming extraction of `Record` elements from an export document.
//!
//! The document is tokenized event by event with `quick-xml`; no tree is
//! ever built and the event buffer is cleared before every read, so peak
//! memory does not grow with document size.

use crate::extract::retention::RetentionPolicy;
use crate::extract::timestamp::parse_timestamp;
use crate::extract::types::{MetricSet, MetricType, RawRecord, SkipReason};
use chrono_tz::Tz;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use serde::{Deserialize, Serialize};
use std::io::BufRead;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Default number of `Record` elements inspected before scanning stops.
pub const DEFAULT_RECORD_CAP: usize = 50_000;

/// How often (in inspected records) the progress callback fires.
const PROGRESS_INTERVAL: usize = 5_000;

const RECORD_TAG: &[u8] = b"Record";

/// Fatal extraction errors. Per-record problems are skips, never errors.
#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("malformed export document at byte {position}: {reason}")]
    MalformedDocument { position: u64, reason: String },
    #[error("extraction cancelled after {inspected} records")]
    Cancelled { inspected: usize },
}

/// Settings for one extraction run.
#[derive(Debug, Clone)]
pub struct ExtractOptions {
    /// Type allow-list
    pub allow_list: MetricSet,
    /// Maximum number of `Record` elements to inspect (at least 1)
    pub record_cap: usize,
    /// Retention applied while scanning, if any
    pub retention: Option<RetentionPolicy>,
    /// Timezone for timestamps without an offset
    pub reference_tz: Tz,
}

impl ExtractOptions {
    pub fn new(allow_list: MetricSet, record_cap: usize) -> Self {
        Self {
            allow_list,
            record_cap: record_cap.max(1),
            retention: None,
            reference_tz: Tz::UTC,
        }
    }

    pub fn with_retention(mut self, policy: RetentionPolicy) -> Self {
        self.retention = Some(policy);
        self
    }

    pub fn with_reference_tz(mut self, tz: Tz) -> Self {
        self.reference_tz = tz;
        self
    }
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self::new(MetricSet::default(), DEFAULT_RECORD_CAP)
    }
}

/// Counters describing what an extraction run saw.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionReport {
    /// `Record` elements inspected (all types)
    pub records_inspected: usize,
    /// Records yielded to the caller
    pub records_emitted: usize,
    pub skipped_unlisted: usize,
    pub skipped_timestamp: usize,
    pub skipped_window: usize,
    /// The cap in effect
    pub record_cap: usize,
    /// Whether scanning stopped because the cap was reached
    pub cap_reached: bool,
}

impl ExtractionReport {
    fn new(record_cap: usize) -> Self {
        Self {
            record_cap,
            ..Self::default()
        }
    }

    /// Advisory progress in `[0, 1]`.
    pub fn progress(&self) -> f64 {
        if self.record_cap == 0 {
            return 1.0;
        }
        (self.records_inspected as f64 / self.record_cap as f64).min(1.0)
    }

    /// Total number of skipped records.
    pub fn skipped(&self) -> usize {
        self.skipped_unlisted + self.skipped_timestamp + self.skipped_window
    }

    fn record_skip(&mut self, reason: SkipReason) {
        match reason {
            SkipReason::UnlistedType => self.skipped_unlisted += 1,
            SkipReason::UnparseableTimestamp => self.skipped_timestamp += 1,
            SkipReason::OutsideWindow => self.skipped_window += 1,
            // Values are not parsed during extraction.
            SkipReason::UnparseableValue => {}
        }
    }
}

/// Creates record streams for a fixed set of options.
#[derive(Debug, Clone, Default)]
pub struct Extractor {
    options: ExtractOptions,
}

impl Extractor {
    pub fn new(options: ExtractOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &ExtractOptions {
        &self.options
    }

    /// Start a lazy scan over `reader`.
    pub fn stream<R: BufRead>(&self, reader: R) -> RecordStream<R> {
        RecordStream::new(reader, self.options.clone())
    }
}

/// The attributes of a `Record` element we care about.
#[derive(Debug, Default)]
struct RecordAttributes {
    kind: Option<String>,
    start_date: Option<String>,
    end_date: Option<String>,
    value: Option<String>,
    unit: Option<String>,
}

impl RecordAttributes {
    fn read(start: &BytesStart<'_>) -> Result<Self, String> {
        let mut attrs = Self::default();
        for attr in start.attributes() {
            let attr = attr.map_err(|e| e.to_string())?;
            let slot = match attr.key.as_ref() {
                b"type" => &mut attrs.kind,
                b"startDate" => &mut attrs.start_date,
                b"endDate" => &mut attrs.end_date,
                b"value" => &mut attrs.value,
                b"unit" => &mut attrs.unit,
                _ => continue,
            };
            let value = attr.unescape_value().map_err(|e| e.to_string())?;
            *slot = Some(value.into_owned());
        }
        Ok(attrs)
    }
}

/// Element nesting seen so far, used to reject documents that tokenize but
/// are not a single well-formed root element.
#[derive(Debug, Default)]
struct Nesting {
    depth: usize,
    root_seen: bool,
}

impl Nesting {
    fn open(&mut self) -> Result<(), String> {
        self.enter_root()?;
        self.depth += 1;
        Ok(())
    }

    fn empty(&mut self) -> Result<(), String> {
        self.enter_root()
    }

    fn close(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }

    fn enter_root(&mut self) -> Result<(), String> {
        if self.depth == 0 {
            if self.root_seen {
                return Err("content after the root element".to_string());
            }
            self.root_seen = true;
        }
        Ok(())
    }

    fn text(&self, raw: &[u8]) -> Result<(), String> {
        let raw = raw.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(raw);
        if self.depth == 0 && !raw.iter().all(u8::is_ascii_whitespace) {
            return Err("text outside the root element".to_string());
        }
        Ok(())
    }

    fn complete(&self) -> Result<(), String> {
        if !self.root_seen {
            return Err("no root element found".to_string());
        }
        if self.depth > 0 {
            return Err(format!(
                "document ended with {} unclosed element(s)",
                self.depth
            ));
        }
        Ok(())
    }
}

/// Outcome of reading one event.
enum Step {
    Record(Result<RecordAttributes, String>),
    Malformed(String),
    Eof,
    Skip,
}

/// A lazy, finite, non-restartable sequence of [`RawRecord`]s.
///
/// Yields `Err` at most once; the stream is fused afterwards. A document
/// that ends before its root element is closed, has no root element or
/// carries text outside it is malformed.
pub struct RecordStream<R: BufRead> {
    reader: Reader<R>,
    buf: Vec<u8>,
    options: ExtractOptions,
    report: ExtractionReport,
    nesting: Nesting,
    finished: bool,
    cancel: Option<Arc<AtomicBool>>,
    progress: Option<Box<dyn FnMut(f64)>>,
}

impl<R: BufRead> RecordStream<R> {
    fn new(reader: R, options: ExtractOptions) -> Self {
        let mut reader = Reader::from_reader(reader);
        reader.config_mut().trim_text(true);
        let report = ExtractionReport::new(options.record_cap);

        Self {
            reader,
            buf: Vec::new(),
            options,
            report,
            nesting: Nesting::default(),
            finished: false,
            cancel: None,
            progress: None,
        }
    }

    /// Stop with [`ExtractError::Cancelled`] once `flag` is set.
    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    /// Receive advisory progress updates.
    pub fn with_progress(mut self, callback: impl FnMut(f64) + 'static) -> Self {
        self.progress = Some(Box::new(callback));
        self
    }

    /// Counters so far.
    pub fn report(&self) -> &ExtractionReport {
        &self.report
    }

    /// Whether the record cap stopped the scan.
    pub fn cap_reached(&self) -> bool {
        self.report.cap_reached
    }

    pub fn into_report(self) -> ExtractionReport {
        self.report
    }

    fn finish(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        if self.report.cap_reached {
            tracing::warn!(
                record_cap = self.report.record_cap,
                "record cap reached, remaining records were not inspected"
            );
        }
        let progress = self.report.progress();
        if let Some(callback) = self.progress.as_mut() {
            callback(if self.report.cap_reached { 1.0 } else { progress });
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Relaxed))
    }

    fn malformed(&mut self, reason: String) -> ExtractError {
        let position = self.reader.buffer_position() as u64;
        self.finish();
        ExtractError::MalformedDocument { position, reason }
    }

    /// Apply the allow-list, timestamp check and retention to one element.
    fn inspect_record(&self, attrs: RecordAttributes) -> Result<RawRecord, SkipReason> {
        let metric_type = attrs
            .kind
            .as_deref()
            .and_then(MetricType::from_identifier)
            .filter(|metric| self.options.allow_list.contains(*metric))
            .ok_or(SkipReason::UnlistedType)?;

        let start_date = attrs.start_date.ok_or(SkipReason::UnparseableTimestamp)?;
        let timestamp = parse_timestamp(&start_date, self.options.reference_tz)
            .ok_or(SkipReason::UnparseableTimestamp)?;

        if let Some(policy) = &self.options.retention {
            if !policy.retains(metric_type, timestamp) {
                return Err(SkipReason::OutsideWindow);
            }
        }

        Ok(RawRecord {
            metric_type,
            start_date,
            end_date: attrs.end_date,
            value: attrs.value,
            unit: attrs.unit,
        })
    }
}

impl<R: BufRead> Iterator for RecordStream<R> {
    type Item = Result<RawRecord, ExtractError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        loop {
            self.buf.clear();
            let step = match self.reader.read_event_into(&mut self.buf) {
                Ok(Event::Start(e)) => match self.nesting.open() {
                    Ok(()) if e.name().as_ref() == RECORD_TAG => {
                        Step::Record(RecordAttributes::read(&e))
                    }
                    Ok(()) => Step::Skip,
                    Err(reason) => Step::Malformed(reason),
                },
                Ok(Event::Empty(e)) => match self.nesting.empty() {
                    Ok(()) if e.name().as_ref() == RECORD_TAG => {
                        Step::Record(RecordAttributes::read(&e))
                    }
                    Ok(()) => Step::Skip,
                    Err(reason) => Step::Malformed(reason),
                },
                Ok(Event::End(_)) => {
                    self.nesting.close();
                    Step::Skip
                }
                Ok(Event::Text(text)) => match self.nesting.text(&text) {
                    Ok(()) => Step::Skip,
                    Err(reason) => Step::Malformed(reason),
                },
                Ok(Event::CData(_)) if self.nesting.depth == 0 => {
                    Step::Malformed("character data outside the root element".to_string())
                }
                Ok(Event::Eof) => match self.nesting.complete() {
                    Ok(()) => Step::Eof,
                    Err(reason) => Step::Malformed(reason),
                },
                Ok(_) => Step::Skip,
                Err(e) => Step::Malformed(e.to_string()),
            };

            let attrs = match step {
                Step::Skip => continue,
                Step::Eof => {
                    self.finish();
                    return None;
                }
                Step::Malformed(reason) => return Some(Err(self.malformed(reason))),
                // Another record exists past the cap: the scan is truncated.
                Step::Record(_) if self.report.records_inspected >= self.options.record_cap => {
                    self.report.cap_reached = true;
                    self.finish();
                    return None;
                }
                Step::Record(Err(reason)) => return Some(Err(self.malformed(reason))),
                Step::Record(Ok(attrs)) => attrs,
            };

            if self.is_cancelled() {
                let inspected = self.report.records_inspected;
                self.finish();
                return Some(Err(ExtractError::Cancelled { inspected }));
            }

            self.report.records_inspected += 1;
            if self.report.records_inspected % PROGRESS_INTERVAL == 0 {
                let progress = self.report.progress();
                tracing::debug!(
                    inspected = self.report.records_inspected,
                    progress,
                    "extraction progress"
                );
                if let Some(callback) = self.progress.as_mut() {
                    callback(progress);
                }
            }

            match self.inspect_record(attrs) {
                Ok(record) => {
                    self.report.records_emitted += 1;
                    return Some(Ok(record));
                }
                Err(reason) => {
                    tracing::trace!(%reason, "record skipped");
                    self.report.record_skip(reason);
                }
            }
        }
    }
}

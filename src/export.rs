//! Tabular and JSON exports of analysis results.

use crate::core::aggregate::DailyPivot;
use crate::core::observation::Observation;
use crate::core::summary::HealthSummary;
use serde::Serialize;
use std::io::Write;
use std::str::FromStr;

/// Export errors.
#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// What to write and how.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    /// One row per observation
    Csv,
    /// One row per day, one column per metric
    PivotCsv,
    /// The summary report as pretty JSON
    Json,
    /// One JSON object per observation
    Jsonl,
}

impl ExportFormat {
    pub fn extension(self) -> &'static str {
        match self {
            ExportFormat::Csv | ExportFormat::PivotCsv => "csv",
            ExportFormat::Json => "json",
            ExportFormat::Jsonl => "jsonl",
        }
    }
}

impl FromStr for ExportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "csv" => Ok(ExportFormat::Csv),
            "pivot" | "pivot-csv" => Ok(ExportFormat::PivotCsv),
            "json" => Ok(ExportFormat::Json),
            "jsonl" => Ok(ExportFormat::Jsonl),
            other => Err(format!("unknown export format '{other}'")),
        }
    }
}

/// Render a value for CSV output: shortest form, no trailing `.0`.
fn format_value(value: f64) -> String {
    value.to_string()
}

#[derive(Serialize)]
struct TidyRow<'a> {
    date: String,
    metric_type: &'a str,
    value: String,
    unit: &'a str,
}

impl<'a> From<&'a Observation> for TidyRow<'a> {
    fn from(obs: &'a Observation) -> Self {
        Self {
            date: obs.timestamp.to_rfc3339(),
            metric_type: obs.metric_type.short_name(),
            value: format_value(obs.value),
            unit: obs.unit_or_default(),
        }
    }
}

/// Write one CSV row per observation: `date,metric_type,value,unit`.
pub fn write_tidy_csv<W: Write>(writer: W, observations: &[Observation]) -> Result<(), ExportError> {
    let mut csv = csv::Writer::from_writer(writer);
    // serialize() only emits headers with the first record.
    if observations.is_empty() {
        csv.write_record(["date", "metric_type", "value", "unit"])?;
    }
    for obs in observations {
        csv.serialize(TidyRow::from(obs))?;
    }
    csv.flush()?;
    Ok(())
}

/// Write the pivot with one column per metric; absent cells stay empty.
pub fn write_pivot_csv<W: Write>(writer: W, pivot: &DailyPivot) -> Result<(), ExportError> {
    let metrics = pivot.metrics();
    let mut csv = csv::Writer::from_writer(writer);

    let mut header = vec!["date".to_string()];
    header.extend(metrics.iter().map(|m| m.short_name().to_string()));
    csv.write_record(&header)?;

    for (date, row) in pivot.rows() {
        let mut record = vec![date.to_string()];
        record.extend(
            metrics
                .iter()
                .map(|m| row.get(m).copied().map(format_value).unwrap_or_default()),
        );
        csv.write_record(&record)?;
    }
    csv.flush()?;
    Ok(())
}

/// Write the summary as pretty-printed JSON.
pub fn write_summary_json<W: Write>(mut writer: W, summary: &HealthSummary) -> Result<(), ExportError> {
    serde_json::to_writer_pretty(&mut writer, summary)?;
    writeln!(writer)?;
    writer.flush()?;
    Ok(())
}

/// Write one JSON object per line for each observation.
pub fn write_observations_jsonl<W: Write>(
    mut writer: W,
    observations: &[Observation],
) -> Result<(), ExportError> {
    for obs in observations {
        serde_json::to_writer(&mut writer, obs)?;
        writeln!(writer)?;
    }
    writer.flush()?;
    Ok(())
}

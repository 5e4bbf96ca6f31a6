//! health-twin CLI
//!
//! Summarize an exported health archive on this machine.

use anyhow::{anyhow, Context, Result};
use chrono::{NaiveDate, Utc};
use chrono_tz::Tz;
use clap::{Args, Parser, Subcommand};
use health_twin::{
    analyze_archive, analyze_archive_cached, end_of_day,
    export::{write_observations_jsonl, write_pivot_csv, write_summary_json, write_tidy_csv},
    Analysis, AnalysisCache, AnalysisSettings, Config, ExportFormat, MetricSet, RunHooks,
    PRIVACY_NOTICE, VERSION,
};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "health-twin")]
#[command(version = VERSION)]
#[command(about = "Summarize exported health archives locally", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze an export archive and print a summary
    Analyze {
        #[command(flatten)]
        run: RunArgs,

        /// Print the summary as JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Analyze an export archive and write a table or report
    Export {
        #[command(flatten)]
        run: RunArgs,

        /// Output file (defaults to a timestamped file in the export directory)
        #[arg(long, short)]
        output: Option<PathBuf>,

        /// Export format (csv, pivot, json or jsonl)
        #[arg(long, default_value = "csv")]
        format: String,
    },

    /// Show configuration
    Config {
        /// Write the current configuration to the config file
        #[arg(long)]
        init: bool,
    },

    /// Manage cached analysis results
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },

    /// Display privacy notice
    Privacy,
}

#[derive(Subcommand)]
enum CacheAction {
    /// Remove every cached result
    Clear,
}

/// Per-run overrides of the configured analysis settings.
#[derive(Args)]
struct RunArgs {
    /// Path to the exported ZIP archive
    archive: PathBuf,

    /// Length of the trailing window in days
    #[arg(long)]
    window_days: Option<u32>,

    /// Maximum number of records to inspect
    #[arg(long)]
    record_cap: Option<usize>,

    /// Metrics to extract, comma separated, or "all"
    #[arg(long)]
    metrics: Option<String>,

    /// Height in centimeters, used when the export has none
    #[arg(long)]
    height_cm: Option<f64>,

    /// Birth date (YYYY-MM-DD) for age display
    #[arg(long)]
    birth_date: Option<NaiveDate>,

    /// Birth year for a rough age display
    #[arg(long)]
    birth_year: Option<i32>,

    /// IANA timezone for day boundaries (e.g. Europe/Berlin)
    #[arg(long)]
    timezone: Option<String>,

    /// Skip the result cache for this run
    #[arg(long)]
    no_cache: bool,
}

impl RunArgs {
    fn apply(&self, settings: &mut AnalysisSettings) -> Result<()> {
        if let Some(days) = self.window_days {
            settings.window_days = days;
        }
        if let Some(cap) = self.record_cap {
            settings.record_cap = cap;
        }
        if let Some(metrics) = &self.metrics {
            settings.metrics = MetricSet::from_csv(metrics)?;
        }
        if let Some(height) = self.height_cm {
            settings.height_cm = Some(height);
        }
        if let Some(date) = self.birth_date {
            settings.birth_date = Some(date);
        }
        if let Some(year) = self.birth_year {
            settings.birth_year = Some(year);
        }
        if let Some(tz) = &self.timezone {
            settings.timezone = tz
                .parse::<Tz>()
                .map_err(|e| anyhow!("invalid timezone '{tz}': {e}"))?;
        }
        settings.validate()?;
        Ok(())
    }
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::Analyze { run, json } => cmd_analyze(&run, json),
        Commands::Export {
            run,
            output,
            format,
        } => cmd_export(&run, output, &format),
        Commands::Config { init } => cmd_config(init),
        Commands::Cache {
            action: CacheAction::Clear,
        } => cmd_cache_clear(),
        Commands::Privacy => {
            cmd_privacy();
            Ok(())
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn cmd_analyze(run: &RunArgs, json: bool) -> Result<()> {
    let config = Config::load().context("failed to load configuration")?;
    let analysis = run_analysis(&config, run)?;

    if json {
        write_summary_json(std::io::stdout().lock(), &analysis.summary)?;
    } else {
        print_summary(&analysis);
    }
    Ok(())
}

fn cmd_export(run: &RunArgs, output: Option<PathBuf>, format: &str) -> Result<()> {
    let format: ExportFormat = format.parse().map_err(anyhow::Error::msg)?;
    let config = Config::load().context("failed to load configuration")?;
    let analysis = run_analysis(&config, run)?;

    let output_path = match output {
        Some(path) => path,
        None => {
            config.ensure_directories()?;
            config.export_path.join(format!(
                "health_{}.{}",
                Utc::now().format("%Y%m%d_%H%M%S"),
                format.extension()
            ))
        }
    };

    let file = File::create(&output_path)
        .with_context(|| format!("cannot create {}", output_path.display()))?;
    let writer = BufWriter::new(file);

    match format {
        ExportFormat::Csv => write_tidy_csv(writer, &analysis.observations)?,
        ExportFormat::PivotCsv => write_pivot_csv(writer, &analysis.recent_pivot)?,
        ExportFormat::Json => write_summary_json(writer, &analysis.summary)?,
        ExportFormat::Jsonl => write_observations_jsonl(writer, &analysis.observations)?,
    }

    println!("Exported to {}", output_path.display());
    Ok(())
}

fn cmd_config(init: bool) -> Result<()> {
    let config = Config::load().context("failed to load configuration")?;

    if init {
        config.save().context("failed to save configuration")?;
        println!("Wrote {}", Config::config_path().display());
        return Ok(());
    }

    println!("Configuration");
    println!("=============");
    println!();
    println!("Config file: {}", Config::config_path().display());
    println!();
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}

fn cmd_cache_clear() -> Result<()> {
    let config = Config::load().context("failed to load configuration")?;
    let mut cache = AnalysisCache::with_persistence(&config.cache_path);
    let removed = cache.clear()?;
    println!(
        "Removed {removed} cached result(s) from {}",
        config.cache_path.display()
    );
    Ok(())
}

fn cmd_privacy() {
    println!("{PRIVACY_NOTICE}");
}

/// Run one analysis, consulting the cache when enabled.
///
/// Runs are anchored on the end of the current local day, so results are
/// stable (and cacheable) for the whole day.
fn run_analysis(config: &Config, run: &RunArgs) -> Result<Analysis> {
    let mut settings = config.analysis.clone();
    run.apply(&mut settings)?;

    let cancel = Arc::new(AtomicBool::new(false));
    ctrlc_handler(cancel.clone())?;

    let hooks = RunHooks {
        cancel: Some(cancel),
        progress: Some(Box::new(|fraction: f64| {
            tracing::info!("scanned {:.0}% of the record cap", fraction * 100.0);
        })),
    };

    let now = Utc::now();
    let archive = open_archive(&run.archive)?;
    let analysis = if config.cache_enabled && !run.no_cache {
        let mut cache = AnalysisCache::with_persistence(&config.cache_path);
        analyze_archive_cached(archive, &settings, now, hooks, &mut cache)
    } else {
        analyze_archive(archive, &settings, end_of_day(now, settings.timezone), hooks)
    };

    analysis.with_context(|| format!("failed to analyze {}", run.archive.display()))
}

fn open_archive(path: &Path) -> Result<BufReader<File>> {
    let file = File::open(path).with_context(|| format!("cannot open {}", path.display()))?;
    Ok(BufReader::new(file))
}

fn print_summary(analysis: &Analysis) {
    let summary = &analysis.summary;
    let extraction = analysis.extraction();

    println!("Health Twin Summary");
    println!("===================");
    println!();
    if let Some(source) = &summary.source {
        println!("Source: {source}");
    }
    println!(
        "Records inspected: {} (cap {}{})",
        extraction.records_inspected,
        extraction.record_cap,
        if extraction.cap_reached { ", reached" } else { "" }
    );
    println!("Records kept: {}", summary.observation_count);
    println!(
        "Records skipped: {} (type {}, timestamp {}, window {}, conversion {})",
        extraction.skipped() + summary.dropped_records,
        extraction.skipped_unlisted,
        extraction.skipped_timestamp,
        extraction.skipped_window,
        summary.dropped_records
    );
    println!();

    println!("Latest values:");
    if summary.latest.is_empty() {
        println!("  (none)");
    }
    for (metric, reading) in &summary.latest {
        println!(
            "  {:<14} {:>10.1} {:<10} {}",
            metric.short_name(),
            reading.value,
            reading.unit,
            reading.observed_at.format("%Y-%m-%d %H:%M")
        );
    }
    println!();

    match &summary.bmi {
        Some(bmi) => println!("BMI: {:.1} ({:?})", bmi.rounded(), bmi.category),
        None => println!("BMI: unavailable"),
    }
    if let Some(years) = summary.data_span_years {
        println!("Data span: {years} year(s)");
    }
    if let Some(age) = summary.age_years {
        println!("Age: {age}");
    }
    println!();

    let pivot = &analysis.recent_pivot;
    println!("Last {} days (daily means):", summary.window_days);
    if pivot.is_empty() {
        println!("  (no data in window)");
        return;
    }

    let metrics = pivot.metrics();
    let mut header = format!("  {:<10}", "date");
    for metric in &metrics {
        header.push_str(&format!(" {:>14}", metric.short_name()));
    }
    println!("{header}");
    for (date, row) in pivot.rows() {
        let mut line = format!("  {date}");
        for metric in &metrics {
            match row.get(metric) {
                Some(value) => line.push_str(&format!(" {value:>14.1}")),
                None => line.push_str(&format!(" {:>14}", "-")),
            }
        }
        println!("{line}");
    }
}

/// Set up Ctrl+C handler.
fn ctrlc_handler(cancelled: Arc<AtomicBool>) -> Result<()> {
    ctrlc::set_handler(move || {
        cancelled.store(true, Ordering::SeqCst);
    })
    .context("error setting Ctrl+C handler")
}

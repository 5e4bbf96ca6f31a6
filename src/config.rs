//! Configuration for health-twin.

use crate::extract::stream::DEFAULT_RECORD_CAP;
use crate::extract::types::MetricSet;
use chrono::NaiveDate;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Parameters of the extraction and aggregation pass
    pub analysis: AnalysisSettings,

    /// Default directory for exported tables and summaries
    pub export_path: PathBuf,

    /// Directory holding cached analysis results
    pub cache_path: PathBuf,

    /// Whether analysis results are cached on disk
    pub cache_enabled: bool,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("health-twin");

        Self {
            analysis: AnalysisSettings::default(),
            export_path: data_dir.join("exports"),
            cache_path: data_dir.join("cache"),
            cache_enabled: true,
        }
    }
}

impl Config {
    /// Load configuration from the default location.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_path();

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            let config: Config = serde_json::from_str(&content)
                .map_err(|e| ConfigError::Parse(e.to_string()))?;
            config.validate()?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to the default location.
    pub fn save(&self) -> Result<(), ConfigError> {
        self.validate()?;
        let config_path = Self::config_path();

        // Ensure parent directory exists
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::Serialize(e.to_string()))?;

        std::fs::write(&config_path, content)?;

        Ok(())
    }

    /// Check the analysis settings.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.analysis.validate()
    }

    /// Get the path to the configuration file.
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("health-twin")
            .join("config.json")
    }

    /// Ensure all required directories exist.
    pub fn ensure_directories(&self) -> Result<(), ConfigError> {
        std::fs::create_dir_all(&self.export_path)?;
        if self.cache_enabled {
            std::fs::create_dir_all(&self.cache_path)?;
        }
        Ok(())
    }
}

/// User-supplied parameters for one analysis.
///
/// These values are part of the cache key, so everything that changes the
/// result must live here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisSettings {
    /// Maximum number of `Record` elements inspected
    pub record_cap: usize,

    /// Length of the trailing retention window in days
    pub window_days: u32,

    /// Type allow-list
    pub metrics: MetricSet,

    /// Height used for BMI when the export has none
    pub height_cm: Option<f64>,

    /// Exact birth date for age display
    pub birth_date: Option<NaiveDate>,

    /// Birth year for a rough age when no birth date is set
    pub birth_year: Option<i32>,

    /// Timezone for offset-less timestamps and day boundaries
    pub timezone: Tz,
}

impl Default for AnalysisSettings {
    fn default() -> Self {
        Self {
            record_cap: DEFAULT_RECORD_CAP,
            window_days: 30,
            metrics: MetricSet::default(),
            height_cm: None,
            birth_date: None,
            birth_year: None,
            timezone: Tz::UTC,
        }
    }
}

impl AnalysisSettings {
    /// Reject settings that cannot produce a meaningful run.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.record_cap == 0 {
            return Err(ConfigError::InvalidSetting(
                "record_cap must be at least 1".to_string(),
            ));
        }
        if self.window_days == 0 {
            return Err(ConfigError::InvalidSetting(
                "window_days must be at least 1".to_string(),
            ));
        }
        if self.metrics.is_empty() {
            return Err(ConfigError::InvalidSetting(
                "at least one metric must be selected".to_string(),
            ));
        }
        if let Some(height) = self.height_cm {
            if !(height > 0.0 && height.is_finite()) {
                return Err(ConfigError::InvalidSetting(format!(
                    "height_cm must be positive, got {height}"
                )));
            }
        }
        Ok(())
    }

    /// Configured height in meters.
    pub fn height_m(&self) -> Option<f64> {
        self.height_cm.map(|cm| cm / 100.0)
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("Serialize error: {0}")]
    Serialize(String),
    #[error("Invalid setting: {0}")]
    InvalidSetting(String),
}

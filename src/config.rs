//! Configuration for the aggregation engine.

use crate::core::features::FeatureParams;
use crate::core::scheduler::MAX_RANGE_HOURS;
use crate::scorer::ScorerConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Environment variable overriding the scorer base URL.
pub const ML_SERVICE_URL_ENV: &str = "ML_SERVICE_URL";

/// Main configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Largest gap (minutes) between activity signals within one session
    pub session_gap_minutes: f64,

    /// Client idle threshold in minutes (informational)
    pub idle_timeout_minutes: f64,

    /// Maximum hours per range backfill request
    pub max_range_hours: i64,

    /// Port for the HTTP surface
    pub server_port: u16,

    /// Buffered live updates per user channel
    pub notify_capacity: usize,

    /// External fatigue scorer
    pub scorer: ScorerConfig,

    /// Path for storing transparency stats
    pub data_path: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        let params = FeatureParams::default();
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("zentrack");

        Self {
            session_gap_minutes: params.session_gap_minutes,
            idle_timeout_minutes: params.idle_timeout_minutes,
            max_range_hours: MAX_RANGE_HOURS,
            server_port: 5000,
            notify_capacity: 64,
            scorer: ScorerConfig::default(),
            data_path: data_dir,
        }
    }
}

impl Config {
    /// Load configuration from the default location, then apply
    /// environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_path();

        let mut config = if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)
                .map_err(|e| ConfigError::IoError(e.to_string()))?;
            Self::from_json(&content)?
        } else {
            Self::default()
        };

        if let Ok(url) = std::env::var(ML_SERVICE_URL_ENV) {
            config.apply_scorer_url(&url);
        }

        Ok(config)
    }

    /// Parse and validate a JSON configuration document.
    pub fn from_json(content: &str) -> Result<Self, ConfigError> {
        let config: Config =
            serde_json::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !(self.session_gap_minutes.is_finite() && self.session_gap_minutes >= 0.0) {
            return Err(ConfigError::ParseError(format!(
                "session_gap_minutes must be >= 0, got {}",
                self.session_gap_minutes
            )));
        }
        if !(1..=MAX_RANGE_HOURS).contains(&self.max_range_hours) {
            return Err(ConfigError::ParseError(format!(
                "max_range_hours must be between 1 and {MAX_RANGE_HOURS}, got {}",
                self.max_range_hours
            )));
        }
        Ok(())
    }

    /// Override the scorer URL; blank values are ignored.
    pub fn apply_scorer_url(&mut self, url: &str) {
        let url = url.trim();
        if !url.is_empty() {
            self.scorer.base_url = url.to_string();
        }
    }

    /// Save configuration to the default location.
    pub fn save(&self) -> Result<(), ConfigError> {
        let config_path = Self::config_path();

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::IoError(e.to_string()))?;
        }

        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        std::fs::write(&config_path, content).map_err(|e| ConfigError::IoError(e.to_string()))?;

        Ok(())
    }

    /// Get the path to the configuration file.
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("zentrack")
            .join("config.json")
    }

    /// Ensure all required directories exist.
    pub fn ensure_directories(&self) -> Result<(), ConfigError> {
        std::fs::create_dir_all(&self.data_path)
            .map_err(|e| ConfigError::IoError(e.to_string()))?;
        Ok(())
    }

    /// Where the transparency log is persisted.
    pub fn transparency_path(&self) -> PathBuf {
        self.data_path.join("transparency.json")
    }

    /// Aggregation parameters derived from this configuration.
    pub fn feature_params(&self) -> FeatureParams {
        FeatureParams {
            idle_timeout_minutes: self.idle_timeout_minutes,
            session_gap_minutes: self.session_gap_minutes,
        }
    }
}

/// Configuration errors.
#[derive(Debug)]
pub enum ConfigError {
    IoError(String),
    ParseError(String),
    SerializeError(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(e) => write!(f, "IO error: {e}"),
            ConfigError::ParseError(e) => write!(f, "Parse error: {e}"),
            ConfigError::SerializeError(e) => write!(f, "Serialize error: {e}"),
        }
    }
}

impl std::error::Error for ConfigError {}

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::detection::AcceptanceFilters;
use crate::error::ConfigError;

const APP_DIR_NAME: &str = "StatsOnSight";
pub const DEFAULT_SERVICE_URL: &str = "http://stats-on-sight.appspot.com";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Base URL of the scoring service (`/upload` and `/game` live under it)
    pub service_base_url: String,

    /// Interval between sampled camera frames
    pub frame_interval_ms: u64,

    /// Interval between game refreshes while tracking
    pub poll_interval_ms: u64,

    /// Upper bound for a single upload or poll request
    pub request_timeout_ms: u64,

    /// JPEG quality for uploaded regions (1-100)
    pub jpeg_quality: u8,

    /// Grace period before a lost anchor counts as lost tracking
    pub tracking_grace_ms: u64,

    /// Filters a detected rectangle must pass to become a candidate
    pub filters: AcceptanceFilters,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service_base_url: DEFAULT_SERVICE_URL.to_string(),
            frame_interval_ms: 100,
            poll_interval_ms: 2_000,
            request_timeout_ms: 10_000,
            jpeg_quality: 100,
            tracking_grace_ms: 1_000,
            filters: AcceptanceFilters::default(),
        }
    }
}

impl Config {
    /// Load configuration from the platform-specific config directory.
    /// Creates default config if file doesn't exist.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_path()?;

        if config_path.exists() {
            let config = Self::load_from(&config_path)?;
            tracing::info!("Loaded config from: {}", config_path.display());
            Ok(config)
        } else {
            let config = Config::default();
            config.save_to(&config_path)?;
            tracing::info!("Created default config at: {}", config_path.display());
            Ok(config)
        }
    }

    /// Load and validate configuration from an explicit path
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let load_failed = |source: Box<dyn std::error::Error + Send + Sync>| ConfigError::LoadFailed {
            path: path.display().to_string(),
            source,
        };

        let content = fs::read_to_string(path).map_err(|e| load_failed(Box::new(e)))?;
        let config: Config = serde_json::from_str(&content).map_err(|e| load_failed(Box::new(e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to disk
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let save_failed = |source: Box<dyn std::error::Error + Send + Sync>| ConfigError::SaveFailed {
            path: path.display().to_string(),
            source,
        };

        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| save_failed(Box::new(e)))?;
        }

        let json = serde_json::to_string_pretty(self).map_err(|e| save_failed(Box::new(e)))?;
        fs::write(path, json).map_err(|e| save_failed(Box::new(e)))?;

        Ok(())
    }

    /// Get the config file path in the user config directory
    pub fn config_path() -> Result<PathBuf, ConfigError> {
        let base = dirs::config_dir().ok_or(ConfigError::NoConfigDir)?;
        Ok(base.join(APP_DIR_NAME).join("config.json"))
    }

    /// Directory that holds rotated log files
    pub fn log_dir() -> PathBuf {
        dirs::config_dir()
            .map(|dir| dir.join(APP_DIR_NAME).join("logs"))
            .unwrap_or_else(|| PathBuf::from("logs"))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.service_base_url.trim().is_empty() {
            return Err(ConfigError::Invalid("service_base_url is empty".into()));
        }
        if self.frame_interval_ms == 0 || self.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "frame and poll intervals must be greater than zero".into(),
            ));
        }
        if self.request_timeout_ms == 0 {
            return Err(ConfigError::Invalid("request_timeout_ms must be greater than zero".into()));
        }
        if !(1..=100).contains(&self.jpeg_quality) {
            return Err(ConfigError::Invalid(format!(
                "jpeg_quality {} (must be 1-100)",
                self.jpeg_quality
            )));
        }
        self.filters.validate().map_err(ConfigError::Invalid)
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn tracking_grace(&self) -> Duration {
        Duration::from_millis(self.tracking_grace_ms)
    }
}

//! Application configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{CeusError, CeusResult};

/// Global application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Default analysis parameters.
    #[serde(default)]
    pub analysis: AnalysisDefaults,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Default parameters for every analysis stage.
///
/// The analysis crate converts these into its per-stage config structs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisDefaults {
    /// Leading frames ignored by flash detection (capped at 10% of the clip).
    pub flash_exclude_leading: usize,

    /// Frames searched after the flash for the washout minimum.
    pub flash_search_window: usize,

    /// Seconds analysed after the washout frame.
    pub analysis_window_secs: f64,

    /// Frames skipped before the registration reference window.
    pub registration_skip_first: usize,

    /// Frames median-combined into the registration reference.
    pub registration_reference_window: usize,

    /// Sub-pixel upsampling factor for shift estimation.
    pub registration_upsample: usize,

    /// Lower normalization percentile.
    pub percentile_low: f64,

    /// Upper normalization percentile.
    pub percentile_high: f64,

    /// Apply log-compression after normalization.
    pub log_compress: bool,

    /// Spatial filter: "median", "gaussian" or "none".
    pub spatial_filter: String,

    /// Temporal filter: "gaussian", "mean" or "none".
    pub temporal_filter: String,

    /// Temporal filter window (frames).
    pub temporal_window: usize,

    /// Frames used for the background baseline.
    pub baseline_frames: usize,

    /// LOESS span in (0, 1].
    pub loess_span: f64,

    /// LOESS local polynomial degree (1 or 2).
    pub loess_degree: usize,

    /// Multi-start count per model.
    pub fit_starts: usize,

    /// Seed for the random restarts. `None` draws a fresh seed.
    pub fit_seed: Option<u64>,

    /// Wash-in fit window end (seconds).
    pub washin_t_max_secs: f64,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "ceuslab=debug,warn").
    pub level: String,

    /// Whether to output structured JSON logs.
    pub json: bool,

    /// Optional log file path.
    pub file: Option<PathBuf>,
}

impl Default for AnalysisDefaults {
    fn default() -> Self {
        Self {
            flash_exclude_leading: 5,
            flash_search_window: 20,
            analysis_window_secs: 15.0,
            registration_skip_first: 3,
            registration_reference_window: 10,
            registration_upsample: 20,
            percentile_low: 1.0,
            percentile_high: 99.0,
            log_compress: true,
            spatial_filter: "median".to_string(),
            temporal_filter: "gaussian".to_string(),
            temporal_window: 3,
            baseline_frames: 5,
            loess_span: 0.8,
            loess_degree: 2,
            fit_starts: 50,
            fit_seed: None,
            washin_t_max_secs: 5.0,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            file: None,
        }
    }
}

impl AnalysisDefaults {
    /// Reject values no stage can run with.
    pub fn validate(&self) -> CeusResult<()> {
        if !(self.loess_span > 0.0 && self.loess_span <= 1.0) {
            return Err(CeusError::config(format!(
                "loess_span must be in (0, 1], got {}",
                self.loess_span
            )));
        }
        if !matches!(self.loess_degree, 1 | 2) {
            return Err(CeusError::config(format!(
                "loess_degree must be 1 or 2, got {}",
                self.loess_degree
            )));
        }
        if self.percentile_low < 0.0
            || self.percentile_high > 100.0
            || self.percentile_low >= self.percentile_high
        {
            return Err(CeusError::config(format!(
                "percentiles must satisfy 0 <= low < high <= 100, got {}..{}",
                self.percentile_low, self.percentile_high
            )));
        }
        if self.fit_starts == 0 {
            return Err(CeusError::config("fit_starts must be at least 1"));
        }
        if self.registration_upsample == 0 {
            return Err(CeusError::config("registration_upsample must be at least 1"));
        }
        Ok(())
    }
}

impl AppConfig {
    /// Load config from the standard location, falling back to defaults.
    pub fn load() -> Self {
        let config_path = config_file_path();
        if config_path.exists() {
            match Self::load_from(&config_path) {
                Ok(config) => return config,
                Err(e) => {
                    tracing::warn!("Failed to load config at {:?}: {}", config_path, e);
                }
            }
        }
        Self::default()
    }

    /// Load and validate config from an explicit path.
    pub fn load_from(path: &Path) -> CeusResult<Self> {
        if !path.exists() {
            return Err(CeusError::FileNotFound {
                path: path.to_path_buf(),
            });
        }
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        config.analysis.validate()?;
        Ok(config)
    }

    /// Save config to the standard location.
    pub fn save(&self) -> Result<(), std::io::Error> {
        let config_path = config_file_path();
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
        std::fs::write(config_path, json)
    }
}

/// Standard config file location.
pub fn config_file_path() -> PathBuf {
    let base = std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".config")
        });
    base.join("ceuslab").join("config.json")
}

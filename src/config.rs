use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::analyser::logic::charts::ChartConfig;
use crate::analyser::logic::health::DEFAULT_HEALTH_THRESHOLD_PCT;
use crate::analyser::logic::ml::DetectorConfig;
use crate::error::{PipelineError, Result, ResultExt as _};

pub const APP_DIR_NAME: &str = "tabwatch";

/// Knobs of a single analysis run.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    /// Expected share of anomalous rows, in (0, 0.5]
    pub contamination: f64,
    pub random_seed: u64,
    pub n_estimators: usize,
    pub max_samples: usize,
    pub max_trend_charts: usize,
    /// Anomaly percentage at or above which a run needs attention
    pub health_threshold_pct: f64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let detector = DetectorConfig::default();
        Self {
            contamination: detector.contamination,
            random_seed: detector.random_seed,
            n_estimators: detector.n_estimators,
            max_samples: detector.max_samples,
            max_trend_charts: ChartConfig::default().max_trend_charts,
            health_threshold_pct: DEFAULT_HEALTH_THRESHOLD_PCT,
        }
    }
}

impl PipelineConfig {
    pub fn detector_config(&self) -> DetectorConfig {
        DetectorConfig {
            contamination: self.contamination,
            random_seed: self.random_seed,
            n_estimators: self.n_estimators,
            max_samples: self.max_samples,
        }
    }

    pub fn chart_config(&self) -> ChartConfig {
        ChartConfig {
            max_trend_charts: self.max_trend_charts,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.contamination > 0.0 && self.contamination <= 0.5) {
            return Err(PipelineError::Config(format!(
                "contamination must be in (0, 0.5], got {}",
                self.contamination
            )));
        }
        if self.n_estimators == 0 {
            return Err(PipelineError::Config(
                "n_estimators must be at least 1".to_owned(),
            ));
        }
        if self.max_samples < 2 {
            return Err(PipelineError::Config(format!(
                "max_samples must be at least 2, got {}",
                self.max_samples
            )));
        }
        if !self.health_threshold_pct.is_finite() || self.health_threshold_pct < 0.0 {
            return Err(PipelineError::Config(format!(
                "health_threshold_pct must be a non-negative number, got {}",
                self.health_threshold_pct
            )));
        }
        Ok(())
    }
}

/// Where run artifacts are kept and for how long.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct StorageConfig {
    pub base_dir: PathBuf,
    /// Relative paths resolve against `base_dir`
    pub insights_dir: PathBuf,
    pub charts_dir: PathBuf,
    pub retention_hours: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            base_dir: default_base_dir(),
            insights_dir: PathBuf::from("outputs").join("insights"),
            charts_dir: PathBuf::from("outputs").join("charts"),
            retention_hours: 24,
        }
    }
}

impl StorageConfig {
    pub fn insights_path(&self) -> PathBuf {
        self.base_dir.join(&self.insights_dir)
    }

    pub fn charts_path(&self) -> PathBuf {
        self.base_dir.join(&self.charts_dir)
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_hours.saturating_mul(3600))
    }
}

fn default_base_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(APP_DIR_NAME)
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub pipeline: PipelineConfig,
    pub storage: StorageConfig,
}

/// `<config_dir>/tabwatch/config.json`, if the platform has a config dir.
pub fn get_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join(APP_DIR_NAME).join("config.json"))
}

impl AppConfig {
    /// Loads from `path`, or from the default location when `None`. A missing
    /// file yields the defaults; a malformed or invalid one is an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => Some(p.to_path_buf()),
            None => get_config_path(),
        };

        let config = match path {
            Some(p) if p.exists() => {
                let content = std::fs::read_to_string(&p)
                    .with_context(|| format!("Failed to read config {}", p.display()))?;
                let config: Self = serde_json::from_str(&content).map_err(|e| {
                    PipelineError::Config(format!("Invalid config {}: {e}", p.display()))
                })?;
                tracing::debug!("Loaded configuration from {}", p.display());
                config
            }
            _ => Self::default(),
        };

        config.pipeline.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

//! Serializable run configuration.
//!
//! Every field has a default, so an empty TOML document is a valid config.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sharpelab_core::data::{ExpiryPolicy, GateConfig};
use sharpelab_core::domain::Resolution;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config value for '{field}': {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SharpeConfig {
    pub data: DataConfig,
    pub gate: GateConfig,
    pub history: HistoryConfig,
    pub search: SearchConfig,
}

/// Where snapshots and series live and how long they stay fresh.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    pub data_dir: PathBuf,
    pub metadata_expiry_days: i64,
    pub expiry_days: ExpiryPolicy,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            metadata_expiry_days: 7,
            expiry_days: ExpiryPolicy::default(),
        }
    }
}

impl DataConfig {
    pub fn metadata_path(&self) -> PathBuf {
        self.data_dir.join("metadata.json")
    }

    pub fn series_dir(&self) -> PathBuf {
        self.data_dir.join("historical_data")
    }
}

/// History window fed to the optimizer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    pub resolution: Resolution,
    pub lookback_days: u32,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            resolution: Resolution::Daily,
            lookback_days: 365,
        }
    }
}

/// Combination search and objective parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Largest `C(shard, k)` evaluated exhaustively.
    pub work_budget: u64,
    pub max_shards: usize,
    pub risk_free_rate: f64,
    pub trading_days: f64,
    pub parallel: bool,
    /// Defaults to the shard count of the first plan.
    pub passes: Option<usize>,
    pub seed: Option<u64>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            work_budget: 2000,
            max_shards: 9,
            risk_free_rate: 0.05,
            trading_days: 252.0,
            parallel: true,
            passes: None,
            seed: None,
        }
    }
}

impl SharpeConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: SharpeConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
            ConfigError::Invalid {
                field,
                reason: reason.into(),
            }
        }

        if self.data.metadata_expiry_days < 0 {
            return Err(invalid("data.metadata_expiry_days", "must be >= 0"));
        }
        let e = &self.data.expiry_days;
        if [e.hourly, e.daily, e.fifteen_minute, e.one_minute]
            .iter()
            .any(|d| *d < 0)
        {
            return Err(invalid("data.expiry_days", "thresholds must be >= 0"));
        }
        if self.gate.quota_per_window == 0 {
            return Err(invalid("gate.quota_per_window", "must be > 0"));
        }
        if self.history.lookback_days == 0 {
            return Err(invalid("history.lookback_days", "must be > 0"));
        }
        if self.search.work_budget == 0 {
            return Err(invalid("search.work_budget", "must be > 0"));
        }
        if self.search.max_shards < 2 {
            return Err(invalid("search.max_shards", "must be >= 2"));
        }
        if !self.search.risk_free_rate.is_finite() {
            return Err(invalid("search.risk_free_rate", "must be finite"));
        }
        if !(self.search.trading_days.is_finite() && self.search.trading_days > 0.0) {
            return Err(invalid("search.trading_days", "must be > 0"));
        }
        if self.search.passes == Some(0) {
            return Err(invalid("search.passes", "must be >= 1"));
        }
        Ok(())
    }
}

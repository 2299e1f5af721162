//! TOML configuration for an ingestion run.
//!
//! Every field has a default, so an empty file (or no file at all) gives a
//! working setup pointed at the public FXCM repository. CLI flags override
//! individual values after loading.

use chrono::NaiveDate;
use fxtick_core::data::{data_floor, FxcmOptions, RetryPolicy, Throttle};
use fxtick_core::store::StoreOptions;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config value: {0}")]
    Invalid(String),
}

/// Complete run configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct IngestConfig {
    pub source: SourceConfig,
    pub retry: RetryConfig,
    pub throttle: ThrottleConfig,
    pub store: StoreConfig,
    pub dispatch: DispatchConfig,
}

/// Remote repository settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SourceConfig {
    pub base_url: String,
    pub timeout_secs: u64,
    pub user_agent: String,
    /// Earliest date the repository has data for.
    pub data_floor: NaiveDate,
}

impl Default for SourceConfig {
    fn default() -> Self {
        let http = FxcmOptions::default();
        Self {
            base_url: http.base_url,
            timeout_secs: http.timeout.as_secs(),
            user_agent: http.user_agent,
            data_floor: data_floor(),
        }
    }
}

/// Backoff for transient period failures.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter_pct: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay_ms: 500,
            max_delay_ms: 8_000,
            jitter_pct: 0.2,
        }
    }
}

/// Pause between consecutive period downloads.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ThrottleConfig {
    pub min_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            min_delay_ms: 1_000,
            max_delay_ms: 3_000,
        }
    }
}

/// Database settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StoreConfig {
    pub path: PathBuf,
    pub busy_timeout_secs: u64,
    /// CSV seeding the instrument catalogue on reset. Built-in list if unset.
    pub instruments_csv: Option<PathBuf>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data").join("db.sqlite"),
            busy_timeout_secs: 30,
            instruments_csv: None,
        }
    }
}

/// Worker pool settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DispatchConfig {
    /// Pool size for concurrent runs. Defaults to the number of CPUs.
    pub workers: Option<usize>,
}

impl IngestConfig {
    /// Load and validate a config file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    /// Parse and validate a config from TOML text.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Invalid(e.to_string()))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = &self.source.base_url;
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ConfigError::Invalid(format!(
                "source.base_url must be an http(s) URL, got '{url}'"
            )));
        }
        if self.source.timeout_secs == 0 {
            return Err(ConfigError::Invalid("source.timeout_secs must be > 0".into()));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid("retry.max_attempts must be >= 1".into()));
        }
        if !(0.0..=1.0).contains(&self.retry.jitter_pct) {
            return Err(ConfigError::Invalid("retry.jitter_pct must be within 0..=1".into()));
        }
        if self.throttle.min_delay_ms > self.throttle.max_delay_ms {
            return Err(ConfigError::Invalid(
                "throttle.min_delay_ms must not exceed throttle.max_delay_ms".into(),
            ));
        }
        if self.dispatch.workers == Some(0) {
            return Err(ConfigError::Invalid("dispatch.workers must be > 0".into()));
        }
        Ok(())
    }

    pub fn fxcm_options(&self) -> FxcmOptions {
        FxcmOptions {
            base_url: self.source.base_url.clone(),
            timeout: Duration::from_secs(self.source.timeout_secs),
            user_agent: self.source.user_agent.clone(),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.retry.max_attempts,
            Duration::from_millis(self.retry.base_delay_ms),
            Duration::from_millis(self.retry.max_delay_ms),
            self.retry.jitter_pct,
        )
    }

    pub fn throttle(&self) -> Throttle {
        Throttle::new(
            Duration::from_millis(self.throttle.min_delay_ms),
            Duration::from_millis(self.throttle.max_delay_ms),
        )
    }

    pub fn store_options(&self) -> StoreOptions {
        StoreOptions {
            busy_timeout: Duration::from_secs(self.store.busy_timeout_secs),
        }
    }

    /// Effective worker pool size.
    pub fn worker_count(&self) -> usize {
        self.dispatch.workers.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4)
        })
    }
}

use std::time::Duration;

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, SettleError};

pub const DEFAULT_BATCH_SIZE: usize = 50;
pub const DEFAULT_IDLE_INTERVAL_MS: u64 = 500;
pub const DEFAULT_VISIBILITY_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_REAPER_INTERVAL_MS: u64 = 5_000;
pub const DEFAULT_REAPER_BATCH_SIZE: usize = 200;
pub const DEFAULT_RETRY_BACKOFF_MS: u64 = 60_000;
pub const DEFAULT_RETENTION_TTL_SEC: u64 = 3_600;
pub const DEFAULT_DELAY_MS: u64 = 15 * 60 * 1000; // 15 min debounce window
pub const DEFAULT_STORE_ERROR_BACKOFF_MS: u64 = 1_000;
pub const DEFAULT_STORE_ERROR_BACKOFF_MAX_MS: u64 = 30_000;

/// Top-level config (settle.toml + SETTLE_* env overrides).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SettleConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub queue: QueueConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// Tuning knobs for the enqueuer, claimer, reaper and worker loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Max ids moved from due to processing per claim.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Worker sleep when a claim comes back empty.
    #[serde(default = "default_idle_interval_ms")]
    pub idle_interval_ms: u64,
    /// How long a claim is held before the reaper may hand it out again.
    #[serde(default = "default_visibility_timeout_ms")]
    pub visibility_timeout_ms: u64,
    #[serde(default = "default_reaper_interval_ms")]
    pub reaper_interval_ms: u64,
    #[serde(default = "default_reaper_batch_size")]
    pub reaper_batch_size: usize,
    /// Fixed delay before a job whose sink call failed becomes due again.
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    /// How long a completed job record stays readable.
    #[serde(default = "default_retention_ttl_sec")]
    pub retention_ttl_sec: u64,
    /// Debounce window used when the caller does not pass one.
    #[serde(default = "default_delay_ms")]
    pub default_delay_ms: u64,
    #[serde(default = "default_store_error_backoff_ms")]
    pub store_error_backoff_ms: u64,
    #[serde(default = "default_store_error_backoff_max_ms")]
    pub store_error_backoff_max_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            idle_interval_ms: DEFAULT_IDLE_INTERVAL_MS,
            visibility_timeout_ms: DEFAULT_VISIBILITY_TIMEOUT_MS,
            reaper_interval_ms: DEFAULT_REAPER_INTERVAL_MS,
            reaper_batch_size: DEFAULT_REAPER_BATCH_SIZE,
            retry_backoff_ms: DEFAULT_RETRY_BACKOFF_MS,
            retention_ttl_sec: DEFAULT_RETENTION_TTL_SEC,
            default_delay_ms: DEFAULT_DELAY_MS,
            store_error_backoff_ms: DEFAULT_STORE_ERROR_BACKOFF_MS,
            store_error_backoff_max_ms: DEFAULT_STORE_ERROR_BACKOFF_MAX_MS,
        }
    }
}

impl QueueConfig {
    /// Reject settings that would make the worker spin or never claim anything.
    pub fn validate(&self) -> Result<()> {
        let zero = [
            ("batch_size", self.batch_size == 0),
            ("reaper_batch_size", self.reaper_batch_size == 0),
            ("visibility_timeout_ms", self.visibility_timeout_ms == 0),
            ("idle_interval_ms", self.idle_interval_ms == 0),
            ("reaper_interval_ms", self.reaper_interval_ms == 0),
        ];
        if let Some((name, _)) = zero.iter().find(|(_, is_zero)| *is_zero) {
            return Err(SettleError::InvalidConfig(format!("queue.{name} must be > 0")));
        }
        if self.store_error_backoff_max_ms < self.store_error_backoff_ms {
            return Err(SettleError::InvalidConfig(
                "queue.store_error_backoff_max_ms must be >= queue.store_error_backoff_ms"
                    .to_string(),
            ));
        }
        Ok(())
    }

    pub fn idle_interval(&self) -> Duration {
        Duration::from_millis(self.idle_interval_ms)
    }

    pub fn reaper_interval(&self) -> Duration {
        Duration::from_millis(self.reaper_interval_ms)
    }

    pub fn default_delay(&self) -> Duration {
        Duration::from_millis(self.default_delay_ms)
    }

    pub fn store_error_backoff(&self) -> Duration {
        Duration::from_millis(self.store_error_backoff_ms)
    }

    pub fn store_error_backoff_max(&self) -> Duration {
        Duration::from_millis(self.store_error_backoff_max_ms)
    }

    /// Visibility timeout as a score offset (ms).
    pub fn visibility_timeout_i64(&self) -> i64 {
        to_i64(self.visibility_timeout_ms)
    }

    pub fn retry_backoff_i64(&self) -> i64 {
        to_i64(self.retry_backoff_ms)
    }

    pub fn retention_ttl_ms(&self) -> i64 {
        to_i64(self.retention_ttl_sec.saturating_mul(1_000))
    }
}

fn to_i64(v: u64) -> i64 {
    i64::try_from(v).unwrap_or(i64::MAX)
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}
fn default_idle_interval_ms() -> u64 {
    DEFAULT_IDLE_INTERVAL_MS
}
fn default_visibility_timeout_ms() -> u64 {
    DEFAULT_VISIBILITY_TIMEOUT_MS
}
fn default_reaper_interval_ms() -> u64 {
    DEFAULT_REAPER_INTERVAL_MS
}
fn default_reaper_batch_size() -> usize {
    DEFAULT_REAPER_BATCH_SIZE
}
fn default_retry_backoff_ms() -> u64 {
    DEFAULT_RETRY_BACKOFF_MS
}
fn default_retention_ttl_sec() -> u64 {
    DEFAULT_RETENTION_TTL_SEC
}
fn default_delay_ms() -> u64 {
    DEFAULT_DELAY_MS
}
fn default_store_error_backoff_ms() -> u64 {
    DEFAULT_STORE_ERROR_BACKOFF_MS
}
fn default_store_error_backoff_max_ms() -> u64 {
    DEFAULT_STORE_ERROR_BACKOFF_MAX_MS
}
fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.settle/settle.db", home)
}

impl SettleConfig {
    /// Load config from a TOML file with SETTLE_* env var overrides.
    ///
    /// Checks in order:
    ///   1. Explicit path argument
    ///   2. ~/.settle/settle.toml
    ///
    /// Nested keys use a double underscore: `SETTLE_QUEUE__BATCH_SIZE=10`.
    /// A missing file is not an error; every field has a default.
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);
        debug!(path = %path, "loading config");

        let config: SettleConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("SETTLE_").split("__"))
            .extract()
            .map_err(|e| SettleError::Config(e.to_string()))?;

        config.queue.validate()?;
        Ok(config)
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.settle/settle.toml", home)
}

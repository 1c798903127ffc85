//! Config structs and TOML loading.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Configuration loading error.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Limits governing batch formation, shared by the log and span batchers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchLimits {
    /// A batch closes as soon as it holds this many records.
    pub max_records_per_batch: usize,
    /// A non-empty batch closes once it has been open this long.
    pub max_batch_age_ms: u64,
}

impl Default for BatchLimits {
    fn default() -> Self {
        Self {
            max_records_per_batch: 20,
            max_batch_age_ms: 60_000,
        }
    }
}

impl BatchLimits {
    pub fn max_batch_age(&self) -> Duration {
        Duration::from_millis(self.max_batch_age_ms)
    }
}

/// Session lifecycle limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionLimits {
    /// How often a live session refreshes its last-heartbeat time.
    pub heartbeat_interval_ms: u64,
    /// Tolerance when associating a crash timestamp with a stored session.
    pub crash_grace_window_ms: u64,
}

impl Default for SessionLimits {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: 5_000,
            crash_grace_window_ms: 5_000,
        }
    }
}

impl SessionLimits {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn crash_grace_window(&self) -> Duration {
        Duration::from_millis(self.crash_grace_window_ms)
    }
}

/// Retry policy for network dispatch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryLimits {
    /// Immediate retries attempted inside one `upload` call.
    pub automatic_retry_count: u32,
    /// Total attempts after which a cached entry is dropped as stale.
    pub attempt_ceiling: u32,
    /// Base delay between immediate retries; doubles per attempt.
    pub base_backoff_ms: u64,
    /// Upper bound on the backoff delay.
    pub max_backoff_ms: u64,
    /// Timeout applied to each individual network call.
    pub request_timeout_ms: u64,
}

impl Default for RetryLimits {
    fn default() -> Self {
        Self {
            automatic_retry_count: 3,
            attempt_ceiling: 10,
            base_backoff_ms: 1_000,
            max_backoff_ms: 30_000,
            request_timeout_ms: 15_000,
        }
    }
}

impl RetryLimits {
    pub fn base_backoff(&self) -> Duration {
        Duration::from_millis(self.base_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Exponential backoff for the given zero-based retry ordinal.
    pub fn backoff_for(&self, retry: u32) -> Duration {
        let factor = 1u64 << retry.min(16);
        self.base_backoff()
            .saturating_mul(factor as u32)
            .min(self.max_backoff())
    }
}

/// Upload cache housekeeping limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheLimits {
    /// Entries older than this are dropped by the stale-cleanup pass.
    pub max_payload_age_ms: u64,
}

impl Default for CacheLimits {
    fn default() -> Self {
        Self {
            // 15 days
            max_payload_age_ms: 15 * 24 * 60 * 60 * 1_000,
        }
    }
}

impl CacheLimits {
    pub fn max_payload_age(&self) -> Duration {
        Duration::from_millis(self.max_payload_age_ms)
    }
}

/// Collector endpoints, one per payload kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Endpoints {
    pub base_url: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            base_url: "https://collector.invalid".into(),
        }
    }
}

impl Endpoints {
    pub fn sessions_url(&self) -> String {
        format!("{}/v1/sessions", self.base_url)
    }

    pub fn spans_url(&self) -> String {
        format!("{}/v1/spans", self.base_url)
    }

    pub fn logs_url(&self) -> String {
        format!("{}/v1/logs", self.base_url)
    }

    pub fn blobs_url(&self) -> String {
        format!("{}/v1/blobs", self.base_url)
    }
}

/// Everything the upload coordinator needs.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadSettings {
    pub endpoints: Endpoints,
    pub retry: RetryLimits,
    pub cache: CacheLimits,
    /// App identifier sent with every request.
    pub api_key: String,
    /// Device identifier sent with every request.
    pub device_id: String,
}

/// Top-level pipeline configuration.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BeaconConfig {
    pub batch: BatchLimits,
    pub session: SessionLimits,
    pub upload: UploadSettings,
    /// Crash signals that are deliberate terminations; their reports are
    /// deleted without upload.
    pub crash_signal_ignore_list: Vec<String>,
}

impl BeaconConfig {
    /// Parse a config from TOML text. Missing sections fall back to
    /// defaults.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Load a config from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }
}

/// `config.rs` - link and runtime settings
///
/// Every field has a default, so an empty TOML file (or none at all) is valid.
/// The engine URL can be overridden with `SLOTLINK_URL`.
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

pub const URL_ENV_VAR: &str = "SLOTLINK_URL";
pub const DEFAULT_URL: &str = "ws://localhost:29551";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub link: LinkConfig,
    pub runtime: RuntimeConfig,
}

/// Engine connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    pub url: String,
    pub request_timeout_ms: u64,
    pub reconnect: bool,
    pub reconnect_backoff_ms: u64,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_URL.to_string(),
            request_timeout_ms: 30_000,
            reconnect: false,
            reconnect_backoff_ms: 3_000,
        }
    }
}

impl LinkConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn reconnect_backoff(&self) -> Duration {
        Duration::from_millis(self.reconnect_backoff_ms)
    }
}

/// Script runtime settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Interval of the shared tick loop (16 ms is roughly one display frame)
    pub tick_interval_ms: u64,
    /// Entries kept in the shared script log
    pub log_capacity: usize,
    /// Per-instance Lua heap cap, 0 = unlimited
    pub memory_limit_mb: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 16,
            log_capacity: 500,
            memory_limit_mb: 64,
        }
    }
}

impl RuntimeConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }

    pub fn memory_limit_bytes(&self) -> Option<usize> {
        (self.memory_limit_mb > 0).then(|| self.memory_limit_mb.saturating_mul(1024 * 1024))
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Apply `SLOTLINK_URL` on top of whatever was loaded.
    pub fn apply_env(mut self) -> Self {
        if let Ok(url) = std::env::var(URL_ENV_VAR) {
            if !url.trim().is_empty() {
                self.link.url = url;
            }
        }
        self
    }
}

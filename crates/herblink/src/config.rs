//! Configuration management for herblink.
//!
//! This module provides configuration loading and validation using figment,
//! supporting TOML config files, environment variables, and defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "config.toml";

/// Default data directory name.
const DATA_DIR_NAME: &str = "herblink";

/// Default database file name.
const DATABASE_FILE_NAME: &str = "submissions.db";

/// Prefix for environment overrides; nested keys are joined with `__`.
const ENV_PREFIX: &str = "HERBLINK_";

/// Application configuration.
///
/// Configuration is loaded from (in order of precedence, highest first):
/// 1. Environment variables (prefixed with `HERBLINK_`, e.g. `HERBLINK_SYNC__MAX_IN_FLIGHT`)
/// 2. TOML config file at `~/.config/herblink/config.toml`
/// 3. Default values
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Storage configuration.
    pub storage: StorageConfig,
    /// Remote service configuration.
    pub remote: RemoteConfig,
    /// Sync engine configuration.
    pub sync: SyncConfig,
}

/// Storage-related configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Path to the database file.
    /// Defaults to `~/.local/share/herblink/submissions.db`
    pub database_path: Option<PathBuf>,
    /// Delete records as soon as the service has accepted them.
    pub remove_synced: bool,
}

/// Remote service configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Base URL of the HerbLink API.
    pub base_url: String,
    /// Path submissions are posted to.
    pub submit_path: String,
    /// Path probed for reachability.
    pub health_path: String,
    /// Per-request timeout in seconds.
    pub request_timeout_secs: u64,
}

/// Sync engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Maximum concurrent uploads.
    pub max_in_flight: usize,
    /// First retry delay in milliseconds.
    pub backoff_base_ms: u64,
    /// Longest retry delay in milliseconds.
    pub backoff_cap_ms: u64,
    /// Fraction of each delay that may be randomly shaved off.
    pub backoff_jitter: f64,
    /// Seconds between passes and connectivity probes in daemon mode.
    pub poll_interval_secs: u64,
    /// Attempts before a transiently failing record needs a manual retry.
    /// Set to 0 for unlimited.
    pub max_attempts: u32,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8001".to_string(),
            submit_path: "/api/herbs".to_string(),
            health_path: "/api/".to_string(),
            request_timeout_secs: 30,
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_in_flight: 3,
            backoff_base_ms: 2_000,
            backoff_cap_ms: 300_000, // 5 minutes
            backoff_jitter: 0.5,
            poll_interval_secs: 30,
            max_attempts: 0,
        }
    }
}

fn invalid(message: impl Into<String>) -> Error {
    Error::ConfigValidation {
        message: message.into(),
    }
}

impl Config {
    /// Load configuration from all sources.
    ///
    /// Configuration is loaded in this order (later sources override earlier):
    /// 1. Default values
    /// 2. TOML config file (if exists)
    /// 3. Environment variables (prefixed with `HERBLINK_`)
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading or parsing fails.
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Load configuration with an optional custom config path.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading, parsing or validation fails.
    pub fn load_from(config_path: Option<PathBuf>) -> Result<Self> {
        let config_file = config_path.unwrap_or_else(Self::default_config_path);

        let config: Config = Self::figment(&config_file).extract()?;
        config.validate()?;
        Ok(config)
    }

    fn figment(config_file: &Path) -> Figment {
        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(config_file))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Get the default configuration file path.
    #[must_use]
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from(".config"))
            .join(DATA_DIR_NAME)
            .join(CONFIG_FILE_NAME)
    }

    /// Get the default data directory path.
    #[must_use]
    pub fn default_data_dir() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from(".local/share"))
            .join(DATA_DIR_NAME)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration values are invalid.
    pub fn validate(&self) -> Result<()> {
        let sync = &self.sync;
        if sync.max_in_flight == 0 {
            return Err(invalid("max_in_flight must be greater than 0"));
        }
        if sync.poll_interval_secs == 0 {
            return Err(invalid("poll_interval_secs must be greater than 0"));
        }
        if sync.backoff_base_ms > sync.backoff_cap_ms {
            return Err(invalid(format!(
                "backoff_base_ms ({}) cannot be greater than backoff_cap_ms ({})",
                sync.backoff_base_ms, sync.backoff_cap_ms
            )));
        }
        if !(0.0..=1.0).contains(&sync.backoff_jitter) {
            return Err(invalid(format!(
                "backoff_jitter must be between 0 and 1, got {}",
                sync.backoff_jitter
            )));
        }

        let remote = &self.remote;
        match reqwest::Url::parse(&remote.base_url) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => {}
            Ok(url) => {
                return Err(invalid(format!(
                    "base_url must use http or https, got {}",
                    url.scheme()
                )))
            }
            Err(e) => return Err(invalid(format!("invalid base_url {:?}: {e}", remote.base_url))),
        }
        for (name, path) in [
            ("submit_path", &remote.submit_path),
            ("health_path", &remote.health_path),
        ] {
            if !path.starts_with('/') {
                return Err(invalid(format!("{name} must start with '/', got {path:?}")));
            }
        }
        if remote.request_timeout_secs == 0 {
            return Err(invalid("request_timeout_secs must be greater than 0"));
        }

        Ok(())
    }

    /// Get the database path, resolving defaults if not set.
    #[must_use]
    pub fn database_path(&self) -> PathBuf {
        self.storage
            .database_path
            .clone()
            .unwrap_or_else(|| Self::default_data_dir().join(DATABASE_FILE_NAME))
    }

    /// Get the daemon poll interval as a Duration.
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.sync.poll_interval_secs)
    }
}

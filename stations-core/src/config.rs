use anyhow::{Context, Result, anyhow};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::provider::ProviderId;

pub const MIN_INTERVAL_HOURS: f64 = 0.5;
pub const MAX_INTERVAL_HOURS: f64 = 24.0;
const DEFAULT_INTERVAL_HOURS: f64 = 1.0;
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 15;
const MAX_HTTP_TIMEOUT_SECS: u64 = 120;

/// Configuration for a single provider (e.g., API key).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub api_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub bind_address: String,
    pub bind_port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1".to_string(),
            bind_port: 8080,
        }
    }
}

/// Top-level configuration stored on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Minimum hours between two weather fetches for the same station.
    #[serde(default = "default_interval_hours")]
    pub refresh_interval_hours: f64,

    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,

    /// Station database; defaults to the platform data directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_path: Option<PathBuf>,

    /// Example TOML:
    /// [providers.openweather]
    /// api_key = "..."
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,

    #[serde(default)]
    pub server: ServerConfig,
}

fn default_interval_hours() -> f64 {
    DEFAULT_INTERVAL_HOURS
}

fn default_http_timeout_secs() -> u64 {
    DEFAULT_HTTP_TIMEOUT_SECS
}

impl Default for Config {
    fn default() -> Self {
        Self {
            refresh_interval_hours: DEFAULT_INTERVAL_HOURS,
            http_timeout_secs: DEFAULT_HTTP_TIMEOUT_SECS,
            database_path: None,
            providers: HashMap::new(),
            server: ServerConfig::default(),
        }
    }
}

impl Config {
    pub fn provider_config(&self, id: ProviderId) -> Option<&ProviderConfig> {
        self.providers.get(id.as_str())
    }

    /// Load config from disk, or return an empty default if it doesn't exist yet.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_file_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            // First run: no config file, return defaults.
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let cfg: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(cfg)
    }

    /// Save config to disk, creating parent directories as needed.
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_file_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let toml =
            toml::to_string_pretty(self).context("Failed to serialize configuration to TOML")?;

        fs::write(path, toml)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    fn project_dirs() -> Result<ProjectDirs> {
        ProjectDirs::from("dev", "weather-stations", "stations")
            .ok_or_else(|| anyhow!("Could not determine platform config directory"))
    }

    /// Path to the config file.
    pub fn config_file_path() -> Result<PathBuf> {
        Ok(Self::project_dirs()?.config_dir().join("config.toml"))
    }

    /// Configured database path, or `stations.db` in the platform data directory.
    pub fn resolved_database_path(&self) -> Result<PathBuf> {
        match &self.database_path {
            Some(path) => Ok(path.clone()),
            None => Ok(Self::project_dirs()?.data_dir().join("stations.db")),
        }
    }

    /// Set or replace a provider API key.
    pub fn upsert_provider_api_key(&mut self, provider_id: ProviderId, api_key: String) {
        self.providers
            .insert(provider_id.as_str().to_string(), ProviderConfig { api_key });
    }

    /// Returns API key for a provider, if present and non-blank.
    pub fn provider_api_key(&self, provider_id: ProviderId) -> Option<&str> {
        self.provider_config(provider_id)
            .map(|cfg| cfg.api_key.as_str())
            .filter(|key| !key.trim().is_empty())
    }

    pub fn is_provider_configured(&self, provider_id: ProviderId) -> bool {
        self.provider_api_key(provider_id).is_some()
    }
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ConfigError {
    #[error(
        "refresh_interval_hours must be between {min} and {max}, got {0}",
        min = MIN_INTERVAL_HOURS,
        max = MAX_INTERVAL_HOURS
    )]
    IntervalOutOfRange(f64),
    #[error("http_timeout_secs must be between 1 and {max}, got {0}", max = MAX_HTTP_TIMEOUT_SECS)]
    TimeoutOutOfRange(u64),
    #[error(
        "No API key configured for provider '{0}'.\n\
         Hint: run `stations configure` and enter your API key."
    )]
    MissingApiKey(ProviderId),
}

/// Validated settings the refresh engine runs with.
#[derive(Debug, Clone, PartialEq)]
pub struct RefreshSettings {
    pub interval_hours: f64,
    pub api_key: String,
    pub http_timeout: Duration,
}

/// Check a refresh interval against the accepted range.
pub fn validate_interval(interval: f64) -> Result<f64, ConfigError> {
    if !interval.is_finite() || !(MIN_INTERVAL_HOURS..=MAX_INTERVAL_HOURS).contains(&interval) {
        return Err(ConfigError::IntervalOutOfRange(interval));
    }
    Ok(interval)
}

impl RefreshSettings {
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let interval = validate_interval(config.refresh_interval_hours)?;

        let timeout = config.http_timeout_secs;
        if !(1..=MAX_HTTP_TIMEOUT_SECS).contains(&timeout) {
            return Err(ConfigError::TimeoutOutOfRange(timeout));
        }

        let api_key = config
            .provider_api_key(ProviderId::OpenWeather)
            .ok_or(ConfigError::MissingApiKey(ProviderId::OpenWeather))?;

        Ok(Self {
            interval_hours: interval,
            api_key: api_key.to_string(),
            http_timeout: Duration::from_secs(timeout),
        })
    }
}

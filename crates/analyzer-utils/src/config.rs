//! Configuration management utilities
//!
//! [`Config`] is the flat, serializable view of every tunable in the
//! orchestration core. It can be read from a JSON file, overridden from
//! `ANALYZER_*` environment variables, and is converted into the typed
//! per-component configs by `analyzer-core`.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Environment variable prefix used by [`Config::with_env_overrides`]
pub const ENV_PREFIX: &str = "ANALYZER_";

/// Errors raised while loading or validating configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Configuration file could not be read
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Configuration file is not valid JSON for [`Config`]
    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// An environment override carried an unusable value
    #[error("Invalid value for {name}: {value}")]
    InvalidEnv { name: String, value: String },

    /// A field failed validation
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human readable lines
    #[default]
    Plain,
    /// One JSON object per line
    Json,
}

/// Main configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Maximum number of dispatched events kept in the broker history
    pub event_history_limit: usize,
    /// Maximum number of state change records kept
    pub state_history_limit: usize,
    /// Quiet interval before a burst of state changes is persisted
    pub persist_debounce_ms: u64,
    /// Maximum depth of the navigation history stack
    pub navigation_history_limit: usize,
    /// Where to persist state; `None` keeps state in memory only
    pub state_file: Option<PathBuf>,
    /// Log output format
    pub log_format: LogFormat,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            event_history_limit: 100,
            state_history_limit: 100,
            persist_debounce_ms: 1000,
            navigation_history_limit: 50,
            state_file: None,
            log_format: LogFormat::Plain,
        }
    }
}

impl Config {
    /// Load configuration from a JSON file
    ///
    /// Missing fields take their default values.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Apply `ANALYZER_*` environment overrides
    pub fn with_env_overrides(self) -> Result<Self, ConfigError> {
        self.with_overrides(|name| std::env::var(name).ok())
    }

    /// Apply overrides from an arbitrary lookup function
    ///
    /// Split out from [`Config::with_env_overrides`] so overrides can be
    /// exercised without touching the process environment.
    pub fn with_overrides<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |suffix: &str| {
            let name = format!("{ENV_PREFIX}{suffix}");
            lookup(&name).map(|value| (name, value))
        };

        if let Some((name, value)) = var("EVENT_HISTORY_LIMIT") {
            self.event_history_limit = parse_number(&name, &value)?;
        }
        if let Some((name, value)) = var("STATE_HISTORY_LIMIT") {
            self.state_history_limit = parse_number(&name, &value)?;
        }
        if let Some((name, value)) = var("PERSIST_DEBOUNCE_MS") {
            self.persist_debounce_ms = parse_number(&name, &value)?;
        }
        if let Some((name, value)) = var("NAVIGATION_HISTORY_LIMIT") {
            self.navigation_history_limit = parse_number(&name, &value)?;
        }
        if let Some((_, value)) = var("STATE_FILE") {
            self.state_file = (!value.is_empty()).then(|| PathBuf::from(value));
        }
        if let Some((name, value)) = var("LOG_FORMAT") {
            self.log_format = match value.to_ascii_lowercase().as_str() {
                "plain" => LogFormat::Plain,
                "json" => LogFormat::Json,
                _ => return Err(ConfigError::InvalidEnv { name, value }),
            };
        }

        Ok(self)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.event_history_limit == 0 {
            return Err(ConfigError::Invalid(
                "event_history_limit must be greater than 0".to_string(),
            ));
        }
        if self.state_history_limit == 0 {
            return Err(ConfigError::Invalid(
                "state_history_limit must be greater than 0".to_string(),
            ));
        }
        if self.navigation_history_limit == 0 {
            return Err(ConfigError::Invalid(
                "navigation_history_limit must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_number<T: std::str::FromStr>(name: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidEnv {
        name: name.to_string(),
        value: value.to_string(),
    })
}

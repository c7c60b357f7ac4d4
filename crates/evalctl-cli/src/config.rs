// evalctl-cli/src/config.rs
// ============================================================================
// Module: Engine Configuration
// Description: The enumerated configuration surface for an evalctl process,
//              loaded from an optional TOML file with environment overrides.
// Purpose: Validate every setting once at startup so the rest of the
//          process can treat `EngineConfig` as already correct.
// Dependencies: serde, toml
// ============================================================================

//! ## Overview
//! Configuration lives here, in the CLI crate, rather than in
//! `evalctl-core` or `evalctl-tasks`: the orchestration core takes an
//! already-validated configuration by value and never reads the
//! environment or the filesystem itself. Precedence is file, then
//! environment variable, then built-in default.

use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Environment variable overriding [`EngineConfig::database_path`].
const ENV_DATABASE_PATH: &str = "EVALCTL_DATABASE_PATH";
/// Environment variable overriding [`EngineConfig::storage_root`].
const ENV_STORAGE_ROOT: &str = "EVALCTL_STORAGE_ROOT";
/// Environment variable overriding [`EngineConfig::worker_count`].
const ENV_WORKER_COUNT: &str = "EVALCTL_WORKER_COUNT";
/// Environment variable overriding [`EngineConfig::worker_poll_interval_ms`].
const ENV_WORKER_POLL_INTERVAL_MS: &str = "EVALCTL_WORKER_POLL_INTERVAL_MS";
/// Environment variable overriding [`EngineConfig::task_max_retries_default`].
const ENV_TASK_MAX_RETRIES_DEFAULT: &str = "EVALCTL_TASK_MAX_RETRIES_DEFAULT";
/// Environment variable overriding [`EngineConfig::task_cleanup_days`].
const ENV_TASK_CLEANUP_DAYS: &str = "EVALCTL_TASK_CLEANUP_DAYS";
/// Environment variable overriding [`EngineConfig::log_format`].
const ENV_LOG_FORMAT: &str = "EVALCTL_LOG_FORMAT";
/// Environment variable overriding [`EngineConfig::log_level`].
const ENV_LOG_LEVEL: &str = "EVALCTL_LOG_LEVEL";

/// How `tracing-subscriber` should render log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Human-readable, single-line-per-event output.
    #[default]
    Text,
    /// Newline-delimited JSON, one object per event.
    Json,
}

/// Errors loading or validating an [`EngineConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The TOML file could not be read.
    #[error("failed to read config file {path}: {source}")]
    Read {
        /// Path that failed to read.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The TOML file could not be parsed.
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        /// Path that failed to parse.
        path: PathBuf,
        /// Underlying parse error.
        #[source]
        source: toml::de::Error,
    },
    /// An environment variable override could not be parsed as its
    /// expected type.
    #[error("environment variable {variable} has an invalid value: {value}")]
    InvalidEnvValue {
        /// Name of the offending environment variable.
        variable: &'static str,
        /// The value that failed to parse.
        value: String,
    },
    /// A validated field is out of its allowed range.
    #[error("{field} must be {constraint}, got {value}")]
    OutOfRange {
        /// Name of the offending field.
        field: &'static str,
        /// Description of the allowed range.
        constraint: &'static str,
        /// The rejected value, rendered as text.
        value: String,
    },
}

/// The full set of settings an evalctl process needs at startup.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Path to the `SQLite` database file.
    pub database_path: PathBuf,
    /// Root directory the built-in filesystem object store writes under.
    pub storage_root: PathBuf,
    /// Number of worker threads draining the task queue.
    pub worker_count: usize,
    /// How long an idle worker sleeps between empty polls, in
    /// milliseconds.
    pub worker_poll_interval_ms: u64,
    /// Default retry budget for tasks enqueued without an explicit
    /// override.
    pub task_max_retries_default: u32,
    /// Age, in days, beyond which terminal tasks are eligible for
    /// cleanup.
    pub task_cleanup_days: u32,
    /// Log line rendering.
    pub log_format: LogFormat,
    /// `tracing-subscriber` env-filter directive, e.g. `"info"` or
    /// `"evalctl_tasks=debug,info"`.
    pub log_level: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("evalctl.sqlite3"),
            storage_root: PathBuf::from("evalctl-blobs"),
            worker_count: 4,
            worker_poll_interval_ms: 1_000,
            task_max_retries_default: 3,
            task_cleanup_days: 30,
            log_format: LogFormat::default(),
            log_level: "info".to_owned(),
        }
    }
}

impl EngineConfig {
    /// Loads configuration from an optional TOML file, applies
    /// environment-variable overrides, and validates the result.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file exists but cannot be read or
    /// parsed, if an environment override cannot be parsed, or if any
    /// field fails validation.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and parses a TOML config file.
    fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Read { path: path.to_path_buf(), source })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse { path: path.to_path_buf(), source })
    }

    /// Overlays environment-variable overrides onto an already-loaded
    /// configuration.
    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = env_var(ENV_DATABASE_PATH) {
            self.database_path = PathBuf::from(value);
        }
        if let Some(value) = env_var(ENV_STORAGE_ROOT) {
            self.storage_root = PathBuf::from(value);
        }
        if let Some(value) = env_var(ENV_WORKER_COUNT) {
            self.worker_count = parse_env(ENV_WORKER_COUNT, &value)?;
        }
        if let Some(value) = env_var(ENV_WORKER_POLL_INTERVAL_MS) {
            self.worker_poll_interval_ms = parse_env(ENV_WORKER_POLL_INTERVAL_MS, &value)?;
        }
        if let Some(value) = env_var(ENV_TASK_MAX_RETRIES_DEFAULT) {
            self.task_max_retries_default = parse_env(ENV_TASK_MAX_RETRIES_DEFAULT, &value)?;
        }
        if let Some(value) = env_var(ENV_TASK_CLEANUP_DAYS) {
            self.task_cleanup_days = parse_env(ENV_TASK_CLEANUP_DAYS, &value)?;
        }
        if let Some(value) = env_var(ENV_LOG_FORMAT) {
            self.log_format = match value.as_str() {
                "json" => LogFormat::Json,
                _ => LogFormat::Text,
            };
        }
        if let Some(value) = env_var(ENV_LOG_LEVEL) {
            self.log_level = value;
        }
        Ok(())
    }

    /// Rejects configurations that would leave the engine unable to make
    /// progress.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.worker_count == 0 {
            return Err(ConfigError::OutOfRange {
                field: "worker_count",
                constraint: "at least 1",
                value: self.worker_count.to_string(),
            });
        }
        if self.worker_poll_interval_ms == 0 {
            return Err(ConfigError::OutOfRange {
                field: "worker_poll_interval_ms",
                constraint: "at least 1",
                value: self.worker_poll_interval_ms.to_string(),
            });
        }
        Ok(())
    }
}

/// Reads an environment variable, treating an empty value the same as an
/// unset one.
fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|value| !value.is_empty())
}

/// Parses an environment-variable override into its target type.
fn parse_env<T: std::str::FromStr>(variable: &'static str, value: &str) -> Result<T, ConfigError> {
    value
        .parse()
        .map_err(|_| ConfigError::InvalidEnvValue { variable, value: value.to_owned() })
}

#[cfg(test)]
mod tests {
    use super::{ConfigError, EngineConfig};

    #[test]
    fn defaults_are_valid() -> Result<(), ConfigError> {
        EngineConfig::default().validate()
    }

    #[test]
    fn zero_workers_is_rejected() {
        let mut config = EngineConfig::default();
        config.worker_count = 0;
        assert!(matches!(config.validate(), Err(ConfigError::OutOfRange { field: "worker_count", .. })));
    }
}

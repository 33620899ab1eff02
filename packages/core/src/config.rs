//! Loader Configuration
//!
//! Settings for one batch load. Values are layered, lowest precedence
//! first: [`LoaderConfig::default`], an optional JSON file
//! ([`LoaderConfig::from_file`]), `PROVGRAPH_*` environment variables
//! ([`LoaderConfig::apply_env`]), and finally command-line flags applied
//! by the loader binary.

use crate::services::LabelCase;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Prefix of every environment variable read by [`LoaderConfig::apply_env`]
pub const ENV_PREFIX: &str = "PROVGRAPH_";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Invalid value for {var}: '{value}'")]
    InvalidEnv { var: String, value: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Bounded retry with exponential backoff for a whole row transaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts per row, including the first
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 50,
            max_backoff_ms: 2000,
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// No retries at all
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay before the attempt following `attempt` (1-based)
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32) as i32;
        let millis = self.initial_backoff_ms as f64 * self.multiplier.powi(exponent);
        Duration::from_millis(millis.min(self.max_backoff_ms as f64) as u64)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.max_attempts == 0 {
            return Err("retry.max_attempts must be at least 1".to_string());
        }
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err("retry.multiplier must be a finite number >= 1.0".to_string());
        }
        if self.initial_backoff_ms > self.max_backoff_ms {
            return Err("retry.initial_backoff_ms cannot exceed retry.max_backoff_ms".to_string());
        }
        Ok(())
    }
}

/// Configuration for a batch load
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    /// libsql database file holding the graph
    pub database_path: PathBuf,

    /// Rows merged concurrently
    pub max_concurrency: usize,

    /// Store connections open at once
    pub max_connections: usize,

    /// Deadline for one row transaction, per attempt
    pub row_timeout_ms: u64,

    pub retry: RetryPolicy,

    /// Consecutive `ConnectionLost` row failures that abort the batch
    pub max_consecutive_connection_failures: u32,

    /// Abort the batch on the first failed row
    pub stop_on_error: bool,

    pub label_case: LabelCase,

    /// Closed set of node labels; any label is accepted when unset
    pub known_labels: Option<Vec<String>>,

    /// SQLite busy timeout per connection
    pub busy_timeout_ms: u64,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("provenance.db"),
            max_concurrency: 4,
            max_connections: 4,
            row_timeout_ms: 30_000,
            retry: RetryPolicy::default(),
            max_consecutive_connection_failures: 3,
            stop_on_error: false,
            label_case: LabelCase::Preserve,
            known_labels: None,
            busy_timeout_ms: 5_000,
        }
    }
}

impl LoaderConfig {
    /// Load a JSON config file; missing keys keep their defaults
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Override settings from `PROVGRAPH_*` variables in the process environment
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_vars(std::env::vars())
    }

    /// Override settings from `(name, value)` pairs
    ///
    /// Unknown `PROVGRAPH_*` names are ignored. `PROVGRAPH_KNOWN_LABELS`
    /// is a comma-separated list.
    pub fn apply_vars<I>(&mut self, vars: I) -> Result<(), ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (var, value) in vars {
            let Some(key) = var.strip_prefix(ENV_PREFIX) else {
                continue;
            };
            match key {
                "DATABASE_PATH" => self.database_path = PathBuf::from(&value),
                "MAX_CONCURRENCY" => self.max_concurrency = parse_var(&var, &value)?,
                "MAX_CONNECTIONS" => self.max_connections = parse_var(&var, &value)?,
                "ROW_TIMEOUT_MS" => self.row_timeout_ms = parse_var(&var, &value)?,
                "MAX_ATTEMPTS" => self.retry.max_attempts = parse_var(&var, &value)?,
                "MAX_CONSECUTIVE_CONNECTION_FAILURES" => {
                    self.max_consecutive_connection_failures = parse_var(&var, &value)?
                }
                "STOP_ON_ERROR" => self.stop_on_error = parse_bool(&var, &value)?,
                "LABEL_CASE" => {
                    self.label_case = match value.trim().to_ascii_lowercase().as_str() {
                        "preserve" => LabelCase::Preserve,
                        "capitalize" => LabelCase::Capitalize,
                        _ => {
                            return Err(ConfigError::InvalidEnv {
                                var: var.clone(),
                                value: value.clone(),
                            })
                        }
                    }
                }
                "KNOWN_LABELS" => {
                    let labels: Vec<String> = value
                        .split(',')
                        .map(str::trim)
                        .filter(|l| !l.is_empty())
                        .map(String::from)
                        .collect();
                    self.known_labels = (!labels.is_empty()).then_some(labels);
                }
                "BUSY_TIMEOUT_MS" => self.busy_timeout_ms = parse_var(&var, &value)?,
                _ => tracing::debug!("Ignoring unknown setting {}", var),
            }
        }
        Ok(())
    }

    pub fn row_timeout(&self) -> Duration {
        Duration::from_millis(self.row_timeout_ms)
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database_path.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("database_path cannot be empty".to_string()));
        }
        if self.max_concurrency == 0 {
            return Err(ConfigError::Invalid(
                "max_concurrency must be greater than 0".to_string(),
            ));
        }
        if self.max_connections == 0 {
            return Err(ConfigError::Invalid(
                "max_connections must be greater than 0".to_string(),
            ));
        }
        if self.row_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "row_timeout_ms must be greater than 0".to_string(),
            ));
        }
        // Waiting for the write lock is part of a row attempt
        if self.busy_timeout_ms > self.row_timeout_ms {
            return Err(ConfigError::Invalid(format!(
                "busy_timeout_ms ({}) cannot exceed row_timeout_ms ({})",
                self.busy_timeout_ms, self.row_timeout_ms
            )));
        }
        if self.max_consecutive_connection_failures == 0 {
            return Err(ConfigError::Invalid(
                "max_consecutive_connection_failures must be greater than 0".to_string(),
            ));
        }
        self.retry.validate().map_err(ConfigError::Invalid)?;
        Ok(())
    }
}

fn parse_var<T: std::str::FromStr>(var: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidEnv {
        var: var.to_string(),
        value: value.to_string(),
    })
}

fn parse_bool(var: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidEnv {
            var: var.to_string(),
            value: value.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_default_config() {
        let config = LoaderConfig::default();
        assert_eq!(config.max_concurrency, 4);
        assert_eq!(config.row_timeout_ms, 30_000);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.max_consecutive_connection_failures, 3);
        assert!(!config.stop_on_error);
        assert_eq!(config.label_case, LabelCase::Preserve);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = LoaderConfig::default();

        config.max_concurrency = 0;
        assert!(config.validate().is_err());

        config.max_concurrency = 4;
        config.retry.max_attempts = 0;
        assert!(config.validate().is_err());

        config.retry.max_attempts = 3;
        config.retry.multiplier = 0.5;
        assert!(config.validate().is_err());

        config.retry.multiplier = 2.0;
        config.database_path = PathBuf::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_busy_timeout_cannot_outlast_row_timeout() {
        let mut config = LoaderConfig::default();
        config.row_timeout_ms = 100;
        config.busy_timeout_ms = 2_000;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        config.busy_timeout_ms = 100;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let retry = RetryPolicy::default();
        assert_eq!(retry.backoff(1), Duration::from_millis(50));
        assert_eq!(retry.backoff(2), Duration::from_millis(100));
        assert_eq!(retry.backoff(3), Duration::from_millis(200));
        assert_eq!(retry.backoff(30), Duration::from_millis(2000));
    }

    #[test]
    fn test_partial_config_file_keeps_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("loader.json");
        std::fs::write(
            &path,
            r#"{ "max_concurrency": 8, "label_case": "capitalize", "retry": { "max_attempts": 5 } }"#,
        )
        .unwrap();

        let config = LoaderConfig::from_file(&path).unwrap();
        assert_eq!(config.max_concurrency, 8);
        assert_eq!(config.label_case, LabelCase::Capitalize);
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.initial_backoff_ms, 50);
        assert_eq!(config.max_connections, 4);
    }

    #[test]
    fn test_bad_config_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("loader.json");
        std::fs::write(&path, "{ not json").unwrap();

        assert!(matches!(
            LoaderConfig::from_file(&path),
            Err(ConfigError::Parse { .. })
        ));
        assert!(matches!(
            LoaderConfig::from_file(temp_dir.path().join("missing.json")),
            Err(ConfigError::Read { .. })
        ));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = LoaderConfig::default();
        config
            .apply_vars(vars(&[
                ("PROVGRAPH_MAX_CONCURRENCY", "16"),
                ("PROVGRAPH_STOP_ON_ERROR", "true"),
                ("PROVGRAPH_LABEL_CASE", "Capitalize"),
                ("PROVGRAPH_KNOWN_LABELS", "Paper, Dataset,,"),
                ("PROVGRAPH_SOMETHING_ELSE", "x"),
                ("HOME", "/root"),
            ]))
            .unwrap();

        assert_eq!(config.max_concurrency, 16);
        assert!(config.stop_on_error);
        assert_eq!(config.label_case, LabelCase::Capitalize);
        assert_eq!(
            config.known_labels,
            Some(vec!["Paper".to_string(), "Dataset".to_string()])
        );
    }

    #[test]
    fn test_env_rejects_garbage() {
        let mut config = LoaderConfig::default();
        let err = config
            .apply_vars(vars(&[("PROVGRAPH_ROW_TIMEOUT_MS", "soon")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnv { .. }));
    }
}

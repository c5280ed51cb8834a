//! Configuration for the tunelab daemon.
//!
//! Loaded from a TOML file; every section has serde defaults so a partial
//! file (or none at all) yields a runnable configuration.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::ports::catalog::{CollectorSidecarConfig, SuggestionWorkerConfig};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    FileNotFound(String),
    #[error("Failed to read configuration: {0}")]
    ReadError(#[from] std::io::Error),
    #[error("Failed to parse configuration: {0}")]
    ParseError(#[from] toml::de::Error),
    #[error("Validation failed for {field}: {reason}")]
    ValidationError { field: String, reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub controllers: ControllerConfig,
    pub workers: WorkerHostConfig,
    pub jobs: JobConfig,
    pub catalog: CatalogConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            logging: LoggingConfig::default(),
            controllers: ControllerConfig::default(),
            workers: WorkerHostConfig::default(),
            jobs: JobConfig::default(),
            catalog: CatalogConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite:.tunelab/tunelab.db".to_string(),
            max_connections: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// EnvFilter directive, e.g. "info" or "tunelab=debug".
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    pub experiment_workers: usize,
    pub suggestion_workers: usize,
    pub trial_workers: usize,
    /// Poll interval while waiting on running workloads (ms).
    pub requeue_interval_ms: u64,
    /// Base delay of the transient-error backoff (ms).
    pub backoff_base_ms: u64,
    /// Upper bound of the backoff (ms).
    pub backoff_cap_ms: u64,
    /// Algorithm failures tolerated before the suggestion is marked Failed.
    pub algorithm_retry_budget: u32,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            experiment_workers: 4,
            suggestion_workers: 2,
            trial_workers: 4,
            requeue_interval_ms: 1000,
            backoff_base_ms: 100,
            backoff_cap_ms: 30_000,
            algorithm_retry_budget: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerHostConfig {
    /// Root directory for worker state volumes.
    pub state_root: PathBuf,
}

impl Default for WorkerHostConfig {
    fn default() -> Self {
        Self {
            state_root: PathBuf::from(".tunelab/workers"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobConfig {
    /// Root directory for trial workload scratch space and metrics files.
    pub work_root: PathBuf,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            work_root: PathBuf::from(".tunelab/trials"),
        }
    }
}

/// The runtime catalog as configured: worker images keyed by algorithm name,
/// sidecar images keyed by collector kind, named trial templates.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    pub suggestions: HashMap<String, SuggestionWorkerConfig>,
    pub collectors: HashMap<String, CollectorSidecarConfig>,
    pub templates: HashMap<String, serde_json::Value>,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path` when it exists, defaults otherwise.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        if path.as_ref().exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.controllers.experiment_workers == 0
            || self.controllers.suggestion_workers == 0
            || self.controllers.trial_workers == 0
        {
            return Err(ConfigError::ValidationError {
                field: "controllers".to_string(),
                reason: "worker counts must be at least 1".to_string(),
            });
        }
        if self.controllers.backoff_base_ms == 0 {
            return Err(ConfigError::ValidationError {
                field: "controllers.backoff_base_ms".to_string(),
                reason: "must be positive".to_string(),
            });
        }
        if self.controllers.backoff_cap_ms < self.controllers.backoff_base_ms {
            return Err(ConfigError::ValidationError {
                field: "controllers.backoff_cap_ms".to_string(),
                reason: "must be at least backoff_base_ms".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.controllers.experiment_workers, 4);
    }

    #[test]
    fn test_parse_partial_toml() {
        let toml_str = r#"
            [controllers]
            experiment_workers = 8

            [catalog.suggestions.random]
            image = "tunelab-worker-random"
            port = 7000
        "#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.controllers.experiment_workers, 8);
        // Untouched sections fall back to defaults.
        assert_eq!(config.controllers.trial_workers, 4);
        let worker = config.catalog.suggestions.get("random").unwrap();
        assert_eq!(worker.image, "tunelab-worker-random");
        assert_eq!(worker.port, 7000);
    }

    #[test]
    fn test_invalid_worker_count_rejected() {
        let mut config = Config::default();
        config.controllers.trial_workers = 0;
        assert!(config.validate().is_err());
    }
}

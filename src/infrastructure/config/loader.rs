use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use thiserror::Error;

use crate::domain::models::config::Config;
use crate::domain::models::PhaseRegistries;

/// Project directory holding config, database and logs.
pub const PROJECT_DIR: &str = ".phaseflow";

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("Invalid log format: {0}. Must be one of: json, pretty")]
    InvalidLogFormat(String),

    #[error("Database path cannot be empty")]
    EmptyDatabasePath,

    #[error("Invalid max_connections: {0}. Must be at least 1")]
    InvalidMaxConnections(u32),

    #[error("Invalid error_history_limit: {0}. Must be at least 1")]
    InvalidErrorHistoryLimit(usize),

    #[error("Invalid registry override: {0}")]
    InvalidRegistry(String),
}

/// Configuration loader with hierarchical merging
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with hierarchical merging
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults (Serialized)
    /// 2. .phaseflow/config.yaml (project config, created by init)
    /// 3. .phaseflow/local.yaml (local overrides, optional)
    /// 4. Environment variables (`PHASEFLOW_*`, nested keys split on `__`)
    pub fn load() -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(format!("{PROJECT_DIR}/config.yaml")))
            .merge(Yaml::file(format!("{PROJECT_DIR}/local.yaml")))
            .merge(Env::prefixed("PHASEFLOW_").split("__"))
            .extract()
            .context("Failed to extract configuration from figment")?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific file, still honouring env overrides
    pub fn load_from_file(path: impl AsRef<std::path::Path>) -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(path.as_ref()))
            .merge(Env::prefixed("PHASEFLOW_").split("__"))
            .extract()
            .with_context(|| format!("Failed to load config from {}", path.as_ref().display()))?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(config: &Config) -> Result<(), ConfigError> {
        if config.database.path.is_empty() {
            return Err(ConfigError::EmptyDatabasePath);
        }

        if config.database.max_connections == 0 {
            return Err(ConfigError::InvalidMaxConnections(config.database.max_connections));
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&config.logging.level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }

        let valid_log_formats = ["json", "pretty"];
        if !valid_log_formats.contains(&config.logging.format.as_str()) {
            return Err(ConfigError::InvalidLogFormat(config.logging.format.clone()));
        }

        if config.flows.error_history_limit == 0 {
            return Err(ConfigError::InvalidErrorHistoryLimit(config.flows.error_history_limit));
        }

        Self::registries(config)?;
        Ok(())
    }

    /// Phase registries with the configured overrides applied.
    pub fn registries(config: &Config) -> Result<PhaseRegistries, ConfigError> {
        PhaseRegistries::from_overrides(&config.registries)
            .map_err(|e| ConfigError::InvalidRegistry(e.to_string()))
    }
}

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Main configuration structure for phaseflow
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Flow bookkeeping configuration
    #[serde(default)]
    pub flows: FlowsConfig,

    /// Per-kind phase registry replacements, keyed by flow kind name
    #[serde(default)]
    pub registries: BTreeMap<String, RegistryOverride>,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct DatabaseConfig {
    /// Path to `SQLite` database file
    #[serde(default = "default_database_path")]
    pub path: String,

    /// Maximum number of database connections in pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// How long a writer waits for a held flow lock before giving up
    #[serde(default = "default_busy_timeout_secs")]
    pub busy_timeout_secs: u64,
}

fn default_database_path() -> String {
    ".phaseflow/phaseflow.db".to_string()
}

const fn default_max_connections() -> u32 {
    10
}

const fn default_busy_timeout_secs() -> u64 {
    30
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
            max_connections: default_max_connections(),
            busy_timeout_secs: default_busy_timeout_secs(),
        }
    }
}

impl DatabaseConfig {
    /// sqlx connection URL for the configured path.
    pub fn url(&self) -> String {
        if self.path.starts_with("sqlite:") {
            self.path.clone()
        } else {
            format!("sqlite:{}", self.path)
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: json or pretty
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Directory for rolling log files (stdout only when unset)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_dir: Option<String>,

    /// Number of days to retain logs
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

const fn default_retention_days() -> u32 {
    30
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            log_dir: None,
            retention_days: default_retention_days(),
        }
    }
}

/// Flow bookkeeping configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct FlowsConfig {
    /// Number of entries kept in a master flow's error history
    #[serde(default = "default_error_history_limit")]
    pub error_history_limit: usize,
}

const fn default_error_history_limit() -> usize {
    10
}

impl Default for FlowsConfig {
    fn default() -> Self {
        Self {
            error_history_limit: default_error_history_limit(),
        }
    }
}

/// Replacement phase list for one flow kind
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RegistryOverride {
    /// Ordered phases; the last one is terminal
    #[serde(default)]
    pub phases: Vec<String>,

    /// Legacy name → canonical phase
    #[serde(default)]
    pub aliases: BTreeMap<String, String>,

    /// Phase → completion flag, for phases not following `<phase>_completed`
    #[serde(default)]
    pub flags: BTreeMap<String, String>,
}

//! Configuration management infrastructure
//!
//! Hierarchical configuration using figment:
//! - Programmatic defaults
//! - Project YAML files under `.phaseflow/`
//! - `PHASEFLOW_*` environment overrides

pub mod loader;

pub use loader::{ConfigError, ConfigLoader};

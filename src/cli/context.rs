//! Wiring shared by the commands that touch the database.

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;

use crate::adapters::sqlite::{initialize_database, SqliteFlowStore};
use crate::domain::models::{Config, PhaseRegistries};
use crate::infrastructure::config::ConfigLoader;
use crate::services::{ErrorRecorder, FlowExportService, FlowStateService, OperatorOverride, SubstringErrorClassifier};

/// Load configuration from `path`, or from the project hierarchy when `None`.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => ConfigLoader::load_from_file(path),
        None => ConfigLoader::load(),
    }
}

/// Configured registries plus an open, migrated store.
pub struct AppContext {
    pub config: Config,
    pub registries: Arc<PhaseRegistries>,
    pub store: Arc<SqliteFlowStore>,
}

impl AppContext {
    pub async fn open(config_path: Option<&Path>) -> Result<Self> {
        let config = load_config(config_path)?;
        let registries = Arc::new(ConfigLoader::registries(&config)?);
        let pool = initialize_database(&config.database)
            .await
            .with_context(|| {
                format!(
                    "Failed to open database at {}. Run 'phaseflow init' first.",
                    config.database.path
                )
            })?;

        Ok(Self {
            config,
            registries,
            store: Arc::new(SqliteFlowStore::new(pool)),
        })
    }

    pub fn state_service(&self) -> FlowStateService<SqliteFlowStore> {
        FlowStateService::new(self.store.clone(), self.registries.clone())
    }

    pub fn operator_override(&self) -> OperatorOverride<SqliteFlowStore> {
        OperatorOverride::new(self.store.clone(), self.registries.clone())
    }

    pub fn export_service(&self) -> FlowExportService<SqliteFlowStore> {
        FlowExportService::new(self.store.clone())
    }

    pub fn error_recorder(&self) -> ErrorRecorder<SqliteFlowStore> {
        ErrorRecorder::with_classifier(
            self.store.clone(),
            SubstringErrorClassifier,
            self.config.flows.error_history_limit,
        )
    }
}

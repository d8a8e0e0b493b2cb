//! Common test utilities for integration tests
//!
//! Shared fixtures: in-memory and file-backed stores, tenants and a small
//! three-phase registry.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;

use phaseflow::adapters::sqlite::{create_migrated_test_pool, initialize_database, SqliteFlowStore};
use phaseflow::domain::models::DatabaseConfig;
use phaseflow::{FlowKind, PhaseRegistries, PhaseRegistry, TenantContext};
use tempfile::TempDir;
use uuid::Uuid;

/// Single-connection in-memory store with the schema applied.
pub async fn memory_store() -> Arc<SqliteFlowStore> {
    let pool = create_migrated_test_pool().await.expect("Failed to create test pool");
    Arc::new(SqliteFlowStore::new(pool))
}

/// File-backed store allowing several concurrent connections.
///
/// Keep the returned `TempDir` alive for the duration of the test.
pub async fn file_store(max_connections: u32) -> (TempDir, Arc<SqliteFlowStore>) {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let path: PathBuf = dir.path().join("flows.db");
    let config = DatabaseConfig {
        path: path.to_string_lossy().to_string(),
        max_connections,
        busy_timeout_secs: 30,
    };
    let pool = initialize_database(&config).await.expect("Failed to initialize database");
    (dir, Arc::new(SqliteFlowStore::new(pool)))
}

pub fn tenant() -> TenantContext {
    TenantContext::new(Uuid::new_v4(), Uuid::new_v4(), "tester")
}

/// Planning flows reduced to phases `a`, `b`, `c`.
pub fn abc_registries() -> Arc<PhaseRegistries> {
    let registry = PhaseRegistry::from_phase_names(FlowKind::Planning, &["a", "b", "c"], &[])
        .expect("valid registry");
    Arc::new(PhaseRegistries::builtin().with_registry(registry))
}

/// Setup test logging
pub fn setup_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

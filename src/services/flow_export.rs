//! Read-only export of a flow's persisted state.

use std::sync::Arc;

use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{FlowSnapshot, TenantContext};
use crate::domain::ports::FlowStore;

pub struct FlowExportService<S: FlowStore> {
    store: Arc<S>,
}

impl<S: FlowStore> FlowExportService<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    pub async fn export(&self, tenant: &TenantContext, master_flow_id: Uuid) -> DomainResult<FlowSnapshot> {
        let master = self
            .store
            .get_master(tenant, master_flow_id)
            .await?
            .ok_or(DomainError::FlowNotFound(master_flow_id))?;
        let subordinates = self.store.list_subordinates(tenant, master_flow_id).await?;
        Ok(FlowSnapshot { master, subordinates })
    }

    /// Pretty-printed JSON export.
    pub async fn export_json(&self, tenant: &TenantContext, master_flow_id: Uuid) -> DomainResult<String> {
        let snapshot = self.export(tenant, master_flow_id).await?;
        Ok(serde_json::to_string_pretty(&snapshot)?)
    }
}

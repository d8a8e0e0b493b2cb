//! Persistence boundary used by collaborators.
//!
//! Collaborators read snapshots and write results, user input and free-form
//! state here. Phase changes are delegated to the transition engine; nothing
//! in this service writes `current_phase` or completion flags directly.

use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    FlowKind, FlowSnapshot, FlowStatus, PhasePayload, PhaseRegistries, SubordinateFlow,
    TenantContext,
};
use crate::domain::ports::FlowStore;
use crate::services::master_flow_orchestrator::MasterFlowOrchestrator;
use crate::services::phase_transition::{PhaseTransitionEngine, TransitionResult};

pub struct FlowStateService<S: FlowStore> {
    store: Arc<S>,
    registries: Arc<PhaseRegistries>,
    engine: PhaseTransitionEngine<S>,
    orchestrator: MasterFlowOrchestrator<S>,
}

impl<S: FlowStore> FlowStateService<S> {
    pub fn new(store: Arc<S>, registries: Arc<PhaseRegistries>) -> Self {
        Self {
            engine: PhaseTransitionEngine::new(store.clone(), registries.clone()),
            orchestrator: MasterFlowOrchestrator::new(store.clone(), registries.clone()),
            store,
            registries,
        }
    }

    pub fn engine(&self) -> &PhaseTransitionEngine<S> {
        &self.engine
    }

    pub fn orchestrator(&self) -> &MasterFlowOrchestrator<S> {
        &self.orchestrator
    }

    /// Master flow and all of its subordinates.
    pub async fn get_by_flow_id(
        &self,
        tenant: &TenantContext,
        master_flow_id: Uuid,
    ) -> DomainResult<Option<FlowSnapshot>> {
        let Some(master) = self.store.get_master(tenant, master_flow_id).await? else {
            return Ok(None);
        };
        let subordinates = self.store.list_subordinates(tenant, master_flow_id).await?;
        Ok(Some(FlowSnapshot { master, subordinates }))
    }

    pub async fn get_subordinate(
        &self,
        tenant: &TenantContext,
        master_flow_id: Uuid,
        kind: FlowKind,
    ) -> DomainResult<Option<SubordinateFlow>> {
        self.store.get_subordinate_by_kind(tenant, master_flow_id, kind).await
    }

    /// Replace the master's free-form `flow_state`.
    pub async fn save_flow_state(
        &self,
        tenant: &TenantContext,
        master_flow_id: Uuid,
        state: Value,
    ) -> DomainResult<()> {
        let mut tx = self.store.begin().await?;
        let mut master = self
            .store
            .lock_master(&mut tx, tenant, master_flow_id)
            .await?
            .ok_or(DomainError::FlowNotFound(master_flow_id))?;

        master.flow_state = state;
        master.updated_at = chrono::Utc::now();
        self.store.update_master(&mut tx, &master).await?;
        self.store.commit(tx).await?;

        debug!(master_flow_id = %master_flow_id, "saved flow state");
        Ok(())
    }

    /// Store the result payload of a phase, replacing any earlier one.
    pub async fn save_phase_result(
        &self,
        tenant: &TenantContext,
        subordinate_id: Uuid,
        payload: PhasePayload,
    ) -> DomainResult<()> {
        let raw_phase = payload.phase().to_string();
        self.with_locked_subordinate(tenant, subordinate_id, &raw_phase, |flow, phase| {
            flow.phase_results.insert(phase, payload);
        })
        .await
    }

    /// Store user input captured for a phase, replacing any earlier input.
    pub async fn save_user_input(
        &self,
        tenant: &TenantContext,
        subordinate_id: Uuid,
        phase: &str,
        input: Value,
    ) -> DomainResult<()> {
        self.with_locked_subordinate(tenant, subordinate_id, phase, |flow, phase| {
            flow.user_inputs.insert(phase, input);
        })
        .await
    }

    async fn with_locked_subordinate<F>(
        &self,
        tenant: &TenantContext,
        subordinate_id: Uuid,
        raw_phase: &str,
        apply: F,
    ) -> DomainResult<()>
    where
        F: FnOnce(&mut SubordinateFlow, String) + Send,
    {
        let mut tx = self.store.begin().await?;
        let mut flow = self
            .store
            .lock_subordinate(&mut tx, tenant, subordinate_id)
            .await?
            .ok_or(DomainError::SubordinateNotFound(subordinate_id))?;

        let registry = self.registries.get(flow.flow_kind)?;
        let phase = registry.normalize(raw_phase).ok_or_else(|| DomainError::UnknownPhase {
            kind: flow.flow_kind.to_string(),
            phase: raw_phase.to_string(),
        })?;

        apply(&mut flow, phase);
        flow.touch();
        self.store.update_subordinate(&mut tx, &flow).await?;
        self.store.commit(tx).await?;
        Ok(())
    }

    /// Advance the subordinate of `kind` and roll its status up into the master.
    pub async fn update_flow_phase(
        &self,
        tenant: &TenantContext,
        master_flow_id: Uuid,
        kind: FlowKind,
        target_phase: &str,
        extra_updates: Option<&Map<String, Value>>,
        set_status: Option<FlowStatus>,
    ) -> DomainResult<TransitionResult> {
        let mut flow = self.require_subordinate(tenant, master_flow_id, kind).await?;
        let mut result = self
            .engine
            .advance_phase(&mut flow, target_phase, extra_updates, set_status)
            .await;
        self.rollup_after(tenant, master_flow_id, &mut result).await;
        Ok(result)
    }

    /// Complete the terminal phase of the subordinate of `kind`.
    pub async fn complete_flow_phase(
        &self,
        tenant: &TenantContext,
        master_flow_id: Uuid,
        kind: FlowKind,
    ) -> DomainResult<TransitionResult> {
        let mut flow = self.require_subordinate(tenant, master_flow_id, kind).await?;
        let mut result = self.engine.complete_terminal_phase(&mut flow).await;
        self.rollup_after(tenant, master_flow_id, &mut result).await;
        Ok(result)
    }

    async fn require_subordinate(
        &self,
        tenant: &TenantContext,
        master_flow_id: Uuid,
        kind: FlowKind,
    ) -> DomainResult<SubordinateFlow> {
        self.store
            .get_subordinate_by_kind(tenant, master_flow_id, kind)
            .await?
            .ok_or_else(|| DomainError::SubordinateKindNotFound {
                master_flow_id,
                kind: kind.to_string(),
            })
    }

    async fn rollup_after(&self, tenant: &TenantContext, master_flow_id: Uuid, result: &mut TransitionResult) {
        if !result.success || result.was_idempotent {
            return;
        }
        if let Err(e) = self.orchestrator.refresh_master_status(tenant, master_flow_id).await {
            warn!(master_flow_id = %master_flow_id, error = %e, "master status rollup failed");
            result.warnings.push(format!("master status rollup failed: {e}"));
        }
    }
}

//! Operator manual override.
//!
//! `force_phase` sets a subordinate flow's current phase without the
//! sequential transition check. It is an ops tool outside the guarded
//! transition contract: every use is logged at `warn`, recorded as a
//! `forced` transition and noted in the master's collaboration log with the
//! operator and reason. Completion flags and status are left as they are.

use std::sync::Arc;

use serde_json::json;
use tracing::warn;
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    PhaseRegistries, PhaseTransition, SubordinateFlow, TenantContext, TransitionStatus,
};
use crate::domain::ports::FlowStore;

pub struct OperatorOverride<S: FlowStore> {
    store: Arc<S>,
    registries: Arc<PhaseRegistries>,
}

impl<S: FlowStore> OperatorOverride<S> {
    pub fn new(store: Arc<S>, registries: Arc<PhaseRegistries>) -> Self {
        Self { store, registries }
    }

    /// Force `phase` (or "not started" for `None`) onto a subordinate flow.
    pub async fn force_phase(
        &self,
        tenant: &TenantContext,
        subordinate_id: Uuid,
        phase: Option<&str>,
        operator: &str,
        reason: &str,
    ) -> DomainResult<SubordinateFlow> {
        if operator.trim().is_empty() {
            return Err(DomainError::ValidationFailed("operator is required".to_string()));
        }
        if reason.trim().is_empty() {
            return Err(DomainError::ValidationFailed("reason is required".to_string()));
        }

        let mut tx = self.store.begin().await?;
        let mut flow = self
            .store
            .lock_subordinate(&mut tx, tenant, subordinate_id)
            .await?
            .ok_or(DomainError::SubordinateNotFound(subordinate_id))?;

        let registry = self.registries.get(flow.flow_kind)?;
        let target = match phase {
            Some(raw) => Some(registry.normalize(raw).ok_or_else(|| DomainError::UnknownPhase {
                kind: flow.flow_kind.to_string(),
                phase: raw.to_string(),
            })?),
            None => None,
        };

        let from = flow.current_phase.clone();
        warn!(
            flow_id = %flow.id,
            master_flow_id = %flow.master_flow_id,
            from = from.as_deref().unwrap_or("<not started>"),
            to = target.as_deref().unwrap_or("<not started>"),
            operator,
            reason,
            "operator forced phase outside transition validation"
        );

        flow.current_phase.clone_from(&target);
        flow.touch();
        self.store.update_subordinate(&mut tx, &flow).await?;

        let details = json!({
            "from": from,
            "to": target,
            "subordinate_flow_id": flow.id,
            "flow_kind": flow.flow_kind,
            "operator": operator,
            "reason": reason,
        });
        let entry = PhaseTransition::new(
            target.as_deref().unwrap_or(""),
            TransitionStatus::Forced,
            details.clone(),
        );
        if !self
            .store
            .append_transition(&mut tx, tenant, flow.master_flow_id, &entry)
            .await?
        {
            return Err(DomainError::FlowNotFound(flow.master_flow_id));
        }

        let mut master = self
            .store
            .lock_master(&mut tx, tenant, flow.master_flow_id)
            .await?
            .ok_or(DomainError::FlowNotFound(flow.master_flow_id))?;
        master.collaboration_log.record(operator, "force_phase", details);
        master.updated_at = chrono::Utc::now();
        self.store.update_master(&mut tx, &master).await?;

        self.store.commit(tx).await?;
        Ok(flow)
    }
}

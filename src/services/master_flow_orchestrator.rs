//! Master flow orchestrator.
//!
//! Creates master/subordinate pairs as one unit, links child flows, fans
//! lifecycle changes out to every subordinate and rolls subordinate status
//! up into the master's operational status.

use std::sync::Arc;

use serde_json::{json, Value};
use tracing::{info, warn};
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    FlowKind, FlowStatus, MasterFlow, MasterFlowStatus, PhaseRegistries, SubordinateFlow,
    TenantContext,
};
use crate::domain::ports::{CommitMode, FlowFilter, FlowStore};

/// Everything needed to create a new workflow instance.
#[derive(Debug, Clone)]
pub struct CreateFlowRequest {
    pub tenant: TenantContext,
    pub flow_kind: FlowKind,
    pub flow_name: Option<String>,
    pub configuration: Value,
    pub initial_state: Value,
}

impl CreateFlowRequest {
    pub fn new(tenant: TenantContext, flow_kind: FlowKind) -> Self {
        Self {
            tenant,
            flow_kind,
            flow_name: None,
            configuration: json!({}),
            initial_state: json!({}),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.flow_name = Some(name.into());
        self
    }

    pub fn with_configuration(mut self, configuration: Value) -> Self {
        self.configuration = configuration;
        self
    }

    pub fn with_initial_state(mut self, initial_state: Value) -> Self {
        self.initial_state = initial_state;
        self
    }
}

/// Lifecycle change applied to a master and its subordinates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleAction {
    Pause,
    Resume,
    Cancel,
    Fail { reason: String },
}

impl LifecycleAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pause => "pause",
            Self::Resume => "resume",
            Self::Cancel => "cancel",
            Self::Fail { .. } => "fail",
        }
    }

    fn master_status(&self) -> MasterFlowStatus {
        match self {
            Self::Pause => MasterFlowStatus::Paused,
            Self::Resume => MasterFlowStatus::Running,
            Self::Cancel => MasterFlowStatus::Cancelled,
            Self::Fail { .. } => MasterFlowStatus::Failed,
        }
    }

    /// New status for a subordinate, or `None` to leave it alone.
    fn subordinate_status(&self, current: FlowStatus) -> Option<FlowStatus> {
        if current.is_terminal() {
            return None;
        }
        match self {
            Self::Pause => Some(FlowStatus::Paused),
            Self::Resume => (current == FlowStatus::Paused).then_some(FlowStatus::Active),
            Self::Cancel => Some(FlowStatus::Cancelled),
            Self::Fail { .. } => Some(FlowStatus::Failed),
        }
    }
}

/// Rolled-up master status for a set of subordinates.
///
/// Any failed subordinate fails the master; all completed completes it; an
/// initialized master becomes running once any subordinate has started.
pub fn rollup_status(current: &MasterFlowStatus, subordinates: &[SubordinateFlow]) -> MasterFlowStatus {
    if current.is_terminal() {
        return current.clone();
    }
    if subordinates.iter().any(|s| s.status == FlowStatus::Failed) {
        return MasterFlowStatus::Failed;
    }
    if !subordinates.is_empty() && subordinates.iter().all(|s| s.status == FlowStatus::Completed) {
        return MasterFlowStatus::Completed;
    }
    if *current == MasterFlowStatus::Initialized && subordinates.iter().any(SubordinateFlow::has_started) {
        return MasterFlowStatus::Running;
    }
    current.clone()
}

pub struct MasterFlowOrchestrator<S: FlowStore> {
    store: Arc<S>,
    registries: Arc<PhaseRegistries>,
}

impl<S: FlowStore> MasterFlowOrchestrator<S> {
    pub fn new(store: Arc<S>, registries: Arc<PhaseRegistries>) -> Self {
        Self { store, registries }
    }

    /// Create a master flow and its first subordinate flow as one unit.
    ///
    /// With [`CommitMode::Deferred`] both rows are written into the caller's
    /// transaction and become visible only when the caller commits.
    pub async fn create_flow(
        &self,
        request: CreateFlowRequest,
        mode: CommitMode<'_, S::Tx>,
    ) -> DomainResult<(Uuid, SubordinateFlow)> {
        let registry = self.registries.get(request.flow_kind)?;

        let mut master = MasterFlow::new(
            request.tenant.clone(),
            request.flow_kind,
            request.configuration,
            request.initial_state,
        );
        master.flow_name = request.flow_name;
        let subordinate = SubordinateFlow::new(master.master_flow_id, request.tenant, registry);

        let deferred = matches!(mode, CommitMode::Deferred(_));
        match mode {
            CommitMode::Immediate => {
                let mut tx = self.store.begin().await?;
                self.write_pair(&mut tx, &master, &subordinate).await?;
                self.store.commit(tx).await?;
            }
            CommitMode::Deferred(tx) => self.write_pair(tx, &master, &subordinate).await?,
        }

        info!(
            master_flow_id = %master.master_flow_id,
            subordinate_flow_id = %subordinate.id,
            flow_kind = %master.flow_kind,
            tenant = %master.tenant,
            deferred,
            "created flow"
        );
        Ok((master.master_flow_id, subordinate))
    }

    async fn write_pair(&self, tx: &mut S::Tx, master: &MasterFlow, subordinate: &SubordinateFlow) -> DomainResult<()> {
        self.store.insert_master(tx, master).await?;
        self.store.insert_subordinate(tx, subordinate).await
    }

    /// Attach a subordinate flow of another kind to an existing master.
    ///
    /// A non-null `initial_state` is stored in the master's `flow_state`
    /// under the kind's name.
    pub async fn attach_subordinate(
        &self,
        tenant: &TenantContext,
        master_flow_id: Uuid,
        kind: FlowKind,
        initial_state: Value,
    ) -> DomainResult<SubordinateFlow> {
        let registry = self.registries.get(kind)?;

        let mut tx = self.store.begin().await?;
        let mut master = self
            .store
            .lock_master(&mut tx, tenant, master_flow_id)
            .await?
            .ok_or(DomainError::FlowNotFound(master_flow_id))?;

        let subordinate = SubordinateFlow::new(master_flow_id, tenant.clone(), registry);
        self.store.insert_subordinate(&mut tx, &subordinate).await?;

        if !initial_state.is_null() {
            if !master.flow_state.is_object() {
                master.flow_state = json!({});
            }
            if let Some(state) = master.flow_state.as_object_mut() {
                state.insert(kind.as_str().to_string(), initial_state);
            }
        }
        master.collaboration_log.record(
            &tenant.user_id,
            "attach_subordinate",
            json!({"flow_kind": kind, "subordinate_flow_id": subordinate.id}),
        );
        master.updated_at = chrono::Utc::now();
        self.store.update_master(&mut tx, &master).await?;
        self.store.commit(tx).await?;

        info!(master_flow_id = %master_flow_id, subordinate_flow_id = %subordinate.id, flow_kind = %kind, "attached subordinate flow");
        Ok(subordinate)
    }

    /// Create a child master/subordinate pair under `parent_flow_id`.
    pub async fn spawn_child_flow(
        &self,
        tenant: &TenantContext,
        parent_flow_id: Uuid,
        kind: FlowKind,
        configuration: Value,
        initial_state: Value,
    ) -> DomainResult<(Uuid, SubordinateFlow)> {
        let registry = self.registries.get(kind)?;

        let mut tx = self.store.begin().await?;
        let mut parent = self
            .store
            .lock_master(&mut tx, tenant, parent_flow_id)
            .await?
            .ok_or(DomainError::FlowNotFound(parent_flow_id))?;

        let child = MasterFlow::new(tenant.clone(), kind, configuration, initial_state).with_parent(parent_flow_id);
        let subordinate = SubordinateFlow::new(child.master_flow_id, tenant.clone(), registry);
        self.write_pair(&mut tx, &child, &subordinate).await?;

        parent.add_child(child.master_flow_id);
        parent.collaboration_log.record(
            &tenant.user_id,
            "spawn_child",
            json!({"child_flow_id": child.master_flow_id, "flow_kind": kind}),
        );
        self.store.update_master(&mut tx, &parent).await?;
        self.store.commit(tx).await?;

        info!(parent_flow_id = %parent_flow_id, child_flow_id = %child.master_flow_id, flow_kind = %kind, "spawned child flow");
        Ok((child.master_flow_id, subordinate))
    }

    pub async fn pause_flow(&self, tenant: &TenantContext, master_flow_id: Uuid) -> DomainResult<MasterFlow> {
        self.apply_lifecycle(tenant, master_flow_id, LifecycleAction::Pause).await
    }

    pub async fn resume_flow(&self, tenant: &TenantContext, master_flow_id: Uuid) -> DomainResult<MasterFlow> {
        self.apply_lifecycle(tenant, master_flow_id, LifecycleAction::Resume).await
    }

    pub async fn cancel_flow(&self, tenant: &TenantContext, master_flow_id: Uuid) -> DomainResult<MasterFlow> {
        self.apply_lifecycle(tenant, master_flow_id, LifecycleAction::Cancel).await
    }

    pub async fn fail_flow(
        &self,
        tenant: &TenantContext,
        master_flow_id: Uuid,
        reason: impl Into<String>,
    ) -> DomainResult<MasterFlow> {
        let reason = reason.into();
        self.apply_lifecycle(tenant, master_flow_id, LifecycleAction::Fail { reason }).await
    }

    /// Apply a lifecycle change to the master and every open subordinate.
    ///
    /// Completed subordinates are never reverted.
    pub async fn apply_lifecycle(
        &self,
        tenant: &TenantContext,
        master_flow_id: Uuid,
        action: LifecycleAction,
    ) -> DomainResult<MasterFlow> {
        let mut tx = self.store.begin().await?;
        let mut master = self
            .store
            .lock_master(&mut tx, tenant, master_flow_id)
            .await?
            .ok_or(DomainError::FlowNotFound(master_flow_id))?;

        if master.flow_status.is_terminal() {
            return Err(DomainError::ValidationFailed(format!(
                "flow {master_flow_id} is {}; cannot {}",
                master.flow_status,
                action.as_str()
            )));
        }
        if action == LifecycleAction::Resume && master.flow_status != MasterFlowStatus::Paused {
            return Err(DomainError::ValidationFailed(format!(
                "flow {master_flow_id} is {}, not paused",
                master.flow_status
            )));
        }

        let ids: Vec<Uuid> = self
            .store
            .subordinates_in_tx(&mut tx, tenant, master_flow_id)
            .await?
            .into_iter()
            .map(|s| s.id)
            .collect();

        let mut changed = 0usize;
        for id in ids {
            let Some(mut subordinate) = self.store.lock_subordinate(&mut tx, tenant, id).await? else {
                continue;
            };
            let Some(status) = action.subordinate_status(subordinate.status) else {
                continue;
            };
            subordinate.status = status;
            if let LifecycleAction::Fail { reason } = &action {
                subordinate.error_message = Some(reason.clone());
            }
            subordinate.touch();
            self.store.update_subordinate(&mut tx, &subordinate).await?;
            changed += 1;
        }

        let details = match &action {
            LifecycleAction::Fail { reason } => json!({"reason": reason, "subordinates_changed": changed}),
            _ => json!({"subordinates_changed": changed}),
        };
        master.set_status(action.master_status());
        master.collaboration_log.record(&tenant.user_id, action.as_str(), details);
        self.store.update_master(&mut tx, &master).await?;
        self.store.commit(tx).await?;

        info!(master_flow_id = %master_flow_id, action = action.as_str(), subordinates_changed = changed, status = %master.flow_status, "applied lifecycle change");
        Ok(master)
    }

    /// Recompute the master's status from its subordinates.
    pub async fn refresh_master_status(
        &self,
        tenant: &TenantContext,
        master_flow_id: Uuid,
    ) -> DomainResult<MasterFlowStatus> {
        let mut tx = self.store.begin().await?;
        let mut master = self
            .store
            .lock_master(&mut tx, tenant, master_flow_id)
            .await?
            .ok_or(DomainError::FlowNotFound(master_flow_id))?;
        let subordinates = self.store.subordinates_in_tx(&mut tx, tenant, master_flow_id).await?;

        let rolled = rollup_status(&master.flow_status, &subordinates);
        if rolled == master.flow_status {
            return Ok(rolled);
        }

        info!(master_flow_id = %master_flow_id, from = %master.flow_status, to = %rolled, "master status rolled up");
        master.set_status(rolled.clone());
        self.store.update_master(&mut tx, &master).await?;
        self.store.commit(tx).await?;
        Ok(rolled)
    }

    /// Hard-delete a master flow and its subordinates.
    ///
    /// The flow is unlinked from its parent; its own children survive with
    /// no parent.
    pub async fn delete_flow(&self, tenant: &TenantContext, master_flow_id: Uuid) -> DomainResult<()> {
        let mut tx = self.store.begin().await?;
        let master = self
            .store
            .lock_master(&mut tx, tenant, master_flow_id)
            .await?
            .ok_or(DomainError::FlowNotFound(master_flow_id))?;

        if let Some(parent_id) = master.parent_flow_id {
            match self.store.lock_master(&mut tx, tenant, parent_id).await? {
                Some(mut parent) => {
                    parent.remove_child(master_flow_id);
                    parent.collaboration_log.record(
                        &tenant.user_id,
                        "child_deleted",
                        json!({"child_flow_id": master_flow_id}),
                    );
                    parent.updated_at = chrono::Utc::now();
                    self.store.update_master(&mut tx, &parent).await?;
                }
                None => warn!(master_flow_id = %master_flow_id, parent_flow_id = %parent_id, "parent flow missing while deleting child"),
            }
        }

        self.store.delete_master(&mut tx, tenant, master_flow_id).await?;
        self.store.commit(tx).await?;

        info!(master_flow_id = %master_flow_id, children_orphaned = master.child_flow_ids.len(), "deleted flow");
        Ok(())
    }

    pub async fn list_flows(&self, tenant: &TenantContext, filter: &FlowFilter) -> DomainResult<Vec<MasterFlow>> {
        self.store.list_masters(tenant, filter).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::{create_migrated_test_pool, SqliteFlowStore};

    async fn setup() -> (MasterFlowOrchestrator<SqliteFlowStore>, Arc<SqliteFlowStore>, TenantContext) {
        let pool = create_migrated_test_pool().await.unwrap();
        let store = Arc::new(SqliteFlowStore::new(pool));
        let orchestrator = MasterFlowOrchestrator::new(store.clone(), Arc::new(PhaseRegistries::builtin()));
        let tenant = TenantContext::new(Uuid::new_v4(), Uuid::new_v4(), "lead@example.com");
        (orchestrator, store, tenant)
    }

    #[tokio::test]
    async fn test_create_flow_links_subordinate() {
        let (orchestrator, store, tenant) = setup().await;
        let request = CreateFlowRequest::new(tenant.clone(), FlowKind::Collection)
            .with_name("Q3 collection")
            .with_configuration(json!({"sources": ["cmdb"]}))
            .with_initial_state(json!({"step": 0}));

        let (master_id, subordinate) = orchestrator.create_flow(request, CommitMode::Immediate).await.unwrap();
        assert_eq!(subordinate.master_flow_id, master_id);
        assert!(subordinate.current_phase.is_none());

        let master = store.get_master(&tenant, master_id).await.unwrap().unwrap();
        assert_eq!(master.flow_name.as_deref(), Some("Q3 collection"));
        assert_eq!(master.flow_state, json!({"step": 0}));
        assert!(master.phase_transitions.is_empty());
        assert_eq!(master.flow_status, MasterFlowStatus::Initialized);
    }

    #[tokio::test]
    async fn test_deferred_create_writes_into_caller_transaction() {
        let (orchestrator, store, tenant) = setup().await;

        let mut tx = store.begin().await.unwrap();
        let request = CreateFlowRequest::new(tenant.clone(), FlowKind::Assessment);
        let (master_id, subordinate) = orchestrator
            .create_flow(request, CommitMode::Deferred(&mut tx))
            .await
            .unwrap();
        assert!(store.lock_master(&mut tx, &tenant, master_id).await.unwrap().is_some());
        assert!(store.lock_subordinate(&mut tx, &tenant, subordinate.id).await.unwrap().is_some());
        store.commit(tx).await.unwrap();

        assert!(store.get_master(&tenant, master_id).await.unwrap().is_some());
        assert!(store.get_subordinate(&tenant, subordinate.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_attach_rejects_duplicate_kind() {
        let (orchestrator, store, tenant) = setup().await;
        let (master_id, _) = orchestrator
            .create_flow(CreateFlowRequest::new(tenant.clone(), FlowKind::Collection), CommitMode::Immediate)
            .await
            .unwrap();

        let assessment = orchestrator
            .attach_subordinate(&tenant, master_id, FlowKind::Assessment, json!({"apps": 3}))
            .await
            .unwrap();
        assert_eq!(assessment.flow_kind, FlowKind::Assessment);

        let err = orchestrator
            .attach_subordinate(&tenant, master_id, FlowKind::Collection, Value::Null)
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::DuplicateSubordinate { .. }));

        let subs = store.list_subordinates(&tenant, master_id).await.unwrap();
        assert_eq!(subs.len(), 2);
        let master = store.get_master(&tenant, master_id).await.unwrap().unwrap();
        assert_eq!(master.flow_state["assessment"], json!({"apps": 3}));
    }

    #[tokio::test]
    async fn test_spawn_child_and_delete_parent() {
        let (orchestrator, store, tenant) = setup().await;
        let (parent_id, _) = orchestrator
            .create_flow(CreateFlowRequest::new(tenant.clone(), FlowKind::Discovery), CommitMode::Immediate)
            .await
            .unwrap();
        let (child_id, _) = orchestrator
            .spawn_child_flow(&tenant, parent_id, FlowKind::Assessment, json!({}), json!({}))
            .await
            .unwrap();

        let parent = store.get_master(&tenant, parent_id).await.unwrap().unwrap();
        assert_eq!(parent.child_flow_ids, vec![child_id]);
        let child = store.get_master(&tenant, child_id).await.unwrap().unwrap();
        assert_eq!(child.parent_flow_id, Some(parent_id));

        orchestrator.delete_flow(&tenant, parent_id).await.unwrap();
        let child = store.get_master(&tenant, child_id).await.unwrap().unwrap();
        assert_eq!(child.parent_flow_id, None);
    }

    #[tokio::test]
    async fn test_delete_child_unlinks_from_parent() {
        let (orchestrator, store, tenant) = setup().await;
        let (parent_id, _) = orchestrator
            .create_flow(CreateFlowRequest::new(tenant.clone(), FlowKind::Discovery), CommitMode::Immediate)
            .await
            .unwrap();
        let (child_id, child_sub) = orchestrator
            .spawn_child_flow(&tenant, parent_id, FlowKind::Planning, json!({}), json!({}))
            .await
            .unwrap();

        orchestrator.delete_flow(&tenant, child_id).await.unwrap();

        let parent = store.get_master(&tenant, parent_id).await.unwrap().unwrap();
        assert!(parent.child_flow_ids.is_empty());
        assert!(store.get_subordinate(&tenant, child_sub.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_lifecycle_fans_out_but_keeps_completed() {
        let (orchestrator, store, tenant) = setup().await;
        let (master_id, first) = orchestrator
            .create_flow(CreateFlowRequest::new(tenant.clone(), FlowKind::Collection), CommitMode::Immediate)
            .await
            .unwrap();
        let second = orchestrator
            .attach_subordinate(&tenant, master_id, FlowKind::Assessment, Value::Null)
            .await
            .unwrap();

        let mut tx = store.begin().await.unwrap();
        let mut done = store.lock_subordinate(&mut tx, &tenant, second.id).await.unwrap().unwrap();
        done.status = FlowStatus::Completed;
        store.update_subordinate(&mut tx, &done).await.unwrap();
        store.commit(tx).await.unwrap();

        let master = orchestrator.pause_flow(&tenant, master_id).await.unwrap();
        assert_eq!(master.flow_status, MasterFlowStatus::Paused);
        assert_eq!(master.collaboration_log.entries().last().unwrap().action, "pause");

        let paused = store.get_subordinate(&tenant, first.id).await.unwrap().unwrap();
        assert_eq!(paused.status, FlowStatus::Paused);
        let kept = store.get_subordinate(&tenant, second.id).await.unwrap().unwrap();
        assert_eq!(kept.status, FlowStatus::Completed);

        orchestrator.resume_flow(&tenant, master_id).await.unwrap();
        let resumed = store.get_subordinate(&tenant, first.id).await.unwrap().unwrap();
        assert_eq!(resumed.status, FlowStatus::Active);

        let cancelled = orchestrator.cancel_flow(&tenant, master_id).await.unwrap();
        assert_eq!(cancelled.flow_status, MasterFlowStatus::Cancelled);
        assert!(orchestrator.resume_flow(&tenant, master_id).await.is_err());
    }

    #[tokio::test]
    async fn test_fail_flow_records_reason() {
        let (orchestrator, store, tenant) = setup().await;
        let (master_id, sub) = orchestrator
            .create_flow(CreateFlowRequest::new(tenant.clone(), FlowKind::Decommission), CommitMode::Immediate)
            .await
            .unwrap();

        orchestrator.fail_flow(&tenant, master_id, "license expired").await.unwrap();
        let failed = store.get_subordinate(&tenant, sub.id).await.unwrap().unwrap();
        assert_eq!(failed.status, FlowStatus::Failed);
        assert_eq!(failed.error_message.as_deref(), Some("license expired"));
    }

    #[test]
    fn test_rollup_rules() {
        let tenant = TenantContext::new(Uuid::new_v4(), Uuid::new_v4(), "u");
        let registry = PhaseRegistries::builtin();
        let registry = registry.get(FlowKind::Planning).unwrap();
        let mut a = SubordinateFlow::new(Uuid::new_v4(), tenant.clone(), registry);
        let mut b = SubordinateFlow::new(Uuid::new_v4(), tenant, registry);

        let init = MasterFlowStatus::Initialized;
        assert_eq!(rollup_status(&init, &[a.clone(), b.clone()]), MasterFlowStatus::Initialized);

        a.current_phase = Some("wave_planning".to_string());
        assert_eq!(rollup_status(&init, &[a.clone(), b.clone()]), MasterFlowStatus::Running);

        a.status = FlowStatus::Completed;
        b.status = FlowStatus::Completed;
        assert_eq!(rollup_status(&MasterFlowStatus::Running, &[a.clone(), b.clone()]), MasterFlowStatus::Completed);

        b.status = FlowStatus::Failed;
        assert_eq!(rollup_status(&MasterFlowStatus::Running, &[a.clone(), b]), MasterFlowStatus::Failed);

        assert_eq!(rollup_status(&MasterFlowStatus::Cancelled, &[a]), MasterFlowStatus::Cancelled);
        assert_eq!(rollup_status(&MasterFlowStatus::Running, &[]), MasterFlowStatus::Running);
    }
}

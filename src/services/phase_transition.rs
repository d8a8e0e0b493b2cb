//! Phase transition engine.
//!
//! The only path that moves a subordinate flow between phases. Each call
//! re-reads the flow under its row lock, validates the strict sequential
//! rule against the kind's registry, and commits the flow update together
//! with the master's transition log entry.
//!
//! Expected rejections are not errors: they come back as a
//! [`TransitionResult`] with `success = false` and a warning. Storage
//! failures are reported the same way, with the raw failure message.

use std::sync::Arc;

use serde::Serialize;
use serde_json::{json, Map, Value};
use tracing::{error, info, warn};

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    FlowStatus, PhaseRegistries, PhaseRegistry, PhaseTransition, SubordinateFlow, TransitionStatus,
};
use crate::domain::ports::FlowStore;

/// Why a transition was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionRejection {
    /// Target is neither a phase nor an alias of the flow's registry
    UnknownPhase,
    /// Target is not the next phase
    InvalidTransition,
    /// Flow is paused, cancelled or failed
    FlowClosed,
    /// The flow row could not be found under lock
    NotFoundForLocking,
    /// The transaction failed and was rolled back
    StorageFailure,
}

impl TransitionRejection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UnknownPhase => "unknown_phase",
            Self::InvalidTransition => "invalid_transition",
            Self::FlowClosed => "flow_closed",
            Self::NotFoundForLocking => "not_found_for_locking",
            Self::StorageFailure => "storage_failure",
        }
    }

    /// Whether the caller, rather than the system, caused the rejection.
    pub fn is_client_error(&self) -> bool {
        !matches!(self, Self::StorageFailure)
    }
}

impl std::fmt::Display for TransitionRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a transition attempt.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransitionResult {
    pub success: bool,
    pub was_idempotent: bool,
    /// Phase the flow was in when the lock was taken
    pub prior_phase: Option<String>,
    pub current_phase: Option<String>,
    pub status: FlowStatus,
    pub warnings: Vec<String>,
    pub rejection: Option<TransitionRejection>,
}

impl TransitionResult {
    fn rejected(flow: &SubordinateFlow, rejection: TransitionRejection, warning: String) -> Self {
        Self {
            success: false,
            was_idempotent: false,
            prior_phase: flow.current_phase.clone(),
            current_phase: flow.current_phase.clone(),
            status: flow.status,
            warnings: vec![warning],
            rejection: Some(rejection),
        }
    }

    fn idempotent(flow: &SubordinateFlow, warning: String) -> Self {
        Self {
            success: true,
            was_idempotent: true,
            prior_phase: flow.current_phase.clone(),
            current_phase: flow.current_phase.clone(),
            status: flow.status,
            warnings: vec![warning],
            rejection: None,
        }
    }

    fn applied(prior_phase: Option<String>, flow: &SubordinateFlow, warnings: Vec<String>) -> Self {
        Self {
            success: true,
            was_idempotent: false,
            prior_phase,
            current_phase: flow.current_phase.clone(),
            status: flow.status,
            warnings,
            rejection: None,
        }
    }
}

/// What happened under the lock.
enum Attempt {
    Committed(SubordinateFlow, TransitionResult),
    Idempotent(SubordinateFlow, TransitionResult),
    Rejected(TransitionResult),
}

fn phase_label(phase: Option<&str>) -> &str {
    phase.unwrap_or("<not started>")
}

/// Drives subordinate flows through their registry's phases.
pub struct PhaseTransitionEngine<S: FlowStore> {
    store: Arc<S>,
    registries: Arc<PhaseRegistries>,
}

impl<S: FlowStore> PhaseTransitionEngine<S> {
    pub fn new(store: Arc<S>, registries: Arc<PhaseRegistries>) -> Self {
        Self { store, registries }
    }

    pub fn registries(&self) -> &PhaseRegistries {
        &self.registries
    }

    /// Move `flow` to `target_phase`.
    ///
    /// `target_phase` is resolved through the registry's aliases first. On
    /// success `flow` is replaced with the committed row; on failure it is
    /// left untouched. `extra_updates` may set `progress_percentage`,
    /// `error_message` and completion flags; anything else is skipped with a
    /// warning.
    pub async fn advance_phase(
        &self,
        flow: &mut SubordinateFlow,
        target_phase: &str,
        extra_updates: Option<&Map<String, Value>>,
        set_status: Option<FlowStatus>,
    ) -> TransitionResult {
        let registry = match self.registries.get(flow.flow_kind) {
            Ok(registry) => registry,
            Err(e) => return TransitionResult::rejected(flow, TransitionRejection::UnknownPhase, e.to_string()),
        };

        let Some(target) = registry.normalize(target_phase) else {
            warn!(
                flow_id = %flow.id,
                from = phase_label(flow.current_phase.as_deref()),
                to = target_phase,
                "transition rejected: unknown phase"
            );
            return TransitionResult::rejected(
                flow,
                TransitionRejection::UnknownPhase,
                format!("unknown phase '{target_phase}' for {} flows", flow.flow_kind),
            );
        };

        let attempt = self
            .try_advance(registry, flow, &target, extra_updates, set_status)
            .await;
        self.settle(flow, &target, attempt)
    }

    /// Finish the terminal phase's own work and close the flow.
    ///
    /// Only valid while the flow sits in its terminal phase. Calling it again
    /// on a completed flow is an idempotent no-op.
    pub async fn complete_terminal_phase(&self, flow: &mut SubordinateFlow) -> TransitionResult {
        let registry = match self.registries.get(flow.flow_kind) {
            Ok(registry) => registry,
            Err(e) => return TransitionResult::rejected(flow, TransitionRejection::UnknownPhase, e.to_string()),
        };
        let terminal = registry.terminal_phase().to_string();

        let attempt = self.try_complete(registry, flow, &terminal).await;
        self.settle(flow, &terminal, attempt)
    }

    fn settle(
        &self,
        flow: &mut SubordinateFlow,
        target: &str,
        attempt: DomainResult<Attempt>,
    ) -> TransitionResult {
        match attempt {
            Ok(Attempt::Committed(updated, result)) => {
                info!(
                    flow_id = %flow.id,
                    from = phase_label(result.prior_phase.as_deref()),
                    to = target,
                    status = %result.status,
                    "phase transition committed"
                );
                *flow = updated;
                result
            }
            Ok(Attempt::Idempotent(current, result)) => {
                warn!(flow_id = %flow.id, from = phase_label(result.prior_phase.as_deref()), to = target, "phase transition was a no-op");
                *flow = current;
                result
            }
            Ok(Attempt::Rejected(result)) => {
                warn!(
                    flow_id = %flow.id,
                    from = phase_label(result.prior_phase.as_deref()),
                    to = target,
                    rejection = ?result.rejection,
                    reason = result.warnings.first().map_or("", String::as_str),
                    "phase transition rejected"
                );
                result
            }
            Err(e) => {
                error!(
                    flow_id = %flow.id,
                    from = phase_label(flow.current_phase.as_deref()),
                    to = target,
                    error = %e,
                    "phase transition failed; rolled back"
                );
                TransitionResult::rejected(flow, TransitionRejection::StorageFailure, e.to_string())
            }
        }
    }

    async fn try_advance(
        &self,
        registry: &PhaseRegistry,
        flow: &SubordinateFlow,
        target: &str,
        extra_updates: Option<&Map<String, Value>>,
        set_status: Option<FlowStatus>,
    ) -> DomainResult<Attempt> {
        let mut tx = self.store.begin().await?;
        let Some(mut locked) = self.store.lock_subordinate(&mut tx, &flow.tenant, flow.id).await? else {
            return Ok(Attempt::Rejected(TransitionResult::rejected(
                flow,
                TransitionRejection::NotFoundForLocking,
                format!("flow {} not found for locking", flow.id),
            )));
        };

        let prior = locked.current_phase.clone();
        if prior.as_deref() == Some(target) {
            let result = TransitionResult::idempotent(&locked, format!("phase '{target}' already current, no-op"));
            return Ok(Attempt::Idempotent(locked, result));
        }

        if matches!(locked.status, FlowStatus::Paused | FlowStatus::Cancelled | FlowStatus::Failed) {
            return Ok(Attempt::Rejected(TransitionResult::rejected(
                &locked,
                TransitionRejection::FlowClosed,
                format!("flow is {}; no transitions accepted", locked.status),
            )));
        }

        if !registry.is_valid_transition(prior.as_deref(), target) {
            return Ok(Attempt::Rejected(TransitionResult::rejected(
                &locked,
                TransitionRejection::InvalidTransition,
                format!("invalid transition from {} to {target}", phase_label(prior.as_deref())),
            )));
        }

        let mut warnings = Vec::new();
        if let Some(prior) = &prior {
            locked.mark_phase_complete(registry, prior);
        }
        locked.current_phase = Some(target.to_string());

        if let Some(updates) = extra_updates {
            for (key, value) in updates {
                if let Err(warning) = locked.apply_extra_update(registry, key, value) {
                    warnings.push(warning);
                }
            }
        }
        if let Some(status) = set_status {
            if status == FlowStatus::Completed {
                warnings.push("status 'completed' follows the terminal phase flag; override ignored".to_string());
            } else {
                locked.status = status;
            }
        }

        locked.sync_completion(registry);
        locked.touch();
        self.store.update_subordinate(&mut tx, &locked).await?;

        let entry = PhaseTransition::new(
            target,
            TransitionStatus::Entered,
            json!({
                "from": prior,
                "subordinate_flow_id": locked.id,
                "flow_kind": locked.flow_kind,
            }),
        );
        self.append(&mut tx, &locked, &entry).await?;
        self.store.commit(tx).await?;

        let result = TransitionResult::applied(prior, &locked, warnings);
        Ok(Attempt::Committed(locked, result))
    }

    async fn try_complete(
        &self,
        registry: &PhaseRegistry,
        flow: &SubordinateFlow,
        terminal: &str,
    ) -> DomainResult<Attempt> {
        let mut tx = self.store.begin().await?;
        let Some(mut locked) = self.store.lock_subordinate(&mut tx, &flow.tenant, flow.id).await? else {
            return Ok(Attempt::Rejected(TransitionResult::rejected(
                flow,
                TransitionRejection::NotFoundForLocking,
                format!("flow {} not found for locking", flow.id),
            )));
        };

        if locked.current_phase.as_deref() != Some(terminal) {
            return Ok(Attempt::Rejected(TransitionResult::rejected(
                &locked,
                TransitionRejection::InvalidTransition,
                format!(
                    "flow is in {}; only the terminal phase {terminal} can be completed",
                    phase_label(locked.current_phase.as_deref())
                ),
            )));
        }

        if locked.status == FlowStatus::Completed && locked.terminal_flag_set(registry) {
            let result = TransitionResult::idempotent(&locked, format!("terminal phase '{terminal}' already completed, no-op"));
            return Ok(Attempt::Idempotent(locked, result));
        }

        if matches!(locked.status, FlowStatus::Paused | FlowStatus::Cancelled | FlowStatus::Failed) {
            return Ok(Attempt::Rejected(TransitionResult::rejected(
                &locked,
                TransitionRejection::FlowClosed,
                format!("flow is {}; no transitions accepted", locked.status),
            )));
        }

        let prior = locked.current_phase.clone();
        locked.mark_phase_complete(registry, terminal);
        locked.sync_completion(registry);
        locked.touch();
        self.store.update_subordinate(&mut tx, &locked).await?;

        let entry = PhaseTransition::new(
            terminal,
            TransitionStatus::Completed,
            json!({
                "subordinate_flow_id": locked.id,
                "flow_kind": locked.flow_kind,
            }),
        );
        self.append(&mut tx, &locked, &entry).await?;
        self.store.commit(tx).await?;

        let result = TransitionResult::applied(prior, &locked, Vec::new());
        Ok(Attempt::Committed(locked, result))
    }

    async fn append(&self, tx: &mut S::Tx, flow: &SubordinateFlow, entry: &PhaseTransition) -> DomainResult<()> {
        if self
            .store
            .append_transition(tx, &flow.tenant, flow.master_flow_id, entry)
            .await?
        {
            Ok(())
        } else {
            Err(DomainError::FlowNotFound(flow.master_flow_id))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::{create_migrated_test_pool, SqliteFlowStore};
    use crate::domain::models::{FlowKind, MasterFlow, TenantContext};
    use uuid::Uuid;

    async fn setup_engine() -> (PhaseTransitionEngine<SqliteFlowStore>, Arc<SqliteFlowStore>, SubordinateFlow) {
        let pool = create_migrated_test_pool().await.unwrap();
        let store = Arc::new(SqliteFlowStore::new(pool));
        let registry = PhaseRegistry::from_phase_names(FlowKind::Planning, &["a", "b", "c"], &[("alpha", "a")]).unwrap();
        let registries = Arc::new(PhaseRegistries::empty().with_registry(registry.clone()));

        let tenant = TenantContext::new(Uuid::new_v4(), Uuid::new_v4(), "planner");
        let master = MasterFlow::new(tenant.clone(), FlowKind::Planning, json!({}), json!({}));
        let flow = SubordinateFlow::new(master.master_flow_id, tenant, &registry);

        let mut tx = store.begin().await.unwrap();
        store.insert_master(&mut tx, &master).await.unwrap();
        store.insert_subordinate(&mut tx, &flow).await.unwrap();
        store.commit(tx).await.unwrap();

        (PhaseTransitionEngine::new(store.clone(), registries), store, flow)
    }

    #[tokio::test]
    async fn test_first_phase_only_from_not_started() {
        let (engine, _, mut flow) = setup_engine().await;

        let result = engine.advance_phase(&mut flow, "b", None, None).await;
        assert!(!result.success);
        assert_eq!(result.rejection, Some(TransitionRejection::InvalidTransition));
        assert!(result.warnings[0].contains("invalid transition from <not started> to b"));
        assert!(flow.current_phase.is_none());

        let result = engine.advance_phase(&mut flow, "Alpha", None, None).await;
        assert!(result.success);
        assert!(!result.was_idempotent);
        assert_eq!(result.prior_phase, None);
        assert_eq!(flow.current_phase.as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn test_advance_marks_prior_flag_and_logs_transition() {
        let (engine, store, mut flow) = setup_engine().await;
        engine.advance_phase(&mut flow, "a", None, None).await;
        let result = engine.advance_phase(&mut flow, "b", None, None).await;

        assert!(result.success);
        assert_eq!(result.prior_phase.as_deref(), Some("a"));
        assert!(flow.flag("a_completed"));
        assert!(!flow.flag("b_completed"));
        assert_eq!(flow.phases_completed, vec!["a"]);

        let master = store.get_master(&flow.tenant, flow.master_flow_id).await.unwrap().unwrap();
        let logged: Vec<&str> = master.phase_transitions.iter().map(|t| t.phase.as_str()).collect();
        assert_eq!(logged, vec!["a", "b"]);
        assert_eq!(master.phase_transitions[1].metadata["from"], json!("a"));
    }

    #[tokio::test]
    async fn test_skip_and_backward_are_rejected_without_mutation() {
        let (engine, store, mut flow) = setup_engine().await;
        engine.advance_phase(&mut flow, "a", None, None).await;
        let before = flow.clone();

        let skip = engine.advance_phase(&mut flow, "c", None, None).await;
        assert_eq!(skip.rejection, Some(TransitionRejection::InvalidTransition));
        assert_eq!(flow, before);

        engine.advance_phase(&mut flow, "b", None, None).await;
        let back = engine.advance_phase(&mut flow, "a", None, None).await;
        assert!(!back.success);
        assert_eq!(flow.current_phase.as_deref(), Some("b"));

        let stored = store.get_subordinate(&flow.tenant, flow.id).await.unwrap().unwrap();
        assert_eq!(stored.phases_completed, vec!["a"]);
    }

    #[tokio::test]
    async fn test_idempotent_call_changes_nothing() {
        let (engine, store, mut flow) = setup_engine().await;
        engine.advance_phase(&mut flow, "a", None, None).await;
        let before = store.get_subordinate(&flow.tenant, flow.id).await.unwrap().unwrap();

        let mut updates = Map::new();
        updates.insert("progress_percentage".to_string(), json!(50));
        let result = engine.advance_phase(&mut flow, "a", Some(&updates), None).await;

        assert!(result.success);
        assert!(result.was_idempotent);
        assert!(result.warnings[0].contains("already current"));
        let after = store.get_subordinate(&flow.tenant, flow.id).await.unwrap().unwrap();
        assert_eq!(after, before);

        let master = store.get_master(&flow.tenant, flow.master_flow_id).await.unwrap().unwrap();
        assert_eq!(master.phase_transitions.len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_phase_is_rejected() {
        let (engine, _, mut flow) = setup_engine().await;
        let result = engine.advance_phase(&mut flow, "zeta", None, None).await;
        assert_eq!(result.rejection, Some(TransitionRejection::UnknownPhase));
        assert!(result.rejection.unwrap().is_client_error());
    }

    #[tokio::test]
    async fn test_extra_updates_cannot_write_engine_fields() {
        let (engine, _, mut flow) = setup_engine().await;
        let mut updates = Map::new();
        updates.insert("current_phase".to_string(), json!("c"));
        updates.insert("progress_percentage".to_string(), json!(10));

        let result = engine.advance_phase(&mut flow, "a", Some(&updates), None).await;
        assert!(result.success);
        assert_eq!(result.warnings.len(), 1);
        assert_eq!(flow.current_phase.as_deref(), Some("a"));
        assert!((flow.progress_percentage - 10.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_terminal_completion_through_flag_update() {
        let (engine, _, mut flow) = setup_engine().await;
        engine.advance_phase(&mut flow, "a", None, None).await;
        engine.advance_phase(&mut flow, "b", None, None).await;

        let result = engine.advance_phase(&mut flow, "c", None, Some(FlowStatus::Completed)).await;
        assert!(result.success);
        assert_eq!(flow.status, FlowStatus::Active);
        assert!(flow.completed_at.is_none());
        assert_eq!(result.warnings.len(), 1);

        let done = engine.complete_terminal_phase(&mut flow).await;
        assert!(done.success);
        assert_eq!(flow.status, FlowStatus::Completed);
        assert!(flow.flag("c_completed"));
        let stamped = flow.completed_at;
        assert!(stamped.is_some());

        let again = engine.complete_terminal_phase(&mut flow).await;
        assert!(again.was_idempotent);
        assert_eq!(flow.completed_at, stamped);
    }

    #[tokio::test]
    async fn test_extra_updates_cannot_raise_future_terminal_flag() {
        let (engine, store, mut flow) = setup_engine().await;
        let mut updates = Map::new();
        updates.insert("c_completed".to_string(), json!(true));

        let result = engine.advance_phase(&mut flow, "a", Some(&updates), None).await;
        assert!(result.success);
        assert_eq!(result.warnings.len(), 1);
        assert!(!flow.flag("c_completed"));
        assert!(flow.phases_completed.is_empty());

        engine.advance_phase(&mut flow, "b", None, None).await;
        let entered = engine.advance_phase(&mut flow, "c", None, None).await;
        assert!(entered.success);
        assert_eq!(flow.status, FlowStatus::Active);

        let stored = store.get_subordinate(&flow.tenant, flow.id).await.unwrap().unwrap();
        assert!(!stored.flag("c_completed"));
        assert!(stored.completed_at.is_none());
    }

    #[tokio::test]
    async fn test_extra_updates_cannot_clear_or_set_engine_flags() {
        let (engine, _, mut flow) = setup_engine().await;
        engine.advance_phase(&mut flow, "a", None, None).await;

        let mut updates = Map::new();
        updates.insert("a_completed".to_string(), json!(false));
        updates.insert("b_completed".to_string(), json!(true));
        let result = engine.advance_phase(&mut flow, "b", Some(&updates), None).await;

        assert!(result.success);
        assert_eq!(result.warnings.len(), 2);
        assert!(flow.flag("a_completed"));
        assert!(!flow.flag("b_completed"));
        assert_eq!(flow.phases_completed, vec!["a"]);
    }

    #[tokio::test]
    async fn test_entering_terminal_phase_with_flag_completes_flow() {
        let (engine, store, mut flow) = setup_engine().await;
        engine.advance_phase(&mut flow, "a", None, None).await;
        engine.advance_phase(&mut flow, "b", None, None).await;

        let mut updates = Map::new();
        updates.insert("c_completed".to_string(), json!(true));
        let result = engine.advance_phase(&mut flow, "c", Some(&updates), None).await;

        assert!(result.success);
        assert!(result.warnings.is_empty());
        assert_eq!(result.status, FlowStatus::Completed);
        assert_eq!(flow.status, FlowStatus::Completed);
        assert!(flow.completed_at.is_some());
        assert_eq!(flow.phases_completed, vec!["a", "b", "c"]);

        let stored = store.get_subordinate(&flow.tenant, flow.id).await.unwrap().unwrap();
        assert_eq!(stored.status, FlowStatus::Completed);
        assert_eq!(stored.completed_at, flow.completed_at);
    }

    #[tokio::test]
    async fn test_complete_requires_terminal_phase() {
        let (engine, _, mut flow) = setup_engine().await;
        engine.advance_phase(&mut flow, "a", None, None).await;
        let result = engine.complete_terminal_phase(&mut flow).await;
        assert_eq!(result.rejection, Some(TransitionRejection::InvalidTransition));
        assert!(!flow.flag("c_completed"));
    }

    #[tokio::test]
    async fn test_missing_row_is_not_found_for_locking() {
        let (engine, _, mut flow) = setup_engine().await;
        flow.id = Uuid::new_v4();
        let result = engine.advance_phase(&mut flow, "a", None, None).await;
        assert_eq!(result.rejection, Some(TransitionRejection::NotFoundForLocking));
        assert!(result.warnings[0].contains("not found for locking"));
    }

    #[tokio::test]
    async fn test_paused_flow_is_closed() {
        let (engine, _, mut flow) = setup_engine().await;
        let result = engine.advance_phase(&mut flow, "a", None, Some(FlowStatus::Paused)).await;
        assert!(result.success);
        assert_eq!(flow.status, FlowStatus::Paused);

        let result = engine.advance_phase(&mut flow, "b", None, None).await;
        assert_eq!(result.rejection, Some(TransitionRejection::FlowClosed));
    }
}

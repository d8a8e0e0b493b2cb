//! SQLite implementation of the FlowStore.
//!
//! Row locks are taken with a tenant-scoped no-op `UPDATE` as the first write
//! of the transaction. SQLite grants the writer lock for the whole database,
//! so a second locker blocks (up to the busy timeout) until the holder
//! commits or rolls back, then reads the committed row.

use async_trait::async_trait;
use sqlx::{Sqlite, SqlitePool, Transaction};
use uuid::Uuid;

use super::{parse_datetime, parse_json_or_default, parse_optional_datetime, parse_optional_uuid, parse_uuid};
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    FlowKind, FlowStatus, MasterFlow, MasterFlowStatus, PhaseTransition, SubordinateFlow,
    TenantContext, TransitionStatus,
};
use crate::domain::ports::flow_store::{FlowFilter, FlowStore};

#[derive(Clone)]
pub struct SqliteFlowStore {
    pool: SqlitePool,
}

impl SqliteFlowStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl FlowStore for SqliteFlowStore {
    type Tx = Transaction<'static, Sqlite>;

    async fn begin(&self) -> DomainResult<Self::Tx> {
        Ok(self.pool.begin().await?)
    }

    async fn commit(&self, tx: Self::Tx) -> DomainResult<()> {
        tx.commit().await?;
        Ok(())
    }

    async fn insert_master(&self, tx: &mut Self::Tx, master: &MasterFlow) -> DomainResult<()> {
        sqlx::query(
            r#"INSERT INTO master_flows (master_flow_id, client_id, engagement_id, created_by, flow_kind,
                flow_name, flow_status, configuration, flow_state, phase_transitions, error_history,
                retry_count, parent_flow_id, child_flow_ids, collaboration_log, performance,
                created_at, updated_at, completed_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(master.master_flow_id.to_string())
        .bind(master.tenant.client_id.to_string())
        .bind(master.tenant.engagement_id.to_string())
        .bind(&master.tenant.user_id)
        .bind(master.flow_kind.as_str())
        .bind(&master.flow_name)
        .bind(master.flow_status.as_str())
        .bind(serde_json::to_string(&master.configuration)?)
        .bind(serde_json::to_string(&master.flow_state)?)
        .bind(serde_json::to_string(&master.phase_transitions)?)
        .bind(serde_json::to_string(&master.error_history)?)
        .bind(i64::from(master.retry_count))
        .bind(master.parent_flow_id.map(|id| id.to_string()))
        .bind(serde_json::to_string(&master.child_flow_ids)?)
        .bind(serde_json::to_string(&master.collaboration_log)?)
        .bind(serde_json::to_string(&master.performance)?)
        .bind(master.created_at.to_rfc3339())
        .bind(master.updated_at.to_rfc3339())
        .bind(master.completed_at.map(|t| t.to_rfc3339()))
        .execute(&mut **tx)
        .await?;

        Ok(())
    }

    async fn insert_subordinate(&self, tx: &mut Self::Tx, flow: &SubordinateFlow) -> DomainResult<()> {
        sqlx::query(
            r#"INSERT INTO subordinate_flows (id, master_flow_id, flow_kind, client_id, engagement_id, user_id,
                current_phase, phase_flags, phases_completed, status, progress_percentage, phase_results,
                user_inputs, error_message, error_phase, error_details, created_at, updated_at, completed_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(flow.id.to_string())
        .bind(flow.master_flow_id.to_string())
        .bind(flow.flow_kind.as_str())
        .bind(flow.tenant.client_id.to_string())
        .bind(flow.tenant.engagement_id.to_string())
        .bind(&flow.tenant.user_id)
        .bind(&flow.current_phase)
        .bind(serde_json::to_string(&flow.phase_flags)?)
        .bind(serde_json::to_string(&flow.phases_completed)?)
        .bind(flow.status.as_str())
        .bind(flow.progress_percentage)
        .bind(serde_json::to_string(&flow.phase_results)?)
        .bind(serde_json::to_string(&flow.user_inputs)?)
        .bind(&flow.error_message)
        .bind(&flow.error_phase)
        .bind(flow.error_details.as_ref().map(serde_json::to_string).transpose()?)
        .bind(flow.created_at.to_rfc3339())
        .bind(flow.updated_at.to_rfc3339())
        .bind(flow.completed_at.map(|t| t.to_rfc3339()))
        .execute(&mut **tx)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(db) if db.message().contains("UNIQUE") => DomainError::DuplicateSubordinate {
                master_flow_id: flow.master_flow_id,
                kind: flow.flow_kind.to_string(),
            },
            other => other.into(),
        })?;

        Ok(())
    }

    async fn lock_subordinate(
        &self,
        tx: &mut Self::Tx,
        tenant: &TenantContext,
        flow_id: Uuid,
    ) -> DomainResult<Option<SubordinateFlow>> {
        let locked = sqlx::query(
            "UPDATE subordinate_flows SET updated_at = updated_at
             WHERE id = ? AND client_id = ? AND engagement_id = ?",
        )
        .bind(flow_id.to_string())
        .bind(tenant.client_id.to_string())
        .bind(tenant.engagement_id.to_string())
        .execute(&mut **tx)
        .await?;

        if locked.rows_affected() == 0 {
            return Ok(None);
        }

        let row: Option<SubordinateFlowRow> = sqlx::query_as("SELECT * FROM subordinate_flows WHERE id = ?")
            .bind(flow_id.to_string())
            .fetch_optional(&mut **tx)
            .await?;

        row.map(SubordinateFlow::try_from).transpose()
    }

    async fn lock_master(
        &self,
        tx: &mut Self::Tx,
        tenant: &TenantContext,
        master_flow_id: Uuid,
    ) -> DomainResult<Option<MasterFlow>> {
        let locked = sqlx::query(
            "UPDATE master_flows SET updated_at = updated_at
             WHERE master_flow_id = ? AND client_id = ? AND engagement_id = ?",
        )
        .bind(master_flow_id.to_string())
        .bind(tenant.client_id.to_string())
        .bind(tenant.engagement_id.to_string())
        .execute(&mut **tx)
        .await?;

        if locked.rows_affected() == 0 {
            return Ok(None);
        }

        let row: Option<MasterFlowRow> = sqlx::query_as("SELECT * FROM master_flows WHERE master_flow_id = ?")
            .bind(master_flow_id.to_string())
            .fetch_optional(&mut **tx)
            .await?;

        row.map(MasterFlow::try_from).transpose()
    }

    async fn update_subordinate(&self, tx: &mut Self::Tx, flow: &SubordinateFlow) -> DomainResult<()> {
        let result = sqlx::query(
            r#"UPDATE subordinate_flows SET current_phase = ?, phase_flags = ?, phases_completed = ?,
                status = ?, progress_percentage = ?, phase_results = ?, user_inputs = ?,
                error_message = ?, error_phase = ?, error_details = ?, updated_at = ?, completed_at = ?
               WHERE id = ? AND client_id = ? AND engagement_id = ?"#,
        )
        .bind(&flow.current_phase)
        .bind(serde_json::to_string(&flow.phase_flags)?)
        .bind(serde_json::to_string(&flow.phases_completed)?)
        .bind(flow.status.as_str())
        .bind(flow.progress_percentage)
        .bind(serde_json::to_string(&flow.phase_results)?)
        .bind(serde_json::to_string(&flow.user_inputs)?)
        .bind(&flow.error_message)
        .bind(&flow.error_phase)
        .bind(flow.error_details.as_ref().map(serde_json::to_string).transpose()?)
        .bind(flow.updated_at.to_rfc3339())
        .bind(flow.completed_at.map(|t| t.to_rfc3339()))
        .bind(flow.id.to_string())
        .bind(flow.tenant.client_id.to_string())
        .bind(flow.tenant.engagement_id.to_string())
        .execute(&mut **tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DomainError::SubordinateNotFound(flow.id));
        }
        Ok(())
    }

    async fn update_master(&self, tx: &mut Self::Tx, master: &MasterFlow) -> DomainResult<()> {
        // phase_transitions and performance are append-only; see append_transition
        let result = sqlx::query(
            r#"UPDATE master_flows SET flow_name = ?, flow_status = ?, flow_state = ?, error_history = ?,
                retry_count = ?, parent_flow_id = ?, child_flow_ids = ?, collaboration_log = ?,
                updated_at = ?, completed_at = ?
               WHERE master_flow_id = ? AND client_id = ? AND engagement_id = ?"#,
        )
        .bind(&master.flow_name)
        .bind(master.flow_status.as_str())
        .bind(serde_json::to_string(&master.flow_state)?)
        .bind(serde_json::to_string(&master.error_history)?)
        .bind(i64::from(master.retry_count))
        .bind(master.parent_flow_id.map(|id| id.to_string()))
        .bind(serde_json::to_string(&master.child_flow_ids)?)
        .bind(serde_json::to_string(&master.collaboration_log)?)
        .bind(master.updated_at.to_rfc3339())
        .bind(master.completed_at.map(|t| t.to_rfc3339()))
        .bind(master.master_flow_id.to_string())
        .bind(master.tenant.client_id.to_string())
        .bind(master.tenant.engagement_id.to_string())
        .execute(&mut **tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DomainError::FlowNotFound(master.master_flow_id));
        }
        Ok(())
    }

    async fn append_transition(
        &self,
        tx: &mut Self::Tx,
        tenant: &TenantContext,
        master_flow_id: Uuid,
        transition: &PhaseTransition,
    ) -> DomainResult<bool> {
        let entry = serde_json::to_string(transition)?;
        let at = transition.timestamp.to_rfc3339();

        let result = sqlx::query(
            r#"UPDATE master_flows SET
                phase_transitions = json_insert(phase_transitions, '$[#]', json(?1)),
                performance = json_set(performance,
                    '$.total_transitions', COALESCE(json_extract(performance, '$.total_transitions'), 0) + 1,
                    '$.last_transition_at', ?2),
                updated_at = ?2
               WHERE master_flow_id = ?3 AND client_id = ?4 AND engagement_id = ?5"#,
        )
        .bind(&entry)
        .bind(&at)
        .bind(master_flow_id.to_string())
        .bind(tenant.client_id.to_string())
        .bind(tenant.engagement_id.to_string())
        .execute(&mut **tx)
        .await?;

        if result.rows_affected() == 0 {
            return Ok(false);
        }

        if transition.status != TransitionStatus::Completed {
            sqlx::query(
                r#"UPDATE master_flows SET
                    performance = json_set(performance, '$.phase_entered_at.' || json_quote(?1), ?2)
                   WHERE master_flow_id = ?3"#,
            )
            .bind(&transition.phase)
            .bind(&at)
            .bind(master_flow_id.to_string())
            .execute(&mut **tx)
            .await?;
        }

        Ok(true)
    }

    async fn subordinates_in_tx(
        &self,
        tx: &mut Self::Tx,
        tenant: &TenantContext,
        master_flow_id: Uuid,
    ) -> DomainResult<Vec<SubordinateFlow>> {
        let rows: Vec<SubordinateFlowRow> = sqlx::query_as(
            "SELECT * FROM subordinate_flows
             WHERE master_flow_id = ? AND client_id = ? AND engagement_id = ?
             ORDER BY created_at",
        )
        .bind(master_flow_id.to_string())
        .bind(tenant.client_id.to_string())
        .bind(tenant.engagement_id.to_string())
        .fetch_all(&mut **tx)
        .await?;

        rows.into_iter().map(SubordinateFlow::try_from).collect()
    }

    async fn delete_master(
        &self,
        tx: &mut Self::Tx,
        tenant: &TenantContext,
        master_flow_id: Uuid,
    ) -> DomainResult<bool> {
        let result = sqlx::query(
            "DELETE FROM master_flows WHERE master_flow_id = ? AND client_id = ? AND engagement_id = ?",
        )
        .bind(master_flow_id.to_string())
        .bind(tenant.client_id.to_string())
        .bind(tenant.engagement_id.to_string())
        .execute(&mut **tx)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn get_master(
        &self,
        tenant: &TenantContext,
        master_flow_id: Uuid,
    ) -> DomainResult<Option<MasterFlow>> {
        let row: Option<MasterFlowRow> = sqlx::query_as(
            "SELECT * FROM master_flows WHERE master_flow_id = ? AND client_id = ? AND engagement_id = ?",
        )
        .bind(master_flow_id.to_string())
        .bind(tenant.client_id.to_string())
        .bind(tenant.engagement_id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(MasterFlow::try_from).transpose()
    }

    async fn get_subordinate(
        &self,
        tenant: &TenantContext,
        flow_id: Uuid,
    ) -> DomainResult<Option<SubordinateFlow>> {
        let row: Option<SubordinateFlowRow> = sqlx::query_as(
            "SELECT * FROM subordinate_flows WHERE id = ? AND client_id = ? AND engagement_id = ?",
        )
        .bind(flow_id.to_string())
        .bind(tenant.client_id.to_string())
        .bind(tenant.engagement_id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(SubordinateFlow::try_from).transpose()
    }

    async fn get_subordinate_by_kind(
        &self,
        tenant: &TenantContext,
        master_flow_id: Uuid,
        kind: FlowKind,
    ) -> DomainResult<Option<SubordinateFlow>> {
        let row: Option<SubordinateFlowRow> = sqlx::query_as(
            "SELECT * FROM subordinate_flows
             WHERE master_flow_id = ? AND flow_kind = ? AND client_id = ? AND engagement_id = ?",
        )
        .bind(master_flow_id.to_string())
        .bind(kind.as_str())
        .bind(tenant.client_id.to_string())
        .bind(tenant.engagement_id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(SubordinateFlow::try_from).transpose()
    }

    async fn list_subordinates(
        &self,
        tenant: &TenantContext,
        master_flow_id: Uuid,
    ) -> DomainResult<Vec<SubordinateFlow>> {
        let rows: Vec<SubordinateFlowRow> = sqlx::query_as(
            "SELECT * FROM subordinate_flows
             WHERE master_flow_id = ? AND client_id = ? AND engagement_id = ?
             ORDER BY created_at",
        )
        .bind(master_flow_id.to_string())
        .bind(tenant.client_id.to_string())
        .bind(tenant.engagement_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(SubordinateFlow::try_from).collect()
    }

    async fn list_masters(
        &self,
        tenant: &TenantContext,
        filter: &FlowFilter,
    ) -> DomainResult<Vec<MasterFlow>> {
        let mut query = String::from("SELECT * FROM master_flows WHERE client_id = ? AND engagement_id = ?");
        let mut bindings: Vec<String> = vec![tenant.client_id.to_string(), tenant.engagement_id.to_string()];

        if let Some(kind) = &filter.kind {
            query.push_str(" AND flow_kind = ?");
            bindings.push(kind.as_str().to_string());
        }
        if let Some(status) = &filter.status {
            query.push_str(" AND flow_status = ?");
            bindings.push(status.as_str().to_string());
        }
        if let Some(parent_id) = &filter.parent_flow_id {
            query.push_str(" AND parent_flow_id = ?");
            bindings.push(parent_id.to_string());
        }

        query.push_str(" ORDER BY created_at DESC");
        if let Some(limit) = filter.limit {
            query.push_str(&format!(" LIMIT {limit}"));
        }

        let mut q = sqlx::query_as::<_, MasterFlowRow>(&query);
        for binding in &bindings {
            q = q.bind(binding);
        }

        let rows: Vec<MasterFlowRow> = q.fetch_all(&self.pool).await?;
        rows.into_iter().map(MasterFlow::try_from).collect()
    }
}

// ============================================================================
// Row types for sqlx
// ============================================================================

#[derive(sqlx::FromRow)]
struct MasterFlowRow {
    master_flow_id: String,
    client_id: String,
    engagement_id: String,
    created_by: String,
    flow_kind: String,
    flow_name: Option<String>,
    flow_status: String,
    configuration: Option<String>,
    flow_state: Option<String>,
    phase_transitions: Option<String>,
    error_history: Option<String>,
    retry_count: i64,
    parent_flow_id: Option<String>,
    child_flow_ids: Option<String>,
    collaboration_log: Option<String>,
    performance: Option<String>,
    created_at: String,
    updated_at: String,
    completed_at: Option<String>,
}

impl TryFrom<MasterFlowRow> for MasterFlow {
    type Error = DomainError;

    fn try_from(row: MasterFlowRow) -> Result<Self, Self::Error> {
        let flow_kind = FlowKind::from_str(&row.flow_kind)
            .ok_or_else(|| DomainError::UnknownFlowKind(row.flow_kind.clone()))?;

        Ok(MasterFlow {
            master_flow_id: parse_uuid(&row.master_flow_id)?,
            tenant: TenantContext::new(parse_uuid(&row.client_id)?, parse_uuid(&row.engagement_id)?, row.created_by),
            flow_kind,
            flow_name: row.flow_name,
            flow_status: MasterFlowStatus::parse(&row.flow_status),
            configuration: parse_json_or_default(row.configuration)?,
            flow_state: parse_json_or_default(row.flow_state)?,
            phase_transitions: parse_json_or_default(row.phase_transitions)?,
            error_history: parse_json_or_default(row.error_history)?,
            retry_count: u32::try_from(row.retry_count).unwrap_or(u32::MAX),
            parent_flow_id: parse_optional_uuid(row.parent_flow_id)?,
            child_flow_ids: parse_json_or_default(row.child_flow_ids)?,
            collaboration_log: parse_json_or_default(row.collaboration_log)?,
            performance: parse_json_or_default(row.performance)?,
            created_at: parse_datetime(&row.created_at)?,
            updated_at: parse_datetime(&row.updated_at)?,
            completed_at: parse_optional_datetime(row.completed_at)?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct SubordinateFlowRow {
    id: String,
    master_flow_id: String,
    flow_kind: String,
    client_id: String,
    engagement_id: String,
    user_id: String,
    current_phase: Option<String>,
    phase_flags: Option<String>,
    phases_completed: Option<String>,
    status: String,
    progress_percentage: f64,
    phase_results: Option<String>,
    user_inputs: Option<String>,
    error_message: Option<String>,
    error_phase: Option<String>,
    error_details: Option<String>,
    created_at: String,
    updated_at: String,
    completed_at: Option<String>,
}

impl TryFrom<SubordinateFlowRow> for SubordinateFlow {
    type Error = DomainError;

    fn try_from(row: SubordinateFlowRow) -> Result<Self, Self::Error> {
        let flow_kind = FlowKind::from_str(&row.flow_kind)
            .ok_or_else(|| DomainError::UnknownFlowKind(row.flow_kind.clone()))?;
        let status = FlowStatus::from_str(&row.status)
            .ok_or_else(|| DomainError::SerializationError(format!("Invalid flow status: {}", row.status)))?;

        Ok(SubordinateFlow {
            id: parse_uuid(&row.id)?,
            master_flow_id: parse_uuid(&row.master_flow_id)?,
            flow_kind,
            tenant: TenantContext::new(parse_uuid(&row.client_id)?, parse_uuid(&row.engagement_id)?, row.user_id),
            current_phase: row.current_phase,
            phase_flags: parse_json_or_default(row.phase_flags)?,
            phases_completed: parse_json_or_default(row.phases_completed)?,
            status,
            progress_percentage: row.progress_percentage,
            phase_results: parse_json_or_default(row.phase_results)?,
            user_inputs: parse_json_or_default(row.user_inputs)?,
            error_message: row.error_message,
            error_phase: row.error_phase,
            error_details: row
                .error_details
                .map(|s| serde_json::from_str(&s))
                .transpose()?,
            created_at: parse_datetime(&row.created_at)?,
            updated_at: parse_datetime(&row.updated_at)?,
            completed_at: parse_optional_datetime(row.completed_at)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::create_migrated_test_pool;
    use crate::domain::models::{PhaseRegistry, PhaseTransition, TransitionStatus};
    use serde_json::json;

    async fn setup_store() -> SqliteFlowStore {
        let pool = create_migrated_test_pool().await.unwrap();
        SqliteFlowStore::new(pool)
    }

    fn tenant() -> TenantContext {
        TenantContext::new(Uuid::new_v4(), Uuid::new_v4(), "analyst@example.com")
    }

    async fn insert_pair(store: &SqliteFlowStore, tenant: &TenantContext) -> (MasterFlow, SubordinateFlow) {
        let registry = PhaseRegistry::builtin(FlowKind::Discovery);
        let master = MasterFlow::new(tenant.clone(), FlowKind::Discovery, json!({"a": 1}), json!({}));
        let sub = SubordinateFlow::new(master.master_flow_id, tenant.clone(), &registry);

        let mut tx = store.begin().await.unwrap();
        store.insert_master(&mut tx, &master).await.unwrap();
        store.insert_subordinate(&mut tx, &sub).await.unwrap();
        store.commit(tx).await.unwrap();
        (master, sub)
    }

    #[tokio::test]
    async fn test_insert_and_read_back() {
        let store = setup_store().await;
        let tenant = tenant();
        let (master, sub) = insert_pair(&store, &tenant).await;

        let loaded = store.get_master(&tenant, master.master_flow_id).await.unwrap().unwrap();
        assert_eq!(loaded.configuration, json!({"a": 1}));
        assert_eq!(loaded.tenant, tenant);

        let loaded_sub = store.get_subordinate(&tenant, sub.id).await.unwrap().unwrap();
        assert_eq!(loaded_sub.phase_flags, sub.phase_flags);
        assert_eq!(loaded_sub.current_phase, None);
    }

    #[tokio::test]
    async fn test_other_tenant_sees_nothing() {
        let store = setup_store().await;
        let owner = tenant();
        let (master, sub) = insert_pair(&store, &owner).await;

        let stranger = TenantContext::new(owner.client_id, Uuid::new_v4(), "someone-else");
        assert!(store.get_master(&stranger, master.master_flow_id).await.unwrap().is_none());
        assert!(store.get_subordinate(&stranger, sub.id).await.unwrap().is_none());

        let mut tx = store.begin().await.unwrap();
        assert!(store.lock_subordinate(&mut tx, &stranger, sub.id).await.unwrap().is_none());
        assert!(store.lock_master(&mut tx, &stranger, master.master_flow_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_kind_is_rejected() {
        let store = setup_store().await;
        let tenant = tenant();
        let (master, _) = insert_pair(&store, &tenant).await;

        let registry = PhaseRegistry::builtin(FlowKind::Discovery);
        let dup = SubordinateFlow::new(master.master_flow_id, tenant.clone(), &registry);
        let mut tx = store.begin().await.unwrap();
        let err = store.insert_subordinate(&mut tx, &dup).await.unwrap_err();
        assert!(matches!(err, DomainError::DuplicateSubordinate { .. }));
    }

    #[tokio::test]
    async fn test_append_transition_appends_in_place() {
        let store = setup_store().await;
        let tenant = tenant();
        let (master, _) = insert_pair(&store, &tenant).await;

        let mut tx = store.begin().await.unwrap();
        for phase in ["data_import", "field_mapping"] {
            let entry = PhaseTransition::new(phase, TransitionStatus::Entered, json!({}));
            assert!(store.append_transition(&mut tx, &tenant, master.master_flow_id, &entry).await.unwrap());
        }
        store.commit(tx).await.unwrap();

        let loaded = store.get_master(&tenant, master.master_flow_id).await.unwrap().unwrap();
        let phases: Vec<&str> = loaded.phase_transitions.iter().map(|t| t.phase.as_str()).collect();
        assert_eq!(phases, vec!["data_import", "field_mapping"]);
        assert_eq!(loaded.performance.total_transitions, 2);
        assert!(loaded.performance.last_transition_at.is_some());
        assert!(loaded.performance.phase_entered_at.contains_key("field_mapping"));
    }

    #[tokio::test]
    async fn test_dropped_transaction_rolls_back() {
        let store = setup_store().await;
        let tenant = tenant();
        let master = MasterFlow::new(tenant.clone(), FlowKind::Planning, json!({}), json!({}));

        {
            let mut tx = store.begin().await.unwrap();
            store.insert_master(&mut tx, &master).await.unwrap();
        }

        assert!(store.get_master(&tenant, master.master_flow_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_cascades_to_subordinates() {
        let store = setup_store().await;
        let tenant = tenant();
        let (master, sub) = insert_pair(&store, &tenant).await;

        let mut tx = store.begin().await.unwrap();
        assert!(store.delete_master(&mut tx, &tenant, master.master_flow_id).await.unwrap());
        store.commit(tx).await.unwrap();

        assert!(store.get_subordinate(&tenant, sub.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_masters_filters_by_kind() {
        let store = setup_store().await;
        let tenant = tenant();
        insert_pair(&store, &tenant).await;

        let planning = MasterFlow::new(tenant.clone(), FlowKind::Planning, json!({}), json!({}));
        let mut tx = store.begin().await.unwrap();
        store.insert_master(&mut tx, &planning).await.unwrap();
        store.commit(tx).await.unwrap();

        let all = store.list_masters(&tenant, &FlowFilter::default()).await.unwrap();
        assert_eq!(all.len(), 2);

        let filter = FlowFilter {
            kind: Some(FlowKind::Planning),
            ..Default::default()
        };
        let only = store.list_masters(&tenant, &filter).await.unwrap();
        assert_eq!(only.len(), 1);
        assert_eq!(only[0].master_flow_id, planning.master_flow_id);
    }
}

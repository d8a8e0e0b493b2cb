//! Flow store port.
//!
//! Writes go through an explicit transaction handle so callers can compose
//! several writes (and the row locks that guard them) into one unit. Dropping
//! a handle without [`FlowStore::commit`] rolls every write back.

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::{
    FlowKind, MasterFlow, MasterFlowStatus, PhaseTransition, SubordinateFlow, TenantContext,
};

/// Filter for listing master flows inside one tenant.
#[derive(Debug, Clone, Default)]
pub struct FlowFilter {
    pub kind: Option<FlowKind>,
    pub status: Option<MasterFlowStatus>,
    pub parent_flow_id: Option<Uuid>,
    pub limit: Option<usize>,
}

/// Whether a write commits on its own or joins a transaction the caller owns.
pub enum CommitMode<'a, T> {
    /// Open, write and commit a transaction internally
    Immediate,
    /// Write into the caller's transaction; the caller commits
    Deferred(&'a mut T),
}

/// Persistence interface for master and subordinate flows.
///
/// Every method is tenant-scoped: a row stamped with another client or
/// engagement behaves exactly like a missing row.
#[async_trait]
pub trait FlowStore: Send + Sync {
    /// Open transaction handle.
    type Tx: Send;

    async fn begin(&self) -> DomainResult<Self::Tx>;

    async fn commit(&self, tx: Self::Tx) -> DomainResult<()>;

    // -- Writes inside a transaction --

    async fn insert_master(&self, tx: &mut Self::Tx, master: &MasterFlow) -> DomainResult<()>;

    async fn insert_subordinate(&self, tx: &mut Self::Tx, flow: &SubordinateFlow) -> DomainResult<()>;

    /// Take the exclusive lock on a subordinate row and read it under the lock.
    ///
    /// Returns `None` when no row with this id exists for the tenant; no lock
    /// is held in that case.
    async fn lock_subordinate(
        &self,
        tx: &mut Self::Tx,
        tenant: &TenantContext,
        flow_id: Uuid,
    ) -> DomainResult<Option<SubordinateFlow>>;

    /// Take the exclusive lock on a master row and read it under the lock.
    async fn lock_master(
        &self,
        tx: &mut Self::Tx,
        tenant: &TenantContext,
        master_flow_id: Uuid,
    ) -> DomainResult<Option<MasterFlow>>;

    /// Overwrite the mutable columns of a subordinate row.
    async fn update_subordinate(&self, tx: &mut Self::Tx, flow: &SubordinateFlow) -> DomainResult<()>;

    /// Overwrite the mutable columns of a master row.
    async fn update_master(&self, tx: &mut Self::Tx, master: &MasterFlow) -> DomainResult<()>;

    /// Append one entry to a master's transition log and bump its metrics.
    ///
    /// This is an in-place append; it never rewrites the rest of the master
    /// row. Returns false when the master does not exist for the tenant.
    async fn append_transition(
        &self,
        tx: &mut Self::Tx,
        tenant: &TenantContext,
        master_flow_id: Uuid,
        transition: &PhaseTransition,
    ) -> DomainResult<bool>;

    /// Subordinates of a master, read through the transaction.
    async fn subordinates_in_tx(
        &self,
        tx: &mut Self::Tx,
        tenant: &TenantContext,
        master_flow_id: Uuid,
    ) -> DomainResult<Vec<SubordinateFlow>>;

    /// Delete a master row; its subordinates go with it.
    async fn delete_master(
        &self,
        tx: &mut Self::Tx,
        tenant: &TenantContext,
        master_flow_id: Uuid,
    ) -> DomainResult<bool>;

    // -- Reads --

    async fn get_master(
        &self,
        tenant: &TenantContext,
        master_flow_id: Uuid,
    ) -> DomainResult<Option<MasterFlow>>;

    async fn get_subordinate(
        &self,
        tenant: &TenantContext,
        flow_id: Uuid,
    ) -> DomainResult<Option<SubordinateFlow>>;

    async fn get_subordinate_by_kind(
        &self,
        tenant: &TenantContext,
        master_flow_id: Uuid,
        kind: FlowKind,
    ) -> DomainResult<Option<SubordinateFlow>>;

    async fn list_subordinates(
        &self,
        tenant: &TenantContext,
        master_flow_id: Uuid,
    ) -> DomainResult<Vec<SubordinateFlow>>;

    /// Master flows of the tenant, newest first.
    async fn list_masters(
        &self,
        tenant: &TenantContext,
        filter: &FlowFilter,
    ) -> DomainResult<Vec<MasterFlow>>;
}

//! Phaseflow - multi-phase flow orchestration
//!
//! A master flow owns one or more subordinate flows, each walking the ordered
//! phases of its kind's registry. Phase changes go through a single guarded
//! transition path that locks the subordinate row, validates the move against
//! the registry and writes flags, status and the master's transition log in
//! one transaction.
//!
//! # Architecture
//!
//! - **Domain Layer** (`domain`): models, phase registries and the storage port
//! - **Service Layer** (`services`): transition engine, orchestrator, error
//!   recording and the persistence boundary used by collaborators
//! - **Adapters** (`adapters`): `SQLite` implementation of the storage port
//! - **Infrastructure Layer** (`infrastructure`): configuration and logging
//! - **CLI Layer** (`cli`): operator command-line interface
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use phaseflow::{FlowKind, FlowStateService, PhaseRegistries, TenantContext};
//!
//! let service = FlowStateService::new(store, Arc::new(PhaseRegistries::builtin()));
//! let result = service
//!     .update_flow_phase(&tenant, master_flow_id, FlowKind::Discovery, "data_import", None, None)
//!     .await?;
//! assert!(result.success);
//! ```

pub mod adapters;
pub mod cli;
pub mod domain;
pub mod infrastructure;
pub mod services;

pub use domain::models::{
    Config, FlowKind, FlowSnapshot, FlowStatus, MasterFlow, MasterFlowStatus, PhasePayload,
    PhaseRegistries, PhaseRegistry, SubordinateFlow, TenantContext,
};
pub use domain::ports::{CommitMode, ErrorClassifier, FlowFilter, FlowStore};
pub use domain::{DomainError, DomainResult};
pub use infrastructure::config::{ConfigError, ConfigLoader};
pub use services::{
    ErrorRecorder, FlowExportService, FlowStateService, MasterFlowOrchestrator, OperatorOverride,
    PhaseTransitionEngine, TransitionRejection, TransitionResult,
};

//! Domain errors for the phaseflow orchestration core.

use thiserror::Error;
use uuid::Uuid;

/// Domain-level errors that can occur in the orchestration core.
///
/// Expected transition rejections are not errors: the transition engine
/// reports them through `TransitionResult`. These variants cover lookups,
/// registry problems and storage failures.
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("Flow not found: {0}")]
    FlowNotFound(Uuid),

    #[error("Subordinate flow not found: {0}")]
    SubordinateNotFound(Uuid),

    #[error("No {kind} flow attached to master flow {master_flow_id}")]
    SubordinateKindNotFound { master_flow_id: Uuid, kind: String },

    #[error("Unknown flow kind: {0}")]
    UnknownFlowKind(String),

    #[error("Unknown phase '{phase}' for {kind} flows")]
    UnknownPhase { kind: String, phase: String },

    #[error("Master flow {master_flow_id} already has a {kind} flow")]
    DuplicateSubordinate { master_flow_id: Uuid, kind: String },

    #[error("Invalid phase registry for {kind}: {reason}")]
    InvalidRegistry { kind: String, reason: String },

    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

pub type DomainResult<T> = Result<T, DomainError>;

impl From<sqlx::Error> for DomainError {
    fn from(err: sqlx::Error) -> Self {
        DomainError::DatabaseError(err.to_string())
    }
}

impl From<serde_json::Error> for DomainError {
    fn from(err: serde_json::Error) -> Self {
        DomainError::SerializationError(err.to_string())
    }
}

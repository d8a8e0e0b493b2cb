pub mod config;
pub mod flow_error;
pub mod flow_snapshot;
pub mod master_flow;
pub mod phase_payload;
pub mod phase_registry;
pub mod subordinate_flow;
pub mod tenant;

pub use config::{Config, DatabaseConfig, FlowsConfig, LoggingConfig, RegistryOverride};
pub use flow_error::{
    truncate_error_message, ErrorClassification, ErrorDetails, ErrorHistoryEntry, ErrorType,
    MAX_ERROR_MESSAGE_CHARS,
};
pub use flow_snapshot::FlowSnapshot;
pub use master_flow::{
    CollaborationEntry, CollaborationLog, MasterFlow, MasterFlowStatus, PerformanceMetrics,
    PhaseTransition, TransitionStatus,
};
pub use phase_payload::{
    AssetInventoryResult, DataGap, DataImportResult, FieldMappingResult, GapAnalysisResult,
    PhasePayload, Wave, WavePlanningResult,
};
pub use phase_registry::{normalize_phase_key, FlowKind, PhaseRegistries, PhaseRegistry, PhaseSpec};
pub use subordinate_flow::{FlowStatus, SubordinateFlow, ENGINE_OWNED_FIELDS};
pub use tenant::TenantContext;

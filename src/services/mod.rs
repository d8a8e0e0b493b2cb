//! Service layer: the orchestration logic, generic over the storage port.

pub mod error_classifier;
pub mod flow_export;
pub mod flow_state_service;
pub mod master_flow_orchestrator;
pub mod operator_override;
pub mod phase_transition;

pub use error_classifier::{ErrorRecorder, SubstringErrorClassifier, DEFAULT_ERROR_HISTORY_LIMIT};
pub use flow_export::FlowExportService;
pub use flow_state_service::FlowStateService;
pub use master_flow_orchestrator::{rollup_status, CreateFlowRequest, LifecycleAction, MasterFlowOrchestrator};
pub use operator_override::OperatorOverride;
pub use phase_transition::{PhaseTransitionEngine, TransitionRejection, TransitionResult};

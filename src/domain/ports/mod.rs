//! Port trait definitions (Hexagonal Architecture)
//!
//! - FlowStore: transactional persistence of master and subordinate flows
//! - ErrorClassifier: maps failure messages onto the error taxonomy
//!
//! Services are generic over these traits so the orchestration logic stays
//! independent of the storage backend.

pub mod error_classifier;
pub mod flow_store;

pub use error_classifier::ErrorClassifier;
pub use flow_store::{CommitMode, FlowFilter, FlowStore};

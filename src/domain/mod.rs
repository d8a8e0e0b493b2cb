//! Domain layer for the phaseflow orchestration core
//!
//! This module contains the flow models, the phase registries and the port
//! traits the storage adapters implement.

pub mod errors;
pub mod models;
pub mod ports;

pub use errors::{DomainError, DomainResult};

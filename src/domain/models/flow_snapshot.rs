//! Read-only view of a master flow and everything attached to it.

use serde::{Deserialize, Serialize};

use super::master_flow::MasterFlow;
use super::phase_registry::FlowKind;
use super::subordinate_flow::SubordinateFlow;

/// A master flow together with its subordinate flows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowSnapshot {
    pub master: MasterFlow,
    pub subordinates: Vec<SubordinateFlow>,
}

impl FlowSnapshot {
    pub fn subordinate(&self, kind: FlowKind) -> Option<&SubordinateFlow> {
        self.subordinates.iter().find(|s| s.flow_kind == kind)
    }
}

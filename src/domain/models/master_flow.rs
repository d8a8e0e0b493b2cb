//! Master flow domain model.
//!
//! A master flow is the coordination root of one workflow instance. It links
//! one or more subordinate flows, carries the cross-cutting transition and
//! error logs, and holds the composed value objects (collaboration log,
//! performance metrics) as plain embedded fields.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use uuid::Uuid;

use super::flow_error::ErrorHistoryEntry;
use super::phase_registry::FlowKind;
use super::tenant::TenantContext;

/// Operational status of a master flow.
///
/// This is not the phase state machine; it is a coarse label collaborators
/// may set freely. Unrecognised labels survive a round trip through
/// [`MasterFlowStatus::Other`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum MasterFlowStatus {
    #[default]
    Initialized,
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
    Other(String),
}

impl MasterFlowStatus {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Initialized => "initialized",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::Other(s) => s,
        }
    }

    /// Parse a stored label; never fails.
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "initialized" => Self::Initialized,
            "running" => Self::Running,
            "paused" => Self::Paused,
            "completed" => Self::Completed,
            "failed" => Self::Failed,
            "cancelled" | "canceled" => Self::Cancelled,
            _ => Self::Other(s.to_string()),
        }
    }

    /// Completed, failed and cancelled flows take no further lifecycle changes.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl std::fmt::Display for MasterFlowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for MasterFlowStatus {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for MasterFlowStatus {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(Self::parse(&s))
    }
}

/// Status recorded with a phase transition entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionStatus {
    /// The flow entered the phase through the validated path
    Entered,
    /// The terminal phase's own work finished
    Completed,
    /// An operator set the phase outside validation
    Forced,
}

/// One entry of the append-only transition log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseTransition {
    pub phase: String,
    pub status: TransitionStatus,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub metadata: Value,
}

impl PhaseTransition {
    pub fn new(phase: impl Into<String>, status: TransitionStatus, metadata: Value) -> Self {
        Self {
            phase: phase.into(),
            status,
            timestamp: Utc::now(),
            metadata,
        }
    }
}

/// Audit entry describing who did what to a flow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollaborationEntry {
    pub timestamp: DateTime<Utc>,
    pub actor: String,
    pub action: String,
    #[serde(default)]
    pub details: Value,
}

/// Ordered audit trail of lifecycle changes, overrides and links.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CollaborationLog(Vec<CollaborationEntry>);

impl CollaborationLog {
    pub fn record(&mut self, actor: impl Into<String>, action: impl Into<String>, details: Value) {
        self.0.push(CollaborationEntry {
            timestamp: Utc::now(),
            actor: actor.into(),
            action: action.into(),
            details,
        });
    }

    pub fn entries(&self) -> &[CollaborationEntry] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Transition counters maintained alongside the transition log.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub total_transitions: u64,
    pub last_transition_at: Option<DateTime<Utc>>,
    /// When each phase was last entered
    #[serde(default)]
    pub phase_entered_at: BTreeMap<String, DateTime<Utc>>,
}

/// The coordination record of one workflow instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MasterFlow {
    pub master_flow_id: Uuid,
    pub tenant: TenantContext,
    pub flow_kind: FlowKind,
    pub flow_name: Option<String>,
    pub flow_status: MasterFlowStatus,
    /// Set at creation; never rewritten
    pub configuration: Value,
    /// Persistence snapshot maintained by collaborators
    pub flow_state: Value,
    pub phase_transitions: Vec<PhaseTransition>,
    pub error_history: Vec<ErrorHistoryEntry>,
    pub retry_count: u32,
    pub parent_flow_id: Option<Uuid>,
    pub child_flow_ids: Vec<Uuid>,
    pub collaboration_log: CollaborationLog,
    pub performance: PerformanceMetrics,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl MasterFlow {
    /// Create a fresh master flow with empty logs.
    pub fn new(
        tenant: TenantContext,
        flow_kind: FlowKind,
        configuration: Value,
        initial_state: Value,
    ) -> Self {
        let now = Utc::now();
        Self {
            master_flow_id: Uuid::new_v4(),
            tenant,
            flow_kind,
            flow_name: None,
            flow_status: MasterFlowStatus::Initialized,
            configuration,
            flow_state: initial_state,
            phase_transitions: Vec::new(),
            error_history: Vec::new(),
            retry_count: 0,
            parent_flow_id: None,
            child_flow_ids: Vec::new(),
            collaboration_log: CollaborationLog::default(),
            performance: PerformanceMetrics::default(),
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.flow_name = Some(name.into());
        self
    }

    pub fn with_parent(mut self, parent_flow_id: Uuid) -> Self {
        self.parent_flow_id = Some(parent_flow_id);
        self
    }

    /// Record an error, evicting the oldest entries beyond `limit`.
    ///
    /// Increments `retry_count` and returns the new value.
    pub fn push_error(&mut self, mut entry: ErrorHistoryEntry, limit: usize) -> u32 {
        self.retry_count = self.retry_count.saturating_add(1);
        entry.retry_count = self.retry_count;
        self.error_history.push(entry);
        if self.error_history.len() > limit {
            let excess = self.error_history.len() - limit;
            self.error_history.drain(..excess);
        }
        self.updated_at = Utc::now();
        self.retry_count
    }

    /// Link a spawned child flow; repeated links are ignored.
    pub fn add_child(&mut self, child_flow_id: Uuid) -> bool {
        if child_flow_id == self.master_flow_id || self.child_flow_ids.contains(&child_flow_id) {
            return false;
        }
        self.child_flow_ids.push(child_flow_id);
        self.updated_at = Utc::now();
        true
    }

    pub fn remove_child(&mut self, child_flow_id: Uuid) -> bool {
        let before = self.child_flow_ids.len();
        self.child_flow_ids.retain(|id| *id != child_flow_id);
        before != self.child_flow_ids.len()
    }

    /// Change the operational status, stamping `completed_at` once.
    pub fn set_status(&mut self, status: MasterFlowStatus) {
        if status == MasterFlowStatus::Completed && self.completed_at.is_none() {
            self.completed_at = Some(Utc::now());
        }
        self.flow_status = status;
        self.updated_at = Utc::now();
    }
}

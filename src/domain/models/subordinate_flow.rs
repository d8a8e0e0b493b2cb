//! Subordinate flow domain model.
//!
//! A subordinate flow is the per-kind record the phase state machine operates
//! on. Its completion flags are keyed by the flag names of the kind's phase
//! registry, and `phases_completed` mirrors the flags that are set, in the
//! order they became true.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use uuid::Uuid;

use super::flow_error::ErrorDetails;
use super::phase_payload::PhasePayload;
use super::phase_registry::{FlowKind, PhaseRegistry};
use super::tenant::TenantContext;

/// Coarse lifecycle status of a subordinate flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowStatus {
    /// Created or between phases
    #[default]
    Active,
    /// A phase's work is running
    Processing,
    /// Suspended by a lifecycle change
    Paused,
    /// Terminal phase flag is set
    Completed,
    Failed,
    Cancelled,
}

impl FlowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Processing => "processing",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "active" => Some(Self::Active),
            "processing" | "running" => Some(Self::Processing),
            "paused" => Some(Self::Paused),
            "completed" | "complete" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "cancelled" | "canceled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    /// Check if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl std::fmt::Display for FlowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fields the transition engine owns; `extra_updates` may not write them.
pub const ENGINE_OWNED_FIELDS: &[&str] = &[
    "id",
    "master_flow_id",
    "flow_kind",
    "current_phase",
    "phases_completed",
    "status",
    "completed_at",
];

/// Per-kind flow record driven by the phase transition engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubordinateFlow {
    pub id: Uuid,
    pub master_flow_id: Uuid,
    pub flow_kind: FlowKind,
    pub tenant: TenantContext,
    /// `None` until the first phase is entered
    pub current_phase: Option<String>,
    /// Completion flag name → value
    pub phase_flags: BTreeMap<String, bool>,
    pub phases_completed: Vec<String>,
    pub status: FlowStatus,
    pub progress_percentage: f64,
    /// Latest result payload per phase
    pub phase_results: BTreeMap<String, PhasePayload>,
    /// Latest user input per phase
    pub user_inputs: BTreeMap<String, Value>,
    pub error_message: Option<String>,
    pub error_phase: Option<String>,
    pub error_details: Option<ErrorDetails>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl SubordinateFlow {
    /// New, not-yet-started flow with every completion flag cleared.
    pub fn new(master_flow_id: Uuid, tenant: TenantContext, registry: &PhaseRegistry) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            master_flow_id,
            flow_kind: registry.kind(),
            tenant,
            current_phase: None,
            phase_flags: registry.flag_names().map(|f| (f.to_string(), false)).collect(),
            phases_completed: Vec::new(),
            status: FlowStatus::Active,
            progress_percentage: 0.0,
            phase_results: BTreeMap::new(),
            user_inputs: BTreeMap::new(),
            error_message: None,
            error_phase: None,
            error_details: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    pub fn has_started(&self) -> bool {
        self.current_phase.is_some()
    }

    pub fn flag(&self, flag: &str) -> bool {
        self.phase_flags.get(flag).copied().unwrap_or(false)
    }

    pub fn is_phase_complete(&self, registry: &PhaseRegistry, phase: &str) -> bool {
        registry.flag_for(phase).is_some_and(|flag| self.flag(flag))
    }

    pub fn terminal_flag_set(&self, registry: &PhaseRegistry) -> bool {
        self.is_phase_complete(registry, registry.terminal_phase())
    }

    /// Set or clear a completion flag, keeping `phases_completed` in sync.
    ///
    /// Returns false when the name is not a flag of this registry.
    pub fn set_flag(&mut self, registry: &PhaseRegistry, flag: &str, value: bool) -> bool {
        let Some(phase) = registry.phases().iter().find(|p| p.flag == flag) else {
            return false;
        };
        self.phase_flags.insert(flag.to_string(), value);
        if value {
            if !self.phases_completed.contains(&phase.name) {
                self.phases_completed.push(phase.name.clone());
            }
        } else {
            self.phases_completed.retain(|p| *p != phase.name);
        }
        true
    }

    /// Mark a phase complete by name.
    pub fn mark_phase_complete(&mut self, registry: &PhaseRegistry, phase: &str) -> bool {
        match registry.flag_for(phase) {
            Some(flag) => {
                let flag = flag.to_string();
                self.set_flag(registry, &flag, true)
            }
            None => false,
        }
    }

    /// Apply one `extra_updates` entry.
    ///
    /// Writable: `progress_percentage`, `error_message`, and the terminal
    /// phase's completion flag (set to true, once the flow is in the terminal
    /// phase). Anything else is refused with a reason.
    pub fn apply_extra_update(
        &mut self,
        registry: &PhaseRegistry,
        key: &str,
        value: &Value,
    ) -> Result<(), String> {
        if ENGINE_OWNED_FIELDS.contains(&key) {
            return Err(format!("field '{key}' is managed by the transition engine; ignored"));
        }

        match key {
            "progress_percentage" => {
                let pct = value
                    .as_f64()
                    .filter(|p| (0.0..=100.0).contains(p))
                    .ok_or_else(|| format!("progress_percentage must be a number in 0..=100, got {value}"))?;
                self.progress_percentage = pct;
                Ok(())
            }
            "error_message" => match value {
                Value::Null => {
                    self.error_message = None;
                    Ok(())
                }
                Value::String(s) => {
                    self.error_message = Some(s.clone());
                    Ok(())
                }
                other => Err(format!("error_message must be a string or null, got {other}")),
            },
            flag if registry.is_flag(flag) => {
                let set = value
                    .as_bool()
                    .ok_or_else(|| format!("flag '{flag}' must be a boolean, got {value}"))?;
                if !set {
                    return Err(format!("flag '{flag}' cannot be cleared; ignored"));
                }
                if registry.flag_for(registry.terminal_phase()) != Some(flag) {
                    return Err(format!("flag '{flag}' is set by the transition engine; ignored"));
                }
                let in_terminal = self.current_phase.as_deref().is_some_and(|p| registry.is_terminal(p));
                if !in_terminal {
                    return Err(format!("flag '{flag}' may only be set on entering the terminal phase; ignored"));
                }
                self.set_flag(registry, flag, true);
                Ok(())
            }
            unknown => Err(format!("unknown field '{unknown}' in extra updates; ignored")),
        }
    }

    /// Close the flow if it sits in the terminal phase with its flag set.
    ///
    /// Stamps `completed_at` only on the first transition into `completed`.
    /// Returns true when the status changed.
    pub fn sync_completion(&mut self, registry: &PhaseRegistry) -> bool {
        let in_terminal = self
            .current_phase
            .as_deref()
            .is_some_and(|p| registry.is_terminal(p));
        if !in_terminal || !self.terminal_flag_set(registry) || self.status == FlowStatus::Completed {
            return false;
        }
        self.status = FlowStatus::Completed;
        if self.completed_at.is_none() {
            self.completed_at = Some(Utc::now());
        }
        self.progress_percentage = 100.0;
        true
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

//! Phase registry: the ordered phase list of every flow kind.
//!
//! A registry maps each phase of a flow kind to the name of its completion
//! flag, names the terminal phase (always the last one), and resolves legacy
//! or renamed phase names through an alias table. Registries are built once at
//! process start and injected into the services that need them; nothing looks
//! them up ambiently.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::config::RegistryOverride;

/// Kind of workflow a flow runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowKind {
    Discovery,
    Assessment,
    Collection,
    Planning,
    Decommission,
}

impl FlowKind {
    /// Every supported flow kind.
    pub const ALL: [Self; 5] = [
        Self::Discovery,
        Self::Assessment,
        Self::Collection,
        Self::Planning,
        Self::Decommission,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Discovery => "discovery",
            Self::Assessment => "assessment",
            Self::Collection => "collection",
            Self::Planning => "planning",
            Self::Decommission => "decommission",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "discovery" => Some(Self::Discovery),
            "assessment" => Some(Self::Assessment),
            "collection" => Some(Self::Collection),
            "planning" => Some(Self::Planning),
            "decommission" => Some(Self::Decommission),
            _ => None,
        }
    }
}

impl std::fmt::Display for FlowKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One phase of a flow kind and the flag that records its completion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseSpec {
    /// Canonical phase name
    pub name: String,
    /// Completion flag name
    pub flag: String,
}

impl PhaseSpec {
    /// Phase with the conventional `<name>_completed` flag.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let flag = format!("{name}_completed");
        Self { name, flag }
    }
}

/// Canonical spelling used for phase lookups: trimmed, lowercase, `_`-separated.
pub fn normalize_phase_key(raw: &str) -> String {
    raw.trim().to_lowercase().replace(['-', ' '], "_")
}

/// Ordered phase configuration for one flow kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PhaseRegistry {
    kind: FlowKind,
    phases: Vec<PhaseSpec>,
    aliases: BTreeMap<String, String>,
}

impl PhaseRegistry {
    /// Build and validate a registry.
    pub fn new(
        kind: FlowKind,
        phases: Vec<PhaseSpec>,
        aliases: impl IntoIterator<Item = (String, String)>,
    ) -> DomainResult<Self> {
        let registry = Self::build(kind, phases, aliases);
        registry.validate()?;
        Ok(registry)
    }

    /// Build a registry whose flags follow the `<phase>_completed` convention.
    pub fn from_phase_names(
        kind: FlowKind,
        phases: &[&str],
        aliases: &[(&str, &str)],
    ) -> DomainResult<Self> {
        Self::new(
            kind,
            phases.iter().map(|p| PhaseSpec::new(*p)).collect(),
            aliases.iter().map(|(a, c)| ((*a).to_string(), (*c).to_string())),
        )
    }

    fn build(
        kind: FlowKind,
        phases: Vec<PhaseSpec>,
        aliases: impl IntoIterator<Item = (String, String)>,
    ) -> Self {
        Self {
            kind,
            phases,
            aliases: aliases
                .into_iter()
                .map(|(alias, canonical)| (normalize_phase_key(&alias), normalize_phase_key(&canonical)))
                .collect(),
        }
    }

    /// Built-in registry for a flow kind.
    pub fn builtin(kind: FlowKind) -> Self {
        let (phases, aliases): (&[&str], &[(&str, &str)]) = match kind {
            FlowKind::Discovery => (
                &[
                    "data_import",
                    "field_mapping",
                    "data_cleansing",
                    "asset_inventory",
                    "dependency_analysis",
                    "tech_debt_assessment",
                ],
                &[
                    ("attribute_mapping", "field_mapping"),
                    ("inventory", "asset_inventory"),
                    ("dependencies", "dependency_analysis"),
                    ("tech_debt", "tech_debt_assessment"),
                    ("data_validation", "data_import"),
                ],
            ),
            FlowKind::Assessment => (
                &[
                    "readiness_assessment",
                    "complexity_analysis",
                    "dependency_analysis",
                    "tech_debt_assessment",
                    "risk_assessment",
                    "recommendation_generation",
                ],
                &[
                    ("architecture_minimums", "readiness_assessment"),
                    ("tech_debt", "tech_debt_assessment"),
                    ("six_r_decision", "recommendation_generation"),
                ],
            ),
            FlowKind::Collection => (
                &[
                    "platform_detection",
                    "automated_collection",
                    "gap_analysis",
                    "questionnaire_generation",
                    "manual_collection",
                    "data_validation",
                    "finalization",
                ],
                &[
                    ("asset_selection", "platform_detection"),
                    ("gap_resolution", "gap_analysis"),
                    ("questionnaires", "questionnaire_generation"),
                ],
            ),
            FlowKind::Planning => (
                &[
                    "wave_planning",
                    "resource_allocation",
                    "timeline_generation",
                    "cost_estimation",
                ],
                &[
                    ("waves", "wave_planning"),
                    ("resources", "resource_allocation"),
                    ("timeline", "timeline_generation"),
                ],
            ),
            FlowKind::Decommission => (
                &["decommission_planning", "data_migration", "system_shutdown"],
                &[
                    ("planning", "decommission_planning"),
                    ("shutdown", "system_shutdown"),
                ],
            ),
        };

        Self::build(
            kind,
            phases.iter().map(|p| PhaseSpec::new(*p)).collect(),
            aliases.iter().map(|(a, c)| ((*a).to_string(), (*c).to_string())),
        )
    }

    /// Check the registry's structural rules.
    pub fn validate(&self) -> DomainResult<()> {
        let invalid = |reason: String| DomainError::InvalidRegistry {
            kind: self.kind.to_string(),
            reason,
        };

        if self.phases.is_empty() {
            return Err(invalid("phase list is empty".to_string()));
        }

        let mut names = HashSet::new();
        let mut flags = HashSet::new();
        for phase in &self.phases {
            if phase.name.is_empty() || phase.name != normalize_phase_key(&phase.name) {
                return Err(invalid(format!("phase name '{}' is not canonical", phase.name)));
            }
            if !names.insert(phase.name.as_str()) {
                return Err(invalid(format!("duplicate phase '{}'", phase.name)));
            }
            if phase.flag.is_empty() || !flags.insert(phase.flag.as_str()) {
                return Err(invalid(format!("duplicate or empty flag '{}'", phase.flag)));
            }
        }

        for (alias, canonical) in &self.aliases {
            if names.contains(alias.as_str()) {
                return Err(invalid(format!("alias '{alias}' shadows a canonical phase")));
            }
            if !names.contains(canonical.as_str()) {
                return Err(invalid(format!(
                    "alias '{alias}' targets unknown phase '{canonical}'"
                )));
            }
        }

        Ok(())
    }

    pub fn kind(&self) -> FlowKind {
        self.kind
    }

    /// Phases in execution order.
    pub fn phases(&self) -> &[PhaseSpec] {
        &self.phases
    }

    /// Alias table (normalized alias → canonical phase).
    pub fn aliases(&self) -> &BTreeMap<String, String> {
        &self.aliases
    }

    /// Phase names in execution order.
    pub fn phase_names(&self) -> impl Iterator<Item = &str> {
        self.phases.iter().map(|p| p.name.as_str())
    }

    /// All completion flag names in phase order.
    pub fn flag_names(&self) -> impl Iterator<Item = &str> {
        self.phases.iter().map(|p| p.flag.as_str())
    }

    pub fn first_phase(&self) -> &str {
        // validate() rejects empty registries; builtins are never empty
        self.phases.first().map_or("", |p| p.name.as_str())
    }

    pub fn terminal_phase(&self) -> &str {
        self.phases.last().map_or("", |p| p.name.as_str())
    }

    pub fn is_terminal(&self, phase: &str) -> bool {
        !self.phases.is_empty() && self.terminal_phase() == phase
    }

    /// Index of a canonical phase name.
    pub fn position(&self, phase: &str) -> Option<usize> {
        self.phases.iter().position(|p| p.name == phase)
    }

    pub fn contains(&self, phase: &str) -> bool {
        self.position(phase).is_some()
    }

    /// Completion flag for a canonical phase name.
    pub fn flag_for(&self, phase: &str) -> Option<&str> {
        self.phases
            .iter()
            .find(|p| p.name == phase)
            .map(|p| p.flag.as_str())
    }

    /// Whether the name is one of this registry's completion flags.
    pub fn is_flag(&self, name: &str) -> bool {
        self.phases.iter().any(|p| p.flag == name)
    }

    /// Resolve a raw phase name to its canonical form, following aliases.
    ///
    /// Returns `None` when the name is neither a phase nor an alias.
    pub fn normalize(&self, raw: &str) -> Option<String> {
        let key = normalize_phase_key(raw);
        if self.contains(&key) {
            return Some(key);
        }
        self.aliases.get(&key).cloned()
    }

    /// The only phase a flow may enter next, if any.
    pub fn next_phase(&self, current: Option<&str>) -> Option<&str> {
        match current {
            None => self.phases.first().map(|p| p.name.as_str()),
            Some(phase) => {
                let index = self.position(phase)?;
                self.phases.get(index + 1).map(|p| p.name.as_str())
            }
        }
    }

    /// Strict sequential transition rule.
    ///
    /// From "not started" only the first phase is reachable; from phase i only
    /// phase i+1; the terminal phase has no successor. Both arguments must be
    /// canonical names.
    pub fn is_valid_transition(&self, current: Option<&str>, target: &str) -> bool {
        self.next_phase(current) == Some(target)
    }
}

/// The set of registries injected into the orchestration services.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseRegistries {
    registries: HashMap<FlowKind, PhaseRegistry>,
}

impl PhaseRegistries {
    /// Registries for every built-in flow kind.
    pub fn builtin() -> Self {
        Self {
            registries: FlowKind::ALL
                .into_iter()
                .map(|kind| (kind, PhaseRegistry::builtin(kind)))
                .collect(),
        }
    }

    /// Empty set; useful for tests that register only what they exercise.
    pub fn empty() -> Self {
        Self {
            registries: HashMap::new(),
        }
    }

    /// Built-in registries with configured per-kind replacements applied.
    pub fn from_overrides(overrides: &BTreeMap<String, RegistryOverride>) -> DomainResult<Self> {
        let mut registries = Self::builtin();
        for (kind_name, over) in overrides {
            let kind = FlowKind::from_str(kind_name)
                .ok_or_else(|| DomainError::UnknownFlowKind(kind_name.clone()))?;
            let phases = over
                .phases
                .iter()
                .map(|name| {
                    let name = normalize_phase_key(name);
                    match over.flags.get(&name) {
                        Some(flag) => PhaseSpec {
                            name,
                            flag: flag.clone(),
                        },
                        None => PhaseSpec::new(name),
                    }
                })
                .collect();
            let registry = PhaseRegistry::new(kind, phases, over.aliases.clone())?;
            registries = registries.with_registry(registry);
        }
        Ok(registries)
    }

    /// Replace (or add) the registry for its kind.
    pub fn with_registry(mut self, registry: PhaseRegistry) -> Self {
        self.registries.insert(registry.kind(), registry);
        self
    }

    pub fn get(&self, kind: FlowKind) -> DomainResult<&PhaseRegistry> {
        self.registries
            .get(&kind)
            .ok_or_else(|| DomainError::UnknownFlowKind(kind.to_string()))
    }

    /// Registered kinds in a stable order.
    pub fn kinds(&self) -> Vec<FlowKind> {
        let mut kinds: Vec<FlowKind> = self.registries.keys().copied().collect();
        kinds.sort();
        kinds
    }
}

impl Default for PhaseRegistries {
    fn default() -> Self {
        Self::builtin()
    }
}

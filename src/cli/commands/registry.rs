//! Registry CLI commands.

use anyhow::{anyhow, Result};
use clap::{Args, Subcommand};
use std::path::Path;

use crate::cli::context::load_config;
use crate::cli::output::{output, CommandOutput, TableFormatter};
use crate::domain::models::{FlowKind, PhaseRegistry};
use crate::infrastructure::config::ConfigLoader;

#[derive(Args, Debug)]
pub struct RegistryArgs {
    #[command(subcommand)]
    pub command: RegistryCommands,
}

#[derive(Subcommand, Debug)]
pub enum RegistryCommands {
    /// List flow kinds with their first and terminal phases
    List,
    /// Show the ordered phases of one flow kind
    Show {
        /// Flow kind (discovery, assessment, collection, planning, decommission)
        kind: String,
    },
}

#[derive(Debug, serde::Serialize)]
pub struct RegistrySummary {
    pub kind: FlowKind,
    pub phase_count: usize,
    pub first_phase: String,
    pub terminal_phase: String,
}

#[derive(Debug, serde::Serialize)]
pub struct RegistryListOutput {
    pub registries: Vec<RegistrySummary>,
}

impl CommandOutput for RegistryListOutput {
    fn to_human(&self) -> String {
        let mut lines = vec![format!("{:<14} {:<7} {:<24} {:<24}", "KIND", "PHASES", "FIRST", "TERMINAL")];
        lines.push("-".repeat(70));
        for r in &self.registries {
            lines.push(format!(
                "{:<14} {:<7} {:<24} {:<24}",
                r.kind.as_str(),
                r.phase_count,
                r.first_phase,
                r.terminal_phase
            ));
        }
        lines.join("\n")
    }
}

#[derive(Debug, serde::Serialize)]
pub struct RegistryDetailOutput {
    pub kind: FlowKind,
    pub phases: Vec<String>,
    pub flags: Vec<String>,
    pub aliases: std::collections::BTreeMap<String, String>,
    #[serde(skip)]
    registry: PhaseRegistry,
}

impl From<PhaseRegistry> for RegistryDetailOutput {
    fn from(registry: PhaseRegistry) -> Self {
        Self {
            kind: registry.kind(),
            phases: registry.phase_names().map(str::to_string).collect(),
            flags: registry.flag_names().map(str::to_string).collect(),
            aliases: registry.aliases().clone(),
            registry,
        }
    }
}

impl CommandOutput for RegistryDetailOutput {
    fn to_human(&self) -> String {
        format!(
            "Registry: {}\n{}",
            self.kind,
            TableFormatter::new().format_registry(&self.registry)
        )
    }
}

pub fn execute(args: RegistryArgs, config_path: Option<&Path>, json_mode: bool) -> Result<()> {
    let config = load_config(config_path)?;
    let registries = ConfigLoader::registries(&config)?;

    match args.command {
        RegistryCommands::List => {
            let mut summaries = Vec::new();
            for kind in registries.kinds() {
                let registry = registries.get(kind)?;
                summaries.push(RegistrySummary {
                    kind,
                    phase_count: registry.phases().len(),
                    first_phase: registry.first_phase().to_string(),
                    terminal_phase: registry.terminal_phase().to_string(),
                });
            }
            output(&RegistryListOutput { registries: summaries }, json_mode);
        }
        RegistryCommands::Show { kind } => {
            let kind = FlowKind::from_str(&kind).ok_or_else(|| anyhow!("Unknown flow kind: {kind}"))?;
            let registry = registries.get(kind)?.clone();
            output(&RegistryDetailOutput::from(registry), json_mode);
        }
    }

    Ok(())
}

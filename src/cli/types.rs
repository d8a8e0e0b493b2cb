//! CLI type definitions
//!
//! Top-level clap structures; each command group owns its own argument types.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::cli::commands::{flow::FlowArgs, init::InitArgs, registry::RegistryArgs};

#[derive(Parser, Debug)]
#[command(name = "phaseflow")]
#[command(about = "Phaseflow - multi-phase flow orchestration", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Output in JSON format
    #[arg(short, long, global = true)]
    pub json: bool,

    /// Configuration file (defaults to .phaseflow/config.yaml and overrides)
    #[arg(long, global = true, env = "PHASEFLOW_CONFIG")]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Initialize the project directory, configuration and database
    Init(InitArgs),

    /// Inspect phase registries
    Registry(RegistryArgs),

    /// Create, advance and manage flows
    Flow(FlowArgs),
}

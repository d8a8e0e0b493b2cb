//! Flow CLI commands.

use anyhow::{anyhow, bail, Context, Result};
use clap::{Args, Subcommand};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::adapters::sqlite::SqliteFlowStore;
use crate::cli::context::AppContext;
use crate::cli::output::{output, short_id, CommandOutput, TableFormatter};
use crate::domain::models::{
    FlowKind, FlowSnapshot, FlowStatus, MasterFlow, MasterFlowStatus, PhasePayload, SubordinateFlow,
    TenantContext,
};
use crate::domain::ports::{CommitMode, ErrorClassifier, FlowFilter};
use crate::services::{CreateFlowRequest, FlowStateService, TransitionResult};

#[derive(Args, Debug)]
pub struct FlowArgs {
    #[command(subcommand)]
    pub command: FlowCommands,
}

/// Tenant scope every flow command runs under.
#[derive(Args, Debug, Clone)]
pub struct TenantArgs {
    /// Client account id
    #[arg(long, env = "PHASEFLOW_CLIENT_ID")]
    pub client: Uuid,
    /// Engagement id
    #[arg(long, env = "PHASEFLOW_ENGAGEMENT_ID")]
    pub engagement: Uuid,
    /// Acting user, recorded as the creator and in collaboration logs
    #[arg(long, env = "PHASEFLOW_USER", default_value = "cli")]
    pub user: String,
}

impl From<&TenantArgs> for TenantContext {
    fn from(args: &TenantArgs) -> Self {
        Self::new(args.client, args.engagement, args.user.clone())
    }
}

#[derive(Subcommand, Debug)]
pub enum FlowCommands {
    /// Create a master flow with its first subordinate flow
    Create {
        /// Flow kind
        kind: String,
        #[command(flatten)]
        tenant: TenantArgs,
        /// Display name
        #[arg(long)]
        name: Option<String>,
        /// Configuration as a JSON object
        #[arg(long)]
        config_json: Option<String>,
        /// Initial free-form state as JSON
        #[arg(long)]
        state_json: Option<String>,
    },
    /// Attach a subordinate flow of another kind to a master flow
    Attach {
        /// Master flow id
        id: Uuid,
        /// Flow kind
        kind: String,
        #[command(flatten)]
        tenant: TenantArgs,
        /// Initial state stored under the kind in the master's flow state
        #[arg(long)]
        state_json: Option<String>,
    },
    /// Spawn a child flow under a parent master flow
    Spawn {
        /// Parent master flow id
        parent: Uuid,
        /// Flow kind of the child
        kind: String,
        #[command(flatten)]
        tenant: TenantArgs,
        #[arg(long)]
        config_json: Option<String>,
        #[arg(long)]
        state_json: Option<String>,
    },
    /// List master flows
    List {
        #[command(flatten)]
        tenant: TenantArgs,
        /// Filter by flow kind
        #[arg(long)]
        kind: Option<String>,
        /// Filter by master status
        #[arg(long)]
        status: Option<String>,
        /// Only children of this parent flow
        #[arg(long)]
        parent: Option<Uuid>,
        /// Maximum number of flows
        #[arg(long, default_value = "50")]
        limit: usize,
    },
    /// Show a master flow with its subordinates
    Show {
        id: Uuid,
        #[command(flatten)]
        tenant: TenantArgs,
    },
    /// Export the full persisted state of a flow as JSON
    Export {
        id: Uuid,
        #[command(flatten)]
        tenant: TenantArgs,
        /// Write to a file instead of stdout
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
    /// Advance a subordinate flow to its next phase
    Advance {
        /// Master flow id
        id: Uuid,
        /// Subordinate flow kind
        kind: String,
        /// Target phase
        phase: String,
        #[command(flatten)]
        tenant: TenantArgs,
        /// Extra field updates as a JSON object
        #[arg(long)]
        set: Option<String>,
        /// Status to set on success
        #[arg(long)]
        status: Option<String>,
    },
    /// Complete the terminal phase of a subordinate flow
    Complete {
        id: Uuid,
        kind: String,
        #[command(flatten)]
        tenant: TenantArgs,
    },
    /// Store the result payload of a phase
    SaveResult {
        id: Uuid,
        kind: String,
        phase: String,
        /// Result data as JSON
        data_json: String,
        #[command(flatten)]
        tenant: TenantArgs,
    },
    /// Store user input captured for a phase
    SaveInput {
        id: Uuid,
        kind: String,
        phase: String,
        /// Input as JSON
        input_json: String,
        #[command(flatten)]
        tenant: TenantArgs,
    },
    /// Record a failure against a subordinate flow
    RecordError {
        id: Uuid,
        kind: String,
        /// Error message
        message: String,
        #[command(flatten)]
        tenant: TenantArgs,
        /// Phase the error happened in (defaults to the current phase)
        #[arg(long)]
        phase: Option<String>,
        /// Machine-readable error code
        #[arg(long)]
        code: Option<String>,
    },
    /// Set a subordinate flow's phase without transition validation (audited)
    ForcePhase {
        id: Uuid,
        kind: String,
        /// Target phase; omit to reset to not started
        phase: Option<String>,
        #[command(flatten)]
        tenant: TenantArgs,
        /// Operator performing the override
        #[arg(long)]
        operator: String,
        /// Reason recorded with the override
        #[arg(long)]
        reason: String,
    },
    /// Pause a flow and its active subordinates
    Pause {
        id: Uuid,
        #[command(flatten)]
        tenant: TenantArgs,
    },
    /// Resume a paused flow
    Resume {
        id: Uuid,
        #[command(flatten)]
        tenant: TenantArgs,
    },
    /// Cancel a flow
    Cancel {
        id: Uuid,
        #[command(flatten)]
        tenant: TenantArgs,
    },
    /// Mark a flow failed
    Fail {
        id: Uuid,
        #[command(flatten)]
        tenant: TenantArgs,
        #[arg(long)]
        reason: String,
    },
    /// Delete a flow and its subordinates
    Delete {
        id: Uuid,
        #[command(flatten)]
        tenant: TenantArgs,
    },
}

#[derive(Debug, serde::Serialize)]
pub struct FlowCreatedOutput {
    pub master_flow_id: Uuid,
    pub subordinate_flow_id: Uuid,
    pub flow_kind: FlowKind,
    pub parent_flow_id: Option<Uuid>,
}

impl CommandOutput for FlowCreatedOutput {
    fn to_human(&self) -> String {
        let mut lines = vec![
            format!("Created {} flow {}", self.flow_kind, self.master_flow_id),
            format!("Subordinate flow: {}", self.subordinate_flow_id),
        ];
        if let Some(parent) = self.parent_flow_id {
            lines.push(format!("Parent: {parent}"));
        }
        lines.join("\n")
    }
}

#[derive(Debug, serde::Serialize)]
pub struct FlowListOutput {
    pub flows: Vec<MasterFlow>,
    pub total: usize,
}

impl CommandOutput for FlowListOutput {
    fn to_human(&self) -> String {
        if self.flows.is_empty() {
            return "No flows found.".to_string();
        }
        format!(
            "Found {} flow(s):\n{}",
            self.total,
            TableFormatter::new().format_flows(&self.flows)
        )
    }
}

#[derive(Debug, serde::Serialize)]
#[serde(transparent)]
pub struct SnapshotOutput {
    pub snapshot: FlowSnapshot,
}

impl CommandOutput for SnapshotOutput {
    fn to_human(&self) -> String {
        let master = &self.snapshot.master;
        let mut lines = vec![
            format!("Flow: {}", master.flow_name.as_deref().unwrap_or("(unnamed)")),
            format!("ID: {}", master.master_flow_id),
            format!("Kind: {}", master.flow_kind),
            format!("Status: {}", master.flow_status),
            format!("Tenant: {}", master.tenant),
            format!("Created: {}", master.created_at.to_rfc3339()),
        ];
        if let Some(parent) = master.parent_flow_id {
            lines.push(format!("Parent: {parent}"));
        }
        if !master.child_flow_ids.is_empty() {
            let children: Vec<String> = master.child_flow_ids.iter().map(short_id).collect();
            lines.push(format!("Children: {}", children.join(", ")));
        }
        if master.retry_count > 0 {
            lines.push(format!("Errors recorded: {}", master.retry_count));
        }

        lines.push(String::new());
        lines.push(TableFormatter::new().format_subordinates(&self.snapshot.subordinates));

        let recent: Vec<_> = master.phase_transitions.iter().rev().take(5).collect();
        if !recent.is_empty() {
            lines.push("\nRecent transitions:".to_string());
            for t in recent {
                lines.push(format!(
                    "  {} {:<24} {:?}",
                    t.timestamp.format("%Y-%m-%d %H:%M:%S"),
                    t.phase,
                    t.status
                ));
            }
        }

        lines.join("\n")
    }
}

#[derive(Debug, serde::Serialize)]
pub struct TransitionOutput {
    pub master_flow_id: Uuid,
    pub flow_kind: FlowKind,
    #[serde(flatten)]
    pub result: TransitionResult,
}

impl CommandOutput for TransitionOutput {
    fn to_human(&self) -> String {
        let phase = self.result.current_phase.as_deref().unwrap_or("<not started>");
        let mut lines = vec![if !self.result.success {
            format!("Transition rejected for {} flow", self.flow_kind)
        } else if self.result.was_idempotent {
            format!("{} flow already at {phase}", self.flow_kind)
        } else {
            format!("{} flow now at {phase} ({})", self.flow_kind, self.result.status)
        }];
        for warning in &self.result.warnings {
            lines.push(format!("  warning: {warning}"));
        }
        lines.join("\n")
    }
}

#[derive(Debug, serde::Serialize)]
pub struct FlowActionOutput {
    pub success: bool,
    pub message: String,
    pub master_flow_id: Uuid,
    pub status: Option<String>,
}

impl FlowActionOutput {
    fn done(master_flow_id: Uuid, message: String, status: Option<String>) -> Self {
        Self {
            success: true,
            message,
            master_flow_id,
            status,
        }
    }
}

impl CommandOutput for FlowActionOutput {
    fn to_human(&self) -> String {
        self.message.clone()
    }
}

fn parse_kind(kind: &str) -> Result<FlowKind> {
    FlowKind::from_str(kind).ok_or_else(|| anyhow!("Unknown flow kind: {kind}"))
}

fn parse_json_arg(raw: Option<&str>, what: &str) -> Result<Value> {
    raw.map_or_else(
        || Ok(json!({})),
        |s| serde_json::from_str(s).with_context(|| format!("Invalid JSON for {what}")),
    )
}

async fn require_subordinate(
    service: &FlowStateService<SqliteFlowStore>,
    tenant: &TenantContext,
    master_flow_id: Uuid,
    kind: FlowKind,
) -> Result<SubordinateFlow> {
    service
        .get_subordinate(tenant, master_flow_id, kind)
        .await?
        .ok_or_else(|| anyhow!("Flow {master_flow_id} has no {kind} subordinate"))
}

fn lifecycle_output(master: &MasterFlow, verb: &str) -> FlowActionOutput {
    FlowActionOutput::done(
        master.master_flow_id,
        format!("Flow {} {verb}", master.master_flow_id),
        Some(master.flow_status.to_string()),
    )
}

#[allow(clippy::too_many_lines)]
pub async fn execute(args: FlowArgs, config_path: Option<&Path>, json_mode: bool) -> Result<()> {
    let ctx = AppContext::open(config_path).await?;
    let service = ctx.state_service();
    let orchestrator = service.orchestrator();

    match args.command {
        FlowCommands::Create { kind, tenant, name, config_json, state_json } => {
            let tenant = TenantContext::from(&tenant);
            let kind = parse_kind(&kind)?;
            let mut request = CreateFlowRequest::new(tenant, kind)
                .with_configuration(parse_json_arg(config_json.as_deref(), "--config-json")?)
                .with_initial_state(parse_json_arg(state_json.as_deref(), "--state-json")?);
            if let Some(name) = name {
                request = request.with_name(name);
            }

            let (master_flow_id, sub) = orchestrator
                .create_flow(request, CommitMode::Immediate)
                .await
                .context("Failed to create flow")?;
            output(
                &FlowCreatedOutput {
                    master_flow_id,
                    subordinate_flow_id: sub.id,
                    flow_kind: kind,
                    parent_flow_id: None,
                },
                json_mode,
            );
        }

        FlowCommands::Attach { id, kind, tenant, state_json } => {
            let tenant = TenantContext::from(&tenant);
            let kind = parse_kind(&kind)?;
            let state = state_json
                .as_deref()
                .map(serde_json::from_str)
                .transpose()
                .context("Invalid JSON for --state-json")?
                .unwrap_or(Value::Null);

            let sub = orchestrator.attach_subordinate(&tenant, id, kind, state).await?;
            output(
                &FlowCreatedOutput {
                    master_flow_id: id,
                    subordinate_flow_id: sub.id,
                    flow_kind: kind,
                    parent_flow_id: None,
                },
                json_mode,
            );
        }

        FlowCommands::Spawn { parent, kind, tenant, config_json, state_json } => {
            let tenant = TenantContext::from(&tenant);
            let kind = parse_kind(&kind)?;
            let (master_flow_id, sub) = orchestrator
                .spawn_child_flow(
                    &tenant,
                    parent,
                    kind,
                    parse_json_arg(config_json.as_deref(), "--config-json")?,
                    parse_json_arg(state_json.as_deref(), "--state-json")?,
                )
                .await?;
            output(
                &FlowCreatedOutput {
                    master_flow_id,
                    subordinate_flow_id: sub.id,
                    flow_kind: kind,
                    parent_flow_id: Some(parent),
                },
                json_mode,
            );
        }

        FlowCommands::List { tenant, kind, status, parent, limit } => {
            let tenant = TenantContext::from(&tenant);
            let filter = FlowFilter {
                kind: kind.as_deref().map(parse_kind).transpose()?,
                status: status.as_deref().map(MasterFlowStatus::parse),
                parent_flow_id: parent,
                limit: Some(limit),
            };
            let flows = orchestrator.list_flows(&tenant, &filter).await?;
            let total = flows.len();
            output(&FlowListOutput { flows, total }, json_mode);
        }

        FlowCommands::Show { id, tenant } => {
            let tenant = TenantContext::from(&tenant);
            let snapshot = service
                .get_by_flow_id(&tenant, id)
                .await?
                .ok_or_else(|| anyhow!("Flow not found: {id}"))?;
            output(&SnapshotOutput { snapshot }, json_mode);
        }

        FlowCommands::Export { id, tenant, output: path } => {
            let tenant = TenantContext::from(&tenant);
            let body = ctx.export_service().export_json(&tenant, id).await?;
            match path {
                Some(path) => {
                    tokio::fs::write(&path, body)
                        .await
                        .with_context(|| format!("Failed to write {}", path.display()))?;
                    output(
                        &FlowActionOutput::done(id, format!("Exported flow {id} to {}", path.display()), None),
                        json_mode,
                    );
                }
                None => println!("{body}"),
            }
        }

        FlowCommands::Advance { id, kind, phase, tenant, set, status } => {
            let tenant = TenantContext::from(&tenant);
            let kind = parse_kind(&kind)?;
            let extra = match set.as_deref() {
                Some(raw) => match serde_json::from_str::<Value>(raw).context("Invalid JSON for --set")? {
                    Value::Object(map) => Some(map),
                    _ => bail!("--set must be a JSON object"),
                },
                None => None,
            };
            let status = status
                .as_deref()
                .map(|s| FlowStatus::from_str(s).ok_or_else(|| anyhow!("Unknown status: {s}")))
                .transpose()?;

            let result = service
                .update_flow_phase(&tenant, id, kind, &phase, extra.as_ref(), status)
                .await?;
            output(&TransitionOutput { master_flow_id: id, flow_kind: kind, result }, json_mode);
        }

        FlowCommands::Complete { id, kind, tenant } => {
            let tenant = TenantContext::from(&tenant);
            let kind = parse_kind(&kind)?;
            let result = service.complete_flow_phase(&tenant, id, kind).await?;
            output(&TransitionOutput { master_flow_id: id, flow_kind: kind, result }, json_mode);
        }

        FlowCommands::SaveResult { id, kind, phase, data_json, tenant } => {
            let tenant = TenantContext::from(&tenant);
            let sub = require_subordinate(&service, &tenant, id, parse_kind(&kind)?).await?;
            let data: Value = serde_json::from_str(&data_json).context("Invalid JSON for result data")?;
            let payload: PhasePayload = serde_json::from_value(json!({ "phase": phase, "data": data }))?;
            let typed = !payload.is_unknown();

            service.save_phase_result(&tenant, sub.id, payload).await?;
            let message = if typed {
                format!("Saved {phase} result")
            } else {
                format!("Saved {phase} result (untyped payload)")
            };
            output(&FlowActionOutput::done(id, message, None), json_mode);
        }

        FlowCommands::SaveInput { id, kind, phase, input_json, tenant } => {
            let tenant = TenantContext::from(&tenant);
            let sub = require_subordinate(&service, &tenant, id, parse_kind(&kind)?).await?;
            let input: Value = serde_json::from_str(&input_json).context("Invalid JSON for input")?;
            service.save_user_input(&tenant, sub.id, &phase, input).await?;
            output(&FlowActionOutput::done(id, format!("Saved {phase} input"), None), json_mode);
        }

        FlowCommands::RecordError { id, kind, message, tenant, phase, code } => {
            let tenant = TenantContext::from(&tenant);
            let sub = require_subordinate(&service, &tenant, id, parse_kind(&kind)?).await?;
            let recorder = ctx.error_recorder();
            let classification = recorder.classifier().classify(&message);

            recorder
                .record_error(&sub, &message, phase.as_deref(), code.as_deref())
                .await;
            output(
                &FlowActionOutput::done(
                    id,
                    format!(
                        "Recorded {} error (retryable: {})",
                        classification.error_type, classification.is_retryable
                    ),
                    None,
                ),
                json_mode,
            );
        }

        FlowCommands::ForcePhase { id, kind, phase, tenant, operator, reason } => {
            let tenant = TenantContext::from(&tenant);
            let sub = require_subordinate(&service, &tenant, id, parse_kind(&kind)?).await?;
            let forced = ctx
                .operator_override()
                .force_phase(&tenant, sub.id, phase.as_deref(), &operator, &reason)
                .await?;
            output(
                &FlowActionOutput::done(
                    id,
                    format!(
                        "Forced {} flow to {} (audited as {operator})",
                        forced.flow_kind,
                        forced.current_phase.as_deref().unwrap_or("<not started>")
                    ),
                    Some(forced.status.to_string()),
                ),
                json_mode,
            );
        }

        FlowCommands::Pause { id, tenant } => {
            let master = orchestrator.pause_flow(&TenantContext::from(&tenant), id).await?;
            output(&lifecycle_output(&master, "paused"), json_mode);
        }

        FlowCommands::Resume { id, tenant } => {
            let master = orchestrator.resume_flow(&TenantContext::from(&tenant), id).await?;
            output(&lifecycle_output(&master, "resumed"), json_mode);
        }

        FlowCommands::Cancel { id, tenant } => {
            let master = orchestrator.cancel_flow(&TenantContext::from(&tenant), id).await?;
            output(&lifecycle_output(&master, "cancelled"), json_mode);
        }

        FlowCommands::Fail { id, tenant, reason } => {
            let master = orchestrator.fail_flow(&TenantContext::from(&tenant), id, reason).await?;
            output(&lifecycle_output(&master, "failed"), json_mode);
        }

        FlowCommands::Delete { id, tenant } => {
            orchestrator.delete_flow(&TenantContext::from(&tenant), id).await?;
            output(&FlowActionOutput::done(id, format!("Deleted flow {id}"), None), json_mode);
        }
    }

    Ok(())
}

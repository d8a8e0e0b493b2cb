//! Table output formatting for CLI commands
//!
//! Flow listings and registries rendered with comfy-table. Colors are
//! dropped for `NO_COLOR` and dumb terminals.

use crate::cli::output::{short_id, truncate};
use crate::domain::models::{FlowStatus, MasterFlow, MasterFlowStatus, PhaseRegistry, SubordinateFlow};
use comfy_table::{presets, Attribute, Cell, Color, ContentArrangement, Table};
use std::env;

/// Table formatter for CLI output
pub struct TableFormatter {
    use_colors: bool,
    max_width: Option<u16>,
}

impl TableFormatter {
    pub fn new() -> Self {
        Self {
            use_colors: supports_color(),
            max_width: None,
        }
    }

    pub fn with_config(use_colors: bool, max_width: Option<u16>) -> Self {
        Self { use_colors, max_width }
    }

    /// Master flows, one row each.
    pub fn format_flows(&self, flows: &[MasterFlow]) -> String {
        let mut table = self.create_base_table();
        table.set_header(header(&["ID", "Kind", "Name", "Status", "Parent", "Children", "Updated"]));

        for flow in flows {
            let status = flow.flow_status.to_string();
            let status_cell = if self.use_colors {
                Cell::new(&status).fg(master_status_color(&flow.flow_status))
            } else {
                Cell::new(&status)
            };

            table.add_row(vec![
                Cell::new(short_id(&flow.master_flow_id)),
                Cell::new(flow.flow_kind.as_str()),
                Cell::new(truncate(flow.flow_name.as_deref().unwrap_or("-"), 30)),
                status_cell,
                Cell::new(flow.parent_flow_id.as_ref().map_or_else(|| "-".to_string(), short_id)),
                Cell::new(flow.child_flow_ids.len()),
                Cell::new(flow.updated_at.format("%Y-%m-%d %H:%M").to_string()),
            ]);
        }

        table.to_string()
    }

    /// Subordinate flows of one master.
    pub fn format_subordinates(&self, flows: &[SubordinateFlow]) -> String {
        let mut table = self.create_base_table();
        table.set_header(header(&["ID", "Kind", "Phase", "Status", "Progress", "Completed"]));

        for flow in flows {
            let status_cell = if self.use_colors {
                Cell::new(flow.status.as_str()).fg(flow_status_color(flow.status))
            } else {
                Cell::new(flow.status.as_str())
            };

            table.add_row(vec![
                Cell::new(short_id(&flow.id)),
                Cell::new(flow.flow_kind.as_str()),
                Cell::new(flow.current_phase.as_deref().unwrap_or("<not started>")),
                status_cell,
                Cell::new(format!("{:.0}%", flow.progress_percentage)),
                Cell::new(flow.phases_completed.join(", ")),
            ]);
        }

        table.to_string()
    }

    /// Ordered phases of a registry, with flags and aliases.
    pub fn format_registry(&self, registry: &PhaseRegistry) -> String {
        let mut table = self.create_base_table();
        table.set_header(header(&["#", "Phase", "Completion flag", "Aliases"]));

        for (position, phase) in registry.phases().iter().enumerate() {
            let aliases: Vec<&str> = registry
                .aliases()
                .iter()
                .filter(|(_, canonical)| **canonical == phase.name)
                .map(|(alias, _)| alias.as_str())
                .collect();

            let mut name_cell = Cell::new(&phase.name);
            if registry.is_terminal(&phase.name) {
                name_cell = name_cell.add_attribute(Attribute::Bold);
            }

            table.add_row(vec![
                Cell::new(position + 1),
                name_cell,
                Cell::new(&phase.flag),
                Cell::new(if aliases.is_empty() { "-".to_string() } else { aliases.join(", ") }),
            ]);
        }

        table.to_string()
    }

    fn create_base_table(&self) -> Table {
        let mut table = Table::new();
        table
            .load_preset(presets::UTF8_FULL)
            .set_content_arrangement(ContentArrangement::Dynamic);

        if let Some(width) = self.max_width {
            table.set_width(width);
        }

        table
    }
}

impl Default for TableFormatter {
    fn default() -> Self {
        Self::new()
    }
}

fn header(names: &[&str]) -> Vec<Cell> {
    names
        .iter()
        .map(|name| Cell::new(name).add_attribute(Attribute::Bold))
        .collect()
}

fn supports_color() -> bool {
    if env::var("NO_COLOR").is_ok() {
        return false;
    }
    !matches!(env::var("TERM"), Ok(term) if term == "dumb")
}

fn master_status_color(status: &MasterFlowStatus) -> Color {
    match status {
        MasterFlowStatus::Initialized => Color::Grey,
        MasterFlowStatus::Running => Color::Blue,
        MasterFlowStatus::Paused => Color::Yellow,
        MasterFlowStatus::Completed => Color::Green,
        MasterFlowStatus::Failed => Color::Red,
        MasterFlowStatus::Cancelled | MasterFlowStatus::Other(_) => Color::DarkGrey,
    }
}

const fn flow_status_color(status: FlowStatus) -> Color {
    match status {
        FlowStatus::Active | FlowStatus::Processing => Color::Blue,
        FlowStatus::Paused => Color::Yellow,
        FlowStatus::Completed => Color::Green,
        FlowStatus::Failed => Color::Red,
        FlowStatus::Cancelled => Color::DarkGrey,
    }
}

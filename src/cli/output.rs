//! Output formatting for CLI commands.
//!
//! Everything here returns a `String`; the binary writes it to stderr.

use colored::Colorize;
use std::fmt::Write;
use tabled::{Table, Tabled};

use crate::executor::{OutputFormat, TaskCatalog, TaskResult};
use crate::journal::JournalEntry;
use crate::plan::{Plan, PlanHasher, ValidationResult};

/// Output formatter for CLI.
#[derive(Debug)]
pub struct OutputFormatter {
    /// Per-node output format for task results.
    format: OutputFormat,
}

/// Task row for table display.
#[derive(Tabled)]
struct TaskRow {
    #[tabled(rename = "Task")]
    name: String,
    #[tabled(rename = "Targets")]
    targets: String,
    #[tabled(rename = "Description")]
    description: String,
}

/// Node row for table display.
#[derive(Tabled)]
struct NodeRow {
    #[tabled(rename = "Host")]
    hostname: String,
    #[tabled(rename = "Address")]
    address: String,
    #[tabled(rename = "Internal")]
    internal: String,
    #[tabled(rename = "User")]
    user: String,
    #[tabled(rename = "Roles")]
    roles: String,
}

/// Run row for table display.
#[derive(Tabled)]
struct RunRow {
    #[tabled(rename = "Started")]
    started: String,
    #[tabled(rename = "Task")]
    task: String,
    #[tabled(rename = "Cluster")]
    cluster: String,
    #[tabled(rename = "State")]
    state: String,
    #[tabled(rename = "Operator")]
    operator: String,
    #[tabled(rename = "Run")]
    run_id: String,
}

impl OutputFormatter {
    /// Creates a new output formatter.
    #[must_use]
    pub const fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Formats the task catalog.
    #[must_use]
    pub fn format_tasks(&self, catalog: &TaskCatalog) -> String {
        let rows: Vec<TaskRow> = catalog
            .iter()
            .map(|task| TaskRow {
                name: task.name.clone(),
                targets: task.selector.to_string(),
                description: task.description.clone(),
            })
            .collect();

        format!("{}\n", Table::new(rows))
    }

    /// Formats a task result: per-node lines followed by a colored summary.
    #[must_use]
    pub fn format_result(&self, result: &TaskResult) -> String {
        let mut output = String::new();
        let _ = writeln!(
            output,
            "\nStep '{}' on {} node(s)\n",
            result.task.bold(),
            result.nodes.len()
        );
        output.push_str(&result.render(self.format));

        let summary = if result.is_success() {
            format!("{} {result}", "✓".green())
        } else {
            format!("{} {result}", "✗".red())
        };
        let _ = write!(output, "\n{summary}\n");

        if !result.is_success() {
            let _ = writeln!(output, "   Failed nodes: {}", result.failed_nodes().join(", "));
        }
        output
    }

    /// Formats the outcome of a plan validation.
    #[must_use]
    pub fn format_validation(
        &self,
        plan: Option<&Plan>,
        validation: &ValidationResult,
    ) -> String {
        let mut output = String::new();

        if validation.is_valid() {
            let _ = writeln!(output, "{} Plan is valid", "✓".green());
        } else {
            let _ = writeln!(output, "{} Plan is invalid:", "✗".red());
            for error in &validation.errors {
                let _ = writeln!(output, "   - {}: {}", error.field, error.message);
            }
        }

        if !validation.warnings.is_empty() {
            let _ = write!(output, "\n{} Warnings:\n", "⚠".yellow());
            for warning in &validation.warnings {
                let _ = writeln!(output, "   - {warning}");
            }
        }

        if let Some(plan) = plan {
            let _ = write!(
                output,
                "\nCluster: {} (fingerprint {})\n\n",
                plan.cluster_name,
                PlanHasher::short(&plan.fingerprint)
            );
            let rows: Vec<NodeRow> = plan
                .nodes()
                .iter()
                .map(|node| NodeRow {
                    hostname: node.hostname.clone(),
                    address: node.address.clone(),
                    internal: node.internal_address.clone().unwrap_or_default(),
                    user: node.ssh_user.clone(),
                    roles: node.roles_label(),
                })
                .collect();
            let _ = writeln!(output, "{}", Table::new(rows));
        }

        output
    }

    /// Formats recorded runs.
    #[must_use]
    pub fn format_runs(&self, entries: &[JournalEntry]) -> String {
        if entries.is_empty() {
            return String::from("No recorded runs.\n");
        }

        let rows: Vec<RunRow> = entries
            .iter()
            .map(|entry| RunRow {
                started: entry.started_at.format("%Y-%m-%d %H:%M:%S").to_string(),
                task: entry.task.clone(),
                cluster: entry.cluster_name.clone(),
                state: Self::format_state(&entry.state),
                operator: entry.operator_host.clone(),
                run_id: Self::truncate(&entry.run_id.to_string(), 8),
            })
            .collect();

        format!("{}\n", Table::new(rows))
    }

    fn format_state(state: &str) -> String {
        match state {
            "succeeded" => state.green().to_string(),
            "failed" => state.red().to_string(),
            other => other.dimmed().to_string(),
        }
    }

    /// Truncates a string to a maximum number of characters.
    fn truncate(s: &str, max_len: usize) -> String {
        s.chars().take(max_len).collect()
    }
}

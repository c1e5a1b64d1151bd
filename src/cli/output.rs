//! Output formatting for CLI commands.
//!
//! Every formatter returns a string; `main` decides where it goes. Text
//! output uses `colored` and `tabled`, JSON output is pretty-printed serde.

use colored::Colorize;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt::Write;
use tabled::{Table, Tabled};

use crate::config::{ConfigHasher, ValidationResult};
use crate::planner::{ActionKind, Plan};
use crate::reconciler::{ApplyOutcome, Drift, DriftReport};
use crate::state::{LockInfo, OutputValue, RemoteState};

use super::commands::OutputFormat;

/// Output formatter for CLI.
#[derive(Debug)]
pub struct OutputFormatter {
    /// Output format.
    format: OutputFormat,
}

/// Plan action row for table display.
#[derive(Tabled)]
struct PlanActionRow {
    #[tabled(rename = "#")]
    index: usize,
    #[tabled(rename = "Action")]
    action: String,
    #[tabled(rename = "Resource")]
    resource: String,
    #[tabled(rename = "After")]
    after: String,
}

/// Recorded resource row for table display.
#[derive(Tabled)]
struct ResourceRow {
    #[tabled(rename = "Resource")]
    resource: String,
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Depends on")]
    dependencies: String,
    #[tabled(rename = "Updated")]
    updated: String,
}

/// Output row for table display.
#[derive(Tabled)]
struct OutputRow {
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Value")]
    value: String,
    #[tabled(rename = "Description")]
    description: String,
}

impl OutputFormatter {
    /// Creates a new output formatter.
    #[must_use]
    pub const fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Formats a plan for display.
    #[must_use]
    pub fn format_plan(&self, plan: &Plan, detailed: bool) -> String {
        match self.format {
            OutputFormat::Json => to_json(plan),
            OutputFormat::Text => Self::format_plan_text(plan, detailed),
        }
    }

    fn format_plan_text(plan: &Plan, detailed: bool) -> String {
        if plan.is_empty() {
            return format!(
                "{} No changes required - infrastructure matches the configuration.\n",
                "✓".green()
            );
        }

        let mut output = String::from("\nExecution plan\n\n");

        let rows: Vec<PlanActionRow> = plan
            .actions
            .iter()
            .enumerate()
            .map(|(i, a)| PlanActionRow {
                index: i,
                action: Self::format_action_kind(a.kind),
                resource: a.resource.to_string(),
                after: if a.dependencies.is_empty() {
                    String::from("-")
                } else {
                    a.dependencies
                        .iter()
                        .map(ToString::to_string)
                        .collect::<Vec<_>>()
                        .join(", ")
                },
            })
            .collect();
        output.push_str(&Table::new(rows).to_string());
        output.push('\n');

        if detailed {
            for action in plan.actions.iter().filter(|a| !a.changes.is_empty()) {
                let _ = writeln!(output, "\n  {} {}", Self::format_action_kind(action.kind), action.resource);
                for change in &action.changes {
                    let before = change
                        .before
                        .as_ref()
                        .map_or_else(|| String::from("(none)"), ToString::to_string);
                    let marker = if change.forces_replacement {
                        " # forces replacement".red().to_string()
                    } else {
                        String::new()
                    };
                    let _ = writeln!(
                        output,
                        "      {}: {} -> {}{marker}",
                        change.attribute,
                        Self::truncate(&before, 60),
                        Self::truncate(&change.after.to_string(), 60)
                    );
                }
            }
        }

        let _ = write!(
            output,
            "\nPlan: {} to create, {} to update, {} to replace, {} to delete\n",
            plan.count(ActionKind::Create).to_string().green(),
            plan.count(ActionKind::Update).to_string().yellow(),
            plan.count(ActionKind::Replace).to_string().magenta(),
            plan.count(ActionKind::Delete).to_string().red()
        );

        output
    }

    /// Formats the result of `validate`.
    #[must_use]
    pub fn format_validation(
        &self,
        result: &ValidationResult,
        resources: usize,
        show_warnings: bool,
    ) -> String {
        match self.format {
            OutputFormat::Json => to_json(&serde_json::json!({
                "valid": result.is_valid(),
                "resources": resources,
                "errors": result
                    .errors
                    .iter()
                    .map(|e| serde_json::json!({ "field": e.field, "message": e.message }))
                    .collect::<Vec<_>>(),
                "warnings": result.warnings,
            })),
            OutputFormat::Text => {
                let mut output = String::new();
                for error in &result.errors {
                    let _ = writeln!(output, "{} {}: {}", "✗".red(), error.field, error.message);
                }
                if show_warnings {
                    for warning in &result.warnings {
                        let _ = writeln!(output, "{} {warning}", "⚠".yellow());
                    }
                }
                if result.is_valid() {
                    let _ = writeln!(
                        output,
                        "{} Configuration is valid ({resources} resources)",
                        "✓".green()
                    );
                }
                output
            }
        }
    }

    /// Formats the outcome of `apply` or `destroy`.
    #[must_use]
    pub fn format_apply(&self, outcome: &ApplyOutcome) -> String {
        match self.format {
            OutputFormat::Json => to_json(outcome),
            OutputFormat::Text => {
                let report = &outcome.report;
                let mut output = String::new();

                for result in &report.completed {
                    let retries = if result.attempts > 1 {
                        format!(" ({} attempts)", result.attempts)
                    } else {
                        String::new()
                    };
                    let _ = writeln!(
                        output,
                        "{} {} {}{retries}",
                        "✓".green(),
                        result.action.kind,
                        result.action.resource
                    );
                }
                for failed in &report.failed {
                    let _ = writeln!(
                        output,
                        "{} {} {}: {}",
                        "✗".red(),
                        failed.action.kind,
                        failed.action.resource,
                        failed.error
                    );
                }
                for action in &report.not_started {
                    let _ = writeln!(
                        output,
                        "{} {} {} (not started)",
                        "-".dimmed(),
                        action.kind,
                        action.resource
                    );
                }

                let status = if report.is_success() {
                    "Apply complete".green().to_string()
                } else if report.cancelled {
                    "Apply cancelled".yellow().to_string()
                } else {
                    "Apply failed".red().to_string()
                };
                let _ = writeln!(
                    output,
                    "\n{status}: {} of {} actions completed",
                    report.completed.len(),
                    report.total
                );

                if !outcome.outputs.is_empty() {
                    output.push_str("\nOutputs:\n");
                    output.push_str(&Self::format_outputs_text(&outcome.outputs));
                }
                output
            }
        }
    }

    /// Formats recorded outputs.
    #[must_use]
    pub fn format_outputs(&self, outputs: &BTreeMap<String, OutputValue>) -> String {
        match self.format {
            OutputFormat::Json => {
                let values: BTreeMap<&str, &Value> =
                    outputs.iter().map(|(k, v)| (k.as_str(), &v.value)).collect();
                to_json(&values)
            }
            OutputFormat::Text => {
                if outputs.is_empty() {
                    return String::from("No outputs recorded. Run `halyard apply` first.\n");
                }
                Self::format_outputs_text(outputs)
            }
        }
    }

    /// Formats a single output value. Sensitive values are shown here.
    #[must_use]
    pub fn format_output_value(&self, output: &OutputValue) -> String {
        match (&self.format, &output.value) {
            (OutputFormat::Text, Value::String(s)) => format!("{s}\n"),
            _ => format!("{}\n", to_json(&output.value)),
        }
    }

    fn format_outputs_text(outputs: &BTreeMap<String, OutputValue>) -> String {
        let rows: Vec<OutputRow> = outputs
            .iter()
            .map(|(name, output)| OutputRow {
                name: name.clone(),
                value: if output.sensitive {
                    String::from("(sensitive)")
                } else {
                    Self::truncate(&display_value(&output.value), 60)
                },
                description: output.description.clone().unwrap_or_default(),
            })
            .collect();
        let mut table = Table::new(rows).to_string();
        table.push('\n');
        table
    }

    /// Formats a drift report.
    #[must_use]
    pub fn format_drift(&self, report: &DriftReport) -> String {
        match self.format {
            OutputFormat::Json => to_json(report),
            OutputFormat::Text => {
                if report.is_converged() {
                    return format!(
                        "{} No drift detected - {} resources match the recorded state.\n",
                        "✓".green(),
                        report.checked
                    );
                }

                let mut output = format!("{} Drift detected:\n\n", "⚠".yellow());
                for resource in &report.drifted {
                    match &resource.drift {
                        Drift::Deleted => {
                            let _ = writeln!(
                                output,
                                "   {} {} (deleted outside halyard)",
                                "-".red(),
                                resource.resource
                            );
                        }
                        Drift::Modified { changes } => {
                            let _ = writeln!(output, "   {} {}", "~".yellow(), resource.resource);
                            for change in changes {
                                let observed = change
                                    .observed
                                    .as_ref()
                                    .map_or_else(|| String::from("(removed)"), ToString::to_string);
                                let _ = writeln!(
                                    output,
                                    "       {}: {} -> {observed}",
                                    change.attribute, change.recorded
                                );
                            }
                        }
                    }
                }
                let _ = write!(
                    output,
                    "\n{}/{} resources have drifted.\n",
                    report.drifted.len(),
                    report.checked
                );
                output
            }
        }
    }

    /// Formats the state document summary.
    #[must_use]
    pub fn format_state(&self, state: &RemoteState) -> String {
        match self.format {
            OutputFormat::Json => to_json(state),
            OutputFormat::Text => {
                let mut output = String::new();

                let _ = write!(
                    output,
                    "\nState: {}/{}\n\n",
                    state.project, state.environment
                );
                let _ = writeln!(output, "   Version: {}", state.version);
                let _ = writeln!(output, "   Lineage: {}", state.lineage);
                let _ = writeln!(output, "   Serial: {}", state.serial);
                let _ = writeln!(
                    output,
                    "   Config hash: {}",
                    ConfigHasher::new().short_hash(&state.config_hash)
                );
                let _ = writeln!(output, "   Last updated: {}", state.last_updated);
                let _ = writeln!(output, "   Resources: {}", state.resources.len());
                let _ = writeln!(output, "   Outputs: {}", state.outputs.len());

                if !state.history.is_empty() {
                    let _ = writeln!(output, "\n   Recent history ({}):", state.history.len());
                    for entry in state.history.iter().rev().take(5) {
                        let status = if entry.success {
                            "✓".green()
                        } else {
                            "✗".red()
                        };
                        let _ = writeln!(
                            output,
                            "     {status} {} - {} ({})",
                            entry.timestamp.format("%Y-%m-%d %H:%M"),
                            entry.operation,
                            entry.resources.join(", ")
                        );
                    }
                }

                output
            }
        }
    }

    /// Formats the recorded resources as a table.
    #[must_use]
    pub fn format_resources(&self, state: &RemoteState) -> String {
        match self.format {
            OutputFormat::Json => {
                let ids: Vec<String> = state.resources.keys().map(ToString::to_string).collect();
                to_json(&ids)
            }
            OutputFormat::Text => {
                if state.resources.is_empty() {
                    return String::from("No resources recorded.\n");
                }
                let rows: Vec<ResourceRow> = state
                    .resources
                    .values()
                    .map(|r| ResourceRow {
                        resource: r.id.to_string(),
                        id: r.provider_id().unwrap_or("-").to_string(),
                        dependencies: r
                            .dependencies
                            .iter()
                            .map(ToString::to_string)
                            .collect::<Vec<_>>()
                            .join(", "),
                        updated: r.updated_at.format("%Y-%m-%d %H:%M").to_string(),
                    })
                    .collect();
                let mut table = Table::new(rows).to_string();
                table.push('\n');
                table
            }
        }
    }

    /// Formats lock information.
    #[must_use]
    pub fn format_lock(&self, lock: &LockInfo) -> String {
        match self.format {
            OutputFormat::Json => to_json(lock),
            OutputFormat::Text => format!(
                "{} State locked by {} for {} (lock id {}, expires in {}s)\n",
                "✓".green(),
                lock.holder,
                lock.operation,
                lock.lock_id,
                lock.remaining_secs()
            ),
        }
    }

    /// Formats a success message.
    #[must_use]
    pub fn success(&self, message: &str) -> String {
        self.message("success", &"✓".green().to_string(), message)
    }

    /// Formats an error message.
    #[must_use]
    pub fn error(&self, message: &str) -> String {
        self.message("error", &"✗".red().to_string(), message)
    }

    /// Formats a warning message.
    #[must_use]
    pub fn warning(&self, message: &str) -> String {
        self.message("warning", &"⚠".yellow().to_string(), message)
    }

    fn message(&self, status: &str, marker: &str, message: &str) -> String {
        match self.format {
            OutputFormat::Json => {
                to_json(&serde_json::json!({ "status": status, "message": message }))
            }
            OutputFormat::Text => format!("{marker} {message}"),
        }
    }

    /// Formats an action kind with color.
    fn format_action_kind(kind: ActionKind) -> String {
        match kind {
            ActionKind::Create => "+create".green().to_string(),
            ActionKind::Update => "~update".yellow().to_string(),
            ActionKind::Replace => "-/+replace".magenta().to_string(),
            ActionKind::Delete => "-delete".red().to_string(),
        }
    }

    /// Truncates a string to a maximum number of characters.
    fn truncate(s: &str, max_len: usize) -> String {
        if s.chars().count() <= max_len {
            s.to_string()
        } else {
            let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
            format!("{kept}...")
        }
    }
}

fn to_json<T: Serialize + ?Sized>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_default()
}

fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

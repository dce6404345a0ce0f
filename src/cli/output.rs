//! Output formatting for CLI commands.
//!
//! This module provides formatting utilities for displaying
//! information to the user in various formats.

use colored::Colorize;
use serde_json::Value;
use std::fmt::Write;
use tabled::{Table, Tabled};

use crate::config::{StackConfig, ValidationResult};
use crate::engine::{ExecutionPlan, NodeOutcome, NodeReport, RunReport, RunStatus};
use crate::graph::DependencyGraph;
use crate::output::{display_value, REDACTED};
use crate::reconciler::OperationKind;
use crate::state::{LockInfo, StackState};

use super::commands::OutputFormat;

/// Output formatter for CLI.
#[derive(Debug)]
pub struct OutputFormatter {
    /// Output format.
    format: OutputFormat,
}

/// Plan row for table display.
#[derive(Tabled)]
struct PlanRow {
    #[tabled(rename = "Batch")]
    batch: usize,
    #[tabled(rename = "Resource")]
    resource: String,
    #[tabled(rename = "Type")]
    type_token: String,
    #[tabled(rename = "Depends on")]
    depends_on: String,
}

/// Recorded export row for table display.
#[derive(Tabled)]
struct ExportRow {
    #[tabled(rename = "Export")]
    name: String,
    #[tabled(rename = "Value")]
    value: String,
}

/// Node report row for table display.
#[derive(Tabled)]
struct NodeRow {
    #[tabled(rename = "Op")]
    operation: String,
    #[tabled(rename = "Resource")]
    resource: String,
    #[tabled(rename = "Outcome")]
    outcome: String,
    #[tabled(rename = "Time")]
    duration: String,
    #[tabled(rename = "Detail")]
    detail: String,
}

/// Recorded resource row for table display.
#[derive(Tabled)]
struct ResourceRow {
    #[tabled(rename = "Resource")]
    resource: String,
    #[tabled(rename = "Provider ID")]
    provider_id: String,
    #[tabled(rename = "Updated")]
    updated: String,
}

/// Output property row for table display.
#[derive(Tabled)]
struct OutputRow {
    #[tabled(rename = "Resource")]
    resource: String,
    #[tabled(rename = "Property")]
    property: String,
    #[tabled(rename = "Value")]
    value: String,
}

impl OutputFormatter {
    /// Creates a new output formatter.
    #[must_use]
    pub const fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Formats a validation result with a configuration summary.
    #[must_use]
    pub fn format_validation(
        &self,
        config: &StackConfig,
        result: &ValidationResult,
        resources: usize,
        show_warnings: bool,
    ) -> String {
        match self.format {
            OutputFormat::Json => to_json(&serde_json::json!({
                "valid": result.is_valid(),
                "stack": config.stack.name,
                "environment": config.stack.environment,
                "program": config.stack.program,
                "resources": resources,
                "warnings": result.warnings,
            })),
            OutputFormat::Text => {
                let mut output = format!("{} Configuration is valid!\n", "✓".green());
                if show_warnings && !result.warnings.is_empty() {
                    output.push_str("\nWarnings:\n");
                    for warning in &result.warnings {
                        let _ = writeln!(output, "  {} {warning}", "⚠".yellow());
                    }
                }

                output.push_str("\nConfiguration summary:\n");
                let _ = writeln!(output, "  Stack: {}", config.stack.name);
                let _ = writeln!(output, "  Environment: {}", config.stack.environment);
                let _ = writeln!(output, "  Program: {}", config.stack.program);
                let _ = writeln!(output, "  Config keys: {}", config.config.len());
                let _ = writeln!(output, "  Secret keys: {}", config.secret_keys().len());
                let _ = writeln!(output, "  Resources: {resources}");
                output
            }
        }
    }

    /// Formats an execution plan.
    #[must_use]
    pub fn format_plan(&self, plan: &ExecutionPlan, graph: &DependencyGraph) -> String {
        match self.format {
            OutputFormat::Json => to_json(&serde_json::json!({
                "batches": plan.batches,
                "edges": graph.edges(),
            })),
            OutputFormat::Text => Self::format_plan_text(plan, graph),
        }
    }

    fn format_plan_text(plan: &ExecutionPlan, graph: &DependencyGraph) -> String {
        if plan.is_empty() {
            return String::from("Nothing to execute.\n");
        }

        let mut output = String::new();
        let _ = write!(
            output,
            "\nExecution plan for '{}': {} resources in {} batches\n\n",
            graph.stack(),
            plan.len(),
            plan.batches.len()
        );

        let rows: Vec<PlanRow> = plan
            .batches
            .iter()
            .enumerate()
            .flat_map(|(batch, ids)| ids.iter().map(move |id| (batch + 1, id)))
            .map(|(batch, id)| {
                let depends_on = graph
                    .index_of(id)
                    .map(|index| {
                        graph
                            .dependencies_of(index)
                            .iter()
                            .map(|&dep| graph.node(dep).id.name().to_string())
                            .collect::<Vec<_>>()
                            .join(", ")
                    })
                    .unwrap_or_default();
                PlanRow {
                    batch,
                    resource: id.name().to_string(),
                    type_token: id.type_token().to_string(),
                    depends_on,
                }
            })
            .collect();

        output.push_str(&Table::new(rows).to_string());
        output.push('\n');
        output
    }

    /// Formats a run report. Secret exports stay redacted unless `unmask`.
    #[must_use]
    pub fn format_report(&self, report: &RunReport, unmask: bool) -> String {
        match self.format {
            OutputFormat::Json => {
                if unmask {
                    to_json(report)
                } else {
                    to_json(&report.redacted())
                }
            }
            OutputFormat::Text => Self::format_report_text(report, unmask),
        }
    }

    fn format_report_text(report: &RunReport, unmask: bool) -> String {
        let mut output = String::new();

        let rows: Vec<NodeRow> = report
            .nodes
            .iter()
            .chain(&report.cleanup)
            .filter(|node| node.outcome != NodeOutcome::Resolved || node.operation != Some(OperationKind::NoOp))
            .map(Self::node_row)
            .collect();

        if rows.is_empty() {
            let _ = writeln!(
                output,
                "{} No changes - {} resources up to date.",
                "✓".green(),
                report.nodes.len()
            );
        } else {
            output.push_str(&Table::new(rows).to_string());
            output.push('\n');
        }

        let status = match report.status {
            RunStatus::Succeeded => format!("{} Run succeeded", "✓".green()),
            RunStatus::Failed => format!("{} Run failed", "✗".red()),
            RunStatus::Incomplete => format!("{} Run incomplete (deadline reached)", "⚠".yellow()),
        };
        let _ = write!(
            output,
            "\n{status} in {:.1}s: {} created, {} updated, {} replaced, {} deleted, {} unchanged\n",
            Self::seconds(report.duration_ms),
            report.count_operation(OperationKind::Create).to_string().green(),
            report.count_operation(OperationKind::UpdateInPlace).to_string().yellow(),
            report.count_operation(OperationKind::Replace).to_string().yellow(),
            report.count_operation(OperationKind::Delete).to_string().red(),
            report.count_operation(OperationKind::NoOp)
        );

        if !report.exports.is_empty() {
            output.push_str("\nOutputs:\n");
            for export in &report.exports {
                let _ = writeln!(output, "  {}: {}", export.name.bold(), export.display(unmask));
            }
        }
        output
    }

    fn node_row(node: &NodeReport) -> NodeRow {
        let detail = match (&node.error, &node.blocked_by) {
            (Some(error), Some(blocked_by)) if node.outcome == NodeOutcome::Skipped => {
                format!("blocked by {blocked_by}: {}", truncate(error, 60))
            }
            (Some(error), _) => truncate(error, 70),
            (None, _) if !node.diffs.is_empty() => node
                .diffs
                .iter()
                .map(|d| d.property.as_str())
                .collect::<Vec<_>>()
                .join(", "),
            (None, _) => String::new(),
        };

        NodeRow {
            operation: node
                .operation
                .map_or_else(|| String::from(" "), Self::format_operation),
            resource: node.id.to_string(),
            outcome: Self::format_outcome(node.outcome),
            duration: format!("{:.1}s", Self::seconds(node.duration_ms)),
            detail,
        }
    }

    /// Formats recorded state. Secret outputs are always redacted.
    #[must_use]
    pub fn format_state(&self, state: &StackState, lock: Option<&LockInfo>) -> String {
        match self.format {
            OutputFormat::Json => {
                let mut redacted = state.clone();
                for resource in redacted.resources.values_mut() {
                    resource.outputs = resource.output_set().redacted();
                }
                to_json(&serde_json::json!({ "state": redacted, "lock": lock }))
            }
            OutputFormat::Text => {
                let mut output = String::new();
                let _ = write!(
                    output,
                    "\nState: {}/{}\n\n",
                    state.stack, state.environment
                );
                let _ = writeln!(output, "   Version: {}", state.version);
                let _ = writeln!(output, "   Last updated: {}", state.last_updated);
                let _ = writeln!(output, "   Resources: {}", state.len());
                if let Some(lock) = lock {
                    let _ = writeln!(output, "   {} Locked: {lock}", "⚠".yellow());
                }

                if !state.is_empty() {
                    let rows: Vec<ResourceRow> = state
                        .resources
                        .values()
                        .map(|r| ResourceRow {
                            resource: r.id.to_string(),
                            provider_id: truncate(&r.provider_id, 60),
                            updated: r.updated_at.format("%Y-%m-%d %H:%M").to_string(),
                        })
                        .collect();
                    output.push('\n');
                    output.push_str(&Table::new(rows).to_string());
                    output.push('\n');
                }

                if !state.history.is_empty() {
                    let _ = writeln!(output, "\n   Recent history ({}):", state.history.len());
                    for entry in state.history.iter().rev().take(5) {
                        let status = if entry.success { "✓".green() } else { "✗".red() };
                        let _ = writeln!(
                            output,
                            "     {status} {} - {} ({} changed)",
                            entry.timestamp.format("%Y-%m-%d %H:%M"),
                            entry.operation,
                            entry.changed.len()
                        );
                    }
                }
                output
            }
        }
    }

    /// Formats the stack exports recorded by the last run. Sensitive exports
    /// are never recorded, so they always show redacted.
    #[must_use]
    pub fn format_exports(&self, state: &StackState) -> String {
        match self.format {
            OutputFormat::Json => {
                let all: serde_json::Map<String, Value> = state
                    .exports
                    .iter()
                    .map(|e| {
                        let value = match (&e.value, &e.error) {
                            (Some(value), None) => value.clone(),
                            (None, None) if e.secret => Value::String(String::from(REDACTED)),
                            _ => Value::Null,
                        };
                        (e.name.clone(), value)
                    })
                    .collect();
                to_json(&all)
            }
            OutputFormat::Text => {
                if state.exports.is_empty() {
                    return String::from("No exports recorded.\n");
                }
                let rows: Vec<ExportRow> = state
                    .exports
                    .iter()
                    .map(|e| ExportRow {
                        name: e.name.clone(),
                        value: if e.error.is_some() {
                            e.display().red().to_string()
                        } else if e.secret {
                            e.display().dimmed().to_string()
                        } else {
                            truncate(&e.display(), 80)
                        },
                    })
                    .collect();
                let mut output = Table::new(rows).to_string();
                output.push('\n');
                output
            }
        }
    }

    /// Formats the recorded outputs of every resource.
    #[must_use]
    pub fn format_resource_outputs(&self, state: &StackState, unmask: bool) -> String {
        let outputs = |resource: &crate::state::ResourceState| {
            if unmask {
                resource.outputs.clone()
            } else {
                resource.output_set().redacted()
            }
        };

        match self.format {
            OutputFormat::Json => {
                let all: serde_json::Map<String, Value> = state
                    .resources
                    .values()
                    .map(|r| (r.id.to_string(), Value::Object(outputs(r).into_iter().collect())))
                    .collect();
                to_json(&all)
            }
            OutputFormat::Text => {
                if state.is_empty() {
                    return String::from("No resources recorded.\n");
                }
                let rows: Vec<OutputRow> = state
                    .resources
                    .values()
                    .flat_map(|r| {
                        let resource = r.id.name().to_string();
                        outputs(r).into_iter().map(move |(property, value)| OutputRow {
                            resource: resource.clone(),
                            property,
                            value: Self::format_value(&value),
                        })
                    })
                    .collect();
                let mut output = Table::new(rows).to_string();
                output.push('\n');
                output
            }
        }
    }

    fn format_value(value: &Value) -> String {
        match value {
            Value::String(s) if s == REDACTED => s.dimmed().to_string(),
            other => truncate(&display_value(other), 80),
        }
    }

    /// Formats an operation with color.
    fn format_operation(operation: OperationKind) -> String {
        let symbol = operation.symbol();
        match operation {
            OperationKind::Create => symbol.green().to_string(),
            OperationKind::UpdateInPlace => symbol.yellow().to_string(),
            OperationKind::Replace => symbol.magenta().to_string(),
            OperationKind::Delete => symbol.red().to_string(),
            OperationKind::NoOp => symbol.dimmed().to_string(),
        }
    }

    /// Formats an outcome with color.
    fn format_outcome(outcome: NodeOutcome) -> String {
        let text = outcome.to_string();
        match outcome {
            NodeOutcome::Resolved => text.green().to_string(),
            NodeOutcome::Failed => text.red().to_string(),
            NodeOutcome::Skipped | NodeOutcome::Cancelled => text.yellow().to_string(),
        }
    }

    #[allow(clippy::cast_precision_loss)]
    fn seconds(millis: u64) -> f64 {
        millis as f64 / 1000.0
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

fn to_json<T: serde::Serialize + ?Sized>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::ExportValue;
    use crate::graph::ResourceId;
    use crate::state::RecordedExport;
    use chrono::Utc;
    use serde_json::json;

    fn report() -> RunReport {
        RunReport {
            stack: String::from("wordpress"),
            started_at: Utc::now(),
            duration_ms: 1500,
            status: RunStatus::Failed,
            nodes: vec![
                NodeReport {
                    id: ResourceId::new("test:kind", "db"),
                    operation: Some(OperationKind::Create),
                    outcome: NodeOutcome::Failed,
                    duration_ms: 900,
                    attempts: 1,
                    error: Some(String::from("quota exceeded")),
                    blocked_by: None,
                    diffs: vec![],
                },
                NodeReport::not_started(
                    ResourceId::new("test:kind", "app"),
                    NodeOutcome::Skipped,
                    String::from("quota exceeded"),
                    Some(ResourceId::new("test:kind", "db")),
                ),
            ],
            cleanup: vec![],
            exports: vec![ExportValue {
                name: String::from("connection_string"),
                value: Some(json!("Password=hunter2")),
                secret: true,
                error: None,
            }],
        }
    }

    #[test]
    fn test_text_report_shows_blocking_cause_and_hides_secrets() {
        let text = OutputFormatter::new(OutputFormat::Text).format_report(&report(), false);
        assert!(text.contains("blocked by test:kind::db"));
        assert!(text.contains(REDACTED));
        assert!(!text.contains("hunter2"));
    }

    #[test]
    fn test_json_report_unmasks_on_request() {
        let formatter = OutputFormatter::new(OutputFormat::Json);
        assert!(!formatter.format_report(&report(), false).contains("hunter2"));
        assert!(formatter.format_report(&report(), true).contains("hunter2"));
    }

    fn recorded() -> StackState {
        let mut state = StackState::new("wordpress", "dev");
        state.exports = vec![
            RecordedExport::new("website_url", Some(json!("https://blog.example")), false, None),
            RecordedExport::new("connection_string", Some(json!("Password=hunter2")), true, None),
            RecordedExport::new("subnet_id", None, false, Some(String::from("no subnet named backend"))),
        ];
        state
    }

    #[test]
    fn test_outputs_list_stack_exports() {
        let text = OutputFormatter::new(OutputFormat::Text).format_exports(&recorded());
        assert!(text.contains("website_url"));
        assert!(text.contains("https://blog.example"));
        assert!(text.contains(REDACTED));
        assert!(text.contains("no subnet named backend"));
        assert!(!text.contains("hunter2"));

        let json = OutputFormatter::new(OutputFormat::Json).format_exports(&recorded());
        let parsed: Value = serde_json::from_str(&json).expect("json");
        assert_eq!(parsed["website_url"], json!("https://blog.example"));
        assert_eq!(parsed["connection_string"], json!(REDACTED));
        assert_eq!(parsed["subnet_id"], Value::Null);
    }

    #[test]
    fn test_outputs_without_exports() {
        let state = StackState::new("wordpress", "dev");
        let text = OutputFormatter::new(OutputFormat::Text).format_exports(&state);
        assert_eq!(text, "No exports recorded.\n");
    }

    #[test]
    fn test_truncate_is_char_safe() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("ééééééééé", 6), "ééé...");
    }
}

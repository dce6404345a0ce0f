//! Run reports.
//!
//! A [`RunReport`] lists every node's terminal outcome, the cleanup phase's
//! deletions, and the stack exports. Sensitive exports are redacted unless
//! the caller explicitly unmasks them.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::fmt;

use crate::graph::ResourceId;
use crate::output::{display_value, REDACTED};
use crate::reconciler::{OperationKind, PropertyDiff};

/// Terminal outcome of one node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeOutcome {
    /// The operation succeeded.
    Resolved,
    /// The operation failed.
    Failed,
    /// Not attempted because a dependency failed.
    Skipped,
    /// Not attempted because the run stopped.
    Cancelled,
}

impl fmt::Display for NodeOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let outcome = match self {
            Self::Resolved => "resolved",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
            Self::Cancelled => "cancelled",
        };
        write!(f, "{outcome}")
    }
}

/// What happened to one resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeReport {
    /// Logical identity.
    pub id: ResourceId,
    /// The operation chosen, if the node got that far.
    pub operation: Option<OperationKind>,
    /// Terminal outcome.
    pub outcome: NodeOutcome,
    /// Wall time spent executing.
    pub duration_ms: u64,
    /// Provider calls made.
    pub attempts: u32,
    /// Failure, skip, or cancellation cause.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// The failed node that blocked this one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blocked_by: Option<ResourceId>,
    /// Changed properties, secrets redacted.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub diffs: Vec<PropertyDiff>,
}

impl NodeReport {
    /// Report for a node that never started.
    #[must_use]
    pub fn not_started(
        id: ResourceId,
        outcome: NodeOutcome,
        cause: String,
        blocked_by: Option<ResourceId>,
    ) -> Self {
        Self {
            id,
            operation: None,
            outcome,
            duration_ms: 0,
            attempts: 0,
            error: Some(cause),
            blocked_by,
            diffs: Vec::new(),
        }
    }

    /// Returns true if the node changed something in the cloud.
    #[must_use]
    pub fn changed(&self) -> bool {
        self.outcome == NodeOutcome::Resolved && self.operation.is_some_and(OperationKind::is_change)
    }
}

/// Overall status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Every node resolved and cleanup finished.
    Succeeded,
    /// At least one node or deletion failed.
    Failed,
    /// The deadline expired before every node ran.
    Incomplete,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = match self {
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Incomplete => "incomplete",
        };
        write!(f, "{status}")
    }
}

/// A resolved stack export.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExportValue {
    /// Export name.
    pub name: String,
    /// The value, if it resolved.
    pub value: Option<Value>,
    /// Whether the value is sensitive.
    pub secret: bool,
    /// Why the value did not resolve.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ExportValue {
    /// Renders the value for display, redacted if sensitive.
    #[must_use]
    pub fn display(&self, unmask: bool) -> String {
        match (&self.value, &self.error) {
            (Some(_), _) if self.secret && !unmask => String::from(REDACTED),
            (Some(value), _) => display_value(value),
            (None, Some(error)) => format!("<unavailable: {error}>"),
            (None, None) => String::from("<unavailable>"),
        }
    }
}

/// The full account of one run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    /// Stack name.
    pub stack: String,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// Total wall time.
    pub duration_ms: u64,
    /// Overall status.
    pub status: RunStatus,
    /// Graph nodes, in completion order followed by nodes that never started.
    pub nodes: Vec<NodeReport>,
    /// Deletions of orphans and replaced instances.
    pub cleanup: Vec<NodeReport>,
    /// Stack exports.
    pub exports: Vec<ExportValue>,
}

impl RunReport {
    /// Looks up a node's report.
    #[must_use]
    pub fn node(&self, id: &ResourceId) -> Option<&NodeReport> {
        self.nodes.iter().find(|n| &n.id == id)
    }

    /// Looks up an export.
    #[must_use]
    pub fn export(&self, name: &str) -> Option<&ExportValue> {
        self.exports.iter().find(|e| e.name == name)
    }

    /// Counts graph nodes with a given outcome.
    #[must_use]
    pub fn count(&self, outcome: NodeOutcome) -> usize {
        self.nodes.iter().filter(|n| n.outcome == outcome).count()
    }

    /// Counts resolved graph nodes by operation.
    #[must_use]
    pub fn count_operation(&self, operation: OperationKind) -> usize {
        self.nodes
            .iter()
            .chain(&self.cleanup)
            .filter(|n| n.outcome == NodeOutcome::Resolved && n.operation == Some(operation))
            .count()
    }

    /// Identities of resources the run changed.
    #[must_use]
    pub fn changed(&self) -> Vec<String> {
        self.nodes
            .iter()
            .chain(&self.cleanup)
            .filter(|n| n.changed())
            .map(|n| n.id.to_string())
            .collect()
    }

    /// Returns true if the run succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Succeeded
    }

    /// Returns a copy with sensitive export values replaced by a placeholder.
    #[must_use]
    pub fn redacted(&self) -> Self {
        let mut report = self.clone();
        for export in &mut report.exports {
            if export.secret && export.value.is_some() {
                export.value = Some(Value::String(String::from(REDACTED)));
            }
        }
        report
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Run {} for stack '{}' in {}ms", self.status, self.stack, self.duration_ms)?;
        writeln!(
            f,
            "  {} resolved, {} failed, {} skipped, {} cancelled",
            self.count(NodeOutcome::Resolved),
            self.count(NodeOutcome::Failed),
            self.count(NodeOutcome::Skipped),
            self.count(NodeOutcome::Cancelled)
        )?;
        writeln!(
            f,
            "  {} created, {} updated, {} replaced, {} deleted",
            self.count_operation(OperationKind::Create),
            self.count_operation(OperationKind::UpdateInPlace),
            self.count_operation(OperationKind::Replace),
            self.count_operation(OperationKind::Delete)
        )?;

        for node in self.nodes.iter().chain(&self.cleanup) {
            if node.outcome != NodeOutcome::Resolved
                && let Some(error) = &node.error
            {
                writeln!(f, "  {} {}: {error}", node.outcome, node.id)?;
            }
        }

        if !self.exports.is_empty() {
            writeln!(f, "Outputs:")?;
            for export in &self.exports {
                writeln!(f, "  {}: {}", export.name, export.display(false))?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn report() -> RunReport {
        RunReport {
            stack: String::from("s"),
            started_at: Utc::now(),
            duration_ms: 5,
            status: RunStatus::Succeeded,
            nodes: vec![NodeReport {
                id: ResourceId::new("test:kind", "a"),
                operation: Some(OperationKind::Create),
                outcome: NodeOutcome::Resolved,
                duration_ms: 1,
                attempts: 1,
                error: None,
                blocked_by: None,
                diffs: vec![],
            }],
            cleanup: vec![],
            exports: vec![
                ExportValue {
                    name: String::from("name"),
                    value: Some(json!("rg-main")),
                    secret: false,
                    error: None,
                },
                ExportValue {
                    name: String::from("connection_string"),
                    value: Some(json!("Password=hunter2")),
                    secret: true,
                    error: None,
                },
            ],
        }
    }

    #[test]
    fn test_display_redacts_secret_exports() {
        let text = report().to_string();
        assert!(text.contains("rg-main"));
        assert!(!text.contains("hunter2"));
        assert!(text.contains(REDACTED));
    }

    #[test]
    fn test_redacted_copy_hides_values_in_json() {
        let json = serde_json::to_string(&report().redacted()).expect("serialize");
        assert!(!json.contains("hunter2"));
        assert!(json.contains("rg-main"));
    }

    #[test]
    fn test_unmask_shows_secret() {
        let report = report();
        let export = report.export("connection_string").expect("export");
        assert_eq!(export.display(true), "Password=hunter2");
        assert_eq!(export.display(false), REDACTED);
    }

    #[test]
    fn test_changed_lists_created_resources() {
        assert_eq!(report().changed(), vec![String::from("test:kind::a")]);
    }
}

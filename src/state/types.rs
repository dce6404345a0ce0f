//! State types for tracking provisioned resources.
//!
//! These types record what the engine last provisioned for a stack, used by
//! the reconciler to decide each resource's operation on the next run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use serde_json::Value;

use crate::graph::ResourceId;
use crate::output::{display_value, PropertyMap, PropertySet, REDACTED};

/// Current version of the state format.
pub const STATE_VERSION: &str = "1.0";

/// Number of run history entries kept.
const MAX_HISTORY: usize = 100;

/// The recorded state of a whole stack.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StackState {
    /// State format version.
    pub version: String,
    /// Stack name.
    pub stack: String,
    /// Environment name.
    pub environment: String,
    /// Recorded resources by logical identity.
    #[serde(default)]
    pub resources: BTreeMap<ResourceId, ResourceState>,
    /// When the state was last updated.
    pub last_updated: DateTime<Utc>,
    /// Run history (recent entries).
    #[serde(default)]
    pub history: Vec<RunHistoryEntry>,
    /// Replaced instances still awaiting deletion.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub retired: Vec<RetiredInstance>,
    /// Stack exports from the last run. Sensitive values are never stored.
    #[serde(default)]
    pub exports: Vec<RecordedExport>,
}

/// An instance superseded by a create-before-delete replacement whose
/// deletion has not happened yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetiredInstance {
    /// Logical identity the instance belonged to.
    pub id: ResourceId,
    /// Provider-assigned id of the old instance.
    pub provider_id: String,
    /// Whether deletion is refused.
    #[serde(default)]
    pub protect: bool,
    /// When the replacement superseded it.
    pub retired_at: DateTime<Utc>,
}

/// A stack export as recorded after a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedExport {
    /// Export name.
    pub name: String,
    /// The value; absent when sensitive or unresolved.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    /// Whether the value is sensitive.
    #[serde(default)]
    pub secret: bool,
    /// Why the value did not resolve.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RecordedExport {
    /// Records an export, dropping its value if it is sensitive.
    #[must_use]
    pub fn new(name: impl Into<String>, value: Option<Value>, secret: bool, error: Option<String>) -> Self {
        Self {
            name: name.into(),
            value: if secret { None } else { value },
            secret,
            error,
        }
    }

    /// Renders the recorded value.
    #[must_use]
    pub fn display(&self) -> String {
        match (&self.value, &self.error) {
            (_, Some(error)) => format!("<unavailable: {error}>"),
            (Some(value), None) => display_value(value),
            (None, None) if self.secret => String::from(REDACTED),
            (None, None) => String::from("<unavailable>"),
        }
    }
}

/// The recorded state of one resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceState {
    /// Logical identity.
    pub id: ResourceId,
    /// Provider-assigned id.
    pub provider_id: String,
    /// Inputs as last applied. Secret inputs hold their `sha256:` digest.
    pub inputs: PropertyMap,
    /// Names of inputs that were secret.
    #[serde(default)]
    pub secret_inputs: BTreeSet<String>,
    /// Hash of the recorded inputs.
    pub input_hash: String,
    /// Outputs as last reported.
    #[serde(default)]
    pub outputs: PropertyMap,
    /// Names of outputs that are sensitive.
    #[serde(default)]
    pub secret_outputs: BTreeSet<String>,
    /// Resources this one depended on, used to order deletions.
    #[serde(default)]
    pub dependencies: Vec<ResourceId>,
    /// Whether deletion is refused.
    #[serde(default)]
    pub protect: bool,
    /// When the resource was created.
    pub created_at: DateTime<Utc>,
    /// When the resource was last changed.
    pub updated_at: DateTime<Utc>,
}

/// A single entry in the run history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunHistoryEntry {
    /// When the run finished.
    pub timestamp: DateTime<Utc>,
    /// Kind of run.
    pub operation: RunOperation,
    /// Resources changed by the run.
    pub changed: Vec<String>,
    /// Whether every resource resolved.
    pub success: bool,
    /// Optional error summary.
    #[serde(default)]
    pub error: Option<String>,
}

/// Kinds of runs.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunOperation {
    /// Converge on the declared stack.
    Apply,
    /// Delete every recorded resource.
    Destroy,
}

impl StackState {
    /// Creates a new empty stack state.
    #[must_use]
    pub fn new(stack: &str, environment: &str) -> Self {
        Self {
            version: STATE_VERSION.to_string(),
            stack: stack.to_string(),
            environment: environment.to_string(),
            resources: BTreeMap::new(),
            last_updated: Utc::now(),
            history: Vec::new(),
            retired: Vec::new(),
            exports: Vec::new(),
        }
    }

    /// Gets a resource by identity.
    #[must_use]
    pub fn get(&self, id: &ResourceId) -> Option<&ResourceState> {
        self.resources.get(id)
    }

    /// Adds or replaces a resource record.
    pub fn set(&mut self, resource: ResourceState) {
        self.resources.insert(resource.id.clone(), resource);
        self.last_updated = Utc::now();
    }

    /// Removes a resource record.
    pub fn remove(&mut self, id: &ResourceId) -> Option<ResourceState> {
        let result = self.resources.remove(id);
        if result.is_some() {
            self.last_updated = Utc::now();
        }
        result
    }

    /// Returns the number of recorded resources.
    #[must_use]
    pub fn len(&self) -> usize {
        self.resources.len()
    }

    /// Returns true if nothing is recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Returns true if neither resources nor retired instances remain.
    #[must_use]
    pub fn is_drained(&self) -> bool {
        self.resources.is_empty() && self.retired.is_empty()
    }

    /// Looks up a recorded export.
    #[must_use]
    pub fn export(&self, name: &str) -> Option<&RecordedExport> {
        self.exports.iter().find(|e| e.name == name)
    }

    /// Adds a history entry, keeping only the most recent ones.
    pub fn add_history(&mut self, entry: RunHistoryEntry) {
        if self.history.len() >= MAX_HISTORY {
            self.history.remove(0);
        }
        self.history.push(entry);
    }
}

impl ResourceState {
    /// Returns the recorded outputs with their sensitivity.
    #[must_use]
    pub fn output_set(&self) -> PropertySet {
        PropertySet {
            values: self.outputs.clone(),
            secret: self.secret_outputs.clone(),
        }
    }
}

impl RunHistoryEntry {
    /// Creates a new history entry.
    #[must_use]
    pub fn new(operation: RunOperation, changed: Vec<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            operation,
            changed,
            success: true,
            error: None,
        }
    }

    /// Creates a failed history entry.
    #[must_use]
    pub fn failed(operation: RunOperation, changed: Vec<String>, error: &str) -> Self {
        Self {
            timestamp: Utc::now(),
            operation,
            changed,
            success: false,
            error: Some(error.to_string()),
        }
    }
}

impl std::fmt::Display for RunOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let op = match self {
            Self::Apply => "apply",
            Self::Destroy => "destroy",
        };
        write!(f, "{op}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(name: &str) -> ResourceState {
        let now = Utc::now();
        ResourceState {
            id: ResourceId::new("test:kind", name),
            provider_id: format!("/test/{name}"),
            inputs: PropertyMap::from([(String::from("sku"), json!("B1"))]),
            secret_inputs: BTreeSet::new(),
            input_hash: String::from("abc"),
            outputs: PropertyMap::from([(String::from("key"), json!("k"))]),
            secret_outputs: BTreeSet::from([String::from("key")]),
            dependencies: vec![],
            protect: false,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_state_serialization_keys_by_identity() {
        let mut state = StackState::new("wordpress", "dev");
        state.set(record("db"));

        let json = serde_json::to_string(&state).expect("serialize");
        assert!(json.contains("\"test:kind::db\""));

        let parsed: StackState = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(parsed.get(&ResourceId::new("test:kind", "db")), Some(&record_like(&state)));
    }

    fn record_like(state: &StackState) -> ResourceState {
        state
            .get(&ResourceId::new("test:kind", "db"))
            .cloned()
            .expect("recorded")
    }

    #[test]
    fn test_output_set_keeps_secrecy() {
        let outputs = record("db").output_set();
        assert!(outputs.is_secret("key"));
    }

    #[test]
    fn test_retired_instances_survive_a_round_trip() {
        let mut state = StackState::new("s", "dev");
        state.set(record("db"));
        state.retired.push(RetiredInstance {
            id: ResourceId::new("test:kind", "db"),
            provider_id: String::from("/test/db-old"),
            protect: false,
            retired_at: Utc::now(),
        });
        assert!(!state.is_drained());

        let json = serde_json::to_string(&state).expect("serialize");
        let parsed: StackState = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(parsed.retired, state.retired);

        state.resources.clear();
        assert!(state.is_empty());
        assert!(!state.is_drained());
    }

    #[test]
    fn test_older_state_files_load_without_new_fields() {
        let json = r#"{"version":"1.0","stack":"s","environment":"dev","last_updated":"2026-01-01T00:00:00Z"}"#;
        let parsed: StackState = serde_json::from_str(json).expect("deserialize");
        assert!(parsed.retired.is_empty());
        assert!(parsed.exports.is_empty());
        assert!(parsed.is_drained());
    }

    #[test]
    fn test_secret_exports_are_recorded_without_their_value() {
        let export = RecordedExport::new("dsn", Some(json!("user:pw@host")), true, None);
        assert!(export.value.is_none());
        assert_eq!(export.display(), REDACTED);

        let json = serde_json::to_string(&export).expect("serialize");
        assert!(!json.contains("user:pw"));

        let plain = RecordedExport::new("url", Some(json!("https://x")), false, None);
        assert_eq!(plain.display(), "https://x");
    }

    #[test]
    fn test_history_is_bounded() {
        let mut state = StackState::new("s", "dev");
        for _ in 0..(MAX_HISTORY + 5) {
            state.add_history(RunHistoryEntry::new(RunOperation::Apply, vec![]));
        }
        assert_eq!(state.history.len(), MAX_HISTORY);
    }
}

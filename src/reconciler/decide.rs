//! Per-resource operation decisions.
//!
//! The reconciler compares each declared resource's resolved inputs with
//! what was recorded for it on the previous run and decides which operation
//! brings the resource in line with the declaration.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use tracing::debug;

use crate::graph::{DependencyGraph, ResourceId};
use crate::output::{display_value, PropertySet, REDACTED};
use crate::provider::ResourceSchema;
use crate::state::{ResourceState, StackState};

use super::hash::InputHasher;

/// The operation chosen for a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    /// The resource does not exist yet.
    Create,
    /// Only updatable properties changed.
    UpdateInPlace,
    /// An immutable property changed.
    Replace,
    /// The resource is no longer declared.
    Delete,
    /// Nothing changed.
    NoOp,
}

impl OperationKind {
    /// Returns true if the operation calls the provider to change something.
    #[must_use]
    pub const fn is_change(self) -> bool {
        !matches!(self, Self::NoOp)
    }

    /// Short symbol used in plan listings.
    #[must_use]
    pub const fn symbol(self) -> &'static str {
        match self {
            Self::Create => "+",
            Self::UpdateInPlace => "~",
            Self::Replace => "+-",
            Self::Delete => "-",
            Self::NoOp => "=",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = match self {
            Self::Create => "create",
            Self::UpdateInPlace => "update",
            Self::Replace => "replace",
            Self::Delete => "delete",
            Self::NoOp => "no-op",
        };
        write!(f, "{op}")
    }
}

/// One changed property. Values are already rendered for display, with
/// sensitive values redacted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyDiff {
    /// Property name.
    pub property: String,
    /// Previously recorded value.
    pub old: Option<String>,
    /// Newly declared value.
    pub new: Option<String>,
    /// Whether either side is sensitive.
    pub secret: bool,
    /// Whether the change can be applied in place.
    pub updatable: bool,
}

impl PropertyDiff {
    fn new(property: &str, old: Option<&Value>, new: Option<&Value>, secret: bool, updatable: bool) -> Self {
        let render = |value: Option<&Value>| {
            value.map(|v| {
                if secret {
                    String::from(REDACTED)
                } else {
                    display_value(v)
                }
            })
        };
        Self {
            property: property.to_string(),
            old: render(old),
            new: render(new),
            secret,
            updatable,
        }
    }
}

impl fmt::Display for PropertyDiff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.old, &self.new) {
            (Some(old), Some(new)) => write!(f, "{}: {old} => {new}", self.property),
            (None, Some(new)) => write!(f, "{}: + {new}", self.property),
            (Some(old), None) => write!(f, "{}: - {old}", self.property),
            (None, None) => write!(f, "{}", self.property),
        }
    }
}

/// The reconciler's verdict for one resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    /// Logical identity.
    pub id: ResourceId,
    /// Chosen operation.
    pub operation: OperationKind,
    /// Changed properties.
    pub diffs: Vec<PropertyDiff>,
    /// Hash of the declared inputs in recorded form.
    pub input_hash: String,
    /// Why the operation was chosen.
    pub reason: String,
}

impl Decision {
    /// Names of the changed properties.
    #[must_use]
    pub fn changed(&self) -> Vec<String> {
        self.diffs.iter().map(|d| d.property.clone()).collect()
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} ({})", self.operation.symbol(), self.id, self.reason)
    }
}

/// Decides per-resource operations from declared and recorded state.
#[derive(Debug, Default, Clone, Copy)]
pub struct Reconciler {
    hasher: InputHasher,
}

impl Reconciler {
    /// Creates a new reconciler.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            hasher: InputHasher::new(),
        }
    }

    /// Returns the input hasher used for recorded inputs.
    #[must_use]
    pub const fn hasher(&self) -> &InputHasher {
        &self.hasher
    }

    /// Decides the operation for a declared resource.
    ///
    /// Without a schema every property is treated as immutable.
    #[must_use]
    pub fn decide(
        &self,
        id: &ResourceId,
        inputs: &PropertySet,
        prior: Option<&ResourceState>,
        schema: Option<&ResourceSchema>,
    ) -> Decision {
        let recorded = self.hasher.recordable(inputs);
        let input_hash = self.hasher.hash_recorded(&recorded);

        let Some(prior) = prior else {
            let diffs = recorded
                .iter()
                .map(|(name, value)| {
                    PropertyDiff::new(name, None, Some(value), inputs.is_secret(name), false)
                })
                .collect();
            debug!("{id} has no recorded state");
            return Decision {
                id: id.clone(),
                operation: OperationKind::Create,
                diffs,
                input_hash,
                reason: String::from("not yet provisioned"),
            };
        };

        if InputHasher::hashes_match(&prior.input_hash, &input_hash) {
            return Self::unchanged(id, input_hash);
        }

        let names: BTreeSet<&String> = recorded.keys().chain(prior.inputs.keys()).collect();
        let diffs: Vec<PropertyDiff> = names
            .into_iter()
            .filter_map(|name| {
                let old = prior.inputs.get(name);
                let new = recorded.get(name);
                if old == new {
                    return None;
                }
                let secret = inputs.is_secret(name) || prior.secret_inputs.contains(name);
                let updatable = schema.is_some_and(|s| s.is_updatable(name));
                Some(PropertyDiff::new(name, old, new, secret, updatable))
            })
            .collect();

        if diffs.is_empty() {
            return Self::unchanged(id, input_hash);
        }

        let immutable: Vec<&str> = diffs
            .iter()
            .filter(|d| !d.updatable)
            .map(|d| d.property.as_str())
            .collect();

        let (operation, reason) = if immutable.is_empty() {
            (
                OperationKind::UpdateInPlace,
                format!("{} updatable properties changed", diffs.len()),
            )
        } else {
            (
                OperationKind::Replace,
                format!("immutable properties changed: {}", immutable.join(", ")),
            )
        };

        debug!("{id}: {operation} ({reason})");
        Decision {
            id: id.clone(),
            operation,
            diffs,
            input_hash,
            reason,
        }
    }

    fn unchanged(id: &ResourceId, input_hash: String) -> Decision {
        Decision {
            id: id.clone(),
            operation: OperationKind::NoOp,
            diffs: Vec::new(),
            input_hash,
            reason: String::from("inputs unchanged"),
        }
    }

    /// Delete decisions for recorded resources no longer declared, ordered
    /// so that dependents are deleted before their dependencies.
    #[must_use]
    pub fn orphans(&self, graph: &DependencyGraph, prior: &StackState) -> Vec<Decision> {
        let orphaned: Vec<&ResourceState> = prior
            .resources
            .values()
            .filter(|r| !graph.contains(&r.id))
            .collect();

        deletion_order(&orphaned)
            .into_iter()
            .map(|id| Decision {
                id,
                operation: OperationKind::Delete,
                diffs: Vec::new(),
                input_hash: String::new(),
                reason: String::from("no longer declared"),
            })
            .collect()
    }
}

/// Orders recorded resources for deletion: reverse topological order over
/// their recorded dependencies, ties broken by identity.
#[must_use]
pub fn deletion_order(records: &[&ResourceState]) -> Vec<ResourceId> {
    let members: BTreeSet<&ResourceId> = records.iter().map(|r| &r.id).collect();

    let mut in_degree: BTreeMap<&ResourceId, usize> = members.iter().map(|id| (*id, 0)).collect();
    let mut dependents: BTreeMap<&ResourceId, Vec<&ResourceId>> = BTreeMap::new();
    for record in records {
        for dep in record.dependencies.iter().filter(|d| members.contains(d)) {
            if let Some(degree) = in_degree.get_mut(&record.id) {
                *degree += 1;
            }
            dependents.entry(dep).or_default().push(&record.id);
        }
    }

    let mut ready: BTreeSet<&ResourceId> = in_degree
        .iter()
        .filter(|(_, degree)| **degree == 0)
        .map(|(id, _)| *id)
        .collect();
    let mut creation = Vec::with_capacity(members.len());

    while let Some(next) = ready.pop_first() {
        creation.push(next.clone());
        for &dependent in dependents.get(next).into_iter().flatten() {
            if let Some(degree) = in_degree.get_mut(dependent) {
                *degree -= 1;
                if *degree == 0 {
                    ready.insert(dependent);
                }
            }
        }
    }

    // Recorded dependencies should never be cyclic; anything left over is
    // deleted last in identity order.
    for id in &members {
        if !creation.contains(*id) {
            creation.insert(0, (*id).clone());
        }
    }

    creation.reverse();
    creation
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    fn id(name: &str) -> ResourceId {
        ResourceId::new("test:kind", name)
    }

    fn inputs(pairs: &[(&str, Value, bool)]) -> PropertySet {
        let mut set = PropertySet::new();
        for (name, value, secret) in pairs {
            set.insert(*name, value.clone(), *secret);
        }
        set
    }

    fn record(reconciler: &Reconciler, name: &str, applied: &PropertySet, deps: &[&str]) -> ResourceState {
        let now = Utc::now();
        let recorded = reconciler.hasher().recordable(applied);
        ResourceState {
            id: id(name),
            provider_id: format!("/test/{name}"),
            input_hash: reconciler.hasher().hash_recorded(&recorded),
            inputs: recorded,
            secret_inputs: applied.secret.clone(),
            outputs: Default::default(),
            secret_outputs: BTreeSet::new(),
            dependencies: deps.iter().map(|d| id(d)).collect(),
            protect: false,
            created_at: now,
            updated_at: now,
        }
    }

    fn schema() -> ResourceSchema {
        ResourceSchema::new("test:kind").updatable(["tags"])
    }

    #[test]
    fn test_absent_resource_is_created() {
        let reconciler = Reconciler::new();
        let desired = inputs(&[("sku", json!("B1"), false)]);
        let decision = reconciler.decide(&id("db"), &desired, None, Some(&schema()));
        assert_eq!(decision.operation, OperationKind::Create);
        assert_eq!(decision.diffs.len(), 1);
    }

    #[test]
    fn test_create_noop_update_replace_sequence() {
        let reconciler = Reconciler::new();
        let schema = schema();

        let v1 = inputs(&[("sku", json!("B1"), false), ("tags", json!({"env": "dev"}), false)]);
        assert_eq!(
            reconciler.decide(&id("db"), &v1, None, Some(&schema)).operation,
            OperationKind::Create
        );
        let prior = record(&reconciler, "db", &v1, &[]);

        assert_eq!(
            reconciler.decide(&id("db"), &v1, Some(&prior), Some(&schema)).operation,
            OperationKind::NoOp
        );

        let v2 = inputs(&[("sku", json!("B1"), false), ("tags", json!({"env": "prod"}), false)]);
        let update = reconciler.decide(&id("db"), &v2, Some(&prior), Some(&schema));
        assert_eq!(update.operation, OperationKind::UpdateInPlace);
        assert_eq!(update.changed(), vec![String::from("tags")]);
        let prior = record(&reconciler, "db", &v2, &[]);

        let v3 = inputs(&[("sku", json!("B2"), false), ("tags", json!({"env": "prod"}), false)]);
        let replace = reconciler.decide(&id("db"), &v3, Some(&prior), Some(&schema));
        assert_eq!(replace.operation, OperationKind::Replace);
        assert!(replace.reason.contains("sku"));
    }

    #[test]
    fn test_without_schema_any_change_replaces() {
        let reconciler = Reconciler::new();
        let v1 = inputs(&[("tags", json!("a"), false)]);
        let prior = record(&reconciler, "db", &v1, &[]);
        let v2 = inputs(&[("tags", json!("b"), false)]);
        assert_eq!(
            reconciler.decide(&id("db"), &v2, Some(&prior), None).operation,
            OperationKind::Replace
        );
    }

    #[test]
    fn test_secret_inputs_compare_by_digest_and_never_print() {
        let reconciler = Reconciler::new();
        let v1 = inputs(&[("password", json!("old-pw"), true)]);
        let prior = record(&reconciler, "db", &v1, &[]);
        assert!(!serde_json::to_string(&prior).expect("json").contains("old-pw"));

        let same = inputs(&[("password", json!("old-pw"), true)]);
        assert_eq!(
            reconciler.decide(&id("db"), &same, Some(&prior), None).operation,
            OperationKind::NoOp
        );

        let rotated = inputs(&[("password", json!("new-pw"), true)]);
        let decision = reconciler.decide(&id("db"), &rotated, Some(&prior), None);
        assert_eq!(decision.operation, OperationKind::Replace);
        let shown = decision.diffs[0].to_string();
        assert!(!shown.contains("new-pw"));
        assert!(shown.contains(REDACTED));
    }

    #[test]
    fn test_deletion_order_puts_dependents_first() {
        let reconciler = Reconciler::new();
        let empty = PropertySet::new();
        let rg = record(&reconciler, "rg", &empty, &[]);
        let vnet = record(&reconciler, "vnet", &empty, &["rg"]);
        let app = record(&reconciler, "app", &empty, &["vnet", "rg"]);

        let order = deletion_order(&[&rg, &app, &vnet]);
        assert_eq!(order, vec![id("app"), id("vnet"), id("rg")]);
    }

    #[test]
    fn test_orphans_excludes_declared_resources() {
        let reconciler = Reconciler::new();
        let empty = PropertySet::new();
        let mut prior = StackState::new("s", "dev");
        prior.set(record(&reconciler, "kept", &empty, &[]));
        prior.set(record(&reconciler, "gone", &empty, &[]));

        let mut stack = crate::graph::Stack::new("s");
        stack
            .declare(crate::graph::ResourceDecl::new("test:kind", "kept"))
            .expect("declare");
        let graph = stack.finalize().expect("finalize");

        let orphans = reconciler.orphans(&graph, &prior);
        assert_eq!(orphans.len(), 1);
        assert_eq!(orphans[0].id, id("gone"));
        assert_eq!(orphans[0].operation, OperationKind::Delete);
    }
}

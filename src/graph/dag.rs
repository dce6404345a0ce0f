//! The frozen dependency graph.
//!
//! Nodes live in a single arena indexed by declaration order; edges are
//! index sets derived from each node's referenced identities. Cycles are
//! rejected here, so everything downstream may assume a DAG.

use std::collections::{BTreeSet, HashMap};
use tracing::{debug, info};

use crate::error::{ConfigError, Result};
use crate::output::signal::SignalSender;
use crate::provider::SchemaSource;

use super::id::ResourceId;
use super::node::ResourceNode;
use super::stack::StackExport;

/// A validated, acyclic resource graph ready for execution.
#[derive(Debug)]
pub struct DependencyGraph {
    stack: String,
    nodes: Vec<ResourceNode>,
    index: HashMap<ResourceId, usize>,
    dependencies: Vec<BTreeSet<usize>>,
    dependents: Vec<BTreeSet<usize>>,
    signals: Vec<SignalSender>,
    exports: Vec<StackExport>,
}

impl DependencyGraph {
    pub(crate) fn build(
        stack: String,
        nodes: Vec<ResourceNode>,
        index: HashMap<ResourceId, usize>,
        mut signals: HashMap<ResourceId, SignalSender>,
        exports: Vec<StackExport>,
    ) -> Result<Self> {
        let count = nodes.len();
        let mut dependencies = vec![BTreeSet::new(); count];
        let mut dependents = vec![BTreeSet::new(); count];

        for node in &nodes {
            for referenced in node.referenced_ids() {
                let Some(&upstream) = index.get(&referenced) else {
                    return Err(ConfigError::UnknownReference {
                        from: node.id.to_string(),
                        missing: referenced,
                    }
                    .into());
                };
                dependencies[node.index].insert(upstream);
                dependents[upstream].insert(node.index);
            }
        }

        for export in &exports {
            if let Some(missing) = export
                .value
                .dependencies()
                .iter()
                .find(|id| !index.contains_key(*id))
            {
                return Err(ConfigError::UnknownReference {
                    from: format!("export '{}'", export.name),
                    missing: missing.clone(),
                }
                .into());
            }
        }

        // A handle obtained through `reference` for an identity nobody used
        // as an input still has to be declared.
        if let Some(missing) = signals.keys().filter(|id| !index.contains_key(*id)).min() {
            return Err(ConfigError::UnknownReference {
                from: String::from("forward reference"),
                missing: missing.clone(),
            }
            .into());
        }

        let cycles = find_cycles(&dependents);
        if !cycles.is_empty() {
            let cycles = cycles
                .into_iter()
                .map(|members| members.into_iter().map(|i| nodes[i].id.clone()).collect())
                .collect();
            return Err(ConfigError::Cycle { cycles }.into());
        }

        let signals = nodes
            .iter()
            .map(|node| {
                signals
                    .remove(&node.id)
                    .unwrap_or_else(crate::output::signal::channel)
            })
            .collect();

        let edge_count: usize = dependencies.iter().map(BTreeSet::len).sum();
        info!(
            "Finalized stack '{stack}': {count} resources, {edge_count} dependency edges"
        );

        Ok(Self {
            stack,
            nodes,
            index,
            dependencies,
            dependents,
            signals,
            exports,
        })
    }

    /// Returns the stack name.
    #[must_use]
    pub fn stack(&self) -> &str {
        &self.stack
    }

    /// Returns the number of nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns true if the graph has no nodes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Returns all nodes in declaration order.
    #[must_use]
    pub fn nodes(&self) -> &[ResourceNode] {
        &self.nodes
    }

    /// Returns the node at an arena index.
    #[must_use]
    pub fn node(&self, index: usize) -> &ResourceNode {
        &self.nodes[index]
    }

    /// Looks up a node's arena index by identity.
    #[must_use]
    pub fn index_of(&self, id: &ResourceId) -> Option<usize> {
        self.index.get(id).copied()
    }

    /// Returns true if the identity is declared.
    #[must_use]
    pub fn contains(&self, id: &ResourceId) -> bool {
        self.index.contains_key(id)
    }

    /// Direct upstream nodes of a node.
    #[must_use]
    pub fn dependencies_of(&self, index: usize) -> &BTreeSet<usize> {
        &self.dependencies[index]
    }

    /// Direct downstream nodes of a node.
    #[must_use]
    pub fn dependents_of(&self, index: usize) -> &BTreeSet<usize> {
        &self.dependents[index]
    }

    /// Every node reachable downstream of a node, excluding itself.
    #[must_use]
    pub fn transitive_dependents(&self, index: usize) -> BTreeSet<usize> {
        let mut seen = BTreeSet::new();
        let mut stack: Vec<usize> = self.dependents[index].iter().copied().collect();
        while let Some(next) = stack.pop() {
            if seen.insert(next) {
                stack.extend(self.dependents[next].iter().copied());
            }
        }
        seen
    }

    /// All edges as `(from, to)` identity pairs, `to` depending on `from`.
    #[must_use]
    pub fn edges(&self) -> Vec<(ResourceId, ResourceId)> {
        self.dependencies
            .iter()
            .enumerate()
            .flat_map(|(to, froms)| {
                froms
                    .iter()
                    .map(move |&from| (self.nodes[from].id.clone(), self.nodes[to].id.clone()))
            })
            .collect()
    }

    /// Stack exports in declaration order.
    #[must_use]
    pub fn exports(&self) -> &[StackExport] {
        &self.exports
    }

    pub(crate) fn signal(&self, index: usize) -> &SignalSender {
        &self.signals[index]
    }

    /// Checks every declaration against the provider's resource schemas.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::SchemaMismatch`] for unknown types or
    /// properties, and [`ConfigError::MissingInput`] for absent required inputs.
    pub fn validate_schemas<S>(&self, schemas: &S) -> Result<()>
    where
        S: SchemaSource + ?Sized,
    {
        for node in &self.nodes {
            let Some(schema) = schemas.schema(node.id.type_token()) else {
                return Err(ConfigError::SchemaMismatch {
                    resource: node.id.clone(),
                    message: format!("unknown resource type '{}'", node.id.type_token()),
                }
                .into());
            };

            if let Some(property) = schema
                .required
                .iter()
                .find(|p| !node.inputs.contains_key(*p))
            {
                return Err(ConfigError::MissingInput {
                    resource: node.id.clone(),
                    property: property.clone(),
                }
                .into());
            }

            if let Some(known) = &schema.properties
                && let Some(unknown) = node.inputs.keys().find(|p| !known.contains(*p))
            {
                return Err(ConfigError::SchemaMismatch {
                    resource: node.id.clone(),
                    message: format!("unknown property '{unknown}'"),
                }
                .into());
            }
        }
        debug!("All {} declarations match provider schemas", self.nodes.len());
        Ok(())
    }
}

/// Finds every cycle as a strongly connected component (Tarjan), reporting
/// components with more than one member or a self-loop. Members are listed
/// in declaration order; components are ordered by their first member.
fn find_cycles(dependents: &[BTreeSet<usize>]) -> Vec<Vec<usize>> {
    struct Tarjan<'a> {
        edges: &'a [BTreeSet<usize>],
        counter: usize,
        index: Vec<Option<usize>>,
        low: Vec<usize>,
        on_stack: Vec<bool>,
        stack: Vec<usize>,
        components: Vec<Vec<usize>>,
    }

    impl Tarjan<'_> {
        fn visit(&mut self, v: usize) {
            self.index[v] = Some(self.counter);
            self.low[v] = self.counter;
            self.counter += 1;
            self.stack.push(v);
            self.on_stack[v] = true;

            for &w in self.edges[v].iter() {
                match self.index[w] {
                    None => {
                        self.visit(w);
                        self.low[v] = self.low[v].min(self.low[w]);
                    }
                    Some(w_index) if self.on_stack[w] => {
                        self.low[v] = self.low[v].min(w_index);
                    }
                    Some(_) => {}
                }
            }

            if Some(self.low[v]) == self.index[v] {
                let mut component = Vec::new();
                while let Some(w) = self.stack.pop() {
                    self.on_stack[w] = false;
                    component.push(w);
                    if w == v {
                        break;
                    }
                }
                self.components.push(component);
            }
        }
    }

    let count = dependents.len();
    let mut tarjan = Tarjan {
        edges: dependents,
        counter: 0,
        index: vec![None; count],
        low: vec![0; count],
        on_stack: vec![false; count],
        stack: Vec::new(),
        components: Vec::new(),
    };

    for v in 0..count {
        if tarjan.index[v].is_none() {
            tarjan.visit(v);
        }
    }

    let mut cycles: Vec<Vec<usize>> = tarjan
        .components
        .into_iter()
        .filter(|c| c.len() > 1 || dependents[c[0]].contains(&c[0]))
        .map(|mut c| {
            c.sort_unstable();
            c
        })
        .collect();
    cycles.sort();
    cycles
}

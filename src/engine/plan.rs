//! Execution plan construction.
//!
//! The plan is a static view of the schedule: batches of resources with no
//! edges between them, in a valid topological order. The executor does not
//! follow batches strictly (a node starts as soon as its own dependencies
//! resolve) but never violates the order they encode.

use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;

use crate::graph::{DependencyGraph, ResourceId};

/// Resources grouped into dependency-free batches.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExecutionPlan {
    /// Batches in execution order; ties within a batch follow declaration order.
    pub batches: Vec<Vec<ResourceId>>,
}

impl ExecutionPlan {
    /// Computes the plan with Kahn's algorithm.
    #[must_use]
    pub fn from_graph(graph: &DependencyGraph) -> Self {
        let mut in_degree: Vec<usize> = (0..graph.len())
            .map(|i| graph.dependencies_of(i).len())
            .collect();
        let mut current: BTreeSet<usize> = in_degree
            .iter()
            .enumerate()
            .filter(|(_, degree)| **degree == 0)
            .map(|(i, _)| i)
            .collect();

        let mut batches = Vec::new();
        while !current.is_empty() {
            let mut next = BTreeSet::new();
            for &index in &current {
                for &dependent in graph.dependents_of(index) {
                    in_degree[dependent] -= 1;
                    if in_degree[dependent] == 0 {
                        next.insert(dependent);
                    }
                }
            }
            batches.push(current.iter().map(|&i| graph.node(i).id.clone()).collect());
            current = next;
        }

        Self { batches }
    }

    /// Total number of resources.
    #[must_use]
    pub fn len(&self) -> usize {
        self.batches.iter().map(Vec::len).sum()
    }

    /// Returns true if the plan has no resources.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }

    /// Returns the batch number of a resource.
    #[must_use]
    pub fn batch_of(&self, id: &ResourceId) -> Option<usize> {
        self.batches.iter().position(|batch| batch.contains(id))
    }
}

impl fmt::Display for ExecutionPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.batches.is_empty() {
            return write!(f, "Nothing to execute");
        }

        writeln!(
            f,
            "Execution plan ({} resources in {} batches):",
            self.len(),
            self.batches.len()
        )?;
        for (i, batch) in self.batches.iter().enumerate() {
            writeln!(f, "  Batch {}:", i + 1)?;
            for id in batch {
                writeln!(f, "    - {id}")?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{ResourceDecl, Stack};
    use proptest::prelude::*;

    fn diamond_plus_loner() -> DependencyGraph {
        let mut stack = Stack::new("plan");
        let rg = stack
            .declare(ResourceDecl::new("test:kind", "rg"))
            .expect("rg");
        let db = stack
            .declare(ResourceDecl::new("test:kind", "db").input("group", rg.name()))
            .expect("db");
        let plan = stack
            .declare(ResourceDecl::new("test:kind", "plan").input("group", rg.name()))
            .expect("plan");
        stack
            .declare(
                ResourceDecl::new("test:kind", "app")
                    .input("db", db.output("fqdn"))
                    .input("plan", plan.resource_id()),
            )
            .expect("app");
        stack
            .declare(ResourceDecl::new("test:kind", "cdn"))
            .expect("cdn");
        stack.finalize().expect("finalize")
    }

    #[test]
    fn test_batches_are_topological_with_declaration_ties() {
        let graph = diamond_plus_loner();
        let plan = ExecutionPlan::from_graph(&graph);

        let names: Vec<Vec<&str>> = plan
            .batches
            .iter()
            .map(|b| b.iter().map(ResourceId::name).collect())
            .collect();
        assert_eq!(names, vec![vec!["rg", "cdn"], vec!["db", "plan"], vec!["app"]]);
        assert_eq!(plan.len(), graph.len());
    }

    #[test]
    fn test_every_edge_points_forward() {
        let graph = diamond_plus_loner();
        let plan = ExecutionPlan::from_graph(&graph);

        for (from, to) in graph.edges() {
            let from_batch = plan.batch_of(&from).expect("from planned");
            let to_batch = plan.batch_of(&to).expect("to planned");
            assert!(from_batch < to_batch, "{from} must run before {to}");
        }
    }

    #[test]
    fn test_empty_graph_has_empty_plan() {
        let graph = Stack::new("empty").finalize().expect("finalize");
        let plan = ExecutionPlan::from_graph(&graph);
        assert!(plan.is_empty());
        assert_eq!(plan.to_string(), "Nothing to execute");
    }

    fn random_graph(n: usize, keep: &[bool]) -> DependencyGraph {
        let mut stack = Stack::new("random");
        let mut handles = Vec::with_capacity(n);
        let mut flags = keep.iter();
        for to in 0..n {
            let mut decl = ResourceDecl::new("test:kind", format!("r{to}"));
            for handle in &handles {
                if flags.next().copied().unwrap_or(false) {
                    decl = decl.depends_on(handle);
                }
            }
            handles.push(stack.declare(decl).expect("declare"));
        }
        stack.finalize().expect("acyclic")
    }

    proptest! {
        #[test]
        fn prop_plan_orders_every_edge_and_plans_each_node_once(
            (n, keep) in (1usize..14).prop_flat_map(|n| {
                (Just(n), prop::collection::vec(any::<bool>(), n * (n - 1) / 2))
            })
        ) {
            let graph = random_graph(n, &keep);
            let plan = ExecutionPlan::from_graph(&graph);

            for (from, to) in graph.edges() {
                let from_batch = plan.batch_of(&from).expect("from planned");
                let to_batch = plan.batch_of(&to).expect("to planned");
                prop_assert!(from_batch < to_batch, "{} must run before {}", from, to);
            }

            let planned: Vec<&ResourceId> = plan.batches.iter().flatten().collect();
            let distinct: std::collections::BTreeSet<&ResourceId> = planned.iter().copied().collect();
            prop_assert_eq!(planned.len(), n);
            prop_assert_eq!(distinct.len(), n);
            for node in graph.nodes() {
                prop_assert!(distinct.contains(&node.id));
            }
        }
    }
}

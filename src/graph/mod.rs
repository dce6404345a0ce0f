//! Dependency graph construction.
//!
//! Resources are declared on a [`Stack`]; wiring one resource's output into
//! another's input records a dependency. [`Stack::finalize`] freezes the
//! declarations into an acyclic [`DependencyGraph`].

mod dag;
mod id;
mod node;
mod stack;

pub use dag::DependencyGraph;
pub use id::ResourceId;
pub use node::{NodeState, ResourceDecl, ResourceNode, ResourceOptions};
pub use stack::{ResourceHandle, Stack, StackExport};

//! Resource declarations and graph nodes.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::output::Input;

use super::id::ResourceId;
use super::stack::ResourceHandle;

/// Per-resource behaviour options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceOptions {
    /// Refuse to delete the resource, whether as an orphan or a replacement.
    #[serde(default)]
    pub protect: bool,
    /// Force delete-then-create replacement even when the type allows two
    /// instances to coexist.
    #[serde(default)]
    pub delete_before_replace: bool,
}

/// A resource declaration as written by a stack program.
#[derive(Debug, Clone)]
pub struct ResourceDecl {
    pub(crate) id: ResourceId,
    pub(crate) inputs: BTreeMap<String, Input>,
    pub(crate) depends_on: Vec<ResourceId>,
    pub(crate) options: ResourceOptions,
}

impl ResourceDecl {
    /// Starts a declaration of the given type and logical name.
    #[must_use]
    pub fn new(type_token: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: ResourceId::new(type_token, name),
            inputs: BTreeMap::new(),
            depends_on: Vec::new(),
            options: ResourceOptions::default(),
        }
    }

    /// Sets an input property.
    #[must_use]
    pub fn input(mut self, name: impl Into<String>, value: impl Into<Input>) -> Self {
        self.inputs.insert(name.into(), value.into());
        self
    }

    /// Adds an explicit dependency that no input expresses.
    #[must_use]
    pub fn depends_on(mut self, handle: &ResourceHandle) -> Self {
        self.depends_on.push(handle.id().clone());
        self
    }

    /// Marks the resource as protected from deletion.
    #[must_use]
    pub const fn protect(mut self, protect: bool) -> Self {
        self.options.protect = protect;
        self
    }

    /// Forces delete-then-create replacement.
    #[must_use]
    pub const fn delete_before_replace(mut self, enabled: bool) -> Self {
        self.options.delete_before_replace = enabled;
        self
    }

    /// Returns the identity being declared.
    #[must_use]
    pub const fn id(&self) -> &ResourceId {
        &self.id
    }
}

/// Lifecycle of a node within one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeState {
    /// Waiting on dependencies.
    Pending,
    /// Ready and holding a concurrency permit.
    Scheduled,
    /// The operation is in flight.
    Executing,
    /// The operation succeeded.
    Resolved,
    /// The operation failed.
    Failed,
    /// Not attempted because a dependency failed.
    Skipped,
    /// Not attempted because the run stopped.
    Cancelled,
}

impl NodeState {
    /// Returns true for states a node never leaves.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Resolved | Self::Failed | Self::Skipped | Self::Cancelled
        )
    }

    /// Returns true if moving from `self` to `next` is a legal transition.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Scheduled | Self::Skipped | Self::Cancelled)
                | (Self::Scheduled, Self::Executing)
                | (Self::Executing, Self::Resolved | Self::Failed)
        )
    }
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self {
            Self::Pending => "pending",
            Self::Scheduled => "scheduled",
            Self::Executing => "executing",
            Self::Resolved => "resolved",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
            Self::Cancelled => "cancelled",
        };
        write!(f, "{state}")
    }
}

/// A declared resource as stored in the graph arena.
#[derive(Debug, Clone)]
pub struct ResourceNode {
    /// Position in declaration order; also the arena index.
    pub index: usize,
    /// Logical identity.
    pub id: ResourceId,
    /// Declared inputs.
    pub inputs: BTreeMap<String, Input>,
    /// Explicit dependencies.
    pub depends_on: Vec<ResourceId>,
    /// Behaviour options.
    pub options: ResourceOptions,
}

impl ResourceNode {
    pub(crate) fn from_decl(index: usize, decl: ResourceDecl) -> Self {
        Self {
            index,
            id: decl.id,
            inputs: decl.inputs,
            depends_on: decl.depends_on,
            options: decl.options,
        }
    }

    /// Every identity this node depends on, through inputs or explicitly.
    #[must_use]
    pub fn referenced_ids(&self) -> Vec<ResourceId> {
        let mut ids: Vec<ResourceId> = self
            .inputs
            .values()
            .flat_map(Input::dependencies)
            .chain(self.depends_on.iter().cloned())
            .collect();
        ids.sort();
        ids.dedup();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_legal_transitions() {
        assert!(NodeState::Pending.can_transition_to(NodeState::Scheduled));
        assert!(NodeState::Scheduled.can_transition_to(NodeState::Executing));
        assert!(NodeState::Executing.can_transition_to(NodeState::Resolved));
        assert!(NodeState::Executing.can_transition_to(NodeState::Failed));
        assert!(NodeState::Pending.can_transition_to(NodeState::Cancelled));
    }

    #[test]
    fn test_terminal_states_are_final() {
        for terminal in [
            NodeState::Resolved,
            NodeState::Failed,
            NodeState::Skipped,
            NodeState::Cancelled,
        ] {
            assert!(terminal.is_terminal());
            assert!(!terminal.can_transition_to(NodeState::Pending));
            assert!(!terminal.can_transition_to(NodeState::Executing));
        }
        assert!(!NodeState::Executing.can_transition_to(NodeState::Cancelled));
    }
}

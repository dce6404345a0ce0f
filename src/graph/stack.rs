//! Declaration phase of a stack.
//!
//! A [`Stack`] collects resource declarations and stack exports. Declaring
//! a resource returns a [`ResourceHandle`] whose outputs can feed other
//! resources' inputs; the dependency this creates is recorded inside the
//! returned [`Output`] and turned into a graph edge by [`Stack::finalize`].

use serde_json::Value;
use std::collections::HashMap;
use tracing::debug;

use crate::error::{ConfigError, Result};
use crate::output::signal::{self, SignalReceiver, SignalSender};
use crate::output::Output;

use super::dag::DependencyGraph;
use super::id::ResourceId;
use super::node::{ResourceDecl, ResourceNode};

/// A handle to a declared (or forward-referenced) resource.
#[derive(Debug, Clone)]
pub struct ResourceHandle {
    id: ResourceId,
    receiver: SignalReceiver,
}

impl ResourceHandle {
    /// Returns the resource identity.
    #[must_use]
    pub const fn id(&self) -> &ResourceId {
        &self.id
    }

    /// Returns a deferred value for one of the resource's output properties.
    #[must_use]
    pub fn output(&self, property: &str) -> Output<Value> {
        Output::from_node(self.id.clone(), property.to_string(), self.receiver.clone())
    }

    /// Shorthand for the `name` output.
    #[must_use]
    pub fn name(&self) -> Output<Value> {
        self.output("name")
    }

    /// Shorthand for the provider-assigned `id` output.
    #[must_use]
    pub fn resource_id(&self) -> Output<Value> {
        self.output("id")
    }
}

/// A named stack output.
#[derive(Debug, Clone)]
pub struct StackExport {
    /// Export name.
    pub name: String,
    /// Exported value.
    pub value: Output<Value>,
}

/// The declaration-phase builder for a resource graph.
#[derive(Debug)]
pub struct Stack {
    name: String,
    nodes: Vec<ResourceNode>,
    index: HashMap<ResourceId, usize>,
    signals: HashMap<ResourceId, SignalSender>,
    exports: Vec<StackExport>,
}

impl Stack {
    /// Creates an empty stack.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            nodes: Vec::new(),
            index: HashMap::new(),
            signals: HashMap::new(),
            exports: Vec::new(),
        }
    }

    /// Returns the stack name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the number of declared resources.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns true if nothing has been declared.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Registers a resource.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::DuplicateResource`] if the identity is taken.
    pub fn declare(&mut self, decl: ResourceDecl) -> Result<ResourceHandle> {
        if self.index.contains_key(decl.id()) {
            return Err(ConfigError::DuplicateResource {
                id: decl.id().clone(),
            }
            .into());
        }

        let index = self.nodes.len();
        let id = decl.id().clone();
        debug!("Declared {id} (#{index})");

        self.index.insert(id.clone(), index);
        self.nodes.push(ResourceNode::from_decl(index, decl));
        Ok(self.reference_id(id))
    }

    /// Returns a handle for a resource that may be declared later.
    ///
    /// Finalizing fails if the identity is still undeclared by then.
    pub fn reference(
        &mut self,
        type_token: impl Into<String>,
        name: impl Into<String>,
    ) -> ResourceHandle {
        self.reference_id(ResourceId::new(type_token, name))
    }

    fn reference_id(&mut self, id: ResourceId) -> ResourceHandle {
        let receiver = self
            .signals
            .entry(id.clone())
            .or_insert_with(signal::channel)
            .subscribe();
        ResourceHandle { id, receiver }
    }

    /// Records a stack output reported after the run.
    pub fn export(&mut self, name: impl Into<String>, value: impl Into<Output<Value>>) {
        self.exports.push(StackExport {
            name: name.into(),
            value: value.into(),
        });
    }

    /// Freezes the declarations into a dependency graph.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for references to undeclared resources
    /// or for dependency cycles.
    pub fn finalize(self) -> Result<DependencyGraph> {
        DependencyGraph::build(self.name, self.nodes, self.index, self.signals, self.exports)
    }
}

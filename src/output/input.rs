//! Declared input properties.
//!
//! An [`Input`] is whatever a declaration assigns to a resource property: a
//! literal, a deferred [`Output`], or lists and maps nesting both. The graph
//! builder reads dependencies out of inputs; the executor resolves them once
//! the upstream resources are provisioned.

use futures_util::future::{BoxFuture, FutureExt};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};

use crate::error::OutputError;
use crate::graph::ResourceId;

use super::deferred::Output;

/// A declared property value.
#[derive(Debug, Clone)]
pub enum Input {
    /// A literal value.
    Value(Value),
    /// A value produced by another resource or a derived computation.
    Output(Output<Value>),
    /// A list of inputs.
    List(Vec<Input>),
    /// A map of inputs.
    Map(BTreeMap<String, Input>),
}

/// A resolved input value.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedInput {
    /// The concrete value.
    pub value: Value,
    /// Whether any part of the value is sensitive.
    pub secret: bool,
}

impl Input {
    /// Builds a list input.
    pub fn list<I, V>(items: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Self>,
    {
        Self::List(items.into_iter().map(Into::into).collect())
    }

    /// Builds a map input.
    pub fn map<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Self>,
    {
        Self::Map(
            entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// Every resource this input depends on, at any nesting depth.
    #[must_use]
    pub fn dependencies(&self) -> BTreeSet<ResourceId> {
        let mut deps = BTreeSet::new();
        self.collect_dependencies(&mut deps);
        deps
    }

    fn collect_dependencies(&self, deps: &mut BTreeSet<ResourceId>) {
        match self {
            Self::Value(_) => {}
            Self::Output(output) => deps.extend(output.dependencies().iter().cloned()),
            Self::List(items) => items.iter().for_each(|i| i.collect_dependencies(deps)),
            Self::Map(entries) => entries.values().for_each(|i| i.collect_dependencies(deps)),
        }
    }

    /// Whether any nested output is known to be sensitive.
    #[must_use]
    pub fn is_secret(&self) -> bool {
        match self {
            Self::Value(_) => false,
            Self::Output(output) => output.is_secret(),
            Self::List(items) => items.iter().any(Self::is_secret),
            Self::Map(entries) => entries.values().any(Self::is_secret),
        }
    }

    /// Whether the input is fully known without waiting on any resource.
    #[must_use]
    pub fn is_literal(&self) -> bool {
        match self {
            Self::Value(_) => true,
            Self::Output(_) => false,
            Self::List(items) => items.iter().all(Self::is_literal),
            Self::Map(entries) => entries.values().all(Self::is_literal),
        }
    }

    /// Resolves every nested output into a concrete value.
    ///
    /// The result is sensitive if any nested part is.
    pub fn resolve(&self) -> BoxFuture<'_, Result<ResolvedInput, OutputError>> {
        async move {
            match self {
                Self::Value(value) => Ok(ResolvedInput {
                    value: value.clone(),
                    secret: false,
                }),
                Self::Output(output) => {
                    let resolved = output.resolve().await?;
                    Ok(ResolvedInput {
                        value: resolved.value,
                        secret: resolved.secret,
                    })
                }
                Self::List(items) => {
                    let mut values = Vec::with_capacity(items.len());
                    let mut secret = false;
                    for item in items {
                        let resolved = item.resolve().await?;
                        secret |= resolved.secret;
                        values.push(resolved.value);
                    }
                    Ok(ResolvedInput {
                        value: Value::Array(values),
                        secret,
                    })
                }
                Self::Map(entries) => {
                    let mut values = Map::new();
                    let mut secret = false;
                    for (key, item) in entries {
                        let resolved = item.resolve().await?;
                        secret |= resolved.secret;
                        values.insert(key.clone(), resolved.value);
                    }
                    Ok(ResolvedInput {
                        value: Value::Object(values),
                        secret,
                    })
                }
            }
        }
        .boxed()
    }
}

impl From<Value> for Input {
    fn from(value: Value) -> Self {
        Self::Value(value)
    }
}

impl From<&str> for Input {
    fn from(value: &str) -> Self {
        Self::Value(Value::String(value.to_string()))
    }
}

impl From<String> for Input {
    fn from(value: String) -> Self {
        Self::Value(Value::String(value))
    }
}

impl From<bool> for Input {
    fn from(value: bool) -> Self {
        Self::Value(Value::Bool(value))
    }
}

impl From<i64> for Input {
    fn from(value: i64) -> Self {
        Self::Value(Value::from(value))
    }
}

impl From<u32> for Input {
    fn from(value: u32) -> Self {
        Self::Value(Value::from(value))
    }
}

impl From<Output<Value>> for Input {
    fn from(output: Output<Value>) -> Self {
        Self::Output(output)
    }
}

impl From<&Output<Value>> for Input {
    fn from(output: &Output<Value>) -> Self {
        Self::Output(output.clone())
    }
}

impl From<Output<String>> for Input {
    fn from(output: Output<String>) -> Self {
        Self::Output(output.into())
    }
}

impl From<Vec<Self>> for Input {
    fn from(items: Vec<Self>) -> Self {
        Self::List(items)
    }
}

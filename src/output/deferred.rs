//! Deferred values.
//!
//! An [`Output`] is a value that may not be known yet because it comes from a
//! resource that has not been provisioned. It records, at declaration time,
//! which resources it depends on and whether it is sensitive, and it resolves
//! exactly once into a [`Resolved`] value shared by every clone.

use futures_util::future::{self, BoxFuture, FutureExt, Shared};
use serde_json::Value;
use std::collections::BTreeSet;
use std::fmt;
use std::future::Future;

use crate::error::OutputError;
use crate::graph::ResourceId;

use super::signal::{self, NodeSignal, SignalReceiver};

type Resolution<T> = Result<Resolved<T>, OutputError>;

/// The final value of a deferred computation.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolved<T> {
    /// The value itself.
    pub value: T,
    /// Whether the value is sensitive.
    pub secret: bool,
    /// Every resource the value was derived from, including dependencies
    /// discovered while flattening nested outputs.
    pub dependencies: BTreeSet<ResourceId>,
}

/// A value that resolves once the resources it depends on are provisioned.
///
/// Sensitivity is sticky: anything derived from a secret output through
/// [`apply`](Self::apply), [`apply_output`](Self::apply_output),
/// [`try_apply`](Self::try_apply) or [`all`](Self::all) is secret as well.
pub struct Output<T> {
    dependencies: BTreeSet<ResourceId>,
    secret: bool,
    resolution: Shared<BoxFuture<'static, Resolution<T>>>,
}

impl<T> Clone for Output<T>
where
    T: Clone,
{
    fn clone(&self) -> Self {
        Self {
            dependencies: self.dependencies.clone(),
            secret: self.secret,
            resolution: self.resolution.clone(),
        }
    }
}

impl<T> fmt::Debug for Output<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Output")
            .field("dependencies", &self.dependencies)
            .field("secret", &self.secret)
            .finish_non_exhaustive()
    }
}

impl<T> Output<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Wraps an already known, non-sensitive value.
    #[must_use]
    pub fn known(value: T) -> Self {
        Self::ready(value, false)
    }

    /// Wraps an already known, sensitive value.
    #[must_use]
    pub fn secret(value: T) -> Self {
        Self::ready(value, true)
    }

    fn ready(value: T, secret: bool) -> Self {
        let resolved = Resolved {
            value,
            secret,
            dependencies: BTreeSet::new(),
        };
        Self::from_future(BTreeSet::new(), secret, future::ready(Ok(resolved)))
    }

    pub(crate) fn from_future<F>(
        dependencies: BTreeSet<ResourceId>,
        secret: bool,
        resolution: F,
    ) -> Self
    where
        F: Future<Output = Resolution<T>> + Send + 'static,
    {
        Self {
            dependencies,
            secret,
            resolution: resolution.boxed().shared(),
        }
    }

    /// Resources this value is known to depend on at declaration time.
    #[must_use]
    pub const fn dependencies(&self) -> &BTreeSet<ResourceId> {
        &self.dependencies
    }

    /// Whether the value is known to be sensitive at declaration time.
    ///
    /// The resolved flag can only be stronger: outputs a provider marks as
    /// secret, or nested outputs returned by [`apply_output`](Self::apply_output),
    /// are discovered on resolution.
    #[must_use]
    pub const fn is_secret(&self) -> bool {
        self.secret
    }

    /// Waits for the value. Every clone observes the same result.
    ///
    /// # Errors
    ///
    /// Returns [`OutputError::Blocked`] carrying the originating cause when an
    /// upstream resource failed, or the error of a failed transformation.
    pub async fn resolve(&self) -> Resolution<T> {
        self.resolution.clone().await
    }

    /// Marks the value as sensitive.
    #[must_use]
    pub fn as_secret(&self) -> Self {
        let upstream = self.resolution.clone();
        Self::from_future(self.dependencies.clone(), true, async move {
            let mut resolved = upstream.await?;
            resolved.secret = true;
            Ok(resolved)
        })
    }

    /// Derives a new value by transforming this one once it resolves.
    #[must_use]
    pub fn apply<U, F>(&self, transform: F) -> Output<U>
    where
        U: Clone + Send + Sync + 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        let upstream = self.resolution.clone();
        Output::from_future(self.dependencies.clone(), self.secret, async move {
            let resolved = upstream.await?;
            Ok(Resolved {
                value: transform(resolved.value),
                secret: resolved.secret,
                dependencies: resolved.dependencies,
            })
        })
    }

    /// Like [`apply`](Self::apply), but the transformation may fail.
    ///
    /// A failure resolves to [`OutputError::Transform`], which fails whichever
    /// resource consumes the value.
    #[must_use]
    pub fn try_apply<U, E, F>(&self, transform: F) -> Output<U>
    where
        U: Clone + Send + Sync + 'static,
        E: fmt::Display + Send + 'static,
        F: FnOnce(T) -> Result<U, E> + Send + 'static,
    {
        let upstream = self.resolution.clone();
        Output::from_future(self.dependencies.clone(), self.secret, async move {
            let resolved = upstream.await?;
            let value = transform(resolved.value).map_err(|e| OutputError::Transform {
                message: e.to_string(),
            })?;
            Ok(Resolved {
                value,
                secret: resolved.secret,
                dependencies: resolved.dependencies,
            })
        })
    }

    /// Derives a value from a transformation that itself returns an output,
    /// collapsing the nested output into one.
    #[must_use]
    pub fn apply_output<U, F>(&self, transform: F) -> Output<U>
    where
        U: Clone + Send + Sync + 'static,
        F: FnOnce(T) -> Output<U> + Send + 'static,
    {
        let upstream = self.resolution.clone();
        Output::from_future(self.dependencies.clone(), self.secret, async move {
            let outer = upstream.await?;
            let inner = transform(outer.value).resolve().await?;
            let mut dependencies = outer.dependencies;
            dependencies.extend(inner.dependencies);
            Ok(Resolved {
                value: inner.value,
                secret: outer.secret || inner.secret,
                dependencies,
            })
        })
    }

    /// Combines several outputs into one output of all their values.
    ///
    /// The combined value resolves once every input resolves; if any input
    /// fails, the first failure in list order is propagated.
    #[must_use]
    pub fn all(outputs: Vec<Self>) -> Output<Vec<T>> {
        let dependencies = outputs
            .iter()
            .flat_map(|o| o.dependencies.iter().cloned())
            .collect();
        let secret = outputs.iter().any(|o| o.secret);
        let pending: Vec<_> = outputs.into_iter().map(|o| o.resolution).collect();

        Output::from_future(dependencies, secret, async move {
            let results = future::join_all(pending).await;
            let mut combined = Resolved {
                value: Vec::with_capacity(results.len()),
                secret,
                dependencies: BTreeSet::new(),
            };
            for result in results {
                let resolved = result?;
                combined.value.push(resolved.value);
                combined.secret |= resolved.secret;
                combined.dependencies.extend(resolved.dependencies);
            }
            Ok(combined)
        })
    }
}

impl Output<Value> {
    /// Builds the output of one property of a resource node.
    ///
    /// Suspends on the node's completion signal; a failed, skipped, or
    /// cancelled node resolves to an error naming the originating failure.
    pub(crate) fn from_node(id: ResourceId, property: String, receiver: SignalReceiver) -> Self {
        let dependencies = BTreeSet::from([id.clone()]);
        Self::from_future(dependencies, false, async move {
            match signal::wait_terminal(receiver).await {
                NodeSignal::Resolved(outputs) => {
                    let value = outputs.get(&property).cloned().ok_or_else(|| {
                        OutputError::MissingProperty {
                            resource: id.clone(),
                            property: property.clone(),
                        }
                    })?;
                    Ok(Resolved {
                        value,
                        secret: outputs.is_secret(&property),
                        dependencies: BTreeSet::from([id]),
                    })
                }
                NodeSignal::Failed { cause } => Err(OutputError::Blocked {
                    resource: id,
                    cause,
                }),
                NodeSignal::Skipped { blocked_by, cause } => Err(OutputError::Blocked {
                    resource: blocked_by,
                    cause,
                }),
                NodeSignal::Cancelled { reason } => Err(OutputError::Cancelled {
                    resource: id,
                    reason,
                }),
                NodeSignal::Pending => Err(OutputError::Cancelled {
                    resource: id,
                    reason: String::from("resource never completed"),
                }),
            }
        })
    }
}

impl From<Output<String>> for Output<Value> {
    fn from(output: Output<String>) -> Self {
        output.apply(Value::String)
    }
}

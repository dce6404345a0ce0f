//! Plan/state reconciliation.
//!
//! Compares declared inputs with recorded state to choose each resource's
//! operation, and orders deletions of resources that are no longer declared.

mod decide;
mod hash;

pub use decide::{deletion_order, Decision, OperationKind, PropertyDiff, Reconciler};
pub use hash::{InputHasher, DIGEST_PREFIX};

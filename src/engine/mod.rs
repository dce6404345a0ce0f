//! Graph execution.
//!
//! This module provides:
//! - [`ExecutionPlan`]: the static topological schedule of a graph
//! - [`Engine`]: the concurrent executor with failure policies and deadlines
//! - [`RunReport`]: per-node outcomes, cleanup results, and stack exports

mod executor;
mod plan;
mod report;

pub use executor::{Engine, FailurePolicy, RunOptions, RunOutcome, DEFAULT_MAX_PARALLEL};
pub use plan::ExecutionPlan;
pub use report::{ExportValue, NodeOutcome, NodeReport, RunReport, RunStatus};

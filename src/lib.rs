// ============================================================================
// Linting - Dangerous or non-idiomatic practices are forbidden
// ============================================================================

#![deny(unsafe_code)]                 // Unsafe code is forbidden
#![warn(missing_docs)]                // All public items should be documented
#![deny(non_camel_case_types)]        // Types must follow CamelCase convention

// Additional strictness
#![warn(unused_imports)]              // Unused imports are flagged
#![warn(unused_variables)]            // Unused variables are flagged
#![deny(unused_must_use)]             // Must handle Result and Option explicitly
#![deny(non_snake_case)]              // Variables and functions must be snake_case
#![deny(non_upper_case_globals)]      // Constants must be UPPER_CASE
#![deny(nonstandard_style)]           // Non-standard code style is forbidden
#![forbid(unsafe_op_in_unsafe_fn)]    // Unsafe ops in unsafe fns are forbidden

// Clippy lints (warnings only)
#![warn(clippy::all)]                 // All standard Clippy lints
#![warn(clippy::pedantic)]            // Very strict Clippy lints
#![warn(clippy::nursery)]             // Experimental lints
#![warn(clippy::unwrap_used)]         // unwrap() warning
#![warn(clippy::expect_used)]         // expect() warning
#![warn(clippy::print_stdout)]        // println!() warning
#![warn(clippy::todo)]                // TODO warning
#![warn(clippy::unimplemented)]       // unimplemented!() warning
#![warn(clippy::unwrap_in_result)]    // unwrap() in Result warning
#![warn(clippy::redundant_clone)]     // Useless clones warning
#![warn(clippy::too_many_arguments)]  // Limit function arguments
#![warn(clippy::cognitive_complexity)] // Limit cognitive complexity
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]

// Safety and robustness lints
#![deny(overflowing_literals)]        // Overflowing literals are forbidden
#![deny(arithmetic_overflow)]         // Arithmetic overflow is forbidden

// ============================================================================
// Crate Documentation
// ============================================================================

//! # Stackweave
//!
//! A declarative cloud provisioning engine built on a graph of deferred values.
//!
//! ## Overview
//!
//! A stack program declares resources whose inputs may be values that are
//! only known once another resource has been provisioned. Stackweave:
//!
//! - Records every such reference as a dependency edge
//! - Provisions independent resources concurrently, dependents after their dependencies
//! - Compares declared inputs with recorded state to create, update, replace, or skip
//! - Deletes resources that are no longer declared, dependents first
//! - Keeps sensitive values redacted in state, logs, and reports
//!
//! ## Architecture
//!
//! 1. **Declaration**: a [`stacks::StackProgram`] declares resources on a [`graph::Stack`]
//! 2. **Graph**: [`graph::Stack::finalize`] checks references and cycles
//! 3. **Engine**: [`engine::Engine`] reconciles each node against state and runs it
//! 4. **State**: [`state::StateStore`] persists what was provisioned, under a lock
//!
//! ## Modules
//!
//! - [`output`]: Deferred values and property sets
//! - [`graph`]: Resource declarations and the dependency graph
//! - [`engine`]: Concurrent executor, execution plan, and run report
//! - [`provider`]: Provider trait, retrying adapter, HTTP gateway, in-memory simulator
//! - [`reconciler`]: Create / update / replace / delete decisions
//! - [`state`]: State storage backends and locking
//! - [`config`]: Configuration parsing and validation
//! - [`stacks`]: Bundled stack programs
//! - [`deployment`]: Lock, run, record, and save in one call
//! - [`cli`]: Command-line interface
//!
//! ## Example
//!
//! ```yaml
//! stack:
//!   name: blog
//!   environment: prod
//!   program: wordpress
//!
//! provider:
//!   endpoint: https://provisioner.internal.example
//!
//! config:
//!   location: westeurope
//!   admin_password:
//!     env: WORDPRESS_DB_PASSWORD
//!     secret: true
//! ```

// ============================================================================
// Modules
// ============================================================================

pub mod cli;
pub mod config;
pub mod deployment;
pub mod engine;
pub mod error;
pub mod graph;
pub mod lookup;
pub mod output;
pub mod provider;
pub mod reconciler;
pub mod stacks;
pub mod state;

// ============================================================================
// Re-exports
// ============================================================================

pub use cli::{Cli, Commands, OutputFormatter};
pub use config::{ConfigParser, ConfigValidator, StackConfig, StackValues};
pub use deployment::Deployment;
pub use engine::{Engine, ExecutionPlan, RunOptions, RunOutcome, RunReport};
pub use error::{Result, StackweaveError};
pub use graph::{DependencyGraph, ResourceDecl, ResourceHandle, ResourceId, Stack};
pub use output::{Input, Output, PropertySet};
pub use provider::{HttpProvider, MemoryProvider, Provider, SchemaRegistry};
pub use reconciler::{OperationKind, Reconciler};
pub use state::{LocalStateStore, MemoryStateStore, StackState, StateStore};

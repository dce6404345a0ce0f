//! Deferred values and property resolution.
//!
//! This module provides the value layer of the engine:
//! - [`Output`]: composable values that resolve once upstream resources exist
//! - [`Input`]: declared property trees mixing literals and outputs
//! - [`PropertySet`]: resolved properties with per-property sensitivity
//! - completion signals that suspend outputs until a node finishes

mod deferred;
mod input;
mod properties;
pub(crate) mod signal;

pub use deferred::{Output, Resolved};
pub use input::{Input, ResolvedInput};
pub use properties::{display_value, PropertyMap, PropertySet, REDACTED};
pub use signal::{NodeSignal, SignalReceiver, SignalSender};

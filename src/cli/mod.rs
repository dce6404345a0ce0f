//! CLI module for the stackweave tool.
//!
//! This module provides the command-line interface for validating,
//! applying, and destroying stacks, and for inspecting recorded state.

mod commands;
mod output;

pub use commands::{Cli, Commands, OutputFormat, StateCommands};
pub use output::OutputFormatter;

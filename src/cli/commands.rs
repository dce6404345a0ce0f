//! CLI command definitions.
//!
//! This module defines all CLI commands and their arguments using clap.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Stackweave - declarative cloud stacks with a dependency-graph engine.
#[derive(Parser, Debug)]
#[command(name = "stackweave")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to the configuration file.
    #[arg(short, long, global = true, env = "STACKWEAVE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Output format (text, json).
    #[arg(long, global = true, default_value = "text")]
    pub output: OutputFormat,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Validate the configuration and the declared resource graph.
    Validate {
        /// Show all warnings, not just errors.
        #[arg(short, long)]
        warnings: bool,
    },

    /// Print the execution plan: resources in dependency batches.
    Graph,

    /// Create, update, or replace resources to match the stack.
    Apply {
        /// Skip confirmation prompt.
        #[arg(short, long)]
        yes: bool,

        /// Run against the in-process simulated provider.
        #[arg(long)]
        simulate: bool,

        /// Keep running independent resources after a failure.
        #[arg(long)]
        continue_on_error: bool,

        /// Maximum number of resources operated on at once.
        #[arg(long)]
        max_parallel: Option<usize>,

        /// Show secret exports in clear text.
        #[arg(long)]
        unmask: bool,
    },

    /// Delete every recorded resource.
    Destroy {
        /// Skip confirmation prompt.
        #[arg(short, long)]
        yes: bool,

        /// Run against the in-process simulated provider.
        #[arg(long)]
        simulate: bool,
    },

    /// Show the stack exports recorded by the last run.
    Outputs {
        /// List every resource's recorded outputs instead.
        #[arg(long)]
        resources: bool,

        /// With --resources, show secret outputs in clear text.
        #[arg(long, requires = "resources")]
        unmask: bool,
    },

    /// Manage recorded state.
    State {
        /// State subcommand.
        #[command(subcommand)]
        command: StateCommands,
    },
}

/// State management subcommands.
#[derive(Subcommand, Debug)]
pub enum StateCommands {
    /// Show current state.
    Show,

    /// Unlock the state.
    Unlock {
        /// Lock ID to unlock.
        #[arg(long)]
        lock_id: Option<String>,

        /// Force unlock (dangerous).
        #[arg(long)]
        force: bool,
    },
}

/// Output format options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output.
    #[default]
    Text,
    /// JSON output for scripting.
    Json,
}

impl Cli {
    /// Parses CLI arguments from the command line.
    #[must_use]
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_apply_flags() {
        let cli = Cli::try_parse_from([
            "stackweave",
            "apply",
            "--yes",
            "--simulate",
            "--continue-on-error",
            "--max-parallel",
            "4",
        ])
        .expect("parse");

        match cli.command {
            Commands::Apply {
                yes,
                simulate,
                continue_on_error,
                max_parallel,
                unmask,
            } => {
                assert!(yes && simulate && continue_on_error && !unmask);
                assert_eq!(max_parallel, Some(4));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_global_output_flag() {
        let cli = Cli::try_parse_from(["stackweave", "state", "show", "--output", "json"])
            .expect("parse");
        assert_eq!(cli.output, OutputFormat::Json);
        assert!(matches!(
            cli.command,
            Commands::State {
                command: StateCommands::Show
            }
        ));
    }
}

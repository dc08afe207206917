//! Command-line interface for schema-forge.
//!
//! Provides commands for running a build and inspecting the effective
//! configuration.

mod commands;

pub use commands::{parse_cli, run, run_with_cli, Cli, Commands};

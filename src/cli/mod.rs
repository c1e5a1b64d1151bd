//! CLI module for the Halyard provisioning engine.
//!
//! This module provides the command-line interface: argument parsing and
//! output formatting. Command dispatch lives in the binary.

mod commands;
mod output;

pub use commands::{Cli, Commands, OutputFormat, StateCommands};
pub use output::OutputFormatter;

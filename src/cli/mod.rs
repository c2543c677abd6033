//! CLI module for the fleetwright binary.
//!
//! This module provides argument parsing and the text rendering of plans,
//! task results and recorded runs.

mod commands;
mod output;

pub use commands::{Cli, Commands};
pub use output::OutputFormatter;

//! CLI command definitions.
//!
//! This module defines all CLI commands and their arguments using clap.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::executor::{DEFAULT_GENERATED_ASSETS_DIR, OutputFormat};
use crate::plan::{DEFAULT_PLAN_FILE, Role};

/// Fleetwright - role-scoped installation steps over SSH.
#[derive(Parser, Debug)]
#[command(name = "fleetwright")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to the plan file.
    #[arg(
        short = 'f',
        long = "file",
        global = true,
        env = "FLEETWRIGHT_PLAN",
        default_value = DEFAULT_PLAN_FILE
    )]
    pub plan_file: PathBuf,

    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run one installation step against the nodes of the plan.
    Step {
        /// Task name, e.g. `storage`, `_storage.yaml` or `volume-add`.
        task: String,

        /// Directory for generated assets and run records.
        #[arg(long, default_value = DEFAULT_GENERATED_ASSETS_DIR)]
        generated_assets_dir: PathBuf,

        /// Ask the step to restart services it manages.
        #[arg(long)]
        restart_services: bool,

        /// Installation output format.
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Simple)]
        output: OutputFormat,

        /// Extra variables as `key=value` pairs.
        #[arg(long, value_delimiter = ',')]
        extra_vars: Vec<String>,
    },

    /// List the available steps.
    Tasks,

    /// Validate the plan file.
    Validate,

    /// Run a command on every node holding a role.
    Exec {
        /// Role whose nodes are targeted.
        #[arg(long, value_parser = parse_role)]
        role: Role,

        /// Installation output format.
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Simple)]
        output: OutputFormat,

        /// Command and arguments.
        #[arg(trailing_var_arg = true, required = true, num_args = 1..)]
        command: Vec<String>,
    },

    /// Copy a local file to every node holding a role.
    Copy {
        /// Role whose nodes are targeted.
        #[arg(long, value_parser = parse_role)]
        role: Role,

        /// Local file.
        local: PathBuf,

        /// Remote destination; `~/` is the login home.
        remote: String,
    },

    /// List recorded step runs, newest first.
    Runs {
        /// Directory for generated assets and run records.
        #[arg(long, default_value = DEFAULT_GENERATED_ASSETS_DIR)]
        generated_assets_dir: PathBuf,

        /// Number of runs to show.
        #[arg(short = 'n', long, default_value = "20")]
        limit: usize,
    },
}

fn parse_role(value: &str) -> Result<Role, String> {
    value.parse()
}

impl Cli {
    /// Parses CLI arguments from the command line.
    #[must_use]
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

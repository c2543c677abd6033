// ============================================================================
// Strict linting - Dangerous or non-idiomatic practices are forbidden
// ============================================================================

#![deny(unsafe_code)]                 // Unsafe code is forbidden
#![deny(missing_docs)]                // All public items must be documented
#![deny(non_camel_case_types)]        // Types must follow CamelCase convention

// Additional strictness - Leave nothing unchecked
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
#![warn(clippy::panic)]               // panic!() warning
#![warn(clippy::print_stdout)]        // println!() warning
#![warn(clippy::todo)]                // TODO warning
#![warn(clippy::unimplemented)]       // unimplemented!() warning
#![warn(clippy::missing_const_for_fn)] // Force const when possible
#![warn(clippy::unwrap_in_result)]    // unwrap() in Result warning
#![warn(clippy::redundant_clone)]     // Useless clones warning
#![warn(clippy::too_many_arguments)]  // Limit function arguments
#![warn(clippy::cognitive_complexity)] // Limit cognitive complexity

// Safety and robustness lints
#![deny(overflowing_literals)]        // Overflowing literals are forbidden
#![deny(arithmetic_overflow)]         // Arithmetic overflow is forbidden

// Test code may unwrap, expect and panic freely
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

// ============================================================================
// Crate Documentation
// ============================================================================

//! # Fleetwright
//!
//! Applies named, idempotent installation steps to role-scoped groups of
//! cluster nodes over SSH.
//!
//! ## Overview
//!
//! A cluster is described once in a YAML plan file (`kismatic-cluster.yaml`
//! by default). Each step, for example `storage` or `volume-add`, targets the
//! nodes holding one or more roles and runs an automation play on each of
//! them:
//!
//! 1. **Plan**: the plan file is parsed and validated into an immutable [`Plan`]
//! 2. **Keys**: every private key the step needs is checked before any connection
//! 3. **Dispatch**: nodes are driven concurrently over SSH, bounded by a session limit
//! 4. **Aggregate**: per-node outcomes are collected into a [`TaskResult`]
//!
//! A failing node never interrupts its siblings. The step succeeds only when
//! every targeted node succeeds.
//!
//! ## Modules
//!
//! - [`plan`]: Plan file parsing, validation and the typed topology
//! - [`ssh`]: Key validation and the SSH session layer
//! - [`executor`]: Task catalog and fleet dispatch
//! - [`journal`]: Run records written after each step
//! - [`cli`]: Command-line interface
//!
//! ## Example
//!
//! ```yaml
//! cluster:
//!   name: kismatic-cluster
//!   allow_package_installation: true
//!   ssh:
//!     user: ubuntu
//!     ssh_key: /home/me/.ssh/cluster.pem
//!     ssh_port: 22
//! etcd:
//!   nodes:
//!     - host: node1
//!       ip: 10.0.0.1
//! master:
//!   primary_master_fqdn: node1
//!   primary_master_short_name: node1
//!   nodes:
//!     - host: node1
//!       ip: 10.0.0.1
//! worker:
//!   nodes:
//!     - host: node2
//!       ip: 10.0.0.2
//! storage:
//!   nodes:
//!     - host: node2
//!       ip: 10.0.0.2
//! ```

// ============================================================================
// Modules
// ============================================================================

pub mod cli;
pub mod error;
pub mod executor;
pub mod journal;
pub mod plan;
pub mod ssh;

#[cfg(test)]
mod test_support;

// ============================================================================
// Re-exports
// ============================================================================

pub use cli::{Cli, Commands, OutputFormatter};
pub use error::{FleetError, Result};
pub use executor::{
    CancelToken, EngineConfig, ExecutionOptions, FleetExecutor, NodeResult, OutputFormat,
    TaskCatalog, TaskResult, TaskState,
};
pub use journal::{JournalEntry, JournalStore};
pub use plan::{FilePlanner, Node, Plan, Planner, Role};
pub use ssh::{Connector, KeyValidator, Session, Ssh2Connector, SshTarget};

//! SSH access to cluster nodes.
//!
//! This module handles:
//! - Validating private keys before any connection is attempted
//! - The [`Connector`]/[`Session`] seam used by the executor
//! - The libssh2 implementation of that seam

mod key;
mod session;
mod client;

pub use key::{KeyKind, KeyValidator};
pub use session::{BatchFailure, CommandOutput, Connector, Session, SshTarget, home_relative};
pub use client::{Ssh2Connector, Ssh2Session};

#[cfg(test)]
pub(crate) use session::MockConnector;

//! Session abstractions over a remote node.
//!
//! The executor only talks to nodes through [`Connector`] and [`Session`],
//! which keeps the dispatch machinery independent of the SSH library and
//! lets tests substitute scripted sessions.

use async_trait::async_trait;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{ConnectionError, RemoteExecutionError};
use crate::plan::Node;

/// Connection facts for one node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshTarget {
    /// Hostname, used in logs and results.
    pub hostname: String,
    /// Address to dial.
    pub address: String,
    /// SSH port.
    pub port: u16,
    /// Login user.
    pub user: String,
    /// Private key used for authentication.
    pub key_path: PathBuf,
}

impl SshTarget {
    /// Builds the connection target of a resolved plan node.
    #[must_use]
    pub fn from_node(node: &Node) -> Self {
        Self {
            hostname: node.hostname.clone(),
            address: node.address.clone(),
            port: node.ssh_port,
            user: node.ssh_user.clone(),
            key_path: node.ssh_key_path.clone(),
        }
    }

    /// Creates a connection error for this target.
    #[must_use]
    pub fn connection_error(&self, cause: impl Into<String>) -> ConnectionError {
        ConnectionError {
            address: self.address.clone(),
            port: self.port,
            user: self.user.clone(),
            cause: cause.into(),
        }
    }
}

/// Captured result of one remote command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandOutput {
    /// The command as sent to the node.
    pub command: String,
    /// Exit status.
    pub exit_code: i32,
    /// Combined standard output and error.
    pub output: String,
}

/// A command batch that stopped early.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{error}")]
pub struct BatchFailure {
    /// Outputs of the commands that succeeded before the failure.
    pub completed: Vec<CommandOutput>,
    /// Why the batch stopped.
    pub error: RemoteExecutionError,
}

impl From<RemoteExecutionError> for BatchFailure {
    fn from(error: RemoteExecutionError) -> Self {
        Self {
            completed: Vec::new(),
            error,
        }
    }
}

/// Opens authenticated sessions to nodes.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Connector: Send + Sync {
    /// Connects and authenticates to `target`.
    ///
    /// There is no internal retry: a single failed attempt is reported.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError`] on network or authentication failure, or
    /// when `timeout` elapses first.
    async fn connect(
        &self,
        target: &SshTarget,
        timeout: Duration,
    ) -> Result<Box<dyn Session>, ConnectionError>;
}

/// A single-use session to one node.
#[async_trait]
pub trait Session: Send {
    /// Runs `commands` in order, stopping at the first non-zero exit.
    ///
    /// One `timeout` bounds the whole batch.
    ///
    /// # Errors
    ///
    /// Returns a [`BatchFailure`] holding the outputs of the commands that
    /// completed, with [`RemoteExecutionError::NonZeroExit`] for the first
    /// failing command or [`RemoteExecutionError::Timeout`] when the budget
    /// runs out.
    async fn run_commands(
        &mut self,
        commands: &[String],
        timeout: Duration,
    ) -> Result<Vec<CommandOutput>, BatchFailure>;

    /// Uploads `local` to `remote`, returning the number of bytes written.
    ///
    /// A remote path starting with `~/` is relative to the login home.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteExecutionError::RemoteWriteError`] when the local file
    /// cannot be read or the remote file cannot be written, and
    /// [`RemoteExecutionError::Timeout`] when the budget runs out.
    async fn put_file(
        &mut self,
        local: &Path,
        remote: &str,
        timeout: Duration,
    ) -> Result<u64, RemoteExecutionError>;

    /// Closes the session. Further calls are not allowed.
    async fn close(&mut self);
}

/// Maps a `~/`-prefixed path onto the SFTP login directory.
#[must_use]
pub fn home_relative(remote: &str) -> &str {
    if remote == "~" {
        "."
    } else {
        remote.strip_prefix("~/").unwrap_or(remote)
    }
}

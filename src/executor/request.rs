//! Per-node work items.

use std::path::PathBuf;
use std::time::Duration;

use crate::plan::Node;
use crate::ssh::SshTarget;

/// Commands to run on one node within one timeout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteCommandRequest {
    /// Target node.
    pub node: SshTarget,
    /// Commands, in order.
    pub commands: Vec<String>,
    /// Budget for the whole batch.
    pub timeout: Duration,
}

/// A file to push to one node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileTransferRequest {
    /// Target node.
    pub node: SshTarget,
    /// Source file on this machine.
    pub local_path: PathBuf,
    /// Destination on the node; `~/` is the login home.
    pub remote_path: String,
    /// Budget for the transfer.
    pub timeout: Duration,
}

/// Everything one dispatch does on one node: uploads first, then commands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeDispatch {
    /// Target node.
    pub target: SshTarget,
    /// Uploads, in order.
    pub transfers: Vec<FileTransferRequest>,
    /// Command batch, if any.
    pub commands: Option<RemoteCommandRequest>,
}

impl NodeDispatch {
    /// Creates an empty dispatch for a node.
    #[must_use]
    pub fn new(node: &Node) -> Self {
        Self {
            target: SshTarget::from_node(node),
            transfers: Vec::new(),
            commands: None,
        }
    }

    /// Adds an upload.
    #[must_use]
    pub fn with_transfer(mut self, local_path: PathBuf, remote_path: String, timeout: Duration) -> Self {
        self.transfers.push(FileTransferRequest {
            node: self.target.clone(),
            local_path,
            remote_path,
            timeout,
        });
        self
    }

    /// Sets the command batch; an empty list means no commands.
    #[must_use]
    pub fn with_commands(mut self, commands: Vec<String>, timeout: Duration) -> Self {
        self.commands = (!commands.is_empty()).then(|| RemoteCommandRequest {
            node: self.target.clone(),
            commands,
            timeout,
        });
        self
    }
}

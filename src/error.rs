//! Error types for the fleetwright engine.
//!
//! This module provides the error hierarchy for every stage of a task run:
//! key validation, plan loading, session handling, remote execution and
//! task aggregation.

use std::path::PathBuf;
use thiserror::Error;

/// The main error type for the fleetwright engine.
#[derive(Debug, Error)]
pub enum FleetError {
    /// SSH private key errors.
    #[error("SSH key error: {0}")]
    Key(#[from] KeyError),

    /// Plan loading errors.
    #[error("Plan error: {0}")]
    Plan(#[from] PlanReadError),

    /// Task-level errors.
    #[error("Task error: {0}")]
    Task(#[from] TaskError),

    /// Engine or CLI configuration errors.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Run journal errors.
    #[error("Journal error: {0}")]
    Journal(#[from] JournalError),
}

/// SSH private key errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum KeyError {
    /// The key is not a decodable PEM document.
    #[error("malformed SSH key {source_name}: {message}")]
    Malformed {
        /// Where the key came from (file path or `<memory>`).
        source_name: String,
        /// Description of the decode failure.
        message: String,
    },

    /// The key is protected by a passphrase.
    #[error("encrypted SSH key {source_name} is not permitted")]
    EncryptedKeyRejected {
        /// Where the key came from.
        source_name: String,
    },

    /// The PEM payload is not a recognized private key.
    #[error("unable to parse SSH key {source_name}: {message}")]
    Unparseable {
        /// Where the key came from.
        source_name: String,
        /// Description of the parse failure.
        message: String,
    },
}

/// Session establishment error.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("cannot reach {user}@{address}:{port}: {cause}")]
pub struct ConnectionError {
    /// Remote address.
    pub address: String,
    /// Remote SSH port.
    pub port: u16,
    /// Login user.
    pub user: String,
    /// Network or authentication failure description.
    pub cause: String,
}

/// Errors raised by a remote command batch or file transfer.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RemoteExecutionError {
    /// The operation did not finish within its timeout.
    #[error("timed out after {timeout_secs}s during {operation}")]
    Timeout {
        /// What was running when the timeout fired.
        operation: String,
        /// The timeout budget in seconds.
        timeout_secs: u64,
    },

    /// A command exited with a non-zero status.
    #[error("command `{command}` exited with status {exit_code}")]
    NonZeroExit {
        /// The failing command.
        command: String,
        /// Exit status reported by the remote shell.
        exit_code: i32,
        /// Combined standard output and error of the command.
        output: String,
    },

    /// The remote file could not be written.
    #[error("cannot write {remote_path}: {message}")]
    RemoteWriteError {
        /// Destination path on the node.
        remote_path: String,
        /// Description of the failure.
        message: String,
    },

    /// The channel broke for a reason other than the above.
    #[error("session failure: {message}")]
    SessionFailure {
        /// Description of the failure.
        message: String,
    },
}

/// Plan loading errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PlanReadError {
    /// The plan file does not exist.
    #[error("plan file not found: {path}")]
    NotFound {
        /// Path to the missing file.
        path: PathBuf,
    },

    /// The plan file could not be parsed.
    #[error("failed to parse plan {location}: {message}")]
    ParseFailure {
        /// `path:line:column` of the failure, as precise as the parser allows.
        location: String,
        /// Description of the parse error.
        message: String,
    },

    /// The plan parsed but violates a structural invariant.
    #[error("invalid plan: {violated_invariant}")]
    InvalidPlan {
        /// The invariant that does not hold.
        violated_invariant: String,
        /// Plan field the violation was found in.
        field: Option<String>,
    },
}

/// Task-level errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TaskError {
    /// No task with this name exists in the catalog.
    #[error("unknown task '{name}' (known tasks: {known})")]
    UnknownTask {
        /// The requested name.
        name: String,
        /// Comma-separated list of catalog names.
        known: String,
    },

    /// The task's role predicate selected no node of the plan.
    #[error("task '{task}' targets no nodes: the plan has no {selector} nodes")]
    NoTargetNodes {
        /// Task name.
        task: String,
        /// Human-readable role predicate.
        selector: String,
    },

    /// A command template references a variable nobody defines.
    #[error("task '{task}' references undefined variable '{variable}'")]
    UnresolvedVariable {
        /// Task name.
        task: String,
        /// The undefined variable.
        variable: String,
    },

    /// At least one targeted node failed.
    #[error("task '{task}' failed on {} node(s): {}", failed_nodes.len(), failed_nodes.join(", "))]
    AggregateNodeFailure {
        /// Task name.
        task: String,
        /// Hostnames of the failed nodes.
        failed_nodes: Vec<String>,
    },
}

/// Engine or CLI configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// An `--extra-vars` entry is not a single `key=value` pair.
    #[error("bad request in extra-vars with {entry:?}: expected key=value")]
    BadExtraVars {
        /// The offending entry.
        entry: String,
    },

    /// A configuration value could not be used.
    #[error("invalid value {value:?} for {name}: {message}")]
    InvalidValue {
        /// Setting name.
        name: String,
        /// The rejected value.
        value: String,
        /// Why it was rejected.
        message: String,
    },
}

/// Run journal errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum JournalError {
    /// A record could not be written.
    #[error("cannot write run record {path}: {message}")]
    WriteFailed {
        /// Record path.
        path: PathBuf,
        /// Description of the failure.
        message: String,
    },

    /// A stored record could not be read back.
    #[error("corrupted run record {path}: {message}")]
    Corrupted {
        /// Record path.
        path: PathBuf,
        /// Description of the failure.
        message: String,
    },
}

/// Result type alias for fleetwright operations.
pub type Result<T> = std::result::Result<T, FleetError>;

impl KeyError {
    /// Returns the key source this error refers to.
    #[must_use]
    pub fn source_name(&self) -> &str {
        match self {
            Self::Malformed { source_name, .. }
            | Self::EncryptedKeyRejected { source_name }
            | Self::Unparseable { source_name, .. } => source_name,
        }
    }
}

impl RemoteExecutionError {
    /// Creates a timeout error for an operation.
    #[must_use]
    pub fn timeout(operation: impl Into<String>, timeout: std::time::Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_secs: timeout.as_secs(),
        }
    }

    /// Creates a session failure error.
    #[must_use]
    pub fn session(message: impl Into<String>) -> Self {
        Self::SessionFailure {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_fleet_error_prefixes_stage() {
        let key = FleetError::from(KeyError::EncryptedKeyRejected {
            source_name: String::from("id_rsa"),
        });
        assert_eq!(key.to_string(), "SSH key error: encrypted SSH key id_rsa is not permitted");

        let plan = FleetError::from(PlanReadError::InvalidPlan {
            violated_invariant: String::from("no masters"),
            field: Some(String::from("master.nodes")),
        });
        assert_eq!(plan.to_string(), "Plan error: invalid plan: no masters");
    }

    #[test]
    fn test_timeout_reports_whole_seconds() {
        let err = RemoteExecutionError::timeout("exec", Duration::from_millis(5500));
        assert_eq!(
            err,
            RemoteExecutionError::Timeout {
                operation: String::from("exec"),
                timeout_secs: 5,
            }
        );
    }

    #[test]
    fn test_aggregate_failure_message_names_nodes() {
        let err = TaskError::AggregateNodeFailure {
            task: String::from("storage"),
            failed_nodes: vec![String::from("node2"), String::from("node3")],
        };
        assert_eq!(
            err.to_string(),
            "task 'storage' failed on 2 node(s): node2, node3"
        );
    }

    #[test]
    fn test_bad_extra_vars_message() {
        let err = ConfigError::BadExtraVars {
            entry: String::from("foo"),
        };
        assert!(err.to_string().contains("\"foo\""));
        assert!(err.to_string().contains("key=value"));
    }
}

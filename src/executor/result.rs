//! Task run results.

use chrono::{DateTime, Utc};
use serde::ser::{SerializeStruct, Serializer};
use serde::Serialize;
use std::fmt::{self, Write};
use tracing::debug;
use uuid::Uuid;

use crate::error::{ConnectionError, RemoteExecutionError, TaskError};
use crate::ssh::CommandOutput;

use super::options::OutputFormat;

/// Lifecycle of a task run. There is no retry state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    /// Accepted, nothing done yet.
    Pending,
    /// Resolving the task, target nodes and keys.
    Resolving,
    /// Sessions are running.
    Dispatching,
    /// Collecting per-node outcomes.
    Aggregating,
    /// Every targeted node succeeded.
    Succeeded,
    /// At least one targeted node failed.
    Failed,
}

impl TaskState {
    /// Returns true if `next` may follow this state.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Resolving)
                | (Self::Resolving, Self::Dispatching)
                | (Self::Dispatching, Self::Aggregating)
                | (Self::Aggregating, Self::Succeeded | Self::Failed)
        )
    }

    /// Returns true for `Succeeded` and `Failed`.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Resolving => "resolving",
            Self::Dispatching => "dispatching",
            Self::Aggregating => "aggregating",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Tracks the state of one run and logs transitions.
#[derive(Debug)]
pub(crate) struct StateTracker {
    task: String,
    state: TaskState,
}

impl StateTracker {
    pub(crate) const fn new(task: String) -> Self {
        Self {
            task,
            state: TaskState::Pending,
        }
    }

    pub(crate) fn advance(&mut self, next: TaskState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "invalid transition {} -> {next}",
            self.state
        );
        debug!("Task '{}': {} -> {next}", self.task, self.state);
        self.state = next;
    }

    pub(crate) const fn state(&self) -> TaskState {
        self.state
    }
}

/// Why a node failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NodeFailure {
    /// No session could be opened.
    #[error(transparent)]
    Connection(#[from] ConnectionError),
    /// A command or transfer failed.
    #[error(transparent)]
    Remote(#[from] RemoteExecutionError),
    /// The run was cancelled before this node was dispatched.
    #[error("cancelled before dispatch")]
    Cancelled,
    /// The dispatch task ended abnormally.
    #[error("dispatch aborted: {0}")]
    Aborted(String),
}

impl NodeFailure {
    /// Short machine-readable kind.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Connection(_) => "connection",
            Self::Remote(RemoteExecutionError::Timeout { .. }) => "timeout",
            Self::Remote(RemoteExecutionError::NonZeroExit { .. }) => "non_zero_exit",
            Self::Remote(RemoteExecutionError::RemoteWriteError { .. }) => "remote_write",
            Self::Remote(RemoteExecutionError::SessionFailure { .. }) => "session",
            Self::Cancelled => "cancelled",
            Self::Aborted(_) => "aborted",
        }
    }

    /// Output captured by the failing command, if any.
    #[must_use]
    pub fn output(&self) -> Option<&str> {
        match self {
            Self::Remote(RemoteExecutionError::NonZeroExit { output, .. }) => Some(output.as_str()),
            _ => None,
        }
    }

    /// Returns true if the failure is a timeout.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Remote(RemoteExecutionError::Timeout { .. }))
    }
}

impl Serialize for NodeFailure {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("NodeFailure", 3)?;
        state.serialize_field("kind", self.kind())?;
        state.serialize_field("message", &self.to_string())?;
        state.serialize_field("output", &self.output())?;
        state.end()
    }
}

/// Outcome of one node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "cause", rename_all = "lowercase")]
pub enum NodeOutcome {
    /// Everything ran and exited zero.
    Success,
    /// The node failed.
    Failure(NodeFailure),
}

/// Result for one targeted node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeResult {
    /// Node hostname.
    pub hostname: String,
    /// Address used.
    pub address: String,
    /// Outcome.
    pub outcome: NodeOutcome,
    /// Output of the commands that completed.
    pub outputs: Vec<CommandOutput>,
    /// Bytes uploaded.
    pub bytes_transferred: u64,
    /// Wall time spent on the node in milliseconds.
    pub elapsed_ms: u64,
}

impl NodeResult {
    /// Creates a successful result.
    #[must_use]
    pub fn success(hostname: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            address: address.into(),
            outcome: NodeOutcome::Success,
            outputs: Vec::new(),
            bytes_transferred: 0,
            elapsed_ms: 0,
        }
    }

    /// Creates a failed result.
    #[must_use]
    pub fn failure(
        hostname: impl Into<String>,
        address: impl Into<String>,
        cause: impl Into<NodeFailure>,
    ) -> Self {
        Self {
            outcome: NodeOutcome::Failure(cause.into()),
            ..Self::success(hostname, address)
        }
    }

    /// Returns true if the node succeeded.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self.outcome, NodeOutcome::Success)
    }

    /// Returns the failure cause, if any.
    #[must_use]
    pub const fn failure_cause(&self) -> Option<&NodeFailure> {
        match &self.outcome {
            NodeOutcome::Success => None,
            NodeOutcome::Failure(cause) => Some(cause),
        }
    }
}

/// Result of one task run.
#[derive(Debug, Clone, Serialize)]
pub struct TaskResult {
    /// Unique run identifier.
    pub run_id: Uuid,
    /// Canonical task name.
    pub task: String,
    /// Cluster the task ran against.
    pub cluster_name: String,
    /// Fingerprint of the plan document.
    pub plan_fingerprint: String,
    /// Terminal state.
    pub state: TaskState,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// When the run finished.
    pub finished_at: DateTime<Utc>,
    /// Per-node results in target order.
    pub nodes: Vec<NodeResult>,
}

impl TaskResult {
    /// Returns true if every targeted node succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.state == TaskState::Succeeded
    }

    /// Returns the hostnames of the failed nodes.
    #[must_use]
    pub fn failed_nodes(&self) -> Vec<&str> {
        self.nodes
            .iter()
            .filter(|n| !n.is_success())
            .map(|n| n.hostname.as_str())
            .collect()
    }

    /// Number of successful nodes.
    #[must_use]
    pub fn succeeded_count(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_success()).count()
    }

    /// Number of failed nodes.
    #[must_use]
    pub fn failed_count(&self) -> usize {
        self.nodes.len() - self.succeeded_count()
    }

    /// Looks up the result of one node.
    #[must_use]
    pub fn node(&self, hostname: &str) -> Option<&NodeResult> {
        self.nodes.iter().find(|n| n.hostname == hostname)
    }

    /// Converts a failed run into [`TaskError::AggregateNodeFailure`].
    ///
    /// # Errors
    ///
    /// Returns the aggregate failure if any node failed.
    pub fn into_result(self) -> Result<Self, TaskError> {
        if self.is_success() {
            return Ok(self);
        }
        Err(TaskError::AggregateNodeFailure {
            failed_nodes: self.failed_nodes().into_iter().map(String::from).collect(),
            task: self.task,
        })
    }

    /// Renders the per-node report.
    ///
    /// `Simple` prints one status line per node and the failure cause;
    /// `Raw` adds every captured command output.
    #[must_use]
    pub fn render(&self, format: OutputFormat) -> String {
        let mut out = String::new();
        for node in &self.nodes {
            let status = if node.is_success() { "ok" } else { "FAILED" };
            let _ = writeln!(out, "{:<24} {status:<7} {}ms", node.hostname, node.elapsed_ms);

            if let Some(cause) = node.failure_cause() {
                let _ = writeln!(out, "  cause: {cause}");
            }

            if format == OutputFormat::Raw {
                for output in &node.outputs {
                    let _ = writeln!(out, "  $ {}", output.command);
                    for line in output.output.lines() {
                        let _ = writeln!(out, "    {line}");
                    }
                }
                if let Some(text) = node.failure_cause().and_then(NodeFailure::output) {
                    for line in text.lines() {
                        let _ = writeln!(out, "    {line}");
                    }
                }
            }
        }
        out
    }
}

impl fmt::Display for TaskResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "task '{}' {}: {} succeeded, {} failed",
            self.task,
            self.state,
            self.succeeded_count(),
            self.failed_count()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn result(nodes: Vec<NodeResult>) -> TaskResult {
        let state = if nodes.iter().all(NodeResult::is_success) {
            TaskState::Succeeded
        } else {
            TaskState::Failed
        };
        TaskResult {
            run_id: Uuid::new_v4(),
            task: String::from("storage"),
            cluster_name: String::from("test-cluster"),
            plan_fingerprint: String::new(),
            state,
            started_at: Utc::now(),
            finished_at: Utc::now(),
            nodes,
        }
    }

    fn non_zero() -> RemoteExecutionError {
        RemoteExecutionError::NonZeroExit {
            command: String::from("sudo cat /data/gv1/test-file2"),
            exit_code: 1,
            output: String::from("No such file or directory"),
        }
    }

    #[test]
    fn test_state_transitions() {
        assert!(TaskState::Pending.can_transition_to(TaskState::Resolving));
        assert!(TaskState::Aggregating.can_transition_to(TaskState::Failed));
        assert!(!TaskState::Failed.can_transition_to(TaskState::Dispatching));
        assert!(!TaskState::Dispatching.can_transition_to(TaskState::Succeeded));
        assert!(TaskState::Succeeded.is_terminal());
        assert!(!TaskState::Aggregating.is_terminal());
    }

    #[test]
    fn test_into_result_reports_failed_nodes() {
        let run = result(vec![
            NodeResult::success("node2", "10.0.0.2"),
            NodeResult::failure("node3", "10.0.0.3", non_zero()),
        ]);
        assert_eq!(run.succeeded_count(), 1);
        assert_eq!(run.failed_nodes(), vec!["node3"]);
        assert_eq!(run.to_string(), "task 'storage' failed: 1 succeeded, 1 failed");

        assert_eq!(
            run.into_result().expect_err("one node failed"),
            TaskError::AggregateNodeFailure {
                task: String::from("storage"),
                failed_nodes: vec![String::from("node3")],
            }
        );
    }

    #[test]
    fn test_render_formats() {
        let mut ok = NodeResult::success("node2", "10.0.0.2");
        ok.outputs.push(CommandOutput {
            command: String::from("hostname"),
            exit_code: 0,
            output: String::from("node2\n"),
        });
        let run = result(vec![
            ok,
            NodeResult::failure("node3", "10.0.0.3", non_zero()),
        ]);

        let simple = run.render(OutputFormat::Simple);
        assert!(simple.contains("node2"));
        assert!(simple.contains("FAILED"));
        assert!(simple.contains("exited with status 1"));
        assert!(!simple.contains("$ hostname"));

        let raw = run.render(OutputFormat::Raw);
        assert!(raw.contains("$ hostname"));
        assert!(raw.contains("No such file or directory"));
    }

    #[test]
    fn test_failure_serialization() {
        let node = NodeResult::failure(
            "node3",
            "10.0.0.3",
            RemoteExecutionError::timeout("sudo ansible-playbook", Duration::from_secs(5)),
        );
        let json = serde_json::to_value(&node).expect("serializes");

        assert_eq!(json["outcome"]["status"], "failure");
        assert_eq!(json["outcome"]["cause"]["kind"], "timeout");
        assert!(node.failure_cause().is_some_and(NodeFailure::is_timeout));

        let ok = serde_json::to_value(NodeResult::success("node2", "10.0.0.2")).expect("serializes");
        assert_eq!(ok["outcome"]["status"], "success");
    }
}

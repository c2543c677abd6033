//! Task execution against cluster nodes.
//!
//! This module handles:
//! - The catalog of named tasks and their command templates
//! - Per-run options and engine limits
//! - Bounded, fail-slow dispatch over SSH sessions
//! - Aggregating per-node outcomes into a [`TaskResult`]

mod options;
mod task;
mod request;
mod result;
mod fleet;

pub use options::{
    DEFAULT_GENERATED_ASSETS_DIR, EngineConfig, ExecutionOptions, OutputFormat, parse_extra_vars,
};
pub use task::{
    FileUpload, RenderedTask, TargetSelector, Task, TaskCatalog, normalize_task_name,
    render_template, shell_quote,
};
pub use request::{FileTransferRequest, NodeDispatch, RemoteCommandRequest};
pub use result::{NodeFailure, NodeOutcome, NodeResult, TaskResult, TaskState};
pub use fleet::{COPY_TASK_NAME, CancelToken, EXEC_TASK_NAME, FleetExecutor};

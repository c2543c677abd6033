//! Fleet executor.
//!
//! Resolves a task to its target nodes, validates their keys, renders the
//! per-node work and dispatches it with bounded concurrency. A failing node
//! never interrupts its siblings: every dispatch runs to completion (or its
//! own timeout) before the outcomes are aggregated.

use chrono::Utc;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{RemoteExecutionError, Result, TaskError};
use crate::plan::{Node, Plan};
use crate::ssh::{Connector, KeyValidator, Session};

use super::options::{EngineConfig, ExecutionOptions};
use super::request::NodeDispatch;
use super::result::{NodeFailure, NodeOutcome, NodeResult, StateTracker, TaskResult, TaskState};
use super::task::TaskCatalog;

/// Name recorded for ad-hoc command runs.
pub const EXEC_TASK_NAME: &str = "exec";

/// Name recorded for ad-hoc file copies.
pub const COPY_TASK_NAME: &str = "copy";

/// Cooperative cancellation flag shared between a caller and the executor.
///
/// Once cancelled, no new node dispatch starts; sessions already open run
/// to their own timeout.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// Creates a token that is not cancelled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Returns true once cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Run metadata that does not come from the dispatches.
struct RunContext {
    tracker: StateTracker,
    task: String,
    cluster_name: String,
    plan_fingerprint: String,
    started_at: chrono::DateTime<Utc>,
}

/// Executes tasks against the nodes of a plan.
pub struct FleetExecutor {
    connector: Arc<dyn Connector>,
    catalog: TaskCatalog,
    config: EngineConfig,
    keys: KeyValidator,
    cancel: CancelToken,
}

impl std::fmt::Debug for FleetExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FleetExecutor")
            .field("tasks", &self.catalog.len())
            .field("config", &self.config)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl FleetExecutor {
    /// Creates an executor with the built-in catalog and default limits.
    #[must_use]
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self {
            connector,
            catalog: TaskCatalog::builtin(),
            config: EngineConfig::default(),
            keys: KeyValidator::new(),
            cancel: CancelToken::new(),
        }
    }

    /// Replaces the task catalog.
    #[must_use]
    pub fn with_catalog(mut self, catalog: TaskCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    /// Sets the engine limits.
    #[must_use]
    pub const fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Uses an externally owned cancellation token.
    #[must_use]
    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Returns the engine limits.
    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Returns a handle to the cancellation token.
    #[must_use]
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Runs a catalog task against the nodes its role predicate selects.
    ///
    /// Node failures do not make this return `Err`: they are recorded in the
    /// returned [`TaskResult`], whose [`TaskResult::into_result`] turns them
    /// into [`TaskError::AggregateNodeFailure`].
    ///
    /// # Errors
    ///
    /// Returns an error before any connection is attempted if the task is
    /// unknown, selects no node, references an undefined variable, or if a
    /// targeted node's key fails validation.
    pub async fn run_task(
        &self,
        task_name: &str,
        plan: &Plan,
        opts: &ExecutionOptions,
    ) -> Result<TaskResult> {
        let started_at = Utc::now();
        let mut tracker = StateTracker::new(task_name.to_string());
        tracker.advance(TaskState::Resolving);

        let task = self.catalog.get(task_name)?;
        let nodes = task.selector.select(plan);
        if nodes.is_empty() {
            return Err(TaskError::NoTargetNodes {
                task: task.name.clone(),
                selector: task.selector.to_string(),
            }
            .into());
        }

        self.keys.validate_all(Plan::key_paths(nodes.iter().copied()))?;

        let command_timeout = task.timeout.unwrap_or(self.config.command_timeout);
        let dispatches = nodes
            .iter()
            .map(|node| -> std::result::Result<NodeDispatch, TaskError> {
                let rendered = task.render(plan, node, opts)?;
                let dispatch = rendered
                    .uploads
                    .into_iter()
                    .fold(NodeDispatch::new(node), |d, (local, remote)| {
                        d.with_transfer(local, remote, self.config.file_timeout)
                    })
                    .with_commands(rendered.commands, command_timeout);
                Ok(dispatch)
            })
            .collect::<std::result::Result<Vec<_>, TaskError>>()?;

        info!(
            "Running task '{}' on {} node(s) [{}]",
            task.name,
            dispatches.len(),
            task.selector
        );

        let context = RunContext {
            tracker,
            task: task.name.clone(),
            cluster_name: plan.cluster_name.clone(),
            plan_fingerprint: plan.fingerprint.clone(),
            started_at,
        };
        Ok(self.execute(context, dispatches).await)
    }

    /// Runs commands on explicit nodes, in order, within one timeout per node.
    ///
    /// # Errors
    ///
    /// Returns an error if `nodes` is empty or a key fails validation.
    pub async fn run_commands_on(
        &self,
        nodes: &[&Node],
        commands: &[String],
        timeout: Duration,
    ) -> Result<TaskResult> {
        let context = self.prepare_adhoc(EXEC_TASK_NAME, nodes)?;
        let dispatches = nodes
            .iter()
            .map(|node| NodeDispatch::new(node).with_commands(commands.to_vec(), timeout))
            .collect();
        Ok(self.execute(context, dispatches).await)
    }

    /// Copies a local file to explicit nodes.
    ///
    /// # Errors
    ///
    /// Returns an error if `nodes` is empty or a key fails validation.
    pub async fn copy_file_to(
        &self,
        nodes: &[&Node],
        local: &Path,
        remote: &str,
        timeout: Duration,
    ) -> Result<TaskResult> {
        let context = self.prepare_adhoc(COPY_TASK_NAME, nodes)?;
        let dispatches = nodes
            .iter()
            .map(|node| {
                NodeDispatch::new(node).with_transfer(local.to_path_buf(), remote.to_string(), timeout)
            })
            .collect();
        Ok(self.execute(context, dispatches).await)
    }

    fn prepare_adhoc(&self, name: &str, nodes: &[&Node]) -> Result<RunContext> {
        let started_at = Utc::now();
        let mut tracker = StateTracker::new(name.to_string());
        tracker.advance(TaskState::Resolving);

        if nodes.is_empty() {
            return Err(TaskError::NoTargetNodes {
                task: name.to_string(),
                selector: String::from("explicit"),
            }
            .into());
        }
        self.keys.validate_all(Plan::key_paths(nodes.iter().copied()))?;

        Ok(RunContext {
            tracker,
            task: name.to_string(),
            cluster_name: String::new(),
            plan_fingerprint: String::new(),
            started_at,
        })
    }

    async fn execute(&self, mut context: RunContext, dispatches: Vec<NodeDispatch>) -> TaskResult {
        context.tracker.advance(TaskState::Dispatching);
        let nodes = self.dispatch_all(dispatches).await;

        context.tracker.advance(TaskState::Aggregating);
        let failed = nodes.iter().filter(|n| !n.is_success()).count();
        if failed == 0 {
            context.tracker.advance(TaskState::Succeeded);
            info!("Task '{}' succeeded on {} node(s)", context.task, nodes.len());
        } else {
            context.tracker.advance(TaskState::Failed);
            error!(
                "Task '{}' failed on {failed} of {} node(s)",
                context.task,
                nodes.len()
            );
        }

        TaskResult {
            run_id: Uuid::new_v4(),
            task: context.task,
            cluster_name: context.cluster_name,
            plan_fingerprint: context.plan_fingerprint,
            state: context.tracker.state(),
            started_at: context.started_at,
            finished_at: Utc::now(),
            nodes,
        }
    }

    /// Runs every dispatch, at most `max_sessions` at once, and returns the
    /// results in dispatch order.
    async fn dispatch_all(&self, dispatches: Vec<NodeDispatch>) -> Vec<NodeResult> {
        let semaphore = Arc::new(Semaphore::new(self.config.max_sessions.max(1)));
        let identities: Vec<(String, String)> = dispatches
            .iter()
            .map(|d| (d.target.hostname.clone(), d.target.address.clone()))
            .collect();

        let mut set = JoinSet::new();
        for (index, dispatch) in dispatches.into_iter().enumerate() {
            let connector = Arc::clone(&self.connector);
            let semaphore = Arc::clone(&semaphore);
            let cancel = self.cancel.clone();
            let connect_timeout = self.config.connect_timeout;

            set.spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return (index, cancelled(&dispatch));
                };
                if cancel.is_cancelled() {
                    debug!("Skipping {}: run cancelled", dispatch.target.hostname);
                    return (index, cancelled(&dispatch));
                }
                (index, dispatch_node(connector.as_ref(), dispatch, connect_timeout).await)
            });
        }

        let mut slots: Vec<Option<NodeResult>> = vec![None; identities.len()];
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((index, result)) => {
                    if let Some(slot) = slots.get_mut(index) {
                        *slot = Some(result);
                    }
                }
                Err(e) => error!("Dispatch task ended abnormally: {e}"),
            }
        }

        slots
            .into_iter()
            .zip(identities)
            .map(|(slot, (hostname, address))| {
                slot.unwrap_or_else(|| {
                    NodeResult::failure(hostname, address, NodeFailure::Aborted(String::from("task panicked")))
                })
            })
            .collect()
    }
}

fn cancelled(dispatch: &NodeDispatch) -> NodeResult {
    NodeResult::failure(
        dispatch.target.hostname.as_str(),
        dispatch.target.address.as_str(),
        NodeFailure::Cancelled,
    )
}

/// Connects, runs the node's work and closes the session on every path.
async fn dispatch_node(
    connector: &dyn Connector,
    dispatch: NodeDispatch,
    connect_timeout: Duration,
) -> NodeResult {
    let started = Instant::now();
    let target = &dispatch.target;
    let mut result = NodeResult::success(target.hostname.as_str(), target.address.as_str());

    match connector.connect(target, connect_timeout).await {
        Ok(mut session) => {
            if let Err(e) = drive(session.as_mut(), &dispatch, &mut result).await {
                result.outcome = NodeOutcome::Failure(e.into());
            }
            session.close().await;
        }
        Err(e) => result.outcome = NodeOutcome::Failure(e.into()),
    }

    result.elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
    match result.failure_cause() {
        None => info!("{}: ok ({}ms)", target.hostname, result.elapsed_ms),
        Some(cause) => warn!("{}: {cause}", target.hostname),
    }
    result
}

/// Uploads first, then the command batch.
async fn drive(
    session: &mut dyn Session,
    dispatch: &NodeDispatch,
    result: &mut NodeResult,
) -> std::result::Result<(), RemoteExecutionError> {
    for transfer in &dispatch.transfers {
        result.bytes_transferred += session
            .put_file(&transfer.local_path, &transfer.remote_path, transfer.timeout)
            .await?;
    }
    if let Some(request) = &dispatch.commands {
        match session.run_commands(&request.commands, request.timeout).await {
            Ok(outputs) => result.outputs = outputs,
            Err(failure) => {
                result.outputs = failure.completed;
                return Err(failure.error);
            }
        }
    }
    Ok(())
}

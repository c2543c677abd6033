//! Task catalog and command templates.
//!
//! A [`Task`] binds a role predicate to command templates. Templates use
//! `{{ name }}` placeholders resolved per node from, in increasing
//! precedence: task defaults, node facts, cluster facts, engine flags and
//! the caller's extra variables.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::TaskError;
use crate::plan::{Node, Plan, Role};

use super::options::ExecutionOptions;

/// Aggregate variable carrying every effective variable to the automation.
pub const EXTRA_VARS_VARIABLE: &str = "extra_vars";

/// Default location of the automation plays on a node.
pub const DEFAULT_PLAYBOOK_DIR: &str = "/opt/fleetwright/playbooks";

/// Which nodes of a plan a task targets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetSelector {
    /// Every node of the plan.
    All,
    /// Nodes holding at least one of the roles.
    Roles(Vec<Role>),
}

impl TargetSelector {
    /// Selects the nodes holding `role`.
    #[must_use]
    pub fn role(role: Role) -> Self {
        Self::Roles(vec![role])
    }

    /// Resolves the selector against a plan.
    ///
    /// A single role keeps the group's plan order; everything else follows
    /// the node registry order.
    #[must_use]
    pub fn select<'a>(&self, plan: &'a Plan) -> Vec<&'a Node> {
        match self {
            Self::All => plan.all_nodes(),
            Self::Roles(roles) if roles.len() == 1 => plan.nodes_with_role(roles[0]),
            Self::Roles(roles) => plan
                .nodes()
                .iter()
                .filter(|n| roles.iter().any(|r| n.has_role(*r)))
                .collect(),
        }
    }
}

impl fmt::Display for TargetSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => write!(f, "all"),
            Self::Roles(roles) => {
                let names: Vec<_> = roles.iter().map(|r| r.as_str()).collect();
                write!(f, "{}", names.join("|"))
            }
        }
    }
}

/// A file pushed to each node before the task's commands run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileUpload {
    /// Local path template.
    pub local: String,
    /// Remote path template.
    pub remote: String,
}

/// A named unit of work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    /// Canonical task name.
    pub name: String,
    /// One-line description.
    pub description: String,
    /// Role predicate.
    pub selector: TargetSelector,
    /// Default variables.
    pub defaults: BTreeMap<String, String>,
    /// Variables that must be defined by the time the task renders.
    pub required: Vec<String>,
    /// Files uploaded before the commands, in order.
    pub uploads: Vec<FileUpload>,
    /// Ordered command templates.
    pub commands: Vec<String>,
    /// Command batch timeout; the engine default applies when unset.
    pub timeout: Option<Duration>,
}

/// A task rendered for one node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedTask {
    /// Uploads as `(local, remote)` pairs.
    pub uploads: Vec<(PathBuf, String)>,
    /// Commands ready to send.
    pub commands: Vec<String>,
}

impl Task {
    /// Creates an empty task.
    #[must_use]
    pub fn new(name: impl Into<String>, selector: TargetSelector) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            selector,
            defaults: BTreeMap::new(),
            required: Vec::new(),
            uploads: Vec::new(),
            commands: Vec::new(),
            timeout: None,
        }
    }

    /// Creates a task running one automation play on the local host of each
    /// targeted node.
    #[must_use]
    pub fn play(name: &str, selector: TargetSelector) -> Self {
        Self::new(name, selector)
            .with_default("playbook_dir", DEFAULT_PLAYBOOK_DIR)
            .with_default("ansible_playbook", "ansible-playbook")
            .with_command(format!(
                "sudo {{{{ ansible_playbook }}}} -i localhost, -c local \
                 {{{{ playbook_dir }}}}/_{name}.yaml --extra-vars {{{{ {EXTRA_VARS_VARIABLE} }}}}"
            ))
    }

    /// Sets the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Adds a default variable.
    #[must_use]
    pub fn with_default(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.defaults.insert(key.into(), value.into());
        self
    }

    /// Declares a variable the caller must provide.
    #[must_use]
    pub fn with_required(mut self, variable: impl Into<String>) -> Self {
        self.required.push(variable.into());
        self
    }

    /// Appends a command template.
    #[must_use]
    pub fn with_command(mut self, command: impl Into<String>) -> Self {
        self.commands.push(command.into());
        self
    }

    /// Appends a file upload.
    #[must_use]
    pub fn with_upload(mut self, local: impl Into<String>, remote: impl Into<String>) -> Self {
        self.uploads.push(FileUpload {
            local: local.into(),
            remote: remote.into(),
        });
        self
    }

    /// Sets the command batch timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Computes the effective variables for one node.
    #[must_use]
    pub fn variables(
        &self,
        plan: &Plan,
        node: &Node,
        opts: &ExecutionOptions,
    ) -> BTreeMap<String, String> {
        let mut vars = self.defaults.clone();

        let facts = [
            ("hostname", node.hostname.clone()),
            ("address", node.address.clone()),
            ("internal_address", node.internal_or_public_address().to_string()),
            ("roles", node.roles_label()),
            ("cluster_name", plan.cluster_name.clone()),
            ("primary_master", plan.primary_master_fqdn.clone()),
            (
                "allow_package_installation",
                plan.allow_package_installation.to_string(),
            ),
            ("restart_services", opts.restart_services.to_string()),
            ("verbose", opts.verbose.to_string()),
            (
                "generated_assets_dir",
                opts.generated_assets_dir.display().to_string(),
            ),
        ];
        for (key, value) in facts {
            vars.insert(key.to_string(), value);
        }

        vars.extend(opts.extra_vars.clone());
        vars
    }

    /// Renders uploads and commands for one node.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::UnresolvedVariable`] if a required variable is
    /// missing or a template references an undefined variable.
    pub fn render(
        &self,
        plan: &Plan,
        node: &Node,
        opts: &ExecutionOptions,
    ) -> Result<RenderedTask, TaskError> {
        let mut vars = self.variables(plan, node, opts);

        if let Some(missing) = self.required.iter().find(|v| !vars.contains_key(*v)) {
            return Err(self.unresolved(missing));
        }

        let aggregate = shell_quote(&serde_json::to_string(&vars).unwrap_or_default());
        vars.insert(EXTRA_VARS_VARIABLE.to_string(), aggregate);

        let render = |template: &str| render_template(template, &vars).map_err(|v| self.unresolved(&v));

        let uploads = self
            .uploads
            .iter()
            .map(|u| -> Result<(PathBuf, String), TaskError> {
                Ok((PathBuf::from(render(&u.local)?), render(&u.remote)?))
            })
            .collect::<Result<Vec<_>, TaskError>>()?;
        let commands = self
            .commands
            .iter()
            .map(|c| render(c))
            .collect::<Result<Vec<_>, TaskError>>()?;

        Ok(RenderedTask { uploads, commands })
    }

    fn unresolved(&self, variable: &str) -> TaskError {
        TaskError::UnresolvedVariable {
            task: self.name.clone(),
            variable: variable.to_string(),
        }
    }
}

/// Replaces `{{ name }}` placeholders.
///
/// Text without a closing `}}` is kept as is.
///
/// # Errors
///
/// Returns the name of the first undefined variable.
pub fn render_template(template: &str, vars: &BTreeMap<String, String>) -> Result<String, String> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        let Some(len) = rest[start + 2..].find("}}") else {
            break;
        };
        out.push_str(&rest[..start]);
        let name = rest[start + 2..start + 2 + len].trim();
        let value = vars.get(name).ok_or_else(|| name.to_string())?;
        out.push_str(value);
        rest = &rest[start + 2 + len + 2..];
    }

    out.push_str(rest);
    Ok(out)
}

/// Quotes a value for a POSIX shell.
#[must_use]
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Normalizes a task name: `_storage.yaml`, `storage.yaml` and `storage`
/// all name the same task.
#[must_use]
pub fn normalize_task_name(name: &str) -> String {
    let name = name.trim();
    let name = name
        .strip_suffix(".yaml")
        .or_else(|| name.strip_suffix(".yml"))
        .unwrap_or(name);
    name.trim_start_matches('_').to_ascii_lowercase()
}

/// The set of tasks the executor can run.
#[derive(Debug, Clone, Default)]
pub struct TaskCatalog {
    tasks: BTreeMap<String, Task>,
}

impl TaskCatalog {
    /// Creates an empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates the catalog of installation steps.
    #[must_use]
    pub fn builtin() -> Self {
        let mut catalog = Self::new();
        catalog.insert(
            Task::play("all", TargetSelector::All)
                .with_description("Run the complete installation on every node"),
        );
        catalog.insert(
            Task::play("hosts", TargetSelector::All)
                .with_description("Write cluster host entries on every node"),
        );
        catalog.insert(
            Task::play("packages", TargetSelector::All)
                .with_description("Install required OS packages"),
        );
        catalog.insert(
            Task::play(
                "docker",
                TargetSelector::Roles(vec![Role::Master, Role::Worker]),
            )
            .with_description("Install and configure the container runtime"),
        );
        catalog.insert(
            Task::play("etcd", TargetSelector::role(Role::Etcd))
                .with_description("Install the etcd cluster"),
        );
        catalog.insert(
            Task::play("master", TargetSelector::role(Role::Master))
                .with_description("Install the control plane"),
        );
        catalog.insert(
            Task::play("worker", TargetSelector::role(Role::Worker))
                .with_description("Join workers to the cluster"),
        );
        catalog.insert(
            Task::play("storage", TargetSelector::role(Role::Storage))
                .with_description("Set up the storage cluster"),
        );
        catalog.insert(
            Task::play("volume-add", TargetSelector::role(Role::Storage))
                .with_description("Create a replicated storage volume")
                .with_required("volume_name")
                .with_default("volume_mount", "/")
                .with_default("volume_replica_count", "2"),
        );
        catalog
    }

    /// Adds or replaces a task under its normalized name.
    pub fn insert(&mut self, mut task: Task) {
        task.name = normalize_task_name(&task.name);
        self.tasks.insert(task.name.clone(), task);
    }

    /// Looks up a task by any accepted spelling of its name.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::UnknownTask`] if no such task exists.
    pub fn get(&self, name: &str) -> Result<&Task, TaskError> {
        self.tasks
            .get(&normalize_task_name(name))
            .ok_or_else(|| TaskError::UnknownTask {
                name: name.to_string(),
                known: self.names().join(", "),
            })
    }

    /// Returns the task names in alphabetical order.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.tasks.keys().map(String::as_str).collect()
    }

    /// Iterates over the tasks.
    pub fn iter(&self) -> impl Iterator<Item = &Task> {
        self.tasks.values()
    }

    /// Returns the number of tasks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Returns true if the catalog is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

//! Plan file document types.
//!
//! These structs map one-to-one onto the persisted plan file. They carry
//! the document exactly as written; fallback resolution and invariant checks
//! happen when the file is turned into a [`Plan`](super::Plan).

use serde::{Deserialize, Serialize};

/// The root structure of a plan file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlanFile {
    /// Cluster-wide settings.
    pub cluster: ClusterSpec,
    /// Etcd node group.
    #[serde(default)]
    pub etcd: NodeGroupSpec,
    /// Master node group.
    #[serde(default)]
    pub master: MasterGroupSpec,
    /// Worker node group.
    #[serde(default)]
    pub worker: NodeGroupSpec,
    /// Storage node group (optional).
    #[serde(default)]
    pub storage: NodeGroupSpec,
}

/// Cluster-wide settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClusterSpec {
    /// Cluster name.
    #[serde(default = "default_cluster_name")]
    pub name: String,
    /// Whether tasks may install OS packages on the nodes.
    #[serde(default)]
    pub allow_package_installation: bool,
    /// Default SSH connection settings.
    pub ssh: SshSpec,
}

/// Plan-level SSH defaults.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SshSpec {
    /// Default login user.
    pub user: String,
    /// Path to the private key used for the whole plan.
    pub ssh_key: String,
    /// Default SSH port.
    #[serde(default = "default_ssh_port")]
    pub ssh_port: u16,
}

/// A plain group of nodes.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct NodeGroupSpec {
    /// Expected number of nodes (informational, checked when present).
    #[serde(default)]
    pub expected_count: Option<usize>,
    /// Nodes in the group.
    #[serde(default)]
    pub nodes: Vec<NodeSpec>,
}

/// The master group, which also names the primary master.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct MasterGroupSpec {
    /// Expected number of nodes (informational, checked when present).
    #[serde(default)]
    pub expected_count: Option<usize>,
    /// Fully qualified name of the primary master.
    #[serde(default, alias = "load_balanced_fqdn")]
    pub primary_master_fqdn: String,
    /// Short name of the primary master.
    #[serde(default, alias = "load_balanced_short_name")]
    pub primary_master_short_name: String,
    /// Nodes in the group.
    #[serde(default)]
    pub nodes: Vec<NodeSpec>,
}

/// A single node entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NodeSpec {
    /// Hostname, unique within the plan.
    pub host: String,
    /// Address used to reach the node over SSH.
    pub ip: String,
    /// Cluster-internal address, when different from `ip`.
    #[serde(default, alias = "internal_ip")]
    pub internalip: Option<String>,
    /// Login user override.
    #[serde(default)]
    pub ssh_user: Option<String>,
    /// SSH port override.
    #[serde(default)]
    pub ssh_port: Option<u16>,
    /// Private key path override.
    #[serde(default)]
    pub ssh_key: Option<String>,
}

fn default_cluster_name() -> String {
    String::from("kismatic-cluster")
}

const fn default_ssh_port() -> u16 {
    22
}

impl NodeGroupSpec {
    /// Creates a group from a list of nodes.
    #[must_use]
    pub const fn with_nodes(nodes: Vec<NodeSpec>) -> Self {
        Self {
            expected_count: None,
            nodes,
        }
    }
}

impl NodeSpec {
    /// Creates a node entry without connection overrides.
    #[must_use]
    pub fn new(host: impl Into<String>, ip: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            ip: ip.into(),
            internalip: None,
            ssh_user: None,
            ssh_port: None,
            ssh_key: None,
        }
    }
}

//! Typed plan model.
//!
//! A [`Plan`] is the validated, immutable form of a plan file: a registry of
//! [`Node`]s carrying role tags plus the ordered role groups. Connection
//! defaults from the cluster section are resolved into every node when the
//! plan is built, so nothing reads plan-level SSH settings during dispatch.

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::{Path, PathBuf};

use crate::error::PlanReadError;

use super::spec::{NodeSpec, PlanFile};
use super::validator::PlanValidator;

/// Role a node plays in the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Etcd member.
    Etcd,
    /// Control plane node.
    Master,
    /// Workload node.
    Worker,
    /// Storage node.
    Storage,
}

impl Role {
    /// Returns the lowercase role name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Etcd => "etcd",
            Self::Master => "master",
            Self::Worker => "worker",
            Self::Storage => "storage",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "etcd" => Ok(Self::Etcd),
            "master" => Ok(Self::Master),
            "worker" => Ok(Self::Worker),
            "storage" => Ok(Self::Storage),
            other => Err(format!(
                "unknown role '{other}' (expected etcd, master, worker or storage)"
            )),
        }
    }
}

/// One addressable cluster machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Node {
    /// Hostname, the node's identity within a plan.
    pub hostname: String,
    /// Address used for SSH.
    pub address: String,
    /// Cluster-internal address, if different.
    pub internal_address: Option<String>,
    /// Login user after fallback resolution.
    pub ssh_user: String,
    /// SSH port after fallback resolution.
    pub ssh_port: u16,
    /// Private key path after fallback resolution.
    pub ssh_key_path: PathBuf,
    /// Roles held by this node.
    pub roles: BTreeSet<Role>,
}

impl Node {
    /// Returns true if the node holds the given role.
    #[must_use]
    pub fn has_role(&self, role: Role) -> bool {
        self.roles.contains(&role)
    }

    /// Returns the internal address, or the SSH address when none is set.
    #[must_use]
    pub fn internal_or_public_address(&self) -> &str {
        self.internal_address.as_deref().unwrap_or(&self.address)
    }

    /// Returns the roles as a comma-separated string.
    #[must_use]
    pub fn roles_label(&self) -> String {
        self.roles
            .iter()
            .map(|r| r.as_str())
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// Validated cluster topology.
#[derive(Debug, Clone, Serialize)]
pub struct Plan {
    /// Cluster name.
    pub cluster_name: String,
    /// Primary master FQDN.
    pub primary_master_fqdn: String,
    /// Primary master short name.
    pub primary_master_short_name: String,
    /// Whether package installation is allowed.
    pub allow_package_installation: bool,
    /// Plan-level default SSH user.
    pub default_ssh_user: String,
    /// Plan-level default SSH port.
    pub default_ssh_port: u16,
    /// Plan-level SSH key path.
    pub ssh_key_path: PathBuf,
    /// SHA-256 of the document the plan was read from (empty when built in memory).
    pub fingerprint: String,
    /// Flat node registry, in first-seen order.
    nodes: Vec<Node>,
    /// Hostnames per role group, in plan order.
    groups: BTreeMap<Role, Vec<String>>,
}

impl Plan {
    /// Builds a plan from a parsed plan file.
    ///
    /// # Errors
    ///
    /// Returns [`PlanReadError::InvalidPlan`] naming the first violated
    /// invariant.
    pub fn from_spec(spec: &PlanFile) -> Result<Self, PlanReadError> {
        PlanValidator::new().validate(spec)?;

        let ssh = &spec.cluster.ssh;
        let mut nodes: Vec<Node> = Vec::new();
        let mut groups: BTreeMap<Role, Vec<String>> = BTreeMap::new();

        let role_groups: [(Role, &[NodeSpec]); 4] = [
            (Role::Etcd, &spec.etcd.nodes),
            (Role::Master, &spec.master.nodes),
            (Role::Worker, &spec.worker.nodes),
            (Role::Storage, &spec.storage.nodes),
        ];

        for (role, members) in role_groups {
            let group = groups.entry(role).or_default();
            for member in members {
                if let Some(existing) = nodes.iter_mut().find(|n| n.hostname == member.host) {
                    existing.roles.insert(role);
                } else {
                    nodes.push(Node {
                        hostname: member.host.clone(),
                        address: member.ip.clone(),
                        internal_address: member.internalip.clone().filter(|ip| !ip.is_empty()),
                        ssh_user: member.ssh_user.clone().unwrap_or_else(|| ssh.user.clone()),
                        ssh_port: member.ssh_port.unwrap_or(ssh.ssh_port),
                        ssh_key_path: PathBuf::from(
                            member.ssh_key.as_deref().unwrap_or(&ssh.ssh_key),
                        ),
                        roles: BTreeSet::from([role]),
                    });
                }
                if !group.contains(&member.host) {
                    group.push(member.host.clone());
                }
            }
        }

        Ok(Self {
            cluster_name: spec.cluster.name.clone(),
            primary_master_fqdn: spec.master.primary_master_fqdn.clone(),
            primary_master_short_name: spec.master.primary_master_short_name.clone(),
            allow_package_installation: spec.cluster.allow_package_installation,
            default_ssh_user: ssh.user.clone(),
            default_ssh_port: ssh.ssh_port,
            ssh_key_path: PathBuf::from(&ssh.ssh_key),
            fingerprint: String::new(),
            nodes,
            groups,
        })
    }

    /// Attaches the fingerprint of the source document.
    #[must_use]
    pub fn with_fingerprint(mut self, fingerprint: impl Into<String>) -> Self {
        self.fingerprint = fingerprint.into();
        self
    }

    /// Returns the flat node registry.
    #[must_use]
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Looks up a node by hostname.
    #[must_use]
    pub fn node(&self, hostname: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.hostname == hostname)
    }

    /// Returns the hostnames of a role group, in plan order.
    #[must_use]
    pub fn role_group(&self, role: Role) -> &[String] {
        self.groups.get(&role).map_or(&[], Vec::as_slice)
    }

    /// Returns the nodes holding a role, in the group's plan order.
    #[must_use]
    pub fn nodes_with_role(&self, role: Role) -> Vec<&Node> {
        self.role_group(role)
            .iter()
            .filter_map(|host| self.node(host))
            .collect()
    }

    /// Returns the union of all role groups with duplicates removed.
    #[must_use]
    pub fn all_nodes(&self) -> Vec<&Node> {
        self.nodes.iter().collect()
    }

    /// Returns the distinct key paths used by the given nodes.
    #[must_use]
    pub fn key_paths<'a>(nodes: impl IntoIterator<Item = &'a Node>) -> Vec<&'a Path> {
        let mut seen = HashSet::new();
        nodes
            .into_iter()
            .map(|n| n.ssh_key_path.as_path())
            .filter(|p| seen.insert(*p))
            .collect()
    }

    /// Returns the number of distinct nodes.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::sample_spec;

    #[test]
    fn test_roles_merge_by_hostname() {
        let plan = Plan::from_spec(&sample_spec(&[])).expect("valid plan");

        assert_eq!(plan.node_count(), 3);
        let node1 = plan.node("node1").expect("node1 present");
        assert!(node1.has_role(Role::Etcd));
        assert!(node1.has_role(Role::Master));
        assert!(!node1.has_role(Role::Worker));
        assert_eq!(node1.roles_label(), "etcd,master");
    }

    #[test]
    fn test_all_nodes_deduplicated_in_plan_order() {
        let plan = Plan::from_spec(&sample_spec(&["node2"])).expect("valid plan");
        let hosts: Vec<_> = plan.all_nodes().iter().map(|n| n.hostname.as_str()).collect();
        assert_eq!(hosts, vec!["node1", "node2", "node3"]);

        let storage: Vec<_> = plan
            .nodes_with_role(Role::Storage)
            .iter()
            .map(|n| n.hostname.as_str())
            .collect();
        assert_eq!(storage, vec!["node2"]);
    }

    #[test]
    fn test_connection_fallback_resolved_at_build() {
        let mut spec = sample_spec(&[]);
        spec.worker.nodes[0].ssh_user = Some(String::from("centos"));
        spec.worker.nodes[0].ssh_port = Some(2222);
        spec.worker.nodes[0].ssh_key = Some(String::from("/keys/other.pem"));

        let plan = Plan::from_spec(&spec).expect("valid plan");
        let node2 = plan.node("node2").expect("node2 present");
        assert_eq!(node2.ssh_user, "centos");
        assert_eq!(node2.ssh_port, 2222);
        assert_eq!(node2.ssh_key_path, PathBuf::from("/keys/other.pem"));

        let node3 = plan.node("node3").expect("node3 present");
        assert_eq!(node3.ssh_user, "ubuntu");
        assert_eq!(node3.ssh_port, 22);
        assert_eq!(node3.ssh_key_path, PathBuf::from("/keys/cluster.pem"));

        let keys = Plan::key_paths(plan.all_nodes());
        assert_eq!(keys.len(), 2);
    }

    #[test]
    fn test_role_parse() {
        assert_eq!("Storage".parse::<Role>(), Ok(Role::Storage));
        assert!("gpu".parse::<Role>().is_err());
    }
}

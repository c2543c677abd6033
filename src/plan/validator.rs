//! Structural validation of plan files.
//!
//! Every check runs before a [`Plan`](super::Plan) is built, so the executor
//! never sees a plan that violates the topology invariants.

use std::collections::HashMap;
use tracing::{debug, warn};

use crate::error::PlanReadError;

use super::spec::{NodeSpec, PlanFile, SshSpec};

/// Validator for plan files.
#[derive(Debug, Default)]
pub struct PlanValidator;

/// Validation result containing all errors found.
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// List of validation errors.
    pub errors: Vec<ValidationError>,
    /// List of warnings (non-fatal issues).
    pub warnings: Vec<String>,
}

/// A single validation error.
#[derive(Debug)]
pub struct ValidationError {
    /// The field path that failed validation.
    pub field: String,
    /// The error message.
    pub message: String,
}

impl PlanValidator {
    /// Creates a new validator.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Validates a plan file.
    ///
    /// # Errors
    ///
    /// Returns [`PlanReadError::InvalidPlan`] for the first violation found.
    pub fn validate(&self, plan: &PlanFile) -> Result<ValidationResult, PlanReadError> {
        let result = self.check(plan);

        if let Some(first_error) = result.errors.first() {
            return Err(PlanReadError::InvalidPlan {
                violated_invariant: first_error.message.clone(),
                field: Some(first_error.field.clone()),
            });
        }

        for warning in &result.warnings {
            warn!("Plan warning: {warning}");
        }
        debug!("Plan validation passed");
        Ok(result)
    }

    /// Runs every check and collects all findings without failing.
    #[must_use]
    pub fn check(&self, plan: &PlanFile) -> ValidationResult {
        let mut result = ValidationResult::default();

        Self::validate_cluster(plan, &mut result);
        Self::validate_topology(plan, &mut result);
        Self::validate_nodes(plan, &mut result);
        Self::validate_primary_master(plan, &mut result);

        result
    }

    /// Validates cluster-wide settings.
    fn validate_cluster(plan: &PlanFile, result: &mut ValidationResult) {
        if plan.cluster.name.trim().is_empty() {
            result.error("cluster.name", "Cluster name cannot be empty");
        }
        if plan.cluster.ssh.ssh_port == 0 {
            result.error("cluster.ssh.ssh_port", "SSH port cannot be 0");
        }
    }

    /// Validates the minimum topology and expected counts.
    fn validate_topology(plan: &PlanFile, result: &mut ValidationResult) {
        let required = [
            ("etcd.nodes", plan.etcd.nodes.len()),
            ("master.nodes", plan.master.nodes.len()),
            ("worker.nodes", plan.worker.nodes.len()),
        ];
        for (field, count) in required {
            if count == 0 {
                result.error(field, format!("At least one node is required in {field}"));
            }
        }

        let expected = [
            ("etcd", plan.etcd.expected_count, plan.etcd.nodes.len()),
            ("master", plan.master.expected_count, plan.master.nodes.len()),
            ("worker", plan.worker.expected_count, plan.worker.nodes.len()),
            ("storage", plan.storage.expected_count, plan.storage.nodes.len()),
        ];
        for (group, expected_count, actual) in expected {
            if let Some(expected_count) = expected_count
                && expected_count != actual
            {
                result.error(
                    format!("{group}.expected_count"),
                    format!("{group} expects {expected_count} node(s) but {actual} are listed"),
                );
            }
        }
    }

    /// Validates individual nodes and cross-group consistency.
    fn validate_nodes(plan: &PlanFile, result: &mut ValidationResult) {
        let mut registry: HashMap<&str, (&str, &NodeSpec)> = HashMap::new();

        for (group, nodes) in groups(plan) {
            let mut seen_in_group = Vec::new();
            for (i, node) in nodes.iter().enumerate() {
                let prefix = format!("{group}.nodes[{i}]");

                if node.host.trim().is_empty() {
                    result.error(format!("{prefix}.host"), "Node hostname cannot be empty");
                    continue;
                }
                if node.ip.trim().is_empty() {
                    result.error(
                        format!("{prefix}.ip"),
                        format!("Node '{}' has no address", node.host),
                    );
                }
                if node.ssh_port == Some(0) {
                    result.error(
                        format!("{prefix}.ssh_port"),
                        format!("Node '{}' has SSH port 0", node.host),
                    );
                }
                let user = node.ssh_user.as_deref().unwrap_or(&plan.cluster.ssh.user);
                if user.trim().is_empty() {
                    result.error(
                        format!("{prefix}.ssh_user"),
                        format!("Node '{}' has no SSH user and the plan sets no default", node.host),
                    );
                }
                let key = node.ssh_key.as_deref().unwrap_or(&plan.cluster.ssh.ssh_key);
                if key.trim().is_empty() {
                    result.error(
                        format!("{prefix}.ssh_key"),
                        format!("Node '{}' has no SSH key and the plan sets no default", node.host),
                    );
                }

                if seen_in_group.contains(&node.host.as_str()) {
                    result.warnings.push(format!(
                        "Node '{}' is listed more than once in {group}",
                        node.host
                    ));
                } else {
                    seen_in_group.push(node.host.as_str());
                }

                match registry.get(node.host.as_str()) {
                    Some((first_group, first)) if !same_connection(&plan.cluster.ssh, first, node) => {
                        result.error(
                            format!("{prefix}.host"),
                            format!(
                                "Node '{}' in {group} has different connection details than in {first_group}",
                                node.host
                            ),
                        );
                    }
                    Some(_) => {}
                    None => {
                        registry.insert(node.host.as_str(), (group, node));
                    }
                }
            }
        }
    }

    /// Validates that the primary master is a member of the master group.
    fn validate_primary_master(plan: &PlanFile, result: &mut ValidationResult) {
        let fqdn = plan.master.primary_master_fqdn.trim();
        if fqdn.is_empty() {
            result.error(
                "master.primary_master_fqdn",
                "The primary master must be set",
            );
            return;
        }

        let Some(primary) = plan
            .master
            .nodes
            .iter()
            .find(|n| n.host == fqdn || n.ip == fqdn)
        else {
            result.error(
                "master.primary_master_fqdn",
                format!("Primary master '{fqdn}' is not a member of master.nodes"),
            );
            return;
        };

        let short_name = plan.master.primary_master_short_name.trim();
        if !short_name.is_empty() {
            let first_label = primary.host.split('.').next().unwrap_or(&primary.host);
            if short_name != primary.host && short_name != first_label {
                result.error(
                    "master.primary_master_short_name",
                    format!(
                        "Primary master short name '{short_name}' does not match master '{}'",
                        primary.host
                    ),
                );
            }
        }
    }
}

impl ValidationResult {
    /// Returns true if no errors were found.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    fn error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.push(ValidationError {
            field: field.into(),
            message: message.into(),
        });
    }
}

fn groups(plan: &PlanFile) -> [(&'static str, &[NodeSpec]); 4] {
    [
        ("etcd", &plan.etcd.nodes),
        ("master", &plan.master.nodes),
        ("worker", &plan.worker.nodes),
        ("storage", &plan.storage.nodes),
    ]
}

fn same_connection(defaults: &SshSpec, a: &NodeSpec, b: &NodeSpec) -> bool {
    connection(defaults, a) == connection(defaults, b)
}

/// Address, user, port and key a node is reached with, after falling back
/// to the plan defaults.
fn connection<'a>(defaults: &'a SshSpec, node: &'a NodeSpec) -> (&'a str, &'a str, u16, &'a str) {
    (
        node.ip.as_str(),
        node.ssh_user.as_deref().unwrap_or(&defaults.user),
        node.ssh_port.unwrap_or(defaults.ssh_port),
        node.ssh_key.as_deref().unwrap_or(&defaults.ssh_key),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::spec::NodeSpec;
    use crate::test_support::sample_spec;

    fn violation(plan: &PlanFile) -> String {
        match PlanValidator::new().validate(plan) {
            Err(PlanReadError::InvalidPlan {
                violated_invariant, ..
            }) => violated_invariant,
            other => panic!("expected InvalidPlan, got {other:?}"),
        }
    }

    #[test]
    fn test_valid_plan_passes() {
        let result = PlanValidator::new().validate(&sample_spec(&["node2", "node3"]));
        assert!(result.is_ok());
    }

    #[test]
    fn test_primary_master_must_be_member() {
        let mut plan = sample_spec(&[]);
        plan.master.primary_master_fqdn = String::from("node9");
        plan.master.primary_master_short_name = String::new();

        assert!(violation(&plan).contains("not a member of master.nodes"));
    }

    #[test]
    fn test_primary_master_matches_by_address() {
        let mut plan = sample_spec(&[]);
        plan.master.primary_master_fqdn = String::from("10.0.0.1");
        plan.master.primary_master_short_name = String::from("node1");

        assert!(PlanValidator::new().validate(&plan).is_ok());
    }

    #[test]
    fn test_short_name_accepts_first_label() {
        let mut plan = sample_spec(&[]);
        plan.master.nodes[0].host = String::from("node1.example.com");
        plan.etcd.nodes[0].host = String::from("node1.example.com");
        plan.master.primary_master_fqdn = String::from("node1.example.com");
        plan.master.primary_master_short_name = String::from("node1");

        assert!(PlanValidator::new().validate(&plan).is_ok());
    }

    #[test]
    fn test_missing_primary_master() {
        let mut plan = sample_spec(&[]);
        plan.master.primary_master_fqdn = String::new();
        assert!(violation(&plan).contains("must be set"));
    }

    #[test]
    fn test_minimum_topology() {
        let mut plan = sample_spec(&[]);
        plan.worker.nodes.clear();
        assert!(violation(&plan).contains("worker.nodes"));
    }

    #[test]
    fn test_conflicting_connection_details() {
        let mut plan = sample_spec(&[]);
        plan.storage.nodes.push(NodeSpec::new("node2", "10.9.9.9"));

        assert!(violation(&plan).contains("different connection details"));
    }

    #[test]
    fn test_explicit_defaults_are_same_connection() {
        let mut plan = sample_spec(&[]);
        plan.etcd.nodes[0].ssh_user = Some(plan.cluster.ssh.user.clone());
        plan.etcd.nodes[0].ssh_port = Some(plan.cluster.ssh.ssh_port);
        assert!(PlanValidator::new().validate(&plan).is_ok());

        plan.etcd.nodes[0].ssh_port = Some(2222);
        assert!(violation(&plan).contains("different connection details"));
    }

    #[test]
    fn test_expected_count_mismatch() {
        let mut plan = sample_spec(&[]);
        plan.worker.expected_count = Some(3);
        assert!(violation(&plan).contains("expects 3"));
    }

    #[test]
    fn test_missing_key_reported() {
        let mut plan = sample_spec(&[]);
        plan.cluster.ssh.ssh_key = String::new();
        let result = PlanValidator::new().check(&plan);
        assert!(!result.is_valid());
        assert!(result.errors.iter().any(|e| e.field.ends_with("ssh_key")));
    }

    #[test]
    fn test_duplicate_in_group_is_warning() {
        let mut plan = sample_spec(&[]);
        plan.worker.nodes.push(NodeSpec::new("node2", "10.0.0.2"));
        let result = PlanValidator::new().check(&plan);
        assert!(result.is_valid());
        assert_eq!(result.warnings.len(), 1);
    }
}

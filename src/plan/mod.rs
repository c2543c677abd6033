//! Plan module for cluster topology.
//!
//! This module handles everything about the plan file:
//! - Deserializing the persisted plan document
//! - Validating the topology invariants
//! - Building the immutable, typed [`Plan`] handed to the executor

mod spec;
mod model;
mod parser;
mod validator;
mod hash;
mod planner;

pub use spec::{ClusterSpec, MasterGroupSpec, NodeGroupSpec, NodeSpec, PlanFile, SshSpec};
pub use model::{Node, Plan, Role};
pub use parser::PlanParser;
pub use validator::{PlanValidator, ValidationError, ValidationResult};
pub use hash::PlanHasher;
pub use planner::{DEFAULT_PLAN_FILE, FilePlanner, Planner};

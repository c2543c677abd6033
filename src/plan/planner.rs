//! Planner trait and the file-backed implementation.

use std::path::{Path, PathBuf};
use tracing::info;

use crate::error::PlanReadError;

use super::hash::PlanHasher;
use super::model::Plan;
use super::parser::PlanParser;

/// Default plan file name.
pub const DEFAULT_PLAN_FILE: &str = "kismatic-cluster.yaml";

/// Source of validated plans.
///
/// Each call to [`Planner::read`] produces a fresh [`Plan`]; nothing is
/// cached between task runs.
pub trait Planner: Send + Sync {
    /// Reads and validates the plan.
    ///
    /// # Errors
    ///
    /// Returns [`PlanReadError`] if the plan cannot be parsed or violates a
    /// structural invariant.
    fn read(&self) -> Result<Plan, PlanReadError>;

    /// Returns true if a persisted plan exists.
    fn exists(&self) -> bool;
}

/// Planner reading a YAML plan file from disk.
#[derive(Debug, Clone)]
pub struct FilePlanner {
    /// Path to the plan file.
    file: PathBuf,
}

impl FilePlanner {
    /// Creates a planner for the given file.
    #[must_use]
    pub fn new(file: impl Into<PathBuf>) -> Self {
        Self { file: file.into() }
    }

    /// Returns the plan file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.file
    }
}

impl Planner for FilePlanner {
    fn read(&self) -> Result<Plan, PlanReadError> {
        let (spec, content) = PlanParser::new().load_file(&self.file)?;
        let fingerprint = PlanHasher::new().fingerprint(&content);
        let plan = Plan::from_spec(&spec)?.with_fingerprint(fingerprint);

        info!(
            "Plan '{}' loaded: {} node(s), fingerprint {}",
            plan.cluster_name,
            plan.node_count(),
            PlanHasher::short(&plan.fingerprint)
        );
        Ok(plan)
    }

    fn exists(&self) -> bool {
        self.file.exists()
    }
}

//! Plan file parser.
//!
//! Loads the YAML plan document and reports parse failures with the
//! `path:line:column` they occurred at.

use std::path::Path;
use tracing::{debug, info};

use crate::error::PlanReadError;

use super::spec::PlanFile;

/// Parser for plan files.
#[derive(Debug, Default)]
pub struct PlanParser;

impl PlanParser {
    /// Creates a new plan parser.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Loads a plan from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing, unreadable or not valid YAML.
    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<(PlanFile, String), PlanReadError> {
        let path = path.as_ref();
        info!("Reading plan from: {}", path.display());

        if !path.exists() {
            return Err(PlanReadError::NotFound {
                path: path.to_path_buf(),
            });
        }

        let content = std::fs::read_to_string(path).map_err(|e| PlanReadError::ParseFailure {
            location: path.display().to_string(),
            message: format!("Failed to read file: {e}"),
        })?;

        let plan = self.parse_yaml(&content, Some(path))?;
        Ok((plan, content))
    }

    /// Parses a plan from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns [`PlanReadError::ParseFailure`] if the YAML does not
    /// deserialize into a plan.
    pub fn parse_yaml(&self, content: &str, source: Option<&Path>) -> Result<PlanFile, PlanReadError> {
        debug!("Parsing YAML plan");

        let plan: PlanFile = serde_yaml::from_str(content).map_err(|e| {
            let name = source.map_or_else(|| String::from("<inline>"), |p| p.display().to_string());
            let location = e.location().map_or(name.clone(), |loc| {
                format!("{name}:{}:{}", loc.line(), loc.column())
            });
            PlanReadError::ParseFailure {
                location,
                message: e.to_string(),
            }
        })?;

        debug!("Parsed plan for cluster: {}", plan.cluster.name);
        Ok(plan)
    }
}

//! Execution options and engine configuration.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

use crate::error::ConfigError;

/// Default directory for generated assets.
pub const DEFAULT_GENERATED_ASSETS_DIR: &str = "generated";

/// Default number of concurrent sessions.
pub const DEFAULT_MAX_SESSIONS: usize = 8;

/// Default connect timeout in seconds.
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 30;

/// Default command batch timeout in seconds.
pub const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 30 * 60;

/// Default file transfer timeout in seconds.
pub const DEFAULT_FILE_TIMEOUT_SECS: u64 = 5 * 60;

/// How task results are rendered.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// One status line per node, plus the failure cause.
    #[default]
    Simple,
    /// Complete command output of every node.
    Raw,
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Simple => write!(f, "simple"),
            Self::Raw => write!(f, "raw"),
        }
    }
}

/// Per-run options supplied by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutionOptions {
    /// Where generated assets and run records live.
    pub generated_assets_dir: PathBuf,
    /// Force cluster services to restart.
    pub restart_services: bool,
    /// Result rendering.
    pub output_format: OutputFormat,
    /// Verbose automation output.
    pub verbose: bool,
    /// Variables overriding everything else.
    pub extra_vars: BTreeMap<String, String>,
}

impl Default for ExecutionOptions {
    fn default() -> Self {
        Self {
            generated_assets_dir: PathBuf::from(DEFAULT_GENERATED_ASSETS_DIR),
            restart_services: false,
            output_format: OutputFormat::Simple,
            verbose: false,
            extra_vars: BTreeMap::new(),
        }
    }
}

impl ExecutionOptions {
    /// Creates options with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the generated assets directory.
    #[must_use]
    pub fn with_generated_assets_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.generated_assets_dir = dir.into();
        self
    }

    /// Sets whether services are restarted.
    #[must_use]
    pub const fn with_restart_services(mut self, restart: bool) -> Self {
        self.restart_services = restart;
        self
    }

    /// Sets the output format.
    #[must_use]
    pub const fn with_output_format(mut self, format: OutputFormat) -> Self {
        self.output_format = format;
        self
    }

    /// Sets verbose mode.
    #[must_use]
    pub const fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Sets one extra variable.
    #[must_use]
    pub fn with_extra_var(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_vars.insert(key.into(), value.into());
        self
    }

    /// Replaces all extra variables.
    #[must_use]
    pub fn with_extra_vars(mut self, vars: BTreeMap<String, String>) -> Self {
        self.extra_vars = vars;
        self
    }
}

/// Parses `key=value` entries into a variable map.
///
/// Each entry must contain exactly one `=` and a non-empty key. Later
/// entries win on duplicate keys.
///
/// # Errors
///
/// Returns [`ConfigError::BadExtraVars`] naming the first bad entry.
pub fn parse_extra_vars<S: AsRef<str>>(entries: &[S]) -> Result<BTreeMap<String, String>, ConfigError> {
    let mut vars = BTreeMap::new();
    for entry in entries {
        let entry = entry.as_ref();
        let mut parts = entry.split('=');
        let (Some(key), Some(value), None) = (parts.next(), parts.next(), parts.next()) else {
            return Err(ConfigError::BadExtraVars {
                entry: entry.to_string(),
            });
        };
        let key = key.trim();
        if key.is_empty() {
            return Err(ConfigError::BadExtraVars {
                entry: entry.to_string(),
            });
        }
        vars.insert(key.to_string(), value.to_string());
    }
    Ok(vars)
}

/// Engine-wide limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    /// Maximum number of sessions open at once.
    pub max_sessions: usize,
    /// Budget for connecting and authenticating.
    pub connect_timeout: Duration,
    /// Default budget for a command batch.
    pub command_timeout: Duration,
    /// Default budget for one file transfer.
    pub file_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_sessions: DEFAULT_MAX_SESSIONS,
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            command_timeout: Duration::from_secs(DEFAULT_COMMAND_TIMEOUT_SECS),
            file_timeout: Duration::from_secs(DEFAULT_FILE_TIMEOUT_SECS),
        }
    }
}

impl EngineConfig {
    /// Environment variable for the session limit.
    pub const ENV_MAX_SESSIONS: &'static str = "FLEETWRIGHT_MAX_SESSIONS";
    /// Environment variable for the connect timeout.
    pub const ENV_CONNECT_TIMEOUT: &'static str = "FLEETWRIGHT_CONNECT_TIMEOUT_SECS";
    /// Environment variable for the command timeout.
    pub const ENV_COMMAND_TIMEOUT: &'static str = "FLEETWRIGHT_COMMAND_TIMEOUT_SECS";
    /// Environment variable for the file transfer timeout.
    pub const ENV_FILE_TIMEOUT: &'static str = "FLEETWRIGHT_FILE_TIMEOUT_SECS";

    /// Loads a `.env` file from `base_dir` into the process environment.
    ///
    /// Returns false when no file exists. Variables already set are kept.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] if the file cannot be parsed.
    pub fn load_dotenv(base_dir: &Path) -> Result<bool, ConfigError> {
        let env_path = base_dir.join(".env");
        if !env_path.exists() {
            debug!(".env file not found at: {}", env_path.display());
            return Ok(false);
        }

        info!("Loading environment from: {}", env_path.display());
        dotenvy::from_path(&env_path).map_err(|e| ConfigError::InvalidValue {
            name: String::from(".env"),
            value: env_path.display().to_string(),
            message: format!("Failed to load .env file: {e}"),
        })?;
        Ok(true)
    }

    /// Reads overrides from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] if a variable is set to something
    /// other than a positive integer.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Reads overrides through `lookup`, starting from the defaults.
    ///
    /// # Errors
    ///
    /// Same as [`EngineConfig::from_env`].
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(n) = positive(&lookup, Self::ENV_MAX_SESSIONS)? {
            config.max_sessions = usize::try_from(n).map_err(|_| ConfigError::InvalidValue {
                name: Self::ENV_MAX_SESSIONS.to_string(),
                value: n.to_string(),
                message: String::from("too large"),
            })?;
        }
        if let Some(secs) = positive(&lookup, Self::ENV_CONNECT_TIMEOUT)? {
            config.connect_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = positive(&lookup, Self::ENV_COMMAND_TIMEOUT)? {
            config.command_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = positive(&lookup, Self::ENV_FILE_TIMEOUT)? {
            config.file_timeout = Duration::from_secs(secs);
        }

        debug!("Engine config: {config:?}");
        Ok(config)
    }

    /// Sets the session limit.
    #[must_use]
    pub const fn with_max_sessions(mut self, max_sessions: usize) -> Self {
        self.max_sessions = max_sessions;
        self
    }
}

fn positive(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Result<Option<u64>, ConfigError> {
    let Some(raw) = lookup(name) else {
        return Ok(None);
    };
    match raw.trim().parse::<u64>() {
        Ok(n) if n > 0 => Ok(Some(n)),
        _ => Err(ConfigError::InvalidValue {
            name: name.to_string(),
            value: raw,
            message: String::from("expected a positive integer"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_parse_extra_vars() {
        let vars = parse_extra_vars(&[
            "volume_name=gv0",
            "volume_replica_count=2",
            "volume_mount=/",
        ])
        .expect("valid vars");

        assert_eq!(vars.len(), 3);
        assert_eq!(vars["volume_name"], "gv0");
        assert_eq!(vars["volume_mount"], "/");
    }

    #[test]
    fn test_parse_extra_vars_allows_empty_value() {
        let vars = parse_extra_vars(&["flag="]).expect("valid vars");
        assert_eq!(vars["flag"], "");
    }

    #[test]
    fn test_parse_extra_vars_rejects_bad_entries() {
        for bad in ["foo", "a=b=c", "=value", ""] {
            assert_eq!(
                parse_extra_vars(&[bad]),
                Err(ConfigError::BadExtraVars {
                    entry: bad.to_string()
                }),
                "entry {bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_engine_config_defaults() {
        let config = EngineConfig::from_lookup(|_| None).expect("defaults");
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.max_sessions, 8);
        assert_eq!(config.command_timeout, Duration::from_secs(1800));
    }

    #[test]
    fn test_engine_config_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            (EngineConfig::ENV_MAX_SESSIONS, "2"),
            (EngineConfig::ENV_FILE_TIMEOUT, "60"),
        ]);
        let config = EngineConfig::from_lookup(|k| env.get(k).map(ToString::to_string))
            .expect("valid overrides");

        assert_eq!(config.max_sessions, 2);
        assert_eq!(config.file_timeout, Duration::from_secs(60));
        assert_eq!(config.connect_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_engine_config_rejects_invalid() {
        for raw in ["0", "-1", "ten"] {
            let err = EngineConfig::from_lookup(|k| {
                (k == EngineConfig::ENV_MAX_SESSIONS).then(|| raw.to_string())
            })
            .expect_err("invalid value");
            assert!(matches!(err, ConfigError::InvalidValue { .. }));
        }
    }

    #[test]
    fn test_execution_options_builder() {
        let opts = ExecutionOptions::new()
            .with_restart_services(true)
            .with_output_format(OutputFormat::Raw)
            .with_extra_var("volume_name", "gv0");

        assert!(opts.restart_services);
        assert!(!opts.verbose);
        assert_eq!(opts.output_format, OutputFormat::Raw);
        assert_eq!(opts.generated_assets_dir, PathBuf::from("generated"));
        assert_eq!(opts.extra_vars["volume_name"], "gv0");
    }

    #[test]
    fn test_load_dotenv() {
        let temp = tempfile::TempDir::new().expect("Failed to create temp dir");
        assert!(!EngineConfig::load_dotenv(temp.path()).expect("missing file is fine"));

        std::fs::write(
            temp.path().join(".env"),
            "FLEETWRIGHT_TEST_DOTENV_MARKER=loaded\n",
        )
        .expect("Failed to write .env");
        assert!(EngineConfig::load_dotenv(temp.path()).expect("valid .env"));
        assert_eq!(
            std::env::var("FLEETWRIGHT_TEST_DOTENV_MARKER").as_deref(),
            Ok("loaded")
        );
    }
}

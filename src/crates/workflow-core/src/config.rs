//! Workflow configuration.
//!
//! ```toml
//! name = "review-pipeline"
//! max_iterations = 50
//! event_buffer = 256
//! checkpoint_dir = "/var/lib/workflows/checkpoints"
//! ```
//!
//! Every field is optional. `${VAR}` values in `checkpoint_dir` are expanded
//! from the environment, and the `WORKFLOW_MAX_ITERATIONS` /
//! `WORKFLOW_CHECKPOINT_DIR` variables override the file.

use crate::error::{Result, WorkflowError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable overriding [`WorkflowConfig::max_iterations`]
pub const ENV_MAX_ITERATIONS: &str = "WORKFLOW_MAX_ITERATIONS";

/// Environment variable overriding [`WorkflowConfig::checkpoint_dir`]
pub const ENV_CHECKPOINT_DIR: &str = "WORKFLOW_CHECKPOINT_DIR";

/// Default superstep limit
pub const DEFAULT_MAX_ITERATIONS: usize = 100;

/// Default capacity of the event channel between runner and stream
pub const DEFAULT_EVENT_BUFFER: usize = 100;

/// Settings applied by [`WorkflowBuilder::with_config`](crate::WorkflowBuilder::with_config).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowConfig {
    /// Workflow name, used to group checkpoints
    #[serde(default)]
    pub name: Option<String>,

    /// Supersteps allowed before the run fails
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,

    /// Events buffered before the runner waits for the consumer
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,

    /// Directory for file-backed checkpoints; none disables checkpointing
    #[serde(default)]
    pub checkpoint_dir: Option<PathBuf>,
}

fn default_max_iterations() -> usize {
    DEFAULT_MAX_ITERATIONS
}

fn default_event_buffer() -> usize {
    DEFAULT_EVENT_BUFFER
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            name: None,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            event_buffer: DEFAULT_EVENT_BUFFER,
            checkpoint_dir: None,
        }
    }
}

impl WorkflowConfig {
    /// Parse a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let mut config: WorkflowConfig = toml::from_str(content)
            .map_err(|e| WorkflowError::Configuration(format!("Failed to parse config: {}", e)))?;
        config.resolve_env_vars();
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a TOML file, then apply environment overrides.
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(WorkflowError::Configuration(format!(
                "Config file not found: {}",
                path.display()
            )));
        }
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| WorkflowError::Configuration(format!("Failed to read config: {}", e)))?;

        let mut config = Self::from_toml_str(&content)?;
        config.apply_env_overrides()?;
        tracing::info!(path = %path.display(), "Workflow configuration loaded");
        Ok(config)
    }

    /// Defaults with environment overrides applied.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Apply `WORKFLOW_*` environment variables.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides_from(|key| std::env::var(key).ok())
    }

    fn apply_overrides_from<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup(ENV_MAX_ITERATIONS) {
            self.max_iterations = raw.trim().parse().map_err(|_| {
                WorkflowError::Configuration(format!(
                    "{} must be a positive integer, got '{}'",
                    ENV_MAX_ITERATIONS, raw
                ))
            })?;
        }
        if let Some(dir) = lookup(ENV_CHECKPOINT_DIR) {
            self.checkpoint_dir = (!dir.is_empty()).then(|| PathBuf::from(dir));
        }
        self.validate()
    }

    fn resolve_env_vars(&mut self) {
        if let Some(dir) = self.checkpoint_dir.as_ref().and_then(|d| d.to_str()) {
            self.checkpoint_dir = Some(PathBuf::from(expand_env_var(dir)));
        }
    }

    fn validate(&self) -> Result<()> {
        if self.max_iterations == 0 {
            return Err(WorkflowError::Configuration(
                "max_iterations must be at least 1".to_string(),
            ));
        }
        if self.event_buffer == 0 {
            return Err(WorkflowError::Configuration(
                "event_buffer must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Expand a whole-value `${VAR_NAME}` reference; anything else is returned as is.
fn expand_env_var(value: &str) -> String {
    if value.starts_with("${") && value.ends_with('}') {
        let var_name = &value[2..value.len() - 1];
        std::env::var(var_name).unwrap_or_else(|_| value.to_string())
    } else {
        value.to_string()
    }
}

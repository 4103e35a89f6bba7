//! Engine Configuration
//!
//! Settings for the worker pool, persistence and start-up behaviour.
//! Values come from defaults, an optional YAML file and finally CLI flags.
//!
//! ```yaml
//! workers: 8
//! state_dir: /var/lib/bimflow
//! load_templates: true
//! poll_interval_ms: 250
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::info;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::error::{Result, WorkflowError};

/// Default number of execution workers.
pub const DEFAULT_WORKERS: usize = 10;

/// Default status polling interval for callers waiting on an execution.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 200;

/// Lazily-resolved default state directory.
///
/// `BIMFLOW_STATE_DIR` wins when set; otherwise `.bimflow` in the current
/// directory.
pub static DEFAULT_STATE_DIR: Lazy<PathBuf> = Lazy::new(|| {
    let dir = std::env::var_os("BIMFLOW_STATE_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(".bimflow"));
    info!("Default state directory: {}", dir.display());
    dir
});

/// Runtime configuration for [`crate::service::WorkflowService`].
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    /// Worker pool size; also bounds concurrent PARALLEL sub-step handlers
    pub workers: usize,

    /// Directory for the JSON file store; in-memory storage when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_dir: Option<PathBuf>,

    /// Register the built-in BIM templates at start-up
    pub load_templates: bool,

    /// Status polling interval in milliseconds
    pub poll_interval_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            state_dir: None,
            load_templates: false,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
        }
    }
}

impl EngineConfig {
    /// Loads configuration from a YAML file; missing keys keep their defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            WorkflowError::Config(format!("failed to read '{}': {}", path.display(), e))
        })?;

        let config: EngineConfig = serde_yaml::from_str(&content)
            .map_err(|e| WorkflowError::Config(format!("invalid config '{}': {}", path.display(), e)))?;

        config.validate()?;
        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Sets the worker pool size.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Enables the JSON file store rooted at `dir`.
    pub fn with_state_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.state_dir = Some(dir.into());
        self
    }

    pub fn with_templates(mut self, load_templates: bool) -> Self {
        self.load_templates = load_templates;
        self
    }

    pub fn with_poll_interval(mut self, millis: u64) -> Self {
        self.poll_interval_ms = millis;
        self
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(WorkflowError::Config("workers must be at least 1".to_string()));
        }
        if self.poll_interval_ms == 0 {
            return Err(WorkflowError::Config(
                "poll_interval_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.workers, DEFAULT_WORKERS);
        assert!(config.state_dir.is_none());
        assert!(!config.load_templates);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bimflow.yaml");
        fs::write(&path, "workers: 3\nload_templates: true\n").unwrap();

        let config = EngineConfig::from_file(&path).unwrap();
        assert_eq!(config.workers, 3);
        assert!(config.load_templates);
        assert_eq!(config.poll_interval_ms, DEFAULT_POLL_INTERVAL_MS);
    }

    #[test]
    fn test_zero_workers_rejected() {
        let config = EngineConfig::default().with_workers(0);
        assert!(matches!(config.validate(), Err(WorkflowError::Config(_))));
    }

    #[test]
    fn test_invalid_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.yaml");
        fs::write(&path, "workers: [not, a, number]\n").unwrap();

        assert!(EngineConfig::from_file(&path).is_err());
        assert!(EngineConfig::from_file(dir.path().join("missing.yaml")).is_err());
    }

    #[test]
    fn test_builders() {
        let config = EngineConfig::default()
            .with_workers(2)
            .with_state_dir("/tmp/state")
            .with_templates(true);
        assert_eq!(config.workers, 2);
        assert_eq!(config.state_dir, Some(PathBuf::from("/tmp/state")));
        assert!(config.load_templates);
    }
}

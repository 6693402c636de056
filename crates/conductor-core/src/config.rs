//! Runtime configuration loaded from TOML.
//!
//! ```toml
//! [bus]
//! name = "main"
//! max_history = 1000
//!
//! [workflow]
//! max_steps = 100
//! checkpoint_dir = "/var/lib/conductor/checkpoints"
//!
//! [logging]
//! level = "debug"
//! json = true
//! ```
//!
//! Every section and field is optional; missing values fall back to the
//! defaults documented on each struct.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConductorConfig {
    pub bus: BusConfig,
    pub workflow: WorkflowConfig,
    pub crew: CrewConfig,
    pub handoff: HandoffConfig,
    pub logging: LoggingConfig,
}

/// Message bus settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Bus name, used in log fields and as the sender of internal events.
    pub name: String,
    /// Messages kept in the bounded history.
    pub max_history: usize,
    /// Failed deliveries kept in the dead-letter queue.
    pub dead_letter_capacity: usize,
    /// Distinct topics tracked individually by metrics; the rest are
    /// counted under `other`.
    pub max_tracked_topics: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            name: "conductor".to_string(),
            max_history: 1000,
            dead_letter_capacity: 1000,
            max_tracked_topics: 64,
        }
    }
}

/// Workflow engine settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowConfig {
    /// Upper bound on node visits in one traversal.
    pub max_steps: usize,
    /// Delay between retries when a node's policy does not set one.
    pub default_retry_delay_ms: u64,
    /// Directory for file-backed checkpoint persistence.
    pub checkpoint_dir: Option<PathBuf>,
}

impl WorkflowConfig {
    pub fn default_retry_delay(&self) -> Duration {
        Duration::from_millis(self.default_retry_delay_ms)
    }
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            max_steps: 100,
            default_retry_delay_ms: 1000,
            checkpoint_dir: None,
        }
    }
}

/// Crew settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CrewConfig {
    /// Report success even when some tasks failed.
    pub tolerate_partial_failure: bool,
    /// Concurrent task limit for members that do not set their own.
    pub default_max_concurrent_tasks: usize,
}

impl Default for CrewConfig {
    fn default() -> Self {
        Self {
            tolerate_partial_failure: false,
            default_max_concurrent_tasks: 1,
        }
    }
}

/// Handoff manager settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HandoffConfig {
    /// Completed handoff contexts retained for inspection.
    pub history_limit: usize,
}

impl Default for HandoffConfig {
    fn default() -> Self {
        Self { history_limit: 500 }
    }
}

/// Log output settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive; `RUST_LOG` takes precedence.
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl ConductorConfig {
    /// Load configuration from a TOML file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::load_from_toml(&content)
    }

    /// Load configuration from a TOML string and validate it.
    pub fn load_from_toml(toml_content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(toml_content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bus.name.trim().is_empty() {
            return Err(ConfigError::Invalid("bus.name must not be empty".to_string()));
        }
        if self.bus.max_history == 0 {
            return Err(ConfigError::Invalid(
                "bus.max_history must be greater than 0".to_string(),
            ));
        }
        if self.bus.dead_letter_capacity == 0 {
            return Err(ConfigError::Invalid(
                "bus.dead_letter_capacity must be greater than 0".to_string(),
            ));
        }
        if self.workflow.max_steps == 0 {
            return Err(ConfigError::Invalid(
                "workflow.max_steps must be greater than 0".to_string(),
            ));
        }
        if self.crew.default_max_concurrent_tasks == 0 {
            return Err(ConfigError::Invalid(
                "crew.default_max_concurrent_tasks must be greater than 0".to_string(),
            ));
        }
        if self.handoff.history_limit == 0 {
            return Err(ConfigError::Invalid(
                "handoff.history_limit must be greater than 0".to_string(),
            ));
        }
        if self.logging.level.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "logging.level must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = ConductorConfig::default();
        assert_eq!(config.bus.max_history, 1000);
        assert_eq!(config.workflow.max_steps, 100);
        assert_eq!(
            config.workflow.default_retry_delay(),
            Duration::from_secs(1)
        );
        assert!(!config.crew.tolerate_partial_failure);
        assert_eq!(config.logging.level, "info");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = ConductorConfig::load_from_toml(
            r#"
            [bus]
            name = "events"

            [workflow]
            max_steps = 25
            checkpoint_dir = "/tmp/checkpoints"
            "#,
        )
        .unwrap();

        assert_eq!(config.bus.name, "events");
        assert_eq!(config.bus.max_history, 1000);
        assert_eq!(config.workflow.max_steps, 25);
        assert_eq!(
            config.workflow.checkpoint_dir,
            Some(PathBuf::from("/tmp/checkpoints"))
        );
        assert_eq!(config.handoff.history_limit, 500);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let err = ConductorConfig::load_from_toml("[workflow]\nmax_steps = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        let err = ConductorConfig::load_from_toml("[bus\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[logging]\nlevel = \"debug\"\njson = true").unwrap();

        let config = ConductorConfig::load_from_file(file.path()).unwrap();
        assert_eq!(config.logging.level, "debug");
        assert!(config.logging.json);

        let missing = ConductorConfig::load_from_file("/nonexistent/conductor.toml");
        assert!(matches!(missing, Err(ConfigError::Io(_))));
    }
}

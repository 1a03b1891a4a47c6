//! Configuration schema types
//!
//! This module defines the configuration structure for the agent.

use crate::config::SecretString;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main agent configuration
///
/// This is the root configuration structure that maps to the TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Application-level settings
    #[serde(default)]
    pub application: ApplicationConfig,

    /// Identity and local state
    pub agent: AgentSection,

    /// Export scheduling and worker settings
    #[serde(default)]
    pub export: ExportConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AgentConfig {
    /// Validates the configuration
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration values are invalid
    pub fn validate(&self) -> Result<(), String> {
        self.application.validate()?;
        self.agent.validate()?;
        self.export.validate()?;
        self.logging.validate()?;
        Ok(())
    }
}

/// Application-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Console log format (text or json)
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

impl ApplicationConfig {
    fn validate(&self) -> Result<(), String> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.log_level.as_str()) {
            return Err(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.log_level,
                valid_levels.join(", ")
            ));
        }

        let valid_formats = ["text", "json"];
        if !valid_formats.contains(&self.log_format.as_str()) {
            return Err(format!(
                "Invalid log_format '{}'. Must be one of: {}",
                self.log_format,
                valid_formats.join(", ")
            ));
        }
        Ok(())
    }
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

/// Agent identity and local state location
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSection {
    /// Customer this agent exports for
    pub customer_id: String,

    /// API key used for uploads
    /// Stored securely in memory and automatically zeroized on drop
    pub api_key: SecretString,

    /// Key used by the config translator for encrypted integration settings
    #[serde(default)]
    pub encryption_key: Option<SecretString>,

    /// Root directory for cursors, checkpoints, queue and export output
    #[serde(default = "default_state_root")]
    pub state_root: String,
}

impl AgentSection {
    fn validate(&self) -> Result<(), String> {
        use secrecy::ExposeSecret;

        if self.customer_id.trim().is_empty() {
            return Err("agent.customer_id cannot be empty".to_string());
        }

        if self.api_key.expose_secret().is_empty() {
            return Err("agent.api_key cannot be empty".to_string());
        }

        if self.state_root.trim().is_empty() {
            return Err("agent.state_root cannot be empty".to_string());
        }

        Ok(())
    }

    /// Root directory for all persisted agent state
    pub fn state_root(&self) -> PathBuf {
        PathBuf::from(&self.state_root)
    }
}

/// Export scheduling and worker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportConfig {
    /// Jobs requested longer ago than this are rejected at intake
    #[serde(default = "default_staleness_seconds")]
    pub staleness_seconds: u64,

    /// Deadline for publishing the terminal result event
    #[serde(default = "default_result_timeout_seconds")]
    pub result_timeout_seconds: u64,

    /// Number of projects processed concurrently inside a worker
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// The processor stops dispatching once more projects than this have failed
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: usize,

    /// Time a cancelled worker gets to exit after the interrupt before it is killed
    #[serde(default = "default_cancel_grace_seconds")]
    pub cancel_grace_seconds: u64,

    /// Minimum interval between automatic progress reports
    #[serde(default = "default_progress_interval_ms")]
    pub progress_interval_ms: u64,

    /// Maximum size of one upload part
    #[serde(default = "default_upload_part_size_mb")]
    pub upload_part_size_mb: usize,
}

impl ExportConfig {
    fn validate(&self) -> Result<(), String> {
        if self.staleness_seconds == 0 {
            return Err("export.staleness_seconds must be > 0".to_string());
        }

        if self.result_timeout_seconds == 0 {
            return Err("export.result_timeout_seconds must be > 0".to_string());
        }

        if self.concurrency == 0 || self.concurrency > 100 {
            return Err(format!(
                "export.concurrency must be between 1 and 100, got {}",
                self.concurrency
            ));
        }

        if self.upload_part_size_mb == 0 {
            return Err("export.upload_part_size_mb must be > 0".to_string());
        }

        Ok(())
    }

    /// Admission deadline as a duration
    pub fn staleness(&self) -> Duration {
        Duration::from_secs(self.staleness_seconds)
    }

    /// Result event deadline as a duration
    pub fn result_timeout(&self) -> Duration {
        Duration::from_secs(self.result_timeout_seconds)
    }

    /// Cancel grace period as a duration
    pub fn cancel_grace(&self) -> Duration {
        Duration::from_secs(self.cancel_grace_seconds)
    }

    /// Upload part size in bytes
    pub fn upload_part_size_bytes(&self) -> u64 {
        self.upload_part_size_mb as u64 * 1024 * 1024
    }
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            staleness_seconds: default_staleness_seconds(),
            result_timeout_seconds: default_result_timeout_seconds(),
            concurrency: default_concurrency(),
            failure_threshold: default_failure_threshold(),
            cancel_grace_seconds: default_cancel_grace_seconds(),
            progress_interval_ms: default_progress_interval_ms(),
            upload_part_size_mb: default_upload_part_size_mb(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Enable local file logging
    #[serde(default)]
    pub local_enabled: bool,

    /// Local log directory
    #[serde(default = "default_local_path")]
    pub local_path: String,

    /// Log rotation strategy (daily or hourly)
    #[serde(default = "default_local_rotation")]
    pub local_rotation: String,

    /// Re-emit worker log lines through the agent's own logger
    #[serde(default = "default_true")]
    pub forward_child_logs: bool,
}

impl LoggingConfig {
    fn validate(&self) -> Result<(), String> {
        let valid_rotations = ["daily", "hourly"];
        if !valid_rotations.contains(&self.local_rotation.as_str()) {
            return Err(format!(
                "Invalid logging.local_rotation '{}'. Must be one of: {}",
                self.local_rotation,
                valid_rotations.join(", ")
            ));
        }

        if self.local_enabled && self.local_path.trim().is_empty() {
            return Err("logging.local_path cannot be empty when local_enabled".to_string());
        }

        Ok(())
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            local_enabled: false,
            local_path: default_local_path(),
            local_rotation: default_local_rotation(),
            forward_child_logs: true,
        }
    }
}

// Default value functions
fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

fn default_true() -> bool {
    true
}

fn default_state_root() -> String {
    "/var/lib/hostagent".to_string()
}

fn default_staleness_seconds() -> u64 {
    300
}

fn default_result_timeout_seconds() -> u64 {
    900
}

fn default_concurrency() -> usize {
    10
}

fn default_failure_threshold() -> usize {
    10
}

fn default_cancel_grace_seconds() -> u64 {
    10
}

fn default_progress_interval_ms() -> u64 {
    1000
}

fn default_upload_part_size_mb() -> usize {
    50
}

fn default_local_path() -> String {
    "/var/log/hostagent".to_string()
}

fn default_local_rotation() -> String {
    "daily".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::secret_string;

    fn agent_section() -> AgentSection {
        AgentSection {
            customer_id: "cust-1".to_string(),
            api_key: secret_string("key".to_string()),
            encryption_key: None,
            state_root: "/tmp/hostagent".to_string(),
        }
    }

    #[test]
    fn test_application_config_validation() {
        let mut config = ApplicationConfig::default();
        assert!(config.validate().is_ok());

        config.log_level = "invalid".to_string();
        assert!(config.validate().is_err());

        config.log_level = "debug".to_string();
        config.log_format = "xml".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_agent_section_validation() {
        let mut section = agent_section();
        assert!(section.validate().is_ok());

        section.customer_id = " ".to_string();
        assert!(section.validate().is_err());

        let mut section = agent_section();
        section.api_key = secret_string(String::new());
        assert!(section.validate().is_err());
    }

    #[test]
    fn test_export_config_validation() {
        let mut config = ExportConfig::default();
        assert!(config.validate().is_ok());

        config.concurrency = 0;
        assert!(config.validate().is_err());

        config.concurrency = 101;
        assert!(config.validate().is_err());

        config.concurrency = 4;
        config.staleness_seconds = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_export_config_durations() {
        let config = ExportConfig::default();
        assert_eq!(config.staleness(), Duration::from_secs(300));
        assert_eq!(config.result_timeout(), Duration::from_secs(900));
        assert_eq!(config.upload_part_size_bytes(), 50 * 1024 * 1024);
    }

    #[test]
    fn test_logging_config_default() {
        let config = LoggingConfig::default();
        assert!(!config.local_enabled);
        assert_eq!(config.local_rotation, "daily");
        assert!(config.forward_child_logs);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_logging_rotation_validation() {
        let config = LoggingConfig {
            local_rotation: "size".to_string(),
            ..LoggingConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_default_values() {
        assert_eq!(default_log_level(), "info");
        assert_eq!(default_staleness_seconds(), 300);
        assert_eq!(default_result_timeout_seconds(), 900);
        assert_eq!(default_failure_threshold(), 10);
        assert_eq!(default_progress_interval_ms(), 1000);
    }
}

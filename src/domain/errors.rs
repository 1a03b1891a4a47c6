//! Domain error types
//!
//! This module defines the error hierarchy for the agent. Errors are grouped by
//! the stage that produced them so callers can tell an admission failure from a
//! worker crash, an operator cancellation or an upload problem.
//! None of the variants expose third-party types.

use std::time::Duration;
use thiserror::Error;

/// Main agent error type
///
/// This is the primary error type used throughout the application.
#[derive(Debug, Error)]
pub enum AgentError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Validation errors (malformed requests, bad identifiers)
    #[error("Validation error: {0}")]
    Validation(String),

    /// A job arrived after its admission deadline
    #[error("Export job {job_id} is stale: requested {age_seconds}s ago, limit is {limit_seconds}s")]
    StaleJob {
        job_id: String,
        age_seconds: i64,
        limit_seconds: u64,
    },

    /// Another export is already executing
    #[error("An export is already running")]
    AlreadyRunning,

    /// Durable queue errors
    #[error("Queue error: {0}")]
    Queue(String),

    /// On-disk state backup/restore errors
    #[error("State management error: {0}")]
    State(String),

    /// Worker subprocess errors
    #[error("Subprocess error: {0}")]
    Subprocess(#[from] SubprocessError),

    /// The worker was cancelled by an operator
    #[error("Export cancelled")]
    Cancelled,

    /// The worker exited cleanly but its result document could not be decoded
    #[error("Invalid output from subcommand {command}: {message}")]
    InvalidOutput { command: String, message: String },

    /// Upload errors
    #[error("Upload error: {0}")]
    Upload(#[from] UploadError),

    /// Framework-level failure inside the project processor
    #[error("Processor error: {0}")]
    Processor(String),

    /// Export session errors
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    /// Event publishing errors
    #[error("Event publish error: {0}")]
    Publish(String),

    /// Timed out waiting for an operation
    #[error("Timed out after {0:?}: {1}")]
    Timeout(Duration, String),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(String),

    /// Generic errors with context
    #[error("{0}")]
    Other(String),
}

impl AgentError {
    /// Returns true when the error represents an operator cancellation
    pub fn is_cancelled(&self) -> bool {
        matches!(self, AgentError::Cancelled)
    }
}

/// Worker subprocess errors
#[derive(Debug, Error)]
pub enum SubprocessError {
    /// A cancellable command with this name is already running
    #[error("Command '{0}' is already registered as running")]
    AlreadyRegistered(String),

    /// Failed to start the worker process
    #[error("Failed to spawn '{command}': {message}")]
    Spawn { command: String, message: String },

    /// Failed while waiting for the worker process
    #[error("Failed waiting for '{command}': {message}")]
    Wait { command: String, message: String },

    /// The worker exited non-zero without writing crash output
    #[error("Command '{command}' exited with status {code:?}")]
    Exited { command: String, code: Option<i32> },

    /// The worker exited non-zero and left crash output on stderr
    #[error("Command '{command}' crashed with status {code:?}")]
    Crashed {
        command: String,
        code: Option<i32>,
        output: String,
    },
}

/// Upload errors
#[derive(Debug, Error)]
pub enum UploadError {
    /// Nothing was produced to upload. Callers treat this as success.
    #[error("No files to upload")]
    NoFiles,

    /// The upload URL is not usable
    #[error("Invalid upload URL '{0}'")]
    InvalidUrl(String),

    /// The upload target rejected a request
    #[error("Upload of {part} failed with status {status}")]
    Rejected { part: String, status: u16 },

    /// Transport failure
    #[error("Upload request failed: {0}")]
    Request(String),
}

/// Export session errors
#[derive(Debug, Error)]
pub enum SessionError {
    /// Records cannot be sent through a tracking-only session
    #[error("Session {0} is a tracking session and cannot send records")]
    TrackingOnly(String),

    /// The session was already completed
    #[error("Session {0} is already done")]
    AlreadyDone(String),

    /// The stored cursor is not an RFC3339 timestamp
    #[error("Invalid cursor '{cursor}': {message}")]
    InvalidCursor { cursor: String, message: String },

    /// The session host refused or failed an operation
    #[error("Session host error: {0}")]
    Host(String),
}

// Conversion from std::io::Error
impl From<std::io::Error> for AgentError {
    fn from(err: std::io::Error) -> Self {
        AgentError::Io(err.to_string())
    }
}

// Conversion from serde_json::Error
impl From<serde_json::Error> for AgentError {
    fn from(err: serde_json::Error) -> Self {
        AgentError::Serialization(err.to_string())
    }
}

// Conversion from toml parse errors
impl From<toml::de::Error> for AgentError {
    fn from(err: toml::de::Error) -> Self {
        AgentError::Configuration(format!("TOML parse error: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agent_error_display() {
        let err = AgentError::Configuration("Invalid config".to_string());
        assert_eq!(err.to_string(), "Configuration error: Invalid config");
    }

    #[test]
    fn test_stale_job_display() {
        let err = AgentError::StaleJob {
            job_id: "job-1".to_string(),
            age_seconds: 301,
            limit_seconds: 300,
        };
        assert!(err.to_string().contains("job-1"));
        assert!(err.to_string().contains("301s"));
    }

    #[test]
    fn test_subprocess_error_conversion() {
        let err = SubprocessError::AlreadyRegistered("export".to_string());
        let agent_err: AgentError = err.into();
        assert!(matches!(
            agent_err,
            AgentError::Subprocess(SubprocessError::AlreadyRegistered(_))
        ));
    }

    #[test]
    fn test_upload_no_files_conversion() {
        let agent_err: AgentError = UploadError::NoFiles.into();
        assert!(matches!(agent_err, AgentError::Upload(UploadError::NoFiles)));
    }

    #[test]
    fn test_cancelled_is_distinct() {
        assert!(AgentError::Cancelled.is_cancelled());
        let crashed: AgentError = SubprocessError::Crashed {
            command: "export".to_string(),
            code: Some(2),
            output: "panic".to_string(),
        }
        .into();
        assert!(!crashed.is_cancelled());
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "File not found");
        let agent_err: AgentError = io_err.into();
        assert!(matches!(agent_err, AgentError::Io(_)));
    }

    #[test]
    fn test_serde_json_error_conversion() {
        let json_err = serde_json::from_str::<serde_json::Value>("invalid json").unwrap_err();
        let agent_err: AgentError = json_err.into();
        assert!(matches!(agent_err, AgentError::Serialization(_)));
    }

    #[test]
    fn test_toml_error_conversion() {
        let toml_err = toml::from_str::<toml::Value>("invalid = toml = syntax").unwrap_err();
        let agent_err: AgentError = toml_err.into();
        assert!(matches!(agent_err, AgentError::Configuration(_)));
        assert!(agent_err.to_string().contains("TOML parse error"));
    }
}

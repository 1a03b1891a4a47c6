//! Logging and observability
//!
//! This module provides structured logging with support for:
//! - Text or JSON console output
//! - Configurable log levels
//! - Local JSON file logging with rotation
//!
//! # Example
//!
//! ```no_run
//! use hostagent::logging::{init_logging, LogFormat};
//! use hostagent::config::LoggingConfig;
//!
//! let config = LoggingConfig::default();
//! let _guard = init_logging("info", LogFormat::Json, &config).expect("Failed to initialize logging");
//!
//! tracing::info!("Agent started");
//! tracing::error!(error = "Something went wrong", "Error occurred");
//! ```

pub mod structured;

pub use structured::{init_logging, init_worker_logging, LogFormat, LoggingGuard};

/// Log the start of an export job
///
/// # Example
///
/// ```no_run
/// use hostagent::log_export_start;
/// use hostagent::domain::JobId;
///
/// let job_id = JobId::new("job-1").unwrap();
/// log_export_start!(&job_id, 2);
/// ```
#[macro_export]
macro_rules! log_export_start {
    ($job_id:expr, $integrations:expr) => {
        tracing::info!(
            job_id = %$job_id,
            integrations = $integrations,
            "Starting export"
        );
    };
}

/// Log the completion of an export job
///
/// # Example
///
/// ```no_run
/// use hostagent::log_export_complete;
/// use std::time::Duration;
///
/// log_export_complete!("job-1", 3, Duration::from_secs(10));
/// ```
#[macro_export]
macro_rules! log_export_complete {
    ($job_id:expr, $parts:expr, $duration:expr) => {
        tracing::info!(
            job_id = %$job_id,
            upload_parts = $parts,
            duration_ms = $duration.as_millis() as u64,
            "Export completed"
        );
    };
}

/// Log an error with context
///
/// # Example
///
/// ```no_run
/// use hostagent::log_error_with_context;
/// use hostagent::domain::AgentError;
///
/// let error = AgentError::Configuration("Invalid config".to_string());
/// log_error_with_context!(&error, "Failed to load configuration");
/// ```
#[macro_export]
macro_rules! log_error_with_context {
    ($error:expr, $context:expr) => {
        tracing::error!(
            error = %$error,
            context = $context,
            "Error occurred"
        );
    };
}

//! Integration tests for logging functionality

use hostagent::config::LoggingConfig;
use hostagent::logging::{init_logging, init_worker_logging, LogFormat};
use std::str::FromStr;
use tempfile::TempDir;

#[test]
fn test_logging_config_default() {
    let config = LoggingConfig::default();
    assert!(!config.local_enabled);
    assert_eq!(config.local_rotation, "daily");
    assert!(config.forward_child_logs);
}

#[test]
fn test_log_format_parsing() {
    assert_eq!(LogFormat::from_str("json").unwrap(), LogFormat::Json);
    assert_eq!(LogFormat::from_str("TEXT").unwrap(), LogFormat::Text);
    assert!(LogFormat::from_str("xml").is_err());
    assert_eq!(LogFormat::default(), LogFormat::Text);
}

// Only one subscriber can be installed per process, so file logging and the
// second-install failure are checked in one test.
#[test]
fn test_file_logging_creates_directory_once() {
    let temp_dir = TempDir::new().unwrap();
    let log_path = temp_dir.path().join("logs");

    let config = LoggingConfig {
        local_enabled: true,
        local_path: log_path.to_string_lossy().to_string(),
        local_rotation: "hourly".to_string(),
        forward_child_logs: true,
    };

    let guard = init_logging("debug", LogFormat::Json, &config).unwrap();
    assert!(log_path.is_dir());
    tracing::info!(job_id = "job-1", "written to file");

    assert!(init_worker_logging("info", LogFormat::Json).is_err());
    drop(guard);
}

#[test]
fn test_invalid_level_is_rejected() {
    let config = LoggingConfig::default();
    assert!(init_logging("loud", LogFormat::Text, &config).is_err());
}

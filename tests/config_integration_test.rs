//! Integration tests for configuration loading and validation
//!
//! Tests that modify environment variables hold ENV_MUTEX.

use hostagent::config::load_config;
use secrecy::ExposeSecret;
use std::io::Write;
use std::sync::Mutex;
use std::time::Duration;
use tempfile::NamedTempFile;

// Mutex to serialize tests that modify environment variables
static ENV_MUTEX: Mutex<()> = Mutex::new(());

fn cleanup_env_vars() {
    std::env::remove_var("HOSTAGENT_APPLICATION_LOG_LEVEL");
    std::env::remove_var("HOSTAGENT_AGENT_STATE_ROOT");
    std::env::remove_var("HOSTAGENT_EXPORT_CONCURRENCY");
    std::env::remove_var("HOSTAGENT_LOGGING_FORWARD_CHILD_LOGS");
    std::env::remove_var("TEST_HOSTAGENT_API_KEY");
}

fn write_config(content: &str) -> NamedTempFile {
    let mut temp_file = NamedTempFile::new().unwrap();
    temp_file.write_all(content.as_bytes()).unwrap();
    temp_file.flush().unwrap();
    temp_file
}

#[test]
fn test_load_complete_config() {
    let _lock = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
    cleanup_env_vars();

    let temp_file = write_config(
        r#"
[application]
log_level = "debug"
log_format = "json"

[agent]
customer_id = "acme"
api_key = "upload-key"
encryption_key = "enc-key"
state_root = "/tmp/hostagent-state"

[export]
staleness_seconds = 120
result_timeout_seconds = 60
concurrency = 4
failure_threshold = 3
cancel_grace_seconds = 2
progress_interval_ms = 250
upload_part_size_mb = 8

[logging]
local_enabled = true
local_path = "/tmp/hostagent-logs"
local_rotation = "hourly"
forward_child_logs = false
"#,
    );

    let config = load_config(temp_file.path()).expect("Failed to load config");

    assert_eq!(config.application.log_level, "debug");
    assert_eq!(config.application.log_format, "json");

    assert_eq!(config.agent.customer_id, "acme");
    assert_eq!(config.agent.api_key.expose_secret().as_str(), "upload-key");
    assert_eq!(
        config
            .agent
            .encryption_key
            .as_ref()
            .map(|k| k.expose_secret().as_str().to_string()),
        Some("enc-key".to_string())
    );
    assert_eq!(
        config.agent.state_root(),
        std::path::PathBuf::from("/tmp/hostagent-state")
    );

    assert_eq!(config.export.staleness(), Duration::from_secs(120));
    assert_eq!(config.export.result_timeout(), Duration::from_secs(60));
    assert_eq!(config.export.concurrency, 4);
    assert_eq!(config.export.failure_threshold, 3);
    assert_eq!(config.export.cancel_grace(), Duration::from_secs(2));
    assert_eq!(config.export.progress_interval_ms, 250);
    assert_eq!(config.export.upload_part_size_bytes(), 8 * 1024 * 1024);

    assert!(config.logging.local_enabled);
    assert_eq!(config.logging.local_rotation, "hourly");
    assert!(!config.logging.forward_child_logs);
}

#[test]
fn test_load_minimal_config_with_defaults() {
    let _lock = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
    cleanup_env_vars();

    let temp_file = write_config(
        r#"
[agent]
customer_id = "acme"
api_key = "k"
"#,
    );

    let config = load_config(temp_file.path()).unwrap();
    assert_eq!(config.application.log_level, "info");
    assert_eq!(config.agent.state_root, "/var/lib/hostagent");
    assert_eq!(config.export.staleness_seconds, 300);
    assert_eq!(config.export.result_timeout_seconds, 900);
    assert_eq!(config.export.failure_threshold, 10);
    assert_eq!(config.export.progress_interval_ms, 1000);
    assert!(!config.logging.local_enabled);
    assert!(config.logging.forward_child_logs);
}

#[test]
fn test_env_var_substitution() {
    let _lock = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
    cleanup_env_vars();
    std::env::set_var("TEST_HOSTAGENT_API_KEY", "from-env");

    let temp_file = write_config(
        r#"
[agent]
customer_id = "acme"
# api_key = "${UNSET_IN_COMMENT}"
api_key = "${TEST_HOSTAGENT_API_KEY}"
"#,
    );

    let config = load_config(temp_file.path()).unwrap();
    assert_eq!(config.agent.api_key.expose_secret().as_str(), "from-env");

    cleanup_env_vars();
}

#[test]
fn test_missing_substitution_is_an_error() {
    let _lock = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
    cleanup_env_vars();

    let temp_file = write_config(
        r#"
[agent]
customer_id = "acme"
api_key = "${TEST_HOSTAGENT_API_KEY}"
"#,
    );

    let err = load_config(temp_file.path()).unwrap_err();
    assert!(err.to_string().contains("TEST_HOSTAGENT_API_KEY"));
}

#[test]
fn test_env_var_overrides() {
    let _lock = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
    cleanup_env_vars();
    std::env::set_var("HOSTAGENT_APPLICATION_LOG_LEVEL", "trace");
    std::env::set_var("HOSTAGENT_AGENT_STATE_ROOT", "/srv/hostagent");
    std::env::set_var("HOSTAGENT_EXPORT_CONCURRENCY", "7");
    std::env::set_var("HOSTAGENT_LOGGING_FORWARD_CHILD_LOGS", "false");

    let temp_file = write_config(
        r#"
[application]
log_level = "info"

[agent]
customer_id = "acme"
api_key = "k"

[export]
concurrency = 2
"#,
    );

    let config = load_config(temp_file.path()).unwrap();
    assert_eq!(config.application.log_level, "trace");
    assert_eq!(config.agent.state_root, "/srv/hostagent");
    assert_eq!(config.export.concurrency, 7);
    assert!(!config.logging.forward_child_logs);

    cleanup_env_vars();
}

#[test]
fn test_invalid_config_validation() {
    let _lock = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
    cleanup_env_vars();

    for content in [
        "[application]\nlog_level = \"loud\"\n[agent]\ncustomer_id = \"a\"\napi_key = \"k\"\n",
        "[agent]\ncustomer_id = \"a\"\napi_key = \"\"\n",
        "[agent]\ncustomer_id = \"a\"\napi_key = \"k\"\n[export]\nconcurrency = 0\n",
        "[agent]\napi_key = \"k\"\n",
    ] {
        let temp_file = write_config(content);
        assert!(load_config(temp_file.path()).is_err(), "accepted: {content}");
    }
}

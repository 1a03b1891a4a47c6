//! Configuration loader with TOML parsing and environment variable overrides

use super::schema::AgentConfig;
use crate::config::secret_string;
use crate::domain::errors::AgentError;
use crate::domain::result::Result;
use regex::Regex;
use std::fs;
use std::path::Path;

/// Loads configuration from a TOML file
///
/// This function:
/// 1. Reads the TOML file
/// 2. Performs environment variable substitution (${VAR} syntax)
/// 3. Parses the TOML into AgentConfig
/// 4. Applies environment variable overrides (HOSTAGENT_* prefix)
/// 5. Validates the configuration
///
/// # Errors
///
/// Returns a configuration error if the file is missing or unreadable, a
/// referenced environment variable is unset, or parsing/validation fails.
///
/// # Examples
///
/// ```no_run
/// use hostagent::config::loader::load_config;
///
/// let config = load_config("hostagent.toml").expect("Failed to load config");
/// ```
pub fn load_config(path: impl AsRef<Path>) -> Result<AgentConfig> {
    let path = path.as_ref();

    if !path.exists() {
        return Err(AgentError::Configuration(format!(
            "Configuration file not found: {}",
            path.display()
        )));
    }

    let contents = fs::read_to_string(path).map_err(|e| {
        AgentError::Configuration(format!(
            "Failed to read configuration file {}: {}",
            path.display(),
            e
        ))
    })?;

    let contents = substitute_env_vars(&contents)?;

    let mut config: AgentConfig = toml::from_str(&contents)
        .map_err(|e| AgentError::Configuration(format!("Failed to parse TOML: {e}")))?;

    apply_env_overrides(&mut config);

    config.validate().map_err(|e| {
        AgentError::Configuration(format!("Configuration validation failed: {e}"))
    })?;

    Ok(config)
}

/// Substitutes environment variables in the format ${VAR_NAME}
///
/// Comment lines are copied verbatim so documented placeholders don't have
/// to be set.
fn substitute_env_vars(input: &str) -> Result<String> {
    let re = Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}")
        .map_err(|e| AgentError::Other(format!("Invalid substitution pattern: {e}")))?;
    let mut result = String::with_capacity(input.len());
    let mut missing_vars: Vec<String> = Vec::new();

    for line in input.lines() {
        if line.trim_start().starts_with('#') {
            result.push_str(line);
            result.push('\n');
            continue;
        }

        let processed = re.replace_all(line, |caps: &regex::Captures<'_>| {
            let var_name = &caps[1];
            match std::env::var(var_name) {
                Ok(value) => value,
                Err(_) => {
                    if !missing_vars.iter().any(|v| v == var_name) {
                        missing_vars.push(var_name.to_string());
                    }
                    String::new()
                }
            }
        });
        result.push_str(&processed);
        result.push('\n');
    }

    if !missing_vars.is_empty() {
        return Err(AgentError::Configuration(format!(
            "Missing required environment variables: {}",
            missing_vars.join(", ")
        )));
    }

    Ok(result)
}

/// Applies environment variable overrides using HOSTAGENT_* prefix
///
/// Environment variables follow the pattern HOSTAGENT_<SECTION>_<KEY>, for
/// example HOSTAGENT_AGENT_STATE_ROOT or HOSTAGENT_EXPORT_CONCURRENCY.
/// Unparseable numeric values are ignored.
fn apply_env_overrides(config: &mut AgentConfig) {
    if let Ok(val) = std::env::var("HOSTAGENT_APPLICATION_LOG_LEVEL") {
        config.application.log_level = val;
    }
    if let Ok(val) = std::env::var("HOSTAGENT_APPLICATION_LOG_FORMAT") {
        config.application.log_format = val;
    }

    if let Ok(val) = std::env::var("HOSTAGENT_AGENT_CUSTOMER_ID") {
        config.agent.customer_id = val;
    }
    if let Ok(val) = std::env::var("HOSTAGENT_AGENT_API_KEY") {
        config.agent.api_key = secret_string(val);
    }
    if let Ok(val) = std::env::var("HOSTAGENT_AGENT_ENCRYPTION_KEY") {
        config.agent.encryption_key = Some(secret_string(val));
    }
    if let Ok(val) = std::env::var("HOSTAGENT_AGENT_STATE_ROOT") {
        config.agent.state_root = val;
    }

    if let Some(v) = env_parse("HOSTAGENT_EXPORT_STALENESS_SECONDS") {
        config.export.staleness_seconds = v;
    }
    if let Some(v) = env_parse("HOSTAGENT_EXPORT_RESULT_TIMEOUT_SECONDS") {
        config.export.result_timeout_seconds = v;
    }
    if let Some(v) = env_parse("HOSTAGENT_EXPORT_CONCURRENCY") {
        config.export.concurrency = v;
    }
    if let Some(v) = env_parse("HOSTAGENT_EXPORT_FAILURE_THRESHOLD") {
        config.export.failure_threshold = v;
    }
    if let Some(v) = env_parse("HOSTAGENT_EXPORT_CANCEL_GRACE_SECONDS") {
        config.export.cancel_grace_seconds = v;
    }

    if let Some(v) = env_parse("HOSTAGENT_LOGGING_LOCAL_ENABLED") {
        config.logging.local_enabled = v;
    }
    if let Ok(val) = std::env::var("HOSTAGENT_LOGGING_LOCAL_PATH") {
        config.logging.local_path = val;
    }
    if let Some(v) = env_parse("HOSTAGENT_LOGGING_FORWARD_CHILD_LOGS") {
        config.logging.forward_child_logs = v;
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

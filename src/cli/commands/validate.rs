//! Validate config command implementation

use super::{EXIT_CONFIG, EXIT_OK};
use crate::config::load_config;
use clap::Args;

/// Arguments for the validate-config command
#[derive(Args, Debug)]
pub struct ValidateArgs {}

impl ValidateArgs {
    /// Execute the validate-config command
    ///
    /// `load_config` already validates, so a loaded config is a valid one.
    pub async fn execute(&self, config_path: &str) -> anyhow::Result<i32> {
        tracing::info!(config_path = %config_path, "Validating configuration");

        println!("🔍 Validating configuration file: {config_path}");
        println!();

        let config = match load_config(config_path) {
            Ok(c) => c,
            Err(e) => {
                println!("❌ Configuration is invalid");
                println!("   Error: {e}");
                return Ok(EXIT_CONFIG);
            }
        };

        println!("✅ Configuration is valid");
        println!();
        println!("Configuration Summary:");
        println!("  Log Level: {}", config.application.log_level);
        println!("  Log Format: {}", config.application.log_format);
        println!("  Customer: {}", config.agent.customer_id);
        println!("  State Root: {}", config.agent.state_root);
        println!(
            "  Encryption Key: {}",
            if config.agent.encryption_key.is_some() {
                "set"
            } else {
                "not set"
            }
        );
        println!("  Staleness: {}s", config.export.staleness_seconds);
        println!("  Result Timeout: {}s", config.export.result_timeout_seconds);
        println!("  Concurrency: {}", config.export.concurrency);
        println!("  Failure Threshold: {}", config.export.failure_threshold);
        println!("  Upload Part Size: {} MB", config.export.upload_part_size_mb);
        println!(
            "  Local Log Files: {}",
            if config.logging.local_enabled {
                config.logging.local_path.as_str()
            } else {
                "disabled"
            }
        );
        println!();
        Ok(EXIT_OK)
    }
}

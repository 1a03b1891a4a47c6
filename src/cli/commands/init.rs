//! Init command implementation
//!
//! This module implements the `init` command for generating a sample
//! configuration file.

use super::{EXIT_CONFIG, EXIT_FATAL, EXIT_OK};
use clap::Args;
use std::fs;
use std::path::Path;

/// Arguments for the init command
#[derive(Args, Debug)]
pub struct InitArgs {
    /// Path where to create the configuration file
    #[arg(short, long, default_value = "hostagent.toml")]
    pub output: String,

    /// Include every option with comments
    #[arg(long)]
    pub with_examples: bool,

    /// Overwrite existing file
    #[arg(long)]
    pub force: bool,
}

impl InitArgs {
    /// Execute the init command
    pub async fn execute(&self) -> anyhow::Result<i32> {
        tracing::info!(output = %self.output, "Initializing configuration file");

        println!("📝 Initializing hostagent configuration");
        println!();

        if Path::new(&self.output).exists() && !self.force {
            println!("❌ Configuration file already exists: {}", self.output);
            println!("   Use --force to overwrite");
            return Ok(EXIT_CONFIG);
        }

        let content = if self.with_examples {
            Self::generate_config_with_examples()
        } else {
            Self::generate_minimal_config()
        };

        match fs::write(&self.output, content) {
            Ok(_) => {
                println!("✅ Configuration file created: {}", self.output);
                println!();
                println!("Next steps:");
                println!("  1. Edit {} with your customer id", self.output);
                println!("  2. Set HOSTAGENT_API_KEY in the environment or a .env file");
                println!("  3. Validate configuration: hostagent validate-config");
                println!("  4. Start the agent: hostagent serve");
                println!();
                Ok(EXIT_OK)
            }
            Err(e) => {
                println!("❌ Failed to write configuration file");
                println!("   Error: {e}");
                Ok(EXIT_FATAL)
            }
        }
    }

    /// Generate minimal configuration
    fn generate_minimal_config() -> String {
        r#"# Hostagent Configuration File

[application]
log_level = "info"
log_format = "text"

[agent]
customer_id = "your-customer-id"
api_key = "${HOSTAGENT_API_KEY}"
state_root = "/var/lib/hostagent"

[export]
concurrency = 10
"#
        .to_string()
    }

    /// Generate configuration with every option documented
    fn generate_config_with_examples() -> String {
        r#"# Hostagent Configuration File
#
# Values may reference environment variables as ${VAR}. Any key can also be
# overridden with HOSTAGENT_<SECTION>_<KEY>, e.g. HOSTAGENT_EXPORT_CONCURRENCY.

[application]
# trace | debug | info | warn | error
log_level = "info"
# text | json (console output; events always go to stdout as JSON)
log_format = "text"

[agent]
customer_id = "your-customer-id"
# Bearer key for uploads. Never logged and never passed on a command line.
api_key = "${HOSTAGENT_API_KEY}"
# Key for encrypted integration settings
# encryption_key = "${HOSTAGENT_ENCRYPTION_KEY}"
# Cursors, checkpoints, queued jobs and export output live here
state_root = "/var/lib/hostagent"

[export]
# Requests older than this are rejected at intake
staleness_seconds = 300
# Deadline for publishing a job's terminal event
result_timeout_seconds = 900
# Projects processed concurrently by a worker
concurrency = 10
# Stop dispatching projects once more than this many have failed
failure_threshold = 10
# Time a cancelled worker gets before it is killed
cancel_grace_seconds = 10
# Minimum interval between automatic progress reports
progress_interval_ms = 1000
# Maximum size of one upload part
upload_part_size_mb = 50

[logging]
# JSON log files with rotation
local_enabled = false
local_path = "/var/log/hostagent"
# daily | hourly
local_rotation = "daily"
# Re-emit worker log lines through the agent's logger
forward_child_logs = true
"#
        .to_string()
    }
}

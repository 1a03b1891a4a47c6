//! Status command implementation
//!
//! Shows stored cursors, jobs waiting in the durable queue and whether a
//! state backup from an unfinished attempt exists.

use super::{EXIT_CONFIG, EXIT_FATAL, EXIT_OK};
use crate::config::load_config;
use crate::core::exporter::{list_pending, StateBackup, QUEUE_DIR};
use crate::core::session::{CursorStatus, CursorStore};
use clap::Args;

/// Arguments for the status command
#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Only show cursors of this integration
    #[arg(long)]
    pub integration: Option<String>,
}

impl StatusArgs {
    /// Execute the status command
    pub async fn execute(&self, config_path: &str) -> anyhow::Result<i32> {
        tracing::info!("Checking agent status");

        println!("📊 Agent Status");
        println!();

        let config = match load_config(config_path) {
            Ok(c) => c,
            Err(e) => {
                println!("❌ Failed to load configuration file");
                println!("   Error: {e}");
                return Ok(EXIT_CONFIG);
            }
        };
        let root = config.agent.state_root();

        let store = match CursorStore::open(&root) {
            Ok(s) => s,
            Err(e) => {
                println!("❌ Failed to read cursors");
                println!("   Error: {e}");
                return Ok(EXIT_FATAL);
            }
        };

        let pending = list_pending(&root.join(QUEUE_DIR)).unwrap_or_else(|e| {
            println!("⚠️  Failed to read queue: {e}");
            Vec::new()
        });
        println!("State root: {}", root.display());
        println!("Queued jobs: {}", pending.len());
        for job in &pending {
            println!(
                "  {} ({} integrations, requested {})",
                job.job_id,
                job.integrations.len(),
                job.requested_at.format("%Y-%m-%d %H:%M:%S")
            );
        }
        if StateBackup::new(&root).has_backup() {
            println!("⚠️  A state backup exists: the last attempt did not finish cleanly");
        }
        println!();

        let entries: Vec<_> = store
            .entries()
            .into_iter()
            .filter(|(key, _)| match &self.integration {
                Some(integration) => key.split('/').next() == Some(integration.as_str()),
                None => true,
            })
            .collect();

        if entries.is_empty() {
            println!("No export history found.");
            return Ok(EXIT_OK);
        }

        println!("Found {} cursor(s):", entries.len());
        println!();
        println!(
            "{:<40} {:<15} {:<10} {:<25}",
            "Cursor", "Status", "Records", "Last Completed"
        );
        println!("{}", "-".repeat(92));

        for (key, entry) in entries {
            let status = match entry.status {
                CursorStatus::Completed => "✅ Completed",
                CursorStatus::InProgress => "🔄 In Progress",
                CursorStatus::NotStarted => "⏸️  Not Started",
            };
            let last = entry
                .last_completed_at
                .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_else(|| "Never".to_string());

            println!(
                "{:<40} {:<15} {:<10} {:<25}",
                key, status, entry.records_exported, last
            );
        }

        println!();
        Ok(EXIT_OK)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_args_defaults() {
        let args = StatusArgs { integration: None };
        assert!(args.integration.is_none());
    }

    #[tokio::test]
    async fn test_status_missing_config() {
        let args = StatusArgs { integration: None };
        let code = args.execute("/nonexistent/hostagent.toml").await.unwrap();
        assert_eq!(code, EXIT_CONFIG);
    }
}

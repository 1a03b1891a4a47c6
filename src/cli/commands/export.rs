//! Worker `export` command
//!
//! Started by the agent's subcommand runner, one process per job. Parameters
//! arrive in files; the result document is written to `--output-file`.
//! Structured JSON logs go to stdout. Anything on stderr is treated by the
//! parent as crash output.

use super::{EXIT_INTERRUPTED, EXIT_OK, EXIT_PARTIAL};
use crate::core::exporter::wait_for_shutdown;
use crate::core::worker::{run_worker, ExportResult, IntegrationRegistry, WorkerSettings};
use crate::domain::WorkerIntegration;
use anyhow::Context;
use clap::Args;
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use tokio::sync::watch;

/// Arguments for the worker export command
#[derive(Args, Debug)]
pub struct ExportArgs {
    /// JSON file with the agent-side worker settings
    #[arg(long)]
    pub agent_config_file: PathBuf,

    /// JSON file with the integrations to export
    #[arg(long)]
    pub integrations_file: PathBuf,

    /// Log format (text or json)
    #[arg(long, default_value = "json")]
    pub log_format: String,

    /// Where to write the result document
    #[arg(long)]
    pub output_file: Option<PathBuf>,

    /// State root; overrides the one in the settings file
    #[arg(long, alias = "pinpoint-root")]
    pub state_root: Option<PathBuf>,
}

impl ExportArgs {
    /// Execute the worker export command
    pub async fn execute(&self, mut shutdown_signal: watch::Receiver<bool>) -> anyhow::Result<i32> {
        let mut settings: WorkerSettings = read_json(&self.agent_config_file)?;
        let integrations: Vec<WorkerIntegration> = read_json(&self.integrations_file)?;
        if let Some(root) = &self.state_root {
            settings.state_root = root.clone();
        }

        let registry = IntegrationRegistry::with_defaults();
        let result = tokio::select! {
            result = run_worker(settings, integrations, &registry) => result?,
            _ = wait_for_shutdown(&mut shutdown_signal) => {
                tracing::warn!("Worker interrupted");
                return Ok(EXIT_INTERRUPTED);
            }
        };

        match &self.output_file {
            Some(path) => {
                write_result(path, &result)?;
                Ok(EXIT_OK)
            }
            None => {
                println!("{}", serde_json::to_string_pretty(&result)?);
                Ok(if result.is_successful() {
                    EXIT_OK
                } else {
                    EXIT_PARTIAL
                })
            }
        }
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let bytes =
        std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_slice(&bytes).with_context(|| format!("Failed to parse {}", path.display()))
}

fn write_result(path: &Path, result: &ExportResult) -> anyhow::Result<()> {
    let bytes = serde_json::to_vec(result)?;
    std::fs::write(path, bytes).with_context(|| format!("Failed to write {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{IntegrationId, SourceType};
    use serde_json::json;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_worker_writes_result_in_request_order() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("state");
        let settings = WorkerSettings {
            job_id: "job-1".to_string(),
            customer_id: "cust".to_string(),
            state_root: PathBuf::from("/nonexistent"),
            concurrency: 2,
            failure_threshold: 10,
            progress_interval_ms: 1000,
            reprocess_historical: false,
        };
        let integrations = vec![
            WorkerIntegration {
                id: IntegrationId::new("gh").unwrap(),
                name: "static".to_string(),
                source_type: SourceType::Sourcecode,
                settings: json!({"projects": [{"ref_id": "r1", "readable_id": "org/r1", "records": [{"id": 1}]}]}),
            },
            WorkerIntegration {
                id: IntegrationId::new("jira").unwrap(),
                name: "static".to_string(),
                source_type: SourceType::Work,
                settings: json!({"projects": []}),
            },
        ];

        let settings_file = dir.path().join("settings.json");
        let integrations_file = dir.path().join("integrations.json");
        let output_file = dir.path().join("out.json");
        std::fs::write(&settings_file, serde_json::to_vec(&settings).unwrap()).unwrap();
        std::fs::write(&integrations_file, serde_json::to_vec(&integrations).unwrap()).unwrap();

        let args = ExportArgs {
            agent_config_file: settings_file,
            integrations_file,
            log_format: "json".to_string(),
            output_file: Some(output_file.clone()),
            state_root: Some(root.clone()),
        };
        let (_tx, rx) = watch::channel(false);
        assert_eq!(args.execute(rx).await.unwrap(), EXIT_OK);

        let result: ExportResult =
            serde_json::from_slice(&std::fs::read(&output_file).unwrap()).unwrap();
        let ids: Vec<&str> = result.integrations.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["gh", "jira"]);
        assert!(root.join("cursors.json").exists());
    }

    #[tokio::test]
    async fn test_missing_settings_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let args = ExportArgs {
            agent_config_file: dir.path().join("missing.json"),
            integrations_file: dir.path().join("missing.json"),
            log_format: "json".to_string(),
            output_file: None,
            state_root: None,
        };
        let (_tx, rx) = watch::channel(false);
        assert!(args.execute(rx).await.is_err());
    }
}

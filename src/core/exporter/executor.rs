//! Execution of one export attempt

use crate::core::supervisor::{RunParams, SubcommandRunner, EXPORT_COMMAND};
use crate::core::worker::{ExportResult, WorkerSettings};
use crate::domain::{AgentError, Result, WorkerIntegration};
use async_trait::async_trait;
use std::path::PathBuf;

/// Result of running the worker for one job
#[derive(Debug)]
pub struct ExecutorOutput {
    pub result: ExportResult,
    /// Worker log owned by the caller, uploaded alongside the data
    pub log_file: Option<PathBuf>,
}

/// Runs the export worker
#[async_trait]
pub trait ExportExecutor: Send + Sync {
    async fn execute(
        &self,
        settings: &WorkerSettings,
        integrations: &[WorkerIntegration],
    ) -> Result<ExecutorOutput>;
}

/// Runs the worker as an isolated `export` subprocess
pub struct SubprocessExecutor {
    runner: SubcommandRunner,
}

impl SubprocessExecutor {
    pub fn new(runner: SubcommandRunner) -> Self {
        Self { runner }
    }
}

#[async_trait]
impl ExportExecutor for SubprocessExecutor {
    async fn execute(
        &self,
        settings: &WorkerSettings,
        integrations: &[WorkerIntegration],
    ) -> Result<ExecutorOutput> {
        let params = RunParams::new(EXPORT_COMMAND, settings.job_id.clone())
            .agent_config(settings)?
            .integrations(&integrations)?
            .capture_output();

        let output = self
            .runner
            .run_keep_log_file::<ExportResult>(params)
            .await?;
        match output.output {
            Some(result) => Ok(ExecutorOutput {
                result,
                log_file: Some(output.log_file),
            }),
            None => {
                let _ = std::fs::remove_file(&output.log_file);
                Err(AgentError::InvalidOutput {
                    command: EXPORT_COMMAND.to_string(),
                    message: "worker produced no result".to_string(),
                })
            }
        }
    }
}

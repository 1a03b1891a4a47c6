//! Export worker
//!
//! Runs inside the isolated `export` subprocess. The supervising agent passes
//! a [`WorkerSettings`] file and an integrations file; the worker runs every
//! integration in request order and returns one [`ExportResult`].

pub mod integration;
pub mod processor;
pub mod result;

pub use integration::{
    entity_kind, Integration, IntegrationContext, IntegrationRegistry, StaticIntegration,
};
pub use processor::{
    external_id, ProcessorOptions, ProcessorOutcome, ProjectProcessor, ProjectWorker,
};
pub use result::{ExportProject, ExportResult, IntegrationResult};

use crate::core::session::{CursorStore, LocalSessionHost, SessionHost};
use crate::domain::{Result, WorkerIntegration};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

/// Agent-side settings handed to the worker through `--agent-config-file`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerSettings {
    pub job_id: String,
    pub customer_id: String,
    pub state_root: PathBuf,
    pub concurrency: usize,
    pub failure_threshold: usize,
    pub progress_interval_ms: u64,
    #[serde(default)]
    pub reprocess_historical: bool,
}

/// Runs every integration and collects their outcomes in request order
///
/// Integration failures are recorded on the integration's result; only a
/// failure to open local state is returned as an error.
pub async fn run_worker(
    settings: WorkerSettings,
    integrations: Vec<WorkerIntegration>,
    registry: &IntegrationRegistry,
) -> Result<ExportResult> {
    let state_root = settings.state_root.clone();
    std::fs::create_dir_all(&state_root)?;

    let cursors = Arc::new(CursorStore::open(&state_root)?);
    let host: Arc<dyn SessionHost> = Arc::new(LocalSessionHost::new(
        &state_root,
        cursors,
        settings.reprocess_historical,
    ));
    let settings = Arc::new(settings);

    tracing::info!(
        job_id = %settings.job_id,
        integrations = integrations.len(),
        reprocess_historical = settings.reprocess_historical,
        "Worker starting"
    );

    let mut result = ExportResult::default();
    for integration in integrations {
        let mut outcome = IntegrationResult::new(
            integration.id.clone(),
            integration.name.clone(),
            integration.source_type,
        );

        match registry.get(&integration.name) {
            None => {
                tracing::error!(
                    integration_id = %integration.id,
                    name = %integration.name,
                    "Unknown integration"
                );
                outcome.error = Some(format!("Unknown integration '{}'", integration.name));
            }
            Some(runner) => {
                let ctx = IntegrationContext {
                    integration: integration.clone(),
                    host: Arc::clone(&host),
                    settings: Arc::clone(&settings),
                };
                match runner.export(ctx).await {
                    Ok(processed) => {
                        outcome.projects = processed.projects;
                        outcome.skipped = processed.skipped;
                    }
                    Err(e) => {
                        tracing::error!(
                            integration_id = %integration.id,
                            error = %e,
                            "Integration export failed"
                        );
                        outcome.error = Some(e.to_string());
                    }
                }
            }
        }

        result.integrations.push(outcome);
    }

    tracing::info!(
        job_id = %settings.job_id,
        projects = result.total_projects(),
        failed = result.failed_projects(),
        "Worker finished"
    );

    Ok(result)
}

//! Single-flight export scheduler
//!
//! Admits export requests into the durable queue and executes queued jobs
//! strictly one at a time: state backup, config translation, worker run,
//! upload, backup cleanup, terminal event.

use super::backup::StateBackup;
use super::executor::ExportExecutor;
use super::queue::{wait_for_shutdown, Delivery, QueueHandle};
use super::translate::{ConfigTranslator, PassthroughTranslator};
use super::upload::{clear_export_dir, HttpUploader, UploadSummary, Uploader};
use crate::config::{AgentConfig, SecretString};
use crate::core::events::{AgentEvent, EventPublisher};
use crate::core::supervisor::{ProcessRegistry, EXPORT_COMMAND};
use crate::core::worker::{ExportResult, WorkerSettings};
use crate::domain::{AgentError, ExportJob, ExportRequest, JobId, Result, UploadError};
use crate::{log_error_with_context, log_export_complete, log_export_start};
use chrono::Utc;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};

/// Exporter settings, usually derived from [`AgentConfig`]
#[derive(Clone)]
pub struct ExporterOptions {
    pub customer_id: String,
    pub api_key: SecretString,
    pub encryption_key: Option<SecretString>,
    pub state_root: PathBuf,
    pub staleness: Duration,
    pub result_timeout: Duration,
    pub concurrency: usize,
    pub failure_threshold: usize,
    pub progress_interval_ms: u64,
}

impl ExporterOptions {
    pub fn from_config(config: &AgentConfig) -> Self {
        Self {
            customer_id: config.agent.customer_id.clone(),
            api_key: config.agent.api_key.clone(),
            encryption_key: config.agent.encryption_key.clone(),
            state_root: config.agent.state_root(),
            staleness: config.export.staleness(),
            result_timeout: config.export.result_timeout(),
            concurrency: config.export.concurrency,
            failure_threshold: config.export.failure_threshold,
            progress_interval_ms: config.export.progress_interval_ms,
        }
    }
}

/// What a successful job produced
#[derive(Debug)]
struct JobReport {
    result: ExportResult,
    upload: UploadSummary,
}

/// Removes a worker log file when dropped
struct OwnedLog(Option<PathBuf>);

impl Drop for OwnedLog {
    fn drop(&mut self) {
        if let Some(path) = self.0.take() {
            if let Err(e) = std::fs::remove_file(&path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(path = %path.display(), error = %e, "Failed to remove worker log");
                }
            }
        }
    }
}

/// Clears the exporting flag when the attempt ends
struct ExportingGuard<'a>(&'a Mutex<Option<JobId>>);

impl Drop for ExportingGuard<'_> {
    fn drop(&mut self) {
        if let Ok(mut current) = self.0.lock() {
            *current = None;
        }
    }
}

/// Durable, single-flight export scheduler
pub struct Exporter {
    options: ExporterOptions,
    queue: QueueHandle,
    publisher: Arc<dyn EventPublisher>,
    executor: Arc<dyn ExportExecutor>,
    registry: Arc<ProcessRegistry>,
    translator: Arc<dyn ConfigTranslator>,
    uploader: Arc<dyn Uploader>,
    exporting: Mutex<Option<JobId>>,
}

impl Exporter {
    /// Creates an exporter with the pass-through translator and HTTP uploader
    pub fn new(
        options: ExporterOptions,
        queue: QueueHandle,
        publisher: Arc<dyn EventPublisher>,
        executor: Arc<dyn ExportExecutor>,
        registry: Arc<ProcessRegistry>,
        upload_part_size: u64,
    ) -> Result<Self> {
        Ok(Self {
            options,
            queue,
            publisher,
            executor,
            registry,
            translator: Arc::new(PassthroughTranslator),
            uploader: Arc::new(HttpUploader::new(upload_part_size)?),
            exporting: Mutex::new(None),
        })
    }

    pub fn with_translator(mut self, translator: Arc<dyn ConfigTranslator>) -> Self {
        self.translator = translator;
        self
    }

    pub fn with_uploader(mut self, uploader: Arc<dyn Uploader>) -> Self {
        self.uploader = uploader;
        self
    }

    /// Validates a request and admits it to the durable queue
    ///
    /// Rejected requests get an `ExportFailed` event and are never retried.
    pub async fn handle_request(&self, request: ExportRequest) -> Result<()> {
        let now = Utc::now();
        let job_id = request.job_id.clone();

        let admitted = request
            .check_fresh(now, self.options.staleness)
            .and_then(|()| ExportJob::from_request(request));

        match admitted {
            Ok(job) => {
                let seq = self.queue.push(&job)?;
                tracing::info!(job_id = %job.job_id, seq, "Export job queued");
                Ok(())
            }
            Err(e) => {
                tracing::warn!(job_id = %job_id, error = %e, "Export request rejected");
                let event = AgentEvent::ExportFailed {
                    job_id,
                    error: e.to_string(),
                    started_at: now,
                    finished_at: Utc::now(),
                };
                self.publish_with_timeout(event).await;
                Err(e)
            }
        }
    }

    /// True while an export attempt is executing
    pub fn is_running(&self) -> bool {
        self.current_job().is_some()
    }

    /// Job id of the executing attempt
    pub fn current_job(&self) -> Option<JobId> {
        self.exporting.lock().ok().and_then(|c| c.clone())
    }

    /// Cancels the executing export if it is `job_id`
    pub fn cancel(&self, job_id: &str) -> bool {
        match self.current_job() {
            Some(current) if current.as_str() == job_id => self.registry.cancel(EXPORT_COMMAND),
            _ => {
                tracing::info!(job_id, "Cancel ignored, job is not executing");
                false
            }
        }
    }

    /// Cancels whatever export is executing
    pub fn cancel_current(&self) -> bool {
        self.registry.cancel(EXPORT_COMMAND)
    }

    /// Executes delivered jobs until the channel closes or `shutdown` fires
    pub async fn run(
        &self,
        mut deliveries: mpsc::Receiver<Delivery>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                delivery = deliveries.recv() => match delivery {
                    Some(delivery) => self.process(delivery).await,
                    None => break,
                },
                _ = wait_for_shutdown(&mut shutdown) => break,
            }
        }
        tracing::info!("Exporter stopped");
    }

    /// Runs one delivered job to a terminal event and acknowledges it
    pub async fn process(&self, delivery: Delivery) {
        let Delivery { job, done } = delivery;
        let started_at = Utc::now();
        let timer = Instant::now();

        log_export_start!(&job.job_id, job.integrations.len());
        self.publish_with_timeout(AgentEvent::ExportStarted {
            job_id: job.job_id.to_string(),
            started_at,
        })
        .await;

        let event = match self.execute(&job).await {
            Ok(report) => {
                log_export_complete!(&job.job_id, report.upload.parts, timer.elapsed());
                AgentEvent::ExportCompleted {
                    job_id: job.job_id.to_string(),
                    success: report.result.is_successful(),
                    integrations: report.result.integrations,
                    upload_url: job.upload_url.clone(),
                    upload_parts: report.upload.parts,
                    upload_size: report.upload.size,
                    started_at,
                    finished_at: Utc::now(),
                }
            }
            Err(e) => {
                if e.is_cancelled() {
                    tracing::info!(job_id = %job.job_id, "Export cancelled");
                } else {
                    log_error_with_context!(&e, "Export failed");
                }
                AgentEvent::ExportFailed {
                    job_id: job.job_id.to_string(),
                    error: e.to_string(),
                    started_at,
                    finished_at: Utc::now(),
                }
            }
        };

        self.publish_with_timeout(event).await;
        let _ = done.send(());
    }

    fn begin(&self, job_id: &JobId) -> Result<ExportingGuard<'_>> {
        let mut current = self
            .exporting
            .lock()
            .map_err(|_| AgentError::Other("Exporting flag lock poisoned".to_string()))?;
        if current.is_some() {
            return Err(AgentError::AlreadyRunning);
        }
        *current = Some(job_id.clone());
        Ok(ExportingGuard(&self.exporting))
    }

    async fn execute(&self, job: &ExportJob) -> Result<JobReport> {
        let _flag = self.begin(&job.job_id)?;
        let root = &self.options.state_root;

        let backup = StateBackup::new(root);
        backup.prepare()?;
        clear_export_dir(root)?;

        let integrations = job
            .integrations
            .iter()
            .map(|request| {
                self.translator.translate(
                    request,
                    &self.options.customer_id,
                    self.options.encryption_key.as_ref(),
                )
            })
            .collect::<Result<Vec<_>>>()?;

        let settings = WorkerSettings {
            job_id: job.job_id.to_string(),
            customer_id: self.options.customer_id.clone(),
            state_root: root.clone(),
            concurrency: self.options.concurrency,
            failure_threshold: self.options.failure_threshold,
            progress_interval_ms: self.options.progress_interval_ms,
            reprocess_historical: job.reprocess_historical,
        };

        let output = self.executor.execute(&settings, &integrations).await?;
        let log = OwnedLog(output.log_file);

        let upload = match self
            .uploader
            .upload(
                root,
                &job.upload_url,
                &job.job_id,
                &self.options.api_key,
                log.0.as_deref(),
            )
            .await
        {
            Ok(summary) => summary,
            Err(AgentError::Upload(UploadError::NoFiles)) => {
                tracing::info!(job_id = %job.job_id, "Nothing to upload");
                UploadSummary::default()
            }
            Err(e) => return Err(e),
        };
        drop(log);

        if output.result.is_successful() {
            backup.remove_backup()?;
        } else {
            tracing::warn!(
                job_id = %job.job_id,
                failed_projects = output.result.failed_projects(),
                "Export finished with failures, keeping state backup"
            );
        }

        Ok(JobReport {
            result: output.result,
            upload,
        })
    }

    async fn publish_with_timeout(&self, event: AgentEvent) {
        let job_id = event.job_id().to_string();
        match tokio::time::timeout(self.options.result_timeout, self.publisher.publish(event)).await
        {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::error!(job_id = %job_id, error = %e, "Failed to publish event"),
            Err(_) => tracing::error!(
                job_id = %job_id,
                timeout_secs = self.options.result_timeout.as_secs(),
                "Timed out publishing event"
            ),
        }
    }
}

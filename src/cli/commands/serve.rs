//! Serve command implementation
//!
//! Runs the agent. Control messages arrive on stdin as newline-delimited
//! JSON; events leave on stdout the same way. Logs go to stderr.
//!
//! ```text
//! {"type":"export","job_id":"job-1","integrations":[..],"requested_at":"..","upload_url":".."}
//! {"type":"cancel","job_id":"job-1"}
//! ```
//!
//! When stdin closes, the agent finishes every queued job and exits.

use super::{EXIT_CONFIG, EXIT_INTERRUPTED, EXIT_OK};
use crate::config::{load_config, AgentConfig};
use crate::core::events::{EventPublisher, StdoutPublisher};
use crate::core::exporter::{
    wait_for_shutdown, DurableQueue, Exporter, ExporterOptions, QueueHandle, SubprocessExecutor,
    QUEUE_DIR,
};
use crate::core::supervisor::{ProcessRegistry, RunnerOptions, SubcommandRunner, TracingLogSink};
use crate::domain::ExportRequest;
use clap::Args;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;

const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Arguments for the serve command
#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Exit once stdin closes and the queue is empty (default), or keep running
    #[arg(long)]
    pub keep_running: bool,
}

/// Message from the control plane
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlMessage {
    /// Admit an export job
    Export(ExportRequest),
    /// Cancel the executing export
    Cancel { job_id: String },
}

impl ServeArgs {
    /// Execute the serve command
    pub async fn execute(
        &self,
        config_path: &str,
        shutdown_signal: watch::Receiver<bool>,
    ) -> anyhow::Result<i32> {
        let config = match load_config(config_path) {
            Ok(c) => c,
            Err(e) => {
                tracing::error!(error = %e, "Failed to load configuration");
                eprintln!("Failed to load configuration: {e}");
                return Ok(EXIT_CONFIG);
            }
        };

        let options = ExporterOptions::from_config(&config);
        std::fs::create_dir_all(&options.state_root)?;
        let (queue, handle, deliveries) = DurableQueue::open(options.state_root.join(QUEUE_DIR))?;

        let exporter = Arc::new(build_exporter(&config, options, handle.clone())?);

        tracing::info!(
            customer_id = %config.agent.customer_id,
            state_root = %config.agent.state_root,
            pending = handle.pending().map(|p| p.len()).unwrap_or(0),
            "Agent started"
        );

        let queue_task = tokio::spawn(queue.run(shutdown_signal.clone()));
        let exporter_task = {
            let exporter = Arc::clone(&exporter);
            let shutdown = shutdown_signal.clone();
            tokio::spawn(async move { exporter.run(deliveries, shutdown).await })
        };

        let mut shutdown = shutdown_signal.clone();
        tokio::select! {
            result = self.intake(&exporter, &handle) => result?,
            _ = wait_for_shutdown(&mut shutdown) => {}
        }

        let interrupted = *shutdown_signal.borrow();
        if interrupted {
            tracing::info!("Shutdown requested, cancelling running export");
            exporter.cancel_current();
        } else {
            // Drained: dropping the queue closes the delivery channel.
            queue_task.abort();
        }

        // The exporter finishes the current job before it observes shutdown.
        if let Err(e) = exporter_task.await {
            tracing::error!(error = %e, "Exporter task failed");
        }
        // The queue removes the acknowledged job before it stops.
        match queue_task.await {
            Ok(Err(e)) => tracing::warn!(error = %e, "Queue stopped with an error"),
            Err(e) if !e.is_cancelled() => tracing::error!(error = %e, "Queue task failed"),
            _ => {}
        }

        Ok(if interrupted { EXIT_INTERRUPTED } else { EXIT_OK })
    }

    /// Reads control messages until stdin closes, then waits for the queue to drain
    async fn intake(&self, exporter: &Exporter, queue: &QueueHandle) -> anyhow::Result<()> {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Some(line) = lines.next_line().await? {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<ControlMessage>(line) {
                Ok(ControlMessage::Export(request)) => {
                    // Rejections were already reported as events.
                    let _ = exporter.handle_request(request).await;
                }
                Ok(ControlMessage::Cancel { job_id }) => {
                    exporter.cancel(&job_id);
                }
                Err(e) => tracing::warn!(error = %e, "Ignoring malformed control message"),
            }
        }

        tracing::info!("Control input closed");
        if self.keep_running {
            std::future::pending::<()>().await;
        }
        while !queue.pending()?.is_empty() || exporter.is_running() {
            tokio::time::sleep(DRAIN_POLL_INTERVAL).await;
        }
        Ok(())
    }
}

fn build_exporter(
    config: &AgentConfig,
    options: ExporterOptions,
    queue: QueueHandle,
) -> anyhow::Result<Exporter> {
    let publisher: Arc<dyn EventPublisher> = Arc::new(StdoutPublisher::new());
    let registry = Arc::new(ProcessRegistry::new());

    let mut runner = SubcommandRunner::new(
        Arc::clone(&registry),
        Arc::clone(&publisher),
        RunnerOptions {
            state_root: options.state_root.clone(),
            temp_dir: None,
            cancel_grace: config.export.cancel_grace(),
            echo_output: false,
        },
    )?;
    if config.logging.forward_child_logs {
        runner = runner.with_log_sink(Arc::new(TracingLogSink));
    }

    Ok(Exporter::new(
        options,
        queue,
        publisher,
        Arc::new(SubprocessExecutor::new(runner)),
        registry,
        config.export.upload_part_size_bytes(),
    )?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_export_message() {
        let msg: ControlMessage = serde_json::from_str(
            r#"{"type":"export","job_id":"job-1","integrations":[],"requested_at":"2025-01-01T00:00:00Z","upload_url":"https://u"}"#,
        )
        .unwrap();
        match msg {
            ControlMessage::Export(req) => {
                assert_eq!(req.job_id, "job-1");
                assert!(!req.reprocess_historical);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_parse_cancel_message() {
        let msg: ControlMessage =
            serde_json::from_str(r#"{"type":"cancel","job_id":"job-1"}"#).unwrap();
        assert!(matches!(msg, ControlMessage::Cancel { ref job_id } if job_id == "job-1"));
    }

    #[test]
    fn test_unknown_message_type() {
        assert!(serde_json::from_str::<ControlMessage>(r#"{"type":"reboot"}"#).is_err());
    }
}

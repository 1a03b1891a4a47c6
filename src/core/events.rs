//! Control-plane events
//!
//! The exporter reports job lifecycle through an [`EventPublisher`]; the
//! subcommand runner uses the same channel for crash reports. The transport
//! is pluggable: [`StdoutPublisher`] writes one JSON object per line,
//! [`ChannelPublisher`] hands events to an in-process receiver.

use crate::core::worker::IntegrationResult;
use crate::domain::{AgentError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, Mutex};

/// Event emitted towards the control plane
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    /// A job left the queue and is about to run
    ExportStarted {
        job_id: String,
        started_at: DateTime<Utc>,
    },

    /// A job was rejected or failed
    ExportFailed {
        job_id: String,
        error: String,
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
    },

    /// A job ran to completion
    ExportCompleted {
        job_id: String,
        success: bool,
        integrations: Vec<IntegrationResult>,
        upload_url: String,
        upload_parts: usize,
        upload_size: u64,
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
    },

    /// A worker process crashed; `output` is its captured stderr
    CrashReport {
        correlation_id: String,
        command: String,
        exit_code: Option<i32>,
        output: String,
    },
}

impl AgentEvent {
    /// Job or correlation id the event belongs to
    pub fn job_id(&self) -> &str {
        match self {
            AgentEvent::ExportStarted { job_id, .. }
            | AgentEvent::ExportFailed { job_id, .. }
            | AgentEvent::ExportCompleted { job_id, .. } => job_id,
            AgentEvent::CrashReport { correlation_id, .. } => correlation_id,
        }
    }

    /// True for events that end a job
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AgentEvent::ExportFailed { .. } | AgentEvent::ExportCompleted { .. }
        )
    }
}

/// Sends events to the control plane
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: AgentEvent) -> Result<()>;
}

/// Writes events to stdout as newline-delimited JSON
#[derive(Default)]
pub struct StdoutPublisher {
    lock: Mutex<()>,
}

impl StdoutPublisher {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EventPublisher for StdoutPublisher {
    async fn publish(&self, event: AgentEvent) -> Result<()> {
        let mut line = serde_json::to_vec(&event)?;
        line.push(b'\n');

        let _guard = self.lock.lock().await;
        let mut stdout = tokio::io::stdout();
        stdout
            .write_all(&line)
            .await
            .map_err(|e| AgentError::Publish(e.to_string()))?;
        stdout
            .flush()
            .await
            .map_err(|e| AgentError::Publish(e.to_string()))?;

        tracing::debug!(job_id = %event.job_id(), "Event published");
        Ok(())
    }
}

/// Forwards events into a tokio channel
#[derive(Clone)]
pub struct ChannelPublisher {
    tx: mpsc::UnboundedSender<AgentEvent>,
}

impl ChannelPublisher {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<AgentEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl EventPublisher for ChannelPublisher {
    async fn publish(&self, event: AgentEvent) -> Result<()> {
        self.tx
            .send(event)
            .map_err(|_| AgentError::Publish("Event receiver closed".to_string()))
    }
}

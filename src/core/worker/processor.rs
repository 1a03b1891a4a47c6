//! Concurrent project processor
//!
//! Fans a list of projects out over a bounded pool of tokio tasks. Every
//! project gets its own child session under the integration's root session;
//! the session is completed only when the project succeeds, so a failed
//! project keeps its previous cursor.
//!
//! Project failures are data: they are recorded in the outcome and never abort
//! the batch. Once more than `failure_threshold` projects have failed, workers
//! stop starting new projects. Anything still queued at that point is reported
//! as skipped.

use super::result::ExportProject;
use crate::core::session::{ExportSession, SessionRole};
use crate::domain::{AgentError, Project, Result, SourceType};
use async_trait::async_trait;
use futures::future::join_all;
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use tokio::sync::mpsc;

/// Per-project export logic
#[async_trait]
pub trait ProjectWorker<P: Project>: Send + Sync {
    async fn export_project(&self, project: &P, session: &ExportSession) -> Result<()>;
}

/// Processor settings
#[derive(Debug, Clone)]
pub struct ProcessorOptions {
    pub customer_id: String,
    pub source_type: SourceType,
    pub entity_kind: String,
    pub concurrency: usize,
    pub failure_threshold: usize,
}

/// Outcomes of one processor run
#[derive(Debug, Clone, Default)]
pub struct ProcessorOutcome {
    /// One entry per dispatched project, in completion order
    pub projects: Vec<ExportProject>,
    /// External ids of projects that were never dispatched
    pub skipped: Vec<String>,
}

impl ProcessorOutcome {
    pub fn failed(&self) -> usize {
        self.projects.iter().filter(|p| p.is_failed()).count()
    }
}

/// Stable external id of a project
///
/// Hex SHA-256 over customer, source type, entity kind and ref id.
pub fn external_id(customer_id: &str, source_type: SourceType, kind: &str, ref_id: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(customer_id.as_bytes());
    hasher.update(b"/");
    hasher.update(source_type.as_str().as_bytes());
    hasher.update(b"/");
    hasher.update(kind.as_bytes());
    hasher.update(b"/");
    hasher.update(ref_id.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Bounded fan-out over projects
pub struct ProjectProcessor<P: Project> {
    options: ProcessorOptions,
    worker: Arc<dyn ProjectWorker<P>>,
    parent: Arc<ExportSession>,
}

struct Shared {
    failures: AtomicUsize,
    outcomes: Mutex<Vec<ExportProject>>,
    skipped: Mutex<Vec<String>>,
    fatal: OnceLock<String>,
}

impl<P: Project> ProjectProcessor<P> {
    pub fn new(
        options: ProcessorOptions,
        worker: Arc<dyn ProjectWorker<P>>,
        parent: Arc<ExportSession>,
    ) -> Self {
        Self {
            options,
            worker,
            parent,
        }
    }

    /// Processes all projects and waits for every worker to drain
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::Processor`] when a framework-level step failed
    /// (for example opening a project session). Individual project errors are
    /// reported in the outcome instead.
    pub async fn run(&self, projects: Vec<P>) -> Result<ProcessorOutcome> {
        let total = projects.len();
        let concurrency = self.options.concurrency.max(1).min(total.max(1));

        tracing::info!(
            kind = %self.options.entity_kind,
            projects = total,
            concurrency,
            "Processing projects"
        );

        self.parent.set_total(total as u64).await?;

        let (tx, rx) = mpsc::channel(total.max(1));
        for project in projects {
            tx.send(project)
                .await
                .map_err(|_| AgentError::Processor("Project queue closed".to_string()))?;
        }
        drop(tx);

        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        let shared = Arc::new(Shared {
            failures: AtomicUsize::new(0),
            outcomes: Mutex::new(Vec::with_capacity(total)),
            skipped: Mutex::new(Vec::new()),
            fatal: OnceLock::new(),
        });

        let mut handles = Vec::with_capacity(concurrency);
        for _ in 0..concurrency {
            let rx = Arc::clone(&rx);
            let shared = Arc::clone(&shared);
            let worker = Arc::clone(&self.worker);
            let parent = Arc::clone(&self.parent);
            let options = self.options.clone();

            handles.push(tokio::spawn(async move {
                loop {
                    let next = rx.lock().await.recv().await;
                    let Some(project) = next else { break };
                    process_one(&options, worker.as_ref(), &parent, &shared, project).await;
                }
            }));
        }

        for joined in join_all(handles).await {
            if let Err(e) = joined {
                let _ = shared.fatal.set(format!("Project worker task failed: {e}"));
            }
        }

        if let Some(message) = shared.fatal.get() {
            return Err(AgentError::Processor(message.clone()));
        }

        let projects = take(&shared.outcomes);
        let skipped = take(&shared.skipped);
        let outcome = ProcessorOutcome { projects, skipped };

        tracing::info!(
            kind = %self.options.entity_kind,
            completed = outcome.projects.len(),
            failed = outcome.failed(),
            skipped = outcome.skipped.len(),
            "Projects processed"
        );

        Ok(outcome)
    }
}

async fn process_one<P: Project>(
    options: &ProcessorOptions,
    worker: &dyn ProjectWorker<P>,
    parent: &ExportSession,
    shared: &Shared,
    project: P,
) {
    let id = external_id(
        &options.customer_id,
        options.source_type,
        &options.entity_kind,
        project.ref_id(),
    );

    if shared.fatal.get().is_some() || shared.failures.load(Ordering::SeqCst) > options.failure_threshold {
        tracing::debug!(ref_id = %project.ref_id(), "Skipping project, failure threshold exceeded");
        push(&shared.skipped, id);
        return;
    }

    let session = match parent
        .child(&options.entity_kind, project.readable_id(), SessionRole::Normal)
        .await
    {
        Ok(session) => session,
        Err(e) => {
            let _ = shared.fatal.set(format!(
                "Failed to open session for {}: {e}",
                project.readable_id()
            ));
            push(&shared.skipped, id);
            return;
        }
    };

    let result = match worker.export_project(&project, &session).await {
        Ok(()) => session.done().await,
        Err(e) => Err(e),
    };

    let error = match result {
        Ok(()) => None,
        Err(e) => {
            let failures = shared.failures.fetch_add(1, Ordering::SeqCst) + 1;
            tracing::warn!(
                ref_id = %project.ref_id(),
                readable_id = %project.readable_id(),
                failures,
                error = %e,
                "Project export failed"
            );
            Some(e.to_string())
        }
    };

    if let Err(e) = parent.inc_progress().await {
        tracing::debug!(error = %e, "Failed to report progress");
    }

    push(
        &shared.outcomes,
        ExportProject {
            id,
            ref_id: project.ref_id().to_string(),
            readable_id: project.readable_id().to_string(),
            error,
        },
    );
}

fn push<T>(list: &Mutex<Vec<T>>, item: T) {
    match list.lock() {
        Ok(mut guard) => guard.push(item),
        Err(poisoned) => poisoned.into_inner().push(item),
    }
}

fn take<T>(list: &Mutex<Vec<T>>) -> Vec<T> {
    match list.lock() {
        Ok(mut guard) => std::mem::take(&mut *guard),
        Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
    }
}

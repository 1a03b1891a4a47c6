//! Integrations runnable inside the export worker
//!
//! An [`Integration`] exports one configured source. Vendor API clients live
//! outside this crate; the built-in [`StaticIntegration`] replays projects and
//! records declared in the integration settings, which is what local runs and
//! tests use.

use super::processor::{ProcessorOptions, ProcessorOutcome, ProjectProcessor, ProjectWorker};
use super::WorkerSettings;
use crate::core::session::{ExportSession, SessionContext, SessionHost, SessionRole};
use crate::domain::{
    AgentError, Calendar, Project, Repo, Result, SourceType, WorkProject, WorkerIntegration,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Everything an integration needs for one run
#[derive(Clone)]
pub struct IntegrationContext {
    pub integration: WorkerIntegration,
    pub host: Arc<dyn SessionHost>,
    pub settings: Arc<WorkerSettings>,
}

impl IntegrationContext {
    fn session_context(&self) -> SessionContext {
        SessionContext {
            integration: self.integration.id.clone(),
            source_type: self.integration.source_type,
            progress_interval: Duration::from_millis(self.settings.progress_interval_ms),
        }
    }

    fn processor_options(&self, entity_kind: &str) -> ProcessorOptions {
        ProcessorOptions {
            customer_id: self.settings.customer_id.clone(),
            source_type: self.integration.source_type,
            entity_kind: entity_kind.to_string(),
            concurrency: self.settings.concurrency,
            failure_threshold: self.settings.failure_threshold,
        }
    }
}

/// One exportable source
#[async_trait]
pub trait Integration: Send + Sync {
    /// Registry name, matched against the integration's `name`
    fn name(&self) -> &str;

    async fn export(&self, ctx: IntegrationContext) -> Result<ProcessorOutcome>;
}

/// Name-keyed set of integrations
#[derive(Default)]
pub struct IntegrationRegistry {
    integrations: HashMap<String, Arc<dyn Integration>>,
}

impl IntegrationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in integrations
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(StaticIntegration));
        registry
    }

    pub fn register(&mut self, integration: Arc<dyn Integration>) {
        self.integrations
            .insert(integration.name().to_string(), integration);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Integration>> {
        self.integrations.get(name).cloned()
    }
}

/// Entity kind of the top-level projects of a source type
pub fn entity_kind(source_type: SourceType) -> &'static str {
    match source_type {
        SourceType::Sourcecode => "repo",
        SourceType::Work => "project",
        SourceType::Calendar => "calendar",
    }
}

#[derive(Debug, Clone, Deserialize)]
struct StaticSettings {
    #[serde(default)]
    projects: Vec<StaticProject>,
}

#[derive(Debug, Clone, Deserialize)]
struct StaticProject {
    ref_id: String,
    readable_id: String,
    #[serde(default)]
    records: Vec<Value>,
    /// Error message to fail this project with
    #[serde(default)]
    fail: Option<String>,
}

/// Replays projects declared in settings:
/// `{"projects":[{"ref_id","readable_id","records":[..],"fail":"message"}]}`
///
/// Records carrying an RFC3339 `updated_at` no newer than the project's cursor
/// are not re-sent.
pub struct StaticIntegration;

#[async_trait]
impl Integration for StaticIntegration {
    fn name(&self) -> &str {
        "static"
    }

    async fn export(&self, ctx: IntegrationContext) -> Result<ProcessorOutcome> {
        let settings: StaticSettings = serde_json::from_value(ctx.integration.settings.clone())
            .map_err(|e| {
                AgentError::Validation(format!(
                    "Invalid settings for integration {}: {e}",
                    ctx.integration.id
                ))
            })?;

        let source_type = ctx.integration.source_type;
        let kind = entity_kind(source_type);
        let root = Arc::new(
            ExportSession::open_root(
                Arc::clone(&ctx.host),
                ctx.session_context(),
                kind,
                SessionRole::Tracking,
            )
            .await?,
        );

        let worker = Arc::new(StaticWorker {
            projects: settings
                .projects
                .iter()
                .map(|p| (p.ref_id.clone(), p.clone()))
                .collect(),
        });
        let options = ctx.processor_options(kind);

        let outcome = match source_type {
            SourceType::Sourcecode => {
                let repos = settings
                    .projects
                    .iter()
                    .map(|p| Repo {
                        ref_id: p.ref_id.clone(),
                        name: p.readable_id.clone(),
                    })
                    .collect();
                process::<Repo>(options, worker, Arc::clone(&root), repos).await?
            }
            SourceType::Work => {
                let projects = settings
                    .projects
                    .iter()
                    .map(|p| WorkProject {
                        ref_id: p.ref_id.clone(),
                        key: p.readable_id.clone(),
                    })
                    .collect();
                process::<WorkProject>(options, worker, Arc::clone(&root), projects).await?
            }
            SourceType::Calendar => {
                let calendars = settings
                    .projects
                    .iter()
                    .map(|p| Calendar {
                        ref_id: p.ref_id.clone(),
                        name: p.readable_id.clone(),
                    })
                    .collect();
                process::<Calendar>(options, worker, Arc::clone(&root), calendars).await?
            }
        };

        if outcome.failed() == 0 && outcome.skipped.is_empty() {
            root.done().await?;
        }
        Ok(outcome)
    }
}

async fn process<P: Project>(
    options: ProcessorOptions,
    worker: Arc<StaticWorker>,
    root: Arc<ExportSession>,
    projects: Vec<P>,
) -> Result<ProcessorOutcome> {
    let worker: Arc<dyn ProjectWorker<P>> = worker;
    ProjectProcessor::new(options, worker, root).run(projects).await
}

struct StaticWorker {
    projects: HashMap<String, StaticProject>,
}

fn updated_at(record: &Value) -> Option<DateTime<Utc>> {
    record
        .get("updated_at")
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|t| t.with_timezone(&Utc))
}

#[async_trait]
impl<P: Project> ProjectWorker<P> for StaticWorker {
    async fn export_project(&self, project: &P, session: &ExportSession) -> Result<()> {
        let declared = self.projects.get(project.ref_id()).ok_or_else(|| {
            AgentError::Validation(format!("Unknown project {}", project.ref_id()))
        })?;

        if let Some(message) = &declared.fail {
            return Err(AgentError::Other(message.clone()));
        }

        let since = session.last_processed_time()?;
        let records: Vec<&Value> = declared
            .records
            .iter()
            .filter(|r| match (since, updated_at(r)) {
                (Some(since), Some(at)) => at > since,
                _ => true,
            })
            .collect();

        tracing::debug!(
            readable_id = %project.readable_id(),
            records = records.len(),
            incremental = since.is_some(),
            "Exporting project"
        );

        session.set_total(records.len() as u64).await?;
        for record in records {
            session.send(record.clone()).await?;
        }
        Ok(())
    }
}

//! Worker result document
//!
//! The worker writes one [`ExportResult`] to its `--output-file`; the agent
//! decodes it and forwards the per-integration breakdown in the completed event.

use crate::domain::{IntegrationId, SourceType};
use serde::{Deserialize, Serialize};

/// Outcome of one project
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportProject {
    /// Stable external id
    pub id: String,

    /// Source-side id
    pub ref_id: String,

    /// Human-readable id (repo name, project key, ...)
    pub readable_id: String,

    /// Error message when the project failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ExportProject {
    pub fn is_failed(&self) -> bool {
        self.error.is_some()
    }
}

/// Outcome of one integration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrationResult {
    pub id: IntegrationId,

    pub name: String,

    pub source_type: SourceType,

    /// Integration-level error (processor abort, unknown integration, ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Project outcomes in completion order
    #[serde(default)]
    pub projects: Vec<ExportProject>,

    /// External ids of projects never dispatched because the failure
    /// threshold was exceeded
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub skipped: Vec<String>,
}

impl IntegrationResult {
    pub fn new(id: IntegrationId, name: impl Into<String>, source_type: SourceType) -> Self {
        Self {
            id,
            name: name.into(),
            source_type,
            error: None,
            projects: Vec::new(),
            skipped: Vec::new(),
        }
    }

    /// Number of failed projects
    pub fn failed_projects(&self) -> usize {
        self.projects.iter().filter(|p| p.is_failed()).count()
    }

    /// True when neither the integration nor any project failed and nothing was skipped
    pub fn is_successful(&self) -> bool {
        self.error.is_none() && self.failed_projects() == 0 && self.skipped.is_empty()
    }
}

/// Result document written by the export worker
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportResult {
    /// One entry per requested integration, in request order
    pub integrations: Vec<IntegrationResult>,
}

impl ExportResult {
    pub fn is_successful(&self) -> bool {
        self.integrations.iter().all(IntegrationResult::is_successful)
    }

    pub fn total_projects(&self) -> usize {
        self.integrations.iter().map(|i| i.projects.len()).sum()
    }

    pub fn failed_projects(&self) -> usize {
        self.integrations
            .iter()
            .map(IntegrationResult::failed_projects)
            .sum()
    }
}

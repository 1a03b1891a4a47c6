//! Export job definitions
//!
//! An [`ExportRequest`] is what the control plane sends. Once admitted it
//! becomes an immutable [`ExportJob`], which is what the durable queue stores
//! and the exporter executes.

use super::errors::AgentError;
use super::ids::{IntegrationId, JobId};
use super::result::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Kind of source system an integration talks to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    /// Source code hosting (GitHub, GitLab, Bitbucket, ...)
    Sourcecode,
    /// Work tracking (Jira, Azure Boards, ...)
    Work,
    /// Calendars
    Calendar,
}

impl SourceType {
    /// Returns the source type as its wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Sourcecode => "sourcecode",
            SourceType::Work => "work",
            SourceType::Calendar => "calendar",
        }
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sourcecode" => Ok(SourceType::Sourcecode),
            "work" => Ok(SourceType::Work),
            "calendar" => Ok(SourceType::Calendar),
            _ => Err(format!(
                "Invalid source type '{s}'. Must be one of: sourcecode, work, calendar"
            )),
        }
    }
}

/// Backend per-source configuration as sent by the control plane
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntegrationRequest {
    /// Integration identifier
    pub id: IntegrationId,

    /// Integration name (e.g. "github", "jira", "static")
    pub name: String,

    /// Kind of source
    pub source_type: SourceType,

    /// Opaque integration settings, possibly carrying credentials
    #[serde(default)]
    pub settings: serde_json::Value,
}

/// Raw export request as received from the control plane
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportRequest {
    /// Job identifier
    pub job_id: String,

    /// Sources to export
    pub integrations: Vec<IntegrationRequest>,

    /// When the control plane issued the request
    pub requested_at: DateTime<Utc>,

    /// Ignore stored cursors and export full history
    #[serde(default)]
    pub reprocess_historical: bool,

    /// Where the produced files are uploaded
    pub upload_url: String,
}

impl ExportRequest {
    /// Rejects requests older than `limit` relative to `now`
    ///
    /// A redelivered request from long ago would otherwise resurrect
    /// duplicate work after a crash.
    pub fn check_fresh(&self, now: DateTime<Utc>, limit: Duration) -> Result<()> {
        let age = now - self.requested_at;
        if age.num_milliseconds() > limit.as_millis() as i64 {
            return Err(AgentError::StaleJob {
                job_id: self.job_id.clone(),
                age_seconds: age.num_seconds(),
                limit_seconds: limit.as_secs(),
            });
        }
        Ok(())
    }
}

/// An admitted, immutable export job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportJob {
    /// Job identifier
    pub job_id: JobId,

    /// Sources to export, in request order
    pub integrations: Vec<IntegrationRequest>,

    /// When the control plane issued the request
    pub requested_at: DateTime<Utc>,

    /// Ignore stored cursors and export full history
    pub reprocess_historical: bool,

    /// Where the produced files are uploaded
    pub upload_url: String,
}

impl ExportJob {
    /// Validates a raw request and turns it into a job
    ///
    /// # Errors
    ///
    /// Returns a validation error if the job id is malformed, there are no
    /// integrations, or the upload URL does not parse.
    pub fn from_request(request: ExportRequest) -> Result<Self> {
        let job_id = JobId::new(request.job_id).map_err(AgentError::Validation)?;

        if request.integrations.is_empty() {
            return Err(AgentError::Validation(format!(
                "Export job {job_id} has no integrations"
            )));
        }

        let url = url::Url::parse(&request.upload_url).map_err(|e| {
            AgentError::Validation(format!(
                "Export job {job_id} has invalid upload_url: {e}"
            ))
        })?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(AgentError::Validation(format!(
                "Export job {job_id} upload_url must be http or https"
            )));
        }

        Ok(Self {
            job_id,
            integrations: request.integrations,
            requested_at: request.requested_at,
            reprocess_historical: request.reprocess_historical,
            upload_url: request.upload_url,
        })
    }
}

/// Source-neutral integration config handed to the worker process
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerIntegration {
    /// Integration identifier
    pub id: IntegrationId,

    /// Integration name used to pick the implementation
    pub name: String,

    /// Kind of source
    pub source_type: SourceType,

    /// Translated settings
    #[serde(default)]
    pub settings: serde_json::Value,
}

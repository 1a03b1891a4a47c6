//! Domain models and types for the agent.
//!
//! # Overview
//!
//! The domain layer provides:
//! - **Strongly-typed identifiers** ([`JobId`], [`IntegrationId`], [`SessionId`])
//! - **Job models** ([`ExportRequest`], [`ExportJob`], [`WorkerIntegration`])
//! - **Units of work** ([`Project`] and its [`Repo`], [`WorkProject`], [`Calendar`] variants)
//! - **Error types** ([`AgentError`], [`SubprocessError`], [`UploadError`], [`SessionError`])
//! - **Result type alias** ([`Result`])
//!
//! # Error Handling
//!
//! All fallible operations return [`Result<T, AgentError>`]:
//!
//! ```rust
//! use hostagent::domain::{AgentError, JobId, Result};
//!
//! fn parse(raw: &str) -> Result<JobId> {
//!     JobId::new(raw).map_err(AgentError::Validation)
//! }
//! # assert!(parse("job-1").is_ok());
//! ```

pub mod errors;
pub mod ids;
pub mod job;
pub mod project;
pub mod result;

// Re-export commonly used types for convenience
pub use errors::{AgentError, SessionError, SubprocessError, UploadError};
pub use ids::{IntegrationId, JobId, SessionId};
pub use job::{ExportJob, ExportRequest, IntegrationRequest, SourceType, WorkerIntegration};
pub use project::{Calendar, Project, Repo, WorkProject};
pub use result::Result;

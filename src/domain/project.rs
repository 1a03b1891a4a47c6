//! Units of work fanned out by the project processor
//!
//! A project is whatever an integration iterates over: a repository, a work
//! tracking project or a calendar. The processor only needs two stable
//! identifiers from it.

use serde::{Deserialize, Serialize};

/// Polymorphic unit of work
pub trait Project: Send + Sync + 'static {
    /// Stable identifier in the source system
    fn ref_id(&self) -> &str;

    /// Human-readable identifier (e.g. `org/repo`)
    fn readable_id(&self) -> &str;
}

/// Source code repository
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repo {
    /// Repository id in the source system
    pub ref_id: String,
    /// Full repository name
    pub name: String,
}

impl Project for Repo {
    fn ref_id(&self) -> &str {
        &self.ref_id
    }

    fn readable_id(&self) -> &str {
        &self.name
    }
}

/// Work tracking project
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkProject {
    /// Project id in the source system
    pub ref_id: String,
    /// Project key (e.g. `PLAT`)
    pub key: String,
}

impl Project for WorkProject {
    fn ref_id(&self) -> &str {
        &self.ref_id
    }

    fn readable_id(&self) -> &str {
        &self.key
    }
}

/// Calendar
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Calendar {
    /// Calendar id in the source system
    pub ref_id: String,
    /// Calendar owner or display name
    pub name: String,
}

impl Project for Calendar {
    fn ref_id(&self) -> &str {
        &self.ref_id
    }

    fn readable_id(&self) -> &str {
        &self.name
    }
}

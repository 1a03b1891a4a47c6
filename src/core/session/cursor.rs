//! Persistent cursor store
//!
//! Cursors record the last successfully completed export window per
//! `{integration, entity kind}` so the next run can be incremental. The store is
//! a single JSON document, rewritten atomically on every change.

use crate::domain::{AgentError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// File name of the cursor store under the state root
pub const CURSOR_FILE: &str = "cursors.json";

/// Status of the last session for a cursor key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CursorStatus {
    /// A session was opened and has not completed
    InProgress,
    /// The last session completed and committed its cursor
    Completed,
    /// No session has run yet
    #[default]
    NotStarted,
}

/// Persisted state for one cursor key
///
/// # Examples
///
/// ```
/// use hostagent::core::session::{CursorEntry, CursorStatus};
///
/// let entry = CursorEntry::default();
/// assert!(entry.cursor.is_none());
/// assert_eq!(entry.status, CursorStatus::NotStarted);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CursorEntry {
    /// Opaque cursor (RFC3339 start time of the last completed session)
    pub cursor: Option<String>,

    /// Status of the last session
    #[serde(default)]
    pub status: CursorStatus,

    /// When the last session started
    pub last_started_at: Option<DateTime<Utc>>,

    /// When the last session completed
    pub last_completed_at: Option<DateTime<Utc>>,

    /// Records sent by the last completed session
    #[serde(default)]
    pub records_exported: u64,
}

impl CursorEntry {
    /// Duration of the last completed session, if known
    pub fn last_duration(&self) -> Option<chrono::Duration> {
        match (self.last_started_at, self.last_completed_at) {
            (Some(started), Some(completed)) if completed >= started => Some(completed - started),
            _ => None,
        }
    }
}

/// JSON-file backed cursor store
pub struct CursorStore {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, CursorEntry>>,
}

impl CursorStore {
    /// Opens the store under `root`, loading existing entries
    ///
    /// A missing file is an empty store.
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let path = root.as_ref().join(CURSOR_FILE);
        let entries = match fs::read_to_string(&path) {
            Ok(contents) if contents.trim().is_empty() => BTreeMap::new(),
            Ok(contents) => serde_json::from_str(&contents).map_err(|e| {
                AgentError::State(format!("Corrupt cursor store {}: {e}", path.display()))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => {
                return Err(AgentError::State(format!(
                    "Failed to read cursor store {}: {e}",
                    path.display()
                )))
            }
        };

        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    /// Builds the key for an entity kind of an integration
    pub fn key(integration: &str, kind: &str) -> String {
        format!("{integration}/{kind}")
    }

    /// Path of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the entry for `key`
    pub fn get(&self, key: &str) -> Option<CursorEntry> {
        self.lock().ok()?.get(key).cloned()
    }

    /// Returns all entries ordered by key
    pub fn entries(&self) -> Vec<(String, CursorEntry)> {
        match self.lock() {
            Ok(entries) => entries
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            Err(_) => Vec::new(),
        }
    }

    /// Records that a session for `key` started. The cursor is left untouched.
    pub fn mark_started(&self, key: &str, started_at: DateTime<Utc>) -> Result<()> {
        self.update(key, |entry| {
            entry.status = CursorStatus::InProgress;
            entry.last_started_at = Some(started_at);
        })
    }

    /// Commits a new cursor for `key`
    pub fn commit(&self, key: &str, cursor: DateTime<Utc>, records: u64) -> Result<()> {
        tracing::debug!(key = %key, cursor = %cursor.to_rfc3339(), records, "Committing cursor");
        self.update(key, |entry| {
            entry.cursor = Some(cursor.to_rfc3339());
            entry.status = CursorStatus::Completed;
            entry.last_completed_at = Some(Utc::now());
            entry.records_exported = records;
        })
    }

    fn update(&self, key: &str, f: impl FnOnce(&mut CursorEntry)) -> Result<()> {
        let mut entries = self.lock()?;
        f(entries.entry(key.to_string()).or_default());
        write_atomic(&self.path, &serde_json::to_vec_pretty(&*entries)?)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, BTreeMap<String, CursorEntry>>> {
        self.entries
            .lock()
            .map_err(|_| AgentError::State("Cursor store lock poisoned".to_string()))
    }
}

/// Writes `bytes` to `path` through a sibling temp file and rename
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| AgentError::State(format!("No parent directory for {}", path.display())))?;
    fs::create_dir_all(dir)?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path)
        .map_err(|e| AgentError::State(format!("Failed to persist {}: {e}", path.display())))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_open_missing_store_is_empty() {
        let dir = TempDir::new().unwrap();
        let store = CursorStore::open(dir.path()).unwrap();
        assert!(store.entries().is_empty());
        assert!(store.get("gh/repo").is_none());
    }

    #[test]
    fn test_mark_started_keeps_cursor() {
        let dir = TempDir::new().unwrap();
        let store = CursorStore::open(dir.path()).unwrap();
        let first = Utc::now();
        store.commit("gh/repo", first, 3).unwrap();

        store.mark_started("gh/repo", Utc::now()).unwrap();
        let entry = store.get("gh/repo").unwrap();
        assert_eq!(entry.cursor, Some(first.to_rfc3339()));
        assert_eq!(entry.status, CursorStatus::InProgress);
    }

    #[test]
    fn test_commit_persists_across_reopen() {
        let dir = TempDir::new().unwrap();
        let cursor = Utc::now();
        {
            let store = CursorStore::open(dir.path()).unwrap();
            store.commit("jira/project", cursor, 7).unwrap();
        }

        let store = CursorStore::open(dir.path()).unwrap();
        let entry = store.get("jira/project").unwrap();
        assert_eq!(entry.cursor, Some(cursor.to_rfc3339()));
        assert_eq!(entry.records_exported, 7);
        assert_eq!(entry.status, CursorStatus::Completed);
    }

    #[test]
    fn test_corrupt_store_is_an_error() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(CURSOR_FILE), "{not json").unwrap();
        assert!(matches!(
            CursorStore::open(dir.path()),
            Err(AgentError::State(_))
        ));
    }

    #[test]
    fn test_key_format() {
        assert_eq!(CursorStore::key("gh", "repo"), "gh/repo");
    }
}

//! Session host
//!
//! The host is the agent-side counterpart of an [`ExportSession`]: it hands out
//! cursors, receives records and progress, and commits the new cursor when a
//! session completes.
//!
//! [`ExportSession`]: super::ExportSession

use super::cursor::{write_atomic, CursorStore};
use crate::domain::{AgentError, IntegrationId, Result, SessionError, SessionId, SourceType};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Directory under the state root that receives exported records
pub const EXPORT_DIR: &str = "export";

/// Directory under the state root that receives in-flight progress checkpoints
pub const CHECKPOINT_DIR: &str = "checkpoints";

const CHECKPOINT_HASH_LEN: usize = 16;

/// Position of a session in the session tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionNode {
    /// Top-level session for an entity kind
    Root { kind: String },
    /// Session nested under a parent, e.g. commits of one repo
    Child {
        kind: String,
        parent_id: SessionId,
        parent_name: String,
    },
}

impl SessionNode {
    pub fn kind(&self) -> &str {
        match self {
            SessionNode::Root { kind } | SessionNode::Child { kind, .. } => kind,
        }
    }
}

/// Everything the host needs to know about one session
#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub id: SessionId,
    pub integration: IntegrationId,
    pub source_type: SourceType,
    pub node: SessionNode,
    pub tracking: bool,
}

impl SessionInfo {
    /// Cursor store key: `<integration>/<kind>` for roots,
    /// `<integration>/<kind>/<parent name>` for children
    pub fn cursor_key(&self) -> String {
        match &self.node {
            SessionNode::Root { kind } => CursorStore::key(self.integration.as_str(), kind),
            SessionNode::Child {
                kind, parent_name, ..
            } => format!(
                "{}/{}",
                CursorStore::key(self.integration.as_str(), kind),
                parent_name
            ),
        }
    }
}

/// Agent-side session operations
#[async_trait]
pub trait SessionHost: Send + Sync {
    /// Registers a session and returns its last committed cursor, if any
    async fn start(&self, info: &SessionInfo, started_at: DateTime<Utc>)
        -> Result<Option<String>>;

    /// Accepts records sent through a normal session
    async fn send(&self, info: &SessionInfo, records: Vec<Value>) -> Result<()>;

    /// Receives a progress report
    async fn progress(&self, info: &SessionInfo, current: u64, total: u64) -> Result<()>;

    /// Completes a session and commits `cursor` as its new cursor
    async fn done(&self, info: &SessionInfo, cursor: DateTime<Utc>, records: u64) -> Result<()>;
}

#[derive(Serialize)]
struct Checkpoint<'a> {
    session_id: &'a str,
    key: &'a str,
    current: u64,
    total: u64,
    updated_at: DateTime<Utc>,
}

/// Session host backed by the local state directory
///
/// Records are appended as NDJSON to
/// `<root>/export/<source>/<integration>/<kind>.ndjson`. Cursors live in the
/// [`CursorStore`], in-flight progress in `<root>/checkpoints/`.
pub struct LocalSessionHost {
    root: PathBuf,
    cursors: Arc<CursorStore>,
    reprocess_historical: bool,
    write_lock: Mutex<()>,
}

impl LocalSessionHost {
    pub fn new(root: impl Into<PathBuf>, cursors: Arc<CursorStore>, reprocess_historical: bool) -> Self {
        Self {
            root: root.into(),
            cursors,
            reprocess_historical,
            write_lock: Mutex::new(()),
        }
    }

    /// Root of the exported data tree
    pub fn export_dir(&self) -> PathBuf {
        self.root.join(EXPORT_DIR)
    }

    pub fn cursors(&self) -> &CursorStore {
        &self.cursors
    }

    fn records_path(&self, info: &SessionInfo) -> PathBuf {
        self.export_dir()
            .join(info.source_type.as_str())
            .join(info.integration.as_str())
            .join(format!("{}.ndjson", info.node.kind()))
    }

    /// `<root>/checkpoints/<readable key>-<key hash>.json`
    ///
    /// The readable part is lossy; the hash keeps distinct keys apart.
    fn checkpoint_path(&self, info: &SessionInfo) -> PathBuf {
        let key = info.cursor_key();
        let readable: String = key
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        let digest = format!("{:x}", Sha256::digest(key.as_bytes()));
        self.root
            .join(CHECKPOINT_DIR)
            .join(format!("{readable}-{}.json", &digest[..CHECKPOINT_HASH_LEN]))
    }
}

fn append_lines(path: &Path, records: &[Value]) -> Result<()> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    let mut writer = std::io::BufWriter::new(file);
    for record in records {
        serde_json::to_writer(&mut writer, record)?;
        writer.write_all(b"\n")?;
    }
    writer.flush()?;
    Ok(())
}

#[async_trait]
impl SessionHost for LocalSessionHost {
    async fn start(
        &self,
        info: &SessionInfo,
        started_at: DateTime<Utc>,
    ) -> Result<Option<String>> {
        let key = info.cursor_key();
        let previous = self.cursors.get(&key).and_then(|e| e.cursor);
        self.cursors.mark_started(&key, started_at)?;

        tracing::debug!(
            session_id = %info.id,
            key = %key,
            cursor = previous.as_deref().unwrap_or("none"),
            tracking = info.tracking,
            "Session started"
        );

        if self.reprocess_historical {
            return Ok(None);
        }
        Ok(previous)
    }

    async fn send(&self, info: &SessionInfo, records: Vec<Value>) -> Result<()> {
        if info.tracking {
            return Err(SessionError::TrackingOnly(info.id.to_string()).into());
        }
        let path = self.records_path(info);
        let _guard = self.write_lock.lock().await;
        append_lines(&path, &records)
            .map_err(|e| AgentError::Session(SessionError::Host(format!("{}: {e}", path.display()))))
    }

    async fn progress(&self, info: &SessionInfo, current: u64, total: u64) -> Result<()> {
        let key = info.cursor_key();
        tracing::info!(
            session_id = %info.id,
            key = %key,
            current,
            total,
            "Export progress"
        );

        let checkpoint = Checkpoint {
            session_id: info.id.as_str(),
            key: &key,
            current,
            total,
            updated_at: Utc::now(),
        };
        let _guard = self.write_lock.lock().await;
        write_atomic(&self.checkpoint_path(info), &serde_json::to_vec(&checkpoint)?)
    }

    async fn done(&self, info: &SessionInfo, cursor: DateTime<Utc>, records: u64) -> Result<()> {
        let key = info.cursor_key();
        self.cursors.commit(&key, cursor, records)?;

        let checkpoint = self.checkpoint_path(info);
        let _guard = self.write_lock.lock().await;
        match std::fs::remove_file(&checkpoint) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        tracing::info!(session_id = %info.id, key = %key, records, "Session done");
        Ok(())
    }
}

//! Export session
//!
//! A session tracks one entity kind during an export: it reports progress,
//! transmits records (normal sessions only) and, on [`ExportSession::done`],
//! asks the host to commit the session start time as the new cursor. A session
//! that fails before `done` leaves the previous cursor untouched.

use super::host::{SessionHost, SessionInfo, SessionNode};
use crate::domain::{AgentError, IntegrationId, Result, SessionError, SessionId, SourceType};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Role of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionRole {
    /// Progress and lineage only; sending records is an error
    Tracking,
    /// Transmits records
    Normal,
}

/// Identity shared by all sessions of one integration run
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub integration: IntegrationId,
    pub source_type: SourceType,
    /// Minimum interval between automatic progress reports
    pub progress_interval: Duration,
}

#[derive(Debug, Default)]
struct Progress {
    current: u64,
    total: u64,
    sent: u64,
    no_auto_progress: bool,
    last_report: Option<Instant>,
}

/// One node of the session tree
pub struct ExportSession {
    host: Arc<dyn SessionHost>,
    context: SessionContext,
    info: SessionInfo,
    started_at: DateTime<Utc>,
    last_processed: Option<String>,
    progress: Mutex<Progress>,
    done: AtomicBool,
}

impl std::fmt::Debug for ExportSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExportSession")
            .field("info", &self.info)
            .field("started_at", &self.started_at)
            .field("last_processed", &self.last_processed)
            .finish()
    }
}

impl ExportSession {
    /// Opens a root session for `kind`
    pub async fn open_root(
        host: Arc<dyn SessionHost>,
        context: SessionContext,
        kind: impl Into<String>,
        role: SessionRole,
    ) -> Result<Self> {
        let node = SessionNode::Root { kind: kind.into() };
        Self::open(host, context, SessionId::generate(), node, role).await
    }

    /// Opens a child session nested under this one
    ///
    /// The child inherits this session's id so the host can correlate the tree.
    pub async fn child(
        &self,
        kind: impl Into<String>,
        parent_name: impl Into<String>,
        role: SessionRole,
    ) -> Result<Self> {
        let node = SessionNode::Child {
            kind: kind.into(),
            parent_id: self.info.id.clone(),
            parent_name: parent_name.into(),
        };
        Self::open(
            Arc::clone(&self.host),
            self.context.clone(),
            self.info.id.clone(),
            node,
            role,
        )
        .await
    }

    async fn open(
        host: Arc<dyn SessionHost>,
        context: SessionContext,
        id: SessionId,
        node: SessionNode,
        role: SessionRole,
    ) -> Result<Self> {
        let info = SessionInfo {
            id,
            integration: context.integration.clone(),
            source_type: context.source_type,
            node,
            tracking: role == SessionRole::Tracking,
        };
        let started_at = Utc::now();
        let last_processed = host.start(&info, started_at).await?;

        Ok(Self {
            host,
            context,
            info,
            started_at,
            last_processed,
            progress: Mutex::new(Progress::default()),
            done: AtomicBool::new(false),
        })
    }

    pub fn id(&self) -> &SessionId {
        &self.info.id
    }

    pub fn node(&self) -> &SessionNode {
        &self.info.node
    }

    pub fn kind(&self) -> &str {
        self.info.node.kind()
    }

    pub fn is_tracking(&self) -> bool {
        self.info.tracking
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Current `(current, total)` progress
    pub fn progress(&self) -> (u64, u64) {
        self.progress
            .lock()
            .map(|p| (p.current, p.total))
            .unwrap_or_default()
    }

    /// Last committed cursor as a timestamp
    ///
    /// `None` means no cursor exists and the caller must run a full historical
    /// export.
    pub fn last_processed_time(&self) -> Result<Option<DateTime<Utc>>> {
        match &self.last_processed {
            None => Ok(None),
            Some(cursor) => DateTime::parse_from_rfc3339(cursor)
                .map(|t| Some(t.with_timezone(&Utc)))
                .map_err(|e| {
                    SessionError::InvalidCursor {
                        cursor: cursor.clone(),
                        message: e.to_string(),
                    }
                    .into()
                }),
        }
    }

    /// Disables automatic progress on send; callers then use
    /// [`inc_progress`](Self::inc_progress) explicitly
    pub fn set_no_auto_progress(&self, value: bool) {
        if let Ok(mut p) = self.progress.lock() {
            p.no_auto_progress = value;
        }
    }

    /// Sets the expected total, reporting immediately when it changes
    pub async fn set_total(&self, total: u64) -> Result<()> {
        let report = {
            let mut p = self.lock_progress()?;
            if p.total == total {
                None
            } else {
                p.total = total;
                p.last_report = Some(Instant::now());
                Some((p.current, p.total))
            }
        };
        match report {
            Some((current, total)) => self.host.progress(&self.info, current, total).await,
            None => Ok(()),
        }
    }

    /// Transmits one record
    pub async fn send(&self, record: Value) -> Result<()> {
        self.ensure_open()?;
        if self.info.tracking {
            return Err(SessionError::TrackingOnly(self.info.id.to_string()).into());
        }

        self.host.send(&self.info, vec![record]).await?;

        let report = {
            let mut p = self.lock_progress()?;
            p.sent += 1;
            if p.no_auto_progress {
                None
            } else {
                p.current += 1;
                self.take_report(&mut p)
            }
        };
        match report {
            Some((current, total)) => self.host.progress(&self.info, current, total).await,
            None => Ok(()),
        }
    }

    /// Advances progress by one, rate limited like automatic progress
    pub async fn inc_progress(&self) -> Result<()> {
        let report = {
            let mut p = self.lock_progress()?;
            p.current += 1;
            self.take_report(&mut p)
        };
        match report {
            Some((current, total)) => self.host.progress(&self.info, current, total).await,
            None => Ok(()),
        }
    }

    /// Completes the session and commits its start time as the new cursor
    ///
    /// Valid even when nothing was sent: an empty window is still a completed
    /// window.
    pub async fn done(&self) -> Result<()> {
        if self.done.swap(true, Ordering::SeqCst) {
            return Err(SessionError::AlreadyDone(self.info.id.to_string()).into());
        }
        let (current, total, sent) = {
            let p = self.lock_progress()?;
            (p.current, p.total, p.sent)
        };
        if current > 0 || total > 0 {
            self.host
                .progress(&self.info, current, total.max(current))
                .await?;
        }
        self.host.done(&self.info, self.started_at, sent).await
    }

    fn take_report(&self, p: &mut Progress) -> Option<(u64, u64)> {
        let due = p
            .last_report
            .map_or(true, |at| at.elapsed() >= self.context.progress_interval);
        if due {
            p.last_report = Some(Instant::now());
            Some((p.current, p.total))
        } else {
            None
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.done.load(Ordering::SeqCst) {
            return Err(SessionError::AlreadyDone(self.info.id.to_string()).into());
        }
        Ok(())
    }

    fn lock_progress(&self) -> Result<std::sync::MutexGuard<'_, Progress>> {
        self.progress
            .lock()
            .map_err(|_| AgentError::Other("Session progress lock poisoned".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct RecordingHost {
        cursor: Option<String>,
        sent: StdMutex<Vec<Value>>,
        reports: StdMutex<Vec<(u64, u64)>>,
        commits: StdMutex<Vec<(String, DateTime<Utc>)>>,
    }

    #[async_trait]
    impl SessionHost for RecordingHost {
        async fn start(&self, _info: &SessionInfo, _at: DateTime<Utc>) -> Result<Option<String>> {
            Ok(self.cursor.clone())
        }

        async fn send(&self, _info: &SessionInfo, records: Vec<Value>) -> Result<()> {
            self.sent.lock().unwrap().extend(records);
            Ok(())
        }

        async fn progress(&self, _info: &SessionInfo, current: u64, total: u64) -> Result<()> {
            self.reports.lock().unwrap().push((current, total));
            Ok(())
        }

        async fn done(&self, info: &SessionInfo, cursor: DateTime<Utc>, _records: u64) -> Result<()> {
            self.commits.lock().unwrap().push((info.cursor_key(), cursor));
            Ok(())
        }
    }

    fn context(interval: Duration) -> SessionContext {
        SessionContext {
            integration: IntegrationId::new("gh").unwrap(),
            source_type: SourceType::Sourcecode,
            progress_interval: interval,
        }
    }

    #[tokio::test]
    async fn test_done_before_send_commits_start_time() {
        let host = Arc::new(RecordingHost::default());
        let session = ExportSession::open_root(
            host.clone(),
            context(Duration::from_secs(1)),
            "repo",
            SessionRole::Normal,
        )
        .await
        .unwrap();

        session.done().await.unwrap();

        let commits = host.commits.lock().unwrap();
        assert_eq!(commits.len(), 1);
        assert_eq!(commits[0].1, session.started_at());
    }

    #[tokio::test]
    async fn test_no_done_means_no_commit() {
        let host = Arc::new(RecordingHost::default());
        let session = ExportSession::open_root(
            host.clone(),
            context(Duration::from_secs(1)),
            "repo",
            SessionRole::Normal,
        )
        .await
        .unwrap();
        session.send(serde_json::json!({"id": 1})).await.unwrap();
        drop(session);

        assert!(host.commits.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_tracking_session_rejects_send() {
        let host = Arc::new(RecordingHost::default());
        let session = ExportSession::open_root(
            host,
            context(Duration::from_secs(1)),
            "repo",
            SessionRole::Tracking,
        )
        .await
        .unwrap();
        let err = session.send(serde_json::json!({})).await.unwrap_err();
        assert!(matches!(err, AgentError::Session(SessionError::TrackingOnly(_))));
    }

    #[tokio::test]
    async fn test_auto_progress_is_rate_limited() {
        let host = Arc::new(RecordingHost::default());
        let session = ExportSession::open_root(
            host.clone(),
            context(Duration::from_secs(3600)),
            "repo",
            SessionRole::Normal,
        )
        .await
        .unwrap();

        for i in 0..5 {
            session.send(serde_json::json!({ "id": i })).await.unwrap();
        }

        assert_eq!(host.sent.lock().unwrap().len(), 5);
        assert_eq!(host.reports.lock().unwrap().as_slice(), &[(1, 0)]);
        assert_eq!(session.progress(), (5, 0));
    }

    #[tokio::test]
    async fn test_set_total_reports_only_on_change() {
        let host = Arc::new(RecordingHost::default());
        let session = ExportSession::open_root(
            host.clone(),
            context(Duration::from_secs(3600)),
            "repo",
            SessionRole::Tracking,
        )
        .await
        .unwrap();

        session.set_total(10).await.unwrap();
        session.set_total(10).await.unwrap();
        session.set_total(12).await.unwrap();

        assert_eq!(host.reports.lock().unwrap().as_slice(), &[(0, 10), (0, 12)]);
    }

    #[tokio::test]
    async fn test_no_auto_progress_requires_explicit_increment() {
        let host = Arc::new(RecordingHost::default());
        let session = ExportSession::open_root(
            host.clone(),
            context(Duration::ZERO),
            "repo",
            SessionRole::Normal,
        )
        .await
        .unwrap();
        session.set_no_auto_progress(true);

        session.send(serde_json::json!({})).await.unwrap();
        assert_eq!(session.progress(), (0, 0));

        session.inc_progress().await.unwrap();
        assert_eq!(session.progress(), (1, 0));
    }

    #[tokio::test]
    async fn test_last_processed_time() {
        let cursor = "2025-03-01T10:00:00+00:00".to_string();
        let host = Arc::new(RecordingHost {
            cursor: Some(cursor),
            ..Default::default()
        });
        let session = ExportSession::open_root(
            host,
            context(Duration::from_secs(1)),
            "repo",
            SessionRole::Normal,
        )
        .await
        .unwrap();
        let t = session.last_processed_time().unwrap().unwrap();
        assert_eq!(t.to_rfc3339(), "2025-03-01T10:00:00+00:00");
    }

    #[tokio::test]
    async fn test_invalid_cursor_is_an_error() {
        let host = Arc::new(RecordingHost {
            cursor: Some("yesterday".to_string()),
            ..Default::default()
        });
        let session = ExportSession::open_root(
            host,
            context(Duration::from_secs(1)),
            "repo",
            SessionRole::Normal,
        )
        .await
        .unwrap();
        assert!(session.last_processed_time().is_err());
    }

    #[tokio::test]
    async fn test_child_inherits_parent_id() {
        let host = Arc::new(RecordingHost::default());
        let root = ExportSession::open_root(
            host.clone(),
            context(Duration::from_secs(1)),
            "repo",
            SessionRole::Tracking,
        )
        .await
        .unwrap();
        let child = root
            .child("commit", "acme/api", SessionRole::Normal)
            .await
            .unwrap();

        assert_eq!(child.id(), root.id());
        assert_eq!(child.kind(), "commit");
        child.done().await.unwrap();
        assert!(child.done().await.is_err());
        assert_eq!(host.commits.lock().unwrap()[0].0, "gh/commit/acme/api");
    }
}

//! Durable export queue
//!
//! Each admitted job is persisted as `<dir>/<seq>.json` before it is
//! acknowledged to the caller. [`DurableQueue::run`] hands jobs out strictly
//! one at a time and deletes a job's file only after the consumer signals
//! `done`. Files that survive a crash are delivered again on the next
//! [`DurableQueue::open`].

use crate::core::session::cursor::write_atomic;
use crate::domain::{AgentError, ExportJob, Result};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch, Notify};

const JOB_EXTENSION: &str = "json";

/// A job handed to the consumer
///
/// The queue waits for `done` before it deletes the job and delivers the
/// next one. Dropping the delivery without signalling leaves the job on disk.
#[derive(Debug)]
pub struct Delivery {
    pub job: ExportJob,
    pub done: oneshot::Sender<()>,
}

impl Delivery {
    /// Acknowledges the job
    pub fn ack(self) {
        let _ = self.done.send(());
    }
}

/// Producer side of the queue
#[derive(Clone)]
pub struct QueueHandle {
    dir: PathBuf,
    next_seq: Arc<AtomicU64>,
    wake: Arc<Notify>,
}

impl QueueHandle {
    /// Persists a job and wakes the queue. Returns the job's sequence number.
    pub fn push(&self, job: &ExportJob) -> Result<u64> {
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        let bytes = serde_json::to_vec_pretty(job)?;
        write_atomic(&job_path(&self.dir, seq), &bytes)
            .map_err(|e| AgentError::Queue(format!("Failed to persist job {}: {e}", job.job_id)))?;
        self.wake.notify_one();

        tracing::debug!(job_id = %job.job_id, seq, "Job persisted");
        Ok(seq)
    }

    /// Jobs waiting on disk, oldest first
    pub fn pending(&self) -> Result<Vec<ExportJob>> {
        list_pending(&self.dir)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

/// Consumer side of the queue
pub struct DurableQueue {
    dir: PathBuf,
    wake: Arc<Notify>,
    deliveries: mpsc::Sender<Delivery>,
}

impl DurableQueue {
    /// Opens or creates the queue directory
    ///
    /// Returns the queue, a producer handle and the receiver that
    /// [`DurableQueue::run`] delivers jobs to.
    pub fn open(
        dir: impl Into<PathBuf>,
    ) -> Result<(DurableQueue, QueueHandle, mpsc::Receiver<Delivery>)> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|e| {
            AgentError::Queue(format!("Failed to create queue dir {}: {e}", dir.display()))
        })?;

        let existing = sequence_numbers(&dir)?;
        let next_seq = existing.last().map(|s| s + 1).unwrap_or(0);
        if !existing.is_empty() {
            tracing::info!(
                pending = existing.len(),
                "Redelivering jobs left from a previous run"
            );
        }

        let wake = Arc::new(Notify::new());
        let (tx, rx) = mpsc::channel(1);
        let queue = DurableQueue {
            dir: dir.clone(),
            wake: Arc::clone(&wake),
            deliveries: tx,
        };
        let handle = QueueHandle {
            dir,
            next_seq: Arc::new(AtomicU64::new(next_seq)),
            wake,
        };
        Ok((queue, handle, rx))
    }

    /// Delivers jobs one at a time until `shutdown` fires
    ///
    /// A job already handed out is still waited on after `shutdown`, so its
    /// acknowledgement removes it from disk.
    ///
    /// # Errors
    ///
    /// Returns a queue error if a delivery is dropped without `done`; the job
    /// stays on disk for the next run.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        loop {
            if *shutdown.borrow() {
                return Ok(());
            }

            let Some(seq) = sequence_numbers(&self.dir)?.first().copied() else {
                tokio::select! {
                    _ = self.wake.notified() => continue,
                    _ = wait_for_shutdown(&mut shutdown) => return Ok(()),
                }
            };

            let path = job_path(&self.dir, seq);
            let job = match read_job(&path) {
                Ok(job) => job,
                Err(e) => {
                    tracing::error!(seq, error = %e, "Discarding unreadable queued job");
                    remove_job(&path);
                    continue;
                }
            };

            let job_id = job.job_id.clone();
            let (done_tx, done_rx) = oneshot::channel();
            tokio::select! {
                sent = self.deliveries.send(Delivery { job, done: done_tx }) => {
                    if sent.is_err() {
                        tracing::debug!("Queue consumer gone, stopping");
                        return Ok(());
                    }
                }
                _ = wait_for_shutdown(&mut shutdown) => return Ok(()),
            }

            // Shutdown only stops new deliveries; the job in flight still
            // reaches its ack.
            if done_rx.await.is_err() {
                if *shutdown.borrow() {
                    tracing::info!(job_id = %job_id, seq, "Job left queued for the next run");
                    return Ok(());
                }
                return Err(AgentError::Queue(format!(
                    "Job {job_id} was dropped without acknowledgement"
                )));
            }
            remove_job(&path);
            tracing::debug!(job_id = %job_id, seq, "Job acknowledged");
        }
    }
}

/// Jobs persisted in `dir`, oldest first
pub fn list_pending(dir: &Path) -> Result<Vec<ExportJob>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    sequence_numbers(dir)?
        .into_iter()
        .map(|seq| read_job(&job_path(dir, seq)))
        .collect()
}

/// Resolves once `shutdown` is true or its sender is gone
pub async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    while !*shutdown.borrow() {
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

fn job_path(dir: &Path, seq: u64) -> PathBuf {
    dir.join(format!("{seq:020}.{JOB_EXTENSION}"))
}

fn sequence_numbers(dir: &Path) -> Result<Vec<u64>> {
    let entries = std::fs::read_dir(dir)
        .map_err(|e| AgentError::Queue(format!("Failed to read {}: {e}", dir.display())))?;

    let mut seqs: Vec<u64> = entries
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| {
            let path = entry.path();
            if path.extension()? != JOB_EXTENSION {
                return None;
            }
            path.file_stem()?.to_str()?.parse().ok()
        })
        .collect();
    seqs.sort_unstable();
    Ok(seqs)
}

fn read_job(path: &Path) -> Result<ExportJob> {
    let bytes = std::fs::read(path)
        .map_err(|e| AgentError::Queue(format!("Failed to read {}: {e}", path.display())))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| AgentError::Queue(format!("Corrupt job file {}: {e}", path.display())))
}

fn remove_job(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(path = %path.display(), error = %e, "Failed to remove job file");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{IntegrationId, IntegrationRequest, JobId, SourceType};
    use chrono::Utc;
    use std::time::Duration;
    use tempfile::TempDir;

    fn job(id: &str) -> ExportJob {
        ExportJob {
            job_id: JobId::new(id).unwrap(),
            integrations: vec![IntegrationRequest {
                id: IntegrationId::new("gh").unwrap(),
                name: "static".to_string(),
                source_type: SourceType::Sourcecode,
                settings: serde_json::json!({}),
            }],
            requested_at: Utc::now(),
            reprocess_historical: false,
            upload_url: "https://upload.example.com".to_string(),
        }
    }

    async fn next(rx: &mut mpsc::Receiver<Delivery>) -> Delivery {
        tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn test_delivers_in_order_one_at_a_time() {
        let dir = TempDir::new().unwrap();
        let (queue, handle, mut rx) = DurableQueue::open(dir.path()).unwrap();
        handle.push(&job("job-1")).unwrap();
        handle.push(&job("job-2")).unwrap();

        let (_tx, shutdown) = watch::channel(false);
        let runner = tokio::spawn(queue.run(shutdown));

        let first = next(&mut rx).await;
        assert_eq!(first.job.job_id.as_str(), "job-1");

        // Nothing else until the first job is acknowledged.
        assert!(
            tokio::time::timeout(Duration::from_millis(200), rx.recv())
                .await
                .is_err()
        );

        first.ack();
        let second = next(&mut rx).await;
        assert_eq!(second.job.job_id.as_str(), "job-2");
        second.ack();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(handle.pending().unwrap().is_empty());
        runner.abort();
    }

    #[tokio::test]
    async fn test_unacknowledged_jobs_are_redelivered_after_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let (_queue, handle, _rx) = DurableQueue::open(dir.path()).unwrap();
            handle.push(&job("job-1")).unwrap();
        }

        let (queue, handle, mut rx) = DurableQueue::open(dir.path()).unwrap();
        assert_eq!(handle.pending().unwrap().len(), 1);

        // New pushes sort after the surviving job.
        handle.push(&job("job-2")).unwrap();

        let (_tx, shutdown) = watch::channel(false);
        let runner = tokio::spawn(queue.run(shutdown));
        let first = next(&mut rx).await;
        assert_eq!(first.job.job_id.as_str(), "job-1");
        first.ack();
        runner.abort();
    }

    #[tokio::test]
    async fn test_push_wakes_idle_queue() {
        let dir = TempDir::new().unwrap();
        let (queue, handle, mut rx) = DurableQueue::open(dir.path()).unwrap();
        let (_tx, shutdown) = watch::channel(false);
        let runner = tokio::spawn(queue.run(shutdown));

        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.push(&job("job-late")).unwrap();
        let delivery = next(&mut rx).await;
        assert_eq!(delivery.job.job_id.as_str(), "job-late");
        delivery.ack();
        runner.abort();
    }

    #[tokio::test]
    async fn test_dropped_delivery_keeps_job() {
        let dir = TempDir::new().unwrap();
        let (queue, handle, mut rx) = DurableQueue::open(dir.path()).unwrap();
        handle.push(&job("job-1")).unwrap();

        let (_tx, shutdown) = watch::channel(false);
        let runner = tokio::spawn(queue.run(shutdown));
        drop(next(&mut rx).await);

        let result = runner.await.unwrap();
        assert!(matches!(result, Err(AgentError::Queue(_))));
        assert_eq!(list_pending(dir.path()).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_stops_idle_queue() {
        let dir = TempDir::new().unwrap();
        let (queue, _handle, _rx) = DurableQueue::open(dir.path()).unwrap();
        let (tx, shutdown) = watch::channel(false);
        let runner = tokio::spawn(queue.run(shutdown));

        tx.send(true).unwrap();
        let result = tokio::time::timeout(Duration::from_secs(1), runner)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_ack_after_shutdown_removes_job() {
        let dir = TempDir::new().unwrap();
        let (queue, handle, mut rx) = DurableQueue::open(dir.path()).unwrap();
        handle.push(&job("job-1")).unwrap();
        handle.push(&job("job-2")).unwrap();

        let (tx, shutdown) = watch::channel(false);
        let runner = tokio::spawn(queue.run(shutdown));
        let delivery = next(&mut rx).await;

        tx.send(true).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!runner.is_finished());
        delivery.ack();

        let result = tokio::time::timeout(Duration::from_secs(1), runner)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());

        // The finished job is gone; the undelivered one waits for the next run.
        let pending = list_pending(dir.path()).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].job_id.as_str(), "job-2");
    }

    #[tokio::test]
    async fn test_unacked_delivery_after_shutdown_stays_queued() {
        let dir = TempDir::new().unwrap();
        let (queue, handle, mut rx) = DurableQueue::open(dir.path()).unwrap();
        handle.push(&job("job-1")).unwrap();

        let (tx, shutdown) = watch::channel(false);
        let runner = tokio::spawn(queue.run(shutdown));
        let delivery = next(&mut rx).await;

        tx.send(true).unwrap();
        drop(delivery);

        let result = runner.await.unwrap();
        assert!(result.is_ok());
        assert_eq!(handle.pending().unwrap().len(), 1);
    }

    #[test]
    fn test_corrupt_files_are_reported_by_pending() {
        let dir = TempDir::new().unwrap();
        std::fs::write(job_path(dir.path(), 0), b"not json").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"ignored").unwrap();
        assert!(matches!(
            list_pending(dir.path()),
            Err(AgentError::Queue(_))
        ));
    }
}

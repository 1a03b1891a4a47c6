//! Registry of cancellable worker processes
//!
//! One entry per command name. Registering a name that is already running
//! fails. Cancelling removes the entry, signals the registration's
//! cancellation token and then kills the process tree.

use super::canceller::kill_process_tree;
use crate::domain::{AgentError, Result, SubprocessError};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;

struct Entry {
    generation: u64,
    pid: Option<u32>,
    cancel: watch::Sender<bool>,
}

type Entries = Arc<Mutex<HashMap<String, Entry>>>;

/// Command name to running process map, owned by the service instance
#[derive(Default)]
pub struct ProcessRegistry {
    entries: Entries,
    generation: AtomicU64,
}

impl ProcessRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `name` as running
    ///
    /// # Errors
    ///
    /// [`SubprocessError::AlreadyRegistered`] when `name` is already registered.
    pub fn register(&self, name: &str) -> Result<Registration> {
        let mut entries = lock(&self.entries)?;
        if entries.contains_key(name) {
            return Err(SubprocessError::AlreadyRegistered(name.to_string()).into());
        }

        let generation = self.generation.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = watch::channel(false);
        entries.insert(
            name.to_string(),
            Entry {
                generation,
                pid: None,
                cancel: tx,
            },
        );

        Ok(Registration {
            entries: Arc::clone(&self.entries),
            name: name.to_string(),
            generation,
            cancelled: rx,
        })
    }

    /// True when `name` is registered
    pub fn is_running(&self, name: &str) -> bool {
        lock(&self.entries)
            .map(|e| e.contains_key(name))
            .unwrap_or(false)
    }

    /// Pid of the process registered under `name`, once known
    pub fn pid(&self, name: &str) -> Option<u32> {
        lock(&self.entries).ok()?.get(name).and_then(|e| e.pid)
    }

    /// Cancels the process registered under `name`
    ///
    /// Returns false when nothing was registered. Kill failures are logged,
    /// not returned.
    pub fn cancel(&self, name: &str) -> bool {
        let entry = match lock(&self.entries) {
            Ok(mut entries) => entries.remove(name),
            Err(_) => None,
        };
        let Some(entry) = entry else {
            tracing::debug!(command = %name, "Cancel requested but command is not running");
            return false;
        };

        let _ = entry.cancel.send(true);
        tracing::info!(command = %name, pid = ?entry.pid, "Cancelling command");

        if let Some(pid) = entry.pid {
            let signalled = kill_process_tree(pid);
            tracing::debug!(command = %name, pid, signalled, "Process tree signalled");
        }
        true
    }
}

fn lock(entries: &Entries) -> Result<MutexGuard<'_, HashMap<String, Entry>>> {
    entries
        .lock()
        .map_err(|_| AgentError::Other("Process registry lock poisoned".to_string()))
}

/// Live registration; dropping it removes the entry unless it was cancelled
pub struct Registration {
    entries: Entries,
    name: String,
    generation: u64,
    cancelled: watch::Receiver<bool>,
}

impl Registration {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Records the pid so a later cancel can kill the process tree
    pub fn set_pid(&self, pid: u32) {
        if let Ok(mut entries) = lock(&self.entries) {
            if let Some(entry) = entries.get_mut(&self.name) {
                if entry.generation == self.generation {
                    entry.pid = Some(pid);
                }
            }
        }
    }

    /// True once this registration was cancelled
    pub fn is_cancelled(&self) -> bool {
        *self.cancelled.borrow()
    }

    /// Resolves when this registration is cancelled; never resolves otherwise
    pub async fn cancelled(&mut self) {
        loop {
            if *self.cancelled.borrow() {
                return;
            }
            if self.cancelled.changed().await.is_err() {
                // Sender dropped without a cancel: the entry was released.
                if *self.cancelled.borrow() {
                    return;
                }
                std::future::pending::<()>().await;
            }
        }
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        if let Ok(mut entries) = lock(&self.entries) {
            if entries
                .get(&self.name)
                .is_some_and(|e| e.generation == self.generation)
            {
                entries.remove(&self.name);
            }
        }
    }
}

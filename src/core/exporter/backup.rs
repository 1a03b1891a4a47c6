//! State backup and restore around export attempts
//!
//! The mutable state under the state root is the cursor file and the
//! checkpoint directory. Before every attempt [`StateBackup::prepare`] makes
//! sure a shadow copy exists that matches the last successful attempt:
//!
//! - no state at all: first run, create empty state and snapshot it
//! - a backup exists: the previous attempt did not finish, restore from it
//!   and keep it
//! - otherwise: snapshot current state
//!
//! The cursor backup file is written last and removed first, so its presence
//! marks a complete backup.

use crate::core::session::cursor::write_atomic;
use crate::core::session::{CHECKPOINT_DIR, CURSOR_FILE};
use crate::domain::{AgentError, Result};
use std::fs;
use std::path::{Path, PathBuf};

const BACKUP_SUFFIX: &str = ".backup";

/// What [`StateBackup::prepare`] did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackupAction {
    /// No state existed; empty state was created and snapshotted
    Created,
    /// A backup from an unfinished attempt was restored and kept
    Restored,
    /// Current state was copied into a fresh backup
    Snapshotted,
}

/// Shadow copy of the cursor file and checkpoint directory
#[derive(Debug, Clone)]
pub struct StateBackup {
    root: PathBuf,
}

impl StateBackup {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn cursor_path(&self) -> PathBuf {
        self.root.join(CURSOR_FILE)
    }

    pub fn checkpoint_dir(&self) -> PathBuf {
        self.root.join(CHECKPOINT_DIR)
    }

    fn cursor_backup(&self) -> PathBuf {
        self.root.join(format!("{CURSOR_FILE}{BACKUP_SUFFIX}"))
    }

    fn checkpoint_backup(&self) -> PathBuf {
        self.root.join(format!("{CHECKPOINT_DIR}{BACKUP_SUFFIX}"))
    }

    /// True when any state exists
    pub fn has_state(&self) -> bool {
        self.cursor_path().exists() || self.checkpoint_dir().exists()
    }

    /// True when a complete backup exists
    pub fn has_backup(&self) -> bool {
        self.cursor_backup().exists()
    }

    /// Brings state and backup into a known-good pair before an attempt
    ///
    /// # Errors
    ///
    /// Any filesystem failure. Callers must not run the attempt when this
    /// fails, since later recovery depends on it.
    pub fn prepare(&self) -> Result<BackupAction> {
        fs::create_dir_all(&self.root).map_err(|e| state_err("create state root", &self.root, e))?;

        let action = if self.has_backup() {
            self.restore()?;
            BackupAction::Restored
        } else if !self.has_state() {
            fs::create_dir_all(self.checkpoint_dir())
                .map_err(|e| state_err("create", &self.checkpoint_dir(), e))?;
            write_atomic(&self.cursor_path(), b"{}")?;
            self.snapshot()?;
            BackupAction::Created
        } else {
            self.snapshot()?;
            BackupAction::Snapshotted
        };

        tracing::info!(root = %self.root.display(), ?action, "State prepared");
        Ok(action)
    }

    /// Deletes the backup after a fully successful attempt
    pub fn remove_backup(&self) -> Result<()> {
        remove_file_if_exists(&self.cursor_backup())?;
        remove_dir_if_exists(&self.checkpoint_backup())?;
        tracing::debug!(root = %self.root.display(), "State backup removed");
        Ok(())
    }

    fn snapshot(&self) -> Result<()> {
        let backup_dir = self.checkpoint_backup();
        remove_dir_if_exists(&backup_dir)?;
        if self.checkpoint_dir().exists() {
            copy_dir(&self.checkpoint_dir(), &backup_dir)?;
        } else {
            fs::create_dir_all(&backup_dir).map_err(|e| state_err("create", &backup_dir, e))?;
        }

        let cursors = match fs::read(self.cursor_path()) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => b"{}".to_vec(),
            Err(e) => return Err(state_err("read", &self.cursor_path(), e)),
        };
        write_atomic(&self.cursor_backup(), &cursors)
    }

    fn restore(&self) -> Result<()> {
        tracing::warn!(
            root = %self.root.display(),
            "Previous attempt did not finish, restoring state from backup"
        );

        let checkpoints = self.checkpoint_dir();
        remove_dir_if_exists(&checkpoints)?;
        if self.checkpoint_backup().exists() {
            copy_dir(&self.checkpoint_backup(), &checkpoints)?;
        } else {
            fs::create_dir_all(&checkpoints).map_err(|e| state_err("create", &checkpoints, e))?;
        }

        let cursors = fs::read(self.cursor_backup())
            .map_err(|e| state_err("read", &self.cursor_backup(), e))?;
        write_atomic(&self.cursor_path(), &cursors)
    }
}

/// Recursively copies `from` into a new directory `to`
pub fn copy_dir(from: &Path, to: &Path) -> Result<()> {
    fs::create_dir_all(to).map_err(|e| state_err("create", to, e))?;
    for entry in fs::read_dir(from).map_err(|e| state_err("read", from, e))? {
        let entry = entry.map_err(|e| state_err("read", from, e))?;
        let target = to.join(entry.file_name());
        let file_type = entry.file_type().map_err(|e| state_err("stat", &entry.path(), e))?;
        if file_type.is_dir() {
            copy_dir(&entry.path(), &target)?;
        } else {
            fs::copy(entry.path(), &target).map_err(|e| state_err("copy", &entry.path(), e))?;
        }
    }
    Ok(())
}

fn remove_file_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(state_err("remove", path, e)),
        _ => Ok(()),
    }
}

fn remove_dir_if_exists(path: &Path) -> Result<()> {
    match fs::remove_dir_all(path) {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(state_err("remove", path, e)),
        _ => Ok(()),
    }
}

fn state_err(action: &str, path: &Path, e: std::io::Error) -> AgentError {
    AgentError::State(format!("Failed to {action} {}: {e}", path.display()))
}

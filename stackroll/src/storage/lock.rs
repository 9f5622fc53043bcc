//! Per-stack lock file
//!
//! Only one non-terminal attempt may exist per stack. The lock is a file
//! created with exclusive-create semantics, so it holds across processes as
//! well as across tasks of one process.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::errors::ControllerError;
use crate::filesys::dir::Dir;
use crate::filesys::file::File;

/// Contents of a lock file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockRecord {
    pub attempt_id: String,
    pub pid: u32,
    pub acquired_at: DateTime<Utc>,
}

impl std::fmt::Display for LockRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "attempt {} (pid {}, since {})",
            self.attempt_id,
            self.pid,
            self.acquired_at.to_rfc3339()
        )
    }
}

/// Held lock; released when dropped
#[derive(Debug)]
pub struct StackLock {
    file: File,
    record: LockRecord,
}

impl StackLock {
    fn lock_file(locks_dir: &Dir, stack: &str) -> File {
        locks_dir.file(&format!("{}.lock", stack))
    }

    /// Take the lock for `stack` on behalf of `attempt_id`.
    ///
    /// Fails with `AttemptInProgress` when another holder exists.
    pub async fn acquire(
        locks_dir: &Dir,
        stack: &str,
        attempt_id: &str,
    ) -> Result<Self, ControllerError> {
        let file = Self::lock_file(locks_dir, stack);
        let record = LockRecord {
            attempt_id: attempt_id.to_string(),
            pid: std::process::id(),
            acquired_at: Utc::now(),
        };

        if file.create_new(&serde_json::to_vec(&record)?).await? {
            debug!("Acquired lock for stack '{}' ({})", stack, attempt_id);
            return Ok(Self { file, record });
        }

        let holder = match Self::holder(locks_dir, stack).await {
            Ok(Some(existing)) => existing.to_string(),
            _ => "an unknown holder".to_string(),
        };
        Err(ControllerError::AttemptInProgress {
            stack: stack.to_string(),
            holder,
        })
    }

    /// Current holder of the lock, if any
    pub async fn holder(locks_dir: &Dir, stack: &str) -> Result<Option<LockRecord>, ControllerError> {
        let file = Self::lock_file(locks_dir, stack);
        if !file.exists().await {
            return Ok(None);
        }
        Ok(Some(file.read_json().await?))
    }

    /// Remove a lock left behind by an interrupted process
    pub async fn break_lock(locks_dir: &Dir, stack: &str) -> Result<(), ControllerError> {
        warn!("Breaking lock for stack '{}'", stack);
        Self::lock_file(locks_dir, stack).delete().await
    }

    pub fn record(&self) -> &LockRecord {
        &self.record
    }
}

impl Drop for StackLock {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(self.file.path()) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to release lock {}: {}", self.file.path().display(), e);
            }
        }
    }
}

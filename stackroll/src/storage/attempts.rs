//! Durable journal of deployment attempts
//!
//! Layout per stack:
//! `attempts/<stack>/latest.json` and `attempts/<stack>/<attempt-id>.json`.
//! Both are written atomically on every save.

use tracing::{debug, warn};

use crate::errors::ControllerError;
use crate::filesys::dir::Dir;
use crate::models::attempt::DeploymentAttempt;

const LATEST: &str = "latest.json";

/// File-backed attempt store
#[derive(Debug, Clone)]
pub struct AttemptStore {
    root: Dir,
}

impl AttemptStore {
    pub fn new(root: Dir) -> Self {
        Self { root }
    }

    fn stack_dir(&self, stack: &str) -> Dir {
        self.root.subdir(stack)
    }

    /// Persist the attempt. Returns only once the record is on disk.
    pub async fn save(&self, attempt: &DeploymentAttempt) -> Result<(), ControllerError> {
        let dir = self.stack_dir(&attempt.stack);
        dir.file(&format!("{}.json", attempt.id))
            .write_json(attempt)
            .await?;
        dir.file(LATEST).write_json(attempt).await?;
        debug!(
            "Saved attempt {} for stack '{}' in phase {}",
            attempt.id,
            attempt.stack,
            attempt.phase()
        );
        Ok(())
    }

    /// Latest attempt recorded for the stack
    pub async fn latest(&self, stack: &str) -> Result<Option<DeploymentAttempt>, ControllerError> {
        let file = self.stack_dir(stack).file(LATEST);
        if !file.exists().await {
            return Ok(None);
        }
        let attempt = file.read_json().await.map_err(|e| {
            ControllerError::StorageError(format!(
                "unreadable attempt record {}: {}",
                file.path().display(),
                e
            ))
        })?;
        Ok(Some(attempt))
    }

    /// Every recorded attempt for the stack, oldest first.
    ///
    /// Unreadable records are skipped with a warning.
    pub async fn history(&self, stack: &str) -> Result<Vec<DeploymentAttempt>, ControllerError> {
        let mut attempts = Vec::new();
        for path in self.stack_dir(stack).list_files().await? {
            let is_record = path.extension().is_some_and(|ext| ext == "json")
                && path.file_name().is_some_and(|name| name != LATEST);
            if !is_record {
                continue;
            }
            match crate::filesys::file::File::new(&path)
                .read_json::<DeploymentAttempt>()
                .await
            {
                Ok(attempt) => attempts.push(attempt),
                Err(e) => warn!("Skipping unreadable attempt record {}: {}", path.display(), e),
            }
        }
        attempts.sort_by_key(|a| a.started_at);
        Ok(attempts)
    }
}

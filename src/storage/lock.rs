//! Exclusive advisory locks keyed by document path.
//!
//! Within a process a path maps to a tokio mutex. With a lock directory
//! configured, the holder also takes an `fs2` exclusive lock on
//! `<lock_dir>/<path>.lock` so separate processes exclude each other too.
//! Both steps share one deadline; running out of time yields `LockTimeout`.

use fs2::FileExt;
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::OwnedMutexGuard;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::normalize_path;
use crate::errors::{WorkflowError, WorkflowResult};

const FILE_LOCK_POLL: Duration = Duration::from_millis(10);

#[derive(Debug, Default)]
pub struct LockManager {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    lock_dir: Option<PathBuf>,
}

/// A held lock. Released on drop.
#[derive(Debug)]
pub struct PathLock {
    path: String,
    file: Option<File>,
    _guard: OwnedMutexGuard<()>,
}

impl PathLock {
    pub fn path(&self) -> &str {
        &self.path
    }
}

impl Drop for PathLock {
    fn drop(&mut self) {
        if let Some(file) = &self.file {
            if let Err(e) = FileExt::unlock(file) {
                warn!(path = %self.path, error = %e, "Failed to release file lock");
            }
        }
        debug!(path = %self.path, "Lock released");
    }
}

impl LockManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Also lock files under `dir` for cross-process exclusion.
    pub fn with_lock_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.lock_dir = Some(dir.into());
        self
    }

    pub fn lock_dir(&self) -> Option<&Path> {
        self.lock_dir.as_deref()
    }

    /// Wait up to `timeout` for exclusive ownership of `path`.
    pub async fn lock(&self, path: &str, timeout: Duration) -> WorkflowResult<PathLock> {
        let path = normalize_path(path)?;
        let deadline = Instant::now() + timeout;
        let timed_out = || WorkflowError::LockTimeout {
            path: path.clone(),
            timeout_ms: timeout.as_millis() as u64,
        };

        let mutex = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            locks.entry(path.clone()).or_default().clone()
        };
        let guard = match tokio::time::timeout_at(deadline, mutex.lock_owned()).await {
            Ok(guard) => guard,
            Err(_) => {
                warn!(path = %path, timeout_ms = timeout.as_millis() as u64, "Lock wait timed out");
                return Err(timed_out());
            }
        };

        let file = match &self.lock_dir {
            Some(dir) => {
                let file = open_lock_file(dir, &path)?;
                loop {
                    match FileExt::try_lock_exclusive(&file) {
                        Ok(()) => break,
                        Err(_) if Instant::now() >= deadline => {
                            warn!(path = %path, "File lock wait timed out");
                            return Err(timed_out());
                        }
                        Err(_) => tokio::time::sleep(FILE_LOCK_POLL).await,
                    }
                }
                Some(file)
            }
            None => None,
        };

        debug!(path = %path, "Lock acquired");
        Ok(PathLock {
            path,
            file,
            _guard: guard,
        })
    }

    /// True if `path` is held within this process right now.
    pub fn is_locked(&self, path: &str) -> bool {
        let Ok(path) = normalize_path(path) else {
            return false;
        };
        let locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.get(&path).is_some_and(|m| m.try_lock().is_err())
    }
}

fn open_lock_file(dir: &Path, path: &str) -> WorkflowResult<File> {
    let file = dir.join(format!("{}.lock", path));
    if let Some(parent) = file.parent() {
        std::fs::create_dir_all(parent).map_err(|e| WorkflowError::storage(path, e))?;
    }
    OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(&file)
        .map_err(|e| WorkflowError::storage(path, e))
}

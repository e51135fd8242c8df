//! Advisory single-run lock.
//!
//! A run holds the lock by creating the lock file exclusively. A lock file
//! older than the staleness window is assumed to belong to a crashed run and
//! is replaced.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::PipelineError;

/// Contents of the lock file.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct LockHolder {
    pid: u32,
    acquired_at: DateTime<Utc>,
}

/// Held for the duration of a run; released on drop.
#[derive(Debug)]
pub struct RunLock {
    path: PathBuf,
}

impl RunLock {
    /// Take the lock at `path`, replacing it if older than `stale_after`.
    pub fn acquire(path: &Path, stale_after: Duration) -> Result<Self, PipelineError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| PipelineError::Lock(format!("create {}: {e}", parent.display())))?;
        }

        for _ in 0..2 {
            match try_create(path) {
                Ok(()) => {
                    debug!(path = %path.display(), "Run lock acquired");
                    return Ok(Self {
                        path: path.to_path_buf(),
                    });
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    let since = holder_since(path);
                    let age = since
                        .map(|s| (Utc::now() - s).to_std().unwrap_or_default())
                        .unwrap_or_default();

                    if since.is_some() && age < stale_after {
                        return Err(PipelineError::Locked {
                            path: path.display().to_string(),
                            since: since.map(|s| s.to_rfc3339()).unwrap_or_default(),
                        });
                    }

                    warn!(
                        path = %path.display(),
                        age_secs = age.as_secs(),
                        "Replacing stale run lock"
                    );
                    match std::fs::remove_file(path) {
                        Ok(()) => {}
                        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                        Err(e) => {
                            return Err(PipelineError::Lock(format!(
                                "remove stale lock {}: {e}",
                                path.display()
                            )));
                        }
                    }
                }
                Err(e) => {
                    return Err(PipelineError::Lock(format!("create {}: {e}", path.display())));
                }
            }
        }

        Err(PipelineError::Locked {
            path: path.display().to_string(),
            since: holder_since(path)
                .map(|s| s.to_rfc3339())
                .unwrap_or_default(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), error = %e, "Failed to release run lock");
        }
    }
}

fn try_create(path: &Path) -> std::io::Result<()> {
    let mut file = OpenOptions::new().write(true).create_new(true).open(path)?;
    let holder = LockHolder {
        pid: std::process::id(),
        acquired_at: Utc::now(),
    };
    let json = serde_json::to_vec(&holder).map_err(std::io::Error::other)?;
    file.write_all(&json)?;
    file.sync_all()
}

/// When the current holder took the lock. Falls back to the file's mtime if
/// the contents are unreadable; `None` if neither is available.
fn holder_since(path: &Path) -> Option<DateTime<Utc>> {
    std::fs::read(path)
        .ok()
        .and_then(|bytes| serde_json::from_slice::<LockHolder>(&bytes).ok())
        .map(|h| h.acquired_at)
        .or_else(|| {
            std::fs::metadata(path)
                .and_then(|m| m.modified())
                .ok()
                .map(DateTime::<Utc>::from)
        })
}

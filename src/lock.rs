//! Disk-backed mutual exclusion for a target's working copy.
//!
//! A lock is a marker file created with `O_CREAT | O_EXCL`. The marker holds
//! the holder's pid and acquisition time as JSON so a stuck lock can be
//! diagnosed. Markers survive restarts; a marker left behind by a crashed
//! process must be removed by an operator.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::{Instant, sleep};
use tracing::{debug, warn};

/// Contents of a lock marker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockMetadata {
    pub pid: u32,
    pub acquired_at: DateTime<Utc>,
}

fn describe_holder(holder: &Option<LockMetadata>) -> String {
    match holder {
        Some(m) => format!(" (held by pid {} since {})", m.pid, m.acquired_at.to_rfc3339()),
        None => String::new(),
    }
}

#[derive(Debug, Error)]
pub enum LockError {
    #[error(
        "timed out after {}ms waiting for lock {}{}",
        .waited.as_millis(),
        .marker.display(),
        describe_holder(.holder)
    )]
    Timeout {
        marker: PathBuf,
        waited: Duration,
        holder: Option<LockMetadata>,
    },

    #[error("failed to create lock {}: {source}", .marker.display())]
    Create {
        marker: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to release lock {}: {source}", .marker.display())]
    Release {
        marker: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Lock settings for one target.
#[derive(Debug, Clone)]
pub struct TargetLock {
    marker: PathBuf,
    wait_timeout: Duration,
    poll_interval: Duration,
}

impl TargetLock {
    pub fn new(marker: impl Into<PathBuf>, wait_timeout: Duration, poll_interval: Duration) -> Self {
        TargetLock {
            marker: marker.into(),
            wait_timeout,
            poll_interval,
        }
    }

    /// Creates the marker, polling while another holder has it.
    ///
    /// Waiters are not served in arrival order.
    pub async fn acquire(&self) -> Result<LockHandle, LockError> {
        let deadline = Instant::now() + self.wait_timeout;
        loop {
            match create_marker(&self.marker) {
                Ok(()) => {
                    debug!(marker = %self.marker.display(), "lock acquired");
                    return Ok(LockHandle {
                        marker: self.marker.clone(),
                        released: false,
                    });
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(LockError::Timeout {
                            marker: self.marker.clone(),
                            waited: self.wait_timeout,
                            holder: read_metadata(&self.marker),
                        });
                    }
                    sleep(self.poll_interval.min(deadline - now)).await;
                }
                Err(source) => {
                    return Err(LockError::Create {
                        marker: self.marker.clone(),
                        source,
                    });
                }
            }
        }
    }
}

/// Exclusive ownership of a target's build slot.
///
/// Dropping an unreleased handle removes the marker.
#[derive(Debug)]
#[must_use = "dropping a LockHandle releases the lock"]
pub struct LockHandle {
    marker: PathBuf,
    released: bool,
}

impl LockHandle {
    /// Removes the marker.
    pub fn release(mut self) -> Result<(), LockError> {
        self.released = true;
        remove_marker(&self.marker).map_err(|source| LockError::Release {
            marker: self.marker.clone(),
            source,
        })?;
        debug!(marker = %self.marker.display(), "lock released");
        Ok(())
    }
}

impl Drop for LockHandle {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(e) = remove_marker(&self.marker) {
            warn!(marker = %self.marker.display(), error = %e, "failed to remove lock marker on drop");
        }
    }
}

fn create_marker(marker: &Path) -> io::Result<()> {
    let dir = marker.parent().unwrap_or(Path::new("."));
    std::fs::create_dir_all(dir)?;

    let mut file = OpenOptions::new().write(true).create_new(true).open(marker)?;
    let metadata = LockMetadata {
        pid: std::process::id(),
        acquired_at: Utc::now(),
    };
    let written = serde_json::to_vec(&metadata)
        .map_err(io::Error::other)
        .and_then(|bytes| file.write_all(&bytes))
        .and_then(|()| fsync_file(&file))
        .and_then(|()| fsync_dir(dir));

    if let Err(e) = written {
        // Half-written marker.
        let _ = std::fs::remove_file(marker);
        return Err(e);
    }
    Ok(())
}

fn remove_marker(marker: &Path) -> io::Result<()> {
    match std::fs::remove_file(marker) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    }
    match marker.parent() {
        Some(dir) => fsync_dir(dir),
        None => Ok(()),
    }
}

/// Reads a marker's metadata, if the marker exists and parses.
pub fn read_metadata(marker: &Path) -> Option<LockMetadata> {
    let bytes = std::fs::read(marker).ok()?;
    serde_json::from_slice(&bytes).ok()
}

fn fsync_file(file: &File) -> io::Result<()> {
    file.sync_all()
}

/// Creating or removing a marker changes the directory entry, which is only
/// durable once the directory itself is synced.
fn fsync_dir(dir: &Path) -> io::Result<()> {
    OpenOptions::new().read(true).open(dir)?.sync_all()
}

//! Advisory lock markers
//!
//! A lock is a small JSON file `{ "timestamp", "owner" }` created with an
//! exclusive create. Holders that die leave the marker behind; once its age
//! exceeds the stale timeout the next acquirer reclaims it. Reclaimers take
//! turns through a second exclusive marker (`<name>.reclaim`) and re-check
//! staleness once they hold it.
//!
//! This serializes writers inside one process and between processes sharing
//! the same filesystem. It does not coordinate machines without one.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::io::AsyncWriteExt;
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::StoreResult;

/// Contents of a lock marker file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockMarker {
    pub timestamp: DateTime<Utc>,
    pub owner: String,
}

impl LockMarker {
    fn new_for_this_process() -> Self {
        Self {
            timestamp: timetrack_util::now(),
            owner: format!("pid_{}_{}", std::process::id(), Uuid::new_v4().simple()),
        }
    }
}

/// Observed state of an existing marker
#[derive(Debug)]
struct HeldMarker {
    /// `None` when the marker could not be parsed (e.g. caught mid-write)
    owner: Option<String>,
    age: Duration,
}

/// Lock manager for a single marker path
#[derive(Debug, Clone)]
pub struct LockManager {
    path: PathBuf,
    stale_after: Duration,
    poll_interval: Duration,
}

impl LockManager {
    pub fn new(path: impl Into<PathBuf>, stale_after: Duration, poll_interval: Duration) -> Self {
        Self {
            path: path.into(),
            stale_after,
            poll_interval,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Non-blocking probe.
    ///
    /// Returns `None` if a fresh marker is held by someone else. A stale
    /// marker is reclaimed and acquisition retried once.
    pub async fn try_acquire(&self) -> StoreResult<Option<LockGuard>> {
        if let Some(guard) = self.create_marker().await? {
            return Ok(Some(guard));
        }

        match self.inspect().await? {
            // Released between our attempt and the inspection
            None => self.create_marker().await,
            Some(held) if held.age > self.stale_after => {
                warn!(
                    path = %self.path.display(),
                    owner = ?held.owner,
                    age_secs = held.age.as_secs(),
                    "Reclaiming stale lock"
                );
                if self.reclaim(held.owner.as_deref()).await? {
                    self.create_marker().await
                } else {
                    Ok(None)
                }
            }
            Some(held) => {
                debug!(path = %self.path.display(), owner = ?held.owner, "Lock is held");
                Ok(None)
            }
        }
    }

    /// Probe repeatedly until the lock is obtained or `max_wait` elapses.
    ///
    /// Yields to the runtime between probes.
    pub async fn wait_for_lock(&self, max_wait: Duration) -> StoreResult<Option<LockGuard>> {
        let deadline = Instant::now() + max_wait;

        loop {
            if let Some(guard) = self.try_acquire().await? {
                return Ok(Some(guard));
            }
            if Instant::now() >= deadline {
                warn!(
                    path = %self.path.display(),
                    waited_ms = max_wait.as_millis() as u64,
                    "Timed out waiting for lock"
                );
                return Ok(None);
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Remove the marker regardless of owner. Idempotent.
    pub async fn release(&self) -> StoreResult<()> {
        remove_if_exists(&self.path).await
    }

    /// Whether a marker currently exists
    pub async fn is_locked(&self) -> bool {
        tokio::fs::try_exists(&self.path).await.unwrap_or(false)
    }

    async fn create_marker(&self) -> StoreResult<Option<LockGuard>> {
        let marker = LockMarker::new_for_this_process();
        let bytes = serde_json::to_vec(&marker)?;

        let mut file = match tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.path)
            .await
        {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let written = async {
            file.write_all(&bytes).await?;
            file.sync_all().await
        }
        .await;
        drop(file);

        if let Err(e) = written {
            let _ = remove_if_exists(&self.path).await;
            return Err(e.into());
        }

        // Read back: only the owner whose stamp persisted holds the lock
        match read_marker(&self.path).await? {
            Some(on_disk) if on_disk.owner == marker.owner => {
                debug!(path = %self.path.display(), owner = %marker.owner, "Lock acquired");
                Ok(Some(LockGuard {
                    path: self.path.clone(),
                    owner: marker.owner,
                    released: false,
                }))
            }
            _ => {
                debug!(path = %self.path.display(), "Lock taken over before verification");
                Ok(None)
            }
        }
    }

    async fn inspect(&self) -> StoreResult<Option<HeldMarker>> {
        let metadata = match tokio::fs::metadata(&self.path).await {
            Ok(m) => m,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        match read_marker(&self.path).await? {
            Some(marker) => Ok(Some(HeldMarker {
                owner: Some(marker.owner),
                age: timetrack_util::age_at(marker.timestamp, timetrack_util::now()),
            })),
            None => {
                let age = metadata
                    .modified()
                    .ok()
                    .and_then(|m| SystemTime::now().duration_since(m).ok())
                    .unwrap_or(Duration::ZERO);
                Ok(Some(HeldMarker { owner: None, age }))
            }
        }
    }

    fn gate_path(&self) -> PathBuf {
        self.path.with_extension("reclaim")
    }

    /// Take the reclaim gate. Returns `false` if another reclaim is running.
    ///
    /// A gate older than the stale timeout was left by a reclaimer that died
    /// and is cleared; the caller retries on its next probe.
    async fn enter_gate(&self) -> StoreResult<bool> {
        let gate = self.gate_path();
        match tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&gate)
            .await
        {
            Ok(_) => return Ok(true),
            Err(e) if e.kind() != ErrorKind::AlreadyExists => return Err(e.into()),
            Err(_) => {}
        }

        let abandoned = tokio::fs::metadata(&gate)
            .await
            .ok()
            .and_then(|m| m.modified().ok())
            .and_then(|m| SystemTime::now().duration_since(m).ok())
            .is_some_and(|age| age > self.stale_after);
        if abandoned {
            warn!(path = %gate.display(), "Clearing abandoned reclaim gate");
            remove_if_exists(&gate).await?;
        }
        Ok(false)
    }

    /// Remove the marker judged stale, if it is still the same stale marker.
    ///
    /// Returns `true` when the path is free for a new marker.
    async fn reclaim(&self, stale_owner: Option<&str>) -> StoreResult<bool> {
        if !self.enter_gate().await? {
            debug!(path = %self.path.display(), "Another reclaim in progress");
            return Ok(false);
        }

        let result = self.reclaim_gated(stale_owner).await;
        if let Err(e) = remove_if_exists(&self.gate_path()).await {
            warn!(path = %self.path.display(), error = %e, "Failed to clear reclaim gate");
        }
        result
    }

    async fn reclaim_gated(&self, stale_owner: Option<&str>) -> StoreResult<bool> {
        // Someone may have reclaimed and re-locked since our inspection
        match self.inspect().await? {
            None => return Ok(true),
            Some(held) if held.owner.as_deref() != stale_owner || held.age <= self.stale_after => {
                debug!(path = %self.path.display(), owner = ?held.owner, "Lock no longer stale");
                return Ok(false);
            }
            Some(_) => {}
        }

        let aside = self
            .path
            .with_extension(format!("stale-{}", Uuid::new_v4().simple()));

        match tokio::fs::rename(&self.path, &aside).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(true),
            Err(e) => return Err(e.into()),
        }

        let moved_owner = read_marker(&aside).await?.map(|m| m.owner);
        if moved_owner.as_deref() == stale_owner {
            remove_if_exists(&aside).await?;
            return Ok(true);
        }

        // The stale holder released and a new one locked in between
        warn!(path = %self.path.display(), "Lock changed hands during reclaim, restoring it");
        match tokio::fs::hard_link(&aside, &self.path).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                warn!(
                    path = %self.path.display(),
                    displaced_owner = ?moved_owner,
                    "Displaced lock owner lost its lock"
                );
            }
            Err(e) => {
                let _ = remove_if_exists(&aside).await;
                return Err(e.into());
            }
        }
        remove_if_exists(&aside).await?;
        Ok(false)
    }
}

/// Proof of lock ownership.
///
/// Prefer [`LockGuard::release`]; dropping an unreleased guard removes the
/// marker synchronously on a best-effort basis.
#[derive(Debug)]
pub struct LockGuard {
    path: PathBuf,
    owner: String,
    released: bool,
}

impl LockGuard {
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Whether the marker on disk still names this guard.
    ///
    /// Check before committing work done under the lock.
    pub async fn is_held(&self) -> StoreResult<bool> {
        Ok(read_marker(&self.path)
            .await?
            .is_some_and(|marker| marker.owner == self.owner))
    }

    /// Delete the marker if this guard still owns it
    pub async fn release(mut self) -> StoreResult<()> {
        self.released = true;
        match read_marker(&self.path).await? {
            Some(marker) if marker.owner == self.owner => remove_if_exists(&self.path).await,
            Some(marker) => {
                warn!(
                    path = %self.path.display(),
                    owner = %self.owner,
                    current_owner = %marker.owner,
                    "Lock was reclaimed by another owner, leaving it in place"
                );
                Ok(())
            }
            None => remove_if_exists(&self.path).await,
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let owned = std::fs::read(&self.path)
            .ok()
            .and_then(|bytes| serde_json::from_slice::<LockMarker>(&bytes).ok())
            .is_some_and(|m| m.owner == self.owner);
        if owned && let Err(e) = std::fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), error = %e, "Failed to release lock on drop");
        }
    }
}

/// Read a marker. Missing or unparsable markers yield `None`.
async fn read_marker(path: &Path) -> StoreResult<Option<LockMarker>> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(serde_json::from_slice(&bytes).ok()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

async fn remove_if_exists(path: &Path) -> StoreResult<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

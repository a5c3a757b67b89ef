//! File-backed document store
//!
//! One JSON file per user under the data directory. Writes go through the
//! per-user lock marker and land with a temp-file rename, so readers never
//! take the lock and always see either the old or the new document.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;
use timetrack_api::{Document, VersionedDocument};
use timetrack_util::{ClientId, UserId};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{CleanupReport, DocumentStore, LockGuard, LockManager, SaveOutcome, StoreResult};

const DATA_FILE_PREFIX: &str = "data_";
const DATA_FILE_SUFFIX: &str = ".json";

/// Timing knobs for [`FileStore`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreSettings {
    /// Clients not seen for this long drop out of the liveness list
    pub client_timeout: Duration,
    /// Lock markers older than this are reclaimed
    pub lock_stale_after: Duration,
    /// How long a save waits for the lock before reporting busy
    pub lock_wait: Duration,
    pub lock_poll_interval: Duration,
    /// Documents untouched for longer than this are swept
    pub retention: Duration,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            client_timeout: Duration::from_secs(30),
            lock_stale_after: Duration::from_secs(30),
            lock_wait: Duration::from_secs(5),
            lock_poll_interval: Duration::from_millis(100),
            retention: Duration::from_secs(30 * 24 * 60 * 60),
        }
    }
}

/// Liveness entry in `_clients`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClientSeen {
    id: ClientId,
    last_seen: DateTime<Utc>,
}

/// On-disk layout: the document plus store metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredDocument {
    #[serde(flatten)]
    document: Document,
    #[serde(rename = "_version", default)]
    version: u64,
    #[serde(rename = "_lastModified", default, skip_serializing_if = "Option::is_none")]
    last_modified: Option<DateTime<Utc>>,
    #[serde(rename = "_userId", default, skip_serializing_if = "Option::is_none")]
    user_id: Option<String>,
    #[serde(rename = "_clients", default, deserialize_with = "lenient_clients")]
    clients: Vec<ClientSeen>,
}

/// `_clients` is display-only, so bad entries are dropped rather than
/// failing the whole document. Older files stored `"id:timestamp"` strings.
fn lenient_clients<'de, D>(deserializer: D) -> Result<Vec<ClientSeen>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Vec<serde_json::Value>>::deserialize(deserializer)?.unwrap_or_default();

    Ok(raw
        .into_iter()
        .filter_map(|value| match value {
            serde_json::Value::String(s) => {
                let (id, seen) = s.split_once(':')?;
                Some(ClientSeen {
                    id: ClientId::parse(id).ok()?,
                    last_seen: timetrack_util::parse_timestamp(seen).ok()?,
                })
            }
            other => serde_json::from_value(other).ok(),
        })
        .collect())
}

enum ReadOutcome {
    Missing,
    Corrupt(String),
    Found(StoredDocument),
}

/// Verdict of the retention sweep for one file
enum Retention {
    Keep,
    Expired,
    /// Unreadable, corrupt or missing `_lastModified`; never deleted
    Skip,
}

/// File-backed [`DocumentStore`]
#[derive(Debug)]
pub struct FileStore {
    data_dir: PathBuf,
    settings: StoreSettings,
}

impl FileStore {
    /// Open a store rooted at `data_dir`, creating the directory if needed
    pub fn open(data_dir: impl Into<PathBuf>, settings: StoreSettings) -> StoreResult<Self> {
        let data_dir = data_dir.into();
        std::fs::create_dir_all(&data_dir)?;
        info!(data_dir = %data_dir.display(), "Document store opened");
        Ok(Self { data_dir, settings })
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn settings(&self) -> &StoreSettings {
        &self.settings
    }

    fn document_path(&self, user: &UserId) -> PathBuf {
        self.data_dir
            .join(format!("{DATA_FILE_PREFIX}{user}{DATA_FILE_SUFFIX}"))
    }

    /// Lock manager guarding one user's document
    pub fn lock_for(&self, user: &UserId) -> LockManager {
        LockManager::new(
            self.data_dir.join(format!("{DATA_FILE_PREFIX}{user}.lock")),
            self.settings.lock_stale_after,
            self.settings.lock_poll_interval,
        )
    }

    async fn read_stored(path: &Path) -> StoreResult<ReadOutcome> {
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(ReadOutcome::Missing),
            Err(e) => return Err(e.into()),
        };

        match serde_json::from_slice::<StoredDocument>(&bytes) {
            Ok(stored) => Ok(ReadOutcome::Found(stored)),
            Err(e) => Ok(ReadOutcome::Corrupt(e.to_string())),
        }
    }

    /// Write to a temp file in the same directory, fsync, then rename over
    /// the target.
    async fn write_atomic(path: &Path, stored: &StoredDocument) -> StoreResult<()> {
        let bytes = serde_json::to_vec_pretty(stored)?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let tmp_path = path.with_file_name(format!("{file_name}.tmp-{}", Uuid::new_v4().simple()));

        let result = async {
            let mut file = tokio::fs::File::create(&tmp_path).await?;
            file.write_all(&bytes).await?;
            file.sync_all().await?;
            drop(file);
            tokio::fs::rename(&tmp_path, path).await
        }
        .await;

        if let Err(e) = result {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(e.into());
        }
        Ok(())
    }

    /// Whether a document file has outlived the retention window
    async fn retention_check(&self, path: &Path, now: DateTime<Utc>) -> Retention {
        let last_modified = match Self::read_stored(path).await {
            Ok(ReadOutcome::Found(stored)) => stored.last_modified,
            Ok(ReadOutcome::Missing) => return Retention::Keep,
            Ok(ReadOutcome::Corrupt(message)) => {
                warn!(path = %path.display(), error = %message, "Skipping corrupt document during cleanup");
                return Retention::Skip;
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Skipping unreadable document during cleanup");
                return Retention::Skip;
            }
        };

        match last_modified {
            Some(at) if timetrack_util::is_older_than(at, self.settings.retention, now) => {
                Retention::Expired
            }
            Some(_) => Retention::Keep,
            None => Retention::Skip,
        }
    }

    fn refresh_clients(&self, clients: &mut Vec<ClientSeen>, client: &ClientId, now: DateTime<Utc>) {
        let timeout = self.settings.client_timeout;
        clients.retain(|c| {
            &c.id != client && !timetrack_util::is_older_than(c.last_seen, timeout, now)
        });
        clients.push(ClientSeen {
            id: client.clone(),
            last_seen: now,
        });
    }

    async fn save_locked(
        &self,
        guard: &LockGuard,
        user: &UserId,
        document: Document,
        client: &ClientId,
        expected_version: Option<u64>,
    ) -> StoreResult<SaveOutcome> {
        let path = self.document_path(user);

        let mut clients = Vec::new();
        let (current_version, current_document) = match Self::read_stored(&path).await? {
            ReadOutcome::Found(stored) => {
                clients = stored.clients;
                (stored.version, stored.document)
            }
            ReadOutcome::Missing => (0, Document::starter()),
            ReadOutcome::Corrupt(message) => {
                warn!(user_id = %user, error = %message, "Stored document is corrupt, treating as version 0");
                (0, Document::starter())
            }
        };

        if let Some(expected) = expected_version
            && expected != current_version
        {
            info!(
                user_id = %user,
                client_id = %client,
                expected_version = expected,
                actual_version = current_version,
                "Version conflict, write rejected"
            );
            return Ok(SaveOutcome::Conflict {
                version: current_version,
                document: current_document,
            });
        }

        let now = timetrack_util::now();
        self.refresh_clients(&mut clients, client, now);

        let version = current_version + 1;
        let stored = StoredDocument {
            document,
            version,
            last_modified: Some(now),
            user_id: Some(user.to_string()),
            clients,
        };

        if !guard.is_held().await? {
            warn!(user_id = %user, client_id = %client, "Lock lost before commit, write abandoned");
            return Ok(SaveOutcome::Busy);
        }
        Self::write_atomic(&path, &stored).await?;

        debug!(user_id = %user, client_id = %client, version, "Document saved");
        Ok(SaveOutcome::Saved { version })
    }
}

#[async_trait]
impl DocumentStore for FileStore {
    async fn load(&self, user: &UserId) -> StoreResult<VersionedDocument> {
        match Self::read_stored(&self.document_path(user)).await? {
            ReadOutcome::Found(stored) => Ok(VersionedDocument::new(stored.document, stored.version)),
            ReadOutcome::Missing => Ok(VersionedDocument::starter()),
            ReadOutcome::Corrupt(message) => {
                warn!(user_id = %user, error = %message, "Stored document is corrupt, serving default");
                Ok(VersionedDocument::starter())
            }
        }
    }

    async fn save(
        &self,
        user: &UserId,
        document: Document,
        client: &ClientId,
        expected_version: Option<u64>,
    ) -> StoreResult<SaveOutcome> {
        let Some(guard) = self.lock_for(user).wait_for_lock(self.settings.lock_wait).await? else {
            warn!(user_id = %user, client_id = %client, "Save abandoned, lock busy");
            return Ok(SaveOutcome::Busy);
        };

        let outcome = self
            .save_locked(&guard, user, document, client, expected_version)
            .await;
        let released = guard.release().await;

        let outcome = outcome?;
        if let Err(e) = released {
            warn!(user_id = %user, error = %e, "Failed to release lock after save");
        }
        Ok(outcome)
    }

    async fn get_version(&self, user: &UserId) -> u64 {
        match Self::read_stored(&self.document_path(user)).await {
            Ok(ReadOutcome::Found(stored)) => stored.version,
            Ok(_) => 0,
            Err(e) => {
                warn!(user_id = %user, error = %e, "Failed to read version");
                0
            }
        }
    }

    async fn get_active_clients(&self, user: &UserId) -> Vec<ClientId> {
        let stored = match Self::read_stored(&self.document_path(user)).await {
            Ok(ReadOutcome::Found(stored)) => stored,
            Ok(_) => return Vec::new(),
            Err(e) => {
                debug!(user_id = %user, error = %e, "Failed to read active clients");
                return Vec::new();
            }
        };

        let now = timetrack_util::now();
        stored
            .clients
            .into_iter()
            .filter(|c| !timetrack_util::is_older_than(c.last_seen, self.settings.client_timeout, now))
            .map(|c| c.id)
            .collect()
    }

    async fn cleanup_stale(&self) -> StoreResult<CleanupReport> {
        let mut report = CleanupReport::default();
        let now = timetrack_util::now();

        let mut entries = tokio::fs::read_dir(&self.data_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            let Some(id) = name
                .strip_prefix(DATA_FILE_PREFIX)
                .and_then(|rest| rest.strip_suffix(DATA_FILE_SUFFIX))
            else {
                continue;
            };
            report.scanned += 1;

            let path = entry.path();
            match self.retention_check(&path, now).await {
                Retention::Keep => continue,
                Retention::Skip => {
                    report.skipped += 1;
                    continue;
                }
                Retention::Expired => {}
            }

            let Ok(user) = UserId::parse(id) else {
                warn!(path = %path.display(), "Skipping document with an invalid user id");
                report.skipped += 1;
                continue;
            };

            let guard = match self.lock_for(&user).try_acquire().await {
                Ok(Some(guard)) => guard,
                Ok(None) => {
                    debug!(user_id = %user, "Document is being written, skipping cleanup");
                    report.skipped += 1;
                    continue;
                }
                Err(e) => {
                    warn!(user_id = %user, error = %e, "Failed to lock document for cleanup");
                    report.skipped += 1;
                    continue;
                }
            };

            // A save may have landed since the first check
            match self.retention_check(&path, now).await {
                Retention::Expired => match tokio::fs::remove_file(&path).await {
                    Ok(()) => {
                        info!(user_id = %user, "Removed stale document");
                        report.removed += 1;
                    }
                    Err(e) if e.kind() == ErrorKind::NotFound => {}
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "Failed to remove stale document");
                        report.skipped += 1;
                    }
                },
                Retention::Keep => {}
                Retention::Skip => report.skipped += 1,
            }

            if let Err(e) = guard.release().await {
                warn!(user_id = %user, error = %e, "Failed to release lock after cleanup");
            }
        }

        Ok(report)
    }

    fn is_healthy(&self) -> bool {
        self.data_dir.is_dir()
    }
}

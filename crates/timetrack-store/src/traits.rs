//! Store trait definitions

use async_trait::async_trait;
use timetrack_api::{Document, VersionedDocument};
use timetrack_util::{ClientId, UserId};

use crate::StoreResult;

/// Versioned document storage, one document per user
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Current document and its version, metadata stripped.
    ///
    /// A user without a stored document gets the starter document at
    /// version 0; nothing is created on disk.
    async fn load(&self, user: &UserId) -> StoreResult<VersionedDocument>;

    /// Versioned check-and-swap write.
    ///
    /// With `expected_version` set, the write is only applied if it equals
    /// the stored version at the moment the lock is held.
    async fn save(
        &self,
        user: &UserId,
        document: Document,
        client: &ClientId,
        expected_version: Option<u64>,
    ) -> StoreResult<SaveOutcome>;

    /// Stored version, 0 when absent or unreadable
    async fn get_version(&self, user: &UserId) -> u64;

    /// Clients seen within the liveness window. Best effort.
    async fn get_active_clients(&self, user: &UserId) -> Vec<ClientId>;

    /// Delete documents untouched for longer than the retention window
    async fn cleanup_stale(&self) -> StoreResult<CleanupReport>;

    /// Check if store is healthy
    fn is_healthy(&self) -> bool;
}

/// Result of a save that did not fail with an I/O error
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveOutcome {
    /// Written; the document now has `version`
    Saved { version: u64 },

    /// Not written: the caller's expected version was stale
    Conflict { version: u64, document: Document },

    /// Not written: the lock could not be obtained in time
    Busy,
}

impl SaveOutcome {
    pub fn is_saved(&self) -> bool {
        matches!(self, SaveOutcome::Saved { .. })
    }
}

/// What a retention sweep did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub scanned: usize,
    pub removed: usize,
    pub skipped: usize,
}

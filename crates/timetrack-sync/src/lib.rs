//! Sync client for timetrack
//!
//! Keeps a local view of the user's document in step with the server:
//! - Versioned saves with bounded retry and exponential backoff
//! - Cheap version probes to detect remote changes
//! - A background polling loop that reloads when the server moved ahead
//! - A status channel for rendering a sync indicator

mod client;
mod polling;
mod transport;

pub use client::*;
pub use transport::*;

use thiserror::Error;

/// Failures reported by a [`Transport`]
#[derive(Debug, Clone, Error)]
pub enum SyncError {
    #[error("Not logged in")]
    Unauthorized,

    #[error("Transport error: {0}")]
    Transport(String),
}

impl From<timetrack_http::HttpError> for SyncError {
    fn from(e: timetrack_http::HttpError) -> Self {
        match e {
            timetrack_http::HttpError::Unauthorized => SyncError::Unauthorized,
            other => SyncError::Transport(other.to_string()),
        }
    }
}

impl From<timetrack_store::StoreError> for SyncError {
    fn from(e: timetrack_store::StoreError) -> Self {
        SyncError::Transport(e.to_string())
    }
}

pub type TransportResult<T> = Result<T, SyncError>;

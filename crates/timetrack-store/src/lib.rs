//! Persistence layer for timetrack
//!
//! Provides:
//! - Versioned per-user JSON documents with optimistic concurrency
//! - Advisory lock markers with staleness recovery
//! - Client liveness tracking
//! - Retention sweep for abandoned documents
//! - In-memory login session store

mod edit;
mod file;
mod lock;
mod sessions;
mod traits;

pub use edit::*;
pub use file::*;
pub use lock::*;
pub use sessions::*;
pub use traits::*;

use thiserror::Error;

/// Store errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

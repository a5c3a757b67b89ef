//! Error types shared across timetrack crates

use thiserror::Error;

/// Core error type for timetrack operations
#[derive(Debug, Error)]
pub enum TimetrackError {
    #[error("Invalid user id: {0:?}")]
    InvalidUserId(String),

    #[error("Invalid client id: {0:?}")]
    InvalidClientId(String),

    #[error("Invalid timestamp {value:?}: {message}")]
    InvalidTimestamp { value: String, message: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl TimetrackError {
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, TimetrackError>;

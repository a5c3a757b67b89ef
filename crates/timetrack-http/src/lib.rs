//! HTTP layer for timetrack
//!
//! Provides:
//! - axum router serving the data, current-session and auth endpoints
//! - Cookie-based login sessions
//! - reqwest client used by sync clients

mod client;
mod server;

pub use client::*;
pub use server::*;

use thiserror::Error;

/// Client-side HTTP errors
#[derive(Debug, Error)]
pub enum HttpError {
    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Not logged in")]
    Unauthorized,

    #[error("Server answered {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

pub type HttpResult<T> = Result<T, HttpError>;

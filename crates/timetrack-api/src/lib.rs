//! Data model and protocol types for timetrack
//!
//! This crate defines the stable contract between the server and sync clients:
//! - The per-user document (sessions, projects, in-progress session)
//! - Request/response bodies of the HTTP API
//! - Route paths, header and cookie names
//! - Versioning

mod model;
mod protocol;

pub use model::*;
pub use protocol::*;

/// Current API version
pub const API_VERSION: u32 = 1;

//! Shared utilities for timetrack
//!
//! This crate provides:
//! - ID types (UserId, ClientId, SessionId, AuthToken)
//! - Clock helpers (wall-clock now with debug mock time, ages)
//! - Error types
//! - Default paths for config and data directories

mod error;
mod ids;
mod paths;
mod time;

pub use error::*;
pub use ids::*;
pub use paths::*;
pub use time::*;

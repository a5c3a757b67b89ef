//! Raw configuration schema (as parsed from TOML)

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Raw configuration as parsed from TOML
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawConfig {
    /// Config schema version
    pub config_version: u32,

    /// HTTP server settings
    #[serde(default)]
    pub server: RawServerConfig,

    /// Single-user login settings
    #[serde(default)]
    pub auth: RawAuthConfig,

    /// Document store timing
    #[serde(default)]
    pub store: RawStoreConfig,

    /// Sync client behaviour
    #[serde(default)]
    pub sync: RawSyncConfig,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawServerConfig {
    /// Listen address, e.g. "127.0.0.1:3000"
    pub bind: Option<String>,

    /// Directory holding the per-user documents
    pub data_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawAuthConfig {
    pub username: Option<String>,
    pub password: Option<String>,
    pub session_lifetime_seconds: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawStoreConfig {
    /// How long a client stays in the liveness list after its last save
    pub client_timeout_seconds: Option<u64>,

    /// Age after which a lock marker counts as abandoned
    pub lock_stale_seconds: Option<u64>,

    /// How long a save waits for the lock before giving up
    pub lock_wait_millis: Option<u64>,

    /// Delay between lock probes
    pub lock_poll_millis: Option<u64>,

    /// Documents untouched for longer than this are purged
    pub retention_days: Option<u64>,

    /// How often the purge runs
    pub cleanup_interval_seconds: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawSyncConfig {
    pub poll_interval_seconds: Option<u64>,
    pub max_attempts: Option<u32>,
    pub backoff_base_millis: Option<u64>,
    pub backoff_cap_millis: Option<u64>,
}

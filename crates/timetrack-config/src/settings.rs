//! Validated settings structures

use crate::schema::{RawAuthConfig, RawConfig, RawServerConfig, RawStoreConfig, RawSyncConfig};
use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_USERNAME: &str = "admin";
pub const DEFAULT_PASSWORD: &str = "admin";

const DAY: u64 = 24 * 3600;

/// Validated settings ready for use by the service
#[derive(Debug, Clone, Default)]
pub struct Settings {
    pub server: ServerSettings,
    pub auth: AuthSettings,
    pub store: StoreTimings,
    pub sync: SyncTimings,
}

impl Settings {
    /// Convert from raw config (after validation)
    pub fn from_raw(raw: RawConfig) -> Self {
        Self {
            server: ServerSettings::from_raw(raw.server),
            auth: AuthSettings::from_raw(raw.auth),
            store: StoreTimings::from_raw(raw.store),
            sync: SyncTimings::from_raw(raw.sync),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub bind: SocketAddr,
    pub data_dir: PathBuf,
}

impl ServerSettings {
    fn from_raw(raw: RawServerConfig) -> Self {
        let defaults = Self::default();
        Self {
            // validated beforehand
            bind: raw
                .bind
                .and_then(|b| b.parse().ok())
                .unwrap_or(defaults.bind),
            data_dir: raw.data_dir.unwrap_or(defaults.data_dir),
        }
    }
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from((Ipv4Addr::LOCALHOST, DEFAULT_PORT)),
            data_dir: timetrack_util::default_data_dir(),
        }
    }
}

/// Credentials of the single user and login lifetime
#[derive(Debug, Clone)]
pub struct AuthSettings {
    pub username: String,
    pub password: String,
    pub session_lifetime: Duration,
}

impl AuthSettings {
    fn from_raw(raw: RawAuthConfig) -> Self {
        let defaults = Self::default();
        Self {
            username: raw.username.unwrap_or(defaults.username),
            password: raw.password.unwrap_or(defaults.password),
            session_lifetime: raw
                .session_lifetime_seconds
                .map(Duration::from_secs)
                .unwrap_or(defaults.session_lifetime),
        }
    }
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            username: DEFAULT_USERNAME.into(),
            password: DEFAULT_PASSWORD.into(),
            session_lifetime: Duration::from_secs(DAY),
        }
    }
}

#[derive(Debug, Clone)]
pub struct StoreTimings {
    pub client_timeout: Duration,
    pub lock_stale_after: Duration,
    pub lock_wait: Duration,
    pub lock_poll_interval: Duration,
    pub retention: Duration,
    pub cleanup_interval: Duration,
}

impl StoreTimings {
    fn from_raw(raw: RawStoreConfig) -> Self {
        let d = Self::default();
        Self {
            client_timeout: raw
                .client_timeout_seconds
                .map(Duration::from_secs)
                .unwrap_or(d.client_timeout),
            lock_stale_after: raw
                .lock_stale_seconds
                .map(Duration::from_secs)
                .unwrap_or(d.lock_stale_after),
            lock_wait: raw
                .lock_wait_millis
                .map(Duration::from_millis)
                .unwrap_or(d.lock_wait),
            lock_poll_interval: raw
                .lock_poll_millis
                .map(Duration::from_millis)
                .unwrap_or(d.lock_poll_interval),
            retention: raw
                .retention_days
                .map(|days| Duration::from_secs(days.saturating_mul(DAY)))
                .unwrap_or(d.retention),
            cleanup_interval: raw
                .cleanup_interval_seconds
                .map(Duration::from_secs)
                .unwrap_or(d.cleanup_interval),
        }
    }
}

impl Default for StoreTimings {
    fn default() -> Self {
        Self {
            client_timeout: Duration::from_secs(30),
            lock_stale_after: Duration::from_secs(30),
            lock_wait: Duration::from_millis(5000),
            lock_poll_interval: Duration::from_millis(100),
            retention: Duration::from_secs(30 * DAY),
            cleanup_interval: Duration::from_secs(3600),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SyncTimings {
    pub poll_interval: Duration,
    pub max_attempts: u32,
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
}

impl SyncTimings {
    fn from_raw(raw: RawSyncConfig) -> Self {
        let d = Self::default();
        Self {
            poll_interval: raw
                .poll_interval_seconds
                .map(Duration::from_secs)
                .unwrap_or(d.poll_interval),
            max_attempts: raw.max_attempts.unwrap_or(d.max_attempts),
            backoff_base: raw
                .backoff_base_millis
                .map(Duration::from_millis)
                .unwrap_or(d.backoff_base),
            backoff_cap: raw
                .backoff_cap_millis
                .map(Duration::from_millis)
                .unwrap_or(d.backoff_cap),
        }
    }
}

impl Default for SyncTimings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(10),
            max_attempts: 3,
            backoff_base: Duration::from_millis(1000),
            backoff_cap: Duration::from_millis(5000),
        }
    }
}

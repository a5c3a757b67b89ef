//! Configuration validation

use crate::schema::{RawAuthConfig, RawConfig, RawStoreConfig, RawSyncConfig};
use std::net::SocketAddr;
use thiserror::Error;
use timetrack_util::UserId;

/// Upper bound for `[store] retention_days`
pub const MAX_RETENTION_DAYS: u64 = 36_500;

/// Validation error
#[derive(Debug, Clone, Error)]
pub enum ValidationError {
    #[error("Invalid bind address '{value}': {message}")]
    InvalidBind { value: String, message: String },

    #[error("[{section}] {field} must be greater than zero")]
    MustBePositive {
        section: &'static str,
        field: &'static str,
    },

    #[error("[auth] {0} cannot be empty")]
    EmptyCredential(&'static str),

    #[error("[auth] username '{0}' may only contain letters, digits, '-' and '_' (at most 64)")]
    InvalidUsername(String),

    #[error("[store] retention_days ({0}) exceeds {MAX_RETENTION_DAYS}")]
    RetentionTooLong(u64),

    #[error("[store] lock_poll_millis ({poll}) must be below lock_wait_millis ({wait})")]
    PollExceedsWait { poll: u64, wait: u64 },

    #[error("[sync] backoff_base_millis ({base}) exceeds backoff_cap_millis ({cap})")]
    BackoffBaseExceedsCap { base: u64, cap: u64 },
}

/// Validate a raw configuration
pub fn validate_config(config: &RawConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if let Some(bind) = &config.server.bind
        && let Err(e) = bind.parse::<SocketAddr>()
    {
        errors.push(ValidationError::InvalidBind {
            value: bind.clone(),
            message: e.to_string(),
        });
    }

    errors.extend(validate_auth(&config.auth));
    errors.extend(validate_store(&config.store));
    errors.extend(validate_sync(&config.sync));

    errors
}

fn positive(
    value: Option<u64>,
    section: &'static str,
    field: &'static str,
    errors: &mut Vec<ValidationError>,
) {
    if value == Some(0) {
        errors.push(ValidationError::MustBePositive { section, field });
    }
}

fn validate_auth(auth: &RawAuthConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    match auth.username.as_deref() {
        Some(u) if u.trim().is_empty() => {
            errors.push(ValidationError::EmptyCredential("username"));
        }
        // the username doubles as the user id
        Some(u) if UserId::parse(u).is_err() => {
            errors.push(ValidationError::InvalidUsername(u.to_string()));
        }
        _ => {}
    }
    if auth.password.as_deref().is_some_and(str::is_empty) {
        errors.push(ValidationError::EmptyCredential("password"));
    }
    positive(auth.session_lifetime_seconds, "auth", "session_lifetime_seconds", &mut errors);

    errors
}

fn validate_store(store: &RawStoreConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    positive(store.client_timeout_seconds, "store", "client_timeout_seconds", &mut errors);
    positive(store.lock_stale_seconds, "store", "lock_stale_seconds", &mut errors);
    positive(store.lock_wait_millis, "store", "lock_wait_millis", &mut errors);
    positive(store.lock_poll_millis, "store", "lock_poll_millis", &mut errors);
    positive(store.retention_days, "store", "retention_days", &mut errors);
    positive(store.cleanup_interval_seconds, "store", "cleanup_interval_seconds", &mut errors);

    if let Some(days) = store.retention_days
        && days > MAX_RETENTION_DAYS
    {
        errors.push(ValidationError::RetentionTooLong(days));
    }

    let poll = store.lock_poll_millis.unwrap_or(100);
    let wait = store.lock_wait_millis.unwrap_or(5000);
    if poll > 0 && wait > 0 && poll >= wait {
        errors.push(ValidationError::PollExceedsWait { poll, wait });
    }

    errors
}

fn validate_sync(sync: &RawSyncConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    positive(sync.poll_interval_seconds, "sync", "poll_interval_seconds", &mut errors);
    positive(sync.max_attempts.map(u64::from), "sync", "max_attempts", &mut errors);

    let base = sync.backoff_base_millis.unwrap_or(1000);
    let cap = sync.backoff_cap_millis.unwrap_or(5000);
    if base > cap {
        errors.push(ValidationError::BackoffBaseExceedsCap { base, cap });
    }

    errors
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(toml_src: &str) -> RawConfig {
        toml::from_str(toml_src).unwrap()
    }

    #[test]
    fn defaults_are_valid() {
        assert!(validate_config(&raw("config_version = 1")).is_empty());
    }

    #[test]
    fn zero_durations_rejected() {
        let config = raw(
            r#"
            config_version = 1
            [store]
            lock_stale_seconds = 0
            retention_days = 0
        "#,
        );
        let errors = validate_config(&config);
        assert_eq!(errors.len(), 2);
        assert!(errors.iter().all(|e| matches!(e, ValidationError::MustBePositive { section: "store", .. })));
    }

    #[test]
    fn poll_must_fit_in_wait() {
        let config = raw(
            r#"
            config_version = 1
            [store]
            lock_wait_millis = 100
            lock_poll_millis = 200
        "#,
        );
        let errors = validate_config(&config);
        assert!(matches!(errors.as_slice(), [ValidationError::PollExceedsWait { poll: 200, wait: 100 }]));
    }

    #[test]
    fn empty_credentials_rejected() {
        let config = raw(
            r#"
            config_version = 1
            [auth]
            username = "  "
            password = ""
        "#,
        );
        assert_eq!(validate_config(&config).len(), 2);
    }

    #[test]
    fn username_must_be_a_user_id() {
        let config = raw(
            r#"
            config_version = 1
            [auth]
            username = "merlin.kraemer"
        "#,
        );
        assert!(matches!(
            validate_config(&config).as_slice(),
            [ValidationError::InvalidUsername(name)] if name == "merlin.kraemer"
        ));

        let config = raw(
            r#"
            config_version = 1
            [auth]
            username = "merlin_kraemer"
        "#,
        );
        assert!(validate_config(&config).is_empty());
    }

    #[test]
    fn huge_retention_rejected() {
        let config = raw(
            r#"
            config_version = 1
            [store]
            retention_days = 9223372036854775807
        "#,
        );
        assert!(matches!(
            validate_config(&config).as_slice(),
            [ValidationError::RetentionTooLong(9223372036854775807)]
        ));
    }

    #[test]
    fn backoff_base_above_cap_rejected() {
        let config = raw(
            r#"
            config_version = 1
            [sync]
            backoff_base_millis = 6000
        "#,
        );
        assert!(matches!(
            validate_config(&config).as_slice(),
            [ValidationError::BackoffBaseExceedsCap { base: 6000, cap: 5000 }]
        ));
    }
}

//! Clock helpers for timetrack
//!
//! All persisted timestamps are UTC and serialized as RFC 3339.
//!
//! # Mock Time for Development
//!
//! In debug builds, the `TIMETRACK_MOCK_TIME` environment variable can be set
//! to shift the clock, which makes lock staleness and retention easy to
//! exercise by hand.
//!
//! Format: `YYYY-MM-DD HH:MM:SS` (UTC, e.g. `2025-12-25 14:30:00`)

use chrono::{DateTime, NaiveDateTime, Utc};
use std::sync::OnceLock;
use std::time::Duration;

use crate::{Result, TimetrackError};

/// Environment variable name for mock time (debug builds only)
pub const MOCK_TIME_ENV_VAR: &str = "TIMETRACK_MOCK_TIME";

const MOCK_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Offset between mock time and real time at process start.
static MOCK_TIME_OFFSET: OnceLock<Option<chrono::Duration>> = OnceLock::new();

#[allow(clippy::disallowed_methods)] // wraps Utc::now()
fn get_mock_time_offset() -> Option<chrono::Duration> {
    *MOCK_TIME_OFFSET.get_or_init(|| {
        #[cfg(debug_assertions)]
        {
            if let Ok(mock_time_str) = std::env::var(MOCK_TIME_ENV_VAR) {
                match NaiveDateTime::parse_from_str(&mock_time_str, MOCK_TIME_FORMAT) {
                    Ok(naive_dt) => {
                        let offset = naive_dt.and_utc().signed_duration_since(Utc::now());
                        tracing::info!(
                            mock_time = %mock_time_str,
                            offset_secs = offset.num_seconds(),
                            "Mock time enabled"
                        );
                        return Some(offset);
                    }
                    Err(_) => {
                        tracing::warn!(
                            mock_time = %mock_time_str,
                            expected_format = MOCK_TIME_FORMAT,
                            "Invalid mock time format"
                        );
                    }
                }
            }
            None
        }
        #[cfg(not(debug_assertions))]
        {
            None
        }
    })
}

/// Returns whether mock time is currently active.
pub fn is_mock_time_active() -> bool {
    get_mock_time_offset().is_some()
}

/// Current UTC time, respecting mock time settings in debug builds.
#[allow(clippy::disallowed_methods)] // the wrapper that provides mock time support
pub fn now() -> DateTime<Utc> {
    let real_now = Utc::now();

    match get_mock_time_offset() {
        Some(offset) => real_now + offset,
        None => real_now,
    }
}

/// How long ago `then` was, relative to `now`. Future timestamps count as zero.
pub fn age_at(then: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    now.signed_duration_since(then)
        .to_std()
        .unwrap_or(Duration::ZERO)
}

/// Whether `then` lies more than `window` before `now`.
pub fn is_older_than(then: DateTime<Utc>, window: Duration, now: DateTime<Utc>) -> bool {
    age_at(then, now) > window
}

/// Parse an RFC 3339 timestamp into UTC
pub fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| TimetrackError::InvalidTimestamp {
            value: value.to_string(),
            message: e.to_string(),
        })
}

/// Format a duration for display ("2h 5m", "4m 10s", "12s")
pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    let hours = secs / 3600;
    let mins = (secs % 3600) / 60;
    let secs = secs % 60;

    if hours > 0 {
        format!("{}h {}m", hours, mins)
    } else if mins > 0 {
        format!("{}m {}s", mins, secs)
    } else {
        format!("{}s", secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_secs(12)), "12s");
        assert_eq!(format_duration(Duration::from_secs(250)), "4m 10s");
        assert_eq!(format_duration(Duration::from_secs(7500)), "2h 5m");
    }

    #[test]
    fn test_age_never_negative() {
        let now = Utc::now();
        let future = now + chrono::Duration::seconds(30);
        assert_eq!(age_at(future, now), Duration::ZERO);

        let past = now - chrono::Duration::seconds(31);
        assert!(is_older_than(past, Duration::from_secs(30), now));
        assert!(!is_older_than(past, Duration::from_secs(60), now));
    }

    #[test]
    fn test_parse_timestamp() {
        let ts = parse_timestamp("2025-12-25T14:30:00.000Z").unwrap();
        assert_eq!(ts.to_rfc3339(), "2025-12-25T14:30:00+00:00");

        let ts = parse_timestamp("2025-12-25T16:30:00+02:00").unwrap();
        assert_eq!(ts.to_rfc3339(), "2025-12-25T14:30:00+00:00");

        assert!(parse_timestamp("yesterday").is_err());
    }

    #[test]
    fn test_mock_time_format_parses() {
        let parsed = NaiveDateTime::parse_from_str("2025-12-25 14:30:00", MOCK_TIME_FORMAT);
        assert!(parsed.is_ok());
        assert!(NaiveDateTime::parse_from_str("2025-12-25T14:30:00", MOCK_TIME_FORMAT).is_err());
    }

    #[test]
    fn test_now_returns_time() {
        if !is_mock_time_active() {
            let real = Utc::now();
            let ours = now();
            assert!(age_at(real, ours) < Duration::from_secs(1));
        }
    }
}

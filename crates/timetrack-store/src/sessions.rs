//! Login session store
//!
//! Sessions live only in memory; a restart logs everyone out.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use timetrack_util::{AuthToken, UserId};
use tracing::debug;

/// A logged-in browser session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthSession {
    pub token: AuthToken,
    pub user_id: UserId,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

/// Keyed storage for login sessions, injected into the HTTP layer
pub trait SessionStore: Send + Sync {
    /// Start a session for `user`
    fn create(&self, user: UserId) -> AuthSession;

    /// Look up a live session and mark it active.
    ///
    /// Expired sessions are removed and yield `None`.
    fn validate(&self, token: &AuthToken) -> Option<AuthSession>;

    /// End a session. Returns whether it existed.
    fn invalidate(&self, token: &AuthToken) -> bool;

    /// Drop all expired sessions, returning how many were removed
    fn cleanup_expired(&self) -> usize;
}

/// [`SessionStore`] backed by a map behind a mutex
#[derive(Debug)]
pub struct MemorySessionStore {
    sessions: Mutex<HashMap<AuthToken, AuthSession>>,
    lifetime: Duration,
}

impl MemorySessionStore {
    pub fn new(lifetime: Duration) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            lifetime,
        }
    }

    pub fn lifetime(&self) -> Duration {
        self.lifetime
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Session lifetime counts from creation, not from last activity
    fn is_expired(&self, session: &AuthSession, now: DateTime<Utc>) -> bool {
        timetrack_util::is_older_than(session.created_at, self.lifetime, now)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<AuthToken, AuthSession>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn create_at(&self, user: UserId, now: DateTime<Utc>) -> AuthSession {
        let session = AuthSession {
            token: AuthToken::new(),
            user_id: user,
            created_at: now,
            last_activity: now,
        };
        self.lock().insert(session.token.clone(), session.clone());
        debug!(user_id = %session.user_id, "Login session created");
        session
    }

    pub fn validate_at(&self, token: &AuthToken, now: DateTime<Utc>) -> Option<AuthSession> {
        let mut sessions = self.lock();
        let expired = self.is_expired(sessions.get(token)?, now);
        if expired {
            sessions.remove(token);
            debug!("Login session expired");
            return None;
        }

        let session = sessions.get_mut(token)?;
        session.last_activity = now;
        Some(session.clone())
    }

    pub fn cleanup_expired_at(&self, now: DateTime<Utc>) -> usize {
        let mut sessions = self.lock();
        let before = sessions.len();
        sessions.retain(|_, s| !self.is_expired(s, now));
        before - sessions.len()
    }
}

impl SessionStore for MemorySessionStore {
    fn create(&self, user: UserId) -> AuthSession {
        self.create_at(user, timetrack_util::now())
    }

    fn validate(&self, token: &AuthToken) -> Option<AuthSession> {
        self.validate_at(token, timetrack_util::now())
    }

    fn invalidate(&self, token: &AuthToken) -> bool {
        self.lock().remove(token).is_some()
    }

    fn cleanup_expired(&self) -> usize {
        self.cleanup_expired_at(timetrack_util::now())
    }
}

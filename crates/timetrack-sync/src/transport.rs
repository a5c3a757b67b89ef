//! How a sync client reaches the document store

use async_trait::async_trait;
use std::sync::Arc;
use timetrack_api::{
    ConflictResponse, SaveReply, SaveRequest, SaveResponse, Session, VersionedDocument,
};
use timetrack_http::HttpClient;
use timetrack_store::{DocumentStore, SaveOutcome};
use timetrack_util::{ClientId, UserId};

use crate::{SyncError, TransportResult};

/// Attempts for a current-session edit that keeps losing races
const CURRENT_SESSION_ATTEMPTS: u32 = 3;

/// Operations a sync client needs from the server.
///
/// A version conflict is a regular [`SaveReply`], not an error.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn load(&self) -> TransportResult<VersionedDocument>;

    async fn save(&self, request: &SaveRequest) -> TransportResult<SaveReply>;

    /// Stored version only
    async fn probe_version(&self) -> TransportResult<u64>;

    async fn save_current_session(&self, session: &Session) -> TransportResult<SaveResponse>;

    async fn clear_current_session(&self) -> TransportResult<SaveResponse>;
}

#[async_trait]
impl Transport for HttpClient {
    async fn load(&self) -> TransportResult<VersionedDocument> {
        Ok(HttpClient::load(self).await?)
    }

    async fn save(&self, request: &SaveRequest) -> TransportResult<SaveReply> {
        Ok(HttpClient::save(self, request).await?)
    }

    async fn probe_version(&self) -> TransportResult<u64> {
        Ok(HttpClient::probe_version(self).await?)
    }

    async fn save_current_session(&self, session: &Session) -> TransportResult<SaveResponse> {
        Ok(HttpClient::save_current_session(self, session).await?)
    }

    async fn clear_current_session(&self) -> TransportResult<SaveResponse> {
        Ok(HttpClient::clear_current_session(self).await?)
    }
}

/// In-process transport talking to a [`DocumentStore`] directly, for tools
/// running next to the data directory.
pub struct StoreTransport {
    store: Arc<dyn DocumentStore>,
    user: UserId,
    editor: ClientId,
}

impl StoreTransport {
    pub fn new(store: Arc<dyn DocumentStore>, user: UserId) -> Self {
        Self {
            store,
            user,
            editor: ClientId::new(),
        }
    }

    pub fn user(&self) -> &UserId {
        &self.user
    }

    async fn replace_current_session(&self, session: Option<Session>) -> TransportResult<SaveResponse> {
        let outcome = timetrack_store::replace_current_session(
            self.store.as_ref(),
            &self.user,
            &self.editor,
            session,
            CURRENT_SESSION_ATTEMPTS,
        )
        .await?;

        match outcome {
            SaveOutcome::Saved { version } => Ok(SaveResponse::saved(version)),
            SaveOutcome::Conflict { version, .. } => Err(SyncError::Transport(format!(
                "current session update kept conflicting (version {version})"
            ))),
            SaveOutcome::Busy => Err(SyncError::Transport("document is locked".into())),
        }
    }
}

#[async_trait]
impl Transport for StoreTransport {
    async fn load(&self) -> TransportResult<VersionedDocument> {
        Ok(self.store.load(&self.user).await?)
    }

    async fn save(&self, request: &SaveRequest) -> TransportResult<SaveReply> {
        let outcome = self
            .store
            .save(
                &self.user,
                request.data.clone(),
                &request.client_id,
                request.expected_version,
            )
            .await?;

        Ok(match outcome {
            SaveOutcome::Saved { version } => SaveReply::Saved(SaveResponse::saved(version)),
            SaveOutcome::Conflict { version, document } => {
                SaveReply::Conflict(ConflictResponse::version_mismatch(version, document))
            }
            SaveOutcome::Busy => {
                let current = self.store.load(&self.user).await?;
                SaveReply::Conflict(ConflictResponse::busy(current.version, current.document))
            }
        })
    }

    async fn probe_version(&self) -> TransportResult<u64> {
        Ok(self.store.get_version(&self.user).await)
    }

    async fn save_current_session(&self, session: &Session) -> TransportResult<SaveResponse> {
        self.replace_current_session(Some(session.clone())).await
    }

    async fn clear_current_session(&self) -> TransportResult<SaveResponse> {
        self.replace_current_session(None).await
    }
}

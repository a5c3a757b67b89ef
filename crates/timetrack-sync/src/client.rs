//! Sync client: versioned saves, update probes, status

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use timetrack_api::{Document, SaveReply, SaveRequest, Session, VersionedDocument};
use timetrack_util::ClientId;
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::polling::Poller;
use crate::{SyncError, Transport};

/// What to do when a save hits a newer server version
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConflictPolicy {
    /// Resubmit the same payload against the newer version (last writer wins)
    #[default]
    Overwrite,
    /// Hand the conflict back to the caller right away
    Surface,
}

/// Sync client tuning
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncSettings {
    /// Total attempts per save, first try included
    pub max_attempts: u32,
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
    pub poll_interval: Duration,
    pub conflict_policy: ConflictPolicy,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base: Duration::from_secs(1),
            backoff_cap: Duration::from_secs(5),
            poll_interval: Duration::from_secs(10),
            conflict_policy: ConflictPolicy::Overwrite,
        }
    }
}

impl From<&timetrack_config::SyncTimings> for SyncSettings {
    fn from(timings: &timetrack_config::SyncTimings) -> Self {
        Self {
            max_attempts: timings.max_attempts,
            backoff_base: timings.backoff_base,
            backoff_cap: timings.backoff_cap,
            poll_interval: timings.poll_interval,
            conflict_policy: ConflictPolicy::default(),
        }
    }
}

/// Delay before retry number `attempt` (1-based): `min(base * 2^(attempt-1), cap)`
pub fn backoff_delay(attempt: u32, base: Duration, cap: Duration) -> Duration {
    let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
    base.saturating_mul(factor).min(cap)
}

/// Outcome of a sync operation. Failures never escape as errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncResult {
    /// `document` is set for loads
    Success {
        version: u64,
        document: Option<Document>,
    },
    /// The save was not applied; the server holds `document` at `version`
    Conflict { version: u64, document: Document },
    /// Login required; never retried
    Unauthorized,
    Error(String),
}

impl SyncResult {
    pub fn is_success(&self) -> bool {
        matches!(self, SyncResult::Success { .. })
    }
}

/// Sync indicator state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SyncStatus {
    #[default]
    Synced,
    Syncing,
    Conflict,
    Error,
}

/// State shared with the polling task
pub(crate) struct Shared<T> {
    transport: T,
    client_id: ClientId,
    current_version: AtomicU64,
    settings: Mutex<SyncSettings>,
    status: watch::Sender<SyncStatus>,
}

impl<T: Transport> Shared<T> {
    fn settings(&self) -> MutexGuard<'_, SyncSettings> {
        self.settings.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_status(&self, status: SyncStatus) {
        self.status.send_replace(status);
    }

    pub(crate) async fn load_data(&self) -> SyncResult {
        self.set_status(SyncStatus::Syncing);

        match self.transport.load().await {
            Ok(VersionedDocument { document, version }) => {
                self.current_version.store(version, Ordering::SeqCst);
                self.set_status(SyncStatus::Synced);
                debug!(version, "Loaded document");
                SyncResult::Success {
                    version,
                    document: Some(document),
                }
            }
            Err(SyncError::Unauthorized) => {
                self.set_status(SyncStatus::Error);
                SyncResult::Unauthorized
            }
            Err(e) => {
                warn!(error = %e, "Failed to load document");
                self.set_status(SyncStatus::Error);
                SyncResult::Error(e.to_string())
            }
        }
    }

    async fn save_data(&self, document: &Document) -> SyncResult {
        let settings = self.settings().clone();
        let max_attempts = settings.max_attempts.max(1);
        self.set_status(SyncStatus::Syncing);

        let mut attempt = 1;
        loop {
            let expected_version = self.current_version.load(Ordering::SeqCst);
            let request = SaveRequest {
                data: document.clone(),
                expected_version: Some(expected_version),
                client_id: self.client_id.clone(),
            };

            match self.transport.save(&request).await {
                Ok(SaveReply::Saved(saved)) => {
                    self.current_version.store(saved.version, Ordering::SeqCst);
                    self.set_status(SyncStatus::Synced);
                    debug!(version = saved.version, attempt, "Saved document");
                    return SyncResult::Success {
                        version: saved.version,
                        document: None,
                    };
                }
                Ok(SaveReply::Conflict(conflict)) => {
                    self.current_version
                        .store(conflict.actual_version, Ordering::SeqCst);

                    if settings.conflict_policy == ConflictPolicy::Surface || attempt >= max_attempts {
                        info!(
                            expected_version,
                            actual_version = conflict.actual_version,
                            attempt,
                            "Save conflict, giving up"
                        );
                        self.set_status(SyncStatus::Conflict);
                        return SyncResult::Conflict {
                            version: conflict.actual_version,
                            document: conflict.current_data,
                        };
                    }
                    info!(
                        expected_version,
                        actual_version = conflict.actual_version,
                        attempt,
                        max_attempts,
                        "Save conflict, retrying with newer version"
                    );
                }
                Err(SyncError::Unauthorized) => {
                    self.set_status(SyncStatus::Error);
                    return SyncResult::Unauthorized;
                }
                Err(e) => {
                    if attempt >= max_attempts {
                        warn!(error = %e, attempt, "Save failed, giving up");
                        self.set_status(SyncStatus::Error);
                        return SyncResult::Error(e.to_string());
                    }
                    warn!(error = %e, attempt, max_attempts, "Save failed, retrying");
                }
            }

            sleep(backoff_delay(attempt, settings.backoff_base, settings.backoff_cap)).await;
            attempt += 1;
        }
    }

    pub(crate) async fn check_for_updates(&self) -> bool {
        match self.transport.probe_version().await {
            Ok(server_version) => server_version > self.current_version.load(Ordering::SeqCst),
            Err(e) => {
                debug!(error = %e, "Version probe failed");
                false
            }
        }
    }
}

/// Client-side half of document sync, one per tab/device/process
pub struct SyncClient<T: Transport> {
    shared: Arc<Shared<T>>,
    poller: Mutex<Option<Poller>>,
}

impl<T: Transport> SyncClient<T> {
    pub fn new(transport: T, settings: SyncSettings) -> Self {
        let (status, _) = watch::channel(SyncStatus::default());
        let client_id = ClientId::new();
        debug!(client_id = %client_id, "Sync client created");

        Self {
            shared: Arc::new(Shared {
                transport,
                client_id,
                current_version: AtomicU64::new(0),
                settings: Mutex::new(settings),
                status,
            }),
            poller: Mutex::new(None),
        }
    }

    pub fn client_id(&self) -> &ClientId {
        &self.shared.client_id
    }

    pub fn transport(&self) -> &T {
        &self.shared.transport
    }

    /// Last version this client saw
    pub fn current_version(&self) -> u64 {
        self.shared.current_version.load(Ordering::SeqCst)
    }

    pub fn set_current_version(&self, version: u64) {
        self.shared.current_version.store(version, Ordering::SeqCst);
    }

    pub fn status(&self) -> SyncStatus {
        *self.shared.status.borrow()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<SyncStatus> {
        self.shared.status.subscribe()
    }

    pub fn settings(&self) -> SyncSettings {
        self.shared.settings().clone()
    }

    /// Fetch the document and remember its version
    pub async fn load_data(&self) -> SyncResult {
        self.shared.load_data().await
    }

    /// Save against the last seen version, retrying per the conflict policy
    pub async fn save_data(&self, document: &Document) -> SyncResult {
        self.shared.save_data(document).await
    }

    /// Whether the server holds a newer version than this client has seen
    pub async fn check_for_updates(&self) -> bool {
        self.shared.check_for_updates().await
    }

    /// Update only the in-progress session server-side.
    ///
    /// Does not advance the cached version: other changes may have landed in
    /// between, and the next poll should still pick them up.
    pub async fn save_current_session(&self, session: &Session) -> SyncResult {
        self.current_session_result(self.shared.transport.save_current_session(session).await)
    }

    pub async fn clear_current_session(&self) -> SyncResult {
        self.current_session_result(self.shared.transport.clear_current_session().await)
    }

    fn current_session_result(
        &self,
        result: crate::TransportResult<timetrack_api::SaveResponse>,
    ) -> SyncResult {
        match result {
            Ok(saved) => SyncResult::Success {
                version: saved.version,
                document: None,
            },
            Err(SyncError::Unauthorized) => SyncResult::Unauthorized,
            Err(e) => {
                warn!(error = %e, "Current session update failed");
                SyncResult::Error(e.to_string())
            }
        }
    }

    fn poller(&self) -> MutexGuard<'_, Option<Poller>> {
        self.poller.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start the background polling loop.
    ///
    /// `on_change` receives the freshly loaded document whenever the server
    /// moved past this client's version. No-op if already polling. Must be
    /// called from within a tokio runtime.
    pub fn start_polling<F>(&self, on_change: F)
    where
        F: Fn(VersionedDocument) + Send + Sync + 'static,
    {
        let mut poller = self.poller();
        if poller.as_ref().is_some_and(Poller::is_running) {
            debug!("Polling already running");
            return;
        }

        let interval = self.shared.settings().poll_interval;
        *poller = Some(Poller::spawn(self.shared.clone(), interval, Arc::new(on_change)));
        info!(interval_ms = interval.as_millis() as u64, "Polling started");
    }

    /// Stop the polling loop. Idempotent.
    pub fn stop_polling(&self) {
        if let Some(poller) = self.poller().take() {
            poller.stop();
            info!("Polling stopped");
        }
    }

    pub fn is_polling(&self) -> bool {
        self.poller().as_ref().is_some_and(Poller::is_running)
    }

    pub fn poll_interval(&self) -> Duration {
        self.shared.settings().poll_interval
    }

    /// Change the poll interval, restarting a running loop with it
    pub fn set_poll_interval(&self, interval: Duration) {
        self.shared.settings().poll_interval = interval;

        let mut poller = self.poller();
        if let Some(running) = poller.take() {
            let on_change = running.callback();
            running.stop();
            *poller = Some(Poller::spawn(self.shared.clone(), interval, on_change));
            debug!(interval_ms = interval.as_millis() as u64, "Polling restarted");
        }
    }
}

impl<T: Transport> Drop for SyncClient<T> {
    fn drop(&mut self) {
        if let Some(poller) = self.poller().take() {
            poller.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{StoreTransport, TransportResult};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use tempfile::tempdir;
    use timetrack_api::{ConflictResponse, Project, SaveResponse};
    use timetrack_store::{DocumentStore, FileStore, StoreSettings};
    use timetrack_util::UserId;
    use tokio::sync::mpsc;

    /// Transport answering saves from a script and recording requests
    #[derive(Default)]
    struct ScriptedTransport {
        replies: Mutex<VecDeque<TransportResult<SaveReply>>>,
        requests: Mutex<Vec<SaveRequest>>,
        server_version: AtomicU64,
    }

    impl ScriptedTransport {
        fn with_replies(replies: Vec<TransportResult<SaveReply>>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                ..Self::default()
            }
        }

        fn expected_versions(&self) -> Vec<Option<u64>> {
            self.requests
                .lock()
                .unwrap()
                .iter()
                .map(|r| r.expected_version)
                .collect()
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn load(&self) -> TransportResult<VersionedDocument> {
            Ok(VersionedDocument::new(
                Document::starter(),
                self.server_version.load(Ordering::SeqCst),
            ))
        }

        async fn save(&self, request: &SaveRequest) -> TransportResult<SaveReply> {
            self.requests.lock().unwrap().push(request.clone());
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(SyncError::Transport("script exhausted".into())))
        }

        async fn probe_version(&self) -> TransportResult<u64> {
            Ok(self.server_version.load(Ordering::SeqCst))
        }

        async fn save_current_session(&self, _session: &Session) -> TransportResult<SaveResponse> {
            Err(SyncError::Unauthorized)
        }

        async fn clear_current_session(&self) -> TransportResult<SaveResponse> {
            Ok(SaveResponse::saved(9))
        }
    }

    fn conflict(version: u64) -> TransportResult<SaveReply> {
        Ok(SaveReply::Conflict(ConflictResponse::version_mismatch(
            version,
            Document::empty(),
        )))
    }

    fn saved(version: u64) -> TransportResult<SaveReply> {
        Ok(SaveReply::Saved(SaveResponse::saved(version)))
    }

    fn quick_settings() -> SyncSettings {
        SyncSettings {
            backoff_base: Duration::from_millis(1),
            backoff_cap: Duration::from_millis(5),
            poll_interval: Duration::from_millis(20),
            ..SyncSettings::default()
        }
    }

    fn store_transport(store: &Arc<FileStore>) -> StoreTransport {
        StoreTransport::new(store.clone(), UserId::parse("u1").unwrap())
    }

    #[test]
    fn test_settings_from_config_defaults() {
        let settings = SyncSettings::from(&timetrack_config::SyncTimings::default());
        assert_eq!(settings, SyncSettings::default());
    }

    #[test]
    fn test_backoff_delay() {
        let base = Duration::from_secs(1);
        let cap = Duration::from_secs(5);
        assert_eq!(backoff_delay(1, base, cap), Duration::from_secs(1));
        assert_eq!(backoff_delay(2, base, cap), Duration::from_secs(2));
        assert_eq!(backoff_delay(3, base, cap), Duration::from_secs(4));
        assert_eq!(backoff_delay(4, base, cap), Duration::from_secs(5));
        assert_eq!(backoff_delay(40, base, cap), Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_retry_converges_after_conflicts() {
        let transport = ScriptedTransport::with_replies(vec![conflict(4), conflict(5), saved(6)]);
        let client = SyncClient::new(transport, quick_settings());

        let result = client.save_data(&Document::starter()).await;
        assert_eq!(
            result,
            SyncResult::Success {
                version: 6,
                document: None
            }
        );
        assert_eq!(client.current_version(), 6);
        assert_eq!(client.status(), SyncStatus::Synced);
        assert_eq!(
            client.transport().expected_versions(),
            vec![Some(0), Some(4), Some(5)]
        );
    }

    #[tokio::test]
    async fn test_conflict_after_budget_is_surfaced() {
        let transport = ScriptedTransport::with_replies(vec![conflict(1), conflict(2), conflict(3), saved(4)]);
        let client = SyncClient::new(transport, quick_settings());

        let result = client.save_data(&Document::starter()).await;
        assert!(matches!(result, SyncResult::Conflict { version: 3, .. }));
        assert_eq!(client.current_version(), 3);
        assert_eq!(client.status(), SyncStatus::Conflict);
        assert_eq!(client.transport().expected_versions().len(), 3);
    }

    #[tokio::test]
    async fn test_surface_policy_does_not_retry() {
        let transport = ScriptedTransport::with_replies(vec![conflict(2), saved(3)]);
        let settings = SyncSettings {
            conflict_policy: ConflictPolicy::Surface,
            ..quick_settings()
        };
        let client = SyncClient::new(transport, settings);

        let result = client.save_data(&Document::starter()).await;
        assert!(matches!(result, SyncResult::Conflict { version: 2, .. }));
        assert_eq!(client.transport().expected_versions(), vec![Some(0)]);
    }

    #[tokio::test]
    async fn test_unauthorized_is_not_retried() {
        let transport = ScriptedTransport::with_replies(vec![Err(SyncError::Unauthorized), saved(1)]);
        let client = SyncClient::new(transport, quick_settings());

        assert_eq!(client.save_data(&Document::starter()).await, SyncResult::Unauthorized);
        assert_eq!(client.transport().expected_versions().len(), 1);
    }

    #[tokio::test]
    async fn test_transport_errors_retry_then_fail() {
        let transport = ScriptedTransport::with_replies(vec![
            Err(SyncError::Transport("connection refused".into())),
            saved(1),
        ]);
        let client = SyncClient::new(transport, quick_settings());
        assert!(client.save_data(&Document::starter()).await.is_success());

        let client = SyncClient::new(ScriptedTransport::default(), quick_settings());
        let result = client.save_data(&Document::starter()).await;
        assert_eq!(
            result,
            SyncResult::Error("Transport error: script exhausted".into())
        );
        assert_eq!(client.status(), SyncStatus::Error);
        assert_eq!(client.transport().expected_versions().len(), 3);
    }

    #[tokio::test]
    async fn test_check_for_updates_compares_versions() {
        let client = SyncClient::new(ScriptedTransport::default(), quick_settings());
        assert!(!client.check_for_updates().await);

        client.transport().server_version.store(2, Ordering::SeqCst);
        assert!(client.check_for_updates().await);

        assert!(client.load_data().await.is_success());
        assert_eq!(client.current_version(), 2);
        assert!(!client.check_for_updates().await);
    }

    #[tokio::test]
    async fn test_current_session_results() {
        let client = SyncClient::new(ScriptedTransport::default(), quick_settings());
        let running = Session::start("General", "", timetrack_util::now());

        assert_eq!(client.save_current_session(&running).await, SyncResult::Unauthorized);
        assert!(matches!(
            client.clear_current_session().await,
            SyncResult::Success { version: 9, .. }
        ));
        assert_eq!(client.current_version(), 0);
    }

    #[tokio::test]
    async fn test_status_channel_reports_progress() {
        let client = SyncClient::new(
            ScriptedTransport::with_replies(vec![conflict(1)]),
            SyncSettings {
                conflict_policy: ConflictPolicy::Surface,
                ..quick_settings()
            },
        );
        let mut status = client.subscribe_status();
        assert_eq!(*status.borrow_and_update(), SyncStatus::Synced);

        client.save_data(&Document::starter()).await;
        assert!(status.has_changed().unwrap());
        assert_eq!(*status.borrow_and_update(), SyncStatus::Conflict);
    }

    #[tokio::test]
    async fn test_two_clients_over_store() {
        let dir = tempdir().unwrap();
        let store = Arc::new(FileStore::open(dir.path(), StoreSettings::default()).unwrap());
        let a = SyncClient::new(store_transport(&store), quick_settings());
        let b = SyncClient::new(store_transport(&store), quick_settings());
        assert_ne!(a.client_id(), b.client_id());

        assert!(a.load_data().await.is_success());
        assert!(b.load_data().await.is_success());

        let mut doc_a = Document::starter();
        doc_a.upsert_project(Project::new("From A", "#111111"));
        assert!(matches!(a.save_data(&doc_a).await, SyncResult::Success { version: 1, .. }));

        assert!(b.check_for_updates().await);

        // b is stale; the overwrite policy retries against version 1
        let mut doc_b = Document::starter();
        doc_b.upsert_project(Project::new("From B", "#222222"));
        assert!(matches!(b.save_data(&doc_b).await, SyncResult::Success { version: 2, .. }));

        let stored = store.load(&UserId::parse("u1").unwrap()).await.unwrap();
        assert_eq!(stored.version, 2);
        assert_eq!(stored.document, doc_b);
        assert!(a.check_for_updates().await);
    }

    #[tokio::test]
    async fn test_polling_delivers_remote_changes() {
        let dir = tempdir().unwrap();
        let store = Arc::new(FileStore::open(dir.path(), StoreSettings::default()).unwrap());
        let watcher = SyncClient::new(store_transport(&store), quick_settings());
        let writer = SyncClient::new(store_transport(&store), quick_settings());

        let (tx, mut rx) = mpsc::unbounded_channel();
        watcher.start_polling(move |doc| {
            let _ = tx.send(doc);
        });
        assert!(watcher.is_polling());

        let mut doc = Document::starter();
        doc.upsert_project(Project::new("Remote", "#333333"));
        assert!(writer.save_data(&doc).await.is_success());

        let received = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("poll should pick up the change")
            .unwrap();
        assert_eq!(received.version, 1);
        assert_eq!(received.document, doc);
        assert_eq!(watcher.current_version(), 1);

        watcher.stop_polling();
        watcher.stop_polling();
        assert!(!watcher.is_polling());
    }

    #[tokio::test]
    async fn test_polling_start_is_idempotent_and_restartable() {
        let client = SyncClient::new(ScriptedTransport::default(), quick_settings());
        let calls = Arc::new(AtomicU64::new(0));

        let counter = calls.clone();
        client.start_polling(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        // second start is ignored; its callback never runs
        client.start_polling(|_| panic!("second loop must not start"));

        client.set_poll_interval(Duration::from_millis(5));
        assert_eq!(client.poll_interval(), Duration::from_millis(5));
        assert!(client.is_polling());

        client.transport().server_version.store(1, Ordering::SeqCst);
        tokio::time::timeout(Duration::from_secs(2), async {
            while calls.load(Ordering::SeqCst) == 0 {
                sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("restarted loop keeps the original callback");

        client.stop_polling();
        assert!(!client.is_polling());

        // setting the interval while stopped does not start a loop
        client.set_poll_interval(Duration::from_millis(50));
        assert!(!client.is_polling());
    }
}

//! Background probe-then-reload loop

use std::sync::Arc;
use std::time::Duration;
use timetrack_api::VersionedDocument;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::debug;

use crate::client::Shared;
use crate::{SyncResult, Transport};

pub(crate) type ChangeCallback = Arc<dyn Fn(VersionedDocument) + Send + Sync>;

/// Handle to one running polling task
pub(crate) struct Poller {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
    callback: ChangeCallback,
}

impl Poller {
    pub(crate) fn spawn<T: Transport>(
        shared: Arc<Shared<T>>,
        interval: Duration,
        callback: ChangeCallback,
    ) -> Self {
        let (shutdown, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(poll_loop(shared, interval, callback.clone(), shutdown_rx));
        Self {
            shutdown,
            task,
            callback,
        }
    }

    pub(crate) fn callback(&self) -> ChangeCallback {
        self.callback.clone()
    }

    pub(crate) fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Stop the task, also cancelling a probe or reload in flight
    pub(crate) fn stop(self) {
        let _ = self.shutdown.send(true);
        self.task.abort();
    }
}

async fn poll_loop<T: Transport>(
    shared: Arc<Shared<T>>,
    interval: Duration,
    callback: ChangeCallback,
    mut shutdown: watch::Receiver<bool>,
) {
    // First probe one interval after start
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                poll_once(&shared, &callback).await;
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    debug!("Polling task shutting down");
                    break;
                }
            }
        }
    }
}

async fn poll_once<T: Transport>(shared: &Shared<T>, callback: &ChangeCallback) {
    if !shared.check_for_updates().await {
        return;
    }

    match shared.load_data().await {
        SyncResult::Success {
            version,
            document: Some(document),
        } => {
            debug!(version, "Remote change picked up");
            callback(VersionedDocument::new(document, version));
        }
        other => debug!(result = ?other, "Reload after remote change failed"),
    }
}

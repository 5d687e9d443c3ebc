// Client session lifecycle
// One session per connection; the session owns its scan task and the
// receiving end of its notification source

use crate::notifier::config::ScanSettings;
use crate::notifier::protocol::{NotificationBatch, SessionId};
use crate::notifier::scanner::{ScannerHandle, SessionScanner};
use crate::notifier::store::TaskStore;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, warn};

/// Batches a scan may have waiting before further ones are dropped
const OUTBOX_CAPACITY: usize = 4;

/// A batch that could not be handed to the client
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("session {0} notification channel is closed")]
    ChannelClosed(SessionId),
    #[error("failed to write to session {session_id}: {source}")]
    Write {
        session_id: SessionId,
        #[source]
        source: std::io::Error,
    },
}

/// Connection lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connected,
    Disconnected,
}

/// Where a session's batches come from
#[derive(Debug)]
enum BatchSource {
    /// Private outbox fed by the session's own scanner
    Outbox(mpsc::Receiver<Arc<NotificationBatch>>),
    /// Subscription to the daemon-wide scanner
    Broadcast(broadcast::Receiver<Arc<NotificationBatch>>),
}

/// Server-side record of one live client connection
#[derive(Debug)]
pub struct ClientSession {
    id: SessionId,
    state: SessionState,
    connected_at: DateTime<Utc>,
    source: BatchSource,
    /// Present only for per-session scanning
    scanner: Option<ScannerHandle>,
}

impl ClientSession {
    /// Open a session that runs its own scan timer
    pub fn with_own_scanner(
        id: SessionId,
        store: Arc<dyn TaskStore>,
        settings: &ScanSettings,
    ) -> Self {
        let (outbox_tx, outbox_rx) = mpsc::channel(OUTBOX_CAPACITY);
        let scanner =
            SessionScanner::new(id, store, settings.interval, settings.window, outbox_tx).spawn();

        Self {
            id,
            state: SessionState::Connected,
            connected_at: Utc::now(),
            source: BatchSource::Outbox(outbox_rx),
            scanner: Some(scanner),
        }
    }

    /// Open a session fed by the shared scanner
    pub fn subscribed(id: SessionId, updates: broadcast::Receiver<Arc<NotificationBatch>>) -> Self {
        Self {
            id,
            state: SessionState::Connected,
            connected_at: Utc::now(),
            source: BatchSource::Broadcast(updates),
            scanner: None,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    /// Wait for the next batch to deliver.
    ///
    /// Returns `None` once the source is closed for good, or after
    /// disconnect. Lagging broadcast subscribers skip what they missed.
    pub async fn next_batch(&mut self) -> Option<Arc<NotificationBatch>> {
        if self.state == SessionState::Disconnected {
            return None;
        }

        match &mut self.source {
            BatchSource::Outbox(rx) => rx.recv().await,
            BatchSource::Broadcast(rx) => loop {
                match rx.recv().await {
                    Ok(batch) => return Some(batch),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(session_id = self.id, skipped, "session lagged, skipping batches");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            },
        }
    }

    /// Tear down: stop the scan timer and close the source.
    ///
    /// Idempotent. Nothing is buffered or replayed after this.
    pub fn disconnect(&mut self) {
        if self.state == SessionState::Disconnected {
            return;
        }
        self.state = SessionState::Disconnected;

        if let Some(scanner) = self.scanner.take() {
            scanner.cancel();
        }
        if let BatchSource::Outbox(rx) = &mut self.source {
            rx.close();
        }

        debug!(session_id = self.id, "session closed");
    }
}

impl Drop for ClientSession {
    fn drop(&mut self) {
        self.disconnect();
    }
}

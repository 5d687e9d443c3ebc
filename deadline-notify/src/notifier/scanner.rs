//! Deadline scanner.
//!
//! Periodically queries the task store for `Upcoming` tasks and selects the
//! ones whose deadline is inside the notification window. Two drivers share
//! the same scan cycle:
//!
//! - [`SessionScanner`] runs one timer per client session and pushes batches
//!   into that session's outbox.
//! - [`SharedScanner`] runs a single daemon-wide timer and broadcasts each
//!   batch to every subscribed session.
//!
//! Delivery is best effort. A batch that cannot be handed off is dropped,
//! never queued for later.

use crate::notifier::protocol::{NotificationBatch, NotificationCandidate, SessionId};
use crate::notifier::session::DeliveryError;
use crate::notifier::store::{StoreError, TaskStore};
use crate::notifier::task::{Task, TaskStatus};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// A scan cycle that could not query the task store
#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    #[error("task store query failed: {0}")]
    Query(#[from] StoreError),
    #[error("task store query panicked or was cancelled: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Select the tasks that warrant a deadline notification at `now`.
///
/// A task qualifies when it is `Upcoming` and `deadline - now <= window`.
/// Deadlines already in the past qualify too. Records whose end date cannot
/// be parsed are skipped. The result is ordered by deadline, then id.
pub fn select_candidates(
    tasks: Vec<Task>,
    now: DateTime<Utc>,
    window: chrono::Duration,
) -> Vec<NotificationCandidate> {
    let mut candidates: Vec<NotificationCandidate> = tasks
        .into_iter()
        .filter(|task| task.status == TaskStatus::Upcoming)
        .filter_map(|task| match task.deadline() {
            Ok(deadline) => Some(NotificationCandidate { task, deadline }),
            Err(err) => {
                warn!(task_id = %task.id, error = %err, "skipping task with unusable deadline");
                None
            }
        })
        .filter(|candidate| candidate.deadline - now <= window)
        .collect();

    candidates.sort_by(|a, b| {
        a.deadline
            .cmp(&b.deadline)
            .then_with(|| a.task.id.cmp(&b.task.id))
    });
    candidates
}

/// Run one scan cycle against the store.
///
/// Returns `Ok(None)` when nothing qualifies, so callers never push an
/// empty batch.
pub async fn scan_once(
    store: Arc<dyn TaskStore>,
    window: chrono::Duration,
    now: DateTime<Utc>,
) -> Result<Option<NotificationBatch>, ScanError> {
    let tasks =
        tokio::task::spawn_blocking(move || store.list_by_status(TaskStatus::Upcoming)).await??;
    let scanned = tasks.len();

    let candidates = select_candidates(tasks, now, window);
    debug!(scanned, selected = candidates.len(), "deadline scan complete");

    if candidates.is_empty() {
        return Ok(None);
    }

    Ok(Some(NotificationBatch {
        scanned_at: now,
        tasks: candidates,
    }))
}

/// Owned handle to a running scan task.
///
/// Dropping the handle cancels the task; a scan already in flight runs to
/// completion and then discards its batch.
#[derive(Debug)]
pub struct ScannerHandle {
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl ScannerHandle {
    fn new(cancel: CancellationToken, task: JoinHandle<()>) -> Self {
        Self {
            cancel,
            task: Some(task),
        }
    }

    /// Stop future scans
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Cancel and wait for the task to exit
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(err) = task.await {
                warn!(error = %err, "scan task ended abnormally");
            }
        }
    }
}

impl Drop for ScannerHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Periodic timer shared by both scanner drivers.
///
/// The first tick fires one full period after start.
fn scan_interval(period: Duration) -> tokio::time::Interval {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

/// Scan loop bound to one client session
pub struct SessionScanner {
    session_id: SessionId,
    store: Arc<dyn TaskStore>,
    period: Duration,
    window: chrono::Duration,
    outbox: mpsc::Sender<Arc<NotificationBatch>>,
    cancel: CancellationToken,
}

impl SessionScanner {
    pub fn new(
        session_id: SessionId,
        store: Arc<dyn TaskStore>,
        period: Duration,
        window: chrono::Duration,
        outbox: mpsc::Sender<Arc<NotificationBatch>>,
    ) -> Self {
        Self {
            session_id,
            store,
            period,
            window,
            outbox,
            cancel: CancellationToken::new(),
        }
    }

    /// Spawn the scan loop and return its owning handle
    pub fn spawn(self) -> ScannerHandle {
        let cancel = self.cancel.clone();
        let task = tokio::spawn(self.run());
        ScannerHandle::new(cancel, task)
    }

    /// Run until cancelled or until the outbox is closed
    pub async fn run(self) {
        let session_id = self.session_id;
        let mut ticker = scan_interval(self.period);
        debug!(session_id, period = ?self.period, "session scanner started");

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let batch = match scan_once(Arc::clone(&self.store), self.window, Utc::now()).await {
                Ok(Some(batch)) => batch,
                Ok(None) => continue,
                Err(err) => {
                    warn!(session_id, error = %err, "deadline scan failed, skipping cycle");
                    continue;
                }
            };

            // Disconnected while the scan was in flight
            if self.cancel.is_cancelled() {
                debug!(session_id, "session gone, dropping batch");
                break;
            }

            match self.outbox.try_send(Arc::new(batch)) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(session_id, "client not draining notifications, dropping batch");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    let err = DeliveryError::ChannelClosed(session_id);
                    warn!(error = %err, "stopping scanner");
                    break;
                }
            }
        }

        debug!(session_id, "session scanner stopped");
    }
}

/// One daemon-wide scan loop fanned out to all sessions
pub struct SharedScanner {
    store: Arc<dyn TaskStore>,
    period: Duration,
    window: chrono::Duration,
    updates_tx: broadcast::Sender<Arc<NotificationBatch>>,
    cancel: CancellationToken,
}

impl SharedScanner {
    pub fn new(
        store: Arc<dyn TaskStore>,
        period: Duration,
        window: chrono::Duration,
        updates_tx: broadcast::Sender<Arc<NotificationBatch>>,
    ) -> Self {
        Self {
            store,
            period,
            window,
            updates_tx,
            cancel: CancellationToken::new(),
        }
    }

    pub fn spawn(self) -> ScannerHandle {
        let cancel = self.cancel.clone();
        let task = tokio::spawn(self.run());
        ScannerHandle::new(cancel, task)
    }

    pub async fn run(self) {
        let mut ticker = scan_interval(self.period);
        info!(period = ?self.period, "shared deadline scanner started");

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            // Nobody listening: skip the query entirely
            if self.updates_tx.receiver_count() == 0 {
                continue;
            }

            match scan_once(Arc::clone(&self.store), self.window, Utc::now()).await {
                Ok(Some(batch)) => {
                    let sessions = self.updates_tx.receiver_count();
                    // Send only fails when every receiver has gone away
                    if self.updates_tx.send(Arc::new(batch)).is_err() {
                        debug!("all sessions disconnected during scan, batch dropped");
                    } else {
                        debug!(sessions, "broadcast deadline batch");
                    }
                }
                Ok(None) => {}
                Err(err) => warn!(error = %err, "deadline scan failed, skipping cycle"),
            }
        }

        info!("shared deadline scanner stopped");
    }
}

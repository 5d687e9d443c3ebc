//! Client-side notification state.
//!
//! Each pushed batch is a complete recomputation of what is near its
//! deadline, so receiving one replaces the whole set. `mark_as_read` and
//! `snooze` act on this local copy only; the daemon never hears about them
//! and a read entry comes back with the next batch if it still qualifies.

use crate::notifier::protocol::{NotificationBatch, NotificationCandidate};
use crate::notifier::task::TaskId;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tracing::info;

/// What changed when a batch replaced the local set
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchDiff {
    /// Ids present in the new batch but not before
    pub added: Vec<TaskId>,
    /// Ids dropped because the new batch no longer contains them
    pub removed: Vec<TaskId>,
}

impl BatchDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// Currently undismissed notifications, keyed by task id
#[derive(Debug, Clone, Default)]
pub struct ClientNotificationSet {
    entries: HashMap<TaskId, NotificationCandidate>,
    last_scan: Option<DateTime<Utc>>,
}

impl ClientNotificationSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the set with the batch contents
    pub fn apply_batch(&mut self, batch: &NotificationBatch) -> BatchDiff {
        let incoming: HashMap<TaskId, NotificationCandidate> = batch
            .tasks
            .iter()
            .map(|candidate| (candidate.task.id.clone(), candidate.clone()))
            .collect();

        let mut added: Vec<TaskId> = incoming
            .keys()
            .filter(|id| !self.entries.contains_key(*id))
            .cloned()
            .collect();
        let mut removed: Vec<TaskId> = self
            .entries
            .keys()
            .filter(|id| !incoming.contains_key(*id))
            .cloned()
            .collect();
        added.sort();
        removed.sort();

        self.entries = incoming;
        self.last_scan = Some(batch.scanned_at);

        BatchDiff { added, removed }
    }

    /// Dismiss one entry locally. Returns whether it was present.
    pub fn mark_as_read(&mut self, id: &TaskId) -> bool {
        self.entries.remove(id).is_some()
    }

    /// Record a snooze request.
    ///
    /// The entry stays where it is; snoozing only logs the request.
    pub fn snooze(&self, id: &TaskId) -> bool {
        let present = self.entries.contains_key(id);
        info!(task_id = %id, present, "snoozed notification");
        present
    }

    pub fn get(&self, id: &TaskId) -> Option<&NotificationCandidate> {
        self.entries.get(id)
    }

    pub fn contains(&self, id: &TaskId) -> bool {
        self.entries.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// When the batch currently shown was computed
    pub fn last_scan(&self) -> Option<DateTime<Utc>> {
        self.last_scan
    }

    /// Entries in render order: deadline ascending, then id
    pub fn entries(&self) -> Vec<&NotificationCandidate> {
        let mut entries: Vec<&NotificationCandidate> = self.entries.values().collect();
        entries.sort_by(|a, b| {
            a.deadline
                .cmp(&b.deadline)
                .then_with(|| a.task.id.cmp(&b.task.id))
        });
        entries
    }
}

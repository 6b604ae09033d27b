//! Observable queue state for the presentation layer.
//!
//! The notifier keeps two channels: a `watch` with the latest aggregate
//! [`QueueStatus`] and a `broadcast` of per-record [`RecordEvent`]s.
//! Subscribers never touch the store.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{broadcast, watch};
use tracing::trace;

use crate::error::Result;
use crate::storage::{QueueCounts, RecordStore};
use crate::submission::{FailureKind, SubmissionRecord, SyncStatus};

/// Capacity of the per-record event channel.
const EVENT_CAPACITY: usize = 256;

/// A failed record as shown to the user.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailureSummary {
    /// The record's local id.
    pub local_id: String,
    /// Herb named in the submission.
    pub herb_name: String,
    /// Whether it will be retried automatically.
    pub failure_kind: Option<FailureKind>,
    /// Last error message.
    pub last_error: Option<String>,
    /// Attempts made so far.
    pub attempt_count: u32,
    /// Next automatic retry, if any.
    pub next_retry_at: Option<DateTime<Utc>>,
}

impl From<&SubmissionRecord> for FailureSummary {
    fn from(record: &SubmissionRecord) -> Self {
        Self {
            local_id: record.local_id.clone(),
            herb_name: record.details.herb_name.clone(),
            failure_kind: record.failure_kind,
            last_error: record.last_error.clone(),
            attempt_count: record.attempt_count,
            next_retry_at: record.next_retry_at,
        }
    }
}

/// Aggregate view of the queue.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueueStatus {
    /// Records waiting for a first attempt.
    pub pending: u64,
    /// Records being uploaded.
    pub syncing: u64,
    /// Records whose last attempt failed.
    pub failed: u64,
    /// Records accepted by the service.
    pub synced: u64,
    /// Start of the most recent sync pass.
    pub last_sync_attempt_at: Option<DateTime<Utc>>,
    /// Failed records, oldest first.
    pub failures: Vec<FailureSummary>,
    /// Whether the service was last seen reachable.
    pub online: bool,
}

impl QueueStatus {
    /// Records not yet accepted by the service.
    #[must_use]
    pub fn unsynced(&self) -> u64 {
        self.pending + self.syncing + self.failed
    }

    fn apply_counts(&mut self, counts: QueueCounts) {
        self.pending = counts.pending;
        self.syncing = counts.syncing;
        self.failed = counts.failed;
        self.synced = counts.synced;
    }
}

/// A single record's status change.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordEvent {
    /// The record's local id.
    pub local_id: String,
    /// Status after the change.
    pub status: SyncStatus,
    /// Remote id, once synced.
    pub remote_id: Option<String>,
    /// Error recorded with a failure.
    pub error: Option<String>,
    /// When the event was published.
    pub at: DateTime<Utc>,
}

impl RecordEvent {
    /// Event describing the record's current state.
    #[must_use]
    pub fn for_record(record: &SubmissionRecord) -> Self {
        Self {
            local_id: record.local_id.clone(),
            status: record.status,
            remote_id: record.remote_id.clone(),
            error: record.last_error.clone(),
            at: Utc::now(),
        }
    }
}

/// Publishes queue status and record events.
#[derive(Debug, Clone)]
pub struct StatusNotifier {
    status: Arc<watch::Sender<QueueStatus>>,
    events: broadcast::Sender<RecordEvent>,
}

impl Default for StatusNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusNotifier {
    /// Create a notifier with an empty status.
    #[must_use]
    pub fn new() -> Self {
        let (status, _) = watch::channel(QueueStatus::default());
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            status: Arc::new(status),
            events,
        }
    }

    /// Latest published status.
    #[must_use]
    pub fn current(&self) -> QueueStatus {
        self.status.borrow().clone()
    }

    /// Receiver for aggregate status updates.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<QueueStatus> {
        self.status.subscribe()
    }

    /// Receiver for per-record events.
    #[must_use]
    pub fn subscribe_events(&self) -> broadcast::Receiver<RecordEvent> {
        self.events.subscribe()
    }

    /// Recompute the aggregate status from the store and publish it.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn refresh(&self, store: &RecordStore) -> Result<QueueStatus> {
        let counts = store.counts()?;
        let last_sync_attempt_at = store.last_sync_attempt_at()?;
        let failures = store
            .list_by_status(SyncStatus::Failed)?
            .iter()
            .map(FailureSummary::from)
            .collect();

        let mut next = self.current();
        next.apply_counts(counts);
        next.last_sync_attempt_at = last_sync_attempt_at;
        next.failures = failures;

        self.status.send_replace(next.clone());
        trace!(?counts, "Published queue status");
        Ok(next)
    }

    /// Publish a per-record event.
    pub fn record_transition(&self, record: &SubmissionRecord) {
        // No subscribers is fine.
        let _ = self.events.send(RecordEvent::for_record(record));
    }

    /// Publish a record's transition and the resulting aggregate status.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn observe(&self, store: &RecordStore, record: &SubmissionRecord) -> Result<()> {
        self.record_transition(record);
        self.refresh(store)?;
        Ok(())
    }

    /// Publish a connectivity change.
    pub fn set_online(&self, online: bool) {
        self.status.send_if_modified(|status| {
            let changed = status.online != online;
            status.online = online;
            changed
        });
    }
}

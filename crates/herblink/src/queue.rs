//! User-facing operations on the submission queue.
//!
//! Every submission is persisted before anything else happens. Online
//! submissions also nudge the sync engine so they go out right away when
//! the network allows; offline ones wait for the next pass.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Notify;
use tracing::{debug, info};

use crate::builder::{RawSubmission, SubmissionBuilder};
use crate::error::Result;
use crate::notifier::StatusNotifier;
use crate::storage::RecordStore;
use crate::submission::{SubmissionRecord, SubmissionType};

/// Result of [`SubmissionQueue::submit`].
#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    /// A new record was stored.
    Queued(SubmissionRecord),
    /// An unsynced record with identical harvest details already exists;
    /// nothing was stored.
    ///
    /// Two separate harvests with exactly the same fields are folded into
    /// one while the first is still unsynced. Once it has synced, the same
    /// fields make a new record. Change any field (the location, say) to
    /// record a second harvest right away.
    Duplicate(SubmissionRecord),
}

impl SubmitOutcome {
    /// The stored record.
    #[must_use]
    pub fn record(&self) -> &SubmissionRecord {
        match self {
            Self::Queued(record) | Self::Duplicate(record) => record,
        }
    }
}

/// Builder, store and notifier wired together.
#[derive(Debug, Clone)]
pub struct SubmissionQueue {
    store: Arc<RecordStore>,
    notifier: StatusNotifier,
    builder: SubmissionBuilder,
    trigger: Arc<Notify>,
}

impl SubmissionQueue {
    /// Create a queue over `store`. `trigger` wakes the sync engine.
    #[must_use]
    pub fn new(store: Arc<RecordStore>, notifier: StatusNotifier, trigger: Arc<Notify>) -> Self {
        Self {
            store,
            notifier,
            builder: SubmissionBuilder::new(),
            trigger,
        }
    }

    /// The underlying store.
    #[must_use]
    pub fn store(&self) -> &Arc<RecordStore> {
        &self.store
    }

    /// The status notifier.
    #[must_use]
    pub fn notifier(&self) -> &StatusNotifier {
        &self.notifier
    }

    /// Validate and enqueue a form submission.
    ///
    /// # Errors
    ///
    /// Returns a validation error for bad input, or a storage error if the
    /// record could not be persisted. In both cases nothing was stored.
    pub fn submit(&self, raw: &RawSubmission) -> Result<SubmitOutcome> {
        self.submit_at(raw, Utc::now())
    }

    /// [`submit`](Self::submit) against an explicit clock reading.
    ///
    /// # Errors
    ///
    /// See [`submit`](Self::submit).
    pub fn submit_at(&self, raw: &RawSubmission, now: DateTime<Utc>) -> Result<SubmitOutcome> {
        let record = self.builder.build_at(raw, now)?;

        if let Some(existing) = self.store.insert_unique(&record)? {
            info!(
                local_id = %existing.local_id,
                "Identical submission already queued; not storing again"
            );
            return Ok(SubmitOutcome::Duplicate(existing));
        }

        self.notifier.observe(&self.store, &record)?;
        info!(
            local_id = %record.local_id,
            herb = %record.details.herb_name,
            submission_type = %record.submission_type,
            "Submission queued"
        );

        if record.submission_type == SubmissionType::Online {
            debug!("Requesting immediate sync pass");
            self.trigger.notify_one();
        }
        Ok(SubmitOutcome::Queued(record))
    }

    /// Make a failed record eligible for upload now.
    ///
    /// Works for rejected records too, which are otherwise never retried.
    ///
    /// # Errors
    ///
    /// Returns an error if the record does not exist or is not failed.
    pub fn retry(&self, local_id: &str) -> Result<SubmissionRecord> {
        let record = self.store.schedule_retry(local_id, Utc::now())?;
        self.notifier.refresh(&self.store)?;
        info!(local_id, "Submission scheduled for retry");
        self.trigger.notify_one();
        Ok(record)
    }

    /// Replace a failed record's harvest details and retry it.
    ///
    /// The record keeps its `local_id`, `created_at` and submission type.
    ///
    /// # Errors
    ///
    /// Returns a validation error for bad input, or an error if the record
    /// does not exist or is not failed.
    pub fn amend(&self, local_id: &str, raw: &RawSubmission) -> Result<SubmissionRecord> {
        let now = Utc::now();
        let details = SubmissionBuilder::validate_details(raw, now)?;
        let record = self.store.amend_failed(local_id, &details, now)?;
        self.notifier.refresh(&self.store)?;
        info!(local_id, "Submission amended");
        self.trigger.notify_one();
        Ok(record)
    }

    /// Delete every synced record.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be updated.
    pub fn purge_synced(&self) -> Result<usize> {
        let removed = self.store.purge_synced()?;
        self.notifier.refresh(&self.store)?;
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::tests::tulsi_raw;
    use crate::builder::Field;
    use crate::error::Error;
    use crate::submission::{FailureKind, SyncStatus};
    use std::time::Duration;

    fn create_test_queue() -> SubmissionQueue {
        let store = Arc::new(RecordStore::open_in_memory().unwrap());
        SubmissionQueue::new(store, StatusNotifier::new(), Arc::new(Notify::new()))
    }

    fn fail(queue: &SubmissionQueue, local_id: &str, kind: FailureKind) {
        queue.store().begin_attempt(local_id, Utc::now()).unwrap();
        queue
            .store()
            .mark_failed(local_id, kind, "422: farm: unknown farm", None)
            .unwrap();
    }

    #[test]
    fn test_submit_queues_pending_record() {
        let queue = create_test_queue();

        let outcome = queue.submit(&tulsi_raw()).unwrap();
        let SubmitOutcome::Queued(record) = outcome else {
            panic!("expected a queued record");
        };

        let stored = queue.store().get(&record.local_id).unwrap().unwrap();
        assert_eq!(stored.status, SyncStatus::Pending);
        assert_eq!(stored.details.herb_name, "Tulsi");
        assert_eq!(queue.notifier().current().pending, 1);
    }

    #[test]
    fn test_invalid_submission_is_not_stored() {
        let queue = create_test_queue();
        let mut raw = tulsi_raw();
        raw.farm = "   ".to_string();

        let err = queue.submit(&raw).unwrap_err();
        let Error::Validation(validation) = err else {
            panic!("expected a validation error");
        };
        assert_eq!(validation.field, Field::Farm);
        assert_eq!(queue.store().counts().unwrap().total(), 0);
    }

    #[test]
    fn test_double_submit_is_detected() {
        let queue = create_test_queue();

        let first = queue.submit(&tulsi_raw()).unwrap();
        let second = queue.submit(&tulsi_raw()).unwrap();

        assert!(matches!(second, SubmitOutcome::Duplicate(_)));
        assert_eq!(second.record().local_id, first.record().local_id);
        assert_eq!(queue.store().counts().unwrap().total(), 1);
    }

    #[test]
    fn test_concurrent_double_submit_stores_once() {
        let queue = create_test_queue();

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let queue = queue.clone();
                std::thread::spawn(move || queue.submit(&tulsi_raw()).unwrap())
            })
            .collect();
        let queued = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|outcome| matches!(outcome, SubmitOutcome::Queued(_)))
            .count();

        assert_eq!(queued, 1);
        assert_eq!(queue.store().counts().unwrap().total(), 1);
    }

    #[test]
    fn test_resubmit_after_sync_is_new_record() {
        let queue = create_test_queue();
        let first = queue.submit(&tulsi_raw()).unwrap();
        let local_id = &first.record().local_id;
        queue.store().begin_attempt(local_id, Utc::now()).unwrap();
        queue.store().mark_synced(local_id, "remote-1").unwrap();

        let second = queue.submit(&tulsi_raw()).unwrap();
        assert!(matches!(second, SubmitOutcome::Queued(_)));
        assert_eq!(queue.store().counts().unwrap().total(), 2);
    }

    #[tokio::test]
    async fn test_online_submission_triggers_sync() {
        let queue = create_test_queue();
        let mut raw = tulsi_raw();
        raw.submission_type = SubmissionType::Online;

        queue.submit(&raw).unwrap();

        tokio::time::timeout(Duration::from_secs(1), queue.trigger.notified())
            .await
            .expect("online submission did not trigger a pass");
    }

    #[tokio::test]
    async fn test_offline_submission_does_not_trigger_sync() {
        let queue = create_test_queue();

        queue.submit(&tulsi_raw()).unwrap();

        let triggered =
            tokio::time::timeout(Duration::from_millis(50), queue.trigger.notified()).await;
        assert!(triggered.is_err());
    }

    #[test]
    fn test_retry_rejected_record() {
        let queue = create_test_queue();
        let outcome = queue.submit(&tulsi_raw()).unwrap();
        let local_id = outcome.record().local_id.clone();
        fail(&queue, &local_id, FailureKind::Rejected);

        let retried = queue.retry(&local_id).unwrap();
        assert!(retried.is_eligible(Utc::now()));
        assert_eq!(queue.store().list_eligible(Utc::now()).unwrap().len(), 1);
    }

    #[test]
    fn test_retry_requires_failed_record() {
        let queue = create_test_queue();
        let outcome = queue.submit(&tulsi_raw()).unwrap();

        assert!(matches!(
            queue.retry(&outcome.record().local_id).unwrap_err(),
            Error::InvalidTransition { .. }
        ));
        assert!(queue.retry("missing").unwrap_err().is_not_found());
    }

    #[test]
    fn test_amend_corrects_rejected_record() {
        let queue = create_test_queue();
        let outcome = queue.submit(&tulsi_raw()).unwrap();
        let original = outcome.record().clone();
        fail(&queue, &original.local_id, FailureKind::Rejected);

        let mut corrected = tulsi_raw();
        corrected.farm = "Organic Paradise".to_string();
        let amended = queue.amend(&original.local_id, &corrected).unwrap();

        assert_eq!(amended.details.farm, "Organic Paradise");
        assert_eq!(amended.created_at, original.created_at);
        assert_ne!(amended.payload_hash, original.payload_hash);
        assert!(amended.is_eligible(Utc::now()));
    }

    #[test]
    fn test_amend_validates_input() {
        let queue = create_test_queue();
        let outcome = queue.submit(&tulsi_raw()).unwrap();
        let local_id = outcome.record().local_id.clone();
        fail(&queue, &local_id, FailureKind::Rejected);

        let mut bad = tulsi_raw();
        bad.quantity_kg = "-3".to_string();
        assert!(queue.amend(&local_id, &bad).unwrap_err().is_validation_error());
        assert_eq!(
            queue.store().get(&local_id).unwrap().unwrap().details.quantity_kg,
            12.5
        );
    }

    #[test]
    fn test_purge_synced() {
        let queue = create_test_queue();
        let outcome = queue.submit(&tulsi_raw()).unwrap();
        let local_id = &outcome.record().local_id;
        queue.store().begin_attempt(local_id, Utc::now()).unwrap();
        queue.store().mark_synced(local_id, "remote-1").unwrap();

        assert_eq!(queue.purge_synced().unwrap(), 1);
        assert_eq!(queue.notifier().current().synced, 0);
    }
}

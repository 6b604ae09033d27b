//! The sync engine.
//!
//! A sync pass uploads every eligible record in FIFO order through a
//! bounded pool of tasks. Each upload first takes the in-process slot for
//! its `local_id`, then claims the record in the store; only the holder of
//! both may talk to the remote service, so a record never has two uploads
//! in flight. Cancelling a pass stops new uploads from starting; uploads
//! already on the wire finish and are recorded.

pub mod backoff;

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::{watch, Notify, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::connectivity::Connectivity;
use crate::error::{Error, Result};
use crate::notifier::StatusNotifier;
use crate::remote::{RemoteSubmitter, SubmitError};
use crate::storage::RecordStore;
use crate::submission::FailureKind;

pub use backoff::BackoffPolicy;

/// Slack on top of the request timeout before an attempt counts as abandoned.
const STALE_ATTEMPT_MARGIN: Duration = Duration::from_secs(30);

/// Tunables for the sync engine.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncSettings {
    /// Maximum concurrent uploads per pass.
    pub max_in_flight: usize,
    /// Retry delays for transient failures.
    pub backoff: BackoffPolicy,
    /// Transient failures before a record stops retrying; 0 is unlimited.
    pub max_attempts: u32,
    /// Delete records once they are synced.
    pub remove_synced: bool,
    /// How often the daemon loop runs a pass while online.
    pub poll_interval: Duration,
    /// Age after which a `syncing` record is presumed abandoned.
    pub stale_attempt_after: Duration,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl SyncSettings {
    /// Settings from the loaded configuration.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_in_flight: config.sync.max_in_flight.max(1),
            backoff: BackoffPolicy::new(
                Duration::from_millis(config.sync.backoff_base_ms),
                Duration::from_millis(config.sync.backoff_cap_ms),
                config.sync.backoff_jitter,
            ),
            max_attempts: config.sync.max_attempts,
            remove_synced: config.storage.remove_synced,
            poll_interval: Duration::from_secs(config.sync.poll_interval_secs),
            stale_attempt_after: Duration::from_secs(config.remote.request_timeout_secs)
                + STALE_ATTEMPT_MARGIN,
        }
    }
}

/// Outcome counts of one sync pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    /// Uploads started.
    pub attempted: usize,
    /// Records accepted by the service.
    pub synced: usize,
    /// Records refused by the service.
    pub rejected: usize,
    /// Records that failed transiently.
    pub transient: usize,
    /// Records already being uploaded elsewhere or no longer eligible.
    pub skipped: usize,
    /// Records not started because the pass was cancelled.
    pub cancelled: usize,
    /// Uploads whose outcome could not be recorded.
    pub errors: usize,
}

impl SyncReport {
    fn tally(&mut self, outcome: AttemptOutcome) {
        match outcome {
            AttemptOutcome::Skipped => self.skipped += 1,
            AttemptOutcome::Synced => {
                self.attempted += 1;
                self.synced += 1;
            }
            AttemptOutcome::Failed(FailureKind::Rejected) => {
                self.attempted += 1;
                self.rejected += 1;
            }
            AttemptOutcome::Failed(FailureKind::Transient) => {
                self.attempted += 1;
                self.transient += 1;
            }
        }
    }
}

/// What happened to one record in a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AttemptOutcome {
    Skipped,
    Synced,
    Failed(FailureKind),
}

struct Inner {
    store: Arc<RecordStore>,
    remote: Arc<dyn RemoteSubmitter>,
    notifier: StatusNotifier,
    settings: SyncSettings,
    in_flight: Mutex<HashSet<String>>,
}

impl Inner {
    /// Run a store operation on the blocking pool.
    ///
    /// Commits fsync before returning, which must not stall a runtime worker.
    async fn with_store<T, F>(&self, op: F) -> Result<T>
    where
        F: FnOnce(&RecordStore, &StatusNotifier) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let store = Arc::clone(&self.store);
        let notifier = self.notifier.clone();
        tokio::task::spawn_blocking(move || op(&store, &notifier))
            .await
            .map_err(|e| Error::internal(format!("store task failed: {e}")))?
    }
}

/// Marks a `local_id` as being uploaded by this process until dropped.
struct InFlightGuard {
    inner: Arc<Inner>,
    local_id: String,
}

impl InFlightGuard {
    fn claim(inner: &Arc<Inner>, local_id: &str) -> Option<Self> {
        let mut in_flight = inner
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        in_flight.insert(local_id.to_string()).then(|| Self {
            inner: Arc::clone(inner),
            local_id: local_id.to_string(),
        })
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.inner
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.local_id);
    }
}

/// Reconciles the record store with the remote service.
///
/// Cloning is cheap; clones share the in-flight set.
#[derive(Clone)]
pub struct SyncEngine {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("settings", &self.inner.settings)
            .finish_non_exhaustive()
    }
}

impl SyncEngine {
    /// Create an engine.
    #[must_use]
    pub fn new(
        store: Arc<RecordStore>,
        remote: Arc<dyn RemoteSubmitter>,
        notifier: StatusNotifier,
        settings: SyncSettings,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                remote,
                notifier,
                settings,
                in_flight: Mutex::new(HashSet::new()),
            }),
        }
    }

    /// The engine's settings.
    #[must_use]
    pub fn settings(&self) -> &SyncSettings {
        &self.inner.settings
    }

    /// Fail records left mid-upload by a previous run and publish the status.
    ///
    /// Attempts younger than [`SyncSettings::stale_attempt_after`] are left
    /// alone: another process may still be waiting on them.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be updated.
    pub fn recover(&self) -> Result<usize> {
        let now = Utc::now();
        let stale_after = chrono::Duration::from_std(self.inner.settings.stale_attempt_after)
            .map_err(|e| Error::internal(format!("stale attempt age out of range: {e}")))?;
        let recovered = self
            .inner
            .store
            .recover_interrupted(now - stale_after, now)?;
        self.inner.notifier.refresh(&self.inner.store)?;
        Ok(recovered)
    }

    /// Upload every eligible record once.
    ///
    /// # Errors
    ///
    /// Returns an error if the eligible records cannot be read. Failures
    /// recording a single upload are logged and counted in
    /// [`SyncReport::errors`].
    pub async fn run_sync_pass(&self, cancel: &CancellationToken) -> Result<SyncReport> {
        let inner = &self.inner;
        let now = Utc::now();
        inner.store.set_last_sync_attempt_at(now)?;
        let eligible = inner.store.list_eligible(now)?;
        inner.notifier.refresh(&inner.store)?;

        let mut report = SyncReport::default();
        if eligible.is_empty() {
            debug!("Sync pass found nothing to upload");
            return Ok(report);
        }
        debug!("Sync pass starting with {} eligible records", eligible.len());

        let semaphore = Arc::new(Semaphore::new(inner.settings.max_in_flight));
        let mut tasks = JoinSet::new();
        let total = eligible.len();

        for (idx, record) in eligible.into_iter().enumerate() {
            let permit = tokio::select! {
                biased;
                () = cancel.cancelled() => None,
                permit = Arc::clone(&semaphore).acquire_owned() => permit.ok(),
            };
            let Some(permit) = permit.filter(|_| !cancel.is_cancelled()) else {
                report.cancelled = total - idx;
                break;
            };

            let Some(guard) = InFlightGuard::claim(inner, &record.local_id) else {
                debug!(local_id = %record.local_id, "Upload already in flight; skipping");
                report.skipped += 1;
                continue;
            };

            let engine = self.clone();
            tasks.spawn(async move {
                let _permit = permit;
                let result = engine.sync_one(&guard.local_id).await;
                drop(guard);
                result
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(outcome)) => report.tally(outcome),
                Ok(Err(e)) => {
                    warn!("Failed to record upload outcome: {}", e);
                    report.errors += 1;
                }
                Err(e) => {
                    warn!("Upload task ended abnormally: {}", e);
                    report.errors += 1;
                }
            }
        }

        inner.notifier.refresh(&inner.store)?;
        info!(
            attempted = report.attempted,
            synced = report.synced,
            rejected = report.rejected,
            transient = report.transient,
            cancelled = report.cancelled,
            "Sync pass finished"
        );
        Ok(report)
    }

    /// Upload one record the caller holds the in-flight slot for.
    async fn sync_one(&self, local_id: &str) -> Result<AttemptOutcome> {
        let inner = &self.inner;
        let id = local_id.to_string();
        let claimed = inner
            .with_store(move |store, notifier| {
                let record = store.begin_attempt(&id, Utc::now())?;
                if let Some(record) = &record {
                    notifier.observe(store, record)?;
                }
                Ok(record)
            })
            .await?;
        let Some(record) = claimed else {
            return Ok(AttemptOutcome::Skipped);
        };
        debug!(local_id, attempt = record.attempt_count, "Uploading submission");

        let result = inner.remote.submit(&record.payload(), &record.local_id).await;

        let (kind, reason) = match result {
            Ok(ack) => {
                let id = local_id.to_string();
                let remote_id = ack.remote_id.clone();
                let remove_synced = inner.settings.remove_synced;
                let stored = inner
                    .with_store(move |store, notifier| {
                        let synced = store.mark_synced(&id, &remote_id)?;
                        notifier.observe(store, &synced)?;
                        if remove_synced && store.remove(&id)? {
                            notifier.refresh(store)?;
                        }
                        Ok(())
                    })
                    .await;
                match stored {
                    Ok(()) => {
                        info!(local_id, remote_id = %ack.remote_id, "Submission synced");
                        return Ok(AttemptOutcome::Synced);
                    }
                    Err(Error::InvariantViolation { message, .. }) => {
                        (FailureKind::Rejected, message)
                    }
                    Err(e) => return Err(e),
                }
            }
            Err(SubmitError::Rejected(reason)) => (FailureKind::Rejected, reason),
            Err(SubmitError::Transient(reason)) => (FailureKind::Transient, reason),
        };

        let next_retry_at = match kind {
            FailureKind::Rejected => None,
            FailureKind::Transient => self.next_retry_at(record.attempt_count)?,
        };
        let id = local_id.to_string();
        let error = reason.clone();
        let failed = inner
            .with_store(move |store, notifier| {
                let failed = store.mark_failed(&id, kind, &error, next_retry_at)?;
                notifier.observe(store, &failed)?;
                Ok(failed)
            })
            .await?;
        match kind {
            FailureKind::Rejected => warn!(local_id, "Submission rejected: {}", reason),
            FailureKind::Transient => warn!(
                local_id,
                attempt = failed.attempt_count,
                retry_at = ?failed.next_retry_at,
                "Upload failed: {}",
                reason
            ),
        }
        Ok(AttemptOutcome::Failed(kind))
    }

    /// When a transiently failed record becomes eligible again, if ever.
    fn next_retry_at(&self, attempt_count: u32) -> Result<Option<chrono::DateTime<Utc>>> {
        let settings = &self.inner.settings;
        if settings.max_attempts > 0 && attempt_count >= settings.max_attempts {
            return Ok(None);
        }
        let delay = chrono::Duration::from_std(settings.backoff.delay(attempt_count))
            .map_err(|e| Error::internal(format!("backoff delay out of range: {e}")))?;
        Ok(Some(Utc::now() + delay))
    }

    /// Run passes until `shutdown` fires.
    ///
    /// Each pass is preceded by [`recover`](Self::recover), so uploads
    /// abandoned by a crashed process are picked up once they go stale.
    ///
    /// A pass runs whenever connectivity comes up, on every poll tick while
    /// online, and when `trigger` is notified while online. Losing
    /// connectivity cancels the pass in progress.
    pub async fn run(
        &self,
        connectivity: Connectivity,
        trigger: Arc<Notify>,
        shutdown: CancellationToken,
    ) {
        let mut online_rx = connectivity.subscribe();
        let mut ticker = tokio::time::interval(self.inner.settings.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The loop's first iteration is the startup pass; skip the immediate tick.
        ticker.reset();
        info!("Sync engine started");

        loop {
            let online = *online_rx.borrow_and_update();
            self.inner.notifier.set_online(online);
            if online && !shutdown.is_cancelled() {
                if let Err(e) = self.recover() {
                    warn!("Failed to recover interrupted uploads: {}", e);
                }
                self.pass_while_online(&mut online_rx, &shutdown).await;
            }

            tokio::select! {
                () = shutdown.cancelled() => break,
                changed = online_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = ticker.tick() => {}
                () = trigger.notified() => {}
            }
        }
        info!("Sync engine stopped");
    }

    async fn pass_while_online(
        &self,
        online_rx: &mut watch::Receiver<bool>,
        shutdown: &CancellationToken,
    ) {
        let pass_cancel = shutdown.child_token();
        let pass = self.run_sync_pass(&pass_cancel);
        tokio::pin!(pass);
        let mut watching = true;

        loop {
            tokio::select! {
                result = &mut pass => {
                    if let Err(e) = result {
                        warn!("Sync pass failed: {}", e);
                    }
                    return;
                }
                changed = online_rx.changed(), if watching => {
                    if changed.is_err() || !*online_rx.borrow_and_update() {
                        debug!("Connectivity lost; cancelling sync pass");
                        pass_cancel.cancel();
                        watching = false;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::tests::tulsi_raw;
    use crate::builder::SubmissionBuilder;
    use crate::remote::RemoteAck;
    use crate::submission::tests::tulsi;
    use crate::submission::{SubmissionPayload, SubmissionRecord, SubmissionType, SyncStatus};
    use async_trait::async_trait;
    use std::collections::{HashMap, VecDeque};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// Scripted response of the fake service.
    #[derive(Debug, Clone, Copy)]
    enum Reply {
        Accept,
        Reject(&'static str),
        Transient(&'static str),
        /// Store the record but lose the response.
        AcceptThenTimeout,
    }

    /// In-process stand-in for the HerbLink API that honors idempotency keys.
    #[derive(Default)]
    struct FakeRemote {
        script: Mutex<VecDeque<Reply>>,
        accepted: Mutex<HashMap<String, String>>,
        calls: AtomicUsize,
        active: Mutex<HashSet<String>>,
        overlapped: AtomicBool,
        delay: Duration,
        cancel_on_call: Option<CancellationToken>,
    }

    impl FakeRemote {
        fn scripted(replies: &[Reply]) -> Self {
            Self {
                script: Mutex::new(replies.iter().copied().collect()),
                ..Self::default()
            }
        }

        fn remote_records(&self) -> usize {
            self.accepted.lock().unwrap().len()
        }

        fn accept(&self, key: &str) -> String {
            let mut accepted = self.accepted.lock().unwrap();
            let next = accepted.len() + 1;
            accepted
                .entry(key.to_string())
                .or_insert_with(|| format!("remote-{next}"))
                .clone()
        }
    }

    #[async_trait]
    impl RemoteSubmitter for FakeRemote {
        async fn submit(
            &self,
            _payload: &SubmissionPayload<'_>,
            idempotency_key: &str,
        ) -> std::result::Result<RemoteAck, SubmitError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.active.lock().unwrap().insert(idempotency_key.to_string()) {
                self.overlapped.store(true, Ordering::SeqCst);
            }
            if let Some(token) = &self.cancel_on_call {
                token.cancel();
            }
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.active.lock().unwrap().remove(idempotency_key);

            let reply = self.script.lock().unwrap().pop_front().unwrap_or(Reply::Accept);
            match reply {
                Reply::Accept => Ok(RemoteAck {
                    remote_id: self.accept(idempotency_key),
                }),
                Reply::Reject(reason) => Err(SubmitError::Rejected(reason.to_string())),
                Reply::Transient(reason) => Err(SubmitError::Transient(reason.to_string())),
                Reply::AcceptThenTimeout => {
                    self.accept(idempotency_key);
                    Err(SubmitError::Transient("request timed out".to_string()))
                }
            }
        }
    }

    fn test_settings() -> SyncSettings {
        SyncSettings {
            max_in_flight: 3,
            backoff: BackoffPolicy::new(Duration::from_secs(3600), Duration::from_secs(7200), 0.0),
            max_attempts: 0,
            remove_synced: false,
            poll_interval: Duration::from_millis(50),
            stale_attempt_after: Duration::from_secs(60),
        }
    }

    fn engine_with(remote: Arc<FakeRemote>, settings: SyncSettings) -> (SyncEngine, Arc<RecordStore>) {
        let store = Arc::new(RecordStore::open_in_memory().unwrap());
        let engine = SyncEngine::new(
            Arc::clone(&store),
            remote,
            StatusNotifier::new(),
            settings,
        );
        (engine, store)
    }

    fn queue_records(store: &RecordStore, count: usize) -> Vec<SubmissionRecord> {
        (0..count)
            .map(|_| {
                let record = SubmissionRecord::new(tulsi(), SubmissionType::Offline, Utc::now());
                store.put(&record).unwrap();
                record
            })
            .collect()
    }

    #[tokio::test]
    async fn test_offline_tulsi_submission_syncs_when_online() {
        let remote = Arc::new(FakeRemote::default());
        let (engine, store) = engine_with(Arc::clone(&remote), test_settings());
        let mut events = engine.inner.notifier.subscribe_events();

        let record = SubmissionBuilder::new().build(&tulsi_raw()).unwrap();
        store.put(&record).unwrap();
        assert_eq!(
            store.get(&record.local_id).unwrap().unwrap().status,
            SyncStatus::Pending
        );

        let report = engine.run_sync_pass(&CancellationToken::new()).await.unwrap();
        assert_eq!(report.attempted, 1);
        assert_eq!(report.synced, 1);

        let synced = store.get(&record.local_id).unwrap().unwrap();
        assert_eq!(synced.status, SyncStatus::Synced);
        assert_eq!(synced.remote_id.as_deref(), Some("remote-1"));
        assert_eq!(synced.attempt_count, 1);

        assert_eq!(events.recv().await.unwrap().status, SyncStatus::Syncing);
        assert_eq!(events.recv().await.unwrap().status, SyncStatus::Synced);

        let status = engine.inner.notifier.current();
        assert_eq!(status.failed, 0);
        assert_eq!(status.synced, 1);
        assert!(status.last_sync_attempt_at.is_some());
    }

    #[tokio::test]
    async fn test_pass_uploads_in_fifo_order() {
        let remote = Arc::new(FakeRemote::default());
        let settings = SyncSettings {
            max_in_flight: 1,
            ..test_settings()
        };
        let (engine, store) = engine_with(Arc::clone(&remote), settings);
        let records = queue_records(&store, 3);

        engine.run_sync_pass(&CancellationToken::new()).await.unwrap();

        for (idx, record) in records.iter().enumerate() {
            let stored = store.get(&record.local_id).unwrap().unwrap();
            assert_eq!(stored.remote_id, Some(format!("remote-{}", idx + 1)));
        }
    }

    #[tokio::test]
    async fn test_concurrent_passes_upload_each_record_once() {
        let remote = Arc::new(FakeRemote {
            delay: Duration::from_millis(30),
            ..FakeRemote::default()
        });
        let (engine, store) = engine_with(Arc::clone(&remote), test_settings());
        queue_records(&store, 5);

        let cancel = CancellationToken::new();
        let other = engine.clone();
        let (a, b) = tokio::join!(engine.run_sync_pass(&cancel), other.run_sync_pass(&cancel));
        let (a, b) = (a.unwrap(), b.unwrap());

        assert_eq!(a.synced + b.synced, 5);
        assert_eq!(remote.calls.load(Ordering::SeqCst), 5);
        assert!(!remote.overlapped.load(Ordering::SeqCst));
        assert_eq!(store.counts().unwrap().synced, 5);
    }

    #[tokio::test]
    async fn test_rejection_is_not_retried() {
        let remote = Arc::new(FakeRemote::scripted(&[Reply::Reject("422: farm: unknown farm")]));
        let (engine, store) = engine_with(Arc::clone(&remote), test_settings());
        let record = queue_records(&store, 1).remove(0);

        let report = engine.run_sync_pass(&CancellationToken::new()).await.unwrap();
        assert_eq!(report.rejected, 1);

        let failed = store.get(&record.local_id).unwrap().unwrap();
        assert_eq!(failed.status, SyncStatus::Failed);
        assert_eq!(failed.failure_kind, Some(FailureKind::Rejected));
        assert_eq!(failed.last_error.as_deref(), Some("422: farm: unknown farm"));
        assert!(failed.next_retry_at.is_none());

        let report = engine.run_sync_pass(&CancellationToken::new()).await.unwrap();
        assert_eq!(report.attempted, 0);
        assert_eq!(remote.calls.load(Ordering::SeqCst), 1);
        let far_future = Utc::now() + chrono::Duration::days(3650);
        assert!(store.list_eligible(far_future).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_transient_failure_waits_for_backoff() {
        let remote = Arc::new(FakeRemote::scripted(&[Reply::Transient(
            "503 Service Unavailable",
        )]));
        let (engine, store) = engine_with(Arc::clone(&remote), test_settings());
        let record = queue_records(&store, 1).remove(0);

        let before = Utc::now();
        let report = engine.run_sync_pass(&CancellationToken::new()).await.unwrap();
        assert_eq!(report.transient, 1);

        let failed = store.get(&record.local_id).unwrap().unwrap();
        assert_eq!(failed.failure_kind, Some(FailureKind::Transient));
        let retry_at = failed.next_retry_at.unwrap();
        assert!(retry_at >= before + chrono::Duration::seconds(3600));

        let report = engine.run_sync_pass(&CancellationToken::new()).await.unwrap();
        assert_eq!(report.attempted, 0);
        assert_eq!(remote.calls.load(Ordering::SeqCst), 1);

        assert_eq!(store.list_eligible(retry_at).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_retry_budget_exhausted() {
        let remote = Arc::new(FakeRemote::scripted(&[Reply::Transient("timeout")]));
        let settings = SyncSettings {
            max_attempts: 1,
            ..test_settings()
        };
        let (engine, store) = engine_with(remote, settings);
        let record = queue_records(&store, 1).remove(0);

        engine.run_sync_pass(&CancellationToken::new()).await.unwrap();

        let failed = store.get(&record.local_id).unwrap().unwrap();
        assert_eq!(failed.status, SyncStatus::Failed);
        assert!(failed.next_retry_at.is_none());
    }

    #[tokio::test]
    async fn test_ambiguous_timeout_does_not_duplicate() {
        let remote = Arc::new(FakeRemote::scripted(&[Reply::AcceptThenTimeout]));
        let settings = SyncSettings {
            backoff: BackoffPolicy::new(Duration::ZERO, Duration::ZERO, 0.0),
            ..test_settings()
        };
        let (engine, store) = engine_with(Arc::clone(&remote), settings);
        let record = queue_records(&store, 1).remove(0);

        let first = engine.run_sync_pass(&CancellationToken::new()).await.unwrap();
        assert_eq!(first.transient, 1);
        assert_eq!(
            store.get(&record.local_id).unwrap().unwrap().status,
            SyncStatus::Failed
        );

        let second = engine.run_sync_pass(&CancellationToken::new()).await.unwrap();
        assert_eq!(second.synced, 1);

        let synced = store.get(&record.local_id).unwrap().unwrap();
        assert_eq!(synced.status, SyncStatus::Synced);
        assert_eq!(synced.remote_id.as_deref(), Some("remote-1"));
        assert_eq!(synced.attempt_count, 2);
        assert_eq!(remote.remote_records(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_pass_starts_nothing() {
        let remote = Arc::new(FakeRemote::default());
        let (engine, store) = engine_with(Arc::clone(&remote), test_settings());
        queue_records(&store, 2);

        let cancel = CancellationToken::new();
        cancel.cancel();
        let report = engine.run_sync_pass(&cancel).await.unwrap();

        assert_eq!(report.attempted, 0);
        assert_eq!(report.cancelled, 2);
        assert_eq!(remote.calls.load(Ordering::SeqCst), 0);
        assert_eq!(store.counts().unwrap().pending, 2);
    }

    #[tokio::test]
    async fn test_cancellation_lets_in_flight_upload_finish() {
        let cancel = CancellationToken::new();
        let remote = Arc::new(FakeRemote {
            delay: Duration::from_millis(20),
            cancel_on_call: Some(cancel.clone()),
            ..FakeRemote::default()
        });
        let settings = SyncSettings {
            max_in_flight: 1,
            ..test_settings()
        };
        let (engine, store) = engine_with(Arc::clone(&remote), settings);
        queue_records(&store, 3);

        let report = engine.run_sync_pass(&cancel).await.unwrap();

        assert_eq!(report.synced, 1);
        assert_eq!(report.cancelled, 2);
        let counts = store.counts().unwrap();
        assert_eq!(counts.synced, 1);
        assert_eq!(counts.pending, 2);
        assert_eq!(counts.syncing, 0);
    }

    #[tokio::test]
    async fn test_remove_synced_after_notification() {
        let remote = Arc::new(FakeRemote::default());
        let settings = SyncSettings {
            remove_synced: true,
            ..test_settings()
        };
        let (engine, store) = engine_with(remote, settings);
        let mut events = engine.inner.notifier.subscribe_events();
        let record = queue_records(&store, 1).remove(0);

        engine.run_sync_pass(&CancellationToken::new()).await.unwrap();

        assert!(store.get(&record.local_id).unwrap().is_none());
        assert_eq!(events.recv().await.unwrap().status, SyncStatus::Syncing);
        let synced = events.recv().await.unwrap();
        assert_eq!(synced.status, SyncStatus::Synced);
        assert_eq!(synced.remote_id.as_deref(), Some("remote-1"));
    }

    #[tokio::test]
    async fn test_recover_interrupted_then_sync() {
        let remote = Arc::new(FakeRemote::default());
        let (engine, store) = engine_with(remote, test_settings());
        let record = queue_records(&store, 1).remove(0);
        let crashed_at = Utc::now() - chrono::Duration::minutes(10);
        store.begin_attempt(&record.local_id, crashed_at).unwrap();

        assert_eq!(engine.recover().unwrap(), 1);
        let report = engine.run_sync_pass(&CancellationToken::new()).await.unwrap();

        assert_eq!(report.synced, 1);
        assert_eq!(store.get(&record.local_id).unwrap().unwrap().attempt_count, 2);
    }

    #[tokio::test]
    async fn test_recover_skips_attempt_in_flight_elsewhere() {
        let remote = Arc::new(FakeRemote::default());
        let (engine, store) = engine_with(Arc::clone(&remote), test_settings());
        let record = queue_records(&store, 1).remove(0);
        store.begin_attempt(&record.local_id, Utc::now()).unwrap();

        assert_eq!(engine.recover().unwrap(), 0);
        let report = engine.run_sync_pass(&CancellationToken::new()).await.unwrap();

        assert_eq!(report.attempted, 0);
        assert_eq!(remote.calls.load(Ordering::SeqCst), 0);
        assert_eq!(
            store.get(&record.local_id).unwrap().unwrap().status,
            SyncStatus::Syncing
        );
    }

    #[tokio::test]
    async fn test_run_waits_for_connectivity() {
        let remote = Arc::new(FakeRemote::default());
        let (engine, store) = engine_with(Arc::clone(&remote), test_settings());
        let record = queue_records(&store, 1).remove(0);
        let mut events = engine.inner.notifier.subscribe_events();

        let connectivity = Connectivity::new(false);
        let shutdown = CancellationToken::new();
        let task = tokio::spawn({
            let engine = engine.clone();
            let connectivity = connectivity.clone();
            let shutdown = shutdown.clone();
            async move {
                engine
                    .run(connectivity, Arc::new(Notify::new()), shutdown)
                    .await;
            }
        });

        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(remote.calls.load(Ordering::SeqCst), 0);

        connectivity.set_online(true);
        let synced = tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                let event = events.recv().await.unwrap();
                if event.status == SyncStatus::Synced {
                    return event;
                }
            }
        })
        .await
        .expect("record was not synced");
        assert_eq!(synced.local_id, record.local_id);

        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("engine did not stop")
            .unwrap();
    }

    #[tokio::test]
    async fn test_store_writes_run_off_the_runtime_thread() {
        let (engine, _store) = engine_with(Arc::new(FakeRemote::default()), test_settings());
        let runtime_thread = std::thread::current().id();

        let store_thread = engine
            .inner
            .with_store(|_, _| Ok(std::thread::current().id()))
            .await
            .unwrap();

        assert_ne!(store_thread, runtime_thread);
    }

    #[tokio::test]
    async fn test_startup_runs_a_single_pass() {
        let remote = Arc::new(FakeRemote::scripted(&[Reply::Transient(
            "503 Service Unavailable",
        )]));
        let settings = SyncSettings {
            backoff: BackoffPolicy::new(Duration::ZERO, Duration::ZERO, 0.0),
            poll_interval: Duration::from_secs(3600),
            ..test_settings()
        };
        let (engine, store) = engine_with(Arc::clone(&remote), settings);
        let record = queue_records(&store, 1).remove(0);
        let shutdown = CancellationToken::new();

        let task = tokio::spawn({
            let engine = engine.clone();
            let shutdown = shutdown.clone();
            async move {
                engine
                    .run(Connectivity::new(true), Arc::new(Notify::new()), shutdown)
                    .await;
            }
        });

        tokio::time::sleep(Duration::from_millis(200)).await;
        shutdown.cancel();
        task.await.unwrap();

        assert_eq!(remote.calls.load(Ordering::SeqCst), 1);
        let stored = store.get(&record.local_id).unwrap().unwrap();
        assert_eq!(stored.status, SyncStatus::Failed);
        assert_eq!(stored.attempt_count, 1);
    }

    #[test]
    fn test_stale_attempt_age_follows_request_timeout() {
        let mut config = Config::default();
        config.remote.request_timeout_secs = 45;
        let settings = SyncSettings::from_config(&config);
        assert_eq!(settings.stale_attempt_after, Duration::from_secs(75));
    }

    #[tokio::test]
    async fn test_trigger_runs_pass_while_online() {
        let remote = Arc::new(FakeRemote::default());
        let settings = SyncSettings {
            poll_interval: Duration::from_secs(3600),
            ..test_settings()
        };
        let (engine, store) = engine_with(Arc::clone(&remote), settings);
        let connectivity = Connectivity::new(true);
        let trigger = Arc::new(Notify::new());
        let shutdown = CancellationToken::new();

        let task = tokio::spawn({
            let engine = engine.clone();
            let trigger = Arc::clone(&trigger);
            let shutdown = shutdown.clone();
            async move { engine.run(connectivity, trigger, shutdown).await }
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        let record = queue_records(&store, 1).remove(0);
        trigger.notify_one();

        tokio::time::timeout(Duration::from_secs(2), async {
            while store.get(&record.local_id).unwrap().unwrap().status != SyncStatus::Synced {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("trigger did not start a pass");

        shutdown.cancel();
        task.await.unwrap();
    }
}

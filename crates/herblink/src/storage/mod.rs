//! Durable record store for herblink.
//!
//! Submissions live in a single `SQLite` database. Every write commits with
//! `synchronous=FULL`, so a call that returns `Ok` has reached stable
//! storage. The status-changing helpers used by the sync engine are single
//! conditional statements: two callers racing on the same record cannot both
//! succeed, and neither can move it along a forbidden edge.

pub mod migrations;
pub mod schema;

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction, TransactionBehavior};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::submission::{FailureKind, HerbDetails, SubmissionRecord, SubmissionType, SyncStatus};

/// Column list matching [`RecordStore::row_to_record`].
const COLUMNS: &str = "local_id, remote_id, herb_name, harvest_date, quantity_kg, location, \
     farm, pesticides_used, submission_type, status, attempt_count, created_at, last_error, \
     failure_kind, last_attempt_at, next_retry_at, payload_hash";

/// Metadata key holding the start time of the most recent sync pass.
const LAST_SYNC_ATTEMPT_KEY: &str = "last_sync_attempt_at";

/// How long a writer waits for another process holding the database lock.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Message recorded on records found mid-upload at startup.
const INTERRUPTED_MESSAGE: &str = "interrupted before the upload outcome was known";

/// Keyed store of submission records.
///
/// The connection sits behind a mutex: readers and writers are serialized,
/// which also serializes writes per `local_id`.
#[derive(Debug)]
pub struct RecordStore {
    /// Path to the database file.
    path: PathBuf,
    /// Database connection.
    conn: Mutex<Connection>,
}

/// Number of records in each status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueCounts {
    /// Records waiting for a first attempt.
    pub pending: u64,
    /// Records with an upload in flight.
    pub syncing: u64,
    /// Records accepted by the remote service.
    pub synced: u64,
    /// Records whose last attempt failed.
    pub failed: u64,
}

impl QueueCounts {
    /// Total number of records.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.pending + self.syncing + self.synced + self.failed
    }

    /// Records not yet accepted by the remote service.
    #[must_use]
    pub fn unsynced(&self) -> u64 {
        self.pending + self.syncing + self.failed
    }
}

/// Format a timestamp so that text order equals time order.
pub(crate) fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_ts(value: &str) -> std::result::Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(value).map(|dt| dt.with_timezone(&Utc))
}

fn conversion_error(idx: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, message.into())
}

impl RecordStore {
    /// Open or create a store at the given path.
    ///
    /// Creates the parent directories and database file if they don't exist
    /// and brings the schema up to date.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or schema initialization fails.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|source| Error::DirectoryCreate {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
        }

        debug!("Opening submission store at {}", path.display());
        let mut conn = Connection::open(&path).map_err(|source| Error::DatabaseOpen {
            path: path.clone(),
            source,
        })?;

        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=FULL;")?;
        migrations::initialize_schema(&mut conn)?;

        info!("Submission store opened at {}", path.display());
        Ok(Self {
            path,
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory store for testing.
    ///
    /// # Errors
    ///
    /// Returns an error if the in-memory database cannot be created.
    pub fn open_in_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory().map_err(|source| Error::DatabaseOpen {
            path: PathBuf::from(":memory:"),
            source,
        })?;

        migrations::initialize_schema(&mut conn)?;

        Ok(Self {
            path: PathBuf::from(":memory:"),
            conn: Mutex::new(conn),
        })
    }

    /// Get the path to the database file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::internal("record store lock poisoned"))
    }

    /// Insert or update a record.
    ///
    /// Writing the same record twice leaves the store unchanged. A write
    /// that changes `status` must follow a permitted edge; `created_at` of
    /// an existing row is never overwritten.
    ///
    /// # Errors
    ///
    /// Returns an error if the record is inconsistent, the status change is
    /// not allowed, or the write fails.
    pub fn put(&self, record: &SubmissionRecord) -> Result<()> {
        record.check_invariants()?;

        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        if let Some(current) = Self::status_of(&tx, &record.local_id)? {
            if current != record.status && !current.can_transition_to(record.status) {
                return Err(Error::InvalidTransition {
                    local_id: record.local_id.clone(),
                    from: current,
                    to: record.status,
                });
            }
        }
        Self::ensure_remote_id_free(&tx, &record.local_id, record.remote_id.as_deref())?;

        Self::write_row(&tx, record)?;
        tx.commit()?;

        debug!(local_id = %record.local_id, status = %record.status, "Stored submission");
        Ok(())
    }

    /// Get a record by its local id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn get(&self, local_id: &str) -> Result<Option<SubmissionRecord>> {
        let conn = self.conn()?;
        Self::fetch(&conn, local_id)
    }

    /// Get a record, treating absence as an error.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RecordNotFound`] if there is no such record.
    pub fn require(&self, local_id: &str) -> Result<SubmissionRecord> {
        self.get(local_id)?.ok_or_else(|| Error::not_found(local_id))
    }

    /// Records with the given status, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn list_by_status(&self, status: SyncStatus) -> Result<Vec<SubmissionRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {COLUMNS} FROM submissions WHERE status = ?1 ORDER BY created_at ASC, seq ASC"
        ))?;
        let records = stmt
            .query_map([status.as_str()], Self::row_to_record)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(records)
    }

    /// Every record, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn list_all(&self) -> Result<Vec<SubmissionRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {COLUMNS} FROM submissions ORDER BY created_at ASC, seq ASC"
        ))?;
        let records = stmt
            .query_map([], Self::row_to_record)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(records)
    }

    /// Records the sync engine may upload at `now`, oldest first.
    ///
    /// That is every `pending` record plus `failed` records whose retry time
    /// has come.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn list_eligible(&self, now: DateTime<Utc>) -> Result<Vec<SubmissionRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            r"
            SELECT {COLUMNS} FROM submissions
            WHERE status = 'pending'
               OR (status = 'failed' AND next_retry_at IS NOT NULL AND next_retry_at <= ?1)
            ORDER BY created_at ASC, seq ASC
            "
        ))?;
        let records = stmt
            .query_map([format_ts(now)], Self::row_to_record)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(records)
    }

    /// An unsynced record whose details hash to `payload_hash`, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn find_unsynced_by_hash(&self, payload_hash: &str) -> Result<Option<SubmissionRecord>> {
        let conn = self.conn()?;
        Self::unsynced_by_hash(&conn, payload_hash)
    }

    /// Store a new record unless an unsynced one with the same payload hash
    /// exists, in which case that one is returned and nothing is written.
    ///
    /// The lookup and insert share one write transaction, so concurrent
    /// callers (in this or another process) store at most one of them.
    ///
    /// # Errors
    ///
    /// Returns an error if the record is inconsistent, its `local_id` is
    /// already taken, or the write fails.
    pub fn insert_unique(&self, record: &SubmissionRecord) -> Result<Option<SubmissionRecord>> {
        record.check_invariants()?;

        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        if let Some(existing) = Self::unsynced_by_hash(&tx, &record.payload_hash)? {
            return Ok(Some(existing));
        }
        if Self::status_of(&tx, &record.local_id)?.is_some() {
            return Err(Error::invariant(&record.local_id, "local id already stored"));
        }
        Self::ensure_remote_id_free(&tx, &record.local_id, record.remote_id.as_deref())?;

        Self::write_row(&tx, record)?;
        tx.commit()?;

        debug!(local_id = %record.local_id, "Stored new submission");
        Ok(None)
    }

    /// Permanently delete a synced record.
    ///
    /// Returns `false` if there was no such record.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotSynced`] if the record has not been synced.
    pub fn remove(&self, local_id: &str) -> Result<bool> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        match Self::status_of(&tx, local_id)? {
            None => Ok(false),
            Some(SyncStatus::Synced) => {
                tx.execute("DELETE FROM submissions WHERE local_id = ?1", [local_id])?;
                tx.commit()?;
                debug!(local_id, "Removed synced submission");
                Ok(true)
            }
            Some(status) => Err(Error::NotSynced {
                local_id: local_id.to_string(),
                status,
            }),
        }
    }

    /// Delete every synced record. Returns how many were removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn purge_synced(&self) -> Result<usize> {
        let conn = self.conn()?;
        let affected = conn.execute("DELETE FROM submissions WHERE status = 'synced'", [])?;
        if affected > 0 {
            info!("Purged {} synced submissions", affected);
        }
        Ok(affected)
    }

    /// Claim an eligible record for upload.
    ///
    /// Moves it to `syncing`, bumps `attempt_count` and stamps
    /// `last_attempt_at`. Returns `None` when the record is gone, already
    /// claimed, synced, or not yet due for retry.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn begin_attempt(
        &self,
        local_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<SubmissionRecord>> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let claimed = tx.execute(
            r"
            UPDATE submissions
            SET status = 'syncing',
                attempt_count = attempt_count + 1,
                last_attempt_at = ?2,
                next_retry_at = NULL
            WHERE local_id = ?1
              AND (status = 'pending'
                   OR (status = 'failed' AND next_retry_at IS NOT NULL AND next_retry_at <= ?2))
            ",
            params![local_id, format_ts(now)],
        )?;
        if claimed == 0 {
            return Ok(None);
        }
        let record = Self::fetch(&tx, local_id)?;
        tx.commit()?;
        Ok(record)
    }

    /// Record that the remote service accepted a `syncing` record.
    ///
    /// # Errors
    ///
    /// Returns an error if the record is not `syncing`, the remote id is
    /// already held by another record, or the write fails.
    pub fn mark_synced(&self, local_id: &str, remote_id: &str) -> Result<SubmissionRecord> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        Self::ensure_remote_id_free(&tx, local_id, Some(remote_id))?;
        let updated = tx.execute(
            r"
            UPDATE submissions
            SET status = 'synced',
                remote_id = ?2,
                last_error = NULL,
                failure_kind = NULL,
                next_retry_at = NULL
            WHERE local_id = ?1 AND status = 'syncing'
            ",
            params![local_id, remote_id],
        )?;
        let record = Self::finish_transition(&tx, local_id, updated, SyncStatus::Synced)?;
        tx.commit()?;
        Ok(record)
    }

    /// Record that an upload of a `syncing` record failed.
    ///
    /// `next_retry_at` of `None` means the record is not retried
    /// automatically.
    ///
    /// # Errors
    ///
    /// Returns an error if the record is not `syncing` or the write fails.
    pub fn mark_failed(
        &self,
        local_id: &str,
        kind: FailureKind,
        error: &str,
        next_retry_at: Option<DateTime<Utc>>,
    ) -> Result<SubmissionRecord> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let updated = tx.execute(
            r"
            UPDATE submissions
            SET status = 'failed',
                failure_kind = ?2,
                last_error = ?3,
                next_retry_at = ?4
            WHERE local_id = ?1 AND status = 'syncing'
            ",
            params![local_id, kind.as_str(), error, next_retry_at.map(format_ts)],
        )?;
        let record = Self::finish_transition(&tx, local_id, updated, SyncStatus::Failed)?;
        tx.commit()?;
        Ok(record)
    }

    /// Make a `failed` record eligible for upload from `at` onward.
    ///
    /// # Errors
    ///
    /// Returns an error if the record is missing or not `failed`.
    pub fn schedule_retry(&self, local_id: &str, at: DateTime<Utc>) -> Result<SubmissionRecord> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let updated = tx.execute(
            "UPDATE submissions SET next_retry_at = ?2 WHERE local_id = ?1 AND status = 'failed'",
            params![local_id, format_ts(at)],
        )?;
        let record = Self::finish_transition(&tx, local_id, updated, SyncStatus::Failed)?;
        tx.commit()?;
        Ok(record)
    }

    /// Replace the harvest details of a `failed` record and schedule it.
    ///
    /// # Errors
    ///
    /// Returns an error if the record is missing or not `failed`.
    pub fn amend_failed(
        &self,
        local_id: &str,
        details: &HerbDetails,
        retry_at: DateTime<Utc>,
    ) -> Result<SubmissionRecord> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let updated = tx.execute(
            r"
            UPDATE submissions
            SET herb_name = ?2,
                harvest_date = ?3,
                quantity_kg = ?4,
                location = ?5,
                farm = ?6,
                pesticides_used = ?7,
                payload_hash = ?8,
                next_retry_at = ?9
            WHERE local_id = ?1 AND status = 'failed'
            ",
            params![
                local_id,
                details.herb_name,
                details.harvest_date.to_string(),
                details.quantity_kg,
                details.location,
                details.farm,
                details.pesticides_used,
                details.fingerprint(),
                format_ts(retry_at),
            ],
        )?;
        let record = Self::finish_transition(&tx, local_id, updated, SyncStatus::Failed)?;
        tx.commit()?;
        Ok(record)
    }

    /// Fail records left `syncing` by a run that died mid-upload.
    ///
    /// Only attempts started before `claimed_before` count as interrupted;
    /// younger ones may still be on the wire in another process. Recovered
    /// records become transient failures due at `now`, and the idempotency
    /// token makes the retry safe.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn recover_interrupted(
        &self,
        claimed_before: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<usize> {
        let conn = self.conn()?;
        let affected = conn.execute(
            r"
            UPDATE submissions
            SET status = 'failed',
                failure_kind = 'transient',
                last_error = ?1,
                next_retry_at = ?2
            WHERE status = 'syncing'
              AND (last_attempt_at IS NULL OR last_attempt_at < ?3)
            ",
            params![INTERRUPTED_MESSAGE, format_ts(now), format_ts(claimed_before)],
        )?;
        if affected > 0 {
            warn!("Recovered {} submissions interrupted mid-upload", affected);
        }
        Ok(affected)
    }

    /// Number of records per status.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn counts(&self) -> Result<QueueCounts> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM submissions GROUP BY status")?;
        let rows = stmt
            .query_map([], |row| {
                let count: i64 = row.get(1)?;
                let count = u64::try_from(count)
                    .map_err(|e| conversion_error(1, format!("negative count {count}: {e}")))?;
                Ok((row.get::<_, String>(0)?, count))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut counts = QueueCounts::default();
        for (status, count) in rows {
            match SyncStatus::from_str(&status)? {
                SyncStatus::Pending => counts.pending = count,
                SyncStatus::Syncing => counts.syncing = count,
                SyncStatus::Synced => counts.synced = count,
                SyncStatus::Failed => counts.failed = count,
            }
        }
        Ok(counts)
    }

    /// When the most recent sync pass started.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn last_sync_attempt_at(&self) -> Result<Option<DateTime<Utc>>> {
        let conn = self.conn()?;
        let value: Option<String> = conn
            .query_row(
                "SELECT value FROM metadata WHERE key = ?1",
                [LAST_SYNC_ATTEMPT_KEY],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value.and_then(|v| parse_ts(&v).ok()))
    }

    /// Remember when a sync pass started.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn set_last_sync_attempt_at(&self, at: DateTime<Utc>) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO metadata (key, value) VALUES (?1, ?2)",
            params![LAST_SYNC_ATTEMPT_KEY, format_ts(at)],
        )?;
        Ok(())
    }

    fn write_row(conn: &Connection, record: &SubmissionRecord) -> Result<()> {
        conn.execute(
            r"
            INSERT INTO submissions (
                local_id, remote_id, herb_name, harvest_date, quantity_kg, location, farm,
                pesticides_used, submission_type, status, attempt_count, created_at,
                last_error, failure_kind, last_attempt_at, next_retry_at, payload_hash
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)
            ON CONFLICT(local_id) DO UPDATE SET
                remote_id = excluded.remote_id,
                herb_name = excluded.herb_name,
                harvest_date = excluded.harvest_date,
                quantity_kg = excluded.quantity_kg,
                location = excluded.location,
                farm = excluded.farm,
                pesticides_used = excluded.pesticides_used,
                submission_type = excluded.submission_type,
                status = excluded.status,
                attempt_count = excluded.attempt_count,
                last_error = excluded.last_error,
                failure_kind = excluded.failure_kind,
                last_attempt_at = excluded.last_attempt_at,
                next_retry_at = excluded.next_retry_at,
                payload_hash = excluded.payload_hash
            ",
            params![
                record.local_id,
                record.remote_id,
                record.details.herb_name,
                record.details.harvest_date.to_string(),
                record.details.quantity_kg,
                record.details.location,
                record.details.farm,
                record.details.pesticides_used,
                record.submission_type.as_str(),
                record.status.as_str(),
                record.attempt_count,
                format_ts(record.created_at),
                record.last_error,
                record.failure_kind.map(FailureKind::as_str),
                record.last_attempt_at.map(format_ts),
                record.next_retry_at.map(format_ts),
                record.payload_hash,
            ],
        )?;
        Ok(())
    }

    fn unsynced_by_hash(conn: &Connection, payload_hash: &str) -> Result<Option<SubmissionRecord>> {
        let record = conn
            .query_row(
                &format!(
                    r"
                    SELECT {COLUMNS} FROM submissions
                    WHERE payload_hash = ?1 AND status != 'synced'
                    ORDER BY seq ASC LIMIT 1
                    "
                ),
                [payload_hash],
                Self::row_to_record,
            )
            .optional()?;
        Ok(record)
    }

    fn fetch(conn: &Connection, local_id: &str) -> Result<Option<SubmissionRecord>> {
        let record = conn
            .query_row(
                &format!("SELECT {COLUMNS} FROM submissions WHERE local_id = ?1"),
                [local_id],
                Self::row_to_record,
            )
            .optional()?;
        Ok(record)
    }

    fn status_of(conn: &Connection, local_id: &str) -> Result<Option<SyncStatus>> {
        let status: Option<String> = conn
            .query_row(
                "SELECT status FROM submissions WHERE local_id = ?1",
                [local_id],
                |row| row.get(0),
            )
            .optional()?;
        status.as_deref().map(SyncStatus::from_str).transpose()
    }

    fn ensure_remote_id_free(
        conn: &Connection,
        local_id: &str,
        remote_id: Option<&str>,
    ) -> Result<()> {
        let Some(remote_id) = remote_id else {
            return Ok(());
        };
        let holder: Option<String> = conn
            .query_row(
                "SELECT local_id FROM submissions WHERE remote_id = ?1 AND local_id != ?2",
                params![remote_id, local_id],
                |row| row.get(0),
            )
            .optional()?;
        match holder {
            Some(other) => Err(Error::invariant(
                local_id,
                format!("remote id {remote_id} is already assigned to submission {other}"),
            )),
            None => Ok(()),
        }
    }

    /// Turn a conditional update's row count into the updated record or the
    /// reason nothing changed.
    fn finish_transition(
        tx: &Transaction<'_>,
        local_id: &str,
        updated: usize,
        to: SyncStatus,
    ) -> Result<SubmissionRecord> {
        if updated == 0 {
            return match Self::status_of(tx, local_id)? {
                None => Err(Error::not_found(local_id)),
                Some(from) => Err(Error::InvalidTransition {
                    local_id: local_id.to_string(),
                    from,
                    to,
                }),
            };
        }
        Self::fetch(tx, local_id)?.ok_or_else(|| Error::not_found(local_id))
    }

    /// Convert a database row to a `SubmissionRecord`.
    fn row_to_record(row: &Row<'_>) -> rusqlite::Result<SubmissionRecord> {
        let harvest_date: String = row.get(3)?;
        let harvest_date = NaiveDate::parse_from_str(&harvest_date, "%Y-%m-%d")
            .map_err(|e| conversion_error(3, format!("harvest_date {harvest_date:?}: {e}")))?;

        let submission_type: String = row.get(8)?;
        let submission_type = SubmissionType::from_str(&submission_type)
            .map_err(|e| conversion_error(8, e.to_string()))?;

        let status: String = row.get(9)?;
        let status = SyncStatus::from_str(&status).map_err(|e| conversion_error(9, e.to_string()))?;

        let created_at: String = row.get(11)?;
        let created_at = parse_ts(&created_at)
            .map_err(|e| conversion_error(11, format!("created_at {created_at:?}: {e}")))?;

        let failure_kind = row
            .get::<_, Option<String>>(13)?
            .map(|s| FailureKind::from_str(&s))
            .transpose()
            .map_err(|e| conversion_error(13, e.to_string()))?;

        let last_attempt_at = row
            .get::<_, Option<String>>(14)?
            .map(|s| parse_ts(&s))
            .transpose()
            .map_err(|e| conversion_error(14, e.to_string()))?;

        let next_retry_at = row
            .get::<_, Option<String>>(15)?
            .map(|s| parse_ts(&s))
            .transpose()
            .map_err(|e| conversion_error(15, e.to_string()))?;

        Ok(SubmissionRecord {
            local_id: row.get(0)?,
            remote_id: row.get(1)?,
            details: HerbDetails {
                herb_name: row.get(2)?,
                harvest_date,
                quantity_kg: row.get(4)?,
                location: row.get(5)?,
                farm: row.get(6)?,
                pesticides_used: row.get(7)?,
            },
            submission_type,
            status,
            attempt_count: row.get(10)?,
            created_at,
            last_error: row.get(12)?,
            failure_kind,
            last_attempt_at,
            next_retry_at,
            payload_hash: row.get(16)?,
        })
    }
}

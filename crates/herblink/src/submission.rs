//! Core submission types for herblink.
//!
//! This module defines the herb-harvest submission record and the status
//! machine it moves through on its way to the remote service.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

/// How the user intended the submission to be delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionType {
    /// Entered while connected; delivery is attempted right away.
    Online,
    /// Recorded for later sync.
    Offline,
}

impl SubmissionType {
    /// The stable string form used in storage and on the wire.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Online => "online",
            Self::Offline => "offline",
        }
    }
}

impl fmt::Display for SubmissionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubmissionType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "online" => Ok(Self::Online),
            "offline" => Ok(Self::Offline),
            other => Err(Error::internal(format!("unknown submission type: {other}"))),
        }
    }
}

/// Sync status of a submission record.
///
/// Records move `pending → syncing → {synced | failed}` and may go back from
/// `failed` to `syncing` on retry. Nothing skips `syncing`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    /// Waiting for its first upload attempt.
    Pending,
    /// An upload attempt is in flight.
    Syncing,
    /// Accepted by the remote service.
    Synced,
    /// The last upload attempt failed.
    Failed,
}

impl SyncStatus {
    /// Every status, in lifecycle order.
    pub const ALL: [Self; 4] = [Self::Pending, Self::Syncing, Self::Synced, Self::Failed];

    /// The stable string form used in storage.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Syncing => "syncing",
            Self::Synced => "synced",
            Self::Failed => "failed",
        }
    }

    /// Whether `self → next` is a permitted edge of the status machine.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending | Self::Failed, Self::Syncing)
                | (Self::Syncing, Self::Synced | Self::Failed)
        )
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(Self::Pending),
            "syncing" => Ok(Self::Syncing),
            "synced" => Ok(Self::Synced),
            "failed" => Ok(Self::Failed),
            other => Err(Error::internal(format!("unknown sync status: {other}"))),
        }
    }
}

/// Why a record ended up `failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The remote service refused the payload; needs user correction.
    Rejected,
    /// Network or server trouble; retried automatically.
    Transient,
}

impl FailureKind {
    /// The stable string form used in storage.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Rejected => "rejected",
            Self::Transient => "transient",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FailureKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "rejected" => Ok(Self::Rejected),
            "transient" => Ok(Self::Transient),
            other => Err(Error::internal(format!("unknown failure kind: {other}"))),
        }
    }
}

/// The user-supplied fields of a harvest entry, already validated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HerbDetails {
    /// Name of the harvested herb.
    pub herb_name: String,
    /// Day the herb was harvested.
    pub harvest_date: NaiveDate,
    /// Harvested quantity in kilograms.
    pub quantity_kg: f64,
    /// Where on the farm it was harvested.
    pub location: String,
    /// The farm the harvest belongs to.
    pub farm: String,
    /// Free-form pesticide notes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pesticides_used: Option<String>,
}

impl HerbDetails {
    /// BLAKE3 fingerprint of the details, used to spot duplicate entries.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        let date = self.harvest_date.to_string();
        let quantity = self.quantity_kg.to_string();
        let mut hasher = blake3::Hasher::new();
        for part in [
            self.herb_name.as_str(),
            date.as_str(),
            quantity.as_str(),
            self.location.as_str(),
            self.farm.as_str(),
            self.pesticides_used.as_deref().unwrap_or(""),
        ] {
            hasher.update(part.as_bytes());
            hasher.update(&[0x1f]);
        }
        hasher.finalize().to_hex().to_string()
    }
}

/// A herb-harvest submission and its delivery state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmissionRecord {
    /// Client-generated identifier; also the idempotency token.
    pub local_id: String,

    /// Identifier assigned by the remote service once accepted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_id: Option<String>,

    /// The harvest entry itself.
    #[serde(flatten)]
    pub details: HerbDetails,

    /// Delivery intent chosen by the user.
    pub submission_type: SubmissionType,

    /// Where the record is in its sync lifecycle.
    pub status: SyncStatus,

    /// Number of upload attempts made so far.
    pub attempt_count: u32,

    /// When the record was created.
    pub created_at: DateTime<Utc>,

    /// Description of the last failure, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,

    /// Classification of the last failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_kind: Option<FailureKind>,

    /// When the last upload attempt started.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_attempt_at: Option<DateTime<Utc>>,

    /// Earliest time a failed record may be retried automatically.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_retry_at: Option<DateTime<Utc>>,

    /// Fingerprint of `details`.
    pub payload_hash: String,
}

impl SubmissionRecord {
    /// Create a new pending record with a fresh local id.
    #[must_use]
    pub fn new(
        details: HerbDetails,
        submission_type: SubmissionType,
        created_at: DateTime<Utc>,
    ) -> Self {
        let payload_hash = details.fingerprint();
        Self {
            local_id: Uuid::new_v4().to_string(),
            remote_id: None,
            details,
            submission_type,
            status: SyncStatus::Pending,
            attempt_count: 0,
            created_at,
            last_error: None,
            failure_kind: None,
            last_attempt_at: None,
            next_retry_at: None,
            payload_hash,
        }
    }

    /// The body sent to the remote service.
    #[must_use]
    pub fn payload(&self) -> SubmissionPayload<'_> {
        SubmissionPayload {
            herb_name: &self.details.herb_name,
            harvest_date: self.details.harvest_date,
            quantity: self.details.quantity_kg,
            location: &self.details.location,
            farm: &self.details.farm,
            pesticides_used: self.details.pesticides_used.as_deref().unwrap_or(""),
            submission_type: self.submission_type,
            created_at: self.created_at,
        }
    }

    /// Whether the sync engine may pick this record up at `now`.
    #[must_use]
    pub fn is_eligible(&self, now: DateTime<Utc>) -> bool {
        match self.status {
            SyncStatus::Pending => true,
            SyncStatus::Failed => self.next_retry_at.is_some_and(|at| at <= now),
            SyncStatus::Syncing | SyncStatus::Synced => false,
        }
    }

    /// Check the record-level invariants.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvariantViolation`] if `remote_id` and `status`
    /// disagree or a failed record carries no failure kind.
    pub fn check_invariants(&self) -> Result<()> {
        let synced = self.status == SyncStatus::Synced;
        if synced != self.remote_id.is_some() {
            return Err(Error::invariant(
                &self.local_id,
                format!(
                    "remote_id must be set iff status is synced (status={}, remote_id={:?})",
                    self.status, self.remote_id
                ),
            ));
        }
        if self.status == SyncStatus::Failed && self.failure_kind.is_none() {
            return Err(Error::invariant(
                &self.local_id,
                "failed record has no failure kind",
            ));
        }
        Ok(())
    }
}

/// Wire body for the remote submission endpoint.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubmissionPayload<'a> {
    /// Name of the harvested herb.
    pub herb_name: &'a str,
    /// Harvest day, `YYYY-MM-DD`.
    pub harvest_date: NaiveDate,
    /// Quantity in kilograms.
    pub quantity: f64,
    /// Harvest location.
    pub location: &'a str,
    /// Farm name.
    pub farm: &'a str,
    /// Pesticide notes, empty when none were given.
    pub pesticides_used: &'a str,
    /// Delivery intent.
    pub submission_type: SubmissionType,
    /// When the record was created on the device.
    pub created_at: DateTime<Utc>,
}

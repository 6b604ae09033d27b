//! Error types for herblink.
//!
//! This module defines the error type shared by the store, the sync engine
//! and the queue facade. Remote submission failures have their own
//! taxonomy in [`crate::remote::SubmitError`] because they are recorded on
//! the submission rather than returned to the caller.

use std::path::PathBuf;
use thiserror::Error;

use crate::builder::ValidationError;
use crate::submission::SyncStatus;

/// The main error type for herblink operations.
#[derive(Error, Debug)]
pub enum Error {
    // === Storage Errors ===
    /// Failed to open or create the database.
    #[error("failed to open database at {path}: {source}")]
    DatabaseOpen {
        /// Path to the database file.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: rusqlite::Error,
    },

    /// A database query failed.
    #[error("database query failed: {0}")]
    DatabaseQuery(#[from] rusqlite::Error),

    /// Failed to run database migrations.
    #[error("database migration failed: {message}")]
    DatabaseMigration {
        /// Description of what went wrong.
        message: String,
    },

    // === Record Errors ===
    /// No record exists with the given local id.
    #[error("no submission with id {local_id}")]
    RecordNotFound {
        /// The local id that was looked up.
        local_id: String,
    },

    /// A write would move a record along an edge the status machine forbids.
    #[error("submission {local_id} cannot move from {from} to {to}")]
    InvalidTransition {
        /// The record being written.
        local_id: String,
        /// Status currently stored.
        from: SyncStatus,
        /// Status the write asked for.
        to: SyncStatus,
    },

    /// A record failed its consistency checks.
    #[error("submission {local_id} is inconsistent: {message}")]
    InvariantViolation {
        /// The offending record.
        local_id: String,
        /// What is wrong with it.
        message: String,
    },

    /// Only synced records may be removed.
    #[error("submission {local_id} is {status}; only synced submissions can be removed")]
    NotSynced {
        /// The record that was asked to be removed.
        local_id: String,
        /// Its current status.
        status: SyncStatus,
    },

    // === Submission Errors ===
    /// User input did not pass validation.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    // === Configuration Errors ===
    /// Failed to load configuration.
    #[error("failed to load configuration: {0}")]
    ConfigLoad(Box<figment::Error>),

    /// Configuration validation failed.
    #[error("invalid configuration: {message}")]
    ConfigValidation {
        /// Description of the validation failure.
        message: String,
    },

    // === Remote Errors ===
    /// Building the HTTP client failed.
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    // === I/O Errors ===
    /// File system operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to create a required directory.
    #[error("failed to create directory {path}: {source}")]
    DirectoryCreate {
        /// Path that couldn't be created.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    // === Serialization Errors ===
    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// QR code generation failed.
    #[error("failed to encode QR code: {0}")]
    QrEncode(String),

    // === Generic Errors ===
    /// An internal error occurred (bug).
    #[error("internal error: {0}")]
    Internal(String),
}

/// A specialized Result type for herblink operations.
pub type Result<T> = std::result::Result<T, Error>;

impl From<figment::Error> for Error {
    fn from(err: figment::Error) -> Self {
        Self::ConfigLoad(Box::new(err))
    }
}

impl Error {
    /// Create a new internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Create a record-not-found error.
    #[must_use]
    pub fn not_found(local_id: impl Into<String>) -> Self {
        Self::RecordNotFound {
            local_id: local_id.into(),
        }
    }

    /// Create an invariant violation error.
    #[must_use]
    pub fn invariant(local_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvariantViolation {
            local_id: local_id.into(),
            message: message.into(),
        }
    }

    /// Check if this error came from the durable store.
    ///
    /// A storage failure means the write did not happen; callers must not
    /// assume the record was persisted.
    #[must_use]
    pub fn is_storage_error(&self) -> bool {
        matches!(
            self,
            Self::DatabaseOpen { .. }
                | Self::DatabaseQuery(_)
                | Self::DatabaseMigration { .. }
                | Self::DirectoryCreate { .. }
        )
    }

    /// Check if this error is a user input problem.
    #[must_use]
    pub fn is_validation_error(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Check if this error means the record does not exist.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::RecordNotFound { .. })
    }
}

//! `herblink` - Offline-first queue for herb harvest submissions
//!
//! Submissions are validated, written to a local `SQLite` store, and uploaded
//! to the HerbLink service by a background sync engine whenever the network
//! is available. Nothing the user entered is lost to a flaky connection.

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

pub mod builder;
pub mod cli;
pub mod config;
pub mod connectivity;
pub mod error;
pub mod logging;
pub mod notifier;
pub mod queue;
pub mod receipt;
pub mod remote;
pub mod storage;
pub mod submission;
pub mod sync;

pub use builder::{RawSubmission, SubmissionBuilder, ValidationError};
pub use config::Config;
pub use connectivity::{Connectivity, ConnectivityMonitor, ConnectivityProbe};
pub use error::{Error, Result};
pub use logging::init_logging;
pub use notifier::{QueueStatus, RecordEvent, StatusNotifier};
pub use queue::{SubmissionQueue, SubmitOutcome};
pub use receipt::Receipt;
pub use remote::{HttpSubmitter, RemoteAck, RemoteSubmitter, SubmitError};
pub use storage::{QueueCounts, RecordStore};
pub use submission::{FailureKind, HerbDetails, SubmissionRecord, SubmissionType, SyncStatus};
pub use sync::{SyncEngine, SyncReport, SyncSettings};

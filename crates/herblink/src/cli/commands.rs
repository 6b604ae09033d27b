//! CLI command definitions.
//!
//! This module defines the structure of all CLI subcommands.

use std::path::PathBuf;

use clap::{Args, Subcommand, ValueEnum};

use crate::builder::RawSubmission;
use crate::submission::{SubmissionType, SyncStatus};

/// Harvest fields shared by `submit` and `amend`.
#[derive(Debug, Clone, Args)]
pub struct HerbFields {
    /// Name of the harvested herb (e.g. "Tulsi")
    #[arg(long)]
    pub herb_name: Option<String>,

    /// Harvest date, YYYY-MM-DD
    #[arg(long)]
    pub harvest_date: Option<String>,

    /// Quantity in kilograms
    #[arg(long)]
    pub quantity: Option<String>,

    /// Where on the farm the herb was harvested
    #[arg(long)]
    pub location: Option<String>,

    /// Farm name (e.g. "Green Valley Farm", "Organic Paradise", "Natural Herbs Co.")
    #[arg(long)]
    pub farm: Option<String>,

    /// Pesticides used, if any
    #[arg(long)]
    pub pesticides: Option<String>,
}

impl HerbFields {
    /// Raw form input, with blanks for fields not given.
    #[must_use]
    pub fn to_raw(&self, submission_type: SubmissionType) -> RawSubmission {
        RawSubmission {
            herb_name: self.herb_name.clone().unwrap_or_default(),
            harvest_date: self.harvest_date.clone().unwrap_or_default(),
            quantity_kg: self.quantity.clone().unwrap_or_default(),
            location: self.location.clone().unwrap_or_default(),
            farm: self.farm.clone().unwrap_or_default(),
            pesticides_used: self.pesticides.clone(),
            submission_type,
        }
    }

    /// `base` with the fields given here replacing its values.
    #[must_use]
    pub fn overlay(&self, base: RawSubmission) -> RawSubmission {
        RawSubmission {
            herb_name: self.herb_name.clone().unwrap_or(base.herb_name),
            harvest_date: self.harvest_date.clone().unwrap_or(base.harvest_date),
            quantity_kg: self.quantity.clone().unwrap_or(base.quantity_kg),
            location: self.location.clone().unwrap_or(base.location),
            farm: self.farm.clone().unwrap_or(base.farm),
            pesticides_used: self.pesticides.clone().or(base.pesticides_used),
            submission_type: base.submission_type,
        }
    }
}

/// Submit command arguments.
#[derive(Debug, Args)]
pub struct SubmitCommand {
    /// Harvest details
    #[command(flatten)]
    pub fields: HerbFields,

    /// Queue for later sync instead of uploading right away
    #[arg(long)]
    pub offline: bool,

    /// Output as JSON
    #[arg(short, long)]
    pub json: bool,
}

impl SubmitCommand {
    /// The delivery intent chosen on the command line.
    #[must_use]
    pub fn submission_type(&self) -> SubmissionType {
        if self.offline {
            SubmissionType::Offline
        } else {
            SubmissionType::Online
        }
    }
}

/// List command arguments.
#[derive(Debug, Args)]
pub struct ListCommand {
    /// Only show submissions with this status
    #[arg(short, long, value_enum)]
    pub status: Option<StatusArg>,

    /// Output as JSON
    #[arg(short, long)]
    pub json: bool,
}

/// Arguments naming one submission.
#[derive(Debug, Args)]
pub struct ShowCommand {
    /// Submission id (a unique prefix is enough)
    pub id: String,

    /// Output as JSON
    #[arg(short, long)]
    pub json: bool,
}

/// Status command arguments.
#[derive(Debug, Args)]
pub struct StatusCommand {
    /// Output as JSON
    #[arg(short, long)]
    pub json: bool,
}

/// Sync command arguments.
#[derive(Debug, Args)]
pub struct SyncCommand {
    /// Output the pass report as JSON
    #[arg(short, long)]
    pub json: bool,
}

/// Daemon command arguments.
#[derive(Debug, Args)]
pub struct DaemonCommand {
    /// Seconds between connectivity checks and sync passes
    #[arg(long, value_name = "SECS")]
    pub poll_interval: Option<u64>,
}

/// Retry command arguments.
#[derive(Debug, Args)]
pub struct RetryCommand {
    /// Submission id (a unique prefix is enough)
    pub id: String,
}

/// Amend command arguments.
#[derive(Debug, Args)]
pub struct AmendCommand {
    /// Submission id (a unique prefix is enough)
    pub id: String,

    /// Corrected harvest details; omitted fields keep their value
    #[command(flatten)]
    pub fields: HerbFields,
}

/// Purge command arguments.
#[derive(Debug, Args)]
pub struct PurgeCommand {
    /// Skip confirmation prompt
    #[arg(short, long)]
    pub yes: bool,
}

/// Receipt command arguments.
#[derive(Debug, Args)]
pub struct ReceiptCommand {
    /// Submission id (a unique prefix is enough)
    pub id: String,

    /// Write the QR code as SVG to this file instead of the terminal
    #[arg(long, value_name = "FILE")]
    pub svg: Option<PathBuf>,

    /// Print the receipt payload instead of a QR code
    #[arg(short, long)]
    pub json: bool,
}

/// Configuration commands.
#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show {
        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Show the configuration file path
    Path,

    /// Validate configuration
    Validate {
        /// Path to configuration file to validate
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
}

/// Sync status argument for filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StatusArg {
    /// Waiting for upload
    Pending,
    /// Upload in progress
    Syncing,
    /// Accepted by the server
    Synced,
    /// Last upload failed
    Failed,
}

impl From<StatusArg> for SyncStatus {
    fn from(arg: StatusArg) -> Self {
        match arg {
            StatusArg::Pending => Self::Pending,
            StatusArg::Syncing => Self::Syncing,
            StatusArg::Synced => Self::Synced,
            StatusArg::Failed => Self::Failed,
        }
    }
}

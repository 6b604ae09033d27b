//! Command-line interface for herblink.
//!
//! This module provides the CLI structure for the `herblink` binary.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::logging::Verbosity;

pub use commands::{
    AmendCommand, ConfigCommand, DaemonCommand, HerbFields, ListCommand, PurgeCommand,
    ReceiptCommand, RetryCommand, ShowCommand, StatusArg, StatusCommand, SubmitCommand,
    SyncCommand,
};

/// herblink - Record herb harvests, even without a signal
///
/// Submissions are stored on this device first and uploaded to the HerbLink
/// service when the network allows.
#[derive(Debug, Parser)]
#[command(name = "herblink")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to custom configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Increase verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// The command to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Record a new harvest submission
    Submit(SubmitCommand),

    /// List stored submissions
    List(ListCommand),

    /// Show one submission in full
    Show(ShowCommand),

    /// Show queue counts and failures
    Status(StatusCommand),

    /// Upload eligible submissions now
    Sync(SyncCommand),

    /// Keep syncing in the foreground until interrupted
    Daemon(DaemonCommand),

    /// Retry a failed submission
    Retry(RetryCommand),

    /// Correct a failed submission and retry it
    Amend(AmendCommand),

    /// Delete submissions that have been synced
    Purge(PurgeCommand),

    /// Show the QR receipt for a submission
    Receipt(ReceiptCommand),

    /// View or validate configuration
    #[command(subcommand)]
    Config(ConfigCommand),
}

impl Cli {
    /// Get the verbosity level based on flags.
    #[must_use]
    pub fn verbosity(&self) -> Verbosity {
        Verbosity::from_flags(self.quiet, self.verbose)
    }
}

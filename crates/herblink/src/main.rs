//! `herblink` - CLI for the herb submission queue
//!
//! This binary records harvest submissions on the device and syncs them with
//! the HerbLink service, either on demand or from a foreground daemon.

#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::Parser;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use herblink::cli::{
    AmendCommand, Cli, Command, ConfigCommand, ListCommand, PurgeCommand, ReceiptCommand,
    ShowCommand, StatusCommand, SubmitCommand, SyncCommand,
};
use herblink::remote::HttpSubmitter;
use herblink::{
    init_logging, Config, Connectivity, ConnectivityMonitor, ConnectivityProbe, QueueStatus,
    RawSubmission, Receipt, RecordStore, RemoteSubmitter, StatusNotifier, SubmissionQueue,
    SubmissionRecord, SubmissionType, SubmitOutcome, SyncEngine, SyncReport, SyncSettings,
    SyncStatus,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    init_logging(cli.verbosity());

    match cli.command {
        // Config commands must work even when the configuration is broken
        Command::Config(cmd) => handle_config(cli.config, cmd),
        command => run(cli.config, command).await,
    }
}

async fn run(config_path: Option<PathBuf>, command: Command) -> anyhow::Result<()> {
    let mut config =
        Config::load_from(config_path.clone()).context("failed to load configuration")?;
    if let Command::Daemon(cmd) = &command {
        if let Some(secs) = cmd.poll_interval {
            config.sync.poll_interval_secs = secs;
            config.validate()?;
        }
    }

    let app = App::open(config)?;

    match command {
        Command::Submit(cmd) => app.submit(&cmd).await,
        Command::List(cmd) => app.list(&cmd),
        Command::Show(cmd) => app.show(&cmd),
        Command::Status(cmd) => app.status(&cmd).await,
        Command::Sync(cmd) => app.sync(&cmd).await,
        Command::Daemon(_) => app.daemon().await,
        Command::Retry(cmd) => app.retry(&cmd.id),
        Command::Amend(cmd) => app.amend(&cmd),
        Command::Purge(cmd) => app.purge(&cmd),
        Command::Receipt(cmd) => app.receipt(&cmd),
        Command::Config(cmd) => handle_config(config_path, cmd),
    }
}

/// Everything a command needs, wired from the configuration.
#[derive(Debug)]
struct App {
    config: Config,
    store: Arc<RecordStore>,
    notifier: StatusNotifier,
    queue: SubmissionQueue,
    engine: SyncEngine,
    remote: Arc<HttpSubmitter>,
    trigger: Arc<Notify>,
}

impl App {
    fn open(config: Config) -> anyhow::Result<Self> {
        let db_path = config.database_path();
        let store = Arc::new(
            RecordStore::open(&db_path)
                .with_context(|| format!("failed to open {}", db_path.display()))?,
        );
        let notifier = StatusNotifier::new();
        let trigger = Arc::new(Notify::new());
        let remote = Arc::new(HttpSubmitter::new(&config.remote)?);

        let submitter: Arc<dyn RemoteSubmitter> = remote.clone();
        let engine = SyncEngine::new(
            Arc::clone(&store),
            submitter,
            notifier.clone(),
            SyncSettings::from_config(&config),
        );
        let queue =
            SubmissionQueue::new(Arc::clone(&store), notifier.clone(), Arc::clone(&trigger));
        Ok(Self {
            config,
            store,
            notifier,
            queue,
            engine,
            remote,
            trigger,
        })
    }

    /// Requeue uploads abandoned by a process that died mid-attempt.
    ///
    /// Only commands that run sync passes call this.
    fn recover(&self) -> anyhow::Result<()> {
        let recovered = self.engine.recover()?;
        if recovered > 0 {
            warn!("{recovered} submissions were interrupted mid-upload and will be retried");
        }
        Ok(())
    }

    /// Find a record by full id or unique id prefix.
    fn resolve(&self, id: &str) -> anyhow::Result<SubmissionRecord> {
        if let Some(record) = self.store.get(id)? {
            return Ok(record);
        }
        let mut matches: Vec<_> = self
            .store
            .list_all()?
            .into_iter()
            .filter(|r| r.local_id.starts_with(id))
            .collect();
        match matches.len() {
            0 => bail!("no submission matches '{id}'"),
            1 => Ok(matches.remove(0)),
            n => bail!("'{id}' matches {n} submissions; give more of the id"),
        }
    }

    /// Probe the service once and publish the result.
    async fn probe(&self) -> bool {
        let online = self.remote.is_reachable().await;
        self.notifier.set_online(online);
        online
    }

    async fn submit(&self, cmd: &SubmitCommand) -> anyhow::Result<()> {
        let raw = cmd.fields.to_raw(cmd.submission_type());
        let outcome = self.queue.submit(&raw)?;

        let mut record = outcome.record().clone();
        if let SubmitOutcome::Duplicate(_) = outcome {
            println!(
                "An identical submission is already queued ({}).",
                short_id(&record.local_id)
            );
        } else if record.submission_type == SubmissionType::Online {
            if self.probe().await {
                self.recover()?;
                self.engine.run_sync_pass(&CancellationToken::new()).await?;
                if let Some(updated) = self.store.get(&record.local_id)? {
                    record = updated;
                }
            } else {
                info!("Service unreachable; submission stays queued");
            }
        }

        if cmd.json {
            println!("{}", serde_json::to_string_pretty(&record)?);
            return Ok(());
        }

        match record.status {
            SyncStatus::Synced => println!(
                "Submitted {} ({} kg). Remote id: {}",
                record.details.herb_name,
                record.details.quantity_kg,
                record.remote_id.as_deref().unwrap_or("-")
            ),
            SyncStatus::Failed => println!(
                "Saved {} locally; upload failed: {}",
                record.details.herb_name,
                record.last_error.as_deref().unwrap_or("unknown error")
            ),
            SyncStatus::Pending | SyncStatus::Syncing => println!(
                "Saved {} locally. It will sync when a connection is available.",
                record.details.herb_name
            ),
        }
        println!("Id: {}", record.local_id);
        println!();
        print!("{}", Receipt::for_record(&record).render_terminal()?);
        println!();
        Ok(())
    }

    fn list(&self, cmd: &ListCommand) -> anyhow::Result<()> {
        let records = match cmd.status {
            Some(status) => self.store.list_by_status(status.into())?,
            None => self.store.list_all()?,
        };

        if cmd.json {
            println!("{}", serde_json::to_string_pretty(&records)?);
            return Ok(());
        }
        if records.is_empty() {
            println!("No submissions.");
            return Ok(());
        }

        println!(
            "{:<8}  {:<7}  {:<10}  {:<20}  {:>9}  FARM",
            "ID", "STATUS", "HARVESTED", "HERB", "KG"
        );
        for record in &records {
            println!(
                "{:<8}  {:<7}  {:<10}  {:<20}  {:>9}  {}",
                short_id(&record.local_id),
                record.status.as_str(),
                record.details.harvest_date.to_string(),
                truncate(&record.details.herb_name, 20),
                record.details.quantity_kg,
                record.details.farm
            );
        }
        Ok(())
    }

    fn show(&self, cmd: &ShowCommand) -> anyhow::Result<()> {
        let record = self.resolve(&cmd.id)?;
        if cmd.json {
            println!("{}", serde_json::to_string_pretty(&record)?);
            return Ok(());
        }

        let details = &record.details;
        println!("Submission {}", record.local_id);
        println!("  Herb:           {}", details.herb_name);
        println!("  Harvest date:   {}", details.harvest_date);
        println!("  Quantity (kg):  {}", details.quantity_kg);
        println!("  Location:       {}", details.location);
        println!("  Farm:           {}", details.farm);
        println!(
            "  Pesticides:     {}",
            details.pesticides_used.as_deref().unwrap_or("none")
        );
        println!("  Type:           {}", record.submission_type);
        println!("  Status:         {}", record.status);
        println!("  Attempts:       {}", record.attempt_count);
        println!("  Created:        {}", record.created_at);
        if let Some(remote_id) = &record.remote_id {
            println!("  Remote id:      {remote_id}");
        }
        if let Some(error) = &record.last_error {
            let kind = record
                .failure_kind
                .map_or_else(String::new, |k| format!(" ({k})"));
            println!("  Last error:     {error}{kind}");
        }
        if let Some(at) = record.next_retry_at {
            println!("  Next retry:     {at}");
        }
        Ok(())
    }

    async fn status(&self, cmd: &StatusCommand) -> anyhow::Result<()> {
        self.probe().await;
        let status = self.notifier.refresh(&self.store)?;

        if cmd.json {
            println!("{}", serde_json::to_string_pretty(&status)?);
        } else {
            print_status(&status, &self.config);
        }
        Ok(())
    }

    async fn sync(&self, cmd: &SyncCommand) -> anyhow::Result<()> {
        if !self.probe().await {
            let unsynced = self.store.counts()?.unsynced();
            println!(
                "{} is unreachable; {unsynced} submissions remain queued.",
                self.config.remote.base_url
            );
            return Ok(());
        }

        self.recover()?;
        let cancel = CancellationToken::new();
        let on_interrupt = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                on_interrupt.cancel();
            }
        });

        let report = self.engine.run_sync_pass(&cancel).await?;
        if cmd.json {
            println!("{}", serde_json::to_string_pretty(&report)?);
        } else {
            print_report(&report);
        }
        Ok(())
    }

    async fn daemon(&self) -> anyhow::Result<()> {
        self.recover()?;
        let shutdown = CancellationToken::new();
        let connectivity = Connectivity::default();

        let probe: Arc<dyn ConnectivityProbe> = self.remote.clone();
        let monitor = ConnectivityMonitor::new(probe, self.config.poll_interval());
        let monitor_task = tokio::spawn(monitor.run(connectivity.clone(), shutdown.clone()));

        let engine = self.engine.clone();
        let trigger = Arc::clone(&self.trigger);
        let engine_shutdown = shutdown.clone();
        let engine_task =
            tokio::spawn(async move { engine.run(connectivity, trigger, engine_shutdown).await });

        info!(
            "Syncing with {} every {:?}; press Ctrl-C to stop",
            self.config.remote.base_url,
            self.config.poll_interval()
        );
        tokio::signal::ctrl_c()
            .await
            .context("failed to listen for Ctrl-C")?;
        info!("Shutting down; waiting for uploads in flight");
        shutdown.cancel();

        for (name, task) in [("monitor", monitor_task), ("sync engine", engine_task)] {
            if let Err(e) = task.await {
                warn!("{name} task ended abnormally: {e}");
            }
        }

        let counts = self.store.counts()?;
        println!(
            "Stopped. {} synced, {} still queued.",
            counts.synced,
            counts.unsynced()
        );
        Ok(())
    }

    fn retry(&self, id: &str) -> anyhow::Result<()> {
        let record = self.resolve(id)?;
        let record = self.queue.retry(&record.local_id)?;
        println!(
            "Submission {} will be uploaded on the next sync.",
            short_id(&record.local_id)
        );
        Ok(())
    }

    fn amend(&self, cmd: &AmendCommand) -> anyhow::Result<()> {
        let record = self.resolve(&cmd.id)?;
        let raw = cmd.fields.overlay(RawSubmission::from(&record));
        let amended = self.queue.amend(&record.local_id, &raw)?;
        println!(
            "Submission {} updated and will be uploaded on the next sync.",
            short_id(&amended.local_id)
        );
        Ok(())
    }

    fn purge(&self, cmd: &PurgeCommand) -> anyhow::Result<()> {
        let synced = self.store.counts()?.synced;
        if synced == 0 {
            println!("No synced submissions to delete.");
            return Ok(());
        }
        if !cmd.yes {
            println!("This will delete {synced} synced submissions from this device.");
            println!("Use --yes to confirm.");
            return Ok(());
        }
        let removed = self.queue.purge_synced()?;
        println!("Deleted {removed} synced submissions.");
        Ok(())
    }

    fn receipt(&self, cmd: &ReceiptCommand) -> anyhow::Result<()> {
        let record = self.resolve(&cmd.id)?;
        let receipt = Receipt::for_record(&record);

        if cmd.json {
            println!("{}", receipt.to_json()?);
        } else if let Some(path) = &cmd.svg {
            std::fs::write(path, receipt.render_svg()?)
                .with_context(|| format!("failed to write {}", path.display()))?;
            println!("Wrote receipt to {}", path.display());
        } else {
            print!("{}", receipt.render_terminal()?);
            println!();
            println!("{} - {}", receipt.herb_name, receipt.url);
        }
        Ok(())
    }
}

fn print_status(status: &QueueStatus, config: &Config) {
    println!("herblink status");
    println!("---------------");
    println!(
        "Service:       {} ({})",
        config.remote.base_url,
        if status.online { "reachable" } else { "unreachable" }
    );
    println!("Database:      {}", config.database_path().display());
    println!("Pending:       {}", status.pending);
    println!("Syncing:       {}", status.syncing);
    println!("Failed:        {}", status.failed);
    println!("Synced:        {}", status.synced);
    println!(
        "Last sync:     {}",
        status
            .last_sync_attempt_at
            .map_or_else(|| "never".to_string(), |at| at.to_string())
    );

    if !status.failures.is_empty() {
        println!();
        println!("Failures:");
        for failure in &status.failures {
            let kind = failure
                .failure_kind
                .map_or_else(|| "failed".to_string(), |k| k.to_string());
            println!(
                "  {}  {:<20}  {kind}: {}",
                short_id(&failure.local_id),
                truncate(&failure.herb_name, 20),
                failure.last_error.as_deref().unwrap_or("-")
            );
        }
    }
}

fn print_report(report: &SyncReport) {
    if report.attempted == 0 && report.cancelled == 0 {
        println!("Nothing to sync.");
        return;
    }
    println!(
        "Synced {} of {} attempted ({} rejected, {} will retry).",
        report.synced, report.attempted, report.rejected, report.transient
    );
    if report.cancelled > 0 {
        println!("{} submissions were not started.", report.cancelled);
    }
    if report.errors > 0 {
        println!("{} uploads could not be recorded; see the log.", report.errors);
    }
}

fn handle_config(config_path: Option<PathBuf>, cmd: ConfigCommand) -> anyhow::Result<()> {
    match cmd {
        ConfigCommand::Show { json } => {
            let config = Config::load_from(config_path)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&config)?);
            } else {
                println!("Current Configuration");
                println!("=====================");
                println!();
                println!("[Storage]");
                println!("  Database path:      {}", config.database_path().display());
                println!("  Remove synced:      {}", config.storage.remove_synced);
                println!();
                println!("[Remote]");
                println!("  Base URL:           {}", config.remote.base_url);
                println!("  Submit path:        {}", config.remote.submit_path);
                println!("  Health path:        {}", config.remote.health_path);
                println!(
                    "  Request timeout:    {}s",
                    config.remote.request_timeout_secs
                );
                println!();
                println!("[Sync]");
                println!("  Max in flight:      {}", config.sync.max_in_flight);
                println!("  Poll interval:      {}s", config.sync.poll_interval_secs);
                println!(
                    "  Backoff:            {}ms base, {}ms cap, {} jitter",
                    config.sync.backoff_base_ms,
                    config.sync.backoff_cap_ms,
                    config.sync.backoff_jitter
                );
                println!(
                    "  Max attempts:       {}",
                    if config.sync.max_attempts == 0 {
                        "unlimited".to_string()
                    } else {
                        config.sync.max_attempts.to_string()
                    }
                );
            }
        }
        ConfigCommand::Path => {
            println!("{}", Config::default_config_path().display());
        }
        ConfigCommand::Validate { file } => {
            let path = file
                .or(config_path)
                .unwrap_or_else(Config::default_config_path);
            println!("Validating configuration: {}", path.display());
            match Config::load_from(Some(path)) {
                Ok(_) => println!("Configuration is valid."),
                Err(e) => bail!("configuration error: {e}"),
            }
        }
    }
    Ok(())
}

fn short_id(local_id: &str) -> &str {
    local_id.get(..8).unwrap_or(local_id)
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let mut cut: String = text.chars().take(max_chars - 1).collect();
        cut.push('…');
        cut
    }
}

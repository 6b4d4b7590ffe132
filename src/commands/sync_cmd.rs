//! Sync CLI commands for synchronizing with the server.

use std::time::Duration;

use clap::{Args, Subcommand};

use stitchbook::clock::format_millis;
use stitchbook::config::Config;
use stitchbook::db::{Store, StoreError};
use stitchbook::sync::{
    checkpoint, ConnectivityMonitor, HttpTransport, RoundReport, SyncEngine, SyncError,
    SyncScheduler, Transport,
};
use stitchbook::Workshop;

/// How often `sync watch` checks that the server is reachable.
const PROBE_INTERVAL: Duration = Duration::from_secs(30);

/// Sync with remote server
#[derive(Debug, Args)]
pub struct SyncCommand {
    #[command(subcommand)]
    command: Option<SyncSubcommand>,
}

#[derive(Debug, Subcommand)]
enum SyncSubcommand {
    /// Show sync configuration, pending changes and server status
    Status,

    /// Keep syncing in the background until interrupted (Ctrl-C)
    Watch,
}

impl SyncCommand {
    pub async fn run(&self, workshop: &Workshop, config: &Config) -> Result<(), SyncCommandError> {
        match &self.command {
            None => self.sync(workshop, config).await,
            Some(SyncSubcommand::Status) => self.status(workshop, config).await,
            Some(SyncSubcommand::Watch) => self.watch(workshop, config).await,
        }
    }

    async fn sync(&self, workshop: &Workshop, config: &Config) -> Result<(), SyncCommandError> {
        let scheduler = scheduler(workshop, config).await?;

        println!("Syncing with server...");
        match scheduler.sync_now().await? {
            Some(report) => print_report(&report),
            None => println!("A sync is already running for this account. Try again shortly."),
        }
        Ok(())
    }

    async fn status(&self, workshop: &Workshop, config: &Config) -> Result<(), SyncCommandError> {
        println!("Sync Configuration");
        println!("==================");
        println!();

        let pending = workshop.pending_changes().await?;
        let (last_synced_at, last_error) = {
            let mut conn = workshop.store().pool().acquire().await.map_err(StoreError::from)?;
            (
                checkpoint::last_synced_at(&mut conn).await?,
                checkpoint::last_error(&mut conn).await?,
            )
        };

        println!("Owner:         {}", workshop.owner_id());
        println!(
            "Pending:       {} change(s) ({} edited, {} deleted)",
            pending.total(),
            pending.dirty,
            pending.deleted
        );
        match last_synced_at {
            Some(ts) => println!("Last synced:   {}", format_millis(ts)),
            None => println!("Last synced:   never"),
        }
        if let Some(error) = &last_error {
            println!("Last error:    {}", error);
        }
        println!();

        let (Some(server_url), Some(api_key)) = (&config.sync.server_url, &config.sync.api_key)
        else {
            println!("Status: Not configured");
            println!();
            println!("To enable sync, add to your config file:");
            println!();
            println!("  sync:");
            println!("    server_url: \"http://localhost:8080\"");
            println!("    api_key: \"your-api-key\"");
            println!("    auto_sync: false");
            println!();
            println!("Or set environment variables:");
            println!("  STITCHBOOK_SYNC_URL");
            println!("  STITCHBOOK_SYNC_API_KEY");
            return Ok(());
        };

        println!("Server:    {}", server_url);
        println!("API Key:   {}...", api_key.chars().take(8).collect::<String>());
        println!(
            "Auto-sync: {}",
            if config.sync.auto_sync {
                "enabled"
            } else {
                "disabled"
            }
        );
        println!("Interval:  {}s", config.sync.interval_secs);
        println!();

        print!("Server status: ");
        let transport = HttpTransport::from_config(&config.sync)?;
        if transport.ping().await {
            println!("✓ connected");
        } else {
            println!("✗ unreachable");
        }

        Ok(())
    }

    async fn watch(&self, workshop: &Workshop, config: &Config) -> Result<(), SyncCommandError> {
        let scheduler = scheduler(workshop, config).await?;
        let connectivity = scheduler.connectivity();

        let probe = tokio::spawn(
            connectivity.probe(scheduler.engine().transport().clone(), PROBE_INTERVAL),
        );

        let mut phases = scheduler.engine().phases();
        let phase_log = tokio::spawn(async move {
            while phases.changed().await.is_ok() {
                let phase = *phases.borrow_and_update();
                tracing::debug!(%phase, "Sync phase");
            }
        });

        let mut states = scheduler.subscribe();
        let reporter = tokio::spawn(async move {
            while states.changed().await.is_ok() {
                let state = states.borrow_and_update().clone();
                if state.is_syncing {
                    continue;
                }
                match (&state.last_error, state.last_synced_at) {
                    (Some(error), _) => println!("Sync failed: {}", error),
                    (None, Some(ts)) => println!("Synced up to {}", format_millis(ts)),
                    (None, None) => {}
                }
            }
        });

        println!(
            "Watching for changes every {}s. Press Ctrl-C to stop.",
            config.sync.interval_secs
        );
        scheduler
            .run(async {
                let _ = tokio::signal::ctrl_c().await;
            })
            .await;

        probe.abort();
        phase_log.abort();
        reporter.abort();
        println!("Stopped.");
        Ok(())
    }
}

async fn scheduler(
    workshop: &Workshop,
    config: &Config,
) -> Result<SyncScheduler<HttpTransport>, SyncCommandError> {
    let transport = HttpTransport::from_config(&config.sync)?;
    let engine = SyncEngine::new(workshop.store().clone(), transport, workshop.owner_id());
    let scheduler =
        SyncScheduler::new(engine, ConnectivityMonitor::default(), config.sync.interval()).await?;
    Ok(scheduler)
}

/// Runs one round after a write command when `sync.auto_sync` is on.
///
/// Failures are reported as a warning; the write itself already succeeded.
pub async fn auto_sync(store: &Store, config: &Config) {
    if !config.sync.auto_sync || !config.sync.is_configured() {
        return;
    }

    let result: Result<RoundReport, SyncError> = async {
        let transport = HttpTransport::from_config(&config.sync)?;
        let engine = SyncEngine::new(store.clone(), transport, config.owner_id.value.clone());
        engine.run_round().await
    }
    .await;

    match result {
        Ok(report) => tracing::debug!(?report, "Auto-sync complete"),
        Err(e) if e.is_benign() => {}
        Err(e) => eprintln!("Warning: auto-sync failed: {}", e),
    }
}

fn print_report(report: &RoundReport) {
    println!();
    println!("  ✓ pushed {} change(s)", report.pushed);
    if report.pushed > report.confirmed + report.purged {
        println!(
            "  ! {} change(s) were edited during sync and will be sent next time",
            report.pushed - report.confirmed - report.purged
        );
    }
    println!("  ✓ received {} change(s)", report.applied + report.removed);
    if report.skipped > 0 {
        println!("  - kept {} newer local record(s)", report.skipped);
    }
    println!();
    println!("Sync complete. Up to date as of {}.", format_millis(report.checkpoint));
}

/// Errors from sync commands
#[derive(Debug)]
pub enum SyncCommandError {
    SyncError(SyncError),
    StoreError(StoreError),
}

impl std::fmt::Display for SyncCommandError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncCommandError::SyncError(e) => write!(f, "{}", e),
            SyncCommandError::StoreError(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for SyncCommandError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SyncCommandError::SyncError(e) => Some(e),
            SyncCommandError::StoreError(e) => Some(e),
        }
    }
}

impl From<SyncError> for SyncCommandError {
    fn from(e: SyncError) -> Self {
        SyncCommandError::SyncError(e)
    }
}

impl From<StoreError> for SyncCommandError {
    fn from(e: StoreError) -> Self {
        SyncCommandError::StoreError(e)
    }
}

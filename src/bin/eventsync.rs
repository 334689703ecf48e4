/**
 * eventsync operator tool
 *
 * Inspects and drives a device's local sync store:
 *   eventsync [--config <file>] [--db <file>] status
 *   eventsync [--config <file>] [--db <file>] sync
 *   eventsync [--config <file>] [--db <file>] purge
 *   eventsync [--config <file>] [--db <file>] watch
 */

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};

use eventsync::client::local_db::Store;
use eventsync::client::offline::ReplayOutcome;
use eventsync::client::sync::{ConnectivitySource, HttpProbe};
use eventsync::client::{Config, HttpRemote, LocalDatabase, NetworkMonitor, SyncCoordinator};

/// Offline-first sync store operator tool
#[derive(Debug, Parser)]
#[command(name = "eventsync", version, about = "Inspect and drive the local sync store")]
struct Cli {
    /// TOML config file; EVENTSYNC_* environment variables when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Local database file, overriding the configured location
    #[arg(long)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Subcommand)]
enum Command {
    /// Show queue, cache and sync status
    Status,
    /// Probe the remote once and replay the queue
    Sync,
    /// Evict expired cache rows and purge failed operations
    Purge,
    /// Keep probing connectivity and replay on every reconnect until interrupted
    Watch,
}

#[tokio::main]
async fn main() -> ExitCode {
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(&env_filter))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("{e}");
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode, Box<dyn std::error::Error>> {
    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::from_env()?,
    };
    if let Some(db) = cli.db {
        config.set_db_path(db);
    }

    let db = Arc::new(LocalDatabase::open(config.db_path()).await?);
    tracing::debug!(path = %config.db_path().display(), "using local store");

    let monitor = NetworkMonitor::new();
    let coordinator = Arc::new(SyncCoordinator::new(
        db.clone(),
        Arc::new(HttpRemote::new(&config)?),
        monitor.clone(),
        config.sync().clone(),
    ));

    match cli.command {
        Command::Status => {
            let stats = coordinator.queue_stats().await?;
            let status = db.get_sync_status().await?;
            let preferences = db.get_preferences().await?;
            let db_stats = db.get_stats().await?;

            println!("database:      {}", config.db_path().display());
            println!("remote:        {}", config.server_url());
            println!("cached:        {}", db_stats.cached_records);
            println!(
                "queue:         {} total ({} pending, {} processing, {} failed)",
                stats.total_operations, stats.pending, stats.processing, stats.failed
            );
            match status.last_sync {
                Some(at) => println!("last sync:     {}", at.to_rfc3339()),
                None => println!("last sync:     never"),
            }
            println!("in progress:   {}", status.in_progress);
            println!("auto-sync:     {}", preferences.auto_sync && config.sync().auto_sync);
            Ok(ExitCode::SUCCESS)
        }
        Command::Sync => {
            let probe = HttpProbe::new(config.health_url(), config.request_timeout())?;
            let connectivity = probe.check().await;
            monitor.apply(connectivity);
            tracing::info!(online = connectivity.is_online, quality = ?connectivity.quality, "probed remote");

            match coordinator.sync_now().await? {
                ReplayOutcome::Offline => {
                    println!("remote unreachable at {}; nothing replayed", config.health_url());
                    Ok(ExitCode::FAILURE)
                }
                ReplayOutcome::AlreadyRunning => {
                    println!("a replay is already running");
                    Ok(ExitCode::SUCCESS)
                }
                ReplayOutcome::Completed(report) => {
                    println!(
                        "replayed {} ({} ok, {} retry later, {} abandoned, {} failed, {} purged)",
                        report.attempted,
                        report.succeeded,
                        report.retried,
                        report.abandoned,
                        report.failed,
                        report.purged
                    );
                    Ok(if report.is_clean() {
                        ExitCode::SUCCESS
                    } else {
                        ExitCode::FAILURE
                    })
                }
            }
        }
        Command::Purge => {
            let report = coordinator.run_maintenance().await?;
            println!(
                "evicted {} expired records, purged {} failed operations",
                report.evicted, report.purged
            );
            Ok(ExitCode::SUCCESS)
        }
        Command::Watch => {
            let probe = HttpProbe::new(config.health_url(), config.request_timeout())?;
            let interval = config.sync().probe_interval;

            // subscribe before the first reading so the initial reconnect replays
            let auto_sync = coordinator.spawn_auto_sync();
            let watcher = monitor.spawn_watch(Arc::new(probe), interval);
            tracing::info!(
                url = %config.health_url(),
                interval_ms = interval.as_millis() as u64,
                "watching connectivity"
            );

            tokio::signal::ctrl_c().await?;
            tracing::info!("interrupted; stopping");
            coordinator.cancel_replay();
            watcher.abort();
            auto_sync.abort();
            Ok(ExitCode::SUCCESS)
        }
    }
}

//! Outpost sync daemon.
//!
//! Imports one identity's events from public relays into local outbox and
//! inbox databases, then optionally follows the inbox live.
//!
//! # Usage
//!
//! ```bash
//! # Historical import: owner notes window by window, then tagged inbox notes
//! outpost-sync --owner-npub npub1... --import-start-date 2023-06-01 import
//!
//! # Follow the inbox until Ctrl+C
//! outpost-sync --owner-npub npub1... --trust-file ./trusted.txt live
//!
//! # Same, configured from .env / environment
//! OWNER_NPUB=npub1... IMPORT_START_DATE=2023-06-01 outpost-sync import
//! ```
//!
//! # Graceful Shutdown
//!
//! SIGINT (Ctrl+C) and SIGTERM clear the running flag. The backfill stops
//! after its current window, the tagged merge within a second, live sync
//! after the event in hand, and both
//! databases are flushed before exit.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use outpost_core::metrics::{init_metrics, start_metrics_server};
use outpost_sync::{
    BackfillScheduler, EventSource, EventStore, ImportCounters, InboxPipeline, LiveSync,
    MemoryEventStore, Partition, RelayPoolSource, RocksEventStore, SyncArgs, SyncConfig,
    TaggedMerge, TrustOracle, TrustSet,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing_subscriber::EnvFilter;

/// Outpost sync daemon.
#[derive(Parser, Debug)]
#[command(name = "outpost-sync")]
#[command(about = "Sync an identity's Nostr outbox and inbox into local stores")]
#[command(version)]
struct Cli {
    #[command(flatten)]
    sync: SyncArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, Clone, Copy)]
enum Command {
    /// Backfill the outbox from the start date, then merge tagged inbox events
    Import,
    /// Follow the inbox live until interrupted
    Live,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Install rustls crypto provider (required when both ring and aws-lc-rs are present)
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    // A missing .env is fine; anything in it feeds the clap env fallbacks
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("info".parse().unwrap())
                .add_directive("outpost_sync=debug".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();
    let config = SyncConfig::from_args(cli.sync).context("Invalid configuration")?;
    // Checked up front so a missing date fails before we touch the network
    let start_date = match cli.command {
        Command::Import => Some(config.require_start_date()?),
        Command::Live => None,
    };

    tracing::info!("Outpost sync starting ({:?})...", cli.command);

    if config.metrics_port > 0 {
        let metrics_handle = init_metrics();
        start_metrics_server(config.metrics_port, metrics_handle).await?;
    }

    // Set up graceful shutdown
    let running = Arc::new(AtomicBool::new(true));
    let running_clone = Arc::clone(&running);

    ctrlc::set_handler(move || {
        tracing::info!("Shutdown signal received, stopping gracefully...");
        running_clone.store(false, Ordering::SeqCst);
    })
    .context("Failed to set Ctrl+C handler")?;

    let (outbox, inbox) = open_stores(&config)?;
    let trust = load_trust(&config)?;

    tracing::info!("Configuration:");
    tracing::info!("  Owner keys: {}", config.owner.len());
    tracing::info!("  Seed relays: {}", config.relay.seed_relays.join(", "));
    tracing::info!(
        "  Data dir: {}{}",
        config.data_dir.display(),
        if config.dry_run { " (dry run)" } else { "" }
    );
    tracing::info!(
        "  Trust file: {}",
        config
            .trust_file()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "none (owner only)".to_string())
    );

    let relay_source = Arc::new(RelayPoolSource::new(config.relay.clone()));
    relay_source
        .connect()
        .await
        .context("Failed to connect to seed relays")?;
    let source: Arc<dyn EventSource> = relay_source.clone();

    let counters = Arc::new(ImportCounters::new());
    let pipeline = InboxPipeline::new(
        config.owner.clone(),
        trust,
        Arc::clone(&inbox),
        Arc::clone(&counters),
    );

    match start_date {
        Some(start) => {
            let backfill = BackfillScheduler::new(
                config.backfill.clone(),
                config.owner.clone(),
                Arc::clone(&source),
                Arc::clone(&outbox),
                Arc::clone(&counters),
            )
            .with_running_flag(Arc::clone(&running));
            let backfill_stats = backfill.run(start).await?;

            let merge_stats = if running.load(Ordering::SeqCst) {
                let merge = TaggedMerge::new(config.merge.clone(), pipeline, Arc::clone(&source))
                    .with_running_flag(Arc::clone(&running));
                Some(merge.run().await?)
            } else {
                tracing::info!("Skipping tagged merge after shutdown request");
                None
            };

            tracing::info!("═══════════════════════════════════════════════════════");
            tracing::info!("IMPORT COMPLETE");
            tracing::info!("═══════════════════════════════════════════════════════");
            tracing::info!(
                "Windows:              {} ({} partial)",
                backfill_stats.windows,
                backfill_stats.windows_partial
            );
            tracing::info!("Owner notes stored:   {}", counters.owner_imported());
            tracing::info!("Tagged notes stored:  {}", counters.tagged_imported());
            if let Some(stats) = &merge_stats {
                tracing::info!(
                    "Tagged rejected:      {} untrusted, {} untagged",
                    stats.rejected_untrusted,
                    stats.rejected_untagged
                );
            }
            tracing::info!(
                "Publish failures:     {}",
                backfill_stats.publish_failures
                    + merge_stats.as_ref().map_or(0, |s| s.publish_failures)
            );
        }
        None => {
            let live = LiveSync::new(config.live.clone(), pipeline, Arc::clone(&source))
                .with_running_flag(Arc::clone(&running));
            let stats = live.run().await?;

            tracing::info!("═══════════════════════════════════════════════════════");
            tracing::info!("SHUTDOWN COMPLETE");
            tracing::info!("═══════════════════════════════════════════════════════");
            tracing::info!("Events received:      {}", stats.events_received);
            tracing::info!("Events stored:        {}", stats.events_stored);
            tracing::info!("Notifications:        {}", stats.notifications);
            tracing::info!("Resubscribes:         {}", stats.resubscribes);
        }
    }

    tracing::info!("Shutting down...");
    relay_source.shutdown().await;
    outbox.flush().context("Failed to flush outbox")?;
    inbox.flush().context("Failed to flush inbox")?;

    Ok(())
}

/// Open the outbox and inbox stores (in memory for a dry run).
fn open_stores(config: &SyncConfig) -> Result<(Arc<dyn EventStore>, Arc<dyn EventStore>)> {
    if config.dry_run {
        return Ok((
            Arc::new(MemoryEventStore::new(Partition::Outbox)),
            Arc::new(MemoryEventStore::new(Partition::Inbox)),
        ));
    }

    let outbox_path = config.outbox_path();
    let inbox_path = config.inbox_path();
    let outbox = RocksEventStore::open(&outbox_path, Partition::Outbox)
        .with_context(|| format!("Failed to open outbox at {:?}", outbox_path))?;
    let inbox = RocksEventStore::open(&inbox_path, Partition::Inbox)
        .with_context(|| format!("Failed to open inbox at {:?}", inbox_path))?;

    tracing::info!(
        "Stores opened: outbox ~{} events, inbox ~{} events",
        outbox.count().unwrap_or(0),
        inbox.count().unwrap_or(0)
    );
    Ok((Arc::new(outbox), Arc::new(inbox)))
}

/// Load the trust file, or trust only the owner when none is configured.
fn load_trust(config: &SyncConfig) -> Result<Arc<dyn TrustOracle>> {
    let trust = match config.trust_file() {
        Some(path) => TrustSet::load(path)
            .with_context(|| format!("Failed to load trust file {}", path.display()))?,
        None => TrustSet::owner_only(&config.owner),
    };
    Ok(Arc::new(trust))
}

//! Command-line and environment configuration.
//!
//! Every option can come from a flag or an environment variable; the binary
//! loads a `.env` file first, so a checked-out deployment can keep its
//! identity and relays there.
//!
//! # Environment
//!
//! - `OWNER_NPUB`: comma-separated owner identities (npub or hex), required
//! - `IMPORT_START_DATE`: first day of the outbox backfill, `YYYY-MM-DD`
//! - `IMPORT_SEED_RELAYS`: comma-separated relay URLs
//! - `TRUST_FILE`: file of trusted pubkeys, one per line
//! - `OUTPOST_DATA_DIR`: root for the outbox and inbox databases
//! - `METRICS_PORT`: Prometheus port, 0 disables

use crate::engine::{BackfillConfig, LiveConfig, MergeConfig};
use crate::source::RelayConfig;
use crate::source::url::normalize_seed_relays;
use crate::{Error, Result};
use clap::Args;
use outpost_core::nostr::Timestamp;
use outpost_core::{OwnerKeys, parse_start_date};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Options shared by every subcommand.
#[derive(Args, Debug, Clone)]
pub struct SyncArgs {
    /// Owner identities (npub or hex, comma-separated)
    #[arg(long = "owner-npub", env = "OWNER_NPUB", value_delimiter = ',', required = true)]
    pub owner_npubs: Vec<String>,

    /// First day of the outbox backfill (YYYY-MM-DD)
    #[arg(long, env = "IMPORT_START_DATE")]
    pub import_start_date: Option<String>,

    /// Relays to import from (comma-separated, overrides defaults)
    #[arg(long, env = "IMPORT_SEED_RELAYS", value_delimiter = ',')]
    pub seed_relays: Option<Vec<String>>,

    /// File of trusted pubkeys; without it only the owner is trusted
    #[arg(long, env = "TRUST_FILE")]
    pub trust_file: Option<PathBuf>,

    /// Data directory (outbox and inbox databases live under it)
    #[arg(long, env = "OUTPOST_DATA_DIR", default_value = "./data")]
    pub data_dir: PathBuf,

    /// Backfill window span in hours
    #[arg(long, default_value = "240")]
    pub window_span_hours: u64,

    /// Deadline for each backfill window fetch, in seconds
    #[arg(long, default_value = "5")]
    pub window_timeout_secs: u64,

    /// Pause between backfill windows, in seconds
    #[arg(long, default_value = "5")]
    pub window_pause_secs: u64,

    /// Deadline for the whole tagged inbox merge, in seconds
    #[arg(long, default_value = "120")]
    pub merge_timeout_secs: u64,

    /// How far back the live subscription reaches, in seconds
    #[arg(long, default_value = "300")]
    pub live_overlap_secs: u64,

    /// Metrics HTTP server port (0 to disable)
    #[arg(long, env = "METRICS_PORT", default_value = "9090")]
    pub metrics_port: u16,

    /// Keep events in memory instead of writing the databases
    #[arg(long)]
    pub dry_run: bool,
}

/// Validated configuration.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub owner: OwnerKeys,
    /// Backfill start, when one was given.
    pub start_date: Option<Timestamp>,
    pub relay: RelayConfig,
    pub trust_file: Option<PathBuf>,
    pub data_dir: PathBuf,
    pub backfill: BackfillConfig,
    pub merge: MergeConfig,
    pub live: LiveConfig,
    pub metrics_port: u16,
    pub dry_run: bool,
}

impl SyncConfig {
    /// Validate raw arguments. Every problem is reported here, before any
    /// connection is opened.
    pub fn from_args(args: SyncArgs) -> Result<Self> {
        let owner = OwnerKeys::parse(&args.owner_npubs)?;

        let start_date = args
            .import_start_date
            .as_deref()
            .map(parse_start_date)
            .transpose()?;

        let relay_defaults = RelayConfig::default();
        let seed_relays = match args.seed_relays {
            Some(urls) => normalize_seed_relays(urls)?,
            None => relay_defaults.seed_relays.clone(),
        };

        if args.window_span_hours == 0 {
            return Err(Error::Config(
                "window span must be at least one hour".to_string(),
            ));
        }
        let span_secs = args
            .window_span_hours
            .checked_mul(3600)
            .ok_or_else(|| Error::Config("window span is too large".to_string()))?;

        Ok(Self {
            owner,
            start_date,
            relay: RelayConfig {
                seed_relays,
                ..relay_defaults
            },
            trust_file: args.trust_file,
            data_dir: args.data_dir,
            backfill: BackfillConfig {
                span: Duration::from_secs(span_secs),
                window_timeout: Duration::from_secs(args.window_timeout_secs),
                pause: Duration::from_secs(args.window_pause_secs),
            },
            merge: MergeConfig {
                timeout: Duration::from_secs(args.merge_timeout_secs),
            },
            live: LiveConfig {
                overlap: Duration::from_secs(args.live_overlap_secs),
                ..Default::default()
            },
            metrics_port: args.metrics_port,
            dry_run: args.dry_run,
        })
    }

    /// The backfill start date, required by `import`.
    pub fn require_start_date(&self) -> Result<Timestamp> {
        self.start_date.ok_or_else(|| {
            Error::Config("IMPORT_START_DATE (--import-start-date) is required".to_string())
        })
    }

    pub fn outbox_path(&self) -> PathBuf {
        self.data_dir.join("outbox")
    }

    pub fn inbox_path(&self) -> PathBuf {
        self.data_dir.join("inbox")
    }

    pub fn trust_file(&self) -> Option<&Path> {
        self.trust_file.as_deref()
    }
}

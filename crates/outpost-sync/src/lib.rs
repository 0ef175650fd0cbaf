//! Outpost sync engines.
//!
//! This crate keeps a local copy of one identity's corner of Nostr in two
//! partitions:
//!
//! - **outbox**: events the owner authored, imported window by window
//! - **inbox**: events from trusted authors that tag the owner, imported
//!   once in bulk and then followed live
//!
//! # Modules
//!
//! - [`engine`] - Backfill, tagged merge and live sync loops
//! - [`source`] - Event sources (nostr-sdk relay pool, in-memory)
//! - [`store`] - Event stores (RocksDB, in-memory)
//! - [`trust`] - Trust oracle and the refreshable trust set
//! - [`config`] - CLI / environment configuration
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │  Seed relays    │  nostr-sdk pool, signatures verified
//! └────────┬────────┘
//!          │ Subscription (one merged stream)
//!          ▼
//! ┌─────────────────┐      ┌──────────────┐
//! │  Sync engines   │ ◀─── │  TrustSet    │
//! └────────┬────────┘      └──────────────┘
//!          │ publish (idempotent per event ID)
//!          ▼
//! ┌─────────────────┐
//! │ outbox / inbox  │  RocksDB, one database per partition
//! └─────────────────┘
//! ```

pub mod config;
pub mod counters;
pub mod engine;
pub mod error;
pub mod source;
pub mod store;
pub mod trust;

// Re-export commonly used types at crate root
pub use error::{Error, Result};

pub use config::{SyncArgs, SyncConfig};
pub use counters::ImportCounters;

pub use engine::{
    BackfillConfig, BackfillScheduler, BackfillStats, InboxPipeline, LiveConfig, LiveStats,
    LiveSync, MergeConfig, MergeStats, TaggedMerge,
};

pub use source::{
    Envelope, EventSource, FetchMode, MemorySource, RelayConfig, RelayPoolSource, Subscription,
};

pub use store::{EventStore, MemoryEventStore, Partition, PublishStatus, RocksEventStore};

pub use trust::{TrustOracle, TrustSet};

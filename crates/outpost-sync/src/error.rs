//! Error types for the sync engines.

use thiserror::Error;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while syncing.
///
/// Only [`Error::Config`] (and errors from [`outpost_core`]) abort a run.
/// Everything else is absorbed per event or per window by the engines and
/// reflected in their stats.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error: bad date, identity, relay URL or trust file.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Filter, window or identity error from the core types.
    #[error(transparent)]
    Core(#[from] outpost_core::Error),

    /// RocksDB error.
    #[error("RocksDB error: {0}")]
    RocksDb(#[from] rocksdb::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Nostr SDK client error.
    #[error("Nostr SDK error: {0}")]
    NostrSdk(#[from] nostr_sdk::client::Error),

    /// Event (de)serialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Publishing one event to a store failed.
    #[error("Failed to publish event {event_id} to {partition}: {reason}")]
    Publish {
        /// Store partition the event was headed for.
        partition: &'static str,
        /// Hex event ID.
        event_id: String,
        /// Underlying failure.
        reason: String,
    },

    /// The event source could not open or feed a subscription.
    #[error("Event source error: {0}")]
    Source(String),

    /// A fetch deadline elapsed.
    #[error("Timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// The live stream closed while the engine was still running.
    #[error("Stream closed unexpectedly")]
    StreamClosed,
}

impl Error {
    /// Whether this error is a network condition the engines retry or skip.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::NostrSdk(_) | Self::Source(_) | Self::Timeout(_) | Self::StreamClosed
        )
    }
}

//! Durable event stores for the outbox and inbox partitions.
//!
//! Both partitions implement [`EventStore`]. Publishing is idempotent per
//! event ID: a second publish of the same event reports
//! [`PublishStatus::Duplicate`] and leaves the store unchanged, which is what
//! makes redelivery across relays and across engines harmless.
//!
//! # Available Stores
//!
//! - [`RocksEventStore`] - RocksDB-backed, one database per partition
//! - [`MemoryEventStore`] - In-memory map, for tests and dry runs

mod memory;
mod rocks;

pub use memory::MemoryEventStore;
pub use rocks::RocksEventStore;

use crate::Result;
use outpost_core::SyncFilter;
use outpost_core::nostr::Event;
use std::fmt;

/// Which local partition a store holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Partition {
    /// Events authored by the owner.
    Outbox,
    /// Events from trusted authors that reference the owner.
    Inbox,
}

impl Partition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Outbox => "outbox",
            Self::Inbox => "inbox",
        }
    }
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a successful publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishStatus {
    /// The event was new and has been written.
    Stored,
    /// An event with this ID was already present; nothing was written.
    Duplicate,
}

/// A key-indexed, append-only event store.
///
/// Implementations must be safe to share across engines (`Send + Sync`) and
/// each publish must be all-or-nothing for its one event.
pub trait EventStore: Send + Sync {
    /// Partition this store holds (used in logs and metric labels).
    fn partition(&self) -> Partition;

    /// Store an event unless one with the same ID is already present.
    fn publish(&self, event: &Event) -> Result<PublishStatus>;

    /// Return stored events matching the filter, oldest first.
    fn query(&self, filter: &SyncFilter, limit: Option<usize>) -> Result<Vec<Event>>;

    /// Approximate number of stored events.
    fn count(&self) -> Result<u64>;

    /// Flush pending writes to durable storage.
    fn flush(&self) -> Result<()> {
        Ok(())
    }
}

impl<T: EventStore + ?Sized> EventStore for std::sync::Arc<T> {
    fn partition(&self) -> Partition {
        (**self).partition()
    }

    fn publish(&self, event: &Event) -> Result<PublishStatus> {
        (**self).publish(event)
    }

    fn query(&self, filter: &SyncFilter, limit: Option<usize>) -> Result<Vec<Event>> {
        (**self).query(filter, limit)
    }

    fn count(&self) -> Result<u64> {
        (**self).count()
    }

    fn flush(&self) -> Result<()> {
        (**self).flush()
    }
}

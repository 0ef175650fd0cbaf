//! In-memory event store.

use super::{EventStore, Partition, PublishStatus};
use crate::Result;
use outpost_core::SyncFilter;
use outpost_core::nostr::{Event, EventId};
use parking_lot::RwLock;
use std::collections::HashMap;

/// Event store backed by a `HashMap`, keyed by event ID.
///
/// Nothing is persisted. Used by tests and by `--dry-run`.
pub struct MemoryEventStore {
    partition: Partition,
    events: RwLock<HashMap<EventId, Event>>,
}

impl MemoryEventStore {
    pub fn new(partition: Partition) -> Self {
        Self {
            partition,
            events: RwLock::new(HashMap::new()),
        }
    }

    /// Whether an event with this ID is stored.
    pub fn contains(&self, id: &EventId) -> bool {
        self.events.read().contains_key(id)
    }

    /// Snapshot of every stored event, oldest first.
    pub fn events(&self) -> Vec<Event> {
        let mut events: Vec<Event> = self.events.read().values().cloned().collect();
        events.sort_by_key(|e| (e.created_at, e.id));
        events
    }
}

impl EventStore for MemoryEventStore {
    fn partition(&self) -> Partition {
        self.partition
    }

    fn publish(&self, event: &Event) -> Result<PublishStatus> {
        let mut events = self.events.write();
        if events.contains_key(&event.id) {
            return Ok(PublishStatus::Duplicate);
        }
        events.insert(event.id, event.clone());
        Ok(PublishStatus::Stored)
    }

    fn query(&self, filter: &SyncFilter, limit: Option<usize>) -> Result<Vec<Event>> {
        let mut matched: Vec<Event> = self
            .events()
            .into_iter()
            .filter(|e| filter.matches(e))
            .collect();
        if let Some(limit) = limit {
            matched.truncate(limit);
        }
        Ok(matched)
    }

    fn count(&self) -> Result<u64> {
        Ok(self.events.read().len() as u64)
    }
}

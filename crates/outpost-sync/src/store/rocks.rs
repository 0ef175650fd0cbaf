//! RocksDB-backed event store.
//!
//! # Key Design
//!
//! ```text
//! Record:      ['e'][event_id (32 bytes)]                        -> event JSON
//! Time index:  ['t'][created_at_be (8 bytes)][event_id (32 bytes)] -> empty
//! ```
//!
//! The record key gives the idempotence check a single point lookup. The
//! big-endian timestamp in the index key keeps index entries in time order,
//! so a `since` bound is a forward range scan and query results come back
//! oldest first. Both keys for one event are written in a single
//! `WriteBatch`.

use super::{EventStore, Partition, PublishStatus};
use crate::{Error, Result};
use outpost_core::SyncFilter;
use outpost_core::nostr::{Event, JsonUtil};
use parking_lot::Mutex;
use rocksdb::{DBWithThreadMode, Direction, IteratorMode, MultiThreaded, Options, WriteBatch};
use std::path::Path;
use tracing::{debug, info};

const RECORD_PREFIX: u8 = b'e';
const INDEX_PREFIX: u8 = b't';

/// RocksDB event store for one partition.
///
/// Thread-safe: can be shared across engines via `Arc<RocksEventStore>`.
pub struct RocksEventStore {
    db: DBWithThreadMode<MultiThreaded>,
    partition: Partition,
    /// Serializes the exists-check and the write so concurrent publishes of
    /// the same ID report exactly one `Stored`.
    write_lock: Mutex<()>,
}

impl RocksEventStore {
    /// Open or create the store at the given path.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use outpost_sync::store::{Partition, RocksEventStore};
    ///
    /// let outbox = RocksEventStore::open("./data/outbox", Partition::Outbox)?;
    /// # Ok::<(), outpost_sync::Error>(())
    /// ```
    pub fn open<P: AsRef<Path>>(path: P, partition: Partition) -> Result<Self> {
        let path = path.as_ref();
        info!("Opening {} store at {}", partition, path.display());

        let mut opts = Options::default();
        opts.create_if_missing(true);

        // Bloom filters keep duplicate checks cheap for IDs we've never seen
        let mut block_opts = rocksdb::BlockBasedOptions::default();
        block_opts.set_bloom_filter(10.0, false);
        block_opts.set_cache_index_and_filter_blocks(true);
        opts.set_block_based_table_factory(&block_opts);

        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        opts.set_write_buffer_size(16 * 1024 * 1024);
        opts.increase_parallelism(num_cpus::get().min(4) as i32);

        let db = DBWithThreadMode::<MultiThreaded>::open(&opts, path)?;

        Ok(Self {
            db,
            partition,
            write_lock: Mutex::new(()),
        })
    }

    fn record_key(event_id: &[u8; 32]) -> [u8; 33] {
        let mut key = [0u8; 33];
        key[0] = RECORD_PREFIX;
        key[1..].copy_from_slice(event_id);
        key
    }

    fn index_key(created_at: u64, event_id: &[u8; 32]) -> [u8; 41] {
        let mut key = [0u8; 41];
        key[0] = INDEX_PREFIX;
        key[1..9].copy_from_slice(&created_at.to_be_bytes());
        key[9..].copy_from_slice(event_id);
        key
    }

    /// Parse an index key into (created_at, event_id).
    fn parse_index_key(key: &[u8]) -> Option<(u64, [u8; 32])> {
        if key.len() != 41 || key[0] != INDEX_PREFIX {
            return None;
        }
        let ts = u64::from_be_bytes(key[1..9].try_into().ok()?);
        let event_id: [u8; 32] = key[9..41].try_into().ok()?;
        Some((ts, event_id))
    }

    fn decode(&self, bytes: &[u8]) -> Result<Event> {
        Event::from_json(bytes).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Fetch one event by ID.
    pub fn get(&self, event_id: &[u8; 32]) -> Result<Option<Event>> {
        match self.db.get(Self::record_key(event_id))? {
            Some(bytes) => Ok(Some(self.decode(&bytes)?)),
            None => Ok(None),
        }
    }
}

impl EventStore for RocksEventStore {
    fn partition(&self) -> Partition {
        self.partition
    }

    fn publish(&self, event: &Event) -> Result<PublishStatus> {
        let id = event.id.as_bytes();
        let record_key = Self::record_key(id);

        let _guard = self.write_lock.lock();
        if self.db.get_pinned(record_key)?.is_some() {
            return Ok(PublishStatus::Duplicate);
        }

        let mut batch = WriteBatch::default();
        batch.put(record_key, event.as_json().as_bytes());
        batch.put(Self::index_key(event.created_at.as_u64(), id), []);
        self.db.write(batch)?;

        debug!("Stored event {} in {}", event.id, self.partition);
        Ok(PublishStatus::Stored)
    }

    fn query(&self, filter: &SyncFilter, limit: Option<usize>) -> Result<Vec<Event>> {
        let since = filter.since.map(|t| t.as_u64()).unwrap_or(0);
        let until = filter.until.map(|t| t.as_u64());
        let start_key = Self::index_key(since, &[0u8; 32]);

        let mut events = Vec::new();
        let iter = self
            .db
            .iterator(IteratorMode::From(&start_key, Direction::Forward));

        for item in iter {
            let (key, _) = item?;
            let Some((created_at, event_id)) = Self::parse_index_key(&key) else {
                // Left the index keyspace
                break;
            };
            if until.is_some_and(|until| created_at > until) {
                break;
            }
            let Some(event) = self.get(&event_id)? else {
                continue;
            };
            if filter.matches(&event) {
                events.push(event);
                if limit.is_some_and(|limit| events.len() >= limit) {
                    break;
                }
            }
        }

        Ok(events)
    }

    fn count(&self) -> Result<u64> {
        let mut count = 0u64;
        for item in self.db.prefix_iterator([RECORD_PREFIX]) {
            let (key, _) = item?;
            if key.first() != Some(&RECORD_PREFIX) {
                break;
            }
            count += 1;
        }
        Ok(count)
    }

    fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }
}

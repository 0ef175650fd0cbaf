//! In-process event source.
//!
//! [`MemorySource`] plays the role of a relay pool inside tests: it holds a
//! set of "stored" events that every subscription replays (filtered), and
//! fans out events pushed with [`MemorySource::push`] to open live
//! subscriptions. It also records every request so tests can inspect the
//! filters the engines sent.
//!
//! Unresponsive peers can be imitated too: a subscribe call can be made to
//! stall, and a bounded subscription can be held open after its replay.

use super::{Envelope, EventSource, FetchMode, Subscription};
use crate::{Error, Result};
use async_trait::async_trait;
use outpost_core::SyncFilter;
use outpost_core::nostr::Event;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;

const MEMORY_RELAY_URL: &str = "memory://";

/// Event source backed by an in-memory event list.
#[derive(Default)]
pub struct MemorySource {
    stored: Mutex<Vec<Event>>,
    live: Mutex<Vec<(SyncFilter, mpsc::Sender<Envelope>)>>,
    requests: Mutex<Vec<(SyncFilter, FetchMode)>>,
    failures_pending: AtomicUsize,
    stalls_pending: AtomicUsize,
    stall: Mutex<Duration>,
    held_open_pending: AtomicUsize,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a source whose relays already hold these events.
    pub fn with_events<I>(events: I) -> Self
    where
        I: IntoIterator<Item = Event>,
    {
        let source = Self::new();
        source.stored.lock().extend(events);
        source
    }

    /// Add an event to the stored set without delivering it live.
    pub fn store(&self, event: Event) {
        self.stored.lock().push(event);
    }

    /// Deliver an event to every open live subscription whose filter matches.
    ///
    /// Returns how many subscriptions received it.
    pub fn push(&self, event: &Event) -> usize {
        let mut live = self.live.lock();
        live.retain(|(_, tx)| !tx.is_closed());

        let mut delivered = 0;
        for (filter, tx) in live.iter() {
            if filter.matches(event)
                && tx
                    .try_send(Envelope::from_relay(MEMORY_RELAY_URL, event.clone()))
                    .is_ok()
            {
                delivered += 1;
            }
        }
        delivered
    }

    /// Close every open live subscription, as a relay pool shutdown would.
    pub fn close_live(&self) {
        self.live.lock().clear();
    }

    /// Number of live subscriptions currently open.
    pub fn live_subscriptions(&self) -> usize {
        let mut live = self.live.lock();
        live.retain(|(_, tx)| !tx.is_closed());
        live.len()
    }

    /// Make the next `n` calls to `subscribe` fail.
    pub fn fail_next_subscriptions(&self, n: usize) {
        self.failures_pending.store(n, Ordering::SeqCst);
    }

    /// Make the next `n` calls to `subscribe` wait `delay` before answering.
    pub fn stall_next_subscriptions(&self, n: usize, delay: Duration) {
        *self.stall.lock() = delay;
        self.stalls_pending.store(n, Ordering::SeqCst);
    }

    /// Keep the next `n` bounded subscriptions open after their replay, as a
    /// relay that never sends EOSE would.
    pub fn hold_next_bounded_open(&self, n: usize) {
        self.held_open_pending.store(n, Ordering::SeqCst);
    }

    /// Every request received so far, in order.
    pub fn requests(&self) -> Vec<(SyncFilter, FetchMode)> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl EventSource for MemorySource {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn subscribe(&self, filter: &SyncFilter, mode: FetchMode) -> Result<Subscription> {
        filter.validate()?;
        self.requests.lock().push((filter.clone(), mode));

        if take_one(&self.failures_pending) {
            return Err(Error::Source("memory source: injected failure".to_string()));
        }

        if take_one(&self.stalls_pending) {
            let delay = *self.stall.lock();
            tokio::time::sleep(delay).await;
        }

        let (tx, subscription) = Subscription::channel();

        if mode == FetchMode::Live {
            self.live.lock().push((filter.clone(), tx.clone()));
        }
        let hold_open =
            matches!(mode, FetchMode::Bounded { .. }) && take_one(&self.held_open_pending);

        let matched: Vec<Event> = self
            .stored
            .lock()
            .iter()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect();

        // Bounded subscriptions close when this task drops its sender
        tokio::spawn(async move {
            for event in matched {
                if tx
                    .send(Envelope::from_relay(MEMORY_RELAY_URL, event))
                    .await
                    .is_err()
                {
                    return;
                }
            }
            if hold_open {
                tx.closed().await;
            }
        });

        Ok(subscription)
    }
}

/// Decrement a pending count, returning whether it was above zero.
fn take_one(pending: &AtomicUsize) -> bool {
    pending
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

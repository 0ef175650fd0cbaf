//! Event sources.
//!
//! A source turns a [`SyncFilter`] into a [`Subscription`]: one ordered
//! stream of events, already merged across relays and signature-checked.
//! The fan-in across relay connections happens inside the source; engines
//! only ever read one stream.
//!
//! # Available Sources
//!
//! - [`RelayPoolSource`] - nostr-sdk relay pool over the configured seed relays
//! - [`MemorySource`] - In-process source for tests
//!
//! # Modes
//!
//! - [`FetchMode::Bounded`] closes the stream at EOSE from every relay or when
//!   the deadline elapses, whichever comes first.
//! - [`FetchMode::Live`] keeps the stream open until the subscription is
//!   dropped or the source shuts down.

mod memory;
mod relay;
pub mod url;

pub use memory::MemorySource;
pub use relay::{RelayConfig, RelayPoolSource};

use crate::Result;
use async_trait::async_trait;
use outpost_core::SyncFilter;
use outpost_core::nostr::Event;
use std::time::Duration;
use tokio::sync::mpsc;

/// Buffer between a source's forwarding task and the consuming engine.
pub const SUBSCRIPTION_BUFFER: usize = 4096;

/// How long a subscription should stay open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchMode {
    /// Stored events only, until EOSE or the deadline.
    Bounded { timeout: Duration },
    /// Stored events, then new events as they are published.
    Live,
}

/// An event plus where it came from.
#[derive(Debug, Clone)]
pub struct Envelope {
    /// Relay that delivered the event, when the source knows it.
    pub relay_url: Option<String>,
    pub event: Event,
}

impl Envelope {
    pub fn new(event: Event) -> Self {
        Self {
            relay_url: None,
            event,
        }
    }

    pub fn from_relay(relay_url: impl Into<String>, event: Event) -> Self {
        Self {
            relay_url: Some(relay_url.into()),
            event,
        }
    }
}

/// The consuming end of a subscription.
///
/// `next()` returns `None` once the stream has closed: EOSE or deadline in
/// bounded mode, shutdown or disconnect in live mode. Dropping the
/// subscription tells the source to stop forwarding.
#[derive(Debug)]
pub struct Subscription {
    receiver: mpsc::Receiver<Envelope>,
}

impl Subscription {
    /// Create a subscription and the sender a source feeds it through.
    pub fn channel() -> (mpsc::Sender<Envelope>, Self) {
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        (tx, Self { receiver: rx })
    }

    /// Wait for the next event.
    pub async fn next(&mut self) -> Option<Envelope> {
        self.receiver.recv().await
    }
}

/// A source of signed Nostr events.
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Human-readable name for this source (used in logs).
    fn name(&self) -> &'static str;

    /// Open a subscription for the filter.
    ///
    /// Errors here mean the request could not be sent at all (no relays,
    /// invalid filter). Failures after that show up as an early close.
    async fn subscribe(&self, filter: &SyncFilter, mode: FetchMode) -> Result<Subscription>;
}

#[async_trait]
impl<T: EventSource + ?Sized> EventSource for std::sync::Arc<T> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    async fn subscribe(&self, filter: &SyncFilter, mode: FetchMode) -> Result<Subscription> {
        (**self).subscribe(filter, mode).await
    }
}

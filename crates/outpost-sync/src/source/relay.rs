//! Relay pool event source.
//!
//! Wraps a nostr-sdk `Client` connected to the seed relays. nostr-sdk
//! verifies event IDs and signatures and merges the per-relay streams; this
//! adapter turns the result into a [`Subscription`].
//!
//! # Modes
//!
//! - Bounded fetches use `Client::stream_events`, which ends at EOSE from
//!   every relay or at the timeout.
//! - Live fetches open a regular subscription and forward matching
//!   `RelayPoolNotification::Event`s until the consumer drops the
//!   subscription or the pool shuts down.

use super::{Envelope, EventSource, FetchMode, Subscription};
use crate::{Error, Result};
use async_trait::async_trait;
use futures::StreamExt;
use nostr_sdk::prelude::*;
use outpost_core::SyncFilter;
use std::time::{Duration, Instant};
use tokio::sync::broadcast::error::RecvError;

/// Configuration for the relay pool source.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Relay URLs to connect to (already normalized).
    pub seed_relays: Vec<String>,

    /// How long to wait after `connect()` before counting connected relays.
    pub connect_wait: Duration,

    /// Size of the pool's notification channel.
    ///
    /// Live sync only follows one subscription, so the nostr-sdk default is
    /// plenty; raise it if `Lagged` warnings show up.
    pub notification_channel_size: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            seed_relays: vec![
                "wss://relay.damus.io".to_string(),
                "wss://nos.lol".to_string(),
                "wss://relay.primal.net".to_string(),
                "wss://nostr.wine".to_string(),
            ],
            connect_wait: Duration::from_secs(2),
            notification_channel_size: 4096,
        }
    }
}

/// Event source over a nostr-sdk relay pool.
pub struct RelayPoolSource {
    config: RelayConfig,
    client: Client,
}

impl RelayPoolSource {
    /// Create the source. No connections are opened until [`connect`](Self::connect).
    pub fn new(config: RelayConfig) -> Self {
        // Ephemeral keypair, only used to answer NIP-42 AUTH challenges
        let keys = Keys::generate();

        let pool_opts = RelayPoolOptions::default()
            .notification_channel_size(config.notification_channel_size);
        let client_opts = ClientOptions::new().pool(pool_opts);

        let client = Client::builder().signer(keys).opts(client_opts).build();
        client.automatic_authentication(true);

        Self { config, client }
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Add the seed relays and connect to them.
    ///
    /// Returns the number of relays connected after `connect_wait`. Zero is
    /// not an error: nostr-sdk keeps retrying in the background, and a fetch
    /// against no connected relay simply yields nothing.
    pub async fn connect(&self) -> Result<usize> {
        for relay_url in &self.config.seed_relays {
            if let Err(e) = self.client.add_relay(relay_url).await {
                tracing::warn!("Failed to add relay {}: {}", relay_url, e);
            } else {
                tracing::debug!("Added relay: {}", relay_url);
            }
        }

        if self.client.relays().await.is_empty() {
            return Err(Error::Config("none of the seed relays could be added".to_string()));
        }

        self.client.connect().await;
        tokio::time::sleep(self.config.connect_wait).await;

        let connected = self.connected_count().await;
        tracing::info!(
            "Connected to {}/{} seed relays",
            connected,
            self.config.seed_relays.len()
        );
        Ok(connected)
    }

    /// Number of relays currently connected.
    pub async fn connected_count(&self) -> usize {
        self.client
            .relays()
            .await
            .values()
            .filter(|relay| relay.status() == nostr_sdk::RelayStatus::Connected)
            .count()
    }

    /// Disconnect from every relay.
    pub async fn shutdown(&self) {
        self.client.disconnect().await;
    }

    async fn subscribe_bounded(&self, filter: Filter, timeout: Duration) -> Result<Subscription> {
        let mut stream = self.client.stream_events(filter, timeout).await?;
        let (tx, subscription) = Subscription::channel();

        tokio::spawn(async move {
            let started = Instant::now();
            let mut forwarded = 0usize;
            while let Some(event) = stream.next().await {
                if tx.send(Envelope::new(event)).await.is_err() {
                    break;
                }
                forwarded += 1;
            }
            tracing::debug!(
                "Bounded fetch closed after {:?}: {} events",
                started.elapsed(),
                forwarded
            );
        });

        Ok(subscription)
    }

    async fn subscribe_live(&self, filter: Filter) -> Result<Subscription> {
        // Take the receiver before subscribing so no early event is missed
        let mut notifications = self.client.notifications();
        let output = self.client.subscribe(filter, None).await?;
        let subscription_id = output.val;
        tracing::info!("Live subscription opened with ID: {}", subscription_id);

        let (tx, subscription) = Subscription::channel();
        let client = self.client.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tx.closed() => {
                        tracing::debug!("Live subscription {} dropped by consumer", subscription_id);
                        break;
                    }
                    notification = notifications.recv() => match notification {
                        Ok(RelayPoolNotification::Event { relay_url, subscription_id: id, event }) => {
                            if id != subscription_id {
                                continue;
                            }
                            if tx.send(Envelope::from_relay(relay_url.to_string(), *event)).await.is_err() {
                                break;
                            }
                        }
                        Ok(RelayPoolNotification::Shutdown) => {
                            tracing::info!("Relay pool shutdown notification received");
                            break;
                        }
                        Ok(RelayPoolNotification::Message { .. }) => {}
                        Err(RecvError::Lagged(count)) => {
                            metrics::counter!("live_notifications_lagged_total").increment(count);
                            tracing::warn!("Live notification receiver lagged, dropped {} messages", count);
                        }
                        Err(RecvError::Closed) => {
                            tracing::info!("Notification channel closed");
                            break;
                        }
                    }
                }
            }

            client.unsubscribe(&subscription_id).await;
        });

        Ok(subscription)
    }
}

#[async_trait]
impl EventSource for RelayPoolSource {
    fn name(&self) -> &'static str {
        "relay"
    }

    async fn subscribe(&self, filter: &SyncFilter, mode: FetchMode) -> Result<Subscription> {
        let filter = filter.to_nostr()?;
        match mode {
            FetchMode::Bounded { timeout } => self.subscribe_bounded(filter, timeout).await,
            FetchMode::Live => self.subscribe_live(filter).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = RelayConfig::default();
        assert_eq!(config.seed_relays.len(), 4);
        assert_eq!(config.connect_wait, Duration::from_secs(2));
        assert!(config.seed_relays.iter().all(|r| r.starts_with("wss://")));
    }

    #[tokio::test]
    async fn test_subscribe_rejects_empty_filter() {
        let source = RelayPoolSource::new(RelayConfig {
            seed_relays: vec![],
            ..Default::default()
        });
        let result = source
            .subscribe(
                &SyncFilter::new(),
                FetchMode::Bounded {
                    timeout: Duration::from_millis(10),
                },
            )
            .await;
        assert!(matches!(result, Err(Error::Core(_))));
    }
}

//! Continuous inbox sync with notifications.
//!
//! Subscribes to events mentioning the owner from `now - overlap` onward and
//! keeps the subscription open until stopped. Every event goes through the
//! same pipeline as the tagged merge; each newly stored event is classified
//! and produces at most one notification.
//!
//! # Recovery
//!
//! A closed stream or a failed subscribe is not fatal. The engine waits with
//! exponential backoff (reset after any delivery) and subscribes again with
//! a freshly computed `since`, so the overlap covers the gap.
//!
//! # Cancellation
//!
//! The running flag is polled at least once per `poll_interval`. Clearing it
//! ends the loop after the in-flight event has been handled.

use super::pipeline::{InboxOutcome, InboxPipeline, Verdict};
use crate::Result;
use crate::source::{EventSource, FetchMode};
use metrics::{counter, gauge};
use outpost_core::nostr::{Event, Timestamp};
use outpost_core::{DEFAULT_LIVE_OVERLAP, InboxKind, Notification, owner_reference_filter};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

/// Tunables for live sync.
#[derive(Debug, Clone)]
pub struct LiveConfig {
    /// How far before now each (re)subscription reaches back.
    pub overlap: Duration,
    /// First resubscribe delay.
    pub backoff_initial: Duration,
    /// Cap on the resubscribe delay.
    pub backoff_max: Duration,
    /// How often the running flag is checked while idle.
    pub poll_interval: Duration,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            overlap: DEFAULT_LIVE_OVERLAP,
            backoff_initial: Duration::from_secs(1),
            backoff_max: Duration::from_secs(60),
            poll_interval: Duration::from_secs(1),
        }
    }
}

/// Statistics from one live run.
#[derive(Debug, Clone, Default)]
pub struct LiveStats {
    /// Subscriptions successfully opened.
    pub subscriptions: u64,
    /// Times the engine went back to subscribing after a close or failure.
    pub resubscribes: u64,
    pub events_received: u64,
    pub events_stored: u64,
    pub duplicates: u64,
    pub rejected_untrusted: u64,
    pub rejected_untagged: u64,
    pub publish_failures: u64,
    pub notifications: u64,
    pub duration: Duration,
}

/// Long-running inbox subscription.
pub struct LiveSync {
    config: LiveConfig,
    pipeline: InboxPipeline,
    source: Arc<dyn EventSource>,
    running: Arc<AtomicBool>,
    notifier: Option<mpsc::UnboundedSender<Notification>>,
}

impl LiveSync {
    pub fn new(config: LiveConfig, pipeline: InboxPipeline, source: Arc<dyn EventSource>) -> Self {
        Self {
            config,
            pipeline,
            source,
            running: Arc::new(AtomicBool::new(true)),
            notifier: None,
        }
    }

    /// Also send every notification to this channel.
    pub fn with_notifier(mut self, notifier: mpsc::UnboundedSender<Notification>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Share a running flag with the caller (e.g. a Ctrl-C handler).
    pub fn with_running_flag(mut self, running: Arc<AtomicBool>) -> Self {
        self.running = running;
        self
    }

    /// Ask the loop to finish.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Run until stopped.
    ///
    /// Returns an error only when the subscription itself is invalid (for
    /// example an empty filter); network failures are retried.
    pub async fn run(&self) -> Result<LiveStats> {
        let started = Instant::now();
        let mut stats = LiveStats::default();
        let mut backoff = self.config.backoff_initial;

        tracing::info!("📢 subscribing to inbox");

        while self.is_running() {
            let since = Timestamp::from(
                Timestamp::now()
                    .as_u64()
                    .saturating_sub(self.config.overlap.as_secs()),
            );
            let filter = owner_reference_filter(self.pipeline.owner().hex_values()).since(since);

            let mut subscription = match self.source.subscribe(&filter, FetchMode::Live).await {
                Ok(subscription) => subscription,
                Err(e) if e.is_transient() => {
                    tracing::warn!("Live subscribe failed, retrying in {:?}: {}", backoff, e);
                    self.resubscribe_after(&mut backoff, &mut stats).await;
                    continue;
                }
                Err(e) => return Err(e),
            };

            stats.subscriptions += 1;
            gauge!("live_subscribed").set(1.0);
            tracing::debug!("Live subscription open since {}", since.as_u64());

            let mut closed = false;
            while self.is_running() {
                match tokio::time::timeout(self.config.poll_interval, subscription.next()).await {
                    Ok(Some(envelope)) => {
                        backoff = self.config.backoff_initial;
                        self.handle_event(&envelope.event, &mut stats);
                    }
                    Ok(None) => {
                        closed = true;
                        break;
                    }
                    // Idle; go round and check the running flag
                    Err(_) => continue,
                }
            }

            gauge!("live_subscribed").set(0.0);
            if closed && self.is_running() {
                tracing::warn!("Live stream closed, resubscribing in {:?}", backoff);
                self.resubscribe_after(&mut backoff, &mut stats).await;
            }
        }

        stats.duration = started.elapsed();
        tracing::info!(
            "Live sync stopped: {} received, {} stored, {} notifications, {} resubscribes, ran {:?}",
            stats.events_received,
            stats.events_stored,
            stats.notifications,
            stats.resubscribes,
            stats.duration
        );
        Ok(stats)
    }

    fn handle_event(&self, event: &Event, stats: &mut LiveStats) {
        stats.events_received += 1;
        counter!("live_events_received_total").increment(1);

        match self.pipeline.process(event) {
            InboxOutcome::Stored => {
                stats.events_stored += 1;
                counter!("live_events_accepted_total").increment(1);
                self.notify(event, stats);
            }
            InboxOutcome::Duplicate => stats.duplicates += 1,
            InboxOutcome::Rejected(verdict) => {
                counter!("live_events_rejected_total", "reason" => verdict.as_str()).increment(1);
                match verdict {
                    Verdict::Untrusted => stats.rejected_untrusted += 1,
                    _ => stats.rejected_untagged += 1,
                }
            }
            InboxOutcome::Failed => stats.publish_failures += 1,
        }
    }

    fn notify(&self, event: &Event, stats: &mut LiveStats) {
        let Some(notification) = Notification::for_event(event) else {
            tracing::debug!(
                "No notification for {} event {}",
                InboxKind::classify(event.kind),
                event.id
            );
            return;
        };

        tracing::info!("{}", notification.message);
        stats.notifications += 1;
        counter!("live_notifications_total", "kind" => notification.kind.as_str()).increment(1);

        if let Some(notifier) = &self.notifier
            && notifier.send(notification).is_err()
        {
            tracing::debug!("Notification receiver dropped");
        }
    }

    /// Sleep for the current backoff, then double it up to the cap.
    ///
    /// The sleep is cut into poll intervals so a stop request is noticed.
    async fn resubscribe_after(&self, backoff: &mut Duration, stats: &mut LiveStats) {
        stats.resubscribes += 1;
        counter!("live_resubscribes_total").increment(1);

        let wake_at = tokio::time::Instant::now() + *backoff;
        while self.is_running() {
            let now = tokio::time::Instant::now();
            if now >= wake_at {
                break;
            }
            tokio::time::sleep((wake_at - now).min(self.config.poll_interval)).await;
        }

        *backoff = (*backoff * 2).min(self.config.backoff_max);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::counters::ImportCounters;
    use crate::engine::pipeline::tests::tagged_event;
    use crate::source::MemorySource;
    use crate::store::{EventStore, MemoryEventStore, Partition};
    use crate::trust::TrustSet;
    use outpost_core::OwnerKeys;
    use outpost_core::nostr::Keys;
    use tokio::task::JoinHandle;

    struct Harness {
        owner_hex: String,
        friend: Keys,
        source: Arc<MemorySource>,
        inbox: Arc<MemoryEventStore>,
        live: Arc<LiveSync>,
        notifications: mpsc::UnboundedReceiver<Notification>,
        handle: JoinHandle<Result<LiveStats>>,
    }

    fn fast_config() -> LiveConfig {
        LiveConfig {
            overlap: DEFAULT_LIVE_OVERLAP,
            backoff_initial: Duration::from_millis(10),
            backoff_max: Duration::from_millis(40),
            poll_interval: Duration::from_millis(10),
        }
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !condition() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    async fn start(source: Arc<MemorySource>) -> Harness {
        let owner = Keys::generate();
        let friend = Keys::generate();
        let inbox = Arc::new(MemoryEventStore::new(Partition::Inbox));
        let pipeline = InboxPipeline::new(
            OwnerKeys::from_keys([owner.public_key()]).unwrap(),
            Arc::new(TrustSet::new([friend.public_key()])),
            inbox.clone(),
            Arc::new(ImportCounters::new()),
        );
        let (tx, notifications) = mpsc::unbounded_channel();
        let live = Arc::new(LiveSync::new(fast_config(), pipeline, source.clone()).with_notifier(tx));

        let runner = Arc::clone(&live);
        let handle = tokio::spawn(async move { runner.run().await });

        Harness {
            owner_hex: owner.public_key().to_hex(),
            friend,
            source,
            inbox,
            live,
            notifications,
            handle,
        }
    }

    impl Harness {
        async fn wait_subscribed(&self) {
            let source = Arc::clone(&self.source);
            wait_until(move || source.live_subscriptions() == 1).await;
        }

        async fn next_notification(&mut self) -> Notification {
            tokio::time::timeout(Duration::from_secs(5), self.notifications.recv())
                .await
                .expect("no notification in time")
                .expect("notifier closed")
        }

        async fn stop(self) -> (LiveStats, mpsc::UnboundedReceiver<Notification>) {
            self.live.stop();
            let stats = self.handle.await.unwrap().unwrap();
            (stats, self.notifications)
        }
    }

    #[tokio::test]
    async fn test_reaction_notification_carries_content() {
        let mut h = start(Arc::new(MemorySource::new())).await;
        h.wait_subscribed().await;

        let reaction = tagged_event(&h.friend, 7, "🔥", &[h.owner_hex.as_str()]);
        assert_eq!(h.source.push(&reaction), 1);

        let notification = h.next_notification().await;
        assert_eq!(notification.kind, InboxKind::Reaction);
        assert!(notification.message.contains("🔥"));
        assert!(h.inbox.contains(&reaction.id));

        let (stats, _) = h.stop().await;
        assert_eq!(stats.events_stored, 1);
        assert_eq!(stats.notifications, 1);
    }

    #[tokio::test]
    async fn test_duplicate_delivery_stored_and_notified_once() {
        let mut h = start(Arc::new(MemorySource::new())).await;
        h.wait_subscribed().await;

        let note = tagged_event(&h.friend, 1, "gm", &[h.owner_hex.as_str()]);
        h.source.push(&note);
        h.source.push(&note);
        // Events are handled in order, so the marker's notification comes
        // after whatever the duplicate produced
        let marker = tagged_event(&h.friend, 1, "marker", &[h.owner_hex.as_str()]);
        h.source.push(&marker);

        assert_eq!(h.next_notification().await.event_id, note.id);
        assert_eq!(h.next_notification().await.event_id, marker.id);
        assert_eq!(h.inbox.count().unwrap(), 2);

        let (stats, _) = h.stop().await;
        assert_eq!(stats.events_received, 3);
        assert_eq!(stats.events_stored, 2);
        assert_eq!(stats.duplicates, 1);
    }

    #[tokio::test]
    async fn test_untrusted_and_untagged_rejected() {
        let mut h = start(Arc::new(MemorySource::new())).await;
        h.wait_subscribed().await;

        let stranger = Keys::generate();
        h.source.push(&tagged_event(&stranger, 1, "spam", &[h.owner_hex.as_str()]));
        // Trusted and tagged, to know the earlier events were handled
        let good = tagged_event(&h.friend, 1, "hello", &[h.owner_hex.as_str()]);
        h.source.push(&good);

        let notification = h.next_notification().await;
        assert_eq!(notification.event_id, good.id);

        let (stats, _) = h.stop().await;
        assert_eq!(stats.rejected_untrusted, 1);
        assert_eq!(stats.events_stored, 1);
    }

    #[tokio::test]
    async fn test_follow_list_stored_without_notification() {
        let mut h = start(Arc::new(MemorySource::new())).await;
        h.wait_subscribed().await;

        let follows = tagged_event(&h.friend, 3, "", &[h.owner_hex.as_str()]);
        h.source.push(&follows);
        let zap = tagged_event(&h.friend, 9735, "", &[h.owner_hex.as_str()]);
        h.source.push(&zap);

        // The zap is the first notification even though the follow list came first
        let notification = h.next_notification().await;
        assert_eq!(notification.kind, InboxKind::Zap);
        assert!(h.inbox.contains(&follows.id));

        let (stats, _) = h.stop().await;
        assert_eq!(stats.events_stored, 2);
        assert_eq!(stats.notifications, 1);
    }

    #[tokio::test]
    async fn test_resubscribes_after_stream_close() {
        let mut h = start(Arc::new(MemorySource::new())).await;
        h.wait_subscribed().await;

        h.source.close_live();
        let source = Arc::clone(&h.source);
        wait_until(move || source.requests().len() == 2 && source.live_subscriptions() == 1).await;

        // The new subscription is live
        let note = tagged_event(&h.friend, 1, "back", &[h.owner_hex.as_str()]);
        h.source.push(&note);
        h.next_notification().await;

        let (stats, _) = h.stop().await;
        assert_eq!(stats.subscriptions, 2);
        assert_eq!(stats.resubscribes, 1);
    }

    #[tokio::test]
    async fn test_subscribe_failures_retried() {
        let source = Arc::new(MemorySource::new());
        source.fail_next_subscriptions(2);
        let h = start(source).await;
        h.wait_subscribed().await;

        assert_eq!(h.source.requests().len(), 3);
        let (stats, _) = h.stop().await;
        assert_eq!(stats.subscriptions, 1);
        assert_eq!(stats.resubscribes, 2);
    }

    #[tokio::test]
    async fn test_since_reaches_back_by_overlap() {
        let h = start(Arc::new(MemorySource::new())).await;
        h.wait_subscribed().await;

        let (filter, mode) = h.source.requests()[0].clone();
        assert_eq!(mode, FetchMode::Live);
        let since = filter.since.unwrap().as_u64();
        let expected = Timestamp::now().as_u64() - DEFAULT_LIVE_OVERLAP.as_secs();
        assert!(since <= expected && since + 5 >= expected);
        assert!(filter.tags[&'p'].contains(&h.owner_hex));

        h.stop().await;
    }

    #[tokio::test]
    async fn test_stop_before_run_returns_immediately() {
        let source = Arc::new(MemorySource::new());
        let pipeline = InboxPipeline::new(
            OwnerKeys::from_keys([Keys::generate().public_key()]).unwrap(),
            Arc::new(TrustSet::default()),
            Arc::new(MemoryEventStore::new(Partition::Inbox)),
            Arc::new(ImportCounters::new()),
        );
        let live = LiveSync::new(fast_config(), pipeline, source.clone());
        live.stop();

        let stats = live.run().await.unwrap();
        assert_eq!(stats.subscriptions, 0);
        assert!(source.requests().is_empty());
    }
}

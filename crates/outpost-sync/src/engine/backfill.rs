//! Windowed outbox backfill.
//!
//! Walks fixed-span windows from the import start date up to now, issuing
//! one bounded fetch per window for events authored by the owner and
//! publishing every result to the outbox.
//!
//! # Termination
//!
//! The stop condition is checked after advancing: once the next window
//! would start at or after the current time the loop ends. A start date in
//! the past therefore processes `ceil((now - start) / span)` windows, and a
//! start date at or after now processes exactly one.
//!
//! # Failures
//!
//! Nothing inside the loop aborts it. A subscribe error or an elapsed
//! deadline marks the window partial; a publish error is counted and the
//! next event is read. The deadline starts before the subscribe call, so a
//! peer that never answers costs at most one window timeout.
//!
//! Results are checked against the owner keys before publishing. Events by
//! other authors are skipped, even though a relay honoring the `authors`
//! filter would never send them.

use super::pipeline::{PublishOutcome, publish};
use crate::counters::ImportCounters;
use crate::source::{EventSource, FetchMode};
use crate::store::EventStore;
use crate::Result;
use metrics::{counter, gauge};
use outpost_core::nostr::{Event, Timestamp};
use outpost_core::{
    DEFAULT_WINDOW_PAUSE, DEFAULT_WINDOW_SPAN, DEFAULT_WINDOW_TIMEOUT, OwnerKeys, SyncFilter,
    TimeWindow, parse_start_date,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Tunables for the backfill loop.
#[derive(Debug, Clone)]
pub struct BackfillConfig {
    /// Width of each window.
    pub span: Duration,

    /// Deadline for one window's bounded fetch.
    pub window_timeout: Duration,

    /// Pause between windows, to stay polite with public relays.
    pub pause: Duration,
}

impl Default for BackfillConfig {
    fn default() -> Self {
        Self {
            span: DEFAULT_WINDOW_SPAN,
            window_timeout: DEFAULT_WINDOW_TIMEOUT,
            pause: DEFAULT_WINDOW_PAUSE,
        }
    }
}

/// Statistics from one backfill run.
#[derive(Debug, Clone, Default)]
pub struct BackfillStats {
    /// Windows processed.
    pub windows: u64,
    /// Windows whose fetch failed or hit the deadline.
    pub windows_partial: u64,
    /// Events delivered by the source.
    pub events_received: u64,
    /// Events newly written to the outbox.
    pub events_stored: u64,
    /// Events the outbox already held.
    pub duplicates: u64,
    /// Events not authored by the owner (relay ignored the filter).
    pub events_rejected: u64,
    /// Events the outbox failed to store.
    pub publish_failures: u64,
    /// Wall time of the run.
    pub duration: Duration,
}

/// Windowed historical import of the owner's own events.
pub struct BackfillScheduler {
    config: BackfillConfig,
    owner: OwnerKeys,
    source: Arc<dyn EventSource>,
    outbox: Arc<dyn EventStore>,
    counters: Arc<ImportCounters>,
    running: Arc<AtomicBool>,
}

impl BackfillScheduler {
    pub fn new(
        config: BackfillConfig,
        owner: OwnerKeys,
        source: Arc<dyn EventSource>,
        outbox: Arc<dyn EventStore>,
        counters: Arc<ImportCounters>,
    ) -> Self {
        Self {
            config,
            owner,
            source,
            outbox,
            counters,
            running: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Share a running flag with the caller; clearing it stops the loop
    /// after the current window.
    pub fn with_running_flag(mut self, running: Arc<AtomicBool>) -> Self {
        self.running = running;
        self
    }

    /// Request a stop after the current window.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Parse a `YYYY-MM-DD` start date and run from it.
    ///
    /// A bad date fails here, before any window is fetched.
    pub async fn run_from_date(&self, start_date: &str) -> Result<BackfillStats> {
        let start = parse_start_date(start_date)?;
        self.run(start).await
    }

    /// Run from `start` until the windows reach the current time.
    pub async fn run(&self, start: Timestamp) -> Result<BackfillStats> {
        self.run_with_clock(start, Timestamp::now).await
    }

    /// Run with an injected clock, consulted after each window.
    pub async fn run_with_clock<F>(&self, start: Timestamp, now: F) -> Result<BackfillStats>
    where
        F: Fn() -> Timestamp,
    {
        let mut window = TimeWindow::starting_at(start, self.config.span)?;
        let mut stats = BackfillStats::default();
        let started = Instant::now();

        tracing::info!(
            "Starting outbox backfill from {} in {}h windows via {}",
            start.as_u64(),
            self.config.span.as_secs() / 3600,
            self.source.name()
        );
        gauge!("backfill_running").set(1.0);

        loop {
            self.process_window(&window, &mut stats).await;
            stats.windows += 1;
            counter!("backfill_windows_total").increment(1);
            tracing::info!("📦 imported {} owner notes", self.counters.owner_imported());

            window.advance();
            if window.starts_at_or_after(now()) {
                tracing::info!("✅ owner note import complete!");
                break;
            }
            if !self.running.load(Ordering::SeqCst) {
                tracing::info!("Backfill stopped before window at {}", window.since().as_u64());
                break;
            }

            if !self.config.pause.is_zero() {
                tokio::time::sleep(self.config.pause).await;
            }
        }

        gauge!("backfill_running").set(0.0);
        if let Err(e) = self.outbox.flush() {
            tracing::warn!("Failed to flush outbox: {}", e);
        }

        stats.duration = started.elapsed();
        tracing::info!(
            "Backfill finished: {} windows ({} partial), {} received, {} stored, {} duplicates, {} failed, took {:?}",
            stats.windows,
            stats.windows_partial,
            stats.events_received,
            stats.events_stored,
            stats.duplicates,
            stats.publish_failures,
            stats.duration
        );
        Ok(stats)
    }

    async fn process_window(&self, window: &TimeWindow, stats: &mut BackfillStats) {
        let filter = SyncFilter::new()
            .authors(self.owner.keys())
            .since(window.since())
            .until(window.until());
        let timeout = self.config.window_timeout;

        tracing::debug!(
            "Fetching window [{}, {})",
            window.since().as_u64(),
            window.until().as_u64()
        );

        let deadline = tokio::time::Instant::now() + timeout;
        let subscribe = self
            .source
            .subscribe(&filter, FetchMode::Bounded { timeout });
        let mut subscription = match tokio::time::timeout_at(deadline, subscribe).await {
            Ok(Ok(subscription)) => subscription,
            Ok(Err(e)) => {
                tracing::warn!(
                    "Window [{}, {}) fetch failed: {}",
                    window.since().as_u64(),
                    window.until().as_u64(),
                    e
                );
                self.mark_partial(stats);
                return;
            }
            Err(_) => {
                tracing::warn!(
                    "Window [{}, {}) subscribe did not answer within {:?}",
                    window.since().as_u64(),
                    window.until().as_u64(),
                    timeout
                );
                self.mark_partial(stats);
                return;
            }
        };

        loop {
            match tokio::time::timeout_at(deadline, subscription.next()).await {
                Ok(Some(envelope)) => self.store_event(&envelope.event, stats),
                Ok(None) => break,
                Err(_) => {
                    tracing::warn!(
                        "Window [{}, {}) hit the {:?} deadline",
                        window.since().as_u64(),
                        window.until().as_u64(),
                        timeout
                    );
                    self.mark_partial(stats);
                    break;
                }
            }
        }
    }

    fn store_event(&self, event: &Event, stats: &mut BackfillStats) {
        stats.events_received += 1;
        counter!("backfill_events_received_total").increment(1);

        if !self.owner.is_author_of(event) {
            stats.events_rejected += 1;
            tracing::debug!("Skipping event {} not authored by the owner", event.id);
            return;
        }

        match publish(self.outbox.as_ref(), event) {
            PublishOutcome::Stored => {
                stats.events_stored += 1;
                self.counters.record_owner();
                counter!("backfill_events_stored_total").increment(1);
            }
            PublishOutcome::Duplicate => stats.duplicates += 1,
            PublishOutcome::Failed => stats.publish_failures += 1,
        }
    }

    fn mark_partial(&self, stats: &mut BackfillStats) {
        stats.windows_partial += 1;
        counter!("backfill_windows_partial_total").increment(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::pipeline::tests::FailingStore;
    use crate::source::MemorySource;
    use crate::store::{MemoryEventStore, Partition};
    use outpost_core::nostr::{EventBuilder, Keys, Kind};
    use outpost_core::window_count;
    use std::sync::atomic::AtomicU64;

    const DAY: u64 = 24 * 3600;
    const JAN_1_2024: u64 = 1_704_067_200;

    fn note_at(keys: &Keys, created_at: u64) -> Event {
        EventBuilder::new(Kind::TextNote, format!("note at {created_at}"))
            .custom_created_at(Timestamp::from(created_at))
            .sign_with_keys(keys)
            .unwrap()
    }

    fn fast_config() -> BackfillConfig {
        BackfillConfig {
            span: DEFAULT_WINDOW_SPAN,
            window_timeout: Duration::from_secs(1),
            pause: Duration::ZERO,
        }
    }

    struct Fixture {
        owner: Keys,
        source: Arc<MemorySource>,
        outbox: Arc<MemoryEventStore>,
        counters: Arc<ImportCounters>,
    }

    impl Fixture {
        fn new(events: impl FnOnce(&Keys) -> Vec<Event>) -> Self {
            let owner = Keys::generate();
            let source = Arc::new(MemorySource::with_events(events(&owner)));
            Self {
                owner,
                source,
                outbox: Arc::new(MemoryEventStore::new(Partition::Outbox)),
                counters: Arc::new(ImportCounters::new()),
            }
        }

        fn scheduler(&self, config: BackfillConfig) -> BackfillScheduler {
            BackfillScheduler::new(
                config,
                OwnerKeys::from_keys([self.owner.public_key()]).unwrap(),
                self.source.clone(),
                self.outbox.clone(),
                self.counters.clone(),
            )
        }
    }

    #[tokio::test]
    async fn test_single_window_when_span_reaches_now() {
        // 2024-01-01 start, 240h span, now 2024-01-11
        let fixture = Fixture::new(|k| vec![note_at(k, JAN_1_2024 + DAY)]);
        let now = Timestamp::from(JAN_1_2024 + 10 * DAY);

        let stats = fixture
            .scheduler(fast_config())
            .run_with_clock(Timestamp::from(JAN_1_2024), || now)
            .await
            .unwrap();

        assert_eq!(stats.windows, 1);
        assert_eq!(stats.events_stored, 1);

        let requests = fixture.source.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].0.since, Some(Timestamp::from(JAN_1_2024)));
        assert_eq!(requests[0].0.until, Some(Timestamp::from(JAN_1_2024 + 10 * DAY)));
    }

    #[tokio::test]
    async fn test_window_count_matches_ceiling() {
        let fixture = Fixture::new(|_| vec![]);
        let start = Timestamp::from(JAN_1_2024);
        let now = Timestamp::from(JAN_1_2024 + 25 * DAY);

        let stats = fixture
            .scheduler(fast_config())
            .run_with_clock(start, || now)
            .await
            .unwrap();

        assert_eq!(stats.windows, 3);
        assert_eq!(stats.windows, window_count(start, now, DEFAULT_WINDOW_SPAN));
    }

    #[tokio::test]
    async fn test_future_start_processes_one_window() {
        let fixture = Fixture::new(|_| vec![]);
        let now = Timestamp::from(JAN_1_2024);

        let stats = fixture
            .scheduler(fast_config())
            .run_with_clock(Timestamp::from(JAN_1_2024 + 5 * DAY), || now)
            .await
            .unwrap();

        assert_eq!(stats.windows, 1);
    }

    #[tokio::test]
    async fn test_windows_are_contiguous() {
        let fixture = Fixture::new(|_| vec![]);
        let now = Timestamp::from(JAN_1_2024 + 30 * DAY);

        fixture
            .scheduler(fast_config())
            .run_with_clock(Timestamp::from(JAN_1_2024), || now)
            .await
            .unwrap();

        let requests = fixture.source.requests();
        assert_eq!(requests.len(), 3);
        for pair in requests.windows(2) {
            assert_eq!(pair[0].0.until, pair[1].0.since);
        }
    }

    #[tokio::test]
    async fn test_events_spread_across_windows_all_stored() {
        let fixture = Fixture::new(|k| {
            vec![
                note_at(k, JAN_1_2024 + DAY),
                note_at(k, JAN_1_2024 + 12 * DAY),
                note_at(k, JAN_1_2024 + 21 * DAY),
            ]
        });
        let now = Timestamp::from(JAN_1_2024 + 25 * DAY);

        let stats = fixture
            .scheduler(fast_config())
            .run_with_clock(Timestamp::from(JAN_1_2024), || now)
            .await
            .unwrap();

        assert_eq!(stats.events_stored, 3);
        assert_eq!(fixture.outbox.count().unwrap(), 3);
        assert_eq!(fixture.counters.owner_imported(), 3);
    }

    #[tokio::test]
    async fn test_boundary_event_stored_once() {
        // An event exactly on a window boundary matches both windows
        let fixture = Fixture::new(|k| vec![note_at(k, JAN_1_2024 + 10 * DAY)]);
        let now = Timestamp::from(JAN_1_2024 + 20 * DAY);

        let stats = fixture
            .scheduler(fast_config())
            .run_with_clock(Timestamp::from(JAN_1_2024), || now)
            .await
            .unwrap();

        assert_eq!(stats.events_received, 2);
        assert_eq!(stats.events_stored, 1);
        assert_eq!(stats.duplicates, 1);
        assert_eq!(fixture.outbox.count().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_fetch_failure_marks_partial_and_continues() {
        let fixture = Fixture::new(|k| vec![note_at(k, JAN_1_2024 + 12 * DAY)]);
        fixture.source.fail_next_subscriptions(1);
        let now = Timestamp::from(JAN_1_2024 + 20 * DAY);

        let stats = fixture
            .scheduler(fast_config())
            .run_with_clock(Timestamp::from(JAN_1_2024), || now)
            .await
            .unwrap();

        assert_eq!(stats.windows, 2);
        assert_eq!(stats.windows_partial, 1);
        assert_eq!(stats.events_stored, 1);
    }

    #[tokio::test]
    async fn test_deadline_mid_window_keeps_events_and_continues() {
        let fixture = Fixture::new(|k| {
            vec![
                note_at(k, JAN_1_2024 + DAY),
                note_at(k, JAN_1_2024 + 12 * DAY),
            ]
        });
        // First window replays its event, then the relay goes quiet
        fixture.source.hold_next_bounded_open(1);
        let now = Timestamp::from(JAN_1_2024 + 20 * DAY);

        let stats = fixture
            .scheduler(fast_config())
            .run_with_clock(Timestamp::from(JAN_1_2024), || now)
            .await
            .unwrap();

        assert_eq!(stats.windows, 2);
        assert_eq!(stats.windows_partial, 1);
        assert_eq!(stats.events_stored, 2);
        assert_eq!(fixture.source.requests().len(), 2);
    }

    #[tokio::test]
    async fn test_stalled_subscribe_bounded_by_window_deadline() {
        let fixture = Fixture::new(|k| vec![note_at(k, JAN_1_2024 + 12 * DAY)]);
        fixture
            .source
            .stall_next_subscriptions(1, Duration::from_secs(30));
        let now = Timestamp::from(JAN_1_2024 + 20 * DAY);

        let stats = fixture
            .scheduler(fast_config())
            .run_with_clock(Timestamp::from(JAN_1_2024), || now)
            .await
            .unwrap();

        assert_eq!(stats.windows, 2);
        assert_eq!(stats.windows_partial, 1);
        assert_eq!(stats.events_stored, 1);
        assert!(stats.duration < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_publish_failures_do_not_abort() {
        let owner = Keys::generate();
        let source = Arc::new(MemorySource::with_events([
            note_at(&owner, JAN_1_2024 + DAY),
            note_at(&owner, JAN_1_2024 + 12 * DAY),
        ]));
        let scheduler = BackfillScheduler::new(
            fast_config(),
            OwnerKeys::from_keys([owner.public_key()]).unwrap(),
            source,
            Arc::new(FailingStore),
            Arc::new(ImportCounters::new()),
        );
        let now = Timestamp::from(JAN_1_2024 + 20 * DAY);

        let stats = scheduler
            .run_with_clock(Timestamp::from(JAN_1_2024), || now)
            .await
            .unwrap();

        assert_eq!(stats.windows, 2);
        assert_eq!(stats.publish_failures, 2);
        assert_eq!(stats.events_stored, 0);
    }

    #[tokio::test]
    async fn test_foreign_author_not_stored() {
        let stranger = Keys::generate();
        let fixture = Fixture::new(|_| vec![]);
        // Stored under the stranger's key; the authors filter excludes it
        fixture.source.store(note_at(&stranger, JAN_1_2024 + DAY));
        let now = Timestamp::from(JAN_1_2024 + 5 * DAY);

        let stats = fixture
            .scheduler(fast_config())
            .run_with_clock(Timestamp::from(JAN_1_2024), || now)
            .await
            .unwrap();

        assert_eq!(stats.events_stored, 0);
        assert_eq!(fixture.outbox.count().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_bad_start_date_aborts_before_fetch() {
        let fixture = Fixture::new(|_| vec![]);
        let result = fixture
            .scheduler(fast_config())
            .run_from_date("2024-13-45")
            .await;

        assert!(result.is_err());
        assert!(fixture.source.requests().is_empty());
    }

    #[tokio::test]
    async fn test_stop_flag_ends_after_current_window() {
        let fixture = Fixture::new(|_| vec![]);
        let scheduler = fixture.scheduler(fast_config());
        scheduler.stop();
        let now = Timestamp::from(JAN_1_2024 + 100 * DAY);

        let stats = scheduler
            .run_with_clock(Timestamp::from(JAN_1_2024), || now)
            .await
            .unwrap();

        assert_eq!(stats.windows, 1);
    }

    #[tokio::test]
    async fn test_clock_consulted_each_window() {
        // The clock moves forward as the run goes; the loop follows it
        let fixture = Fixture::new(|_| vec![]);
        let calls = AtomicU64::new(0);
        let clock = || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            Timestamp::from(JAN_1_2024 + 15 * DAY + n * 5 * DAY)
        };

        let stats = fixture
            .scheduler(fast_config())
            .run_with_clock(Timestamp::from(JAN_1_2024), clock)
            .await
            .unwrap();

        // Next window starts at 10d (now 15d), then 20d (now 20d)
        assert_eq!(stats.windows, 2);
    }
}

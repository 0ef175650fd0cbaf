//! One-shot tagged inbox merge.
//!
//! Fetches every stored event (no time bounds) whose `p` tag names the
//! owner, under one overall deadline, and runs each through the inbox
//! pipeline. The deadline starts before the subscribe call and covers the
//! fetch and the processing together.

use super::pipeline::{InboxOutcome, InboxPipeline, Verdict};
use crate::Result;
use crate::source::{EventSource, FetchMode};
use metrics::counter;
use outpost_core::{DEFAULT_MERGE_TIMEOUT, owner_reference_filter};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// How often the receive loop checks the running flag.
const RUNNING_POLL: Duration = Duration::from_secs(1);

/// Tunables for the tagged merge.
#[derive(Debug, Clone)]
pub struct MergeConfig {
    /// Deadline covering both the fetch and the processing.
    pub timeout: Duration,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_MERGE_TIMEOUT,
        }
    }
}

/// Statistics from one merge run.
#[derive(Debug, Clone, Default)]
pub struct MergeStats {
    pub events_received: u64,
    pub events_stored: u64,
    pub duplicates: u64,
    pub rejected_untrusted: u64,
    pub rejected_untagged: u64,
    pub publish_failures: u64,
    /// Whether the deadline cut the fetch short.
    pub timed_out: bool,
    /// Whether the subscription could not be opened at all.
    pub fetch_failed: bool,
    /// Whether a stop request ended the merge early.
    pub interrupted: bool,
    pub duration: Duration,
}

/// Trust-filtered import of events that mention the owner.
pub struct TaggedMerge {
    config: MergeConfig,
    pipeline: InboxPipeline,
    source: Arc<dyn EventSource>,
    running: Arc<AtomicBool>,
}

impl TaggedMerge {
    pub fn new(config: MergeConfig, pipeline: InboxPipeline, source: Arc<dyn EventSource>) -> Self {
        Self {
            config,
            pipeline,
            source,
            running: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Share a running flag with the caller; clearing it ends the merge
    /// within a second.
    pub fn with_running_flag(mut self, running: Arc<AtomicBool>) -> Self {
        self.running = running;
        self
    }

    /// Request an early stop.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Run the merge once.
    ///
    /// Only configuration problems are returned as errors; network trouble
    /// shows up in the stats.
    pub async fn run(&self) -> Result<MergeStats> {
        let counters = self.pipeline.counters();
        counters.reset_tagged();

        let filter = owner_reference_filter(self.pipeline.owner().hex_values());
        let timeout = self.config.timeout;
        let started = Instant::now();
        let mut stats = MergeStats::default();

        tracing::info!(
            "📦 importing inbox notes, please wait {} seconds",
            timeout.as_secs()
        );

        let deadline = tokio::time::Instant::now() + timeout;
        let subscribe = self
            .source
            .subscribe(&filter, FetchMode::Bounded { timeout });
        let mut subscription = match tokio::time::timeout_at(deadline, subscribe).await {
            Ok(Ok(subscription)) => Some(subscription),
            Ok(Err(e)) if e.is_transient() => {
                tracing::warn!("Tagged merge fetch failed: {}", e);
                stats.fetch_failed = true;
                stats.duration = started.elapsed();
                return Ok(stats);
            }
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                tracing::warn!("Tagged merge subscribe did not answer within {:?}", timeout);
                stats.timed_out = true;
                None
            }
        };

        while let Some(sub) = subscription.as_mut() {
            if !self.running.load(Ordering::SeqCst) {
                tracing::info!("Tagged merge stopped by shutdown request");
                stats.interrupted = true;
                break;
            }

            let slice = deadline.min(tokio::time::Instant::now() + RUNNING_POLL);
            let envelope = match tokio::time::timeout_at(slice, sub.next()).await {
                Ok(Some(envelope)) => envelope,
                Ok(None) => break,
                Err(_) if slice < deadline => continue,
                Err(_) => {
                    tracing::warn!("Tagged merge hit the {:?} deadline", timeout);
                    stats.timed_out = true;
                    break;
                }
            };

            stats.events_received += 1;
            counter!("merge_events_received_total").increment(1);

            match self.pipeline.process(&envelope.event) {
                InboxOutcome::Stored => {
                    stats.events_stored += 1;
                    counter!("merge_events_accepted_total").increment(1);
                }
                InboxOutcome::Duplicate => stats.duplicates += 1,
                InboxOutcome::Rejected(verdict) => {
                    counter!("merge_events_rejected_total", "reason" => verdict.as_str())
                        .increment(1);
                    match verdict {
                        Verdict::Untrusted => stats.rejected_untrusted += 1,
                        _ => stats.rejected_untagged += 1,
                    }
                }
                InboxOutcome::Failed => stats.publish_failures += 1,
            }
        }

        stats.duration = started.elapsed();
        tracing::info!("📦 imported {} tagged notes", counters.tagged_imported());
        tracing::info!("✅ tagged import complete. please restart the relay");
        tracing::debug!(
            "Merge stats: {} received, {} stored, {} duplicates, {} untrusted, {} untagged, {} failed, took {:?}",
            stats.events_received,
            stats.events_stored,
            stats.duplicates,
            stats.rejected_untrusted,
            stats.rejected_untagged,
            stats.publish_failures,
            stats.duration
        );
        Ok(stats)
    }
}

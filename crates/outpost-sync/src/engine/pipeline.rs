//! Per-event admission and publish steps shared by the engines.
//!
//! Inbox admission requires both a trusted author and a `p` tag naming the
//! owner. The relay-side `#p` filter is only a hint; [`admit`] re-checks the
//! tags locally and its answer is final.

use crate::counters::ImportCounters;
use crate::store::{EventStore, PublishStatus};
use crate::trust::TrustOracle;
use metrics::counter;
use outpost_core::nostr::Event;
use outpost_core::{OwnerKeys, references_owner};
use std::sync::Arc;

/// Why an inbox event was or was not admitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Accepted,
    /// The author is not in the trust set.
    Untrusted,
    /// No `p` tag names one of the owner keys.
    NoOwnerReference,
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Accepted => "accepted",
            Self::Untrusted => "untrusted",
            Self::NoOwnerReference => "no_owner_reference",
        }
    }
}

/// Decide whether an event belongs in the inbox.
pub fn admit(event: &Event, trust: &dyn TrustOracle, owner: &OwnerKeys) -> Verdict {
    if !trust.is_trusted(&event.pubkey) {
        return Verdict::Untrusted;
    }
    if !references_owner(event, owner) {
        return Verdict::NoOwnerReference;
    }
    Verdict::Accepted
}

/// Result of handing one event to a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    Stored,
    Duplicate,
    /// The store returned an error; it has been logged and counted.
    Failed,
}

/// Publish an event, absorbing store errors.
pub fn publish(store: &dyn EventStore, event: &Event) -> PublishOutcome {
    let partition = store.partition().as_str();
    match store.publish(event) {
        Ok(PublishStatus::Stored) => PublishOutcome::Stored,
        Ok(PublishStatus::Duplicate) => {
            counter!("store_events_duplicate_total", "partition" => partition).increment(1);
            tracing::debug!("Event {} already in {}", event.id, partition);
            PublishOutcome::Duplicate
        }
        Err(e) => {
            counter!("store_publish_failures_total", "partition" => partition).increment(1);
            tracing::warn!("Failed to publish event {} to {}: {}", event.id, partition, e);
            PublishOutcome::Failed
        }
    }
}

/// Outcome of running one event through the inbox pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboxOutcome {
    Stored,
    Duplicate,
    Rejected(Verdict),
    Failed,
}

/// Trust check, tag check, then publish to the inbox.
///
/// Shared by the tagged merge and live sync so both apply the same rules.
#[derive(Clone)]
pub struct InboxPipeline {
    owner: OwnerKeys,
    trust: Arc<dyn TrustOracle>,
    inbox: Arc<dyn EventStore>,
    counters: Arc<ImportCounters>,
}

impl InboxPipeline {
    pub fn new(
        owner: OwnerKeys,
        trust: Arc<dyn TrustOracle>,
        inbox: Arc<dyn EventStore>,
        counters: Arc<ImportCounters>,
    ) -> Self {
        Self {
            owner,
            trust,
            inbox,
            counters,
        }
    }

    pub fn owner(&self) -> &OwnerKeys {
        &self.owner
    }

    pub fn counters(&self) -> &Arc<ImportCounters> {
        &self.counters
    }

    /// Admit and publish one event. The event is published at most once
    /// however many of its tags name the owner.
    pub fn process(&self, event: &Event) -> InboxOutcome {
        let verdict = admit(event, self.trust.as_ref(), &self.owner);
        if verdict != Verdict::Accepted {
            tracing::debug!("Rejected inbox event {}: {}", event.id, verdict.as_str());
            return InboxOutcome::Rejected(verdict);
        }

        match publish(self.inbox.as_ref(), event) {
            PublishOutcome::Stored => {
                self.counters.record_tagged();
                InboxOutcome::Stored
            }
            PublishOutcome::Duplicate => InboxOutcome::Duplicate,
            PublishOutcome::Failed => InboxOutcome::Failed,
        }
    }
}

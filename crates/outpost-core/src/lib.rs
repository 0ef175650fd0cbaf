//! Core types for the Outpost sync engines.
//!
//! This crate provides:
//! - Owner identity decoding and `p` tag reference checks
//! - [`SyncFilter`], the filter shape used for relay requests and local matching
//! - Fixed-span [`TimeWindow`]s and start-date parsing for the outbox backfill
//! - Inbox notification classification ([`InboxKind`], [`Notification`])
//! - Prometheus metrics helpers
//! - Shared error types

mod error;
mod event;
mod filter;
mod kind;
pub mod metrics;
mod window;

use std::time::Duration;

// ═══════════════════════════════════════════════════════════════════════════
// Defaults
// ═══════════════════════════════════════════════════════════════════════════

/// Width of one outbox backfill window (ten days).
pub const DEFAULT_WINDOW_SPAN: Duration = Duration::from_secs(240 * 3600);

/// Deadline for the bounded fetch of a single backfill window.
pub const DEFAULT_WINDOW_TIMEOUT: Duration = Duration::from_secs(5);

/// Pause between backfill windows.
pub const DEFAULT_WINDOW_PAUSE: Duration = Duration::from_secs(5);

/// Deadline for the whole tagged inbox merge.
pub const DEFAULT_MERGE_TIMEOUT: Duration = Duration::from_secs(120);

/// How far back the live inbox subscription reaches when it (re)opens.
pub const DEFAULT_LIVE_OVERLAP: Duration = Duration::from_secs(300);

pub use error::{Error, Result};
pub use event::{
    OwnerKeys, REFERENCE_TAG, REFERENCE_TAG_LETTER, reference_values, references_owner,
};
pub use filter::{SyncFilter, owner_reference_filter};
pub use kind::{
    InboxKind, KIND_ENCRYPTED_DM, KIND_FOLLOW_LIST, KIND_REACTION, KIND_REPOST, KIND_TEXT_NOTE,
    KIND_ZAP_RECEIPT, Notification,
};
pub use window::{START_DATE_FORMAT, TimeWindow, parse_start_date, window_count};

// Re-export the nostr crate so dependents share one version of its types.
pub use nostr;

//! Sync engines.
//!
//! ```text
//!                  ┌──────────────┐
//!                  │ EventSource  │  (relay pool, merged + verified)
//!                  └──────┬───────┘
//!          ┌──────────────┼──────────────┐
//!          ▼              ▼              ▼
//!   ┌────────────┐ ┌─────────────┐ ┌────────────┐
//!   │  Backfill  │ │ TaggedMerge │ │  LiveSync  │
//!   │ (windowed) │ │ (one-shot)  │ │ (unbounded)│
//!   └─────┬──────┘ └──────┬──────┘ └─────┬──────┘
//!         │               └──────┬───────┘
//!         │                      ▼
//!         │             InboxPipeline (trust + #p)
//!         ▼                      ▼
//!   ┌──────────┐           ┌──────────┐
//!   │  outbox  │           │  inbox   │ ──▶ notifications (live only)
//!   └──────────┘           └──────────┘
//! ```
//!
//! Each engine is a single consumer loop over one [`Subscription`](crate::source::Subscription).
//! Events are handled one at a time in delivery order.

mod backfill;
mod live;
mod merge;
mod pipeline;

pub use backfill::{BackfillConfig, BackfillScheduler, BackfillStats};
pub use live::{LiveConfig, LiveStats, LiveSync};
pub use merge::{MergeConfig, MergeStats, TaggedMerge};
pub use pipeline::{InboxOutcome, InboxPipeline, PublishOutcome, Verdict, admit, publish};

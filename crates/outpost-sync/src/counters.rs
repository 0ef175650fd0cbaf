//! Process-wide import counters.
//!
//! These are diagnostics only: they are never persisted and reset with the
//! process. Engines hold them behind an `Arc` so the binary can report
//! totals after a run.

use std::sync::atomic::{AtomicU64, Ordering};

/// Running totals of newly stored events per import path.
#[derive(Debug, Default)]
pub struct ImportCounters {
    owner_imported: AtomicU64,
    tagged_imported: AtomicU64,
}

impl ImportCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one newly stored owner (outbox) event.
    pub fn record_owner(&self) -> u64 {
        self.owner_imported.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Record one newly stored tagged (inbox) event.
    pub fn record_tagged(&self) -> u64 {
        self.tagged_imported.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn owner_imported(&self) -> u64 {
        self.owner_imported.load(Ordering::Relaxed)
    }

    pub fn tagged_imported(&self) -> u64 {
        self.tagged_imported.load(Ordering::Relaxed)
    }

    /// Reset the tagged counter at the start of a merge.
    pub fn reset_tagged(&self) {
        self.tagged_imported.store(0, Ordering::Relaxed);
    }
}

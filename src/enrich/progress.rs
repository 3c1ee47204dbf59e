use std::sync::atomic::{AtomicUsize, Ordering};

use serde::Serialize;

/// Run-wide counters shared by every enrichment task.
#[derive(Default)]
pub struct Progress {
    processed: AtomicUsize,
    skipped: AtomicUsize,
    failed: AtomicUsize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Tally {
    pub processed: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl Progress {
    /// Returns the new processed total.
    pub fn record_processed(&self) -> usize {
        self.processed.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn record_skipped(&self) {
        self.skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> Tally {
        Tally {
            processed: self.processed.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

//! Run counters shared by workers and the progress display.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use super::ItemOutcome;

/// Counters updated by concurrent workers.
///
/// `processed` counts items a handler finished with, whatever the outcome.
/// Items that were never handed to a handler because their worker could not
/// clear the gate are counted as `abandoned`.
#[derive(Debug, Default)]
pub struct RunStats {
    total: AtomicUsize,
    processed: AtomicUsize,
    found: AtomicUsize,
    skipped: AtomicUsize,
    failed: AtomicUsize,
    abandoned: AtomicUsize,
    interrupted: AtomicBool,
}

impl RunStats {
    /// Creates zeroed counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of items scheduled.
    #[must_use]
    pub fn total(&self) -> usize {
        self.total.load(Ordering::SeqCst)
    }

    /// Items a handler has finished.
    #[must_use]
    pub fn processed(&self) -> usize {
        self.processed.load(Ordering::SeqCst)
    }

    /// Resources found (recorded or archived).
    #[must_use]
    pub fn found(&self) -> usize {
        self.found.load(Ordering::SeqCst)
    }

    /// Items skipped because earlier runs already covered them.
    #[must_use]
    pub fn skipped(&self) -> usize {
        self.skipped.load(Ordering::SeqCst)
    }

    /// Items whose handling failed.
    #[must_use]
    pub fn failed(&self) -> usize {
        self.failed.load(Ordering::SeqCst)
    }

    /// Items never handled because their worker had no cleared session.
    #[must_use]
    pub fn abandoned(&self) -> usize {
        self.abandoned.load(Ordering::SeqCst)
    }

    /// Items either processed or abandoned.
    #[must_use]
    pub fn settled(&self) -> usize {
        self.processed() + self.abandoned()
    }

    /// Returns true once the run was cancelled.
    #[must_use]
    pub fn interrupted(&self) -> bool {
        self.interrupted.load(Ordering::SeqCst)
    }

    pub(crate) fn set_total(&self, total: usize) {
        self.total.store(total, Ordering::SeqCst);
    }

    pub(crate) fn record(&self, outcome: ItemOutcome) {
        match outcome {
            ItemOutcome::Found(count) => {
                self.found.fetch_add(count, Ordering::SeqCst);
            }
            ItemOutcome::NotFound => {}
            ItemOutcome::Skipped => {
                self.skipped.fetch_add(1, Ordering::SeqCst);
            }
            ItemOutcome::Failed => {
                self.failed.fetch_add(1, Ordering::SeqCst);
            }
        }
        self.processed.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn abandon(&self, count: usize) {
        self.abandoned.fetch_add(count, Ordering::SeqCst);
    }

    pub(crate) fn mark_interrupted(&self) {
        self.interrupted.store(true, Ordering::SeqCst);
    }

    /// Copies the counters into a plain summary.
    #[must_use]
    pub fn snapshot(&self) -> RunSummary {
        RunSummary {
            total: self.total(),
            processed: self.processed(),
            found: self.found(),
            skipped: self.skipped(),
            failed: self.failed(),
            abandoned: self.abandoned(),
            interrupted: self.interrupted(),
        }
    }
}

/// Final counts of a scheduler run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RunSummary {
    /// Items scheduled.
    pub total: usize,
    /// Items handled.
    pub processed: usize,
    /// Resources found.
    pub found: usize,
    /// Items skipped.
    pub skipped: usize,
    /// Items whose handling failed.
    pub failed: usize,
    /// Items never handled because of gate failures.
    pub abandoned: usize,
    /// Whether the run was cancelled.
    pub interrupted: bool,
}

impl RunSummary {
    /// Items left untouched (cancellation).
    #[must_use]
    pub fn unprocessed(&self) -> usize {
        self.total.saturating_sub(self.processed + self.abandoned)
    }

    /// Returns true if every item was handled without failure.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failed == 0 && self.abandoned == 0 && !self.interrupted && self.unprocessed() == 0
    }
}

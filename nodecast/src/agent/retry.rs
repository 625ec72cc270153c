//! Retry queue for broadcasts with unresolved targets.
//!
//! Insertion order is preserved and used as the scan order, so older entries
//! cannot be starved by newer ones. At most one entry is promoted per sweep;
//! callers sweep periodically, which throttles retry storms to one
//! re-admission per tick. Critical sections are strictly bounded — enqueue,
//! scan, remove, clear — never a transport call while the lock is held.

use super::coordinator::QueuedRun;
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::debug;

/// One queued broadcast awaiting its retry window.
pub(crate) struct RetryEntry {
    pub run: QueuedRun,
    pub enqueued_at: Instant,
}

/// In-memory holding area for broadcasts awaiting re-execution.
pub(crate) struct RetryQueue {
    entries: Mutex<VecDeque<RetryEntry>>,
}

impl RetryQueue {
    pub(crate) fn new() -> Self {
        Self {
            entries: Mutex::new(VecDeque::new()),
        }
    }

    /// Appends a run, stamping the current time as its enqueue time.
    pub(crate) async fn enqueue(&self, run: QueuedRun) {
        let mut entries = self.entries.lock().await;
        debug!(
            run_id = run.run_id,
            targets = run.request.node_count(),
            queued = entries.len() + 1,
            "broadcast queued for retry"
        );
        entries.push_back(RetryEntry {
            run,
            enqueued_at: Instant::now(),
        });
    }

    /// Removes and returns the oldest-inserted entry whose age is at least
    /// `min_wait`, along with the number of entries still queued afterwards.
    pub(crate) async fn sweep(&self, min_wait: Duration) -> (Option<QueuedRun>, usize) {
        let mut entries = self.entries.lock().await;
        let now = Instant::now();

        let position = entries
            .iter()
            .position(|entry| now.duration_since(entry.enqueued_at) >= min_wait);

        let promoted = position
            .and_then(|idx| entries.remove(idx))
            .map(|entry| entry.run);

        (promoted, entries.len())
    }

    /// Drops every queued entry without attempting delivery.
    ///
    /// Queued broadcasts are lost by design; their handles, if any, resolve
    /// to `None`.
    pub(crate) async fn purge(&self) -> usize {
        let mut entries = self.entries.lock().await;
        let dropped = entries.len();
        entries.clear();
        dropped
    }

    /// Number of entries currently queued.
    pub(crate) async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }
}

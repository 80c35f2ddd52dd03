//! Counters for the orchestrator.
//!
//! [`Counter`] is an atomic monotonic counter that serializes as a plain
//! number, so [`OrchestratorMetrics`] can be dumped as JSON as-is.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// A monotonically increasing counter backed by [`AtomicU64`].
///
/// All operations use [`Ordering::Relaxed`]: these are statistics, not
/// synchronization.
pub struct Counter(AtomicU64);

impl Counter {
    pub fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    pub fn inc(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

impl Default for Counter {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Counter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Counter").field(&self.get()).finish()
    }
}

impl Serialize for Counter {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.get().serialize(serializer)
    }
}

#[derive(Debug, Default, Serialize)]
pub struct OrchestratorMetrics {
    pub sessions_started: Counter,
    pub sessions_finalized: Counter,
    /// Sessions closed by the overall timeout with targets unanswered.
    pub sessions_timed_out: Counter,
    pub requests_sent: Counter,
    /// Targets failed at dispatch (not found or unreachable).
    pub dispatch_failures: Counter,
    pub responses_recorded: Counter,
    /// Late, duplicate-after-close, or stranger responses.
    pub responses_dropped: Counter,
    pub malformed_frames: Counter,
    pub status_probes: Counter,
}

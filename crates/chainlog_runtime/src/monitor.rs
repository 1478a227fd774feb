//! Ingestion counters.
//!
//! Producers and the worker bump shared atomics; readers take a
//! [`StatsSnapshot`] that is cheap to copy, print or serialize.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Live engine counters
#[derive(Debug, Default)]
pub struct EngineStats {
    accepted: AtomicU64,
    rejected: AtomicU64,
    evicted: AtomicU64,
    committed: AtomicU64,
    persisted: AtomicU64,
    flushes: AtomicU64,
    flush_retries: AtomicU64,
}

impl EngineStats {
    /// All counters at zero
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A record was admitted to the queue
    pub fn record_accepted(&self) {
        self.accepted.fetch_add(1, Ordering::Relaxed);
    }

    /// A record was refused under `reject`
    pub fn record_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// A queued record was dropped under `drop-oldest`
    pub fn record_evicted(&self) {
        self.evicted.fetch_add(1, Ordering::Relaxed);
    }

    /// The worker chained a record
    pub fn record_committed(&self) {
        self.committed.fetch_add(1, Ordering::Relaxed);
    }

    /// A batch of `entries` became durable
    pub fn record_flush(&self, entries: usize) {
        self.flushes.fetch_add(1, Ordering::Relaxed);
        self.persisted.fetch_add(entries as u64, Ordering::Relaxed);
    }

    /// A flush attempt failed and will be retried
    pub fn record_retry(&self) {
        self.flush_retries.fetch_add(1, Ordering::Relaxed);
    }

    /// Point-in-time copy of all counters
    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            accepted: self.accepted.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            evicted: self.evicted.load(Ordering::Relaxed),
            committed: self.committed.load(Ordering::Relaxed),
            persisted: self.persisted.load(Ordering::Relaxed),
            flushes: self.flushes.load(Ordering::Relaxed),
            flush_retries: self.flush_retries.load(Ordering::Relaxed),
        }
    }
}

/// Copy of [`EngineStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    /// Records admitted to the queue
    pub accepted: u64,
    /// Records refused under `reject`
    pub rejected: u64,
    /// Queued records evicted under `drop-oldest`
    pub evicted: u64,
    /// Records chained by the worker
    pub committed: u64,
    /// Records durably written
    pub persisted: u64,
    /// Successful batch writes
    pub flushes: u64,
    /// Failed write attempts that were retried
    pub flush_retries: u64,
}

impl StatsSnapshot {
    /// Records chained but not yet durable
    #[must_use]
    pub const fn pending(&self) -> u64 {
        self.committed.saturating_sub(self.persisted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_new() {
        assert_eq!(EngineStats::new().snapshot(), StatsSnapshot::default());
    }

    #[test]
    fn test_stats_record() {
        let stats = EngineStats::new();
        for _ in 0..5 {
            stats.record_accepted();
            stats.record_committed();
        }
        stats.record_rejected();
        stats.record_evicted();
        stats.record_retry();
        stats.record_flush(3);

        let snap = stats.snapshot();
        assert_eq!(snap.accepted, 5);
        assert_eq!(snap.rejected, 1);
        assert_eq!(snap.evicted, 1);
        assert_eq!(snap.committed, 5);
        assert_eq!(snap.persisted, 3);
        assert_eq!(snap.flushes, 1);
        assert_eq!(snap.flush_retries, 1);
        assert_eq!(snap.pending(), 2);
    }
}

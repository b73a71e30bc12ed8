//! Store activity counters.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// A point-in-time copy of the store's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreStats {
    /// Loads handed to the spawner.
    pub fetches_started: u64,
    /// Triggers that joined a load already in flight.
    pub deduplicated: u64,
    /// Triggers answered from a fresh entry.
    pub fresh_hits: u64,
    /// Loads whose data was applied.
    pub fetches_succeeded: u64,
    /// Loads whose error was applied.
    pub fetches_failed: u64,
    /// Settled loads dropped because the entry was superseded or cleared.
    pub stale_discarded: u64,
    /// Entries seeded from hydration snapshots.
    pub hydrated_entries: u64,
}

#[derive(Debug, Default)]
pub(crate) struct StatsCollector {
    fetches_started: AtomicU64,
    deduplicated: AtomicU64,
    fresh_hits: AtomicU64,
    fetches_succeeded: AtomicU64,
    fetches_failed: AtomicU64,
    stale_discarded: AtomicU64,
    hydrated_entries: AtomicU64,
}

impl StatsCollector {
    pub(crate) fn fetch_started(&self) {
        self.fetches_started.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn deduplicated(&self) {
        self.deduplicated.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn fresh_hit(&self) {
        self.fresh_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn fetch_succeeded(&self) {
        self.fetches_succeeded.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn fetch_failed(&self) {
        self.fetches_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn stale_discarded(&self) {
        self.stale_discarded.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn hydrated(&self, count: u64) {
        self.hydrated_entries.fetch_add(count, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> StoreStats {
        StoreStats {
            fetches_started: self.fetches_started.load(Ordering::Relaxed),
            deduplicated: self.deduplicated.load(Ordering::Relaxed),
            fresh_hits: self.fresh_hits.load(Ordering::Relaxed),
            fetches_succeeded: self.fetches_succeeded.load(Ordering::Relaxed),
            fetches_failed: self.fetches_failed.load(Ordering::Relaxed),
            stale_discarded: self.stale_discarded.load(Ordering::Relaxed),
            hydrated_entries: self.hydrated_entries.load(Ordering::Relaxed),
        }
    }
}

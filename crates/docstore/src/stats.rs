//! Operation counters
//!
//! Every database keeps running counts of collection operations. Tests
//! pin these to verify that caching layers actually short-circuit
//! document reads.

use std::sync::atomic::{AtomicU64, Ordering};

/// Point-in-time operation counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueryStats {
    /// `find` calls.
    pub finds: u64,
    /// `get` calls.
    pub gets: u64,
    /// `insert` and `upsert` calls.
    pub writes: u64,
    /// `remove` and `clear` calls.
    pub removes: u64,
}

#[derive(Debug, Default)]
pub(crate) struct AtomicStats {
    finds: AtomicU64,
    gets: AtomicU64,
    writes: AtomicU64,
    removes: AtomicU64,
}

impl AtomicStats {
    pub(crate) fn record_find(&self) {
        self.finds.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_get(&self) {
        self.gets.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_write(&self) {
        self.writes.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_remove(&self) {
        self.removes.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> QueryStats {
        QueryStats {
            finds: self.finds.load(Ordering::Relaxed),
            gets: self.gets.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            removes: self.removes.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn reset(&self) {
        self.finds.store(0, Ordering::Relaxed);
        self.gets.store(0, Ordering::Relaxed);
        self.writes.store(0, Ordering::Relaxed);
        self.removes.store(0, Ordering::Relaxed);
    }
}

//! Key-range batches and their operation counters.

use crate::config::OpWeights;
use crate::types::{Key, Load, ShardId};
use std::sync::atomic::{AtomicU64, Ordering};

/// Raw operation counts drained from a batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OpCounts {
    pub local_reads: u64,
    pub remote_reads: u64,
    pub local_writes: u64,
    pub flushes: u64,
}

impl OpCounts {
    /// Convert to load units.
    pub fn weigh(&self, weights: &OpWeights) -> Load {
        weights.weigh(
            self.local_reads,
            self.remote_reads,
            self.local_writes,
            self.flushes,
        )
    }
}

/// One contiguous key range `[lb, ub)` with atomic operation counters.
#[derive(Debug)]
pub struct LoadBatch {
    pub(super) lb: Key,
    pub(super) ub: Key,
    /// Next batch in key order, `None` for the key-last batch.
    pub(super) next: Option<ShardId>,
    /// Absorbed by a merge; the id is never reused.
    pub(super) retired: bool,
    local_reads: AtomicU64,
    remote_reads: AtomicU64,
    local_writes: AtomicU64,
    flushes: AtomicU64,
}

impl LoadBatch {
    pub(super) fn new(lb: Key, ub: Key, next: Option<ShardId>) -> Self {
        Self {
            lb,
            ub,
            next,
            retired: false,
            local_reads: AtomicU64::new(0),
            remote_reads: AtomicU64::new(0),
            local_writes: AtomicU64::new(0),
            flushes: AtomicU64::new(0),
        }
    }

    /// Inclusive lower key bound.
    pub fn lb(&self) -> Key {
        self.lb
    }

    /// Exclusive upper key bound.
    pub fn ub(&self) -> Key {
        self.ub
    }

    /// Number of keys in the batch.
    pub fn size(&self) -> u64 {
        self.ub - self.lb
    }

    pub fn next_id(&self) -> Option<ShardId> {
        self.next
    }

    pub fn is_retired(&self) -> bool {
        self.retired
    }

    pub(super) fn record(&self, local_read: u64, remote_read: u64, local_write: u64, flush: u64) {
        self.local_reads.fetch_add(local_read, Ordering::AcqRel);
        self.remote_reads.fetch_add(remote_read, Ordering::AcqRel);
        self.local_writes.fetch_add(local_write, Ordering::AcqRel);
        self.flushes.fetch_add(flush, Ordering::AcqRel);
    }

    /// Take the counts accumulated since the last drain.
    pub(super) fn drain(&self) -> OpCounts {
        OpCounts {
            local_reads: self.local_reads.swap(0, Ordering::AcqRel),
            remote_reads: self.remote_reads.swap(0, Ordering::AcqRel),
            local_writes: self.local_writes.swap(0, Ordering::AcqRel),
            flushes: self.flushes.swap(0, Ordering::AcqRel),
        }
    }

    /// Counts accumulated since the last drain, without draining.
    pub fn pending(&self) -> OpCounts {
        OpCounts {
            local_reads: self.local_reads.load(Ordering::Relaxed),
            remote_reads: self.remote_reads.load(Ordering::Relaxed),
            local_writes: self.local_writes.load(Ordering::Relaxed),
            flushes: self.flushes.load(Ordering::Relaxed),
        }
    }
}

/// Split `[lb, ub)` into `n` contiguous ranges. The first `size % n` ranges
/// get one extra key.
pub(crate) fn split_bounds(lb: Key, ub: Key, n: usize) -> Vec<(Key, Key)> {
    assert!(n > 0, "cannot split a range into 0 parts");
    assert!(lb < ub, "cannot split the empty range [{}, {})", lb, ub);
    let size = ub - lb;
    let base = size / n as u64;
    let remainder = size % n as u64;

    let mut low = lb;
    (0..n as u64)
        .map(|i| {
            let high = low + base + u64::from(i < remainder);
            let bounds = (low, high);
            low = high;
            bounds
        })
        .collect()
}

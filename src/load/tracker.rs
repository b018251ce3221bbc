//! Lock-free per-shard load counters shared with producer threads.

use crate::range::LoadSink;
use crate::types::{Load, ShardId};
use parking_lot::{RwLock, RwLockReadGuard};
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters for a single shard.
#[derive(Debug, Default)]
pub(crate) struct ShardCounter {
    current: AtomicU64,
    round: AtomicU64,
}

impl ShardCounter {
    /// Take everything accumulated since the last drain.
    pub(crate) fn drain(&self) -> Load {
        self.current.swap(0, Ordering::AcqRel)
    }

    pub(crate) fn current(&self) -> Load {
        self.current.load(Ordering::Relaxed)
    }

    pub(crate) fn round(&self) -> Load {
        self.round.load(Ordering::Relaxed)
    }
}

/// Current-load counters for every shard in the arena.
///
/// Increments only take the read side of the lock, so any number of
/// producers proceed in parallel. The write side is taken when a split
/// appends shards, which only happens while the range index holds its
/// exclusive topology lock.
#[derive(Debug)]
pub struct LoadTracker {
    counters: RwLock<Vec<ShardCounter>>,
    track_round_load: bool,
}

impl LoadTracker {
    /// Create counters for `num_shards` shards.
    pub fn new(num_shards: usize, track_round_load: bool) -> Self {
        let counters = (0..num_shards).map(|_| ShardCounter::default()).collect();
        Self {
            counters: RwLock::new(counters),
            track_round_load,
        }
    }

    /// Add load to a shard's current counter.
    pub fn increment(&self, shard: ShardId, amount: Load) {
        let counters = self.counters.read();
        assert!(
            shard < counters.len(),
            "shard {} out of range ({} shards)",
            shard,
            counters.len()
        );
        let counter = &counters[shard];
        counter.current.fetch_add(amount, Ordering::AcqRel);
        if self.track_round_load {
            counter.round.fetch_add(amount, Ordering::Relaxed);
        }
    }

    /// Load accumulated on a shard since the last drain.
    pub fn current(&self, shard: ShardId) -> Load {
        self.counters.read()[shard].current()
    }

    /// Load accumulated on a shard since the last `new_round`.
    pub fn round(&self, shard: ShardId) -> Load {
        self.counters.read()[shard].round()
    }

    /// Whether round counters are maintained.
    pub fn tracks_round_load(&self) -> bool {
        self.track_round_load
    }

    /// Number of shards with counters.
    pub fn len(&self) -> usize {
        self.counters.read().len()
    }

    /// Whether the tracker has no shards.
    pub fn is_empty(&self) -> bool {
        self.counters.read().is_empty()
    }

    /// Clear all round counters.
    pub fn new_round(&self) {
        for counter in self.counters.read().iter() {
            counter.round.store(0, Ordering::Relaxed);
        }
    }

    pub(crate) fn read(&self) -> RwLockReadGuard<'_, Vec<ShardCounter>> {
        self.counters.read()
    }

    /// Append counters for freshly split shards.
    pub(crate) fn grow(&self, additional: usize) {
        let mut counters = self.counters.write();
        counters.extend((0..additional).map(|_| ShardCounter::default()));
    }
}

impl LoadSink for LoadTracker {
    fn increment_load_info(&self, shard: ShardId, amount: Load) {
        self.increment(shard, amount);
    }
}

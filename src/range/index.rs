//! Key-to-shard index with per-range load counters.

use super::batch::{split_bounds, LoadBatch};
use super::LoadSink;
use crate::config::{BalancerConfig, OpWeights};
use crate::error::{Error, Result};
use crate::types::{Key, ShardId};
use parking_lot::{RwLock, RwLockWriteGuard};
use std::collections::BTreeMap;
use std::ops::Bound::{Excluded, Unbounded};
use std::ops::Range;
use std::sync::Arc;
use tracing::{debug, info, trace};

/// Batches plus the upper-bound lookup table.
#[derive(Debug)]
struct RangeTable {
    /// Indexed by shard id; retired batches keep their slot.
    batches: Vec<LoadBatch>,
    /// Exclusive upper bound -> owning batch.
    ub_to_index: BTreeMap<Key, ShardId>,
    /// Key-last batch.
    last: ShardId,
}

impl RangeTable {
    fn lookup(&self, key: Key) -> Option<ShardId> {
        self.ub_to_index
            .range((Excluded(key), Unbounded))
            .next()
            .map(|(_, &id)| id)
    }

    fn live(&self, id: ShardId) -> &LoadBatch {
        assert!(id < self.batches.len(), "shard {} out of range", id);
        let batch = &self.batches[id];
        assert!(!batch.retired, "shard {} was merged away", id);
        batch
    }

    fn flush_batch(&self, id: ShardId, weights: &OpWeights, sink: &dyn LoadSink) {
        self.flush_batch_into(id, id, weights, sink);
    }

    /// Drain batch `id` and report its load under `target`.
    fn flush_batch_into(
        &self,
        id: ShardId,
        target: ShardId,
        weights: &OpWeights,
        sink: &dyn LoadSink,
    ) {
        let load = self.batches[id].drain().weigh(weights);
        if load > 0 {
            sink.increment_load_info(target, load);
        }
    }
}

/// Ordered partition of the key universe into shards.
///
/// Producers record operations against keys under a shared lock; the
/// flusher turns the counts into load and pushes it into a [`LoadSink`].
/// Splits and merges take the lock exclusively through a [`TopologyGuard`]
/// so the matching change in the load model can be made while no key can be
/// routed to a half-built range.
pub struct LoadRangeIndex {
    table: RwLock<RangeTable>,
    weights: OpWeights,
    min_shard_size: u64,
    key_lb: Key,
    key_ub: Key,
    sink: Arc<dyn LoadSink>,
}

impl std::fmt::Debug for LoadRangeIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadRangeIndex")
            .field("key_lb", &self.key_lb)
            .field("key_ub", &self.key_ub)
            .field("min_shard_size", &self.min_shard_size)
            .finish()
    }
}

impl LoadRangeIndex {
    /// Split `[key_lb, key_ub)` evenly into `num_shards` ranges.
    pub fn new(
        key_lb: Key,
        key_ub: Key,
        num_shards: usize,
        weights: OpWeights,
        min_shard_size: u64,
        sink: Arc<dyn LoadSink>,
    ) -> Result<Self> {
        if key_lb >= key_ub {
            return Err(Error::InvalidKeyRange {
                lb: key_lb,
                ub: key_ub,
            });
        }
        if num_shards == 0 {
            return Err(Error::Config("num_shards cannot be 0".into()));
        }
        if min_shard_size == 0 {
            return Err(Error::Config("min_shard_size cannot be 0".into()));
        }
        let smallest = (key_ub - key_lb) / num_shards as u64;
        if smallest < min_shard_size {
            return Err(Error::ShardTooSmall {
                shard_size: smallest,
                min_shard_size,
            });
        }

        let bounds = split_bounds(key_lb, key_ub, num_shards);
        let mut batches = Vec::with_capacity(num_shards);
        let mut ub_to_index = BTreeMap::new();
        for (id, &(lb, ub)) in bounds.iter().enumerate() {
            let next = if id + 1 < num_shards { Some(id + 1) } else { None };
            batches.push(LoadBatch::new(lb, ub, next));
            ub_to_index.insert(ub, id);
        }

        Ok(Self {
            table: RwLock::new(RangeTable {
                batches,
                ub_to_index,
                last: num_shards - 1,
            }),
            weights,
            min_shard_size,
            key_lb,
            key_ub,
            sink,
        })
    }

    /// Build the index described by a balancer configuration.
    pub fn from_config(config: &BalancerConfig, sink: Arc<dyn LoadSink>) -> Result<Self> {
        Self::new(
            config.key_lb,
            config.key_ub,
            config.total_shards(),
            config.weights,
            config.min_shard_size,
            sink,
        )
    }

    /// Record operations against the shard owning `key`.
    pub fn increment_load(
        &self,
        key: Key,
        local_read: u64,
        remote_read: u64,
        local_write: u64,
        flush: u64,
    ) {
        assert!(
            key >= self.key_lb && key < self.key_ub,
            "key {} outside [{}, {})",
            key,
            self.key_lb,
            self.key_ub
        );
        let table = self.table.read();
        let id = match table.lookup(key) {
            Some(id) => id,
            None => panic!("no shard covers key {}", key),
        };
        table.batches[id].record(local_read, remote_read, local_write, flush);
    }

    /// Shard currently covering `key`, or `None` outside the key universe.
    pub fn shard_for_key(&self, key: Key) -> Option<ShardId> {
        if key < self.key_lb || key >= self.key_ub {
            return None;
        }
        self.table.read().lookup(key)
    }

    /// Push the load of every shard into the sink.
    pub fn flush(&self) {
        let table = self.table.read();
        for id in 0..table.batches.len() {
            if !table.batches[id].retired {
                table.flush_batch(id, &self.weights, self.sink.as_ref());
            }
        }
    }

    /// Push the load of one shard into the sink.
    pub fn flush_shard(&self, id: ShardId) {
        let table = self.table.read();
        table.live(id);
        table.flush_batch(id, &self.weights, self.sink.as_ref());
    }

    /// Push the load of the shards with ids in `ids` into the sink.
    pub fn flush_range(&self, ids: Range<ShardId>) {
        let table = self.table.read();
        assert!(
            ids.start < ids.end && ids.end <= table.batches.len(),
            "invalid shard id range {:?}",
            ids
        );
        for id in ids {
            if !table.batches[id].retired {
                table.flush_batch(id, &self.weights, self.sink.as_ref());
            }
        }
    }

    /// Take the topology lock and split shard `id` into up to `requested`
    /// pieces.
    ///
    /// The count is capped so no piece falls below `min_shard_size`; a range
    /// smaller than twice the minimum is left alone. The actual count is
    /// available through [`TopologyGuard::divided`] and is `1` when nothing
    /// was split. New pieces take the next free ids in key order. The lock is
    /// held until the guard is dropped.
    pub fn divide_signal(&self, id: ShardId, requested: usize) -> TopologyGuard<'_> {
        assert!(requested > 1, "a shard must be divided into at least 2 pieces");
        let mut guard = self.lock_topology();
        guard.divided = guard.divide(id, requested);
        guard
    }

    /// Take the topology lock and merge every shard from `from` to `to`
    /// (inclusive, in key order) into `from`.
    pub fn merge_range_signal(&self, from: ShardId, to: ShardId) -> TopologyGuard<'_> {
        let mut guard = self.lock_topology();
        guard.merge_range(from, to);
        guard
    }

    /// Take the topology lock and merge `second` into the shard right
    /// before it, `first`.
    pub fn merge_pair_signal(&self, first: ShardId, second: ShardId) -> TopologyGuard<'_> {
        let mut guard = self.lock_topology();
        guard.merge_pair(first, second);
        guard
    }

    /// Take the topology lock without changing anything.
    pub fn lock_topology(&self) -> TopologyGuard<'_> {
        TopologyGuard {
            index: self,
            table: self.table.write(),
            divided: 1,
        }
    }

    /// Number of shard ids ever allocated, retired ones included.
    pub fn num_shards(&self) -> usize {
        self.table.read().batches.len()
    }

    /// Key range of a live shard.
    pub fn key_range(&self, id: ShardId) -> Option<(Key, Key)> {
        let table = self.table.read();
        table
            .batches
            .get(id)
            .filter(|batch| !batch.retired)
            .map(|batch| (batch.lb, batch.ub))
    }

    /// Live shards as `(id, lb, ub)` in key order.
    pub fn ranges(&self) -> Vec<(ShardId, Key, Key)> {
        let table = self.table.read();
        let mut ranges = Vec::new();
        let mut next = Some(0);
        while let Some(id) = next {
            let batch = &table.batches[id];
            ranges.push((id, batch.lb, batch.ub));
            next = batch.next;
        }
        ranges
    }

    pub fn min_shard_size(&self) -> u64 {
        self.min_shard_size
    }

    pub fn weights(&self) -> &OpWeights {
        &self.weights
    }

    /// Whether the live shards tile `[key_lb, key_ub)` exactly, in key order,
    /// with a consistent lookup table.
    pub fn check_partition(&self) -> bool {
        let table = self.table.read();
        let live = table.batches.iter().filter(|b| !b.retired).count();
        if table.ub_to_index.len() != live {
            return false;
        }

        let mut expected_lb = self.key_lb;
        let mut visited = 0;
        let mut current = Some(0);
        let mut tail = 0;
        while let Some(id) = current {
            let batch = &table.batches[id];
            if batch.retired || batch.lb != expected_lb || batch.lb >= batch.ub {
                return false;
            }
            if table.ub_to_index.get(&batch.ub) != Some(&id) {
                return false;
            }
            expected_lb = batch.ub;
            visited += 1;
            tail = id;
            if visited > live {
                return false;
            }
            current = batch.next;
        }
        visited == live && tail == table.last && expected_lb == self.key_ub
    }
}

/// Exclusive hold on the index topology.
///
/// Returned by the divide and merge signals. Dropping it (or calling
/// [`TopologyGuard::finish_signal`]) releases the lock, so every exit path
/// finishes the signal exactly once.
pub struct TopologyGuard<'a> {
    index: &'a LoadRangeIndex,
    table: RwLockWriteGuard<'a, RangeTable>,
    divided: usize,
}

impl<'a> TopologyGuard<'a> {
    /// Pieces produced by the divide signal, `1` if nothing was split.
    pub fn divided(&self) -> usize {
        self.divided
    }

    /// Merge every shard from `from` to `to` (inclusive, in key order) into
    /// `from`. The absorbed ids are retired.
    pub fn merge_range(&mut self, from: ShardId, to: ShardId) {
        assert_ne!(from, to, "cannot merge shard {} with itself", from);
        let (from_lb, to_lb) = (self.table.live(from).lb, self.table.live(to).lb);
        assert!(
            from_lb < to_lb,
            "shard {} must come before shard {} in key order",
            from,
            to
        );

        let mut chain = vec![from];
        let mut id = from;
        while id != to {
            id = match self.table.batches[id].next {
                Some(next) => next,
                None => panic!("shard {} does not follow shard {}", to, from),
            };
            chain.push(id);
        }

        // pending counts of the whole range now belong to the survivor
        let sink = self.index.sink.as_ref();
        for &id in &chain {
            self.table
                .flush_batch_into(id, from, &self.index.weights, sink);
        }

        let table = &mut *self.table;
        let old_ub = table.batches[from].ub;
        table.ub_to_index.remove(&old_ub);
        for &absorbed in &chain[1..] {
            let ub = table.batches[absorbed].ub;
            table.ub_to_index.remove(&ub);
            table.batches[absorbed].retired = true;
        }
        let (ub, next) = (table.batches[to].ub, table.batches[to].next);
        let survivor = &mut table.batches[from];
        survivor.ub = ub;
        survivor.next = next;
        table.ub_to_index.insert(ub, from);
        if table.last == to {
            table.last = from;
        }

        info!(from, to, merged = chain.len(), "Merged shards");
        debug_assert!(self.partition_holds());
    }

    /// Merge `second` into `first`; `second` must directly follow `first`.
    pub fn merge_pair(&mut self, first: ShardId, second: ShardId) {
        assert_eq!(
            self.table.live(first).next,
            Some(second),
            "shard {} does not directly follow shard {}",
            second,
            first
        );
        self.merge_range(first, second);
    }

    /// Release the topology lock.
    pub fn finish_signal(self) {}

    fn divide(&mut self, id: ShardId, requested: usize) -> usize {
        self.table.live(id);
        self.table
            .flush_batch(id, &self.index.weights, self.index.sink.as_ref());

        let min_shard_size = self.index.min_shard_size;
        let table = &mut *self.table;
        let (lb, ub) = (table.batches[id].lb, table.batches[id].ub);
        assert!(
            ub - lb >= min_shard_size,
            "shard {} is smaller than the minimum shard size",
            id
        );
        let max_divide = ((ub - lb) / min_shard_size) as usize;
        if max_divide <= 1 {
            debug!(shard = id, requested, "Shard too small to divide");
            return 1;
        }
        let num = requested.min(max_divide);

        let bounds = split_bounds(lb, ub, num);
        let old_next = table.batches[id].next;
        let first_new = table.batches.len();
        let end = first_new + num - 1;

        table.batches[id].ub = bounds[0].1;
        table.batches[id].next = Some(first_new);
        table.ub_to_index.insert(bounds[0].1, id);
        for (offset, &(low, high)) in bounds[1..].iter().enumerate() {
            let new_id = first_new + offset;
            let next = if new_id + 1 == end {
                old_next
            } else {
                Some(new_id + 1)
            };
            table.batches.push(LoadBatch::new(low, high, next));
            table.ub_to_index.insert(high, new_id);
        }
        if table.last == id {
            table.last = end - 1;
        }

        info!(shard = id, requested, actual = num, "Divided shard range");
        debug_assert!(self.partition_holds());
        num
    }

    fn partition_holds(&self) -> bool {
        let mut expected_lb = self.index.key_lb;
        let mut visited = 0;
        let mut current = Some(0);
        while let Some(id) = current {
            let batch = &self.table.batches[id];
            if batch.lb != expected_lb || self.table.ub_to_index.get(&batch.ub) != Some(&id) {
                return false;
            }
            expected_lb = batch.ub;
            visited += 1;
            current = batch.next;
        }
        expected_lb == self.index.key_ub && visited == self.table.ub_to_index.len()
    }
}

impl Drop for TopologyGuard<'_> {
    fn drop(&mut self) {
        trace!(divided = self.divided, "Finished topology signal");
    }
}

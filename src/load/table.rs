//! State and operations shared by both membership models.
//!
//! The table owns the shard arena, the node list, the ordered node-by-load
//! index and the per-round transfer log. The membership models wrap it and
//! add their own `apply` and `divide_shard`.

use super::node::ComputeNode;
use super::shard::{RingIter, ShardInfo};
use super::tracker::LoadTracker;
use crate::types::{Load, LoadStats, NodeId, OwnershipTransfer, ShardId};
use std::collections::BTreeSet;
use std::ops::Range;
use std::sync::Arc;
use tracing::trace;

/// Shards, nodes and the ordered node index.
#[derive(Debug)]
pub struct ShardTable {
    /// Shard arena, indexed by shard id.
    pub(super) shards: Vec<ShardInfo>,
    /// Nodes, indexed by node id.
    pub(super) nodes: Vec<ComputeNode>,
    /// Nodes still considered this round, ordered by aggregate load.
    pub(super) ordered: BTreeSet<(Load, NodeId)>,
    /// Transfer log of the current round.
    pub(super) pending: Vec<OwnershipTransfer>,
    /// Load pulled off the max node that is not yet reflected in its position.
    pending_max_delta: Load,
    /// Node the delta belongs to.
    pending_max_node: Option<NodeId>,
    /// Shards at or below this load are insignificant.
    low_load_threshold: Load,
    /// Key-last shard of the ring.
    last_shard: ShardId,
    /// Current-load counters, shared with producers.
    tracker: Arc<LoadTracker>,
}

impl ShardTable {
    /// Create `num_nodes * shards_per_node` shards, handing node `n` the
    /// contiguous ids `n * shards_per_node..(n + 1) * shards_per_node`.
    pub fn new(
        num_nodes: usize,
        shards_per_node: usize,
        low_load_threshold: Load,
        track_round_load: bool,
    ) -> Self {
        assert!(num_nodes > 0, "at least one node is required");
        assert!(shards_per_node > 0, "at least one shard per node is required");

        let total = num_nodes * shards_per_node;
        let shards = (0..total)
            .map(|id| {
                ShardInfo::new(
                    id,
                    id / shards_per_node,
                    (id + total - 1) % total,
                    (id + 1) % total,
                )
            })
            .collect();
        let nodes = (0..num_nodes)
            .map(|n| {
                let first = n * shards_per_node;
                ComputeNode::with_arc(n, first, first + shards_per_node - 1)
            })
            .collect();

        Self {
            shards,
            nodes,
            ordered: BTreeSet::new(),
            pending: Vec::new(),
            pending_max_delta: 0,
            pending_max_node: None,
            low_load_threshold,
            last_shard: total - 1,
            tracker: Arc::new(LoadTracker::new(total, track_round_load)),
        }
    }

    /// Shared current-load counters.
    pub fn tracker(&self) -> &Arc<LoadTracker> {
        &self.tracker
    }

    /// Add load to a shard. Safe to call from any thread through the tracker.
    pub fn increment_load_info(&self, shard: ShardId, amount: Load) {
        self.tracker.increment(shard, amount);
    }

    /// Number of compute nodes.
    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    /// Number of shard ids ever allocated, retired ones included.
    pub fn num_shards(&self) -> usize {
        self.shards.len()
    }

    /// Shard record by id. Panics if the id was never allocated.
    pub fn shard(&self, id: ShardId) -> &ShardInfo {
        &self.shards[id]
    }

    /// Node record by id.
    pub fn node(&self, id: NodeId) -> &ComputeNode {
        &self.nodes[id]
    }

    /// All nodes in id order.
    pub fn nodes(&self) -> &[ComputeNode] {
        &self.nodes
    }

    /// The shard arena in id order, not key order.
    pub fn shards(&self) -> &[ShardInfo] {
        &self.shards
    }

    /// Walk the shards in key order.
    pub fn ring(&self) -> RingIter<'_> {
        RingIter::new(&self.shards)
    }

    /// Key-last shard.
    pub fn last_shard_id(&self) -> ShardId {
        self.last_shard
    }

    /// Transfers recorded so far this round.
    pub fn pending(&self) -> &[OwnershipTransfer] {
        &self.pending
    }

    /// Load removed from the max node since the last `update_max_load`.
    pub fn pending_max_delta(&self) -> Load {
        self.pending_max_delta
    }

    pub fn low_load_threshold(&self) -> Load {
        self.low_load_threshold
    }

    /// Whether a node is still in the ordered index this round.
    pub fn is_ranked(&self, node: NodeId) -> bool {
        self.ordered.contains(&(self.nodes[node].load, node))
    }

    /// Number of nodes still in the ordered index.
    pub fn ranked_len(&self) -> usize {
        self.ordered.len()
    }

    /// Whether a shard is too cold to be worth moving.
    pub fn is_insignificant(&self, shard: ShardId) -> bool {
        self.shards[shard].last_load <= self.low_load_threshold
    }

    /// Drain every shard's current load into its smoothed load, recompute
    /// node aggregates and rebuild the ordered index.
    ///
    /// Also discards any uncommitted transfer log and resets every node's
    /// shard walk.
    pub fn compute_load_and_pass(&mut self) -> LoadStats {
        self.pending.clear();
        self.ordered.clear();
        self.pending_max_delta = 0;
        self.pending_max_node = None;

        let counters = self.tracker.read();
        for node in self.nodes.iter_mut() {
            node.load = 0;
            for &id in &node.shards {
                let shard = &mut self.shards[id];
                shard.pass_load(counters[id].drain());
                shard.in_flight = false;
                node.load += shard.last_load;
            }
            node.sorted = false;
            node.reset_cursor();
            self.ordered.insert((node.load, node.id));
        }
        drop(counters);

        self.stats()
    }

    /// Min, max, mean and sum over the nodes still in the ordered index.
    pub fn stats(&self) -> LoadStats {
        let sum: Load = self.ordered.iter().map(|&(load, _)| load).sum();
        let mean = if self.ordered.is_empty() {
            0
        } else {
            sum / self.ordered.len() as Load
        };
        LoadStats {
            min: self.ordered.first().map_or(0, |&(load, _)| load),
            max: self.ordered.last().map_or(0, |&(load, _)| load),
            mean,
            sum,
        }
    }

    /// Node with the highest aggregate load.
    pub fn max_node_id(&self) -> NodeId {
        match self.ordered.last() {
            Some(&(_, node)) => node,
            None => panic!("no ranked nodes"),
        }
    }

    /// Node with the lowest aggregate load.
    pub fn min_node_id(&self) -> NodeId {
        match self.ordered.first() {
            Some(&(_, node)) => node,
            None => panic!("no ranked nodes"),
        }
    }

    pub fn max_node(&self) -> &ComputeNode {
        &self.nodes[self.max_node_id()]
    }

    pub fn min_node(&self) -> &ComputeNode {
        &self.nodes[self.min_node_id()]
    }

    /// Record a move of the shard at `idx` in the max node's sorted list to
    /// the min node.
    ///
    /// The min node's load and position change immediately. The max node's
    /// change accumulates in `pending_max_delta` until `update_max_load`.
    pub fn change_owner_from_max_to_min(&mut self, idx: usize) {
        let from = self.max_node_id();
        let to = self.min_node_id();
        assert_ne!(from, to, "cannot move a shard from node {} to itself", from);
        if let Some(node) = self.pending_max_node {
            assert_eq!(
                node, from,
                "update_max_load must run before walking another max node"
            );
        }

        let node = &self.nodes[from];
        assert!(
            idx < node.shards.len(),
            "shard index {} out of range for node {} ({} shards)",
            idx,
            from,
            node.shards.len()
        );
        let shard_id = node.shards[idx];
        let shard = &mut self.shards[shard_id];
        assert_eq!(shard.owner, from, "shard {} is not owned by node {}", shard_id, from);
        assert!(!shard.in_flight, "shard {} is already being moved", shard_id);
        shard.in_flight = true;
        let load = shard.last_load;

        let to_load = self.nodes[to].load + load;
        self.set_node_load(to, to_load);
        self.pending_max_delta += load;
        self.pending_max_node = Some(from);
        self.pending.push(OwnershipTransfer::new(from, to, shard_id));

        trace!(shard = shard_id, from, to, load, "Recorded shard transfer");
    }

    /// Apply the accumulated `pending_max_delta` to the node it was taken
    /// from and re-position that node in the ordered index.
    pub fn update_max_load(&mut self) {
        if let Some(node) = self.pending_max_node.take() {
            let current = self.nodes[node].load;
            debug_assert!(
                current >= self.pending_max_delta,
                "node {} load {} below pending delta {}",
                node,
                current,
                self.pending_max_delta
            );
            self.set_node_load(node, current.saturating_sub(self.pending_max_delta));
        }
        self.pending_max_delta = 0;
    }

    /// Remove the max node from consideration for the rest of the round.
    pub fn ignore_max(&mut self, stats: &mut LoadStats) -> NodeId {
        assert!(self.ordered.len() > 1, "cannot ignore the last ranked node");
        let Some((_, node)) = self.ordered.pop_last() else {
            unreachable!()
        };
        self.after_ignore(stats);
        node
    }

    /// Remove the min node from consideration for the rest of the round.
    pub fn ignore_min(&mut self, stats: &mut LoadStats) -> NodeId {
        assert!(self.ordered.len() > 1, "cannot ignore the last ranked node");
        let Some((_, node)) = self.ordered.pop_first() else {
            unreachable!()
        };
        self.after_ignore(stats);
        node
    }

    /// Restricted boundary shifts can move load between ranked and ignored
    /// nodes, so the statistics are rebuilt from the ranked set.
    fn after_ignore(&mut self, stats: &mut LoadStats) {
        *stats = self.stats();
        self.pending_max_delta = 0;
        self.pending_max_node = None;
    }

    /// Clear the diagnostic round counters.
    pub fn new_round(&self) {
        self.tracker.new_round();
    }

    /// Check that the ring visits every shard exactly once starting and
    /// ending at shard 0, with consistent back links.
    pub fn check_ring(&self) -> bool {
        let total = self.shards.len();
        if total == 0 {
            return true;
        }
        if self.shards[0].prev != self.last_shard || self.shards[self.last_shard].next != 0 {
            return false;
        }
        let mut seen = vec![false; total];
        let mut current = 0;
        for _ in 0..total {
            if seen[current] {
                return false;
            }
            seen[current] = true;
            let next = self.shards[current].next;
            if next >= total || self.shards[next].prev != current {
                return false;
            }
            current = next;
        }
        current == 0 && seen.iter().all(|&s| s)
    }

    /// Whether every node's `first_shard..=last_shard` arc holds exactly its
    /// `num_shards` shards, all owned by it, and arcs follow each other in
    /// node order around the ring. Only maintained by the restricted model.
    pub fn check_arcs(&self) -> bool {
        let num_nodes = self.nodes.len();
        for (n, node) in self.nodes.iter().enumerate() {
            let mut id = node.first_shard;
            let mut count = 1;
            loop {
                if self.shards[id].owner != n {
                    return false;
                }
                if id == node.last_shard {
                    break;
                }
                id = self.shards[id].next;
                count += 1;
                if count > node.num_shards {
                    return false;
                }
            }
            if count != node.num_shards {
                return false;
            }
            let following = &self.nodes[(n + 1) % num_nodes];
            if self.shards[node.last_shard].next != following.first_shard {
                return false;
            }
        }
        true
    }

    /// Shard under the node's walk, sorting the node's list first if needed.
    /// Returns the list position and the shard id.
    pub(crate) fn cursor_shard(&mut self, node: NodeId) -> Option<(usize, ShardId)> {
        self.sort_shards_if_needed(node);
        let node = &self.nodes[node];
        node.cursor
            .position(node.shards.len())
            .map(|idx| (idx, node.shards[idx]))
    }

    pub(crate) fn advance_cursor(&mut self, node: NodeId) {
        self.nodes[node].cursor.advance();
    }

    /// Re-sort the node's shards and restart its walk at the highest load.
    pub(crate) fn reset_cursor(&mut self, node: NodeId) {
        self.nodes[node].sorted = false;
        self.sort_shards_if_needed(node);
    }

    fn sort_shards_if_needed(&mut self, node: NodeId) {
        let shards = &self.shards;
        let node = &mut self.nodes[node];
        if !node.sorted {
            node.shards.sort_by_key(|&id| shards[id].last_load);
            node.sorted = true;
            node.reset_cursor();
        }
    }

    /// Set a node's aggregate load, re-positioning it only if it is ranked.
    pub(super) fn set_node_load(&mut self, node: NodeId, load: Load) {
        let old = self.nodes[node].load;
        if self.ordered.remove(&(old, node)) {
            self.ordered.insert((load, node));
        }
        self.nodes[node].load = load;
    }

    /// Split `target` into `num` pieces linked in key order right after it.
    ///
    /// The target keeps the first piece; the other `num - 1` pieces get
    /// fresh ids appended to the arena, which are returned. Every piece
    /// starts with `last_load / num`. Membership is left to the caller.
    pub(super) fn split_shard(&mut self, target: ShardId, num: usize) -> Range<ShardId> {
        assert!(num > 1, "a shard must be divided into at least 2 pieces");
        assert!(target < self.shards.len(), "shard {} out of range", target);

        let piece = self.shards[target].last_load / num as Load;
        let owner = self.shards[target].owner;
        let old_next = self.shards[target].next;
        let first_new = self.shards.len();
        let end = first_new + num - 1;

        self.shards[target].last_load = piece;
        for id in first_new..end {
            let prev = if id == first_new { target } else { id - 1 };
            let next = if id + 1 == end { old_next } else { id + 1 };
            let mut shard = ShardInfo::new(id, owner, prev, next);
            shard.last_load = piece;
            self.shards.push(shard);
        }
        self.shards[target].next = first_new;
        self.shards[old_next].prev = end - 1;
        if target == self.last_shard {
            self.last_shard = end - 1;
        }
        self.tracker.grow(num - 1);

        debug_assert!(self.check_ring());
        first_new..end
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table_with_loads(loads: &[Load]) -> ShardTable {
        let table = ShardTable::new(2, loads.len() / 2, 0, false);
        for (shard, &load) in loads.iter().enumerate() {
            table.increment_load_info(shard, load);
        }
        table
    }

    #[test]
    fn test_initial_layout() {
        let table = ShardTable::new(3, 4, 0, false);
        assert_eq!(table.num_shards(), 12);
        assert_eq!(table.node(1).shards(), &[4, 5, 6, 7]);
        assert_eq!(table.shard(0).prev_id(), 11);
        assert_eq!(table.shard(11).next_id(), 0);
        assert_eq!(table.last_shard_id(), 11);
        assert!(table.check_ring());
        let order: Vec<_> = table.ring().map(|s| s.id()).collect();
        assert_eq!(order, (0..12).collect::<Vec<_>>());
    }

    #[test]
    fn test_compute_load_and_pass_decays() {
        let mut table = table_with_loads(&[40, 0, 10, 10]);
        let stats = table.compute_load_and_pass();
        assert_eq!(stats, LoadStats { min: 20, max: 40, mean: 30, sum: 60 });

        table.increment_load_info(0, 4);
        let stats = table.compute_load_and_pass();
        assert_eq!(table.shard(0).load(), 4 + 20);
        assert_eq!(table.shard(2).load(), 5);
        assert_eq!(table.node(0).load(), 24);
        assert_eq!(stats.sum, 34);
        assert_eq!(table.tracker().current(0), 0);
    }

    #[test]
    fn test_max_min_nodes() {
        let mut table = table_with_loads(&[1, 1, 50, 0]);
        table.compute_load_and_pass();
        assert_eq!(table.max_node_id(), 1);
        assert_eq!(table.min_node_id(), 0);
        assert_eq!(table.max_node().load(), 50);
    }

    #[test]
    fn test_change_owner_defers_max_update() {
        let mut table = table_with_loads(&[30, 20, 0, 0]);
        table.compute_load_and_pass();

        // sorted ascending: [1 (20), 0 (30)], cursor at the top
        let (idx, shard) = table.cursor_shard(0).unwrap();
        assert_eq!(shard, 0);
        table.change_owner_from_max_to_min(idx);

        assert_eq!(table.node(1).load(), 30);
        assert_eq!(table.node(0).load(), 50);
        assert_eq!(table.pending_max_delta(), 30);
        assert!(table.shard(0).is_in_flight());
        assert_eq!(table.pending(), &[OwnershipTransfer::new(0, 1, 0)]);

        table.update_max_load();
        assert_eq!(table.node(0).load(), 20);
        assert_eq!(table.pending_max_delta(), 0);
        assert_eq!(table.max_node_id(), 1);
    }

    #[test]
    #[should_panic(expected = "already being moved")]
    fn test_change_owner_twice_panics() {
        let mut table = table_with_loads(&[30, 20, 0, 0]);
        table.compute_load_and_pass();
        let (idx, _) = table.cursor_shard(0).unwrap();
        table.change_owner_from_max_to_min(idx);
        table.change_owner_from_max_to_min(idx);
    }

    #[test]
    fn test_ignore_max_and_min() {
        let table = ShardTable::new(4, 1, 0, false);
        for (shard, load) in [10, 20, 30, 100].into_iter().enumerate() {
            table.increment_load_info(shard, load);
        }
        let mut table = table;
        let mut stats = table.compute_load_and_pass();
        assert_eq!(stats.mean, 40);

        assert_eq!(table.ignore_max(&mut stats), 3);
        assert_eq!(stats.sum, 60);
        assert_eq!(stats.mean, 20);
        assert_eq!(stats.max, 30);
        assert!(!table.is_ranked(3));

        assert_eq!(table.ignore_min(&mut stats), 0);
        assert_eq!(stats.mean, 25);
        assert_eq!(table.ranked_len(), 2);
    }

    #[test]
    fn test_ignore_after_load_moves_to_ignored_node() {
        let table = ShardTable::new(4, 1, 0, false);
        for (shard, load) in [10, 20, 30, 40].into_iter().enumerate() {
            table.increment_load_info(shard, load);
        }
        let mut table = table;
        let mut stats = table.compute_load_and_pass();
        assert_eq!(table.ignore_max(&mut stats), 3);
        assert_eq!(stats.sum, 60);

        // a neighbour shift hands node 2's load to the ignored node 3
        table.set_node_load(2, 0);
        table.set_node_load(3, 70);

        assert_eq!(table.ignore_max(&mut stats), 1);
        assert_eq!(stats.sum, 10);
        assert_eq!(stats.mean, 5);
        assert_eq!(stats.max, 10);
        assert_eq!(stats.min, 0);
        assert!(!table.is_ranked(3));
    }

    #[test]
    fn test_cursor_walk_order() {
        let mut table = table_with_loads(&[5, 9, 1, 7, 0, 0, 0, 0]);
        table.compute_load_and_pass();
        let mut seen = Vec::new();
        while let Some((_, shard)) = table.cursor_shard(0) {
            seen.push(shard);
            table.advance_cursor(0);
        }
        assert_eq!(seen, vec![1, 3, 0, 2]);
    }

    #[test]
    fn test_split_relinks_ring() {
        let mut table = table_with_loads(&[0, 90, 0, 0]);
        table.compute_load_and_pass();

        let pieces = table.split_shard(1, 3);
        assert_eq!(pieces, 4..6);
        assert_eq!(table.num_shards(), 6);
        assert_eq!(table.tracker().len(), 6);
        assert!(table.check_ring());

        let order: Vec<_> = table.ring().map(|s| s.id()).collect();
        assert_eq!(order, vec![0, 1, 4, 5, 2, 3]);
        for id in [1, 4, 5] {
            assert_eq!(table.shard(id).load(), 30);
            assert_eq!(table.shard(id).owner(), 0);
        }
    }

    #[test]
    fn test_split_last_shard_moves_ring_end() {
        let mut table = ShardTable::new(2, 2, 0, false);
        table.split_shard(3, 2);
        assert_eq!(table.last_shard_id(), 4);
        assert_eq!(table.shard(4).next_id(), 0);
        assert_eq!(table.shard(0).prev_id(), 4);
        assert!(table.check_ring());
    }

    #[test]
    fn test_insignificance() {
        let mut table = ShardTable::new(2, 1, 5, false);
        table.increment_load_info(0, 5);
        table.increment_load_info(1, 6);
        table.compute_load_and_pass();
        assert!(table.is_insignificant(0));
        assert!(!table.is_insignificant(1));
    }
}

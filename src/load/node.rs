//! Compute nodes and their shard membership.

use crate::types::{Load, NodeId, ShardId};

/// Position of a node's walk over its shards, highest load first.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct ShardCursor {
    idx: usize,
    valid: bool,
}

impl ShardCursor {
    /// Point at the last (highest-load) element of a list of `len` shards.
    pub(crate) fn reset(&mut self, len: usize) {
        if len == 0 {
            self.idx = 0;
            self.valid = false;
        } else {
            self.idx = len - 1;
            self.valid = true;
        }
    }

    pub(crate) fn position(&self, len: usize) -> Option<usize> {
        (self.valid && self.idx < len).then_some(self.idx)
    }

    pub(crate) fn advance(&mut self) {
        if !self.valid || self.idx == 0 {
            self.valid = false;
        } else {
            self.idx -= 1;
        }
    }

    pub(crate) fn invalidate(&mut self) {
        self.valid = false;
    }
}

/// A unit of shard ownership.
///
/// The unrestricted model keeps `shards` authoritative and sorts it lazily
/// by load. The restricted model treats `first_shard..=last_shard` (walked
/// along the ring) as authoritative and rebuilds `shards` on commit.
#[derive(Debug, Clone)]
pub struct ComputeNode {
    /// Node id.
    pub(crate) id: NodeId,
    /// Sum of the owned shards' smoothed loads.
    pub(crate) load: Load,
    /// Owned shard ids.
    pub(crate) shards: Vec<ShardId>,
    /// Whether `shards` is sorted by ascending load.
    pub(crate) sorted: bool,
    /// Walk state over `shards`.
    pub(crate) cursor: ShardCursor,
    /// Left boundary of the node's arc.
    pub(crate) first_shard: ShardId,
    /// Right boundary of the node's arc.
    pub(crate) last_shard: ShardId,
    /// Number of owned shards.
    pub(crate) num_shards: usize,
}

impl ComputeNode {
    /// Create a node owning the contiguous ids `first..=last`.
    pub(crate) fn with_arc(id: NodeId, first: ShardId, last: ShardId) -> Self {
        let shards: Vec<ShardId> = (first..=last).collect();
        let num_shards = shards.len();
        Self {
            id,
            load: 0,
            shards,
            sorted: false,
            cursor: ShardCursor::default(),
            first_shard: first,
            last_shard: last,
            num_shards,
        }
    }

    /// Node id.
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Aggregate load.
    pub fn load(&self) -> Load {
        self.load
    }

    /// Owned shard ids. In the restricted model this is current as of the
    /// last commit.
    pub fn shards(&self) -> &[ShardId] {
        &self.shards
    }

    /// Number of owned shards.
    pub fn num_shards(&self) -> usize {
        self.num_shards
    }

    /// Leftmost shard of the node's arc (restricted model).
    pub fn first_shard(&self) -> ShardId {
        self.first_shard
    }

    /// Rightmost shard of the node's arc (restricted model).
    pub fn last_shard(&self) -> ShardId {
        self.last_shard
    }

    pub(crate) fn reset_cursor(&mut self) {
        self.cursor.reset(self.shards.len());
    }

    /// Drop a shard from the explicit list.
    pub(crate) fn remove_shard(&mut self, shard: ShardId) {
        match self.shards.iter().position(|&s| s == shard) {
            Some(pos) => {
                self.shards.remove(pos);
            }
            None => panic!("shard {} is not owned by node {}", shard, self.id),
        }
        self.num_shards = self.shards.len();
        self.cursor.invalidate();
    }

    /// Add a shard to the explicit list; the list is no longer sorted.
    pub(crate) fn push_shard(&mut self, shard: ShardId) {
        self.shards.push(shard);
        self.num_shards = self.shards.len();
        self.sorted = false;
        self.cursor.invalidate();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cursor_walks_down() {
        let mut cursor = ShardCursor::default();
        assert_eq!(cursor.position(3), None);

        cursor.reset(3);
        assert_eq!(cursor.position(3), Some(2));
        cursor.advance();
        assert_eq!(cursor.position(3), Some(1));
        cursor.advance();
        assert_eq!(cursor.position(3), Some(0));
        cursor.advance();
        assert_eq!(cursor.position(3), None);
        cursor.advance();
        assert_eq!(cursor.position(3), None);
    }

    #[test]
    fn test_cursor_empty_list() {
        let mut cursor = ShardCursor::default();
        cursor.reset(0);
        assert_eq!(cursor.position(0), None);
    }

    #[test]
    fn test_node_membership() {
        let mut node = ComputeNode::with_arc(1, 4, 7);
        assert_eq!(node.shards(), &[4, 5, 6, 7]);
        assert_eq!(node.num_shards(), 4);

        node.remove_shard(5);
        node.push_shard(12);
        assert_eq!(node.shards(), &[4, 6, 7, 12]);
        assert_eq!(node.num_shards(), 4);
        assert!(!node.sorted);
    }

    #[test]
    #[should_panic(expected = "not owned by node")]
    fn test_remove_unowned_shard() {
        let mut node = ComputeNode::with_arc(0, 0, 3);
        node.remove_shard(9);
    }
}

//! Shard records and the ring that links them in key order.

use crate::types::{Load, NodeId, ShardId};

/// One contiguous key sub-range and its ownership.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardInfo {
    pub(crate) id: ShardId,
    pub(crate) owner: NodeId,
    pub(crate) next: ShardId,
    pub(crate) prev: ShardId,
    pub(crate) last_load: Load,
    /// Already recorded in this round's transfer log.
    pub(crate) in_flight: bool,
}

impl ShardInfo {
    pub(crate) fn new(id: ShardId, owner: NodeId, prev: ShardId, next: ShardId) -> Self {
        Self {
            id,
            owner,
            next,
            prev,
            last_load: 0,
            in_flight: false,
        }
    }

    /// Shard id.
    pub fn id(&self) -> ShardId {
        self.id
    }

    /// Owning node.
    pub fn owner(&self) -> NodeId {
        self.owner
    }

    /// Next shard in key order (wraps to the first shard).
    pub fn next_id(&self) -> ShardId {
        self.next
    }

    /// Previous shard in key order (wraps to the last shard).
    pub fn prev_id(&self) -> ShardId {
        self.prev
    }

    /// Smoothed load as of the last `compute_load_and_pass`.
    pub fn load(&self) -> Load {
        self.last_load
    }

    /// Whether a transfer of this shard is pending in the current round.
    pub fn is_in_flight(&self) -> bool {
        self.in_flight
    }

    /// Fold freshly drained load into the smoothed value.
    pub(crate) fn pass_load(&mut self, drained: Load) {
        self.last_load = drained + self.last_load / 2;
    }
}

/// Walks the shard ring in key order starting at shard 0.
pub struct RingIter<'a> {
    shards: &'a [ShardInfo],
    next: Option<ShardId>,
}

impl<'a> RingIter<'a> {
    pub(crate) fn new(shards: &'a [ShardInfo]) -> Self {
        Self {
            shards,
            next: if shards.is_empty() { None } else { Some(0) },
        }
    }
}

impl<'a> Iterator for RingIter<'a> {
    type Item = &'a ShardInfo;

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.next?;
        let shard = &self.shards[id];
        self.next = if shard.next == 0 { None } else { Some(shard.next) };
        Some(shard)
    }
}

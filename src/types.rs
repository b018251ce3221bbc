//! Core types used throughout the balancer.

use serde::{Deserialize, Serialize};

/// Compute node identifier. Nodes are numbered `0..num_nodes` and never removed.
pub type NodeId = usize;

/// Shard identifier. Doubles as the shard's slot in the shard arena.
pub type ShardId = usize;

/// A key in the integer key universe.
pub type Key = u64;

/// Time-weighted load units.
pub type Load = u64;

/// Signed classification of a load's deviation from the mean, in `-2..=2`.
pub type Severity = i8;

/// Side of a node's key arc, used by the restricted model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Towards lower keys (node `n - 1`).
    Left,
    /// Towards higher keys (node `n + 1`).
    Right,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Left => write!(f, "left"),
            Direction::Right => write!(f, "right"),
        }
    }
}

/// An intent to move one shard between two nodes.
///
/// Records accumulate in the per-round transfer log and are committed by
/// `apply()`, which returns them to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnershipTransfer {
    /// Node giving the shard away.
    pub from: NodeId,
    /// Node receiving the shard.
    pub to: NodeId,
    /// Shard being moved.
    pub shard: ShardId,
}

impl OwnershipTransfer {
    /// Create a new transfer record.
    pub fn new(from: NodeId, to: NodeId, shard: ShardId) -> Self {
        Self { from, to, shard }
    }
}

impl std::fmt::Display for OwnershipTransfer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "shard {} from node {} to node {}",
            self.shard, self.from, self.to
        )
    }
}

/// The committed diff list of one balancing round.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferBatch {
    /// Round number that produced the batch.
    pub round: u64,
    /// Committed transfers, in commit order.
    pub transfers: Vec<OwnershipTransfer>,
}

impl TransferBatch {
    /// Create a batch for the given round.
    pub fn new(round: u64, transfers: Vec<OwnershipTransfer>) -> Self {
        Self { round, transfers }
    }

    /// Number of transfers in the batch.
    pub fn len(&self) -> usize {
        self.transfers.len()
    }

    /// Whether the round committed nothing.
    pub fn is_empty(&self) -> bool {
        self.transfers.is_empty()
    }

    /// Serialize the batch for an external ownership directory.
    pub fn to_bytes(&self) -> crate::error::Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    /// Deserialize a batch produced by [`TransferBatch::to_bytes`].
    pub fn from_bytes(data: &[u8]) -> crate::error::Result<Self> {
        Ok(bincode::deserialize(data)?)
    }
}

/// Aggregate node statistics computed at the start of every round.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadStats {
    /// Lowest aggregate node load.
    pub min: Load,
    /// Highest aggregate node load.
    pub max: Load,
    /// `sum / node_count`, integer division.
    pub mean: Load,
    /// Sum over all nodes.
    pub sum: Load,
}

impl LoadStats {
    /// Spread between the most and least loaded node.
    pub fn spread(&self) -> Load {
        self.max - self.min
    }
}

//! Shard and node load model.
//!
//! This module tracks how much load every shard receives and which node owns
//! it:
//! - [`LoadTracker`]: atomic per-shard counters fed by producer threads
//! - [`ShardTable`]: the shard ring, the nodes, the ordered node-by-load
//!   index and the per-round transfer log
//! - [`UnrestrictedModel`]: any shard may move to any node
//! - [`RestrictedModel`]: every node owns one contiguous arc of the ring
//!
//! # Rounds
//!
//! ```text
//! compute_load_and_pass()      drain counters, decay, rank nodes
//!         │
//!         ▼
//! change_owner / divide        record intents, split shards
//!         │
//!         ▼
//! apply()                      commit membership, return the diff list
//! ```
//!
//! Smoothed shard load follows `last = drained + last / 2`, so load that
//! stops arriving halves every round.

mod node;
mod restricted;
mod shard;
mod table;
mod tracker;
mod unrestricted;

pub use node::ComputeNode;
pub use restricted::RestrictedModel;
pub use shard::{RingIter, ShardInfo};
pub use table::ShardTable;
pub use tracker::LoadTracker;
pub use unrestricted::UnrestrictedModel;

use crate::types::{NodeId, OwnershipTransfer, ShardId};

/// A membership model over a [`ShardTable`].
pub trait LoadModel: Send + std::fmt::Debug {
    /// Shared table state.
    fn table(&self) -> &ShardTable;

    /// Shared table state, mutably.
    fn table_mut(&mut self) -> &mut ShardTable;

    /// Whether nodes are restricted to contiguous arcs.
    fn is_restricted(&self) -> bool;

    /// Commit the round's transfer log and return the committed moves.
    fn apply(&mut self) -> Vec<OwnershipTransfer>;

    /// Split `shard`, owned by `owner`, into `num` pieces. The node's
    /// aggregate load is unchanged.
    fn divide_shard(&mut self, owner: NodeId, shard: ShardId, num: usize);
}

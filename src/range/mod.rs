//! Load-range index.
//!
//! Partitions the key universe into contiguous ranges ("batches"), one per
//! shard, and counts operations against them:
//!
//! ```text
//!  producers ──increment_load(key)──► LoadRangeIndex ──flush()──► LoadSink
//!                 (shared lock)        ub -> shard id      weighs ops
//!                                                           into load
//! ```
//!
//! Topology changes (divide and merge) take the lock exclusively and hand
//! back a [`TopologyGuard`]; the caller mirrors the change in the load model
//! before dropping the guard.
//!
//! Batch ids and load-model shard ids are the same numbers: both sides
//! append split pieces at the end of their arenas in key order, and merged
//! ids are retired rather than reused.

mod batch;
mod index;

pub use batch::{LoadBatch, OpCounts};
pub use index::{LoadRangeIndex, TopologyGuard};

use crate::types::{Load, ShardId};

/// Receiver of flushed shard load.
pub trait LoadSink: Send + Sync {
    /// Add `load` to the shard's current load.
    fn increment_load_info(&self, shard: ShardId, load: Load);
}

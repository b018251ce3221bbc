//! Load-driven ownership rebalancing for contiguous key-range shards.
//!
//! A key universe `[lb, ub)` is cut into shards, each owned by one compute
//! node. Producers count operations against keys; a background loop turns
//! those counts into smoothed per-shard load and periodically moves shard
//! ownership so that no node carries much more than the mean.
//!
//! Three strategies are available:
//! - **Fixed**: move whole shards from the most to the least loaded node
//! - **Dynamic**: split hot shards into smaller ranges before moving them
//! - **Dynamic restricted**: only shift arc boundaries between neighbouring
//!   nodes, so every node keeps one contiguous range of the key space
//!
//! # Example
//!
//! ```rust,no_run
//! use shard_balancer::{BalancerConfig, BalancerRuntime, LoadBalancer, Strategy};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = BalancerConfig::new(4, 16)
//!         .with_strategy(Strategy::Dynamic)
//!         .with_rebalance_period(Duration::from_secs(1));
//!     let balancer = Arc::new(LoadBalancer::new(config)?);
//!     let mut runtime = BalancerRuntime::start_with_config(balancer.clone())?;
//!
//!     // one local read against key 42
//!     balancer.increment_load(42, 1, 0, 0, 0);
//!
//!     let mut report = String::new();
//!     balancer.print(&mut report, 0, 16, 8);
//!     println!("{}", report);
//!
//!     runtime.shutdown();
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │              Producer threads                │
//! │  increment_load(key, lr, rr, lw, flush)      │
//! └─────────────────────────────────────────────┘
//!                     │
//!                     ▼
//! ┌─────────────────────────────────────────────┐
//! │          LoadRangeIndex  (range)             │
//! │  key -> shard, per-shard operation batches  │
//! └─────────────────────────────────────────────┘
//!                     │ flush (flusher thread)
//!                     ▼
//! ┌─────────────────────────────────────────────┐
//! │          LoadTracker  (load)                 │
//! │  per-shard current / round counters          │
//! └─────────────────────────────────────────────┘
//!                     │ compute_load_and_pass
//!                     ▼
//! ┌─────────────────────────────────────────────┐
//! │   LoadBalancer  (balancer thread)            │
//! │   ShardTable + Fixed/Dynamic/Restricted      │
//! └─────────────────────────────────────────────┘
//!                     │
//!                     ▼
//!            TransferBatch (shard, from, to)
//! ```
//!
//! # Locking
//!
//! Splits hold the range index's topology lock while the load model grows,
//! so shard ids in the index and in the model never diverge. A
//! [`PauseHandle`] lets a reporter stop producers, the flusher and the
//! balancer to read a consistent view.

pub mod balancer;
pub mod config;
pub mod error;
pub mod load;
pub mod metrics;
pub mod range;
pub mod report;
pub mod runtime;
pub mod types;

#[cfg(test)]
mod testing;

// Re-export main types for convenience
pub use balancer::{
    check_load, get_load_req, BalancePolicy, BalancerPause, DynamicPolicy, FixedPolicy,
    LoadBalancer, PauseHandle, RestrictedPolicy, RoundContext,
};
pub use config::{BalancerConfig, OpWeights, Strategy};
pub use error::{Error, Result};
pub use types::{Direction, Key, Load, LoadStats, NodeId, OwnershipTransfer, ShardId, TransferBatch};

// Re-export load and range types
pub use load::{LoadModel, LoadTracker, RestrictedModel, ShardTable, UnrestrictedModel};
pub use metrics::{BalancerMetrics, MetricsSnapshot};
pub use range::{LoadRangeIndex, LoadSink, OpCounts, TopologyGuard};
pub use report::{ClusterSnapshot, NodeSnapshot, ShardSnapshot};
pub use runtime::BalancerRuntime;

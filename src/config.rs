//! Configuration types for the balancer.

use crate::error::{Error, Result};
use crate::types::Key;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

/// Control-loop strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Strategy {
    /// Move whole shards from the most to the least loaded node.
    #[default]
    Fixed,

    /// Like `Fixed`, but split hot shards before moving them.
    Dynamic,

    /// Shift load only between adjacent nodes so every node keeps one
    /// contiguous arc of the key space.
    DynamicRestricted,
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Strategy::Fixed => write!(f, "fixed"),
            Strategy::Dynamic => write!(f, "dynamic"),
            Strategy::DynamicRestricted => write!(f, "dynamic restricted"),
        }
    }
}

impl FromStr for Strategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "f" | "fixed" => Ok(Strategy::Fixed),
            "d" | "dynamic" => Ok(Strategy::Dynamic),
            "r" | "restricted" | "dynamic-restricted" | "dynamic_restricted" => {
                Ok(Strategy::DynamicRestricted)
            }
            other => Err(Error::Config(format!(
                "unknown strategy '{}', expected one of [f, d, r]",
                other
            ))),
        }
    }
}

/// Cost of each operation type in load units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpWeights {
    /// Cost of a local read.
    pub local_read: u64,
    /// Cost of a remote read.
    pub remote_read: u64,
    /// Cost of a local write.
    pub local_write: u64,
    /// Cost of a flush.
    pub flush: u64,
}

impl Default for OpWeights {
    fn default() -> Self {
        Self {
            local_read: 1,
            remote_read: 10,
            local_write: 1,
            flush: 100,
        }
    }
}

impl OpWeights {
    /// Create weights from explicit per-operation costs.
    pub fn new(local_read: u64, remote_read: u64, local_write: u64, flush: u64) -> Self {
        Self {
            local_read,
            remote_read,
            local_write,
            flush,
        }
    }

    /// Convert raw operation counts into load units.
    pub fn weigh(&self, local_reads: u64, remote_reads: u64, local_writes: u64, flushes: u64) -> u64 {
        local_reads * self.local_read
            + remote_reads * self.remote_read
            + local_writes * self.local_write
            + flushes * self.flush
    }
}

/// Main configuration for the balancer.
#[derive(Debug, Clone)]
pub struct BalancerConfig {
    /// Number of compute nodes.
    pub num_nodes: usize,

    /// Shards created per node at construction.
    pub shards_per_node: usize,

    /// Inclusive lower bound of the key universe.
    pub key_lb: Key,

    /// Exclusive upper bound of the key universe.
    pub key_ub: Key,

    /// Per-operation load weights.
    pub weights: OpWeights,

    /// Minimum number of keys in any shard.
    pub min_shard_size: u64,

    /// Sleep between balancing rounds.
    pub rebalance_period: Duration,

    /// Imbalance threshold is `mean / load_imbalance_ratio`.
    pub load_imbalance_ratio: u64,

    /// Shards at or below this load are never worth moving.
    pub low_load_threshold: u64,

    /// Control-loop strategy.
    pub strategy: Strategy,

    /// Interval between flushes of the range index into the load model.
    pub flush_period: Duration,

    /// Maintain per-round load counters for reporting.
    pub track_round_load: bool,
}

impl Default for BalancerConfig {
    fn default() -> Self {
        Self {
            num_nodes: 2,
            shards_per_node: 8,
            key_lb: 0,
            key_ub: 1 << 16,
            weights: OpWeights::default(),
            min_shard_size: 1,
            rebalance_period: Duration::from_secs(15),
            load_imbalance_ratio: 100,
            low_load_threshold: 0,
            strategy: Strategy::Fixed,
            flush_period: Duration::from_millis(100),
            track_round_load: false,
        }
    }
}

impl BalancerConfig {
    /// Create a configuration with the given cluster shape.
    pub fn new(num_nodes: usize, shards_per_node: usize) -> Self {
        Self {
            num_nodes,
            shards_per_node,
            ..Default::default()
        }
    }

    /// Set the key universe `[lb, ub)`.
    pub fn with_key_range(mut self, lb: Key, ub: Key) -> Self {
        self.key_lb = lb;
        self.key_ub = ub;
        self
    }

    /// Set the per-operation weights.
    pub fn with_weights(mut self, weights: OpWeights) -> Self {
        self.weights = weights;
        self
    }

    /// Set the minimum shard size.
    pub fn with_min_shard_size(mut self, size: u64) -> Self {
        self.min_shard_size = size;
        self
    }

    /// Set the rebalance period.
    pub fn with_rebalance_period(mut self, period: Duration) -> Self {
        self.rebalance_period = period;
        self
    }

    /// Set the load imbalance ratio.
    pub fn with_load_imbalance_ratio(mut self, ratio: u64) -> Self {
        self.load_imbalance_ratio = ratio;
        self
    }

    /// Set the low-load threshold.
    pub fn with_low_load_threshold(mut self, threshold: u64) -> Self {
        self.low_load_threshold = threshold;
        self
    }

    /// Set the control-loop strategy.
    pub fn with_strategy(mut self, strategy: Strategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Set the flush period.
    pub fn with_flush_period(mut self, period: Duration) -> Self {
        self.flush_period = period;
        self
    }

    /// Enable or disable round-load tracking.
    pub fn with_round_load_tracking(mut self, enabled: bool) -> Self {
        self.track_round_load = enabled;
        self
    }

    /// Total number of shards created at construction.
    pub fn total_shards(&self) -> usize {
        self.num_nodes * self.shards_per_node
    }

    /// Number of keys in the universe.
    pub fn key_space(&self) -> u64 {
        self.key_ub.saturating_sub(self.key_lb)
    }

    /// Check the configuration for values the balancer cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.num_nodes < 2 {
            return Err(Error::Config(format!(
                "num_nodes should be at least 2, got {}",
                self.num_nodes
            )));
        }
        if self.shards_per_node == 0 {
            return Err(Error::Config("shards_per_node cannot be 0".into()));
        }
        if self.key_lb >= self.key_ub {
            return Err(Error::InvalidKeyRange {
                lb: self.key_lb,
                ub: self.key_ub,
            });
        }
        if self.min_shard_size == 0 {
            return Err(Error::Config("min_shard_size cannot be 0".into()));
        }
        if self.load_imbalance_ratio == 0 {
            return Err(Error::Config("load_imbalance_ratio cannot be 0".into()));
        }
        if self.rebalance_period.is_zero() {
            return Err(Error::Config("rebalance_period cannot be 0".into()));
        }
        if self.flush_period.is_zero() {
            return Err(Error::Config("flush_period cannot be 0".into()));
        }

        let smallest = self.key_space() / self.total_shards() as u64;
        if smallest < self.min_shard_size {
            return Err(Error::ShardTooSmall {
                shard_size: smallest,
                min_shard_size: self.min_shard_size,
            });
        }

        Ok(())
    }
}

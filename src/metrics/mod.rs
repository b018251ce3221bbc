//! Metrics for monitoring the balancer.
//!
//! Counters track what the control loop did (rounds, transfers, splits);
//! gauges hold the node statistics of the most recent round.
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │               BalancerMetrics                 │
//! │  ┌──────────────────┐  ┌──────────────────┐  │
//! │  │ Counters         │  │ Gauges           │  │
//! │  │ - rounds         │  │ - shard_count    │  │
//! │  │ - transfers      │  │ - max/min/mean   │  │
//! │  │ - splits/merges  │  │   node load      │  │
//! │  └──────────────────┘  └──────────────────┘  │
//! └──────────────────────────────────────────────┘
//! ```

mod instruments;

pub use instruments::{Counter, Gauge};

use crate::types::LoadStats;
use serde::{Deserialize, Serialize};

/// Metrics of one balancer.
#[derive(Debug)]
pub struct BalancerMetrics {
    /// Rounds started.
    pub rounds_total: Counter,
    /// Rounds skipped because the spread was within the threshold.
    pub rounds_skipped: Counter,
    /// Committed shard moves.
    pub transfers_total: Counter,
    /// Shard splits performed.
    pub splits_total: Counter,
    /// Range merges performed.
    pub merges_total: Counter,
    /// Nodes set aside as outliers.
    pub ignored_nodes_total: Counter,

    pub shard_count: Gauge,
    pub max_node_load: Gauge,
    pub min_node_load: Gauge,
    pub mean_node_load: Gauge,
}

impl BalancerMetrics {
    pub fn new() -> Self {
        Self {
            rounds_total: Counter::new("balancer_rounds_total", "Balancing rounds started"),
            rounds_skipped: Counter::new(
                "balancer_rounds_skipped_total",
                "Rounds skipped because load was balanced",
            ),
            transfers_total: Counter::new("balancer_transfers_total", "Committed shard moves"),
            splits_total: Counter::new("balancer_splits_total", "Shard splits"),
            merges_total: Counter::new("balancer_merges_total", "Shard range merges"),
            ignored_nodes_total: Counter::new(
                "balancer_ignored_nodes_total",
                "Outlier nodes set aside during rounds",
            ),
            shard_count: Gauge::new("balancer_shards", "Current number of shards"),
            max_node_load: Gauge::new("balancer_max_node_load", "Highest node load last round"),
            min_node_load: Gauge::new("balancer_min_node_load", "Lowest node load last round"),
            mean_node_load: Gauge::new("balancer_mean_node_load", "Mean node load last round"),
        }
    }

    /// Record the statistics computed at the start of a round.
    pub fn record_stats(&self, stats: &LoadStats, shards: usize) {
        self.rounds_total.inc();
        self.max_node_load.set(stats.max);
        self.min_node_load.set(stats.min);
        self.mean_node_load.set(stats.mean);
        self.shard_count.set(shards as u64);
    }

    /// Record what a round that went past the threshold check did.
    pub fn record_round(&self, transfers: usize, splits: u64, ignored: u64, shards: usize) {
        self.transfers_total.inc_by(transfers as u64);
        self.splits_total.inc_by(splits);
        self.ignored_nodes_total.inc_by(ignored);
        self.shard_count.set(shards as u64);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            rounds_total: self.rounds_total.get(),
            rounds_skipped: self.rounds_skipped.get(),
            transfers_total: self.transfers_total.get(),
            splits_total: self.splits_total.get(),
            merges_total: self.merges_total.get(),
            ignored_nodes_total: self.ignored_nodes_total.get(),
            shard_count: self.shard_count.get(),
            max_node_load: self.max_node_load.get(),
            min_node_load: self.min_node_load.get(),
            mean_node_load: self.mean_node_load.get(),
        }
    }

    /// Format metrics in Prometheus exposition format.
    pub fn to_prometheus(&self) -> String {
        let mut output = String::new();
        for counter in [
            &self.rounds_total,
            &self.rounds_skipped,
            &self.transfers_total,
            &self.splits_total,
            &self.merges_total,
            &self.ignored_nodes_total,
        ] {
            counter.render(&mut output);
        }
        for gauge in [
            &self.shard_count,
            &self.max_node_load,
            &self.min_node_load,
            &self.mean_node_load,
        ] {
            gauge.render(&mut output);
        }
        output
    }
}

impl Default for BalancerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// A point-in-time copy of the balancer metrics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub rounds_total: u64,
    pub rounds_skipped: u64,
    pub transfers_total: u64,
    pub splits_total: u64,
    pub merges_total: u64,
    pub ignored_nodes_total: u64,
    pub shard_count: u64,
    pub max_node_load: u64,
    pub min_node_load: u64,
    pub mean_node_load: u64,
}

impl MetricsSnapshot {
    /// Fraction of rounds that did not need any work.
    pub fn skip_rate(&self) -> f64 {
        if self.rounds_total == 0 {
            0.0
        } else {
            self.rounds_skipped as f64 / self.rounds_total as f64
        }
    }
}

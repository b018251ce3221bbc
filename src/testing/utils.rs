use crate::balancer::LoadBalancer;
use crate::config::{BalancerConfig, Strategy};
use crate::types::{Key, Load, ShardId, TransferBatch};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use std::time::Duration;

/// A balancer plus helpers to feed it and check it.
pub(crate) struct TestCluster {
    pub(crate) balancer: Arc<LoadBalancer>,
}

impl TestCluster {
    /// `nodes` x `shards_per_node` over `[0, 2^16)` with default weights.
    pub(crate) fn new(strategy: Strategy, nodes: usize, shards_per_node: usize) -> Self {
        Self::with_config(
            BalancerConfig::new(nodes, shards_per_node)
                .with_strategy(strategy)
                .with_rebalance_period(Duration::from_millis(10)),
        )
    }

    pub(crate) fn with_config(config: BalancerConfig) -> Self {
        Self {
            balancer: Arc::new(LoadBalancer::new(config).unwrap()),
        }
    }

    /// Count `reads` local reads against `key`.
    pub(crate) fn hit(&self, key: Key, reads: u64) {
        self.balancer.increment_load(key, reads, 0, 0, 0);
    }

    /// Count `reads` local reads against the first key of `shard`.
    pub(crate) fn hit_shard(&self, shard: ShardId, reads: u64) {
        let (lb, _) = self
            .balancer
            .index()
            .key_range(shard)
            .expect("shard was merged away");
        self.hit(lb, reads);
    }

    /// Flush and run one round.
    pub(crate) fn round(&self) -> TransferBatch {
        self.balancer.flush();
        self.balancer.run_round()
    }

    pub(crate) fn node_loads(&self) -> Vec<Load> {
        let paused = self.balancer.pause();
        paused.table().nodes().iter().map(|n| n.load()).collect()
    }

    /// Difference between the most and least loaded node.
    pub(crate) fn spread(&self) -> Load {
        let loads = self.node_loads();
        loads.iter().max().unwrap() - loads.iter().min().unwrap()
    }

    /// Check the structural invariants that must hold between rounds.
    pub(crate) fn assert_invariants(&self) {
        let paused = self.balancer.pause();
        let table = paused.table();
        let index = self.balancer.index();

        assert!(table.check_ring(), "shard ring is broken");
        assert!(index.check_partition(), "key ranges do not partition the universe");
        assert_eq!(table.num_shards(), index.num_shards(), "shard ids diverged");
        assert_eq!(table.tracker().len(), table.num_shards());

        let live_ring: Vec<ShardId> = table
            .ring()
            .map(|s| s.id())
            .filter(|&id| index.key_range(id).is_some())
            .collect();
        let key_order: Vec<ShardId> = index.ranges().into_iter().map(|(id, _, _)| id).collect();
        assert_eq!(live_ring, key_order, "ring order differs from key order");

        let mut listed = 0;
        for node in table.nodes() {
            for &id in node.shards() {
                assert_eq!(
                    table.shard(id).owner(),
                    node.id(),
                    "shard {} listed by node {}",
                    id,
                    node.id()
                );
            }
            assert_eq!(node.shards().len(), node.num_shards());
            listed += node.num_shards();
        }
        assert_eq!(listed, table.num_shards(), "shards not listed exactly once");

        if paused.strategy() == Strategy::DynamicRestricted {
            assert!(table.check_arcs(), "node arcs are not contiguous");
        }
    }

    /// Check that every committed transfer landed at its destination.
    pub(crate) fn assert_applied(&self, batch: &TransferBatch) {
        let paused = self.balancer.pause();
        for transfer in &batch.transfers {
            assert_ne!(transfer.from, transfer.to);
            assert_eq!(paused.table().shard(transfer.shard).owner(), transfer.to);
        }
    }
}

/// Skewed synthetic workload: a share of the operations goes to a few hot
/// keys, the rest is uniform over the key universe.
pub(crate) struct Workload {
    rng: StdRng,
    key_lb: Key,
    key_ub: Key,
    hot_keys: Vec<Key>,
    hot_fraction: f64,
}

impl Workload {
    pub(crate) fn new(seed: u64, key_lb: Key, key_ub: Key, hot_keys: usize, hot_fraction: f64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let hot_keys = (0..hot_keys).map(|_| rng.gen_range(key_lb..key_ub)).collect();
        Self {
            rng,
            key_lb,
            key_ub,
            hot_keys,
            hot_fraction,
        }
    }

    /// Next key and its `(local_read, remote_read, local_write, flush)` counts.
    pub(crate) fn next_op(&mut self) -> (Key, [u64; 4]) {
        let key = if !self.hot_keys.is_empty() && self.rng.gen_bool(self.hot_fraction) {
            self.hot_keys[self.rng.gen_range(0..self.hot_keys.len())]
        } else {
            self.rng.gen_range(self.key_lb..self.key_ub)
        };
        let kind = self.rng.gen_range(0..100);
        let ops = match kind {
            0..=59 => [1, 0, 0, 0],
            60..=79 => [0, 1, 0, 0],
            80..=98 => [0, 0, 1, 0],
            _ => [0, 0, 0, 1],
        };
        (key, ops)
    }

    /// Feed `ops` operations into the cluster. Returns the weighted load.
    pub(crate) fn drive(&mut self, cluster: &TestCluster, ops: usize) -> Load {
        let weights = *cluster.balancer.index().weights();
        let mut total = 0;
        for _ in 0..ops {
            let (key, [lr, rr, lw, fl]) = self.next_op();
            cluster.balancer.increment_load(key, lr, rr, lw, fl);
            total += weights.weigh(lr, rr, lw, fl);
        }
        total
    }
}

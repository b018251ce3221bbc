//! Balancer end-to-end scenarios.
//!
//! | Test ID    | Scenario                                   | Verification                          |
//! |------------|--------------------------------------------|---------------------------------------|
//! | TC_BAL_01  | All load on shard 0, dynamic               | hot shard split, shards move off node 0 |
//! | TC_BAL_02  | All load on shard 0, restricted            | arcs stay contiguous, load shifts right |
//! | TC_BAL_03  | All load on node 0, fixed                  | spread drops within the threshold     |
//! | TC_BAL_04  | Skewed random workload, every strategy     | invariants hold after every round     |
//! | TC_BAL_05  | Merges between dynamic rounds              | retired ids never reused or split     |
//! | TC_BAL_06  | Load stops arriving                        | loads decay, rounds get skipped       |
//! | TC_BAL_07  | Restricted, load shifted onto ignored node | round completes, arcs stay contiguous |
//! | TC_BAL_08  | Merge then split of the merged shard       | every key routes to its range's shard |

#[cfg(test)]
mod tests {
    use crate::config::{BalancerConfig, Strategy};
    use crate::testing::utils::{TestCluster, Workload};
    use crate::types::Load;
    use tracing::info;

    /// Inject load on shard 0 until node 0 is ahead of node 1 by more than
    /// the imbalance threshold, then run one round.
    fn hot_shard_round(strategy: Strategy) -> (TestCluster, Load, Load, usize) {
        let cluster = TestCluster::new(strategy, 2, 8);
        cluster.hit_shard(0, 1_000_000);
        cluster.balancer.flush();

        let before = 1_000_000;
        let batch = cluster.balancer.run_round();
        cluster.assert_applied(&batch);
        cluster.assert_invariants();

        let loads = cluster.node_loads();
        let after = loads[0].abs_diff(loads[1]);
        let mean = loads.iter().sum::<Load>() / loads.len() as Load;
        let threshold = mean / cluster.balancer.config().load_imbalance_ratio;
        assert!(after <= before.max(threshold));

        assert!(!batch.is_empty());
        assert!(batch.transfers.iter().all(|t| t.from == 0 && t.to == 1));
        (cluster, after, threshold, batch.len())
    }

    #[test_log::test]
    fn tc_bal_01_hot_shard_dynamic() {
        let (cluster, after, threshold, moved) = hot_shard_round(Strategy::Dynamic);
        info!(after, threshold, moved, "Dynamic round done");

        assert!(after <= threshold);
        let metrics = cluster.balancer.metrics().snapshot();
        assert_eq!(metrics.splits_total, 1);
        assert_eq!(metrics.transfers_total, moved as u64);
        assert!(cluster.balancer.index().num_shards() > 16);
    }

    #[test_log::test]
    fn tc_bal_02_hot_shard_restricted() {
        let (cluster, after, threshold, _) = hot_shard_round(Strategy::DynamicRestricted);
        assert!(after <= threshold);

        // everything node 1 gained came out of the old shard 0
        let paused = cluster.balancer.pause();
        let index = cluster.balancer.index();
        let gained: Vec<_> = paused
            .table()
            .node(1)
            .shards()
            .iter()
            .filter_map(|&id| index.key_range(id))
            .filter(|&(_, ub)| ub <= 4096)
            .collect();
        assert!(!gained.is_empty());
        assert!(paused.table().check_arcs());
    }

    #[test_log::test]
    fn tc_bal_03_hot_node_fixed() {
        let cluster = TestCluster::new(Strategy::Fixed, 2, 8);
        for shard in 0..8 {
            cluster.hit_shard(shard, 1_000 + shard as u64);
        }
        let before = cluster.round();
        cluster.assert_applied(&before);
        cluster.assert_invariants();

        assert!(!before.is_empty());
        let loads = cluster.node_loads();
        let mean = loads.iter().sum::<Load>() / 2;
        assert!(cluster.spread() <= mean / 100);
    }

    #[test_log::test]
    fn tc_bal_04_random_workload_keeps_invariants() {
        for strategy in [Strategy::Fixed, Strategy::Dynamic, Strategy::DynamicRestricted] {
            let cluster = TestCluster::with_config(
                BalancerConfig::new(4, 4)
                    .with_strategy(strategy)
                    .with_min_shard_size(64)
                    .with_load_imbalance_ratio(20),
            );
            let mut workload = Workload::new(7, 0, 1 << 16, 3, 0.5);

            let mut moved = 0;
            for _ in 0..8 {
                workload.drive(&cluster, 5_000);
                let batch = cluster.round();
                cluster.assert_applied(&batch);
                cluster.assert_invariants();
                moved += batch.len();
            }
            info!(%strategy, moved, spread = cluster.spread(), "Random workload done");
            assert_eq!(cluster.balancer.metrics().rounds_total.get(), 8);
        }
    }

    #[test_log::test]
    fn tc_bal_05_merges_between_rounds() {
        let cluster = TestCluster::new(Strategy::Dynamic, 2, 8);
        cluster.balancer.merge_pair(2, 3);
        cluster.balancer.merge_range(4, 6);
        cluster.assert_invariants();

        let mut workload = Workload::new(11, 0, 1 << 16, 2, 0.8);
        for _ in 0..5 {
            workload.drive(&cluster, 10_000);
            let batch = cluster.round();
            cluster.assert_applied(&batch);
            cluster.assert_invariants();
        }

        let index = cluster.balancer.index();
        for retired in [3, 5, 6] {
            assert_eq!(index.key_range(retired), None);
        }
        // merged ids only decay; nothing new reaches them
        let paused = cluster.balancer.pause();
        assert_eq!(paused.table().tracker().current(3), 0);
        assert_eq!(cluster.balancer.metrics().merges_total.get(), 2);
    }

    #[test_log::test]
    fn tc_bal_06_idle_cluster_decays() {
        let cluster = TestCluster::new(Strategy::Fixed, 2, 4);
        for shard in 0..8 {
            cluster.hit_shard(shard, 64);
        }
        let first = cluster.round();
        assert!(first.is_empty());

        let mut previous = cluster.node_loads();
        for _ in 0..3 {
            cluster.round();
            let loads = cluster.node_loads();
            for (now, before) in loads.iter().zip(&previous) {
                assert_eq!(*now, before / 2);
            }
            previous = loads;
        }
        let metrics = cluster.balancer.metrics().snapshot();
        assert_eq!(metrics.rounds_total, 4);
        assert_eq!(metrics.rounds_skipped, 4);
    }

    #[test_log::test]
    fn tc_bal_07_restricted_shift_onto_ignored_node() {
        let cluster = TestCluster::with_config(
            BalancerConfig::new(6, 1)
                .with_strategy(Strategy::DynamicRestricted)
                .with_key_range(0, 24)
                .with_load_imbalance_ratio(10),
        );
        for (shard, load) in [15, 16, 19, 1, 1, 13].into_iter().enumerate() {
            cluster.hit_shard(shard, load);
        }

        let batch = cluster.round();
        cluster.assert_applied(&batch);
        cluster.assert_invariants();
        assert!(!batch.is_empty());
        assert_eq!(cluster.balancer.metrics().rounds_total.get(), 1);
    }

    #[test_log::test]
    fn tc_bal_08_split_after_merge_routes_keys() {
        let cluster = TestCluster::new(Strategy::Dynamic, 2, 8);
        cluster.balancer.merge_range(0, 2);
        cluster.assert_invariants();

        cluster.hit_shard(0, 1_000_000);
        let batch = cluster.round();
        cluster.assert_applied(&batch);
        cluster.assert_invariants();
        assert!(cluster.balancer.metrics().splits_total.get() >= 1);

        let index = cluster.balancer.index();
        let ranges = index.ranges();
        assert!(ranges.len() > 14);
        for (id, lb, ub) in ranges {
            for key in lb..ub {
                assert_eq!(index.shard_for_key(key), Some(id), "key {} of shard {}", key, id);
            }
        }
        for retired in [1, 2] {
            assert_eq!(index.key_range(retired), None);
        }
    }
}

//! Producers, flusher and balancer running at the same time.
//!
//! | Test ID    | Scenario                                      | Verification                         |
//! |------------|-----------------------------------------------|--------------------------------------|
//! | TC_CON_01  | 4 producers on hot keys while shards split    | no counted operation is lost         |
//! | TC_CON_02  | Reports printed while producers run          | round load restarts after each print |

#[cfg(test)]
mod tests {
    use crate::balancer::LoadBalancer;
    use crate::config::{BalancerConfig, Strategy};
    use crate::runtime::BalancerRuntime;
    use crate::testing::utils::TestCluster;
    use crate::types::Load;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;
    use tracing::info;

    const PRODUCERS: u64 = 4;
    const OPS_PER_PRODUCER: u64 = 20_000;

    fn spawn_producers(balancer: &Arc<LoadBalancer>) -> Vec<thread::JoinHandle<()>> {
        (0..PRODUCERS)
            .map(|seed| {
                let balancer = balancer.clone();
                thread::spawn(move || {
                    let mut rng = StdRng::seed_from_u64(seed);
                    let hot: Vec<u64> = (0..4).map(|_| rng.gen_range(0..8192)).collect();
                    for op in 0..OPS_PER_PRODUCER {
                        let key = if op % 4 == 0 {
                            rng.gen_range(0..1 << 16)
                        } else {
                            hot[rng.gen_range(0..hot.len())]
                        };
                        balancer.increment_load(key, 1, 0, 0, 0);
                    }
                })
            })
            .collect()
    }

    fn round_load(balancer: &LoadBalancer) -> Load {
        let tracker = balancer.tracker();
        (0..tracker.len()).map(|id| tracker.round(id)).sum()
    }

    #[test_log::test]
    fn tc_con_01_no_load_lost_across_splits() {
        let cluster = TestCluster::with_config(
            BalancerConfig::new(2, 8)
                .with_strategy(Strategy::Dynamic)
                .with_round_load_tracking(true)
                .with_min_shard_size(16)
                .with_rebalance_period(Duration::from_millis(5)),
        );
        let balancer = cluster.balancer.clone();
        let mut runtime = BalancerRuntime::start(balancer.clone(), Duration::from_millis(1)).unwrap();

        for producer in spawn_producers(&balancer) {
            producer.join().unwrap();
        }
        // a few more rounds with the whole load counted
        let rounds = balancer.metrics().rounds_total.get();
        while balancer.metrics().rounds_total.get() < rounds + 2 {
            thread::sleep(Duration::from_millis(2));
        }
        runtime.shutdown();

        let splits = balancer.metrics().splits_total.get();
        info!(splits, shards = balancer.tracker().len(), "Producers done");
        assert_eq!(round_load(&balancer), PRODUCERS * OPS_PER_PRODUCER);
        cluster.assert_invariants();
    }

    #[test_log::test]
    fn tc_con_02_print_while_producing() {
        let cluster = TestCluster::with_config(
            BalancerConfig::new(2, 8)
                .with_strategy(Strategy::DynamicRestricted)
                .with_round_load_tracking(true)
                .with_rebalance_period(Duration::from_millis(5)),
        );
        let balancer = cluster.balancer.clone();
        let runtime = BalancerRuntime::start(balancer.clone(), Duration::from_millis(1)).unwrap();

        let producers = spawn_producers(&balancer);
        let mut reports = 0;
        while reports < 5 {
            let mut buf = String::new();
            balancer.print(&mut buf, 0, 4, 4);
            assert!(buf.starts_with("round "));
            reports += 1;
            thread::sleep(Duration::from_millis(3));
        }
        for producer in producers {
            producer.join().unwrap();
        }
        drop(runtime);

        // only what was counted since the last print remains
        assert!(round_load(&balancer) <= PRODUCERS * OPS_PER_PRODUCER);
        let mut buf = String::new();
        balancer.print(&mut buf, 0, 0, 0);
        assert_eq!(round_load(&balancer), 0);
        cluster.assert_invariants();
    }
}

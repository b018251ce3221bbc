//! Balancer control loop.
//!
//! One skeleton drives every strategy:
//!
//! ```text
//!   sleep(rebalance_period)
//!          │
//!          ▼
//!   compute_load_and_pass()  ──spread <= threshold──►  skip round
//!          │
//!          ▼
//!   BalancePolicy::rebalance()     strategy-specific walk
//!          │                       (transfers, splits, boundary shifts)
//!          ▼
//!   LoadModel::apply()       ──►   TransferBatch for the ownership directory
//! ```
//!
//! The strategies differ only in the walk:
//! - [`FixedPolicy`]: move whole shards from the most to the least loaded
//!   node
//! - [`DynamicPolicy`]: split hot shards before moving them
//! - [`RestrictedPolicy`]: shift arc boundaries between adjacent nodes

mod dynamic;
mod fixed;
mod restricted;

pub use dynamic::DynamicPolicy;
pub use fixed::FixedPolicy;
pub use restricted::{get_load_req, RestrictedPolicy};

use crate::config::{BalancerConfig, Strategy};
use crate::error::Result;
use crate::load::{LoadModel, LoadTracker, RestrictedModel, ShardTable, UnrestrictedModel};
use crate::metrics::BalancerMetrics;
use crate::range::LoadRangeIndex;
use crate::report::ClusterSnapshot;
use crate::types::{Key, Load, LoadStats, Severity, ShardId, TransferBatch};
use parking_lot::{Condvar, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::cmp::Ordering;
use std::sync::Arc;
use tracing::{debug, info};

/// Classify `load` against `mean`: `±1` within `half` of the mean, `±2`
/// beyond it, `0` exactly at the mean.
pub fn check_load(load: Load, mean: Load, half: Load) -> Severity {
    match load.cmp(&mean) {
        Ordering::Greater if load - mean > half => 2,
        Ordering::Greater => 1,
        Ordering::Equal => 0,
        Ordering::Less if mean - load > half => -2,
        Ordering::Less => -1,
    }
}

/// Per-round state handed to a policy.
#[derive(Debug, Clone)]
pub struct RoundContext {
    /// Round number.
    pub round: u64,
    /// Node statistics; `sum` and `mean` shrink as outliers are ignored.
    pub stats: LoadStats,
    /// `mean / load_imbalance_ratio` at the start of the round.
    pub threshold: Load,
    /// `threshold / 2`.
    pub half: Load,
    /// Shards split this round.
    pub splits: u64,
    /// Nodes ignored this round.
    pub ignored: u64,
}

impl RoundContext {
    pub fn new(round: u64, stats: LoadStats, load_imbalance_ratio: u64) -> Self {
        let threshold = stats.mean / load_imbalance_ratio;
        Self {
            round,
            stats,
            threshold,
            half: threshold / 2,
            splits: 0,
            ignored: 0,
        }
    }

    /// Severity of `load` against the current mean.
    pub fn check_load(&self, load: Load) -> Severity {
        check_load(load, self.stats.mean, self.half)
    }

    /// Whether the spread is too small to act on.
    pub fn is_balanced(&self) -> bool {
        self.stats.spread() <= self.threshold
    }
}

/// The strategy-specific part of a round.
pub trait BalancePolicy: Send + std::fmt::Debug {
    fn strategy(&self) -> Strategy;

    fn model(&self) -> &dyn LoadModel;

    fn model_mut(&mut self) -> &mut dyn LoadModel;

    /// Record the round's transfers and splits in the model. Runs after
    /// `compute_load_and_pass` and before `apply`.
    fn rebalance(&mut self, ctx: &mut RoundContext, index: &LoadRangeIndex);
}

/// Shared handle used to stop producers, the flusher and the balancer while
/// a consistent view is read.
#[derive(Debug, Clone, Default)]
pub struct PauseHandle {
    lock: Arc<RwLock<()>>,
}

impl PauseHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enter a section that may run concurrently with other shared sections.
    pub fn shared(&self) -> RwLockReadGuard<'_, ()> {
        self.lock.read()
    }

    /// Wait for every shared section to end and block new ones.
    pub fn exclusive(&self) -> RwLockWriteGuard<'_, ()> {
        self.lock.write()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoopState {
    Idle,
    Running,
    Stopped,
}

#[derive(Debug)]
struct BalancerCore {
    policy: Box<dyn BalancePolicy>,
    round: u64,
}

/// Holds the balancer core; no round can run until it is dropped.
pub struct BalancerPause<'a> {
    core: MutexGuard<'a, BalancerCore>,
}

impl BalancerPause<'_> {
    pub fn table(&self) -> &ShardTable {
        self.core.policy.model().table()
    }

    /// Last round number.
    pub fn round(&self) -> u64 {
        self.core.round
    }

    pub fn strategy(&self) -> Strategy {
        self.core.policy.strategy()
    }
}

/// Periodic load balancer over a load-range index and a load model.
pub struct LoadBalancer {
    config: BalancerConfig,
    core: Mutex<BalancerCore>,
    index: Arc<LoadRangeIndex>,
    tracker: Arc<LoadTracker>,
    pause: PauseHandle,
    state: Mutex<LoopState>,
    wake: Condvar,
    metrics: Arc<BalancerMetrics>,
}

impl std::fmt::Debug for LoadBalancer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadBalancer")
            .field("strategy", &self.config.strategy)
            .field("num_nodes", &self.config.num_nodes)
            .field("index", &self.index)
            .finish()
    }
}

impl LoadBalancer {
    /// Create a balancer with its own pause handle.
    pub fn new(config: BalancerConfig) -> Result<Self> {
        Self::with_pause_handle(config, PauseHandle::new())
    }

    /// Create a balancer sharing `pause` with producers and printers.
    pub fn with_pause_handle(config: BalancerConfig, pause: PauseHandle) -> Result<Self> {
        config.validate()?;

        let table = ShardTable::new(
            config.num_nodes,
            config.shards_per_node,
            config.low_load_threshold,
            config.track_round_load,
        );
        let tracker = table.tracker().clone();
        let index = Arc::new(LoadRangeIndex::from_config(&config, tracker.clone())?);

        let policy: Box<dyn BalancePolicy> = match config.strategy {
            Strategy::Fixed => Box::new(FixedPolicy::new(UnrestrictedModel::new(table))),
            Strategy::Dynamic => Box::new(DynamicPolicy::new(UnrestrictedModel::new(table))),
            Strategy::DynamicRestricted => {
                Box::new(RestrictedPolicy::new(RestrictedModel::new(table)))
            }
        };

        info!(
            strategy = %config.strategy,
            nodes = config.num_nodes,
            shards = config.total_shards(),
            key_lb = config.key_lb,
            key_ub = config.key_ub,
            "Created load balancer"
        );

        Ok(Self {
            config,
            core: Mutex::new(BalancerCore { policy, round: 0 }),
            index,
            tracker,
            pause,
            state: Mutex::new(LoopState::Idle),
            wake: Condvar::new(),
            metrics: Arc::new(BalancerMetrics::new()),
        })
    }

    /// Configuration the balancer was built with.
    pub fn config(&self) -> &BalancerConfig {
        &self.config
    }

    /// Key to shard routing shared with producers.
    pub fn index(&self) -> &Arc<LoadRangeIndex> {
        &self.index
    }

    /// Per-shard counters fed by the index flush.
    pub fn tracker(&self) -> &Arc<LoadTracker> {
        &self.tracker
    }

    /// Round and transfer counters.
    pub fn metrics(&self) -> &Arc<BalancerMetrics> {
        &self.metrics
    }

    /// Handle for pausing every thread that touches the balancer.
    pub fn pause_handle(&self) -> &PauseHandle {
        &self.pause
    }

    /// Add load directly to a shard, bypassing the key index.
    pub fn increment_load_info(&self, shard: ShardId, amount: Load) {
        self.tracker.increment(shard, amount);
    }

    /// Record operations against a key.
    pub fn increment_load(
        &self,
        key: Key,
        local_read: u64,
        remote_read: u64,
        local_write: u64,
        flush: u64,
    ) {
        self.index
            .increment_load(key, local_read, remote_read, local_write, flush);
    }

    /// Move counted operations from the key index into shard load.
    pub fn flush(&self) {
        self.index.flush();
    }

    /// Merge the shards from `from` to `to` (inclusive, in key order) in the
    /// key index.
    pub fn merge_range(&self, from: ShardId, to: ShardId) {
        self.index.merge_range_signal(from, to).finish_signal();
        self.metrics.merges_total.inc();
    }

    /// Merge `second` into `first` in the key index.
    pub fn merge_pair(&self, first: ShardId, second: ShardId) {
        self.index.merge_pair_signal(first, second).finish_signal();
        self.metrics.merges_total.inc();
    }

    /// Run one decide/commit cycle without sleeping.
    pub fn run_round(&self) -> TransferBatch {
        let _running = self.pause.shared();
        let mut core = self.core.lock();
        core.round += 1;
        let round = core.round;

        let table = core.policy.model_mut().table_mut();
        let stats = table.compute_load_and_pass();
        self.metrics.record_stats(&stats, table.num_shards());

        let mut ctx = RoundContext::new(round, stats, self.config.load_imbalance_ratio);
        if ctx.is_balanced() {
            debug!(
                round,
                spread = stats.spread(),
                threshold = ctx.threshold,
                "Load within threshold, skipping round"
            );
            self.metrics.rounds_skipped.inc();
            return TransferBatch::new(round, Vec::new());
        }

        info!(
            round,
            min = stats.min,
            max = stats.max,
            mean = stats.mean,
            threshold = ctx.threshold,
            "Rebalancing"
        );
        core.policy.rebalance(&mut ctx, &self.index);
        let transfers = core.policy.model_mut().apply();

        for transfer in &transfers {
            info!(
                round,
                shard = transfer.shard,
                from = transfer.from,
                to = transfer.to,
                "Shard ownership changed"
            );
        }
        let shards = core.policy.model().table().num_shards();
        self.metrics
            .record_round(transfers.len(), ctx.splits, ctx.ignored, shards);
        info!(
            round,
            transfers = transfers.len(),
            splits = ctx.splits,
            ignored = ctx.ignored,
            "Round complete"
        );

        TransferBatch::new(round, transfers)
    }

    /// Run rounds every `rebalance_period` on the calling thread until
    /// [`LoadBalancer::shut_down`] is called.
    pub fn start(&self) {
        {
            let mut state = self.state.lock();
            if *state == LoopState::Stopped {
                return;
            }
            *state = LoopState::Running;
        }
        info!(strategy = %self.config.strategy, "Load balancer started");

        loop {
            {
                let mut state = self.state.lock();
                if *state == LoopState::Running {
                    self.wake.wait_for(&mut state, self.config.rebalance_period);
                }
                if *state == LoopState::Stopped {
                    break;
                }
            }
            self.run_round();
        }

        info!("Load balancer stopped");
    }

    /// Stop the control loop after its current sleep or round. Final.
    pub fn shut_down(&self) {
        *self.state.lock() = LoopState::Stopped;
        self.wake.notify_all();
    }

    pub fn is_running(&self) -> bool {
        *self.state.lock() == LoopState::Running
    }

    /// Whether [`LoadBalancer::shut_down`] has been called.
    pub fn is_stopped(&self) -> bool {
        *self.state.lock() == LoopState::Stopped
    }

    /// Hold the balancer core so no round runs until the guard is dropped.
    pub fn pause(&self) -> BalancerPause<'_> {
        BalancerPause {
            core: self.core.lock(),
        }
    }

    /// Capture node and shard state.
    pub fn snapshot(&self) -> ClusterSnapshot {
        let core = self.core.lock();
        ClusterSnapshot::capture(
            core.policy.model().table(),
            &self.index,
            core.round,
            core.policy.strategy(),
        )
    }

    /// Append a text report to `buf`, then clear the round-load counters.
    ///
    /// `node_limit`, `shard_limit` and `shard_per_node_limit` cap the number
    /// of nodes, ring shards and per-node shards listed; `0` lists all.
    /// Takes the pause handle exclusively, so it must not be called from
    /// inside a shared section.
    pub fn print(
        &self,
        buf: &mut String,
        node_limit: usize,
        shard_limit: usize,
        shard_per_node_limit: usize,
    ) {
        let _paused = self.pause.exclusive();
        let core = self.core.lock();
        let table = core.policy.model().table();
        let snapshot =
            ClusterSnapshot::capture(table, &self.index, core.round, core.policy.strategy());
        snapshot.write_report(buf, node_limit, shard_limit, shard_per_node_limit);
        table.new_round();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::OwnershipTransfer;
    use std::time::Duration;

    fn config(strategy: Strategy) -> BalancerConfig {
        BalancerConfig::new(2, 8)
            .with_strategy(strategy)
            .with_rebalance_period(Duration::from_millis(10))
    }

    #[test]
    fn test_check_load_table() {
        assert_eq!(check_load(100, 100, 10), 0);
        assert_eq!(check_load(105, 100, 10), 1);
        assert_eq!(check_load(110, 100, 10), 1);
        assert_eq!(check_load(111, 100, 10), 2);
        assert_eq!(check_load(95, 100, 10), -1);
        assert_eq!(check_load(90, 100, 10), -1);
        assert_eq!(check_load(89, 100, 10), -2);
        assert_eq!(check_load(0, 0, 0), 0);
    }

    #[test]
    fn test_check_load_monotonic() {
        for mean in [0u64, 1, 7, 100, 1000] {
            for half in [0u64, 3, 50] {
                assert_eq!(check_load(mean, mean, half), 0);
                let mut previous = check_load(0, mean, half);
                for load in 1..=2 * mean + 2 * half + 2 {
                    let current = check_load(load, mean, half);
                    assert!(current >= previous, "load {} mean {} half {}", load, mean, half);
                    previous = current;
                }
            }
        }
    }

    #[test]
    fn test_round_context() {
        let stats = LoadStats {
            min: 0,
            max: 1000,
            mean: 500,
            sum: 1000,
        };
        let ctx = RoundContext::new(1, stats, 100);
        assert_eq!(ctx.threshold, 5);
        assert_eq!(ctx.half, 2);
        assert!(!ctx.is_balanced());
        assert_eq!(ctx.check_load(1000), 2);
    }

    #[test_log::test]
    fn test_balanced_round_is_skipped() {
        let balancer = LoadBalancer::new(config(Strategy::Fixed)).unwrap();
        for shard in 0..16 {
            balancer.increment_load_info(shard, 100);
        }
        let batch = balancer.run_round();
        assert_eq!(batch.round, 1);
        assert!(batch.is_empty());

        let metrics = balancer.metrics().snapshot();
        assert_eq!(metrics.rounds_total, 1);
        assert_eq!(metrics.rounds_skipped, 1);
        assert_eq!(metrics.mean_node_load, 800);
    }

    #[test_log::test]
    fn test_fixed_round_moves_shards() {
        let balancer = LoadBalancer::new(config(Strategy::Fixed)).unwrap();
        for shard in 0..8 {
            balancer.increment_load_info(shard, 1000);
        }

        let batch = balancer.run_round();
        assert_eq!(batch.len(), 4);
        assert!(batch.transfers.iter().all(|t| t.from == 0 && t.to == 1));

        let paused = balancer.pause();
        let table = paused.table();
        assert_eq!(table.node(0).num_shards(), 4);
        assert_eq!(table.node(1).num_shards(), 12);
        for transfer in &batch.transfers {
            assert_eq!(table.shard(transfer.shard).owner(), 1);
        }
    }

    #[test]
    fn test_invalid_config_rejected() {
        assert!(LoadBalancer::new(BalancerConfig::new(1, 8)).is_err());
    }

    #[test]
    fn test_load_through_keys() {
        let balancer = LoadBalancer::new(config(Strategy::Fixed)).unwrap();
        // shard 3 covers [12288, 16384)
        balancer.increment_load(12_300, 5, 0, 0, 0);
        balancer.flush();
        assert_eq!(balancer.tracker().current(3), 5);
    }

    #[test]
    fn test_merge_counts() {
        let balancer = LoadBalancer::new(config(Strategy::Fixed)).unwrap();
        balancer.merge_pair(0, 1);
        balancer.merge_range(2, 4);
        assert_eq!(balancer.metrics().merges_total.get(), 2);
        assert!(balancer.index().check_partition());
        assert_eq!(balancer.index().key_range(0), Some((0, 8192)));
    }

    #[test]
    fn test_shut_down_before_start() {
        let balancer = LoadBalancer::new(config(Strategy::Fixed)).unwrap();
        balancer.shut_down();
        balancer.start();
        assert!(!balancer.is_running());
    }

    #[test]
    fn test_start_runs_rounds_until_shut_down() {
        let balancer = Arc::new(LoadBalancer::new(config(Strategy::Fixed)).unwrap());
        let runner = {
            let balancer = balancer.clone();
            std::thread::spawn(move || balancer.start())
        };
        while balancer.metrics().rounds_total.get() < 2 {
            std::thread::sleep(Duration::from_millis(5));
        }
        balancer.shut_down();
        runner.join().unwrap();
        assert!(!balancer.is_running());
    }

    #[test]
    fn test_print_resets_round_load() {
        let balancer = LoadBalancer::new(config(Strategy::Fixed).with_round_load_tracking(true))
            .unwrap();
        balancer.increment_load_info(2, 30);

        let mut buf = String::new();
        balancer.print(&mut buf, 0, 0, 0);
        assert!(buf.contains("node 0"));
        assert!(buf.contains("round load 30"));
        assert_eq!(balancer.tracker().round(2), 0);
    }

    #[test]
    fn test_transfer_batch_encodes() {
        let balancer = LoadBalancer::new(config(Strategy::Fixed)).unwrap();
        for shard in 0..8 {
            balancer.increment_load_info(shard, 1000);
        }
        let batch = balancer.run_round();
        let decoded = TransferBatch::from_bytes(&batch.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded, batch);
        assert!(decoded
            .transfers
            .contains(&OwnershipTransfer::new(0, 1, batch.transfers[0].shard)));
    }
}

//! Adjacency-only balancing.
//!
//! Node `n` owns one arc of the ring and can only hand load to node `n - 1`
//! (through its first shard) or node `n + 1` (through its last shard). An
//! overloaded node pushes the load its side of the cluster is missing; if a
//! neighbour ends up overloaded it keeps pushing outward.

use super::{BalancePolicy, RoundContext};
use crate::config::Strategy;
use crate::load::{LoadModel, RestrictedModel};
use crate::range::LoadRangeIndex;
use crate::types::{Direction, Load, NodeId, ShardId};
use tracing::{debug, warn};

/// Left and right load a node should push (`is_max`) or pull to bring its
/// part of the cluster to the local mean.
///
/// `nl` and `nr` are the numbers of nodes on each side, `left` and `right`
/// their summed load. The local mean is `(left + right + node_load) /
/// (nl + nr + 1)`. If honouring both requests would move the node across
/// the local mean, the total is capped at the node's distance from it and
/// split between the sides in proportion to their load (by node count when
/// both sides are idle).
pub fn get_load_req(
    node_load: Load,
    nl: usize,
    nr: usize,
    left: Load,
    right: Load,
    is_max: bool,
) -> (Load, Load) {
    let mean = (left + right + node_load) / (nl + nr + 1) as Load;
    let left_target = mean * nl as Load;
    let right_target = mean * nr as Load;

    let (left_req, right_req) = if is_max {
        (
            left_target.saturating_sub(left),
            right_target.saturating_sub(right),
        )
    } else {
        (
            left.saturating_sub(left_target),
            right.saturating_sub(right_target),
        )
    };

    let total = left_req + right_req;
    let cap = if is_max {
        (node_load.saturating_sub(total) < mean).then(|| node_load.saturating_sub(mean))
    } else {
        (node_load + total > mean).then(|| mean.saturating_sub(node_load))
    };
    let Some(cap) = cap else {
        return (left_req, right_req);
    };

    let (left_share, right_share) = if left + right > 0 {
        (cap * left / (left + right), cap * right / (left + right))
    } else if nl + nr > 0 {
        let nodes = (nl + nr) as Load;
        (cap * nl as Load / nodes, cap * nr as Load / nodes)
    } else {
        (0, 0)
    };
    (left_req.min(left_share), right_req.min(right_share))
}

/// Pieces to split a boundary shard of `load` into so one piece fits in
/// `remaining`. Never more pieces than load units, so no piece is empty.
fn piece_count(load: Load, remaining: Load) -> usize {
    usize::try_from((load / remaining + 1).min(load)).unwrap_or(usize::MAX)
}

/// Shifts arc boundaries between adjacent nodes.
#[derive(Debug)]
pub struct RestrictedPolicy {
    model: RestrictedModel,
    /// Summed load of the nodes left and right of each node.
    side_loads: Vec<(Load, Load)>,
}

impl RestrictedPolicy {
    pub fn new(model: RestrictedModel) -> Self {
        let num_nodes = model.table().num_nodes();
        Self {
            model,
            side_loads: vec![(0, 0); num_nodes],
        }
    }

    fn refresh_side_loads(&mut self) {
        let table = self.model.table();
        let total: Load = table.nodes().iter().map(|n| n.load()).sum();
        let mut left = 0;
        for (n, node) in table.nodes().iter().enumerate() {
            self.side_loads[n] = (left, total - left - node.load());
            left += node.load();
        }
    }

    /// Split `shard` of `node` into up to `requested` pieces. Returns
    /// whether it was split.
    fn divide(
        &mut self,
        ctx: &mut RoundContext,
        index: &LoadRangeIndex,
        node: NodeId,
        shard: ShardId,
        requested: usize,
    ) -> bool {
        if index.key_range(shard).is_none() {
            return false;
        }
        let guard = index.divide_signal(shard, requested);
        let actual = guard.divided();
        if actual > 1 {
            self.model.divide_shard(node, shard, actual);
            ctx.splits += 1;
        }
        guard.finish_signal();
        actual > 1
    }

    /// Move up to `amount` load from `node` to `node - 1` through the left
    /// end of its arc, splitting the boundary shard when it holds more than
    /// is still needed. Returns the load moved.
    fn push_load_left(
        &mut self,
        ctx: &mut RoundContext,
        index: &LoadRangeIndex,
        node: NodeId,
        amount: Load,
    ) -> Load {
        if amount == 0 || node == 0 {
            return 0;
        }

        let mut pushed = 0;
        while pushed < amount {
            let remaining = amount - pushed;
            let shard = self.model.table().node(node).first_shard();
            let mut load = self.model.table().shard(shard).load();
            if load > remaining {
                let requested = piece_count(load, remaining);
                if !self.divide(ctx, index, node, shard, requested) {
                    break;
                }
                // the target keeps the leftmost piece
                load = self.model.table().shard(shard).load();
            }
            if self.model.table().node(node).num_shards() == 1 || load > remaining {
                break;
            }
            pushed += self
                .model
                .change_owner_and_update_load(node, Direction::Left, shard);
        }
        self.refresh_side_loads();

        let left = node - 1;
        let left_load = self.model.table().node(left).load();
        if left > 0 && ctx.check_load(left_load) > 1 {
            let (req, _) = get_load_req(left_load, left, 0, self.side_loads[left].0, 0, true);
            self.push_load_left(ctx, index, left, req);
        }
        pushed
    }

    /// Mirror of [`Self::push_load_left`] through the right end of the arc.
    fn push_load_right(
        &mut self,
        ctx: &mut RoundContext,
        index: &LoadRangeIndex,
        node: NodeId,
        amount: Load,
    ) -> Load {
        let num_nodes = self.model.table().num_nodes();
        if amount == 0 || node + 1 >= num_nodes {
            return 0;
        }

        let mut pushed = 0;
        while pushed < amount {
            let remaining = amount - pushed;
            let mut shard = self.model.table().node(node).last_shard();
            let mut load = self.model.table().shard(shard).load();
            if load > remaining {
                let requested = piece_count(load, remaining);
                if !self.divide(ctx, index, node, shard, requested) {
                    break;
                }
                // the rightmost piece is the newest shard
                shard = self.model.table().node(node).last_shard();
                load = self.model.table().shard(shard).load();
            }
            if self.model.table().node(node).num_shards() == 1 || load > remaining {
                break;
            }
            pushed += self
                .model
                .change_owner_and_update_load(node, Direction::Right, shard);
        }
        self.refresh_side_loads();

        let right = node + 1;
        let right_load = self.model.table().node(right).load();
        if right + 1 < num_nodes && ctx.check_load(right_load) > 1 {
            let (_, req) = get_load_req(
                right_load,
                0,
                num_nodes - right - 1,
                0,
                self.side_loads[right].1,
                true,
            );
            self.push_load_right(ctx, index, right, req);
        }
        pushed
    }
}

impl BalancePolicy for RestrictedPolicy {
    fn strategy(&self) -> Strategy {
        Strategy::DynamicRestricted
    }

    fn model(&self) -> &dyn LoadModel {
        &self.model
    }

    fn model_mut(&mut self) -> &mut dyn LoadModel {
        &mut self.model
    }

    fn rebalance(&mut self, ctx: &mut RoundContext, index: &LoadRangeIndex) {
        self.refresh_side_loads();
        let num_nodes = self.model.table().num_nodes();
        let max_passes = 2 * num_nodes;
        let mut passes = 0;

        loop {
            let table = self.model.table();
            if table.ranked_len() < 2 {
                break;
            }
            let max_sev = ctx.check_load(table.max_node().load());
            let min_sev = ctx.check_load(table.min_node().load());
            if !(max_sev > 1 && min_sev < 2) {
                break;
            }
            if passes == max_passes {
                warn!(
                    round = ctx.round,
                    passes, "Restricted round did not settle, leaving the rest for the next round"
                );
                break;
            }
            passes += 1;

            let node = table.max_node_id();
            let (left, right) = self.side_loads[node];
            let (left_req, right_req) = get_load_req(
                table.node(node).load(),
                node,
                num_nodes - node - 1,
                left,
                right,
                true,
            );
            let pushed_left = self.push_load_left(ctx, index, node, left_req);
            let pushed_right = self.push_load_right(ctx, index, node, right_req);
            debug!(
                round = ctx.round,
                node, left_req, right_req, pushed_left, pushed_right, "Pushed load to neighbours"
            );

            let table = self.model.table_mut();
            if table.max_node_id() == node {
                let ignored = table.ignore_max(&mut ctx.stats);
                ctx.ignored += 1;
                debug!(
                    round = ctx.round,
                    node = ignored,
                    mean = ctx.stats.mean,
                    "Ignoring node that could not be balanced"
                );
            }
        }
    }
}

//! Whole-shard transfers from the most to the least loaded node.

use super::{BalancePolicy, RoundContext};
use crate::config::Strategy;
use crate::load::{LoadModel, ShardTable, UnrestrictedModel};
use crate::range::LoadRangeIndex;
use crate::types::{NodeId, Severity};
use tracing::debug;

/// Moves whole shards, never splits.
#[derive(Debug)]
pub struct FixedPolicy {
    model: UnrestrictedModel,
}

impl FixedPolicy {
    pub fn new(model: UnrestrictedModel) -> Self {
        Self { model }
    }
}

impl BalancePolicy for FixedPolicy {
    fn strategy(&self) -> Strategy {
        Strategy::Fixed
    }

    fn model(&self) -> &dyn LoadModel {
        &self.model
    }

    fn model_mut(&mut self) -> &mut dyn LoadModel {
        &mut self.model
    }

    fn rebalance(&mut self, ctx: &mut RoundContext, index: &LoadRangeIndex) {
        balance_nodes(&mut self.model, ctx, index, |_, _, _| {});
    }
}

/// Severities of the current max and min node.
pub(super) fn extremes(table: &ShardTable, ctx: &RoundContext) -> (Severity, Severity) {
    (
        ctx.check_load(table.max_node().load()),
        ctx.check_load(table.min_node().load()),
    )
}

/// Node loop shared by the unrestricted strategies.
///
/// While the max node is overloaded or the min node underloaded, and
/// neither extreme is on the wrong side of the mean, run `before_walk` on
/// the max node, move its shards to the min node, then set the node aside
/// if it is still the max.
pub(super) fn balance_nodes<F>(
    model: &mut UnrestrictedModel,
    ctx: &mut RoundContext,
    index: &LoadRangeIndex,
    mut before_walk: F,
) where
    F: FnMut(&mut UnrestrictedModel, &mut RoundContext, NodeId),
{
    loop {
        let table = model.table();
        if table.ranked_len() < 2 {
            break;
        }
        let (max_sev, min_sev) = extremes(table, ctx);
        if !((max_sev > 1 || min_sev < -1) && max_sev > -2 && min_sev < 2) {
            break;
        }

        let node = table.max_node_id();
        before_walk(model, ctx, node);

        let table = model.table_mut();
        walk_transfers(table, ctx, index, node);
        table.update_max_load();

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

/// Walk `node`'s shards from the highest load down and move them to the
/// min node until both sides are within half a threshold of the mean.
///
/// A shard whose move would push either side past the opposite extreme is
/// skipped, as is a shard merged away in `index`. The walk stops at the first insignificant shard, or as soon as
/// `node` is no longer the max or has become the min.
pub(super) fn walk_transfers(
    table: &mut ShardTable,
    ctx: &RoundContext,
    index: &LoadRangeIndex,
    node: NodeId,
) {
    while let Some((idx, shard)) = table.cursor_shard(node) {
        if table.is_insignificant(shard) {
            break;
        }
        if table.shard(shard).is_in_flight() || index.key_range(shard).is_none() {
            table.advance_cursor(node);
            continue;
        }
        if table.max_node_id() != node || table.min_node_id() == node {
            break;
        }

        let load = table.shard(shard).load();
        let high = ctx.check_load(
            table
                .node(node)
                .load()
                .saturating_sub(load + table.pending_max_delta()),
        );
        let low = ctx.check_load(table.min_node().load() + load);
        if high < -1 || low > 1 {
            table.advance_cursor(node);
            continue;
        }

        table.change_owner_from_max_to_min(idx);
        table.advance_cursor(node);
        if high < 2 && low > -2 {
            break;
        }
    }
}

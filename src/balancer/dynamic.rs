//! Transfers with hot-shard splitting.
//!
//! Before the max node's transfer walk, shards too hot to move whole are
//! split through the range index and the load model under one topology
//! lock, so key ranges and shard ids stay aligned.

use super::fixed::balance_nodes;
use super::{BalancePolicy, RoundContext};
use crate::config::Strategy;
use crate::load::{LoadModel, UnrestrictedModel};
use crate::range::LoadRangeIndex;
use crate::types::NodeId;
use tracing::debug;

/// Splits hot shards, then moves whole shards.
#[derive(Debug)]
pub struct DynamicPolicy {
    model: UnrestrictedModel,
}

impl DynamicPolicy {
    pub fn new(model: UnrestrictedModel) -> Self {
        Self { model }
    }

    /// Split the shards at the top of `node`'s walk that would overshoot
    /// either extreme if moved whole.
    ///
    /// A shard is split into `load * 4 / half` pieces, capped by the index's
    /// minimum shard size. After a split the walk restarts from the node's
    /// highest-load shard; a shard that cannot be split further is passed
    /// over. The walk is reset before returning.
    fn split_hot_shards(
        model: &mut UnrestrictedModel,
        ctx: &mut RoundContext,
        index: &LoadRangeIndex,
        node: NodeId,
    ) {
        if ctx.half == 0 {
            return;
        }

        loop {
            let table = model.table_mut();
            let Some((_, shard)) = table.cursor_shard(node) else {
                break;
            };
            let load = table.shard(shard).load();
            if table.is_insignificant(shard) || load * 2 < ctx.half {
                break;
            }
            if table.shard(shard).is_in_flight() || index.key_range(shard).is_none() {
                table.advance_cursor(node);
                continue;
            }

            let high = ctx.check_load(
                table
                    .node(node)
                    .load()
                    .saturating_sub(load + table.pending_max_delta()),
            );
            let low = ctx.check_load(table.min_node().load() + load);
            if high >= -1 && low <= 1 {
                break;
            }

            let requested = usize::try_from(load * 4 / ctx.half).unwrap_or(usize::MAX);
            let guard = index.divide_signal(shard, requested);
            let actual = guard.divided();
            if actual > 1 {
                model.divide_shard(node, shard, actual);
                ctx.splits += 1;
                model.table_mut().reset_cursor(node);
                debug!(round = ctx.round, node, shard, load, actual, "Split hot shard");
            } else {
                model.table_mut().advance_cursor(node);
            }
            guard.finish_signal();
        }

        model.table_mut().reset_cursor(node);
    }
}

impl BalancePolicy for DynamicPolicy {
    fn strategy(&self) -> Strategy {
        Strategy::Dynamic
    }

    fn model(&self) -> &dyn LoadModel {
        &self.model
    }

    fn model_mut(&mut self) -> &mut dyn LoadModel {
        &mut self.model
    }

    fn rebalance(&mut self, ctx: &mut RoundContext, index: &LoadRangeIndex) {
        balance_nodes(&mut self.model, ctx, index, |model, ctx, node| {
            Self::split_hot_shards(model, ctx, index, node)
        });
    }
}

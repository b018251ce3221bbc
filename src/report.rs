//! Point-in-time view of nodes and shards, and its text report.

use crate::config::Strategy;
use crate::load::ShardTable;
use crate::range::LoadRangeIndex;
use crate::types::{Key, Load, NodeId, ShardId};
use serde::{Deserialize, Serialize};
use std::fmt::{self, Write};

/// State of one shard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardSnapshot {
    pub id: ShardId,
    pub owner: NodeId,
    pub prev: ShardId,
    pub next: ShardId,
    /// `[lb, ub)`, or `None` once the range was merged away.
    pub key_range: Option<(Key, Key)>,
    pub last_load: Load,
    pub current_load: Load,
    /// Set when round-load tracking is enabled.
    pub round_load: Option<Load>,
}

/// State of one node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSnapshot {
    pub id: NodeId,
    pub last_load: Load,
    pub current_load: Load,
    pub round_load: Option<Load>,
    /// Owned shards with their smoothed load, in list order.
    pub shards: Vec<(ShardId, Load)>,
    pub first_shard: ShardId,
    pub last_shard: ShardId,
    pub num_shards: usize,
}

/// Nodes and shards of a balancer between two rounds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterSnapshot {
    pub round: u64,
    pub strategy: Strategy,
    pub num_shards: usize,
    pub nodes: Vec<NodeSnapshot>,
    /// Shards in ring order starting at shard 0.
    pub shards: Vec<ShardSnapshot>,
}

impl ClusterSnapshot {
    pub fn capture(
        table: &ShardTable,
        index: &LoadRangeIndex,
        round: u64,
        strategy: Strategy,
    ) -> Self {
        let tracker = table.tracker();
        let with_round = tracker.tracks_round_load();

        let shards: Vec<ShardSnapshot> = table
            .ring()
            .map(|shard| ShardSnapshot {
                id: shard.id(),
                owner: shard.owner(),
                prev: shard.prev_id(),
                next: shard.next_id(),
                key_range: index.key_range(shard.id()),
                last_load: shard.load(),
                current_load: tracker.current(shard.id()),
                round_load: with_round.then(|| tracker.round(shard.id())),
            })
            .collect();

        let nodes = table
            .nodes()
            .iter()
            .map(|node| {
                let ids = node.shards();
                NodeSnapshot {
                    id: node.id(),
                    last_load: node.load(),
                    current_load: ids.iter().map(|&id| tracker.current(id)).sum(),
                    round_load: with_round
                        .then(|| ids.iter().map(|&id| tracker.round(id)).sum()),
                    shards: ids.iter().map(|&id| (id, table.shard(id).load())).collect(),
                    first_shard: node.first_shard(),
                    last_shard: node.last_shard(),
                    num_shards: node.num_shards(),
                }
            })
            .collect();

        Self {
            round,
            strategy,
            num_shards: table.num_shards(),
            nodes,
            shards,
        }
    }

    /// Total smoothed load over all nodes.
    pub fn total_load(&self) -> Load {
        self.nodes.iter().map(|n| n.last_load).sum()
    }

    /// Append the report to `buf`. A limit of `0` lists everything.
    pub fn write_report(
        &self,
        buf: &mut String,
        node_limit: usize,
        shard_limit: usize,
        shard_per_node_limit: usize,
    ) {
        // writing into a String cannot fail
        let _ = self.write_to(buf, node_limit, shard_limit, shard_per_node_limit);
    }

    fn write_to<W: Write>(
        &self,
        out: &mut W,
        node_limit: usize,
        shard_limit: usize,
        shard_per_node_limit: usize,
    ) -> fmt::Result {
        writeln!(
            out,
            "round {} ({}), {} shards",
            self.round, self.strategy, self.num_shards
        )?;

        for node in self.nodes.iter().take(limit(node_limit)) {
            write!(
                out,
                "node {}: last load {}, current load {}",
                node.id, node.last_load, node.current_load
            )?;
            if let Some(round_load) = node.round_load {
                write!(out, ", round load {}", round_load)?;
            }
            writeln!(out, ", {} shards", node.num_shards)?;

            let mut listed = 0;
            for (id, load) in node.shards.iter().take(limit(shard_per_node_limit)) {
                let sep = if listed == 0 { "  " } else { " " };
                write!(out, "{}{}:{}", sep, id, load)?;
                listed += 1;
            }
            if listed > 0 {
                writeln!(out)?;
            }
        }

        for shard in self.shards.iter().take(limit(shard_limit)) {
            write!(
                out,
                "shard {}: owner {}, prev {}, next {}",
                shard.id, shard.owner, shard.prev, shard.next
            )?;
            if let Some((lb, ub)) = shard.key_range {
                write!(out, ", keys [{}, {})", lb, ub)?;
            }
            write!(
                out,
                ", last load {}, current load {}",
                shard.last_load, shard.current_load
            )?;
            if let Some(round_load) = shard.round_load {
                write!(out, ", round load {}", round_load)?;
            }
            writeln!(out)?;
        }
        Ok(())
    }
}

impl fmt::Display for ClusterSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.write_to(f, 0, 0, 0)
    }
}

fn limit(n: usize) -> usize {
    if n == 0 {
        usize::MAX
    } else {
        n
    }
}

//! Membership model where any shard may move to any node.

use super::table::ShardTable;
use super::LoadModel;
use crate::types::{NodeId, OwnershipTransfer, ShardId};
use tracing::debug;

/// Nodes own arbitrary sets of shards, kept as explicit lists.
#[derive(Debug)]
pub struct UnrestrictedModel {
    table: ShardTable,
}

impl UnrestrictedModel {
    pub fn new(table: ShardTable) -> Self {
        Self { table }
    }
}

impl LoadModel for UnrestrictedModel {
    fn table(&self) -> &ShardTable {
        &self.table
    }

    fn table_mut(&mut self) -> &mut ShardTable {
        &mut self.table
    }

    fn is_restricted(&self) -> bool {
        false
    }

    /// Move every logged shard from its source list to its destination
    /// list and update its owner.
    fn apply(&mut self) -> Vec<OwnershipTransfer> {
        let table = &mut self.table;
        let committed = std::mem::take(&mut table.pending);

        for transfer in &committed {
            let shard = &mut table.shards[transfer.shard];
            assert_eq!(
                shard.owner, transfer.from,
                "shard {} changed owner before commit",
                transfer.shard
            );
            shard.owner = transfer.to;
            shard.in_flight = false;
            table.nodes[transfer.from].remove_shard(transfer.shard);
            table.nodes[transfer.to].push_shard(transfer.shard);
        }
        for node in table.nodes.iter_mut() {
            node.reset_cursor();
        }

        if !committed.is_empty() {
            debug!(transfers = committed.len(), "Committed shard transfers");
        }
        committed
    }

    /// Split a shard and insert the pieces into the owner's list at the
    /// position their load sorts to.
    fn divide_shard(&mut self, owner: NodeId, shard: ShardId, num: usize) {
        let table = &mut self.table;
        assert_eq!(
            table.shards[shard].owner, owner,
            "shard {} is not owned by node {}",
            shard, owner
        );
        assert!(
            !table.shards[shard].in_flight,
            "cannot divide shard {} while it is being moved",
            shard
        );

        table.nodes[owner].remove_shard(shard);
        let pieces = table.split_shard(shard, num);
        let piece_load = table.shards[shard].last_load;

        let shards = &table.shards;
        let node = &mut table.nodes[owner];
        let at = if node.sorted {
            node.shards
                .partition_point(|&id| shards[id].last_load <= piece_load)
        } else {
            node.shards.len()
        };
        node.shards
            .splice(at..at, std::iter::once(shard).chain(pieces));
        node.num_shards = node.shards.len();
        node.reset_cursor();

        debug!(shard, owner, num, "Divided shard");
    }
}

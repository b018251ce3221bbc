//! Membership model where every node owns one contiguous arc of the ring.
//!
//! Load only moves between adjacent nodes by shifting the boundary between
//! them, so the arc of node `n` is always followed by the arc of node `n + 1`.
//! Owner fields change as soon as a boundary moves; the explicit shard lists
//! are rebuilt when the round is committed.

use super::table::ShardTable;
use super::LoadModel;
use crate::types::{Direction, Load, NodeId, OwnershipTransfer, ShardId};
use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use tracing::{debug, trace};

/// Contiguous-arc membership.
#[derive(Debug)]
pub struct RestrictedModel {
    table: ShardTable,
}

impl RestrictedModel {
    pub fn new(table: ShardTable) -> Self {
        Self { table }
    }

    /// Hand the part of `node`'s arc from its `direction` boundary up to and
    /// including `through` over to the neighbour on that side.
    ///
    /// Both aggregate loads change immediately; nodes that were ignored this
    /// round stay out of the ordered index. Returns the load moved.
    pub fn change_owner_and_update_load(
        &mut self,
        node: NodeId,
        direction: Direction,
        through: ShardId,
    ) -> Load {
        let table = &mut self.table;
        let neighbour = match direction {
            Direction::Left => {
                assert!(node > 0, "node {} has no left neighbour", node);
                node - 1
            }
            Direction::Right => {
                assert!(
                    node + 1 < table.nodes.len(),
                    "node {} has no right neighbour",
                    node
                );
                node + 1
            }
        };
        assert_eq!(
            table.shards[through].owner, node,
            "shard {} is not owned by node {}",
            through, node
        );

        let (start, far_end) = match direction {
            Direction::Left => (table.nodes[node].first_shard, table.nodes[node].last_shard),
            Direction::Right => (table.nodes[node].last_shard, table.nodes[node].first_shard),
        };
        assert_ne!(through, far_end, "node {} must keep at least one shard", node);

        let mut moved: Load = 0;
        let mut count = 0;
        let mut id = start;
        loop {
            let shard = &mut table.shards[id];
            assert_eq!(shard.owner, node, "arc of node {} is broken at shard {}", node, id);
            shard.owner = neighbour;
            moved += shard.last_load;
            count += 1;
            let step = match direction {
                Direction::Left => shard.next,
                Direction::Right => shard.prev,
            };
            table.pending.push(OwnershipTransfer::new(node, neighbour, id));
            if id == through {
                break;
            }
            id = step;
        }

        match direction {
            Direction::Left => {
                table.nodes[node].first_shard = table.shards[through].next;
                table.nodes[neighbour].last_shard = through;
            }
            Direction::Right => {
                table.nodes[node].last_shard = table.shards[through].prev;
                table.nodes[neighbour].first_shard = through;
            }
        }
        table.nodes[node].num_shards -= count;
        table.nodes[neighbour].num_shards += count;

        let node_load = table.nodes[node].load;
        debug_assert!(node_load >= moved);
        table.set_node_load(node, node_load.saturating_sub(moved));
        let neighbour_load = table.nodes[neighbour].load;
        table.set_node_load(neighbour, neighbour_load + moved);

        trace!(
            node,
            neighbour,
            %direction,
            through,
            shards = count,
            load = moved,
            "Shifted arc boundary"
        );
        moved
    }

    /// Whether every node's arc is intact and arcs follow each other in
    /// node order around the ring.
    pub fn check_contiguity(&self) -> bool {
        self.table.check_arcs()
    }

    fn rebuild_lists(&mut self) {
        let table = &mut self.table;
        for n in 0..table.nodes.len() {
            let (first, last, count) = {
                let node = &table.nodes[n];
                (node.first_shard, node.last_shard, node.num_shards)
            };
            let mut shards = Vec::with_capacity(count);
            let mut id = first;
            loop {
                assert_eq!(
                    table.shards[id].owner, n,
                    "arc of node {} is broken at shard {}",
                    n, id
                );
                shards.push(id);
                if id == last {
                    break;
                }
                assert!(shards.len() < count, "arc of node {} is longer than {}", n, count);
                id = table.shards[id].next;
            }
            assert_eq!(shards.len(), count, "arc of node {} is shorter than {}", n, count);

            let node = &mut table.nodes[n];
            node.shards = shards;
            node.sorted = false;
            node.reset_cursor();
        }
    }
}

impl LoadModel for RestrictedModel {
    fn table(&self) -> &ShardTable {
        &self.table
    }

    fn table_mut(&mut self) -> &mut ShardTable {
        &mut self.table
    }

    fn is_restricted(&self) -> bool {
        true
    }

    /// Collapse the boundary shifts of the round into one move per shard,
    /// ordered by shard id, and rebuild the explicit shard lists.
    fn apply(&mut self) -> Vec<OwnershipTransfer> {
        let mut moves: BTreeMap<ShardId, OwnershipTransfer> = BTreeMap::new();
        for transfer in self.table.pending.drain(..) {
            match moves.entry(transfer.shard) {
                Entry::Occupied(mut entry) => {
                    let chained = entry.get_mut();
                    assert_eq!(
                        chained.to, transfer.from,
                        "shard {} moved from a node that did not own it",
                        transfer.shard
                    );
                    chained.to = transfer.to;
                }
                Entry::Vacant(entry) => {
                    entry.insert(transfer);
                }
            }
        }
        let committed: Vec<OwnershipTransfer> = moves
            .into_values()
            .filter(|transfer| transfer.from != transfer.to)
            .collect();

        for transfer in &committed {
            debug_assert_eq!(self.table.shards[transfer.shard].owner, transfer.to);
        }
        self.rebuild_lists();

        if !committed.is_empty() {
            debug!(transfers = committed.len(), "Committed boundary shifts");
        }
        committed
    }

    /// Split a shard in place inside its owner's arc.
    fn divide_shard(&mut self, owner: NodeId, shard: ShardId, num: usize) {
        let table = &mut self.table;
        assert_eq!(
            table.shards[shard].owner, owner,
            "shard {} is not owned by node {}",
            shard, owner
        );

        let pieces = table.split_shard(shard, num);
        let node = &mut table.nodes[owner];
        if node.last_shard == shard {
            node.last_shard = pieces.end - 1;
        }
        node.num_shards += num - 1;
        node.shards.extend(pieces);
        node.sorted = false;

        debug!(shard, owner, num, "Divided shard");
    }
}

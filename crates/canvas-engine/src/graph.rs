//! Dependency graph construction
//!
//! Builds adjacency lists, reverse adjacency and in-degrees from a canvas's
//! blocks and connections, rejecting connections whose endpoints are not on
//! the canvas. Nodes are addressed by their index in the original block
//! array, which is what the scheduler's tie-break relies on.

use std::collections::HashMap;

use crate::error::{Endpoint, GraphError};
use crate::types::{Block, BlockId, Connection};

/// Adjacency model of a canvas
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    /// Block IDs in original array order
    ids: Vec<BlockId>,
    /// Block ID to array index
    index: HashMap<BlockId, usize>,
    /// Downstream neighbours per node, ascending by array index
    adjacency: Vec<Vec<usize>>,
    /// Upstream neighbours per node, ascending by array index
    reverse: Vec<Vec<usize>>,
    /// Incoming edge count per node
    in_degree: Vec<usize>,
    /// Nodes with a connection to themselves, in array order
    self_loops: Vec<usize>,
}

impl DependencyGraph {
    /// Build the graph, validating referential integrity.
    ///
    /// Fails on the first duplicate block id or the first connection whose
    /// `fromId` or `toId` does not name a block. Pure; touches no block.
    pub fn build(blocks: &[Block], connections: &[Connection]) -> Result<Self, GraphError> {
        let mut index = HashMap::with_capacity(blocks.len());
        for (i, block) in blocks.iter().enumerate() {
            if index.insert(block.id.clone(), i).is_some() {
                return Err(GraphError::DuplicateBlock {
                    block_id: block.id.clone(),
                });
            }
        }

        let n = blocks.len();
        let mut adjacency = vec![Vec::new(); n];
        let mut reverse = vec![Vec::new(); n];
        let mut in_degree = vec![0usize; n];
        let mut self_loops = Vec::new();

        for connection in connections {
            let from = Self::resolve_endpoint(&index, connection, Endpoint::From)?;
            let to = Self::resolve_endpoint(&index, connection, Endpoint::To)?;

            if from == to && !self_loops.contains(&from) {
                self_loops.push(from);
            }
            adjacency[from].push(to);
            reverse[to].push(from);
            in_degree[to] += 1;
        }

        for list in adjacency.iter_mut().chain(reverse.iter_mut()) {
            list.sort_unstable();
        }
        self_loops.sort_unstable();

        Ok(Self {
            ids: blocks.iter().map(|b| b.id.clone()).collect(),
            index,
            adjacency,
            reverse,
            in_degree,
            self_loops,
        })
    }

    fn resolve_endpoint(
        index: &HashMap<BlockId, usize>,
        connection: &Connection,
        endpoint: Endpoint,
    ) -> Result<usize, GraphError> {
        let block_id = match endpoint {
            Endpoint::From => &connection.from_id,
            Endpoint::To => &connection.to_id,
        };
        index
            .get(block_id)
            .copied()
            .ok_or_else(|| GraphError::MissingBlock {
                connection_id: connection.id.clone(),
                endpoint,
                block_id: block_id.clone(),
            })
    }

    /// Number of blocks
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Whether the canvas has no blocks
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Block IDs in original array order
    pub fn block_ids(&self) -> &[BlockId] {
        &self.ids
    }

    /// Array index of a block
    pub fn index_of(&self, block_id: &str) -> Option<usize> {
        self.index.get(block_id).copied()
    }

    /// Block ID at an array index
    pub fn id_at(&self, index: usize) -> &str {
        &self.ids[index]
    }

    /// Downstream neighbours by index
    pub fn adjacency(&self, index: usize) -> &[usize] {
        &self.adjacency[index]
    }

    /// In-degree of every node, indexed like `block_ids`
    pub fn in_degrees(&self) -> &[usize] {
        &self.in_degree
    }

    /// Nodes connected to themselves
    pub fn self_loops(&self) -> &[usize] {
        &self.self_loops
    }

    /// In-degree of a block
    pub fn in_degree(&self, block_id: &str) -> Option<usize> {
        self.index_of(block_id).map(|i| self.in_degree[i])
    }

    /// IDs of blocks that this block depends on (upstream blocks)
    pub fn predecessors(&self, block_id: &str) -> Vec<&str> {
        self.index_of(block_id)
            .map(|i| self.reverse[i].iter().map(|&p| self.id_at(p)).collect())
            .unwrap_or_default()
    }

    /// IDs of blocks that depend on this block (downstream blocks)
    pub fn successors(&self, block_id: &str) -> Vec<&str> {
        self.index_of(block_id)
            .map(|i| self.adjacency[i].iter().map(|&s| self.id_at(s)).collect())
            .unwrap_or_default()
    }
}

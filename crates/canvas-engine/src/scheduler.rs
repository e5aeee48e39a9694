//! Deterministic topological scheduling
//!
//! Kahn's algorithm over a FIFO ready queue. The queue is seeded with the
//! zero in-degree blocks in original array order; blocks released by the
//! same predecessor are enqueued in array order. The same canvas therefore
//! always yields the same order.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::error::GraphError;
use crate::graph::DependencyGraph;
use crate::types::BlockId;

/// A block placed in the execution order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledBlock {
    pub block_id: BlockId,
    pub execution_order: usize,
    /// Position of the block in the canvas block array
    pub block_index: usize,
}

/// One valid linearization of the canvas graph
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schedule {
    pub blocks: Vec<ScheduledBlock>,
}

impl Schedule {
    /// Block IDs in execution order
    pub fn order(&self) -> Vec<&str> {
        self.blocks.iter().map(|b| b.block_id.as_str()).collect()
    }

    /// Position of a block in the order
    pub fn position(&self, block_id: &str) -> Option<usize> {
        self.blocks
            .iter()
            .find(|b| b.block_id == block_id)
            .map(|b| b.execution_order)
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

/// Compute the execution order.
///
/// Fails with `CircularDependency` if the graph is not a DAG, so a schedule
/// that is returned always covers every block.
pub fn schedule(graph: &DependencyGraph) -> Result<Schedule, GraphError> {
    let mut in_degree = graph.in_degrees().to_vec();
    let mut queue: VecDeque<usize> = (0..graph.len()).filter(|&i| in_degree[i] == 0).collect();
    let mut blocks = Vec::with_capacity(graph.len());

    while let Some(node) = queue.pop_front() {
        blocks.push(ScheduledBlock {
            block_id: graph.id_at(node).to_string(),
            execution_order: blocks.len(),
            block_index: node,
        });

        // Adjacency lists are sorted by array index, which gives the
        // tie-break for blocks released together.
        for &next in graph.adjacency(node) {
            in_degree[next] -= 1;
            if in_degree[next] == 0 {
                queue.push_back(next);
            }
        }
    }

    if blocks.len() < graph.len() {
        let block_ids = in_degree
            .iter()
            .enumerate()
            .filter(|(_, &deg)| deg > 0)
            .map(|(i, _)| graph.id_at(i).to_string())
            .collect();
        return Err(GraphError::CircularDependency { block_ids });
    }

    log::debug!(
        "Scheduled {} blocks: {:?}",
        blocks.len(),
        blocks.iter().map(|b| &b.block_id).collect::<Vec<_>>()
    );
    Ok(Schedule { blocks })
}

//! Cycle detection by Kahn elimination
//!
//! Self-loops are rejected before general elimination. Otherwise nodes with
//! zero in-degree are removed repeatedly; whatever cannot be removed sits on
//! or behind a cycle.

use std::collections::VecDeque;

use crate::error::GraphError;
use crate::graph::DependencyGraph;
use crate::types::BlockId;

/// Reject the graph if it contains a cycle.
///
/// On failure the error lists the unresolved block IDs in array order.
pub fn detect_cycles(graph: &DependencyGraph) -> Result<(), GraphError> {
    if !graph.self_loops().is_empty() {
        return Err(GraphError::CircularDependency {
            block_ids: graph
                .self_loops()
                .iter()
                .map(|&i| graph.id_at(i).to_string())
                .collect(),
        });
    }

    let unresolved = unresolved_nodes(graph);
    if unresolved.is_empty() {
        Ok(())
    } else {
        Err(GraphError::CircularDependency {
            block_ids: unresolved,
        })
    }
}

/// Whether the graph is a DAG
pub fn is_acyclic(graph: &DependencyGraph) -> bool {
    detect_cycles(graph).is_ok()
}

/// Run Kahn elimination and return the blocks left with positive in-degree
fn unresolved_nodes(graph: &DependencyGraph) -> Vec<BlockId> {
    let mut in_degree = graph.in_degrees().to_vec();
    let mut queue: VecDeque<usize> = (0..graph.len()).filter(|&i| in_degree[i] == 0).collect();

    while let Some(node) = queue.pop_front() {
        for &next in graph.adjacency(node) {
            in_degree[next] -= 1;
            if in_degree[next] == 0 {
                queue.push_back(next);
            }
        }
    }

    in_degree
        .iter()
        .enumerate()
        .filter(|(_, &deg)| deg > 0)
        .map(|(i, _)| graph.id_at(i).to_string())
        .collect()
}

/// Dependency layer planning
///
/// Splits a workflow's nodes into layers with Kahn's algorithm over a petgraph
/// DAG. Every node lands in a strictly later layer than all its producers, and
/// nodes in the same layer have no dependency on each other.

use crate::workflow::types::{Edge, Node};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlanError {
    /// Nodes left over once no zero in-degree node remains
    #[error("workflow contains a cycle through nodes: {}", .0.join(", "))]
    Cycle(Vec<String>),

    #[error("node id '{0}' is used by more than one node")]
    DuplicateNode(String),
}

/// Compute execution layers
///
/// Layer 0 holds every node without incoming edges, in definition order.
/// Edges naming unknown nodes are ignored; node ids must be unique.
pub fn plan_layers<'a>(nodes: &'a [Node], edges: &[Edge]) -> Result<Vec<Vec<&'a Node>>, PlanError> {
    let mut graph: DiGraph<&'a Node, ()> = DiGraph::with_capacity(nodes.len(), edges.len());
    let mut index_of: HashMap<&str, NodeIndex> = HashMap::with_capacity(nodes.len());

    for node in nodes {
        let idx = graph.add_node(node);
        if index_of.insert(node.id.as_str(), idx).is_some() {
            tracing::error!("❌ Cannot plan layers, duplicate node id '{}'", node.id);
            return Err(PlanError::DuplicateNode(node.id.clone()));
        }
    }

    for edge in edges {
        match (index_of.get(edge.source.as_str()), index_of.get(edge.target.as_str())) {
            (Some(&from), Some(&to)) => {
                graph.add_edge(from, to, ());
            }
            _ => {
                tracing::warn!(
                    "⚠️ Ignoring edge with unknown endpoint: '{}' → '{}'",
                    edge.source,
                    edge.target
                );
            }
        }
    }

    let mut in_degree: Vec<usize> = graph
        .node_indices()
        .map(|idx| graph.neighbors_directed(idx, Direction::Incoming).count())
        .collect();

    let mut current: Vec<NodeIndex> = graph
        .node_indices()
        .filter(|idx| in_degree[idx.index()] == 0)
        .collect();

    let mut layers = Vec::new();
    let mut placed = 0;

    while !current.is_empty() {
        let mut next = Vec::new();
        for &idx in &current {
            // parallel edges show up once per edge, matching the in-degree count
            for target in graph.neighbors_directed(idx, Direction::Outgoing) {
                let degree = &mut in_degree[target.index()];
                *degree -= 1;
                if *degree == 0 {
                    next.push(target);
                }
            }
        }

        placed += current.len();
        layers.push(current.iter().map(|&idx| graph[idx]).collect());

        next.sort();
        current = next;
    }

    if placed < nodes.len() {
        let stuck: Vec<String> = graph
            .node_indices()
            .filter(|idx| in_degree[idx.index()] > 0)
            .map(|idx| graph[idx].id.clone())
            .collect();
        tracing::error!("❌ Cannot plan layers, cycle through: {:?}", stuck);
        return Err(PlanError::Cycle(stuck));
    }

    tracing::debug!("📋 Planned {} nodes into {} layers", nodes.len(), layers.len());

    Ok(layers)
}

/// Node ids per layer, for summaries and logs
pub fn layer_ids(layers: &[Vec<&Node>]) -> Vec<Vec<String>> {
    layers
        .iter()
        .map(|layer| layer.iter().map(|n| n.id.clone()).collect())
        .collect()
}

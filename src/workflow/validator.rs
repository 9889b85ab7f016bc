/// Edit-time connection validation
///
/// Every connection attempt is checked here before the edge exists. Execution
/// never re-runs these checks; it trusts any graph that passed them.

use crate::workflow::types::{Edge, Node, Port, Workflow};
use std::collections::{HashMap, HashSet, VecDeque};
use thiserror::Error;

/// Reason a candidate edge was rejected
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectionError {
    #[error("node '{0}' cannot connect to itself")]
    SelfLoop(String),

    #[error("node '{0}' does not exist")]
    UnknownNode(String),

    #[error("unknown port '{0}'")]
    UnknownPort(String),

    #[error("{kind} node has no '{port}' input")]
    PortNotOnTarget { port: String, kind: &'static str },

    #[error("port '{port}' accepts {expected} producers, but '{source_kind}' emits {actual}")]
    IncompatibleSource {
        port: String,
        source_kind: &'static str,
        expected: crate::workflow::types::Medium,
        actual: crate::workflow::types::Medium,
    },

    #[error("connecting '{source_id}' to '{target_id}' would create a cycle")]
    WouldCycle { source_id: String, target_id: String },

    #[error("node id '{0}' is used by more than one node")]
    DuplicateNode(String),
}

/// Check a candidate edge against the current nodes and edges
///
/// Returns the first rejection reason, checked in this order: self-loop,
/// missing endpoint, port compatibility, cycle.
pub fn check_connection(candidate: &Edge, nodes: &[Node], edges: &[Edge]) -> Result<(), ConnectionError> {
    if candidate.source == candidate.target {
        return Err(ConnectionError::SelfLoop(candidate.source.clone()));
    }

    let source = nodes
        .iter()
        .find(|n| n.id == candidate.source)
        .ok_or_else(|| ConnectionError::UnknownNode(candidate.source.clone()))?;
    let target = nodes
        .iter()
        .find(|n| n.id == candidate.target)
        .ok_or_else(|| ConnectionError::UnknownNode(candidate.target.clone()))?;

    let port: Port = candidate
        .target_port
        .parse()
        .map_err(|_| ConnectionError::UnknownPort(candidate.target_port.clone()))?;

    if !target.kind.has_port(port) {
        return Err(ConnectionError::PortNotOnTarget {
            port: port.to_string(),
            kind: target.kind.name(),
        });
    }

    if source.kind.emits() != port.accepts() {
        return Err(ConnectionError::IncompatibleSource {
            port: port.to_string(),
            source_kind: source.kind.name(),
            expected: port.accepts(),
            actual: source.kind.emits(),
        });
    }

    if reaches(&candidate.target, &candidate.source, edges) {
        return Err(ConnectionError::WouldCycle {
            source_id: candidate.source.clone(),
            target_id: candidate.target.clone(),
        });
    }

    Ok(())
}

/// Boolean form of [`check_connection`]
pub fn is_valid_connection(candidate: &Edge, nodes: &[Node], edges: &[Edge]) -> bool {
    match check_connection(candidate, nodes, edges) {
        Ok(()) => true,
        Err(reason) => {
            tracing::debug!(
                "🚫 Rejected connection {} → {}:{} - {}",
                candidate.source,
                candidate.target,
                candidate.target_port,
                reason
            );
            false
        }
    }
}

/// Validate every edge of a workflow as if it were being connected last
///
/// Used when a whole workflow is saved at once. Node ids are checked for
/// uniqueness first.
pub fn validate_workflow(workflow: &Workflow) -> Result<(), ConnectionError> {
    let mut seen = HashSet::with_capacity(workflow.nodes.len());
    for node in &workflow.nodes {
        if !seen.insert(node.id.as_str()) {
            return Err(ConnectionError::DuplicateNode(node.id.clone()));
        }
    }

    for (i, edge) in workflow.edges.iter().enumerate() {
        let others: Vec<Edge> = workflow
            .edges
            .iter()
            .enumerate()
            .filter(|(j, _)| *j != i)
            .map(|(_, e)| e.clone())
            .collect();
        check_connection(edge, &workflow.nodes, &others)?;
    }
    Ok(())
}

/// Forward BFS over `edges` from `from`; true if `to` is reachable
fn reaches(from: &str, to: &str, edges: &[Edge]) -> bool {
    let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
    for edge in edges {
        adjacency
            .entry(edge.source.as_str())
            .or_default()
            .push(edge.target.as_str());
    }

    let mut visited = HashSet::new();
    let mut queue = VecDeque::new();
    queue.push_back(from);
    visited.insert(from);

    while let Some(current) = queue.pop_front() {
        if current == to {
            return true;
        }
        for &next in adjacency.get(current).map(Vec::as_slice).unwrap_or(&[]) {
            if visited.insert(next) {
                queue.push_back(next);
            }
        }
    }

    false
}

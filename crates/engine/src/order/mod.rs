//! Execution order resolution.
//!
//! Without any declared dependencies a scenario runs in `order` ascending, ties broken by
//! declaration index. As soon as one node declares dependencies the resolver switches to a
//! Kahn-style walk: it repeatedly emits the ready node (every prerequisite already emitted)
//! with the smallest `(order, declaration index)` key. Nodes without an `order` sort after
//! every node that has one.
//!
//! A graph where no remaining node can ever become ready is reported as
//! [`ResolveError::CycleDetected`]; the resolver never returns a truncated sequence.

use std::collections::HashSet;

use cadence_types::Node;
use thiserror::Error;
use tracing::debug;

pub mod gate;

pub use gate::{first_unsatisfied, prerequisites_satisfied, unsatisfied};

/// Structural problems that prevent an execution order from being computed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ResolveError {
    #[error("duplicate node identifier detected: '{0}'")]
    DuplicateNode(String),
    #[error("node '{node}' depends on unknown node '{dependency}'")]
    UnknownDependency { node: String, dependency: String },
    #[error("cycle detected in scenario nodes involving: {}", nodes.join(", "))]
    CycleDetected { nodes: Vec<String> },
}

/// Sort key: nodes with an explicit order first, then by order, then by declaration index.
type OrderKey = (bool, i64, usize);

fn order_key(node: &Node, declaration_index: usize) -> OrderKey {
    (node.order.is_none(), node.order.unwrap_or_default(), declaration_index)
}

/// Compute the execution order for `nodes`, returning node ids.
pub fn compute_order(nodes: &[Node]) -> Result<Vec<String>, ResolveError> {
    let mut keyed = keyed_nodes(nodes)?;

    if nodes.iter().all(|node| node.dependencies.is_empty()) {
        keyed.sort_by_key(|(key, _)| *key);
        return Ok(keyed.into_iter().map(|(_, node)| node.id.clone()).collect());
    }

    topological_order(keyed)
}

fn keyed_nodes(nodes: &[Node]) -> Result<Vec<(OrderKey, &Node)>, ResolveError> {
    let mut seen = HashSet::with_capacity(nodes.len());
    let mut keyed = Vec::with_capacity(nodes.len());
    for (index, node) in nodes.iter().enumerate() {
        if !seen.insert(node.id.as_str()) {
            return Err(ResolveError::DuplicateNode(node.id.clone()));
        }
        keyed.push((order_key(node, index), node));
    }
    Ok(keyed)
}

fn topological_order(mut pending: Vec<(OrderKey, &Node)>) -> Result<Vec<String>, ResolveError> {
    let declared: HashSet<&str> = pending.iter().map(|(_, node)| node.id.as_str()).collect();
    for (_, node) in &pending {
        if let Some(dependency) = node.dependencies.iter().find(|dependency| !declared.contains(dependency.as_str())) {
            return Err(ResolveError::UnknownDependency {
                node: node.id.clone(),
                dependency: dependency.clone(),
            });
        }
    }

    pending.sort_by_key(|(key, _)| *key);
    let mut emitted: HashSet<&str> = HashSet::with_capacity(pending.len());
    let mut ordered = Vec::with_capacity(pending.len());

    while !pending.is_empty() {
        let ready = pending.iter().position(|(_, node)| {
            prerequisites_satisfied(node.dependencies.iter().map(String::as_str), |dependency| emitted.contains(dependency))
        });

        let Some(position) = ready else {
            let mut stuck: Vec<(usize, String)> = pending
                .iter()
                .map(|((_, _, index), node)| (*index, node.id.clone()))
                .collect();
            stuck.sort();
            let nodes: Vec<String> = stuck.into_iter().map(|(_, id)| id).collect();
            debug!(stuck = ?nodes, "no node can become ready; reporting cycle");
            return Err(ResolveError::CycleDetected { nodes });
        };

        let (_, node) = pending.remove(position);
        emitted.insert(node.id.as_str());
        ordered.push(node.id.clone());
    }

    Ok(ordered)
}

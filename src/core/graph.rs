//! Dependency-cycle detection.
//!
//! Submissions that would close a cycle in the task dependency graph are
//! rejected up front. Without this check a circular dependency set would
//! leave every task in it Pending forever.

use std::collections::{HashMap, VecDeque};

use thiserror::Error;

use super::types::TaskId;

/// Errors from dependency-graph validation.
#[derive(Debug, Error)]
pub enum GraphError {
    /// A cycle was detected in the dependency graph.
    #[error("dependency cycle detected involving task: {0}")]
    CycleDetected(TaskId),
}

/// Validate that the dependency graph is acyclic.
///
/// `edges` maps each task to the tasks it depends on. Dependency ids that do
/// not appear as keys are treated as leaf nodes: they contribute no outgoing
/// edges, so they can never participate in a cycle.
///
/// Uses Kahn's algorithm; if not every node can be ordered, some node still
/// has unresolved in-degree and sits on a cycle.
pub fn check_acyclic(edges: &HashMap<TaskId, Vec<TaskId>>) -> Result<(), GraphError> {
    let mut in_degree: HashMap<&TaskId, usize> = HashMap::new();
    let mut dependents: HashMap<&TaskId, Vec<&TaskId>> = HashMap::new();

    for (from, deps) in edges {
        in_degree.entry(from).or_insert(0);
        for to in deps {
            in_degree.entry(to).or_insert(0);
            *in_degree.entry(from).or_insert(0) += 1;
            dependents.entry(to).or_default().push(from);
        }
    }

    let mut queue: VecDeque<&TaskId> = in_degree
        .iter()
        .filter(|(_, degree)| **degree == 0)
        .map(|(id, _)| *id)
        .collect();

    let mut ordered = 0usize;

    while let Some(id) = queue.pop_front() {
        ordered += 1;
        if let Some(downstream) = dependents.get(id) {
            for next in downstream {
                if let Some(degree) = in_degree.get_mut(*next) {
                    *degree -= 1;
                    if *degree == 0 {
                        queue.push_back(next);
                    }
                }
            }
        }
    }

    if ordered == in_degree.len() {
        return Ok(());
    }

    // Report one of the nodes left with unresolved dependencies.
    let stuck = in_degree
        .iter()
        .filter(|(_, degree)| **degree > 0)
        .map(|(id, _)| (*id).clone())
        .min_by(|a, b| a.as_str().cmp(b.as_str()));

    match stuck {
        Some(id) => Err(GraphError::CycleDetected(id)),
        // Unreachable: ordered < len implies a positive in-degree remains.
        None => Ok(()),
    }
}

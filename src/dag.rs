//! Batch ordering and topological sort
//!
//! Implements Kahn's algorithm per priority level with:
//! - Cycle detection with clear error messages
//! - Stable sort (preserves arena order when no dependency relationship)
//! - Validation that no node depends on a later batch

use std::collections::{BinaryHeap, HashMap};

use crate::error::{CycleError, GraphError};
use crate::node::{SubrequestGraph, SubrequestNode};
use crate::token::RequestId;

/// Every batch of a graph, each in evaluation order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchPlan {
    pub batches: Vec<PlannedBatch>,
}

/// Nodes sharing a priority level, topologically ordered
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedBatch {
    pub priority: usize,
    pub order: Vec<RequestId>,
}

impl BatchPlan {
    pub fn len(&self) -> usize {
        self.batches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }
}

/// Wrapper for BinaryHeap to get min-heap behavior (stable sort by arena index)
#[derive(Debug, Eq, PartialEq)]
struct MinHeapEntry {
    arena_idx: usize,
    local_idx: usize,
}

impl Ord for MinHeapEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Reverse ordering for min-heap
        other
            .arena_idx
            .cmp(&self.arena_idx)
            .then_with(|| other.local_idx.cmp(&self.local_idx))
    }
}

impl PartialOrd for MinHeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Request ids a node must be evaluated after: field dependencies and waits
fn upstream(node: &SubrequestNode) -> impl Iterator<Item = &RequestId> {
    node.flattened_dependencies().chain(node.wait_for.iter())
}

/// Validate priorities and order every level before anything is sent
pub fn plan_batches(graph: &SubrequestGraph) -> Result<BatchPlan, GraphError> {
    validate_priorities(graph)?;

    let mut batches = Vec::new();
    for priority in graph.levels() {
        let order = order_level(graph, priority)?;
        batches.push(PlannedBatch { priority, order });
    }
    Ok(BatchPlan { batches })
}

/// A node may only depend on nodes of the same or a lower priority
pub fn validate_priorities(graph: &SubrequestGraph) -> Result<(), GraphError> {
    for node in graph.nodes() {
        for dep in upstream(node) {
            // Ids outside the graph are external; nothing to order against
            let Some(dep_node) = graph.get(dep) else {
                continue;
            };
            if dep_node.priority > node.priority {
                return Err(GraphError::PriorityInversion {
                    node: node.request_id.clone(),
                    node_priority: node.priority,
                    dependency: dep.clone(),
                    dependency_priority: dep_node.priority,
                });
            }
        }
    }
    Ok(())
}

/// Order the nodes of one priority level using Kahn's algorithm
///
/// # Algorithm
///
/// 1. Map each same-level request id to its local index
/// 2. Build adjacency list from same-level dependencies and waits
/// 3. Run Kahn's algorithm with stable sort (min-heap by arena index)
/// 4. Detect cycles if not all nodes are processed
pub fn order_level(graph: &SubrequestGraph, priority: usize) -> Result<Vec<RequestId>, CycleError> {
    let arena: Vec<(usize, &SubrequestNode)> = graph
        .nodes()
        .iter()
        .enumerate()
        .filter(|(_, n)| n.priority == priority)
        .collect();
    let n = arena.len();
    if n == 0 {
        return Ok(vec![]);
    }

    // Step 1: local index per request id
    let local: HashMap<&RequestId, usize> = arena
        .iter()
        .enumerate()
        .map(|(i, (_, node))| (&node.request_id, i))
        .collect();

    // Step 2: adj[i] = nodes that must come after node i
    let mut adj: Vec<Vec<usize>> = vec![Vec::new(); n];
    let mut in_degree: Vec<usize> = vec![0; n];
    for (idx, (_, node)) in arena.iter().enumerate() {
        let mut seen = Vec::new();
        for dep in upstream(node) {
            if let Some(&dep_idx) = local.get(dep) {
                if !seen.contains(&dep_idx) {
                    seen.push(dep_idx);
                    adj[dep_idx].push(idx);
                    in_degree[idx] += 1;
                }
            }
        }
    }

    // Step 3: Kahn's algorithm with stable sort
    let mut heap: BinaryHeap<MinHeapEntry> = BinaryHeap::new();
    for (idx, &degree) in in_degree.iter().enumerate() {
        if degree == 0 {
            heap.push(MinHeapEntry {
                arena_idx: arena[idx].0,
                local_idx: idx,
            });
        }
    }

    let mut sorted: Vec<usize> = Vec::with_capacity(n);
    while let Some(entry) = heap.pop() {
        let idx = entry.local_idx;
        sorted.push(idx);

        for &next in &adj[idx] {
            in_degree[next] -= 1;
            if in_degree[next] == 0 {
                heap.push(MinHeapEntry {
                    arena_idx: arena[next].0,
                    local_idx: next,
                });
            }
        }
    }

    // Step 4: Check for cycle
    if sorted.len() != n {
        let remaining: Vec<usize> = (0..n).filter(|i| !sorted.contains(i)).collect();
        let cycle: Vec<RequestId> = remaining
            .iter()
            .map(|&i| arena[i].1.request_id.clone())
            .collect();

        let mut explanation = format!("Circular dependency detected in batch {}:\n", priority);
        for &idx in &remaining {
            let node = arena[idx].1;
            explanation.push_str(&format!("  --> {}: {}\n", node.request_id, node.describe()));
        }
        explanation.push_str("\nThese subrequests depend on each other in a cycle.");

        return Err(CycleError { cycle, explanation });
    }

    Ok(sorted
        .into_iter()
        .map(|i| arena[i].1.request_id.clone())
        .collect())
}

/// Generate plan description for dry-run output
pub fn describe_plan(graph: &SubrequestGraph, plan: &BatchPlan) -> String {
    let mut output = String::new();
    output.push_str("Subrequest Plan\n");
    output.push_str("===============\n\n");
    output.push_str(&format!(
        "Total nodes: {}, batches: {}\n\n",
        graph.len(),
        plan.len()
    ));

    for batch in &plan.batches {
        output.push_str(&format!("Batch {}\n", batch.priority));
        output.push_str(&"-".repeat(40));
        output.push('\n');

        for id in &batch.order {
            let Some(node) = graph.get(id) else {
                continue;
            };
            output.push_str(&format!("  {}\n    {}\n", node.describe(), id));
            for (field, deps) in &node.dependencies {
                for dep in deps {
                    output.push_str(&format!("    <- {} from {}\n", field, dep));
                }
            }
        }
        output.push('\n');
    }

    output
}

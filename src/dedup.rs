//! Deduplication of one-time commands
//!
//! Nodes carrying equal [`Fingerprint`]s collapse into the first occurrence.
//! Every reference to a dropped node is rewritten to the survivor before
//! scheduling starts; nothing is rewritten afterwards.
//!
//! [`Fingerprint`]: crate::node::Fingerprint

use std::collections::BTreeMap;
use tracing::debug;

use crate::error::GraphError;
use crate::node::{SubrequestGraph, SubrequestNode};
use crate::token::RequestId;

/// Duplicate request id → surviving request id
pub type Replacements = BTreeMap<RequestId, RequestId>;

/// Collapse structurally identical one-time nodes
pub fn deduplicate(graph: SubrequestGraph) -> Result<(SubrequestGraph, Replacements), GraphError> {
    let (nodes, roots) = graph.into_parts();
    let replacements = find_duplicates(&nodes);

    if replacements.is_empty() {
        return Ok((SubrequestGraph::with_roots(nodes, roots)?, replacements));
    }

    // Sub-commands nested under a dropped write share its lineage prefix
    let lineage: Vec<String> = replacements.keys().map(|dup| format!("{}.", dup)).collect();
    let dropped = |id: &RequestId| {
        replacements.contains_key(id) || lineage.iter().any(|p| id.as_str().starts_with(p))
    };

    let mut kept: Vec<SubrequestNode> = nodes
        .into_iter()
        .filter(|n| !dropped(&n.request_id))
        .collect();

    for node in &mut kept {
        for (from, to) in &replacements {
            node.rewrite_request_id(from, to);
        }
    }

    let mut new_roots: Vec<RequestId> = Vec::with_capacity(roots.len());
    for root in roots {
        let root = replacements.get(&root).cloned().unwrap_or(root);
        if !dropped(&root) && !new_roots.contains(&root) {
            new_roots.push(root);
        }
    }

    Ok((SubrequestGraph::with_roots(kept, new_roots)?, replacements))
}

fn find_duplicates(nodes: &[SubrequestNode]) -> Replacements {
    let mut survivors: Vec<&SubrequestNode> = Vec::new();
    let mut replacements = Replacements::new();

    for node in nodes {
        let Some(fp) = &node.fingerprint else {
            continue;
        };
        let first = survivors
            .iter()
            .find(|s| s.fingerprint.as_ref() == Some(fp))
            .map(|s| s.request_id.clone());
        match first {
            Some(survivor) => {
                debug!(
                    duplicate = %node.request_id,
                    survivor = %survivor,
                    fingerprint = %fp.digest(),
                    "collapsing duplicate one-time command"
                );
                replacements.insert(node.request_id.clone(), survivor);
            }
            None => survivors.push(node),
        }
    }

    replacements
}

//! Dependency resolution
//!
//! Turns a node's field dependencies into payload values. A dependency
//! materialized in the batch being assembled is referenced by path token;
//! one answered by an earlier batch is embedded as a concrete identifier.

use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};

use crate::descriptor::Action;
use crate::entity::{EntityModel, RelationKind};
use crate::error::Warning;
use crate::node::SubrequestNode;
use crate::resource::ResourceType;
use crate::response::{ResponseSet, SubResponse};
use crate::token::{PathToken, RequestId};

/// A node already materialized into the batch being assembled
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadyEntry {
    pub resource: ResourceType,
    pub action: Action,
}

impl ReadyEntry {
    /// Views answer with a collection, writes with a single resource
    pub fn is_collection(&self) -> bool {
        self.action == Action::View
    }
}

/// Same-batch siblings keyed by request id
pub type ReadyBatch = BTreeMap<RequestId, ReadyEntry>;

/// A one-to-many link attached after the primary request
#[derive(Debug, Clone, PartialEq)]
pub struct PostHoc {
    pub field: String,
    pub dependency: RequestId,
    pub resource: ResourceType,
    pub token: PathToken,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Resolution {
    /// Field → resolved identifier, identifier list, or token-bearing identifier
    pub values: Map<String, Value>,
    pub post_hoc: Vec<PostHoc>,
    pub unresolved: Vec<String>,
    /// Same-batch siblings the primary descriptor must follow
    pub wait_for: Vec<RequestId>,
    pub warnings: Vec<Warning>,
}

/// Resolve every dependent field of `node`
pub fn resolve(
    node: &SubrequestNode,
    model: &dyn EntityModel,
    ready: &ReadyBatch,
    prior: &ResponseSet,
) -> Resolution {
    let mut resolution = Resolution::default();

    for (field, deps) in &node.dependencies {
        match model.relation_kind(&node.resource, field) {
            RelationKind::One => resolve_singular(node, field, deps, ready, prior, &mut resolution),
            RelationKind::Many => resolve_plural(node, field, deps, ready, prior, &mut resolution),
            RelationKind::Unknown => {
                warn!(
                    node = %node.request_id,
                    field = %field,
                    resource = %node.resource,
                    "relationship cardinality unknown, skipping field"
                );
                resolution.warnings.push(Warning::UnknownRelation {
                    node: node.request_id.clone(),
                    field: field.clone(),
                    resource: node.resource.to_string(),
                });
            }
        }
    }

    resolution
}

fn resolve_singular(
    node: &SubrequestNode,
    field: &str,
    deps: &[RequestId],
    ready: &ReadyBatch,
    prior: &ResponseSet,
    resolution: &mut Resolution,
) {
    // A concurrent sibling wins over anything seen before
    if let Some((dep, entry)) = deps.iter().find_map(|d| ready.get(d).map(|e| (d, e))) {
        let token = PathToken::singular_id(dep.clone(), entry.is_collection());
        debug!(node = %node.request_id, field, dependency = %dep, "resolved by token");
        if !resolution.wait_for.contains(dep) {
            resolution.wait_for.push(dep.clone());
        }
        resolution.values.insert(
            field.to_string(),
            json!({ "type": entry.resource.to_string(), "id": token.to_string() }),
        );
        return;
    }

    // Highest priority wins; ties keep dependency order
    let mut best: Option<&SubResponse> = None;
    for response in deps.iter().flat_map(|d| prior.succeeded(d)) {
        if response.identifiers().is_empty() {
            continue;
        }
        if best.map_or(true, |b| response.priority > b.priority) {
            best = Some(response);
        }
    }

    match best.and_then(|r| r.identifiers().into_iter().next()) {
        Some(identifier) => {
            resolution.values.insert(field.to_string(), identifier);
        }
        None => unresolved(node, field, resolution),
    }
}

fn resolve_plural(
    node: &SubrequestNode,
    field: &str,
    deps: &[RequestId],
    ready: &ReadyBatch,
    prior: &ResponseSet,
    resolution: &mut Resolution,
) {
    let mut seen = BTreeSet::new();
    let mut identifiers = Vec::new();
    let mut linked = 0;

    for dep in deps {
        if let Some(entry) = ready.get(dep) {
            resolution.post_hoc.push(PostHoc {
                field: field.to_string(),
                dependency: dep.clone(),
                resource: entry.resource.clone(),
                token: PathToken::plural_id(dep.clone(), entry.is_collection()),
            });
            linked += 1;
            continue;
        }
        for response in prior.succeeded(dep) {
            for identifier in response.identifiers() {
                let id = identifier["id"].as_str().unwrap_or_default().to_string();
                if seen.insert(id) {
                    identifiers.push(identifier);
                }
            }
        }
    }

    if !identifiers.is_empty() {
        resolution
            .values
            .insert(field.to_string(), Value::Array(identifiers));
    } else if linked == 0 {
        unresolved(node, field, resolution);
    }
}

fn unresolved(node: &SubrequestNode, field: &str, resolution: &mut Resolution) {
    warn!(node = %node.request_id, field, "could not resolve field, omitting it");
    resolution.unresolved.push(field.to_string());
    resolution.warnings.push(Warning::UnresolvedField {
        node: node.request_id.clone(),
        field: field.to_string(),
    });
}

//! Subrequest nodes and the node graph
//!
//! A node is plain data. Its [`Blueprint`] says what to materialize once the
//! batch it belongs to is being assembled; evaluation happens later in
//! [`crate::materialize`].

use serde::Serialize;
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::command::CommandKind;
use crate::descriptor::Action;
use crate::error::GraphError;
use crate::resource::ResourceType;
use crate::token::RequestId;

/// The unit of scheduling
#[derive(Debug, Clone, PartialEq)]
pub struct SubrequestNode {
    pub request_id: RequestId,
    pub resource: ResourceType,
    pub command: CommandKind,
    /// 0 means no dependency; otherwise one more than the highest dependency
    pub priority: usize,
    /// Local field name → request ids whose resolved value feeds that field
    pub dependencies: BTreeMap<String, Vec<RequestId>>,
    /// Implicit ordering on other nodes that does not feed a field
    pub wait_for: Vec<RequestId>,
    pub blueprint: Blueprint,
    /// Structural key for one-time commands
    pub fingerprint: Option<Fingerprint>,
}

impl SubrequestNode {
    /// Every dependency id across all fields, in field order
    pub fn flattened_dependencies(&self) -> impl Iterator<Item = &RequestId> {
        self.dependencies.values().flatten()
    }

    /// Replace every reference to `from` with `to`
    pub fn rewrite_request_id(&mut self, from: &RequestId, to: &RequestId) {
        let swap = |ids: &mut Vec<RequestId>| {
            for id in ids.iter_mut() {
                if id == from {
                    *id = to.clone();
                }
            }
            dedup_in_place(ids);
        };

        for ids in self.dependencies.values_mut() {
            swap(ids);
        }
        swap(&mut self.wait_for);
        if let Blueprint::CreateIfNotFound(cinf) = &mut self.blueprint {
            swap(&mut cinf.lookups);
        }
    }

    /// Short human description for plans and logs
    pub fn describe(&self) -> String {
        match &self.blueprint {
            Blueprint::Write(w) => format!("{} {}", w.action.as_str(), self.resource),
            Blueprint::Read(r) if r.query.is_empty() => format!("view {}", self.resource),
            Blueprint::Read(r) => format!("view {}?{}", self.resource, r.query),
            Blueprint::CreateIfNotFound(c) => format!(
                "create {} unless found by {} lookup(s)",
                self.resource,
                c.lookups.len()
            ),
        }
    }
}

fn dedup_in_place(ids: &mut Vec<RequestId>) {
    let mut seen = BTreeSet::new();
    ids.retain(|id| seen.insert(id.clone()));
}

/// What a node turns into when its batch is assembled
#[derive(Debug, Clone, PartialEq)]
pub enum Blueprint {
    /// `$create` / `$update`
    Write(WriteBlueprint),
    /// `$find`, one read per resource type
    Read(ReadBlueprint),
    /// Fallback create, skipped when any lookup found something
    CreateIfNotFound(CreateIfNotFoundBlueprint),
}

#[derive(Debug, Clone, PartialEq)]
pub struct WriteBlueprint {
    pub action: Action,
    /// Target id for updates
    pub id: Option<String>,
    /// Fields that are not fed by dependencies
    pub constants: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReadBlueprint {
    /// Encoded filter/sort/limit query string, without `?`
    pub query: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreateIfNotFoundBlueprint {
    /// Read nodes whose results decide whether to create
    pub lookups: Vec<RequestId>,
    /// Payload fields taken from the filter
    pub props: Map<String, Value>,
}

/// Structural equality key for one-time commands
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Fingerprint {
    pub command: CommandKind,
    pub arguments: Value,
    pub lexical_prefix: String,
    pub options: Value,
}

impl Fingerprint {
    /// Stable SHA-256 digest of the canonical JSON form
    pub fn digest(&self) -> String {
        let canonical = json!({
            "command": self.command,
            "arguments": canonical(&self.arguments),
            "lexical_prefix": self.lexical_prefix,
            "options": canonical(&self.options),
        });
        let mut hasher = Sha256::new();
        hasher.update(canonical.to_string().as_bytes());
        hex::encode(hasher.finalize())
    }
}

/// Same value with every object's keys in sorted order
fn canonical(value: &Value) -> Value {
    match value {
        Value::Object(obj) => {
            let mut keys: Vec<&String> = obj.keys().collect();
            keys.sort();
            Value::Object(
                keys.into_iter()
                    .map(|k| (k.clone(), canonical(&obj[k.as_str()])))
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(items.iter().map(canonical).collect()),
        other => other.clone(),
    }
}

/// Arena of nodes indexed by request id
#[derive(Debug, Clone, Default)]
pub struct SubrequestGraph {
    nodes: Vec<SubrequestNode>,
    index: HashMap<RequestId, usize>,
    /// Top-level request ids of the command tree
    roots: Vec<RequestId>,
}

impl SubrequestGraph {
    pub fn new(nodes: Vec<SubrequestNode>) -> Result<Self, GraphError> {
        Self::with_roots(nodes, Vec::new())
    }

    pub fn with_roots(
        nodes: Vec<SubrequestNode>,
        roots: Vec<RequestId>,
    ) -> Result<Self, GraphError> {
        let mut index = HashMap::with_capacity(nodes.len());
        for (i, node) in nodes.iter().enumerate() {
            if index.insert(node.request_id.clone(), i).is_some() {
                return Err(GraphError::DuplicateRequestId(node.request_id.clone()));
            }
        }
        Ok(Self {
            nodes,
            index,
            roots,
        })
    }

    pub fn get(&self, id: &RequestId) -> Option<&SubrequestNode> {
        self.index.get(id).map(|&i| &self.nodes[i])
    }

    pub fn contains(&self, id: &RequestId) -> bool {
        self.index.contains_key(id)
    }

    pub fn nodes(&self) -> &[SubrequestNode] {
        &self.nodes
    }

    pub fn roots(&self) -> &[RequestId] {
        &self.roots
    }

    pub fn into_parts(self) -> (Vec<SubrequestNode>, Vec<RequestId>) {
        (self.nodes, self.roots)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Distinct priority levels, ascending
    pub fn levels(&self) -> BTreeSet<usize> {
        self.nodes.iter().map(|n| n.priority).collect()
    }

    /// Nodes at one priority, in arena order
    pub fn at_priority(&self, priority: usize) -> Vec<&SubrequestNode> {
        self.nodes
            .iter()
            .filter(|n| n.priority == priority)
            .collect()
    }
}

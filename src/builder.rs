//! Graph construction
//!
//! Turns a [`Command`] tree into a [`SubrequestGraph`]. The tree is walked
//! with an explicit stack: entering a write command opens a frame, its nested
//! sub-commands are pushed above it, and the frame is closed once every child
//! has reported its top-level request ids and priority.
//!
//! ```text
//! $create log--input                 priority 2
//!   location: $find asset--land      priority 0 ─┐
//!             $createIfNotFound      priority 1 ─┴─ dependencies["location"]
//! ```

use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use tracing::debug;
use uuid::Uuid;

use crate::command::{Command, CommandKind, FieldValue, LookupCommand, WriteCommand};
use crate::descriptor::Action;
use crate::error::{CommandError, SubrequestError};
use crate::node::{
    Blueprint, CreateIfNotFoundBlueprint, Fingerprint, ReadBlueprint, SubrequestGraph,
    SubrequestNode, WriteBlueprint,
};
use crate::query::{create_props, encode_query, split_filter_by_type};
use crate::resource::ResourceType;
use crate::token::RequestId;

/// `prefix::$command:entity--bundle`
pub fn request_id(prefix: &str, kind: CommandKind, resource: &ResourceType) -> RequestId {
    RequestId::new(format!("{}::{}:{}", prefix, kind.keyword(), resource))
}

/// Build the node graph for one top-level command
pub fn build_graph(command: &Command, root_prefix: &str) -> Result<SubrequestGraph, SubrequestError> {
    let mut builder = GraphBuilder::new(root_prefix);
    builder.run(command)?;
    let graph = SubrequestGraph::with_roots(builder.nodes, builder.roots)?;
    debug!(
        nodes = graph.len(),
        levels = graph.levels().len(),
        "built subrequest graph"
    );
    Ok(graph)
}

/// Where a finished child reports back to
#[derive(Debug, Clone)]
struct Slot {
    frame: usize,
    field: String,
}

enum Task<'c> {
    Enter {
        command: &'c Command,
        prefix: String,
        slot: Option<Slot>,
    },
    Exit {
        frame: usize,
    },
}

struct WriteFrame<'c> {
    write: &'c WriteCommand,
    kind: CommandKind,
    request_id: RequestId,
    dependencies: BTreeMap<String, Vec<RequestId>>,
    max_child_priority: Option<usize>,
    slot: Option<Slot>,
}

struct GraphBuilder<'c> {
    root_prefix: String,
    frames: Vec<WriteFrame<'c>>,
    nodes: Vec<SubrequestNode>,
    roots: Vec<RequestId>,
}

impl<'c> GraphBuilder<'c> {
    fn new(root_prefix: &str) -> Self {
        Self {
            root_prefix: root_prefix.to_string(),
            frames: Vec::new(),
            nodes: Vec::new(),
            roots: Vec::new(),
        }
    }

    fn run(&mut self, command: &'c Command) -> Result<(), CommandError> {
        let mut stack = vec![Task::Enter {
            command,
            prefix: self.root_prefix.clone(),
            slot: None,
        }];

        while let Some(task) = stack.pop() {
            match task {
                Task::Enter {
                    command,
                    prefix,
                    slot,
                } => match command {
                    Command::Create(write) | Command::Update(write) => {
                        let frame = self.open_frame(write, command.kind(), &prefix, slot);
                        stack.push(Task::Exit { frame });
                        self.push_children(&mut stack, frame);
                    }
                    Command::Find(lookup) => {
                        let (ids, priority) = self.build_lookup(lookup, &prefix, false)?;
                        self.report(slot, ids, priority);
                    }
                    Command::CreateIfNotFound(lookup) => {
                        let (ids, priority) = self.build_lookup(lookup, &prefix, true)?;
                        self.report(slot, ids, priority);
                    }
                },
                Task::Exit { frame } => {
                    let (id, priority, slot) = self.close_frame(frame);
                    self.report(slot, vec![id], priority);
                }
            }
        }
        Ok(())
    }

    fn open_frame(
        &mut self,
        write: &'c WriteCommand,
        kind: CommandKind,
        prefix: &str,
        slot: Option<Slot>,
    ) -> usize {
        let request_id = request_id(prefix, kind, &write.resource);
        let dependencies = write
            .fields
            .iter()
            .filter(|(_, v)| matches!(v, FieldValue::Nested(_)))
            .map(|(name, _)| (name.clone(), Vec::new()))
            .collect();

        self.frames.push(WriteFrame {
            write,
            kind,
            request_id,
            dependencies,
            max_child_priority: None,
            slot,
        });
        self.frames.len() - 1
    }

    /// Push children in reverse so they are entered in field order
    fn push_children(&self, stack: &mut Vec<Task<'c>>, frame: usize) {
        let parent = &self.frames[frame];
        let write = parent.write;
        for (field, value) in write.fields.iter().rev() {
            let FieldValue::Nested(children) = value else {
                continue;
            };
            let field_prefix = parent.request_id.field_prefix(field);
            for (i, child) in children.iter().enumerate().rev() {
                let prefix = if children.len() > 1 {
                    format!("{}[{}]", field_prefix, i)
                } else {
                    field_prefix.clone()
                };
                stack.push(Task::Enter {
                    command: child,
                    prefix,
                    slot: Some(Slot {
                        frame,
                        field: field.clone(),
                    }),
                });
            }
        }
    }

    fn close_frame(&mut self, frame: usize) -> (RequestId, usize, Option<Slot>) {
        let root_prefix = self.root_prefix.clone();
        let f = &mut self.frames[frame];
        let write = f.write;
        let has_dependencies = f.dependencies.values().any(|ids| !ids.is_empty());
        let priority = if has_dependencies {
            1 + f.max_child_priority.unwrap_or(0)
        } else {
            0
        };

        let constants: Map<String, Value> = write
            .fields
            .iter()
            .filter_map(|(name, value)| match value {
                FieldValue::Constant(v) => Some((name.clone(), v.clone())),
                FieldValue::Nested(_) => None,
            })
            .collect();

        let action = match f.kind {
            CommandKind::Update => match write.id.as_deref().map(Uuid::parse_str) {
                Some(Ok(_)) => Action::Update,
                _ => {
                    debug!(
                        request_id = %f.request_id,
                        "update without a valid id, creating instead"
                    );
                    Action::Create
                }
            },
            _ => Action::Create,
        };

        let fingerprint = write.once.then(|| {
            let mut arguments = write.arguments.clone();
            arguments.insert("type".to_string(), json!(write.resource.to_string()));
            if let Some(id) = &write.id {
                arguments.insert("id".to_string(), json!(id));
            }
            Fingerprint {
                command: f.kind,
                arguments: Value::Object(arguments),
                lexical_prefix: root_prefix,
                options: json!({}),
            }
        });

        let node = SubrequestNode {
            request_id: f.request_id.clone(),
            resource: write.resource.clone(),
            command: f.kind,
            priority,
            dependencies: std::mem::take(&mut f.dependencies),
            wait_for: Vec::new(),
            blueprint: Blueprint::Write(WriteBlueprint {
                action,
                id: write.id.clone(),
                constants,
            }),
            fingerprint,
        };
        debug!(request_id = %node.request_id, priority, "built write node");

        let out = (node.request_id.clone(), priority, f.slot.take());
        self.nodes.push(node);
        out
    }

    /// Read nodes per type plus the optional fallback create
    fn build_lookup(
        &mut self,
        lookup: &LookupCommand,
        prefix: &str,
        create_if_not_found: bool,
    ) -> Result<(Vec<RequestId>, usize), CommandError> {
        let mut ids = Vec::new();

        for (resource, conditions) in split_filter_by_type(lookup) {
            let query = encode_query(&conditions, &lookup.sort, lookup.limit).map_err(|reason| {
                CommandError::InvalidFilter {
                    path: prefix.to_string(),
                    reason,
                }
            })?;
            let id = request_id(prefix, CommandKind::Find, &resource);
            debug!(request_id = %id, "built read node");
            self.nodes.push(SubrequestNode {
                request_id: id.clone(),
                resource,
                command: CommandKind::Find,
                priority: 0,
                dependencies: BTreeMap::new(),
                wait_for: Vec::new(),
                blueprint: Blueprint::Read(ReadBlueprint { query }),
                fingerprint: None,
            });
            ids.push(id);
        }

        if !create_if_not_found {
            return Ok((ids, 0));
        }

        // The fallback creates the first listed type
        let resource = lookup.types[0].clone();
        let id = request_id(prefix, CommandKind::CreateIfNotFound, &resource);
        let fingerprint = lookup.once.then(|| {
            let mut arguments = lookup.conditions.clone();
            arguments.insert(
                "type".to_string(),
                json!(lookup.types.iter().map(|t| t.to_string()).collect::<Vec<_>>()),
            );
            Fingerprint {
                command: CommandKind::CreateIfNotFound,
                arguments: Value::Object(arguments),
                lexical_prefix: self.root_prefix.clone(),
                options: json!({ "limit": lookup.limit, "sort": lookup.sort }),
            }
        });

        debug!(request_id = %id, lookups = ids.len(), "built create-if-not-found node");
        self.nodes.push(SubrequestNode {
            request_id: id.clone(),
            resource,
            command: CommandKind::CreateIfNotFound,
            priority: 1,
            dependencies: BTreeMap::new(),
            wait_for: ids.clone(),
            blueprint: Blueprint::CreateIfNotFound(CreateIfNotFoundBlueprint {
                lookups: ids.clone(),
                props: create_props(&lookup.conditions),
            }),
            fingerprint,
        });
        ids.push(id);
        Ok((ids, 1))
    }

    fn report(&mut self, slot: Option<Slot>, ids: Vec<RequestId>, priority: usize) {
        match slot {
            Some(Slot { frame, field }) => {
                let parent = &mut self.frames[frame];
                parent.dependencies.entry(field).or_default().extend(ids);
                parent.max_child_priority =
                    Some(parent.max_child_priority.map_or(priority, |p| p.max(priority)));
            }
            None => self.roots.extend(ids),
        }
    }
}

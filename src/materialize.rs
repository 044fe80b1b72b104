//! Blueprint evaluation
//!
//! Second phase of scheduling: given a node, the siblings already
//! materialized in its batch and every earlier response, produce the wire
//! descriptors for that node. An empty result is a no-op.

use serde_json::json;
use tracing::debug;

use crate::descriptor::{Action, Subrequest};
use crate::entity::{Entity, EntityModel};
use crate::error::{SubrequestError, Warning};
use crate::node::{
    Blueprint, CreateIfNotFoundBlueprint, ReadBlueprint, SubrequestNode, WriteBlueprint,
};
use crate::resolver::{resolve, PostHoc, ReadyBatch};
use crate::response::ResponseSet;
use crate::token::RequestId;
use crate::transform::TransformTable;

/// Descriptors for one node plus anything worth reporting
#[derive(Debug, Clone, Default)]
pub struct Materialized {
    /// Primary descriptor first, post-hoc links after it
    pub descriptors: Vec<Subrequest>,
    pub warnings: Vec<Warning>,
}

impl Materialized {
    fn noop(warnings: Vec<Warning>) -> Self {
        Self {
            descriptors: Vec::new(),
            warnings,
        }
    }

    pub fn is_noop(&self) -> bool {
        self.descriptors.is_empty()
    }
}

pub struct Materializer<'a> {
    model: &'a dyn EntityModel,
    transform: &'a TransformTable,
    api_prefix: &'a str,
}

impl<'a> Materializer<'a> {
    pub fn new(model: &'a dyn EntityModel, transform: &'a TransformTable, api_prefix: &'a str) -> Self {
        Self {
            model,
            transform,
            api_prefix,
        }
    }

    pub fn materialize(
        &self,
        node: &SubrequestNode,
        ready: &ReadyBatch,
        prior: &ResponseSet,
    ) -> Result<Materialized, SubrequestError> {
        match &node.blueprint {
            Blueprint::Write(write) => self.write(node, write, ready, prior),
            Blueprint::Read(read) => Ok(self.read(node, read, prior)),
            Blueprint::CreateIfNotFound(cinf) => self.create_if_not_found(node, cinf, prior),
        }
    }

    fn write(
        &self,
        node: &SubrequestNode,
        write: &WriteBlueprint,
        ready: &ReadyBatch,
        prior: &ResponseSet,
    ) -> Result<Materialized, SubrequestError> {
        let resolution = resolve(node, self.model, ready, prior);

        let mut props = write.constants.clone();
        props.extend(resolution.values);

        let entity = match (write.action, write.id.as_deref()) {
            (Action::Update, Some(id)) => self.model.patch_entity(&node.resource, id, &props),
            _ => {
                if let Some(id) = &write.id {
                    props.insert("id".to_string(), json!(id));
                }
                self.model.create_entity(&node.resource, &props)
            }
        };
        let Some(entity) = entity else {
            debug!(node = %node.request_id, resource = %node.resource, "entity model declined, no-op");
            return Ok(Materialized::noop(resolution.warnings));
        };

        let uri = match write.action {
            Action::Update => node.resource.resource_uri(self.api_prefix, &entity.id),
            _ => node.resource.collection_uri(self.api_prefix),
        };
        let body = serde_json::to_string(&self.transform.to_document(&entity))?;

        let mut wait_for = resolution.wait_for;
        for id in pending_waits(node, prior) {
            if !wait_for.contains(&id) {
                wait_for.push(id);
            }
        }

        let mut descriptors = vec![Subrequest::new(
            node.request_id.clone(),
            node.request_id.clone(),
            write.action,
            uri,
        )
        .with_body(body)
        .with_wait_for(wait_for)];

        for (index, link) in resolution.post_hoc.iter().enumerate() {
            descriptors.push(self.post_hoc(node, &entity, link, index)?);
        }

        Ok(Materialized {
            descriptors,
            warnings: resolution.warnings,
        })
    }

    /// Relationship call linking `entity` to a same-batch dependency
    fn post_hoc(
        &self,
        node: &SubrequestNode,
        entity: &Entity,
        link: &PostHoc,
        index: usize,
    ) -> Result<Subrequest, SubrequestError> {
        let request_id = RequestId::new(format!(
            "{}::$relate:{}:{}",
            node.request_id, link.field, index
        ));
        let uri = node
            .resource
            .relationship_uri(self.api_prefix, &entity.id, &link.field);
        let body = json!({
            "data": [{ "type": link.resource.to_string(), "id": link.token.to_string() }]
        });
        debug!(%request_id, dependency = %link.dependency, "post-hoc relationship link");

        Ok(Subrequest::new(request_id, node.request_id.clone(), Action::Create, uri)
            .with_body(serde_json::to_string(&body)?)
            .with_wait_for(vec![link.dependency.clone(), node.request_id.clone()]))
    }

    fn read(&self, node: &SubrequestNode, read: &ReadBlueprint, prior: &ResponseSet) -> Materialized {
        let mut uri = node.resource.collection_uri(self.api_prefix);
        if !read.query.is_empty() {
            uri.push('?');
            uri.push_str(&read.query);
        }
        let descriptor = Subrequest::new(
            node.request_id.clone(),
            node.request_id.clone(),
            Action::View,
            uri,
        )
        .with_wait_for(pending_waits(node, prior));
        Materialized {
            descriptors: vec![descriptor],
            warnings: Vec::new(),
        }
    }

    fn create_if_not_found(
        &self,
        node: &SubrequestNode,
        cinf: &CreateIfNotFoundBlueprint,
        prior: &ResponseSet,
    ) -> Result<Materialized, SubrequestError> {
        if let Some(hit) = cinf.lookups.iter().find(|id| prior.found(id)) {
            debug!(node = %node.request_id, lookup = %hit, "lookup matched, skipping create");
            return Ok(Materialized::default());
        }

        let Some(entity) = self.model.create_entity(&node.resource, &cinf.props) else {
            debug!(node = %node.request_id, resource = %node.resource, "entity model declined, no-op");
            return Ok(Materialized::default());
        };
        let body = serde_json::to_string(&self.transform.to_document(&entity))?;

        let descriptor = Subrequest::new(
            node.request_id.clone(),
            node.request_id.clone(),
            Action::Create,
            node.resource.collection_uri(self.api_prefix),
        )
        .with_body(body)
        .with_wait_for(pending_waits(node, prior));

        Ok(Materialized {
            descriptors: vec![descriptor],
            warnings: Vec::new(),
        })
    }
}

/// Explicit waits not already answered by an earlier batch
fn pending_waits(node: &SubrequestNode, prior: &ResponseSet) -> Vec<RequestId> {
    node.wait_for
        .iter()
        .filter(|id| !prior.answered(id))
        .cloned()
        .collect()
}

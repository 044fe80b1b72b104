//! Entity model
//!
//! Manufactures entity payloads and answers relationship cardinality
//! questions from JSON Schema documents keyed by resource type.

use anyhow::{Context, Result};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info};
use uuid::Uuid;

use crate::resource::ResourceType;

/// Resource type → JSON Schema
pub type Schemata = BTreeMap<ResourceType, Value>;

/// Cardinality of a relationship field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationKind {
    /// `type: "object"`
    One,
    /// `type: "array"`
    Many,
    Unknown,
}

/// A manufactured entity, split the way JSON:API splits it
#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    pub id: String,
    pub resource: ResourceType,
    pub attributes: Map<String, Value>,
    pub relationships: Map<String, Value>,
}

/// Source of entity payloads and schemas
///
/// `None` from either constructor means the payload cannot be manufactured;
/// callers treat that as a no-op, never an error.
pub trait EntityModel: Send + Sync {
    fn schema(&self, resource: &ResourceType) -> Option<&Value>;

    /// Full payload for a new entity, schema defaults included
    fn create_entity(&self, resource: &ResourceType, props: &Map<String, Value>) -> Option<Entity>;

    /// Payload for an existing entity carrying only the supplied fields
    fn patch_entity(
        &self,
        resource: &ResourceType,
        id: &str,
        props: &Map<String, Value>,
    ) -> Option<Entity>;

    fn relation_kind(&self, resource: &ResourceType, field: &str) -> RelationKind {
        self.schema(resource)
            .map_or(RelationKind::Unknown, |schema| relation_kind(schema, field))
    }
}

/// Classify `field` using `properties.relationships.properties[field].type`
pub fn relation_kind(schema: &Value, field: &str) -> RelationKind {
    match schema
        .pointer(&relationship_pointer(field))
        .and_then(|p| p.get("type"))
        .and_then(Value::as_str)
    {
        Some("object") => RelationKind::One,
        Some("array") => RelationKind::Many,
        _ => RelationKind::Unknown,
    }
}

fn relationship_pointer(field: &str) -> String {
    // JSON pointer escaping
    let escaped = field.replace('~', "~0").replace('/', "~1");
    format!("/properties/relationships/properties/{}", escaped)
}

fn section<'a>(schema: &'a Value, name: &str) -> Option<&'a Map<String, Value>> {
    schema
        .get("properties")?
        .get(name)?
        .get("properties")?
        .as_object()
}

/// Parse `{"entity--bundle": schema, ...}`
pub fn schemata_from_value(value: &Value) -> Result<Schemata> {
    let obj = value
        .as_object()
        .context("schemata must be an object keyed by entity--bundle")?;
    let mut schemata = Schemata::new();
    for (key, schema) in obj {
        let resource: ResourceType = key
            .parse()
            .map_err(anyhow::Error::msg)
            .with_context(|| format!("Invalid schemata key '{}'", key))?;
        schemata.insert(resource, schema.clone());
    }
    Ok(schemata)
}

/// Load schemata from a JSON file
pub fn load_schemata(path: impl AsRef<Path>) -> Result<Schemata> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read schemata {}", path.display()))?;
    let value: Value = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse schemata {}", path.display()))?;
    let schemata = schemata_from_value(&value)?;
    info!("Loaded {} schemata from {}", schemata.len(), path.display());
    Ok(schemata)
}

/// [`EntityModel`] backed by a schemata map
#[derive(Debug, Clone, Default)]
pub struct SchemaEntityModel {
    schemata: Schemata,
}

impl SchemaEntityModel {
    pub fn new(schemata: Schemata) -> Self {
        Self { schemata }
    }

    pub fn schemata(&self) -> &Schemata {
        &self.schemata
    }

    fn split(
        &self,
        schema: &Value,
        resource: &ResourceType,
        props: &Map<String, Value>,
    ) -> (Map<String, Value>, Map<String, Value>) {
        let known_attributes = section(schema, "attributes");
        let known_relationships = section(schema, "relationships");

        let mut attributes = Map::new();
        let mut relationships = Map::new();
        for (field, value) in props {
            if field == "id" || field == "type" {
                continue;
            }
            if known_relationships.is_some_and(|r| r.contains_key(field)) {
                relationships.insert(field.clone(), value.clone());
            } else if known_attributes.is_some_and(|a| a.contains_key(field)) {
                attributes.insert(field.clone(), value.clone());
            } else {
                debug!(%resource, field = %field, "dropping field missing from schema");
            }
        }
        (attributes, relationships)
    }
}

impl EntityModel for SchemaEntityModel {
    fn schema(&self, resource: &ResourceType) -> Option<&Value> {
        self.schemata.get(resource)
    }

    fn create_entity(&self, resource: &ResourceType, props: &Map<String, Value>) -> Option<Entity> {
        let schema = self.schema(resource)?;
        let (mut attributes, relationships) = self.split(schema, resource, props);

        if let Some(known) = section(schema, "attributes") {
            for (field, definition) in known {
                if let Some(default) = definition.get("default") {
                    attributes
                        .entry(field.clone())
                        .or_insert_with(|| default.clone());
                }
            }
        }

        let id = props
            .get("id")
            .and_then(Value::as_str)
            .filter(|id| Uuid::parse_str(id).is_ok())
            .map_or_else(|| Uuid::new_v4().to_string(), str::to_string);

        Some(Entity {
            id,
            resource: resource.clone(),
            attributes,
            relationships,
        })
    }

    fn patch_entity(
        &self,
        resource: &ResourceType,
        id: &str,
        props: &Map<String, Value>,
    ) -> Option<Entity> {
        let schema = self.schema(resource)?;
        let (attributes, relationships) = self.split(schema, resource, props);
        Some(Entity {
            id: id.to_string(),
            resource: resource.clone(),
            attributes,
            relationships,
        })
    }
}

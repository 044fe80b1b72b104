//! Local entity → JSON:API wire document
//!
//! The table is derived once from the schemata; serialization is then a pure
//! lookup per resource type.

use chrono::{TimeZone, Utc};
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, BTreeSet};

use crate::entity::{Entity, Schemata};
use crate::resource::ResourceType;

#[derive(Debug, Clone, Default)]
struct FieldTransforms {
    /// Attributes declared with `format: "date-time"`
    date_times: BTreeSet<String>,
}

/// Per-resource field transforms
#[derive(Debug, Clone, Default)]
pub struct TransformTable {
    fields: BTreeMap<ResourceType, FieldTransforms>,
}

impl TransformTable {
    pub fn from_schemata(schemata: &Schemata) -> Self {
        let fields = schemata
            .iter()
            .map(|(resource, schema)| {
                let date_times = schema
                    .pointer("/properties/attributes/properties")
                    .and_then(Value::as_object)
                    .map(|attrs| {
                        attrs
                            .iter()
                            .filter(|(_, def)| {
                                def.get("format").and_then(Value::as_str) == Some("date-time")
                            })
                            .map(|(name, _)| name.clone())
                            .collect()
                    })
                    .unwrap_or_default();
                (resource.clone(), FieldTransforms { date_times })
            })
            .collect();
        Self { fields }
    }

    /// `{ "data": { type, id, attributes, relationships } }`
    pub fn to_document(&self, entity: &Entity) -> Value {
        let transforms = self.fields.get(&entity.resource);

        let attributes: Map<String, Value> = entity
            .attributes
            .iter()
            .map(|(name, value)| {
                let is_date = transforms.is_some_and(|t| t.date_times.contains(name));
                let value = if is_date {
                    to_rfc3339(value)
                } else {
                    value.clone()
                };
                (name.clone(), value)
            })
            .collect();

        let relationships: Map<String, Value> = entity
            .relationships
            .iter()
            .map(|(name, value)| (name.clone(), json!({ "data": value })))
            .collect();

        let mut data = Map::new();
        data.insert("type".into(), json!(entity.resource.to_string()));
        data.insert("id".into(), json!(entity.id));
        if !attributes.is_empty() {
            data.insert("attributes".into(), Value::Object(attributes));
        }
        if !relationships.is_empty() {
            data.insert("relationships".into(), Value::Object(relationships));
        }
        json!({ "data": data })
    }
}

/// Unix seconds → RFC 3339; strings and anything else pass through
fn to_rfc3339(value: &Value) -> Value {
    let Some(secs) = value.as_i64().or_else(|| value.as_f64().map(|f| f as i64)) else {
        return value.clone();
    };
    match Utc.timestamp_opt(secs, 0).single() {
        Some(dt) => Value::String(dt.to_rfc3339()),
        None => value.clone(),
    }
}

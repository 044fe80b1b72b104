//! Resource types (`entity--bundle`)

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A JSON:API resource type split into entity type and bundle
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ResourceType {
    pub entity_type: String,
    pub bundle: String,
}

impl ResourceType {
    pub fn new(entity_type: impl Into<String>, bundle: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            bundle: bundle.into(),
        }
    }

    /// Collection endpoint, e.g. `/api/log/input`
    pub fn collection_uri(&self, api_prefix: &str) -> String {
        format!(
            "{}/{}/{}",
            api_prefix.trim_end_matches('/'),
            self.entity_type,
            self.bundle
        )
    }

    /// Individual resource endpoint, e.g. `/api/log/input/{id}`
    pub fn resource_uri(&self, api_prefix: &str, id: &str) -> String {
        format!("{}/{}", self.collection_uri(api_prefix), id)
    }

    /// Relationship sub-endpoint, e.g. `/api/log/input/{id}/relationships/location`
    pub fn relationship_uri(&self, api_prefix: &str, id: &str, field: &str) -> String {
        format!("{}/relationships/{}", self.resource_uri(api_prefix, id), field)
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}--{}", self.entity_type, self.bundle)
    }
}

impl FromStr for ResourceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err("resource type is empty".to_string());
        }
        match s.split_once("--") {
            Some((entity, bundle)) if !entity.is_empty() && !bundle.is_empty() => {
                Ok(Self::new(entity, bundle))
            }
            Some(_) => Err(format!("'{}' is not of the form entity--bundle", s)),
            None => Ok(Self::new(s, s)),
        }
    }
}

impl TryFrom<String> for ResourceType {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ResourceType> for String {
    fn from(value: ResourceType) -> Self {
        value.to_string()
    }
}

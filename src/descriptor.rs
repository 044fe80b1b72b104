//! Wire descriptors sent to the subrequests endpoint

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::token::RequestId;

pub const JSON_API_MEDIA_TYPE: &str = "application/vnd.api+json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Create,
    Update,
    View,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Create => "create",
            Action::Update => "update",
            Action::View => "view",
        }
    }
}

/// One logical request inside a batch
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Subrequest {
    pub request_id: RequestId,
    pub action: Action,
    pub uri: String,
    pub headers: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub wait_for: Vec<RequestId>,
    /// Node this descriptor was materialized from
    #[serde(skip)]
    pub origin: RequestId,
}

impl Subrequest {
    pub fn new(request_id: RequestId, origin: RequestId, action: Action, uri: String) -> Self {
        let mut headers = BTreeMap::new();
        headers.insert("Accept".to_string(), JSON_API_MEDIA_TYPE.to_string());
        if action != Action::View {
            headers.insert("Content-Type".to_string(), JSON_API_MEDIA_TYPE.to_string());
        }
        Self {
            request_id,
            action,
            uri,
            headers,
            body: None,
            wait_for: Vec::new(),
            origin,
        }
    }

    pub fn with_body(mut self, body: String) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_wait_for(mut self, wait_for: Vec<RequestId>) -> Self {
        self.wait_for = wait_for;
        self
    }
}

//! Shared fixtures: a scripted subrequests backend that records every batch

#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, HashSet};
use std::sync::Mutex;

use jsonapi_subrequests::{
    schemata_from_value, Schemata, SubrequestClient, SubrequestConfig, Transport,
    TransportError, TransportRequest,
};

pub fn schemata() -> Schemata {
    schemata_from_value(&json!({
        "log--input": {
            "properties": {
                "attributes": {
                    "properties": {
                        "name": { "type": "string" },
                        "title": { "type": "string" },
                        "timestamp": { "type": "string", "format": "date-time" }
                    }
                },
                "relationships": {
                    "properties": {
                        "location": { "type": "array" },
                        "owner": { "type": "object" }
                    }
                }
            }
        },
        "log--activity": {
            "properties": {
                "attributes": { "properties": { "name": { "type": "string" } } },
                "relationships": {
                    "properties": {
                        "location": { "type": "array" },
                        "asset": { "type": "array" }
                    }
                }
            }
        },
        "asset--land": {
            "properties": {
                "attributes": {
                    "properties": {
                        "name": { "type": "string" },
                        "status": { "type": "string", "default": "active" }
                    }
                }
            }
        }
    }))
    .unwrap()
}

/// One descriptor as the backend received it
#[derive(Debug, Clone)]
pub struct Received {
    pub request_id: String,
    pub action: String,
    pub uri: String,
    pub body: Option<Value>,
    pub wait_for: Vec<String>,
}

impl Received {
    fn from_value(value: &Value) -> Self {
        Self {
            request_id: value["requestId"].as_str().unwrap().to_string(),
            action: value["action"].as_str().unwrap().to_string(),
            uri: value["uri"].as_str().unwrap().to_string(),
            body: value["body"]
                .as_str()
                .map(|b| serde_json::from_str(b).unwrap()),
            wait_for: value["waitFor"]
                .as_array()
                .map(|ids| ids.iter().map(|i| i.as_str().unwrap().to_string()).collect())
                .unwrap_or_default(),
        }
    }

    /// `data.relationships.<field>.data` of the request body
    pub fn relationship(&self, field: &str) -> Option<&Value> {
        self.body.as_ref()?.pointer(&format!("/data/relationships/{}/data", field))
    }

    pub fn entity_id(&self) -> Option<&str> {
        self.body.as_ref()?.pointer("/data/id")?.as_str()
    }
}

/// Scripted backend: views answer from `finds`, writes echo their resource
#[derive(Default)]
pub struct MockBackend {
    /// Collection uri prefix → resources a view returns
    finds: BTreeMap<String, Vec<Value>>,
    /// Request ids answered with 422
    rejected: HashSet<String>,
    /// Zero-based call index that fails at the transport level
    fail_call: Option<usize>,
    batches: Mutex<Vec<Vec<Received>>>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_find(mut self, uri_prefix: &str, resources: Vec<Value>) -> Self {
        self.finds.insert(uri_prefix.to_string(), resources);
        self
    }

    pub fn rejecting(mut self, request_id: &str) -> Self {
        self.rejected.insert(request_id.to_string());
        self
    }

    pub fn failing_call(mut self, index: usize) -> Self {
        self.fail_call = Some(index);
        self
    }

    pub fn batches(&self) -> Vec<Vec<Received>> {
        self.batches.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        self.batches.lock().unwrap().len()
    }

    fn answer(&self, received: &Received) -> (u16, Value) {
        if self.rejected.contains(&received.request_id) {
            return (
                422,
                json!({ "errors": [{ "title": "Unprocessable", "detail": "rejected by mock" }] }),
            );
        }
        match received.action.as_str() {
            "view" => {
                let data = self
                    .finds
                    .iter()
                    .find(|(prefix, _)| received.uri.starts_with(prefix.as_str()))
                    .map(|(_, resources)| resources.clone())
                    .unwrap_or_default();
                (200, json!({ "data": data }))
            }
            _ => {
                let data = received
                    .body
                    .as_ref()
                    .and_then(|b| b.get("data"))
                    .cloned()
                    .unwrap_or(Value::Null);
                let data = match data {
                    Value::Object(obj) => {
                        let mut echoed = Map::new();
                        echoed.insert("type".into(), obj["type"].clone());
                        echoed.insert("id".into(), obj["id"].clone());
                        Value::Object(echoed)
                    }
                    other => other,
                };
                (201, json!({ "data": data }))
            }
        }
    }
}

#[async_trait]
impl Transport for MockBackend {
    async fn request(&self, uri: &str, request: TransportRequest) -> Result<Value, TransportError> {
        assert!(uri.ends_with("/subrequests?_format=json"), "unexpected uri {}", uri);
        let received: Vec<Received> = request
            .data
            .as_array()
            .unwrap()
            .iter()
            .map(Received::from_value)
            .collect();

        let call = {
            let mut batches = self.batches.lock().unwrap();
            batches.push(received.clone());
            batches.len() - 1
        };
        if self.fail_call == Some(call) {
            return Err(TransportError::Status {
                status: 502,
                body: "bad gateway".into(),
            });
        }

        let mut out = Map::new();
        for r in &received {
            let (status, body) = self.answer(r);
            let content_id = format!("<{}>", r.request_id);
            out.insert(
                content_id.clone(),
                json!({
                    "headers": {
                        "Content-Id": [content_id],
                        "status": [status.to_string()]
                    },
                    "body": body.to_string()
                }),
            );
        }
        Ok(Value::Object(out))
    }
}

pub fn client(backend: MockBackend) -> SubrequestClient<MockBackend> {
    SubrequestClient::new(
        SubrequestConfig::new("https://farm.example.com"),
        schemata(),
        backend,
    )
}

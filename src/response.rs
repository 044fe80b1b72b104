//! Response merging
//!
//! The subrequests endpoint answers each batch with one entry per
//! subresponse, keyed or tagged by content id. Every entry is traced back to
//! the descriptor that produced it, joined with its node's metadata and
//! folded into the accumulated [`ResponseSet`].

use serde::Serialize;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use tracing::{debug, warn};

use crate::descriptor::{Action, Subrequest};
use crate::error::{ResponseError, Warning};
use crate::node::SubrequestGraph;
use crate::resource::ResourceType;
use crate::token::{ContentId, RequestId};

const CONTENT_ID_HEADER: &str = "content-id";

/// One subresponse merged with the node it came from
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubResponse {
    pub content_id: ContentId,
    /// Node whose blueprint produced the descriptor
    pub origin: RequestId,
    pub resource: ResourceType,
    pub priority: usize,
    pub action: Action,
    pub status: u16,
    pub headers: Map<String, Value>,
    pub body: Option<Value>,
}

impl SubResponse {
    pub fn is_success(&self) -> bool {
        self.status < 400
    }

    /// False for post-hoc relationship calls, which carry the node as origin
    /// but answer under their own request id
    pub fn is_primary(&self) -> bool {
        self.content_id.request_id == self.origin
    }

    pub fn data(&self) -> Option<&Value> {
        self.body.as_ref()?.get("data")
    }

    /// True when `data` holds at least one resource
    pub fn has_data(&self) -> bool {
        match self.data() {
            Some(Value::Array(items)) => !items.is_empty(),
            Some(Value::Null) | None => false,
            Some(_) => true,
        }
    }

    /// `{type, id}` identifiers of every resource in `data`
    pub fn identifiers(&self) -> Vec<Value> {
        match self.data() {
            Some(Value::Array(items)) => items.iter().filter_map(identifier).collect(),
            Some(item) => identifier(item).into_iter().collect(),
            None => vec![],
        }
    }

    fn error_detail(&self) -> Option<String> {
        let error = self.body.as_ref()?.get("errors")?.get(0)?;
        error
            .get("detail")
            .or_else(|| error.get("title"))
            .and_then(Value::as_str)
            .map(str::to_string)
    }
}

fn identifier(resource: &Value) -> Option<Value> {
    let kind = resource.get("type")?.as_str()?;
    let id = resource.get("id")?.as_str()?;
    Some(json!({ "type": kind, "id": id }))
}

/// Every subresponse received so far, in arrival order
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ResponseSet {
    responses: Vec<SubResponse>,
}

impl ResponseSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extend(&mut self, responses: impl IntoIterator<Item = SubResponse>) {
        self.responses.extend(responses);
    }

    pub fn iter(&self) -> impl Iterator<Item = &SubResponse> {
        self.responses.iter()
    }

    pub fn len(&self) -> usize {
        self.responses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.responses.is_empty()
    }

    /// Successful primary responses of one node
    pub fn succeeded(&self, node: &RequestId) -> impl Iterator<Item = &SubResponse> + '_ {
        let node = node.clone();
        self.responses
            .iter()
            .filter(move |r| r.origin == node && r.is_primary() && r.is_success())
    }

    /// True when `node` got any response at all, failed or not
    pub fn answered(&self, node: &RequestId) -> bool {
        self.responses.iter().any(|r| &r.origin == node)
    }

    /// True when any successful response of `node` returned data
    pub fn found(&self, node: &RequestId) -> bool {
        self.succeeded(node).any(SubResponse::has_data)
    }

    pub fn into_vec(self) -> Vec<SubResponse> {
        self.responses
    }
}

/// Merge one batch's transport result
///
/// Accepts either an object keyed by content id or an array of entries;
/// each entry carries `headers` (with `Content-Id`), a status and a body
/// that may itself be JSON-encoded text.
pub fn merge_batch(
    raw: &Value,
    dispatched: &[Subrequest],
    graph: &SubrequestGraph,
    priority: usize,
) -> Result<(Vec<SubResponse>, Vec<Warning>), ResponseError> {
    let entries: Vec<(Option<&str>, &Value)> = match raw {
        Value::Object(map) => map.iter().map(|(k, v)| (Some(k.as_str()), v)).collect(),
        Value::Array(items) => items.iter().map(|v| (None, v)).collect(),
        other => {
            return Err(ResponseError::InvalidPayload(format!(
                "expected an object or array of subresponses, got {}",
                type_name(other)
            )))
        }
    };

    let by_id: HashMap<&RequestId, (usize, &Subrequest)> = dispatched
        .iter()
        .enumerate()
        .map(|(i, d)| (&d.request_id, (i, d)))
        .collect();

    let mut merged: Vec<(usize, SubResponse)> = Vec::with_capacity(entries.len());
    let mut warnings = Vec::new();

    for (key, entry) in entries {
        let headers = header_map(entry);
        let raw_id = header_value(&headers, CONTENT_ID_HEADER)
            .or(key.map(str::to_string))
            .ok_or_else(|| {
                ResponseError::InvalidPayload("subresponse without a Content-Id".to_string())
            })?;
        let content_id = ContentId::parse(&raw_id)?;

        let Some(&(index, descriptor)) = by_id.get(&content_id.request_id) else {
            warn!(content_id = %raw_id, "subresponse does not match a dispatched subrequest");
            warnings.push(Warning::UnmatchedSubresponse { content_id: raw_id });
            continue;
        };

        let origin = descriptor.origin.clone();
        let resource = match graph.get(&origin) {
            Some(node) => node.resource.clone(),
            None => {
                warn!(%origin, "subresponse origin is not part of the graph");
                warnings.push(Warning::UnmatchedSubresponse { content_id: raw_id });
                continue;
            }
        };

        let response = SubResponse {
            status: status_of(entry, &headers)?,
            body: body_of(entry),
            content_id,
            origin,
            resource,
            priority,
            action: descriptor.action,
            headers,
        };

        if !response.is_success() {
            let detail = response.error_detail();
            warn!(
                content_id = %response.content_id,
                status = response.status,
                detail = detail.as_deref().unwrap_or(""),
                "subresponse failed"
            );
            warnings.push(Warning::SubresponseFailed {
                content_id: response.content_id.to_string(),
                status: response.status,
                detail,
            });
        }
        merged.push((index, response));
    }

    // Dispatch order first, then wildcard occurrence
    merged.sort_by(|(a, ra), (b, rb)| {
        a.cmp(b)
            .then_with(|| ra.content_id.body_index.cmp(&rb.content_id.body_index))
            .then_with(|| ra.content_id.uri_index.cmp(&rb.content_id.uri_index))
    });

    debug!(
        priority,
        merged = merged.len(),
        warnings = warnings.len(),
        "merged batch responses"
    );
    Ok((merged.into_iter().map(|(_, r)| r).collect(), warnings))
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Header names lower-cased
fn header_map(entry: &Value) -> Map<String, Value> {
    entry
        .get("headers")
        .and_then(Value::as_object)
        .map(|h| {
            h.iter()
                .map(|(k, v)| (k.to_ascii_lowercase(), v.clone()))
                .collect()
        })
        .unwrap_or_default()
}

/// Header values may be a string, a number or a list of either
fn header_value(headers: &Map<String, Value>, name: &str) -> Option<String> {
    let value = match headers.get(name)? {
        Value::Array(items) => items.first()?.clone(),
        other => other.clone(),
    };
    match value {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn status_of(entry: &Value, headers: &Map<String, Value>) -> Result<u16, ResponseError> {
    let raw = match entry.get("status") {
        Some(Value::Number(n)) => Some(n.to_string()),
        Some(Value::String(s)) => Some(s.clone()),
        _ => header_value(headers, "status"),
    };
    match raw {
        None => Ok(200),
        Some(s) => s
            .trim()
            .parse()
            .map_err(|_| ResponseError::InvalidPayload(format!("invalid status '{}'", s))),
    }
}

fn body_of(entry: &Value) -> Option<Value> {
    match entry.get("body")? {
        Value::Null => None,
        Value::String(s) if s.trim().is_empty() => None,
        Value::String(s) => Some(serde_json::from_str(s).unwrap_or_else(|_| Value::String(s.clone()))),
        other => Some(other.clone()),
    }
}

//! Request ids, path-expression tokens and content ids
//!
//! These are the three strings the server protocol cares about. They are kept
//! structured until the moment they are written into a wire descriptor.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::ResponseError;

/// Globally unique id of a subrequest node.
///
/// Encodes lineage: root marker, enclosing field path, command keyword and
/// target resource, e.g. `$ROOT::$create:log--input.location::$find:asset--land`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(String);

impl RequestId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Prefix handed to sub-commands nested under `field`
    pub fn field_prefix(&self, field: &str) -> String {
        format!("{}.{}", self.0, field)
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RequestId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A value the server substitutes from another subresponse:
/// `{{<requestId>.body@$.<path>}}`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathToken {
    pub request_id: RequestId,
    /// JSONPath below `$.`, e.g. `data.id` or `data[*].id`
    pub path: String,
}

impl PathToken {
    pub fn new(request_id: RequestId, path: impl Into<String>) -> Self {
        Self {
            request_id,
            path: path.into(),
        }
    }

    /// Token for the id of a single resource (`data.id` / `data[0].id`)
    pub fn singular_id(request_id: RequestId, collection: bool) -> Self {
        let path = if collection { "data[0].id" } else { "data.id" };
        Self::new(request_id, path)
    }

    /// Token for every id of a response; `[*]` fans out on collections
    pub fn plural_id(request_id: RequestId, collection: bool) -> Self {
        let path = if collection { "data[*].id" } else { "data.id" };
        Self::new(request_id, path)
    }
}

impl fmt::Display for PathToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{{{{}.body@$.{}}}}}", self.request_id, self.path)
    }
}

/// Which blueprint field a wildcard expansion occurred in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WildcardField {
    Body,
    Uri,
}

/// Key the server uses to tag each subresponse:
/// `<requestId>(#body{<n>})?(#uri{<n>})?`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ContentId {
    pub request_id: RequestId,
    pub body_index: Option<usize>,
    pub uri_index: Option<usize>,
}

static CONTENT_ID_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^<?(?P<id>[^#<>]+)(?:#body\{(?P<body>\d+)\})?(?:#uri\{(?P<uri>\d+)\})?>?$")
        .expect("content id pattern is valid")
});

impl ContentId {
    pub fn plain(request_id: RequestId) -> Self {
        Self {
            request_id,
            body_index: None,
            uri_index: None,
        }
    }

    /// Parse a content id, tolerating the `<...>` wrapping used in headers
    pub fn parse(raw: &str) -> Result<Self, ResponseError> {
        let caps = CONTENT_ID_RE
            .captures(raw.trim())
            .ok_or_else(|| ResponseError::MalformedContentId(raw.to_string()))?;

        let index = |name: &str| -> Result<Option<usize>, ResponseError> {
            caps.name(name)
                .map(|m| {
                    m.as_str()
                        .parse::<usize>()
                        .map_err(|_| ResponseError::MalformedContentId(raw.to_string()))
                })
                .transpose()
        };

        Ok(Self {
            request_id: RequestId::new(&caps["id"]),
            body_index: index("body")?,
            uri_index: index("uri")?,
        })
    }

    /// True when the subresponse came from a wildcard expansion
    pub fn is_expanded(&self) -> bool {
        self.body_index.is_some() || self.uri_index.is_some()
    }

    /// The (field, occurrence) pairs recorded in the suffixes
    pub fn wildcards(&self) -> Vec<(WildcardField, usize)> {
        let mut out = Vec::new();
        if let Some(n) = self.body_index {
            out.push((WildcardField::Body, n));
        }
        if let Some(n) = self.uri_index {
            out.push((WildcardField::Uri, n));
        }
        out
    }
}

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.request_id)?;
        if let Some(n) = self.body_index {
            write!(f, "#body{{{}}}", n)?;
        }
        if let Some(n) = self.uri_index {
            write!(f, "#uri{{{}}}", n)?;
        }
        Ok(())
    }
}

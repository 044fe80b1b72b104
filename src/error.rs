//! Error handling for the subrequest engine
//!
//! Structural errors (bad command trees, cycles, priority inversions) are
//! raised before any network call. Transport failures abort the whole chain.
//! Everything else is a non-fatal [`Warning`] carried in the outcome.

use serde::Serialize;
use thiserror::Error;

use crate::token::RequestId;

/// Main error type for the engine
#[derive(Error, Debug)]
pub enum SubrequestError {
    #[error("Command error: {0}")]
    Command(#[from] CommandError),

    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    #[error("Batch {level} failed: {source}")]
    Transport {
        level: usize,
        #[source]
        source: TransportError,
    },

    #[error("Response error: {0}")]
    Response(#[from] ResponseError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, SubrequestError>;

/// Structural errors found while reading the command tree
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("Expected a command object at '{path}'")]
    NotAnObject { path: String },

    #[error("No command keyword found at '{path}'")]
    MissingCommand { path: String },

    #[error("Unknown keyword '{keyword}' at '{path}'")]
    UnknownKeyword { keyword: String, path: String },

    #[error("Conflicting commands '{first}' and '{second}' at '{path}'")]
    ConflictingCommands {
        first: String,
        second: String,
        path: String,
    },

    #[error("Invalid or missing resource type at '{path}': {reason}")]
    InvalidType { path: String, reason: String },

    #[error("Nested command under field '{field}' is not allowed inside $find at '{path}'")]
    NestedCommandInFind { field: String, path: String },

    #[error("Modifier '{modifier}' is not valid for '{command}' at '{path}'")]
    InvalidModifier {
        modifier: String,
        command: String,
        path: String,
    },

    #[error("Invalid filter at '{path}': {reason}")]
    InvalidFilter { path: String, reason: String },
}

/// Error when a cycle is detected between nodes of the same priority
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{explanation}")]
pub struct CycleError {
    /// Request ids involved in the cycle
    pub cycle: Vec<RequestId>,
    /// Human-readable explanation
    pub explanation: String,
}

/// Structural errors found while validating a node graph
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error(transparent)]
    Cycle(#[from] CycleError),

    #[error(
        "'{node}' (priority {node_priority}) depends on '{dependency}' with higher priority {dependency_priority}"
    )]
    PriorityInversion {
        node: RequestId,
        node_priority: usize,
        dependency: RequestId,
        dependency_priority: usize,
    },

    #[error("Request id '{0}' is used by more than one node")]
    DuplicateRequestId(RequestId),

    #[error("Plan refers to unknown request id '{0}'")]
    UnknownRequestId(RequestId),
}

/// Failure of the single physical call for a batch
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Subrequests endpoint returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Invalid subrequests response: {0}")]
    InvalidResponse(String),
}

/// Errors reading individual subresponses
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResponseError {
    #[error("Malformed content id '{0}'")]
    MalformedContentId(String),

    #[error("Invalid subresponse payload: {0}")]
    InvalidPayload(String),
}

/// Non-fatal conditions surfaced alongside the responses
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Warning {
    /// A dependency could not be resolved from any batch; the field was omitted
    UnresolvedField { node: RequestId, field: String },

    /// The schema does not classify the field as one-to-one or one-to-many
    UnknownRelation {
        node: RequestId,
        field: String,
        resource: String,
    },

    /// A subresponse carried an application-level error status
    SubresponseFailed {
        content_id: String,
        status: u16,
        detail: Option<String>,
    },

    /// A subresponse could not be traced back to a dispatched descriptor
    UnmatchedSubresponse { content_id: String },
}

impl std::fmt::Display for Warning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Warning::UnresolvedField { node, field } => {
                write!(f, "{}: could not resolve field '{}'", node, field)
            }
            Warning::UnknownRelation {
                node,
                field,
                resource,
            } => write!(
                f,
                "{}: '{}' is not a known relationship of {}",
                node, field, resource
            ),
            Warning::SubresponseFailed {
                content_id,
                status,
                detail,
            } => {
                write!(f, "{} returned {}", content_id, status)?;
                if let Some(detail) = detail {
                    write!(f, ": {}", detail)?;
                }
                Ok(())
            }
            Warning::UnmatchedSubresponse { content_id } => {
                write!(f, "{} does not match any dispatched subrequest", content_id)
            }
        }
    }
}

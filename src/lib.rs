//! JSON:API subrequests - batched create/find/update over one endpoint
//!
//! This crate compiles a nested command tree into a dependency graph and
//! sends it to a JSON:API backend as the fewest possible subrequest batches.
//!
//! ## Call Chain
//! Command tree -> Node graph -> Deduplicate -> Ordered batches ->
//! Materialize -> Transport -> Merged responses
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use jsonapi_subrequests::{load_schemata, SubrequestClient, SubrequestConfig};
//! use serde_json::json;
//!
//! # async fn run() -> anyhow::Result<()> {
//! let config = SubrequestConfig::from_env();
//! let client = SubrequestClient::connect(config, load_schemata("schemata.json")?)?;
//! let outcome = client
//!     .send(&json!({
//!         "$create": {
//!             "type": "log--input",
//!             "name": "Fertilize",
//!             "location": {
//!                 "$find": { "type": "asset--land", "name": "North field" },
//!                 "$createIfNotFound": true
//!             }
//!         }
//!     }))
//!     .await?;
//! println!("{} batches", outcome.batches_sent);
//! # Ok(())
//! # }
//! ```

// Core error handling
pub mod error;

// Configuration
pub mod config;

// Command tree and its vocabulary
pub mod command;
pub mod query;
pub mod resource;
pub mod token;

// Graph construction and validation
pub mod builder;
pub mod dag;
pub mod dedup;
pub mod node;

// Collaborators: entity model and field transforms
pub mod entity;
pub mod transform;

// Batch assembly and execution
pub mod descriptor;
pub mod materialize;
pub mod resolver;
pub mod response;
pub mod scheduler;
pub mod transport;

pub mod client;

// Public re-exports
pub use client::{SubrequestClient, SubrequestPlan};
pub use command::{parse_command, Command, CommandKind};
pub use config::SubrequestConfig;
pub use dag::{describe_plan, plan_batches, BatchPlan, PlannedBatch};
pub use descriptor::{Action, Subrequest};
pub use entity::{load_schemata, schemata_from_value, Entity, EntityModel, RelationKind, SchemaEntityModel, Schemata};
pub use error::{CommandError, CycleError, GraphError, ResponseError, SubrequestError, TransportError, Warning};
pub use node::{SubrequestGraph, SubrequestNode};
pub use resource::ResourceType;
pub use response::{ResponseSet, SubResponse};
pub use scheduler::SubrequestOutcome;
pub use token::{ContentId, PathToken, RequestId};
pub use transform::TransformTable;
pub use transport::{HttpTransport, Transport, TransportRequest};

//! Client façade: command tree in, merged responses out

use anyhow::Context;
use serde_json::Value;
use tracing::info;

use crate::builder::build_graph;
use crate::command::parse_command;
use crate::config::SubrequestConfig;
use crate::dag::{describe_plan, plan_batches, BatchPlan};
use crate::dedup::{deduplicate, Replacements};
use crate::entity::{EntityModel, SchemaEntityModel, Schemata};
use crate::error::{Result, SubrequestError};
use crate::materialize::Materializer;
use crate::node::SubrequestGraph;
use crate::scheduler::{Scheduler, SubrequestOutcome};
use crate::transform::TransformTable;
use crate::transport::{HttpTransport, Transport};

/// A validated graph and its batches, ready to send
#[derive(Debug, Clone)]
pub struct SubrequestPlan {
    pub graph: SubrequestGraph,
    /// Collapsed duplicates and their survivors
    pub replacements: Replacements,
    pub batches: BatchPlan,
}

impl SubrequestPlan {
    pub fn describe(&self) -> String {
        describe_plan(&self.graph, &self.batches)
    }
}

pub struct SubrequestClient<T: Transport> {
    config: SubrequestConfig,
    model: Box<dyn EntityModel>,
    transform: TransformTable,
    transport: T,
}

impl SubrequestClient<HttpTransport> {
    /// HTTP client for the configured host
    pub fn connect(config: SubrequestConfig, schemata: Schemata) -> anyhow::Result<Self> {
        config.subrequest_url()?;
        let transport = HttpTransport::new(&config).context("Failed to create HTTP client")?;
        Ok(Self::new(config, schemata, transport))
    }
}

impl<T: Transport> SubrequestClient<T> {
    pub fn new(config: SubrequestConfig, schemata: Schemata, transport: T) -> Self {
        let transform = TransformTable::from_schemata(&schemata);
        Self::with_model(config, SchemaEntityModel::new(schemata), transform, transport)
    }

    /// Use a custom entity model
    pub fn with_model(
        config: SubrequestConfig,
        model: impl EntityModel + 'static,
        transform: TransformTable,
        transport: T,
    ) -> Self {
        Self {
            config,
            model: Box::new(model),
            transform,
            transport,
        }
    }

    pub fn config(&self) -> &SubrequestConfig {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Parse, build, deduplicate and order; nothing is sent
    pub fn plan(&self, command: &Value) -> Result<SubrequestPlan> {
        let command = parse_command(command)?;
        let graph = build_graph(&command, &self.config.root_prefix)?;
        self.plan_graph(graph)
    }

    /// Deduplicate and order an already built graph
    pub fn plan_graph(&self, graph: SubrequestGraph) -> Result<SubrequestPlan> {
        let (graph, replacements) = deduplicate(graph)?;
        let batches = plan_batches(&graph)?;
        Ok(SubrequestPlan {
            graph,
            replacements,
            batches,
        })
    }

    /// Plan and execute a command tree, one physical call per batch
    pub async fn send(&self, command: &Value) -> Result<SubrequestOutcome> {
        let plan = self.plan(command)?;
        self.execute(&plan).await
    }

    pub async fn send_graph(&self, graph: SubrequestGraph) -> Result<SubrequestOutcome> {
        let plan = self.plan_graph(graph)?;
        self.execute(&plan).await
    }

    pub async fn execute(&self, plan: &SubrequestPlan) -> Result<SubrequestOutcome> {
        let url = self
            .config
            .subrequest_url()
            .map_err(|e| SubrequestError::Config(format!("{:#}", e)))?;
        info!(
            nodes = plan.graph.len(),
            batches = plan.batches.len(),
            collapsed = plan.replacements.len(),
            "sending command tree"
        );

        let materializer =
            Materializer::new(self.model.as_ref(), &self.transform, &self.config.api_prefix);
        let scheduler = Scheduler::new(&self.transport, materializer, url.as_str());
        let outcome = scheduler.run(&plan.graph, &plan.batches).await?;

        info!(
            batches_sent = outcome.batches_sent,
            responses = outcome.responses.len(),
            warnings = outcome.warnings.len(),
            "command tree complete"
        );
        Ok(outcome)
    }
}

//! Batch scheduling
//!
//! Walks the planned batches in priority order. Each batch is materialized
//! node by node in topological order, pruned of descriptors whose waits can
//! no longer be met, sent as one physical call and merged into the
//! accumulated responses that the next batch reads from.

use serde::Serialize;
use std::collections::HashSet;
use tracing::{debug, info};

use crate::dag::{BatchPlan, PlannedBatch};
use crate::descriptor::Subrequest;
use crate::error::{GraphError, SubrequestError, Warning};
use crate::materialize::Materializer;
use crate::node::SubrequestGraph;
use crate::resolver::{ReadyBatch, ReadyEntry};
use crate::response::{merge_batch, ResponseSet};
use crate::token::RequestId;
use crate::transport::{Transport, TransportRequest};

/// Result of a completed `send`
#[derive(Debug, Clone, Default, Serialize)]
pub struct SubrequestOutcome {
    pub responses: ResponseSet,
    pub warnings: Vec<Warning>,
    /// Physical calls made; fully pruned batches are not sent
    pub batches_sent: usize,
}

pub struct Scheduler<'a> {
    transport: &'a dyn Transport,
    materializer: Materializer<'a>,
    url: &'a str,
}

impl<'a> Scheduler<'a> {
    pub fn new(transport: &'a dyn Transport, materializer: Materializer<'a>, url: &'a str) -> Self {
        Self {
            transport,
            materializer,
            url,
        }
    }

    /// Run every batch of `plan`; a transport failure aborts the chain
    pub async fn run(
        &self,
        graph: &SubrequestGraph,
        plan: &BatchPlan,
    ) -> Result<SubrequestOutcome, SubrequestError> {
        let mut outcome = SubrequestOutcome::default();

        for batch in &plan.batches {
            let descriptors = self.assemble(graph, batch, &mut outcome)?;
            let descriptors = prune(descriptors);
            if descriptors.is_empty() {
                debug!(priority = batch.priority, "batch empty after pruning, not sent");
                continue;
            }

            info!(
                priority = batch.priority,
                subrequests = descriptors.len(),
                "dispatching batch"
            );
            let data = serde_json::to_value(&descriptors)?;
            let raw = self
                .transport
                .request(self.url, TransportRequest::post(data))
                .await
                .map_err(|source| SubrequestError::Transport {
                    level: batch.priority,
                    source,
                })?;
            outcome.batches_sent += 1;

            let (merged, warnings) = merge_batch(&raw, &descriptors, graph, batch.priority)?;
            info!(
                priority = batch.priority,
                responses = merged.len(),
                "merged batch"
            );
            outcome.responses.extend(merged);
            outcome.warnings.extend(warnings);
        }

        Ok(outcome)
    }

    /// Materialize one batch in its planned order
    fn assemble(
        &self,
        graph: &SubrequestGraph,
        batch: &PlannedBatch,
        outcome: &mut SubrequestOutcome,
    ) -> Result<Vec<Subrequest>, SubrequestError> {
        let mut ready = ReadyBatch::new();
        let mut descriptors = Vec::new();

        for id in &batch.order {
            let node = graph
                .get(id)
                .ok_or_else(|| GraphError::UnknownRequestId(id.clone()))?;
            let materialized = self
                .materializer
                .materialize(node, &ready, &outcome.responses)?;
            outcome.warnings.extend(materialized.warnings);

            let Some(primary) = materialized.descriptors.first() else {
                debug!(node = %id, "no-op node dropped from batch");
                continue;
            };
            ready.insert(
                id.clone(),
                ReadyEntry {
                    resource: node.resource.clone(),
                    action: primary.action,
                },
            );
            descriptors.extend(materialized.descriptors);
        }

        Ok(descriptors)
    }
}

/// Drop descriptors waiting on something absent from the batch, to a fixed point
pub fn prune(mut descriptors: Vec<Subrequest>) -> Vec<Subrequest> {
    loop {
        let present: HashSet<RequestId> =
            descriptors.iter().map(|d| d.request_id.clone()).collect();
        let before = descriptors.len();
        descriptors.retain(|d| {
            let keep = d.wait_for.iter().all(|w| present.contains(w));
            if !keep {
                debug!(request_id = %d.request_id, "pruned, waits on an absent subrequest");
            }
            keep
        });
        if descriptors.len() == before {
            return descriptors;
        }
    }
}

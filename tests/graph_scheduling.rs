//! Scheduling of hand-built graphs: same-batch dependencies, ordering, cycles

mod common;

use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use common::{client, schemata, MockBackend};
use jsonapi_subrequests::node::{Blueprint, ReadBlueprint, WriteBlueprint};
use jsonapi_subrequests::{
    Action, CommandKind, Entity, EntityModel, GraphError, RequestId, ResourceType,
    SchemaEntityModel, SubrequestClient, SubrequestConfig, SubrequestError, SubrequestGraph,
    SubrequestNode, TransformTable,
};

fn write(id: &str, resource: &str, priority: usize, deps: &[(&str, &[&str])]) -> SubrequestNode {
    let mut constants = Map::new();
    constants.insert("name".into(), json!(id));
    SubrequestNode {
        request_id: RequestId::from(id),
        resource: resource.parse().unwrap(),
        command: CommandKind::Create,
        priority,
        dependencies: deps
            .iter()
            .map(|(field, ids)| {
                (
                    field.to_string(),
                    ids.iter().map(|i| RequestId::from(*i)).collect(),
                )
            })
            .collect(),
        wait_for: vec![],
        blueprint: Blueprint::Write(WriteBlueprint {
            action: Action::Create,
            id: None,
            constants,
        }),
        fingerprint: None,
    }
}

fn read(id: &str, resource: &str) -> SubrequestNode {
    SubrequestNode {
        request_id: RequestId::from(id),
        resource: resource.parse().unwrap(),
        command: CommandKind::Find,
        priority: 0,
        dependencies: BTreeMap::new(),
        wait_for: vec![],
        blueprint: Blueprint::Read(ReadBlueprint {
            query: String::new(),
        }),
        fingerprint: None,
    }
}

#[tokio::test]
async fn test_plural_prior_and_same_batch_dependency() {
    let backend = MockBackend::new().with_find(
        "/api/asset/land",
        vec![json!({ "type": "asset--land", "id": "land-a" })],
    );
    let client = client(backend);
    let graph = SubrequestGraph::new(vec![
        read("land-prior", "asset--land"),
        write("log", "log--input", 1, &[("location", &["land-prior", "land-new"])]),
        write("land-new", "asset--land", 1, &[]),
    ])
    .unwrap();

    let outcome = client.send_graph(graph).await.unwrap();
    assert_eq!(outcome.batches_sent, 2);

    let batches = client.transport().batches();
    let second: Vec<&str> = batches[1].iter().map(|r| r.request_id.as_str()).collect();
    assert_eq!(second, vec!["land-new", "log", "log::$relate:location:0"]);

    let log = &batches[1][1];
    assert_eq!(
        log.relationship("location"),
        Some(&json!([{ "type": "asset--land", "id": "land-a" }]))
    );

    let link = &batches[1][2];
    assert_eq!(link.action, "create");
    assert_eq!(link.wait_for, vec!["land-new".to_string(), "log".to_string()]);
    assert_eq!(
        link.uri,
        format!("/api/log/input/{}/relationships/location", log.entity_id().unwrap())
    );
    assert_eq!(
        link.body,
        Some(json!({ "data": [{ "type": "asset--land", "id": "{{land-new.body@$.data.id}}" }] }))
    );
}

/// Records the order in which payloads are manufactured
struct RecordingModel {
    inner: SchemaEntityModel,
    order: Arc<Mutex<Vec<String>>>,
}

impl EntityModel for RecordingModel {
    fn schema(&self, resource: &ResourceType) -> Option<&Value> {
        self.inner.schema(resource)
    }

    fn create_entity(&self, resource: &ResourceType, props: &Map<String, Value>) -> Option<Entity> {
        let name = props["name"].as_str().unwrap_or_default().to_string();
        self.order.lock().unwrap().push(name);
        self.inner.create_entity(resource, props)
    }

    fn patch_entity(
        &self,
        resource: &ResourceType,
        id: &str,
        props: &Map<String, Value>,
    ) -> Option<Entity> {
        self.inner.patch_entity(resource, id, props)
    }
}

#[tokio::test]
async fn test_same_batch_dependencies_are_evaluated_first() {
    let order = Arc::new(Mutex::new(Vec::new()));
    let model = RecordingModel {
        inner: SchemaEntityModel::new(schemata()),
        order: order.clone(),
    };
    let client = SubrequestClient::with_model(
        SubrequestConfig::new("https://farm.example.com"),
        model,
        TransformTable::from_schemata(&schemata()),
        MockBackend::new(),
    );

    // Arena order is the reverse of what the dependencies require
    let graph = SubrequestGraph::new(vec![
        write("a", "log--input", 0, &[("owner", &["b"])]),
        write("b", "log--input", 0, &[("owner", &["c"])]),
        write("c", "asset--land", 0, &[]),
    ])
    .unwrap();

    let outcome = client.send_graph(graph).await.unwrap();
    assert_eq!(outcome.batches_sent, 1);
    assert_eq!(*order.lock().unwrap(), vec!["c", "b", "a"]);

    let batch = &client.transport().batches()[0];
    let ids: Vec<&str> = batch.iter().map(|r| r.request_id.as_str()).collect();
    assert_eq!(ids, vec!["c", "b", "a"]);

    assert_eq!(batch[1].wait_for, vec!["c".to_string()]);
    assert_eq!(
        batch[1].relationship("owner"),
        Some(&json!({ "type": "asset--land", "id": "{{c.body@$.data.id}}" }))
    );
    assert_eq!(batch[2].wait_for, vec!["b".to_string()]);
    assert_eq!(
        batch[2].relationship("owner"),
        Some(&json!({ "type": "log--input", "id": "{{b.body@$.data.id}}" }))
    );
}

#[tokio::test]
async fn test_cycle_is_rejected_before_any_call() {
    let client = client(MockBackend::new());
    let graph = SubrequestGraph::new(vec![
        write("a", "log--input", 1, &[("owner", &["b"])]),
        write("b", "log--input", 1, &[("owner", &["a"])]),
        read("c", "asset--land"),
    ])
    .unwrap();

    let err = client.send_graph(graph).await.unwrap_err();
    match err {
        SubrequestError::Graph(GraphError::Cycle(cycle)) => {
            assert_eq!(cycle.cycle, vec![RequestId::from("a"), RequestId::from("b")]);
        }
        other => panic!("expected a cycle, got {:?}", other),
    }
    assert_eq!(client.transport().calls(), 0);
}

#[tokio::test]
async fn test_pruning_cascades_within_a_batch() {
    // b waits on a node that produces nothing, c waits on b
    let mut b = write("b", "asset--land", 0, &[]);
    b.wait_for = vec![RequestId::from("noop")];
    let mut c = write("c", "asset--land", 0, &[]);
    c.wait_for = vec![RequestId::from("b")];

    let client = client(MockBackend::new());
    let graph = SubrequestGraph::new(vec![
        write("noop", "plan--crop", 0, &[]),
        b,
        c,
        write("d", "asset--land", 0, &[]),
    ])
    .unwrap();

    client.send_graph(graph).await.unwrap();
    let batch = &client.transport().batches()[0];
    let ids: Vec<&str> = batch.iter().map(|r| r.request_id.as_str()).collect();
    assert_eq!(ids, vec!["d"]);
}

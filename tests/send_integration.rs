//! End-to-end scheduling against a scripted subrequests backend

mod common;

use common::{client, MockBackend};
use jsonapi_subrequests::{SubrequestError, Warning};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};

const FIND: &str = "$ROOT::$create:log--input.location::$find:asset--land";
const CINF: &str = "$ROOT::$create:log--input.location::$createIfNotFound:asset--land";
const LOG: &str = "$ROOT::$create:log--input";

fn scenario() -> Value {
    json!({
        "$create": {
            "type": "log--input",
            "title": "x",
            "location": {
                "$find": { "type": "asset--land", "name": "y" },
                "$limit": 1,
                "$createIfNotFound": true
            }
        }
    })
}

#[tokio::test]
async fn test_empty_find_sends_three_batches() {
    let client = client(MockBackend::new());
    let outcome = client.send(&scenario()).await.unwrap();

    assert_eq!(outcome.batches_sent, 3);
    assert!(outcome.warnings.is_empty(), "{:?}", outcome.warnings);
    assert_eq!(outcome.responses.len(), 3);

    let batches = client.transport().batches();
    let ids: Vec<Vec<&str>> = batches
        .iter()
        .map(|b| b.iter().map(|r| r.request_id.as_str()).collect())
        .collect();
    assert_eq!(ids, vec![vec![FIND], vec![CINF], vec![LOG]]);

    let find = &batches[0][0];
    assert_eq!(find.action, "view");
    assert!(find.uri.starts_with("/api/asset/land?"));

    let cinf = &batches[1][0];
    assert_eq!(cinf.action, "create");
    assert_eq!(cinf.uri, "/api/asset/land");
    assert!(cinf.wait_for.is_empty());
    let cinf_body = cinf.body.as_ref().unwrap();
    assert_eq!(cinf_body["data"]["attributes"]["name"], json!("y"));
    assert_eq!(cinf_body["data"]["attributes"]["status"], json!("active"));

    let log = &batches[2][0];
    assert_eq!(log.uri, "/api/log/input");
    assert_eq!(log.body.as_ref().unwrap()["data"]["attributes"]["title"], json!("x"));
    assert_eq!(
        log.relationship("location"),
        Some(&json!([{ "type": "asset--land", "id": cinf.entity_id().unwrap() }]))
    );
}

#[tokio::test]
async fn test_matching_find_skips_fallback_batch() {
    let backend = MockBackend::new().with_find(
        "/api/asset/land",
        vec![json!({ "type": "asset--land", "id": "land-1", "attributes": { "name": "y" } })],
    );
    let client = client(backend);
    let outcome = client.send(&scenario()).await.unwrap();

    assert_eq!(outcome.batches_sent, 2);
    let batches = client.transport().batches();
    assert_eq!(batches.len(), 2);
    assert_eq!(batches[1].len(), 1);
    assert_eq!(batches[1][0].request_id, LOG);
    assert_eq!(
        batches[1][0].relationship("location"),
        Some(&json!([{ "type": "asset--land", "id": "land-1" }]))
    );
}

#[tokio::test]
async fn test_sibling_create_if_not_found_collapses() {
    let client = client(MockBackend::new());
    let command = json!({
        "$create": {
            "type": "log--activity",
            "name": "walk",
            "location": {
                "$find": { "type": "asset--land", "name": "field 1" },
                "$createIfNotFound": true
            },
            "asset": {
                "$find": { "type": "asset--land", "name": "field 1" },
                "$createIfNotFound": true
            }
        }
    });

    let plan = client.plan(&command).unwrap();
    assert_eq!(plan.replacements.len(), 1);
    let (duplicate, survivor) = plan.replacements.iter().next().unwrap();
    let (duplicate, survivor) = (duplicate.to_string(), survivor.to_string());

    let outcome = client.send(&command).await.unwrap();
    assert_eq!(outcome.batches_sent, 3);

    let batches = client.transport().batches();
    assert_eq!(batches[0].len(), 2);
    assert_eq!(batches[1].len(), 1);
    assert_eq!(batches[1][0].request_id, survivor);

    let created = batches[1][0].entity_id().unwrap().to_string();
    let expected = json!([{ "type": "asset--land", "id": created }]);
    let log = &batches[2][0];
    assert_eq!(log.relationship("location"), Some(&expected));
    assert_eq!(log.relationship("asset"), Some(&expected));

    for received in batches.iter().flatten() {
        assert_ne!(received.request_id, duplicate);
        assert!(!received.wait_for.contains(&duplicate));
        let body = received.body.as_ref().map(Value::to_string).unwrap_or_default();
        assert!(!body.contains(&duplicate));
    }
}

#[tokio::test]
async fn test_transport_failure_aborts_chain() {
    let client = client(MockBackend::new().failing_call(1));
    let err = client.send(&scenario()).await.unwrap_err();

    match err {
        SubrequestError::Transport { level, .. } => assert_eq!(level, 1),
        other => panic!("expected transport failure, got {:?}", other),
    }
    // The create batch is never attempted
    assert_eq!(client.transport().calls(), 2);
}

#[tokio::test]
async fn test_failed_subresponse_is_a_warning() {
    let client = client(MockBackend::new().rejecting(CINF));
    let outcome = client.send(&scenario()).await.unwrap();

    assert_eq!(outcome.batches_sent, 3);
    assert!(outcome.warnings.iter().any(|w| matches!(
        w,
        Warning::SubresponseFailed { status: 422, .. }
    )));
    assert!(outcome.warnings.iter().any(|w| matches!(
        w,
        Warning::UnresolvedField { field, .. } if field == "location"
    )));

    let batches = client.transport().batches();
    assert_eq!(batches[2][0].request_id, LOG);
    assert_eq!(batches[2][0].relationship("location"), None);
}

#[tokio::test]
async fn test_update_with_valid_id() {
    let client = client(MockBackend::new());
    let id = "3fa85f64-5717-4562-b3fc-2c963f66afa6";
    let outcome = client
        .send(&json!({
            "$update": { "type": "log--input", "id": id, "timestamp": 0 }
        }))
        .await
        .unwrap();
    assert_eq!(outcome.batches_sent, 1);

    let received = &client.transport().batches()[0][0];
    assert_eq!(received.action, "update");
    assert_eq!(received.uri, format!("/api/log/input/{}", id));
    assert_eq!(
        received.body,
        Some(json!({
            "data": {
                "type": "log--input",
                "id": id,
                "attributes": { "timestamp": "1970-01-01T00:00:00+00:00" }
            }
        }))
    );
}

#[tokio::test]
async fn test_update_without_id_creates() {
    let client = client(MockBackend::new());
    client
        .send(&json!({ "$update": { "type": "log--input", "name": "n" } }))
        .await
        .unwrap();

    let received = &client.transport().batches()[0][0];
    assert_eq!(received.request_id, "$ROOT::$update:log--input");
    assert_eq!(received.action, "create");
    assert_eq!(received.uri, "/api/log/input");
}

#[tokio::test]
async fn test_unknown_type_sends_nothing() {
    let client = client(MockBackend::new());
    let outcome = client
        .send(&json!({ "$create": { "type": "plan--crop", "name": "n" } }))
        .await
        .unwrap();
    assert_eq!(outcome.batches_sent, 0);
    assert_eq!(client.transport().calls(), 0);
}

#[tokio::test]
async fn test_malformed_command_fails_before_sending() {
    let client = client(MockBackend::new());
    let err = client
        .send(&json!({ "$create": { "type": "log--input" }, "$find": { "type": "asset--land" } }))
        .await
        .unwrap_err();
    assert!(matches!(err, SubrequestError::Command(_)));
    assert_eq!(client.transport().calls(), 0);
}

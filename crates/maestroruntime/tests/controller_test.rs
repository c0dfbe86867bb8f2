mod common;

use common::*;
use maestrocore::{EngineError, SerdeManifestValidator};
use maestroruntime::{Controller, WorkflowRunner};
use serde_json::json;
use std::sync::Arc;

fn controller() -> Controller {
    Controller::new(Arc::new(SerdeManifestValidator))
}

fn chain_manifest() -> serde_json::Value {
    json!({
        "id": "chain",
        "version": "1.0.0",
        "name": "Chain",
        "graph": {
            "nodes": [
                {"type": "logic", "node_id": "a", "code": "echo"},
                {"type": "logic", "node_id": "b", "code": "echo"},
                {"type": "logic", "node_id": "c", "code": "echo"}
            ],
            "edges": [
                {"source_node_id": "a", "target_node_id": "b"},
                {"source_node_id": "b", "target_node_id": "c"}
            ]
        }
    })
}

#[tokio::test]
async fn executes_a_manifest_end_to_end() {
    let stream = controller()
        .execute_recipe(&chain_manifest(), json!({"seed": 7}), echo_context(), None)
        .unwrap();
    let events = collect(stream).await;

    assert_sequence_strictly_increasing(&events);
    assert_eq!(
        events.iter().filter(|e| e.event_type() == "NODE_DONE").count(),
        3
    );
    let output = done_output(&events, "a").unwrap();
    assert_eq!(output[maestrocore::GLOBAL_INPUTS_KEY]["seed"], 7);
}

#[tokio::test]
async fn invalid_manifest_fails_before_any_event() {
    let manifest = json!({"id": "broken", "version": "1.0.0"});
    let err = controller()
        .execute_recipe(&manifest, json!({}), echo_context(), None)
        .unwrap_err();
    assert!(matches!(err, EngineError::ManifestInvalid(_)));
}

#[tokio::test]
async fn unknown_node_kind_fails_synchronously() {
    let mut manifest = chain_manifest();
    manifest["graph"]["nodes"][1]["type"] = json!("oracle");
    let err = controller()
        .execute_recipe(&manifest, json!({}), echo_context(), None)
        .unwrap_err();
    match err {
        EngineError::UnknownNodeKind(kind) => assert_eq!(kind, "oracle"),
        other => panic!("expected UnknownNodeKind, got {other:?}"),
    }
}

#[tokio::test]
async fn cyclic_manifest_fails_synchronously() {
    let mut manifest = chain_manifest();
    manifest["graph"]["edges"]
        .as_array_mut()
        .unwrap()
        .push(json!({"source_node_id": "c", "target_node_id": "a"}));
    let err = controller()
        .execute_recipe(&manifest, json!({}), echo_context(), None)
        .unwrap_err();
    assert!(matches!(err, EngineError::CyclicDependency));
}

#[tokio::test]
async fn each_invocation_gets_a_fresh_isolated_run() {
    let controller = controller();

    let first = collect(
        controller
            .execute_recipe(&chain_manifest(), json!({}), echo_context(), None)
            .unwrap(),
    )
    .await;
    let second = collect(
        controller
            .execute_recipe(&chain_manifest(), json!({}), echo_context(), None)
            .unwrap(),
    )
    .await;

    // Separate runs: distinct run ids, sequence counters both start at 1.
    assert_ne!(first[0].run_id, second[0].run_id);
    assert_eq!(first[0].sequence_id, 1);
    assert_eq!(second[0].sequence_id, 1);
    assert_eq!(first.len(), second.len());
}

#[tokio::test]
async fn custom_runner_factory_is_used() {
    let controller = Controller::with_runner_factory(Arc::new(SerdeManifestValidator), || {
        WorkflowRunner::with_event_capacity(2)
    });
    let events = collect(
        controller
            .execute_recipe(&chain_manifest(), json!({}), echo_context(), None)
            .unwrap(),
    )
    .await;
    assert_eq!(
        events.iter().filter(|e| e.event_type() == "NODE_DONE").count(),
        3
    );
}

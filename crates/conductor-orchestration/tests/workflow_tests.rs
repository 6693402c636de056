//! Integration tests for the workflow graph engine

use conductor_bus::MessageBus;
use conductor_orchestration::EventPublisher;
use conductor_orchestration::workflow::{
    AgentNodeConfig, CheckpointNodeConfig, CheckpointStore, FileCheckpointStore, Node, NodeOutcome,
    RunStatus, WorkflowBuilder, WorkflowDefinition, WorkflowEngine, WorkflowGraph,
};
use conductor_testing::{CollectingHandler, MockAgent, registry_with, shared};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;

fn research_pipeline(manual_approval: bool) -> WorkflowGraph {
    let checkpoint = if manual_approval {
        CheckpointNodeConfig::named("after_research").manual_approval()
    } else {
        CheckpointNodeConfig::named("after_research")
    };

    WorkflowBuilder::new("research_pipeline")
        .node(Node::start("start"))
        .node(Node::agent(
            "research",
            AgentNodeConfig::new("researcher").output_key("research_data"),
        ))
        .node(Node::checkpoint("checkpoint", checkpoint))
        .node(Node::agent(
            "write",
            AgentNodeConfig::new("writer")
                .input_template("{research_data}")
                .output_key("draft"),
        ))
        .node(Node::end("end"))
        .always("start", "research")
        .on_success("research", "checkpoint")
        .always("checkpoint", "write")
        .on_success("write", "end")
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_research_then_write_pipeline() {
    let writer = MockAgent::new("writer");
    let registry = registry_with(vec![
        ("researcher", shared(MockAgent::new("researcher").with_default_response("data"))),
        ("writer", shared(writer.clone())),
    ]);
    let engine = WorkflowEngine::new(research_pipeline(false), registry);

    let state = engine.execute("quantum computing", HashMap::new()).await.unwrap();

    assert_eq!(state.status, RunStatus::Completed);
    assert_eq!(state.get("research_data"), Some(&json!("data")));
    assert_eq!(state.get("draft"), Some(&json!("writer response for: data")));
    assert_eq!(
        state.visited_nodes(),
        vec!["start", "research", "checkpoint", "write", "end"]
    );
    assert_eq!(writer.call_history(), vec!["data"]);

    let snapshot = state.checkpoint("after_research").unwrap();
    assert_eq!(snapshot.checkpoint_id, "checkpoint");
    assert_eq!(snapshot.variables["research_data"], "data");
    assert!(!snapshot.variables.contains_key("draft"));
}

#[tokio::test]
async fn test_same_input_same_visit_sequence() {
    let registry = registry_with(vec![
        ("researcher", shared(MockAgent::new("researcher").with_default_response("data"))),
        ("writer", shared(MockAgent::new("writer"))),
    ]);
    let engine = WorkflowEngine::new(research_pipeline(false), registry);

    let first = engine.execute("x", HashMap::new()).await.unwrap();
    let second = engine.execute("x", HashMap::new()).await.unwrap();

    assert_ne!(first.run_id, second.run_id);
    assert_eq!(first.visited_nodes(), second.visited_nodes());
    assert_eq!(first.variables, second.variables);
}

#[tokio::test]
async fn test_resume_uses_snapshot_variables() {
    let writer = MockAgent::new("writer");
    let registry = registry_with(vec![
        ("researcher", shared(MockAgent::new("researcher").with_default_response("data"))),
        ("writer", shared(writer.clone())),
    ]);
    let engine = WorkflowEngine::new(research_pipeline(true), registry);

    let mut state = engine.execute("x", HashMap::new()).await.unwrap();
    assert_eq!(state.status, RunStatus::Paused);
    assert_eq!(state.paused_at.as_deref(), Some("checkpoint"));
    assert_eq!(state.history.last().unwrap().outcome, NodeOutcome::Paused);
    assert_eq!(writer.call_count(), 0);

    // Changes made while paused do not survive resumption.
    state.set("research_data", "tampered");

    engine.approve(&mut state, "checkpoint").unwrap();
    let state = engine.resume(state, "checkpoint").await.unwrap();

    assert_eq!(state.status, RunStatus::Completed);
    assert_eq!(writer.call_history(), vec!["data"]);
    assert_eq!(
        state.visited_nodes(),
        vec!["start", "research", "checkpoint", "write", "end"]
    );
}

#[tokio::test]
async fn test_paused_state_survives_serialization() {
    let registry = registry_with(vec![
        ("researcher", shared(MockAgent::new("researcher").with_default_response("data"))),
        ("writer", shared(MockAgent::new("writer"))),
    ]);
    let engine = WorkflowEngine::new(research_pipeline(true), registry);

    let state = engine.execute("x", HashMap::new()).await.unwrap();
    let json = state.to_json().unwrap();

    let mut restored = conductor_orchestration::WorkflowState::from_json(&json).unwrap();
    engine.approve(&mut restored, "checkpoint").unwrap();
    let finished = engine.resume(restored, "checkpoint").await.unwrap();
    assert_eq!(finished.run_id, state.run_id);
    assert_eq!(finished.status, RunStatus::Completed);
}

#[tokio::test]
async fn test_resume_from_file_store() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(FileCheckpointStore::new(dir.path()).unwrap());
    let registry = registry_with(vec![
        ("researcher", shared(MockAgent::new("researcher").with_default_response("data"))),
        ("writer", shared(MockAgent::new("writer").with_default_response("article"))),
    ]);
    let engine = WorkflowEngine::new(research_pipeline(true), registry).with_store(store.clone());

    let paused = engine.execute("x", HashMap::new()).await.unwrap();
    let run_id = paused.run_id.clone();
    drop(paused);

    let err = engine.resume_from_store(&run_id, "checkpoint").await.unwrap_err();
    assert_eq!(err.error_code(), "NOT_RESUMABLE");

    engine.approve_stored(&run_id, "checkpoint").await.unwrap();
    let state = engine.resume_from_store(&run_id, "checkpoint").await.unwrap();
    assert_eq!(state.get("draft"), Some(&json!("article")));

    let stored = store.load(&run_id).await.unwrap().unwrap();
    assert_eq!(stored.status, RunStatus::Completed);
}

#[tokio::test]
async fn test_definition_from_configuration() {
    let definition: WorkflowDefinition = serde_json::from_value(json!({
        "name": "triage",
        "nodes": [
            {"id": "start", "type": "start"},
            {"id": "classify", "type": "agent", "agent_id": "classifier", "output_key": "label"},
            {"id": "page", "type": "agent", "agent_id": "pager", "input_template": "URGENT: {input}",
             "output_key": "paged"},
            {"id": "end", "type": "end"}
        ],
        "edges": [
            {"from": "start", "to": "classify", "condition": "always"},
            {"from": "classify", "to": "page",
             "condition": {"conditional": {"kind": "compare", "path": "label", "op": "eq", "value": "urgent"}}},
            {"from": "classify", "to": "end", "condition": "always"},
            {"from": "page", "to": "end", "condition": "always"}
        ]
    }))
    .unwrap();

    let pager = MockAgent::new("pager");
    let registry = registry_with(vec![
        ("classifier", shared(MockAgent::new("classifier").with_default_response("urgent"))),
        ("pager", shared(pager.clone())),
    ]);
    let engine = WorkflowEngine::new(definition.build().unwrap(), registry);

    let state = engine.execute("disk full", HashMap::new()).await.unwrap();
    assert_eq!(state.visited_nodes(), vec!["start", "classify", "page", "end"]);
    assert_eq!(pager.call_history(), vec!["URGENT: disk full"]);
}

#[tokio::test]
async fn test_lifecycle_events_published() {
    let bus = MessageBus::with_defaults();
    let events = CollectingHandler::new();
    bus.subscribe("workflow.#", "observer", Arc::new(events.clone()))
        .await
        .unwrap();

    let registry = registry_with(vec![
        ("researcher", shared(MockAgent::new("researcher"))),
        ("writer", shared(MockAgent::new("writer"))),
    ]);
    let engine = WorkflowEngine::new(research_pipeline(true), registry)
        .with_events(EventPublisher::new(bus.clone(), "research_pipeline"));

    let mut state = engine.execute("x", HashMap::new()).await.unwrap();
    engine.approve(&mut state, "checkpoint").unwrap();
    engine.resume(state, "checkpoint").await.unwrap();
    bus.dispatch_pending().await;

    assert_eq!(
        events.topics(),
        vec![
            "workflow.started",
            "workflow.node.completed",
            "workflow.node.completed",
            "workflow.paused",
            "workflow.resumed",
            "workflow.node.completed",
            "workflow.node.completed",
            "workflow.completed",
        ]
    );
    assert!(events.messages().iter().all(|m| m.sender == "research_pipeline"));
}

//! End-to-end scenarios through the definition and execution services
//! backed by the in-memory stores.

use std::sync::Arc;

use docflow_core::domain::repository::memory::{
    MemoryApprovalRepository, MemoryAuditLog, MemoryDefinitionRepository, MemoryInstanceRepository,
};
use docflow_core::domain::repository::AuditLog;
use docflow_core::{
    ActorId, DataMap, DefinitionService, DocumentId, EngineError, ExecutionService, InstanceState,
    NodeConfig, NodeDefinition, TracingNotifier, WorkflowGraph,
};
use serde_json::json;
use std::time::Duration;

struct Harness {
    audit: Arc<MemoryAuditLog>,
    definitions: DefinitionService,
    execution: Arc<ExecutionService>,
}

fn harness() -> Harness {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let definition_repo = Arc::new(MemoryDefinitionRepository::new());
    let instance_repo = Arc::new(MemoryInstanceRepository::new());
    let approval_repo = Arc::new(MemoryApprovalRepository::new());
    let audit = Arc::new(MemoryAuditLog::new());

    Harness {
        audit: audit.clone(),
        definitions: DefinitionService::new(definition_repo.clone(), audit.clone()),
        execution: Arc::new(ExecutionService::new(
            definition_repo,
            instance_repo,
            approval_repo,
            audit,
            Arc::new(TracingNotifier),
        )),
    }
}

fn approval_graph(approver: ActorId) -> WorkflowGraph {
    WorkflowGraph::new(vec![
        NodeDefinition::new("start", NodeConfig::Start {}).with_edge("review", None),
        NodeDefinition::new("review", NodeConfig::Approval {
            approver_id: approver,
        })
        .with_edge("done", None),
        NodeDefinition::new("done", NodeConfig::End {}),
    ])
}

fn path(instance: &docflow_core::WorkflowInstance) -> Vec<&str> {
    instance
        .history
        .iter()
        .map(|h| h.node_id.0.as_str())
        .collect()
}

#[tokio::test]
async fn single_approval_cycle_completes_with_three_history_entries() {
    let h = harness();
    let def = h
        .definitions
        .create_definition("Expense", None, "finance", approval_graph(ActorId(42)), ActorId(1))
        .await
        .unwrap();

    let instance_id = h
        .execution
        .start_instance(&def.id, DocumentId(7), ActorId(1), DataMap::new())
        .await
        .unwrap();

    // Parked on the gate
    let parked = h.execution.get_instance(&instance_id).await.unwrap();
    assert_eq!(parked.state, InstanceState::InProgress);
    assert_eq!(parked.current_node.0, "review");
    assert_eq!(path(&parked), vec!["start", "review"]);

    let pending = h.execution.get_pending_approvals(ActorId(42)).await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].approval.instance_id, instance_id);
    assert_eq!(pending[0].workflow_id, def.id);
    assert_eq!(pending[0].document_id, DocumentId(7));

    h.execution
        .approve(&instance_id, ActorId(42), Some("looks fine".to_string()))
        .await
        .unwrap();

    let done = h.execution.get_instance(&instance_id).await.unwrap();
    assert_eq!(done.state, InstanceState::Completed);
    assert!(done.completed_at.is_some());
    assert_eq!(path(&done), vec!["start", "review", "done"]);

    // The gate no longer lists anything pending
    assert!(h
        .execution
        .get_pending_approvals(ActorId(42))
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn pending_approvals_list_newest_instance_first() {
    let h = harness();
    let def = h
        .definitions
        .create_definition("Expense", None, "finance", approval_graph(ActorId(42)), ActorId(1))
        .await
        .unwrap();

    let older = h
        .execution
        .start_instance(&def.id, DocumentId(1), ActorId(1), DataMap::new())
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    let newer = h
        .execution
        .start_instance(&def.id, DocumentId(2), ActorId(1), DataMap::new())
        .await
        .unwrap();

    let pending = h.execution.get_pending_approvals(ActorId(42)).await.unwrap();
    assert_eq!(pending.len(), 2);
    assert_eq!(
        pending[0].approval.instance_id, newer,
        "most recently started instance comes first"
    );
    assert_eq!(pending[1].approval.instance_id, older);
    assert!(pending[0].started_at > pending[1].started_at);

    // Each row carries what the approvals list renders
    assert_eq!(pending[0].workflow_id, def.id);
    assert_eq!(pending[0].document_id, DocumentId(2));
    assert_eq!(pending[1].document_id, DocumentId(1));
    assert!(pending.iter().all(|p| p.approval.is_pending()));
}

#[tokio::test]
async fn chain_without_gates_runs_to_completion_in_one_call() {
    let h = harness();
    let graph = WorkflowGraph::new(vec![
        NodeDefinition::new("start", NodeConfig::Start {}).with_edge("assign", None),
        NodeDefinition::new("assign", NodeConfig::Assign {
            assignee_id: ActorId(5),
        })
        .with_edge("notify", None),
        NodeDefinition::new("notify", NodeConfig::Notify {
            recipients: vec![ActorId(5), ActorId(6)],
            message: "document routed".to_string(),
        })
        .with_edge("done", None),
        NodeDefinition::new("done", NodeConfig::End {}),
    ]);
    let def = h
        .definitions
        .create_definition("Routing", None, "ops", graph, ActorId(1))
        .await
        .unwrap();

    let instance_id = h
        .execution
        .start_instance(&def.id, DocumentId(9), ActorId(1), DataMap::new())
        .await
        .unwrap();

    let done = h.execution.get_instance(&instance_id).await.unwrap();
    assert_eq!(done.state, InstanceState::Completed);
    assert_eq!(path(&done), vec!["start", "assign", "notify", "done"]);
}

#[tokio::test]
async fn rejection_is_terminal_and_immutable() {
    let h = harness();
    let def = h
        .definitions
        .create_definition("Expense", None, "finance", approval_graph(ActorId(42)), ActorId(1))
        .await
        .unwrap();
    let instance_id = h
        .execution
        .start_instance(&def.id, DocumentId(7), ActorId(1), DataMap::new())
        .await
        .unwrap();

    h.execution
        .reject(&instance_id, ActorId(42), Some("missing receipt".to_string()))
        .await
        .unwrap();

    let rejected = h.execution.get_instance(&instance_id).await.unwrap();
    assert_eq!(rejected.state, InstanceState::Rejected);
    assert!(rejected.completed_at.is_some());
    assert_eq!(path(&rejected), vec!["start", "review"]);

    // Second rejection fails, as does a late approval
    assert!(matches!(
        h.execution.reject(&instance_id, ActorId(42), None).await,
        Err(EngineError::InvalidStateTransition(_))
    ));
    assert!(matches!(
        h.execution.approve(&instance_id, ActorId(42), None).await,
        Err(EngineError::InvalidStateTransition(_))
    ));

    // Nothing moved
    let after = h.execution.get_instance(&instance_id).await.unwrap();
    assert_eq!(after.state, rejected.state);
    assert_eq!(after.history.len(), rejected.history.len());
    assert_eq!(after.completed_at, rejected.completed_at);
}

#[tokio::test]
async fn wrong_approver_gets_not_found() {
    let h = harness();
    let def = h
        .definitions
        .create_definition("Expense", None, "finance", approval_graph(ActorId(42)), ActorId(1))
        .await
        .unwrap();
    let instance_id = h
        .execution
        .start_instance(&def.id, DocumentId(7), ActorId(1), DataMap::new())
        .await
        .unwrap();

    assert!(matches!(
        h.execution.approve(&instance_id, ActorId(99), None).await,
        Err(EngineError::ApprovalNotFound(_))
    ));

    // The real approver can still decide afterwards
    h.execution
        .approve(&instance_id, ActorId(42), None)
        .await
        .unwrap();
}

#[tokio::test]
async fn first_matching_edge_wins_in_list_order() {
    let h = harness();
    let graph = WorkflowGraph::new(vec![
        NodeDefinition::new("start", NodeConfig::Start {}).with_edge("triage", None),
        NodeDefinition::new("triage", NodeConfig::Condition {})
            .with_edge("review", Some("amount > 1000"))
            .with_edge("fast_track", Some("amount > 100"))
            .with_edge("auto_done", None),
        NodeDefinition::new("review", NodeConfig::Approval {
            approver_id: ActorId(42),
        })
        .with_edge("done", None),
        NodeDefinition::new("fast_track", NodeConfig::Notify {
            recipients: vec![ActorId(42)],
            message: "fast tracked".to_string(),
        })
        .with_edge("done", None),
        NodeDefinition::new("auto_done", NodeConfig::End {}),
        NodeDefinition::new("done", NodeConfig::End {}),
    ]);
    let def = h
        .definitions
        .create_definition("Triage", None, "finance", graph, ActorId(1))
        .await
        .unwrap();

    // Both conditions true; the first listed edge is taken
    let mut big = DataMap::new();
    big.insert("amount", json!(5000));
    let over = h
        .execution
        .start_instance(&def.id, DocumentId(1), ActorId(1), big)
        .await
        .unwrap();
    let parked = h.execution.get_instance(&over).await.unwrap();
    assert_eq!(parked.current_node.0, "review");

    // Only the second condition matches
    let mut mid = DataMap::new();
    mid.insert("amount", json!(500));
    let middle = h
        .execution
        .start_instance(&def.id, DocumentId(2), ActorId(1), mid)
        .await
        .unwrap();
    let fast = h.execution.get_instance(&middle).await.unwrap();
    assert_eq!(fast.state, InstanceState::Completed);
    assert_eq!(path(&fast), vec!["start", "triage", "fast_track", "done"]);

    // Neither matches; the default edge catches it
    let mut small = DataMap::new();
    small.insert("amount", json!(10));
    let tiny = h
        .execution
        .start_instance(&def.id, DocumentId(3), ActorId(1), small)
        .await
        .unwrap();
    let auto = h.execution.get_instance(&tiny).await.unwrap();
    assert_eq!(path(&auto), vec!["start", "triage", "auto_done"]);
}

#[tokio::test]
async fn condition_fault_fails_closed_onto_default_edge() {
    let h = harness();
    let graph = WorkflowGraph::new(vec![
        NodeDefinition::new("start", NodeConfig::Start {}).with_edge("triage", None),
        NodeDefinition::new("triage", NodeConfig::Condition {})
            .with_edge("review", Some("amount > 1000"))
            .with_edge("auto_done", None),
        NodeDefinition::new("review", NodeConfig::Approval {
            approver_id: ActorId(42),
        })
        .with_edge("done", None),
        NodeDefinition::new("auto_done", NodeConfig::End {}),
        NodeDefinition::new("done", NodeConfig::End {}),
    ]);
    let def = h
        .definitions
        .create_definition("Triage", None, "finance", graph, ActorId(1))
        .await
        .unwrap();

    // No "amount" key: the condition faults, the edge does not match,
    // and the default edge is taken instead of the gate
    let instance_id = h
        .execution
        .start_instance(&def.id, DocumentId(4), ActorId(1), DataMap::new())
        .await
        .unwrap();

    let done = h.execution.get_instance(&instance_id).await.unwrap();
    assert_eq!(done.state, InstanceState::Completed);
    assert_eq!(path(&done), vec!["start", "triage", "auto_done"]);

    let entries = h
        .audit
        .entries_for("instance", &instance_id.to_string())
        .await
        .unwrap();
    assert!(entries.iter().any(|e| e.action == "condition_fault"));
}

#[tokio::test]
async fn unmatched_edges_stall_without_crashing() {
    let h = harness();
    let graph = WorkflowGraph::new(vec![
        NodeDefinition::new("start", NodeConfig::Start {}).with_edge("triage", None),
        NodeDefinition::new("triage", NodeConfig::Condition {})
            .with_edge("done", Some("amount > 1000")),
        NodeDefinition::new("done", NodeConfig::End {}),
    ]);
    let def = h
        .definitions
        .create_definition("Strict", None, "finance", graph, ActorId(1))
        .await
        .unwrap();

    let mut data = DataMap::new();
    data.insert("amount", json!(10));
    let instance_id = h
        .execution
        .start_instance(&def.id, DocumentId(5), ActorId(1), data)
        .await
        .unwrap();

    let stalled = h.execution.get_instance(&instance_id).await.unwrap();
    assert_eq!(stalled.state, InstanceState::InProgress);
    assert_eq!(stalled.current_node.0, "triage");

    let entries = h
        .audit
        .entries_for("instance", &instance_id.to_string())
        .await
        .unwrap();
    assert!(entries.iter().any(|e| e.action == "instance_stalled"));
}

#[tokio::test]
async fn concurrent_decisions_have_exactly_one_winner() {
    let h = harness();
    let def = h
        .definitions
        .create_definition("Expense", None, "finance", approval_graph(ActorId(42)), ActorId(1))
        .await
        .unwrap();
    let instance_id = h
        .execution
        .start_instance(&def.id, DocumentId(7), ActorId(1), DataMap::new())
        .await
        .unwrap();

    let approve = {
        let execution = h.execution.clone();
        let id = instance_id.clone();
        tokio::spawn(async move { execution.approve(&id, ActorId(42), None).await })
    };
    let reject = {
        let execution = h.execution.clone();
        let id = instance_id.clone();
        tokio::spawn(async move { execution.reject(&id, ActorId(42), None).await })
    };

    let outcomes = [approve.await.unwrap(), reject.await.unwrap()];
    let winners = outcomes.iter().filter(|o| o.is_ok()).count();
    assert_eq!(winners, 1, "outcomes: {:?}", outcomes);

    // The instance landed in exactly one of the two decision outcomes
    let settled = h.execution.get_instance(&instance_id).await.unwrap();
    assert!(
        settled.state == InstanceState::Completed || settled.state == InstanceState::Rejected,
        "state: {:?}",
        settled.state
    );
}

#[tokio::test]
async fn cancelled_instance_refuses_decisions() {
    let h = harness();
    let def = h
        .definitions
        .create_definition("Expense", None, "finance", approval_graph(ActorId(42)), ActorId(1))
        .await
        .unwrap();
    let instance_id = h
        .execution
        .start_instance(&def.id, DocumentId(7), ActorId(1), DataMap::new())
        .await
        .unwrap();

    h.execution
        .cancel_instance(&instance_id, ActorId(1))
        .await
        .unwrap();

    let cancelled = h.execution.get_instance(&instance_id).await.unwrap();
    assert_eq!(cancelled.state, InstanceState::Cancelled);
    assert!(cancelled.completed_at.is_some());

    assert!(matches!(
        h.execution.approve(&instance_id, ActorId(42), None).await,
        Err(EngineError::InvalidStateTransition(_))
    ));
}

#[tokio::test]
async fn running_instance_stays_on_its_definition_version() {
    let h = harness();
    let def = h
        .definitions
        .create_definition("Expense", None, "finance", approval_graph(ActorId(42)), ActorId(1))
        .await
        .unwrap();
    let instance_id = h
        .execution
        .start_instance(&def.id, DocumentId(7), ActorId(1), DataMap::new())
        .await
        .unwrap();

    // Revision hands the gate to a different approver
    h.definitions
        .revise_definition(&def.id, approval_graph(ActorId(99)), ActorId(1))
        .await
        .unwrap();

    // The in-flight instance still answers to the original approver
    let running = h.execution.get_instance(&instance_id).await.unwrap();
    assert_eq!(running.definition_version, 1);
    h.execution
        .approve(&instance_id, ActorId(42), None)
        .await
        .unwrap();

    // A fresh instance picks up the revision
    let fresh = h
        .execution
        .start_instance(&def.id, DocumentId(8), ActorId(1), DataMap::new())
        .await
        .unwrap();
    let gated = h.execution.get_instance(&fresh).await.unwrap();
    assert_eq!(gated.definition_version, 2);
    assert!(matches!(
        h.execution.approve(&fresh, ActorId(42), None).await,
        Err(EngineError::ApprovalNotFound(_))
    ));
    h.execution.approve(&fresh, ActorId(99), None).await.unwrap();
}

#[tokio::test]
async fn start_against_unknown_workflow_fails() {
    let h = harness();
    let missing = docflow_core::WorkflowId("nope".to_string());

    assert!(matches!(
        h.execution
            .start_instance(&missing, DocumentId(1), ActorId(1), DataMap::new())
            .await,
        Err(EngineError::DefinitionNotFound(_))
    ));
}

#[tokio::test]
async fn revisiting_a_gate_opens_a_fresh_approval_record() {
    let h = harness();
    // Legal cycle: the gate routes back through a notify node when the
    // payload asks for another pass
    let graph = WorkflowGraph::new(vec![
        NodeDefinition::new("start", NodeConfig::Start {}).with_edge("review", None),
        NodeDefinition::new("review", NodeConfig::Approval {
            approver_id: ActorId(42),
        })
        .with_edge("rework", Some("needs_rework == true"))
        .with_edge("done", None),
        NodeDefinition::new("rework", NodeConfig::Notify {
            recipients: vec![ActorId(1)],
            message: "sent back".to_string(),
        })
        .with_edge("review", None),
        NodeDefinition::new("done", NodeConfig::End {}),
    ]);
    let def = h
        .definitions
        .create_definition("Rework loop", None, "finance", graph, ActorId(1))
        .await
        .unwrap();

    let mut data = DataMap::new();
    data.insert("needs_rework", json!(true));
    let instance_id = h
        .execution
        .start_instance(&def.id, DocumentId(7), ActorId(1), data)
        .await
        .unwrap();

    // First approval loops back to the gate and opens a second record
    h.execution
        .approve(&instance_id, ActorId(42), None)
        .await
        .unwrap();
    let looped = h.execution.get_instance(&instance_id).await.unwrap();
    assert_eq!(looped.current_node.0, "review");
    assert_eq!(path(&looped), vec!["start", "review", "rework", "review"]);

    let pending = h.execution.get_pending_approvals(ActorId(42)).await.unwrap();
    assert_eq!(pending.len(), 1);
}

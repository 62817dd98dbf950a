//! Approval gate tests

use std::sync::Arc;

use deployd::deploy::approval::{ApprovalGate, GateState};
use deployd::errors::OrchestratorError;
use deployd::models::approval::{Approval, ApprovalStatus, Decision};
use deployd::storage::json_store::JsonStore;

fn gate() -> ApprovalGate {
    ApprovalGate::new(Arc::new(JsonStore::<Approval>::in_memory()))
}

fn ids(ids: &[&str]) -> Vec<String> {
    ids.iter().map(|s| s.to_string()).collect()
}

#[tokio::test]
async fn test_gate_without_records_is_satisfied() {
    let gate = gate();
    assert_eq!(gate.evaluate("d1").await.unwrap(), GateState::Satisfied);
    assert!(!gate.has_pending("d1").await.unwrap());
}

#[tokio::test]
async fn test_gate_skips_duplicate_approvers() {
    let gate = gate();
    let created = gate.add_approvers("d1", 1, &ids(&["a", "b", "a"])).await.unwrap();
    assert_eq!(created.len(), 2);

    let again = gate.add_approvers("d1", 1, &ids(&["b", "c"])).await.unwrap();
    assert_eq!(again.len(), 1);
    assert_eq!(again[0].approver_id, "c");
    assert_eq!(gate.records("d1").await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_gate_rejects_invalid_input() {
    let gate = gate();
    assert!(matches!(
        gate.add_approvers("d1", 0, &ids(&["a"])).await,
        Err(OrchestratorError::ValidationError(_))
    ));
    assert!(matches!(
        gate.add_approvers("d1", 1, &ids(&[" "])).await,
        Err(OrchestratorError::ValidationError(_))
    ));
}

#[tokio::test]
async fn test_gate_levels_open_in_order() {
    let gate = gate();
    gate.add_approvers("d1", 1, &ids(&["lead"])).await.unwrap();
    gate.add_approvers("d1", 2, &ids(&["director"])).await.unwrap();

    let err = gate
        .decide_next("d1", "director", Decision::Approve, None)
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::ValidationError(_)));

    let lead = gate
        .decide_next("d1", "lead", Decision::Approve, Some("ok".into()))
        .await
        .unwrap();
    assert_eq!(lead.status, ApprovalStatus::Approved);
    assert_eq!(lead.comment.as_deref(), Some("ok"));
    assert!(lead.decided_at.is_some());
    assert_eq!(gate.evaluate("d1").await.unwrap(), GateState::Pending);

    gate.decide_next("d1", "director", Decision::Approve, None)
        .await
        .unwrap();
    assert_eq!(gate.evaluate("d1").await.unwrap(), GateState::Satisfied);
    assert!(gate.is_satisfied("d1").await.unwrap());
}

#[tokio::test]
async fn test_gate_any_rejection_wins() {
    let gate = gate();
    gate.add_approvers("d1", 1, &ids(&["a", "b"])).await.unwrap();

    gate.decide_next("d1", "a", Decision::Approve, None).await.unwrap();
    gate.decide_next("d1", "b", Decision::Reject, None).await.unwrap();

    assert_eq!(gate.evaluate("d1").await.unwrap(), GateState::Rejected);
    assert!(gate.is_rejected("d1").await.unwrap());
}

#[tokio::test]
async fn test_gate_decision_needs_pending_record() {
    let gate = gate();
    gate.add_approvers("d1", 1, &ids(&["a"])).await.unwrap();

    assert!(matches!(
        gate.decide_next("d1", "stranger", Decision::Approve, None).await,
        Err(OrchestratorError::NotFound(_))
    ));

    gate.decide("d1", "a", 1, Decision::Approve, None).await.unwrap();
    // a decided record cannot be decided again
    assert!(matches!(
        gate.decide("d1", "a", 1, Decision::Reject, None).await,
        Err(OrchestratorError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_gate_concurrent_decisions_are_serialized() {
    let gate = Arc::new(gate());
    gate.add_approvers("d1", 1, &ids(&["a"])).await.unwrap();

    let first = {
        let gate = gate.clone();
        tokio::spawn(async move { gate.decide_next("d1", "a", Decision::Approve, None).await })
    };
    let second = {
        let gate = gate.clone();
        tokio::spawn(async move { gate.decide_next("d1", "a", Decision::Reject, None).await })
    };
    let results = [first.await.unwrap(), second.await.unwrap()];

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(!gate.has_pending("d1").await.unwrap());
}

//! Deployment controller tests

use std::time::Duration;

use chrono::Utc;

use deployd::deploy::controller::CreateDeployment;
use deployd::errors::OrchestratorError;
use deployd::models::approval::{ApprovalStatus, Decision};
use deployd::models::deployment::{
    DeploymentPatch, DeploymentStatus, Environment, ExecutionMode, FailureKind,
};
use deployd::models::host::{Host, HostStatus};
use deployd::storage::settings::ExecutionSettings;

use crate::common::{approver, harness, harness_with, owner, project, reader, PROJECT_ID};

fn request(environment: Environment) -> CreateDeployment {
    CreateDeployment {
        project_id: PROJECT_ID.to_string(),
        name: "release".to_string(),
        environment: Some(environment),
        version: Some("1.4.0".to_string()),
        ..CreateDeployment::default()
    }
}

fn ungated() -> CreateDeployment {
    CreateDeployment {
        require_approval: Some(false),
        ..request(Environment::Dev)
    }
}

#[tokio::test]
async fn test_prod_deployment_waits_for_admin_pool() {
    let h = harness(project("true"), &["ops-1", "ops-2"]).await;

    let deployment = h
        .controller
        .create(&owner(), request(Environment::Prod))
        .await
        .unwrap();
    assert_eq!(deployment.status, DeploymentStatus::PendingApproval);
    assert_eq!(deployment.build_number, Some(1));
    assert_eq!(deployment.owner_id, "alice");

    let approvals = h.controller.approvals(&owner(), &deployment.id).await.unwrap();
    assert_eq!(approvals.len(), 2);
    assert!(approvals
        .iter()
        .all(|a| a.level == 1 && a.status == ApprovalStatus::Pending));

    // notifications are delivered in the background
    let mut delivered = 0;
    for _ in 0..100 {
        delivered = h.notifier.events.lock().unwrap().len();
        if delivered == 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(delivered, 2);
}

#[tokio::test]
async fn test_dev_deployment_without_approval_is_approved() {
    let h = harness(project("true"), &["ops-1"]).await;

    let deployment = h.controller.create(&owner(), ungated()).await.unwrap();
    assert_eq!(deployment.status, DeploymentStatus::Approved);
    assert!(h
        .controller
        .approvals(&owner(), &deployment.id)
        .await
        .unwrap()
        .is_empty());

    let status = h.controller.status(&owner(), &deployment.id).await.unwrap();
    assert_eq!(status.current_stage, "ready");
}

#[tokio::test]
async fn test_prod_always_requires_approval() {
    let h = harness(project("true"), &["ops-1"]).await;

    let deployment = h
        .controller
        .create(
            &owner(),
            CreateDeployment {
                require_approval: Some(false),
                ..request(Environment::Prod)
            },
        )
        .await
        .unwrap();
    assert_eq!(deployment.status, DeploymentStatus::PendingApproval);
}

#[tokio::test]
async fn test_build_numbers_increase_per_project() {
    let h = harness(project("true"), &[]).await;
    let first = h.controller.create(&owner(), ungated()).await.unwrap();
    let second = h.controller.create(&owner(), ungated()).await.unwrap();
    assert_eq!(first.build_number, Some(1));
    assert_eq!(second.build_number, Some(2));
}

#[tokio::test]
async fn test_create_validation_and_permissions() {
    let h = harness(project("true"), &[]).await;

    let err = h
        .controller
        .create(&reader("bob"), ungated())
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::AuthorizationError(_)));

    let err = h
        .controller
        .create(
            &owner(),
            CreateDeployment {
                name: "  ".to_string(),
                ..ungated()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::ValidationError(_)));

    let err = h
        .controller
        .create(
            &owner(),
            CreateDeployment {
                project_id: "missing".to_string(),
                ..ungated()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::NotFound(_)));

    let err = h
        .controller
        .create(
            &owner(),
            CreateDeployment {
                host_id: Some("nowhere".to_string()),
                ..ungated()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::NotFound(_)));
}

#[tokio::test]
async fn test_approve_then_run_to_success() {
    let mut h = harness(project("echo shipping $DEPLOY_VERSION"), &[]).await;

    let deployment = h
        .controller
        .create(
            &owner(),
            CreateDeployment {
                approvers: vec!["bob".to_string()],
                ..request(Environment::Prod)
            },
        )
        .await
        .unwrap();
    assert_eq!(deployment.status, DeploymentStatus::PendingApproval);

    let err = h
        .controller
        .start(&owner(), &deployment.id, false)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        OrchestratorError::IllegalTransition {
            status: DeploymentStatus::PendingApproval,
            ..
        }
    ));

    let approved = h
        .controller
        .decide(&approver("bob"), &deployment.id, Decision::Approve, Some("lgtm".into()))
        .await
        .unwrap();
    assert_eq!(approved.status, DeploymentStatus::Approved);
    assert!(approved.log.contains("approved by bob (level 1): lgtm"));

    let started = h
        .controller
        .start(&owner(), &deployment.id, false)
        .await
        .unwrap();
    assert_eq!(started.status, DeploymentStatus::Deploying);
    assert!(started.started_at.is_some());

    let finished = h.run_next().await;
    assert_eq!(finished.status, DeploymentStatus::Success);
    assert!(finished.completed_at.is_some());
    assert!(finished.duration.is_some());
    assert!(finished.log.contains("[stage:preparing]"));
    assert!(finished.log.contains("[stage:deploying]"));
    assert!(finished.log.contains("shipping 1.4.0"));
    assert!(finished.log.contains("deployment finished successfully"));

    let result = finished.result.unwrap();
    assert_eq!(result.exit_code, Some(0));
    assert!(result.deploy_output.unwrap().contains("shipping 1.4.0"));
    assert!(result.error_kind.is_none());

    let status = h.controller.status(&owner(), &deployment.id).await.unwrap();
    assert_eq!(status.status, DeploymentStatus::Success);
    assert_eq!(status.current_stage, "completed");
}

#[tokio::test]
async fn test_rejection_closes_deployment() {
    let h = harness(project("true"), &[]).await;
    let deployment = h
        .controller
        .create(
            &owner(),
            CreateDeployment {
                approvers: vec!["bob".to_string(), "carol".to_string()],
                ..request(Environment::Prod)
            },
        )
        .await
        .unwrap();

    let rejected = h
        .controller
        .decide(&approver("carol"), &deployment.id, Decision::Reject, None)
        .await
        .unwrap();
    assert_eq!(rejected.status, DeploymentStatus::Rejected);
    assert!(rejected.completed_at.is_some());

    // the gate is closed for the remaining approver
    let err = h
        .controller
        .decide(&approver("bob"), &deployment.id, Decision::Approve, None)
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::IllegalTransition { .. }));

    let err = h
        .controller
        .start(&owner(), &deployment.id, true)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        OrchestratorError::IllegalTransition {
            status: DeploymentStatus::Rejected,
            ..
        }
    ));
}

#[tokio::test]
async fn test_decision_by_unassigned_approver_is_refused() {
    let h = harness(project("true"), &[]).await;
    let deployment = h
        .controller
        .create(
            &owner(),
            CreateDeployment {
                approvers: vec!["bob".to_string()],
                ..request(Environment::Prod)
            },
        )
        .await
        .unwrap();

    let err = h
        .controller
        .decide(&approver("mallory"), &deployment.id, Decision::Approve, None)
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::AuthorizationError(_)));

    let err = h
        .controller
        .decide(&reader("bob"), &deployment.id, Decision::Approve, None)
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::AuthorizationError(_)));
}

#[tokio::test]
async fn test_escalation_level_opens_after_first() {
    let h = harness(project("true"), &[]).await;
    let deployment = h
        .controller
        .create(
            &owner(),
            CreateDeployment {
                approvers: vec!["lead".to_string()],
                escalation_approvers: vec!["director".to_string()],
                ..request(Environment::Prod)
            },
        )
        .await
        .unwrap();

    let err = h
        .controller
        .decide(&approver("director"), &deployment.id, Decision::Approve, None)
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::ValidationError(_)));

    let after_lead = h
        .controller
        .decide(&approver("lead"), &deployment.id, Decision::Approve, None)
        .await
        .unwrap();
    assert_eq!(after_lead.status, DeploymentStatus::PendingApproval);

    let after_director = h
        .controller
        .decide(&approver("director"), &deployment.id, Decision::Approve, None)
        .await
        .unwrap();
    assert_eq!(after_director.status, DeploymentStatus::Approved);
}

#[tokio::test]
async fn test_add_approvers_only_while_pending() {
    let h = harness(project("true"), &["ops-1"]).await;
    let pending = h
        .controller
        .create(&owner(), request(Environment::Prod))
        .await
        .unwrap();

    let added = h
        .controller
        .add_approvers(&owner(), &pending.id, 1, &["bob".to_string(), "ops-1".to_string()])
        .await
        .unwrap();
    assert_eq!(added.len(), 1);
    assert_eq!(added[0].approver_id, "bob");

    let err = h
        .controller
        .add_approvers(&reader("eve"), &pending.id, 1, &["eve".to_string()])
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::AuthorizationError(_)));

    let approved = h.controller.create(&owner(), ungated()).await.unwrap();
    let err = h
        .controller
        .add_approvers(&owner(), &approved.id, 1, &["bob".to_string()])
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        OrchestratorError::IllegalTransition {
            status: DeploymentStatus::Approved,
            ..
        }
    ));
}

#[tokio::test]
async fn test_start_requires_owner() {
    let h = harness(project("true"), &[]).await;
    let deployment = h.controller.create(&owner(), ungated()).await.unwrap();

    let stranger = deployd::authz::caller::Caller::new(
        "mallory",
        "Mallory",
        [deployd::authz::caller::Permission::Execute],
    );
    let err = h
        .controller
        .start(&stranger, &deployment.id, false)
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::AuthorizationError(_)));

    let admin = deployd::authz::caller::Caller::system();
    let started = h.controller.start(&admin, &deployment.id, false).await.unwrap();
    assert_eq!(started.status, DeploymentStatus::Deploying);
}

#[tokio::test]
async fn test_concurrent_start_has_one_winner() {
    let h = harness(project("true"), &[]).await;
    let deployment = h.controller.create(&owner(), ungated()).await.unwrap();

    let caller = owner();
    let (first, second) = tokio::join!(
        h.controller.start(&caller, &deployment.id, false),
        h.controller.start(&caller, &deployment.id, false),
    );
    let results = [first, second];

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    let loser = results.into_iter().find_map(|r| r.err()).unwrap();
    assert!(matches!(
        loser,
        OrchestratorError::IllegalTransition {
            status: DeploymentStatus::Deploying,
            ..
        }
    ));
}

#[tokio::test]
async fn test_stop_records_duration_and_operator() {
    let h = harness(project("true"), &[]).await;
    let deployment = h.controller.create(&owner(), ungated()).await.unwrap();
    h.controller
        .start(&owner(), &deployment.id, false)
        .await
        .unwrap();

    let ten_seconds_ago = Utc::now() - chrono::Duration::seconds(10);
    h.stores
        .deployments
        .update(
            &deployment.id,
            DeploymentPatch {
                started_at: Some(Some(ten_seconds_ago)),
                ..DeploymentPatch::default()
            },
        )
        .await
        .unwrap();

    let stopped = h.controller.stop(&owner(), &deployment.id).await.unwrap();
    assert_eq!(stopped.status, DeploymentStatus::Failed);
    assert!(stopped.completed_at.is_some());
    let duration = stopped.duration.unwrap();
    assert!((9..=11).contains(&duration), "duration was {}", duration);
    assert!(stopped.log.contains("manual stop by Alice"));

    // the queued job is stale now
    let mut h = h;
    let job = h.jobs.try_recv().unwrap();
    assert!(h.executor.execute(&job).await.is_none());
}

#[tokio::test]
async fn test_stop_scheduled_deployment_has_no_duration() {
    let h = harness(project("true"), &[]).await;
    let deployment = h.controller.create(&owner(), ungated()).await.unwrap();
    let later = Utc::now() + chrono::Duration::hours(1);
    let scheduled = h
        .controller
        .schedule(&owner(), &deployment.id, later)
        .await
        .unwrap();
    assert_eq!(scheduled.status, DeploymentStatus::Scheduled);
    assert_eq!(scheduled.scheduled_at, Some(later));

    let stopped = h.controller.stop(&owner(), &deployment.id).await.unwrap();
    assert_eq!(stopped.status, DeploymentStatus::Failed);
    assert_eq!(stopped.duration, None);

    let err = h.controller.stop(&owner(), &deployment.id).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::IllegalTransition { .. }));
}

#[tokio::test]
async fn test_stop_cancels_active_run() {
    let h = harness(project("echo begin; sleep 10"), &[]).await;
    let deployment = h.controller.create(&owner(), ungated()).await.unwrap();
    h.controller
        .start(&owner(), &deployment.id, false)
        .await
        .unwrap();

    let mut h = h;
    let job = h.jobs.try_recv().unwrap();
    let executor = h.executor.clone();
    let run = tokio::spawn(async move { executor.execute(&job).await });

    let running = h
        .wait_for(&deployment.id, |d| d.log.contains("begin"))
        .await;
    assert!(running.log.contains("begin"));
    assert!(h.runs.is_active(&deployment.id));

    h.controller.stop(&owner(), &deployment.id).await.unwrap();
    let outcome = tokio::time::timeout(Duration::from_secs(5), run)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert!(!outcome.success);
    assert_eq!(outcome.result.error_kind, Some(FailureKind::Cancelled));

    // the stop already closed the deployment; the late report changes nothing
    let reported = h.controller.report_outcome(&outcome).await.unwrap();
    assert_eq!(reported.status, DeploymentStatus::Failed);
    assert!(reported.log.contains("manual stop by Alice"));
    assert!(!h.runs.is_active(&deployment.id));
}

#[tokio::test]
async fn test_failed_script_fails_deployment() {
    let mut h = harness(project("echo oops >&2; exit 3"), &[]).await;
    let deployment = h.controller.create(&owner(), ungated()).await.unwrap();
    h.controller
        .start(&owner(), &deployment.id, false)
        .await
        .unwrap();

    let finished = h.run_next().await;
    assert_eq!(finished.status, DeploymentStatus::Failed);
    assert!(finished.log.contains("oops"));
    assert!(finished.log.contains("deployment failed"));
    let result = finished.result.unwrap();
    assert_eq!(result.exit_code, Some(3));
    assert_eq!(result.error_kind, Some(FailureKind::Execution));
}

#[tokio::test]
async fn test_timeout_fails_deployment() {
    let settings = ExecutionSettings {
        deploy_timeout_secs: 1,
        ..ExecutionSettings::default()
    };
    let mut h = harness_with(project("sleep 5"), &[], settings).await;
    let deployment = h.controller.create(&owner(), ungated()).await.unwrap();
    h.controller
        .start(&owner(), &deployment.id, false)
        .await
        .unwrap();

    let finished = h.run_next().await;
    assert_eq!(finished.status, DeploymentStatus::Failed);
    let result = finished.result.unwrap();
    assert_eq!(result.error_kind, Some(FailureKind::Timeout));
    assert_eq!(result.exit_code, None);
}

#[tokio::test]
async fn test_report_outcome_is_idempotent() {
    let h = harness(project("true"), &[]).await;
    let deployment = h.controller.create(&owner(), ungated()).await.unwrap();
    h.controller
        .start(&owner(), &deployment.id, false)
        .await
        .unwrap();

    let mut h = h;
    let job = h.jobs.try_recv().unwrap();
    let outcome = h.executor.execute(&job).await.unwrap();

    let first = h.controller.report_outcome(&outcome).await.unwrap();
    let second = h.controller.report_outcome(&outcome).await.unwrap();
    assert_eq!(first.status, DeploymentStatus::Success);
    assert_eq!(second.status, DeploymentStatus::Success);
    assert_eq!(first.log, second.log);
    assert_eq!(first.completed_at, second.completed_at);
}

#[tokio::test]
async fn test_forced_rerun_after_success() {
    let mut h = harness(project("true"), &[]).await;
    let deployment = h.controller.create(&owner(), ungated()).await.unwrap();
    h.controller
        .start(&owner(), &deployment.id, false)
        .await
        .unwrap();
    h.run_next().await;

    let err = h
        .controller
        .start(&owner(), &deployment.id, false)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        OrchestratorError::IllegalTransition {
            status: DeploymentStatus::Success,
            ..
        }
    ));

    let rerun = h
        .controller
        .start(&owner(), &deployment.id, true)
        .await
        .unwrap();
    assert_eq!(rerun.status, DeploymentStatus::Deploying);
    assert!(rerun.completed_at.is_none());
    assert!(rerun.result.is_none());
    assert!(rerun.log.contains("forced re-run"));
    assert!(!rerun.log.contains("deployment finished successfully"));
    assert_eq!(h.run_next().await.status, DeploymentStatus::Success);
}

#[tokio::test]
async fn test_start_due_starts_scheduled_deployments() {
    let h = harness(project("true"), &[]).await;
    let due = h.controller.create(&owner(), ungated()).await.unwrap();
    let later = h.controller.create(&owner(), ungated()).await.unwrap();

    let now = Utc::now();
    h.controller
        .schedule(&owner(), &due.id, now - chrono::Duration::seconds(1))
        .await
        .unwrap();
    h.controller
        .schedule(&owner(), &later.id, now + chrono::Duration::hours(1))
        .await
        .unwrap();

    assert_eq!(h.controller.start_due(now).await.unwrap(), 1);
    let due = h.controller.get(&owner(), &due.id).await.unwrap();
    let later = h.controller.get(&owner(), &later.id).await.unwrap();
    assert_eq!(due.status, DeploymentStatus::Deploying);
    assert_eq!(later.status, DeploymentStatus::Scheduled);
}

#[tokio::test]
async fn test_recover_interrupted_fails_orphaned_runs() {
    let h = harness(project("true"), &[]).await;
    let deployment = h.controller.create(&owner(), ungated()).await.unwrap();
    h.controller
        .start(&owner(), &deployment.id, false)
        .await
        .unwrap();

    assert_eq!(h.controller.recover_interrupted().await.unwrap(), 1);
    let recovered = h.controller.get(&owner(), &deployment.id).await.unwrap();
    assert_eq!(recovered.status, DeploymentStatus::Failed);
    assert_eq!(
        recovered.result.unwrap().error_kind,
        Some(FailureKind::Internal)
    );
    assert_eq!(h.controller.recover_interrupted().await.unwrap(), 0);
}

async fn health_endpoint(status: axum::http::StatusCode) -> String {
    let app = axum::Router::new().route("/health", axum::routing::get(move || async move { (status, "checked") }));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}/health", addr)
}

#[tokio::test]
async fn test_health_check_gates_success() {
    let mut healthy = project("true");
    healthy.health_check_url = Some(health_endpoint(axum::http::StatusCode::OK).await);
    let mut h = harness(healthy, &[]).await;
    let deployment = h.controller.create(&owner(), ungated()).await.unwrap();
    h.controller
        .start(&owner(), &deployment.id, false)
        .await
        .unwrap();

    let finished = h.run_next().await;
    assert_eq!(finished.status, DeploymentStatus::Success);
    assert!(finished.log.contains("[stage:verifying]"));
    let result = finished.result.unwrap();
    assert!(result.verify_output.unwrap().contains("200"));
}

#[tokio::test]
async fn test_unhealthy_service_fails_deployment() {
    let mut unhealthy = project("true");
    unhealthy.health_check_url =
        Some(health_endpoint(axum::http::StatusCode::SERVICE_UNAVAILABLE).await);
    let mut h = harness(unhealthy, &[]).await;
    let deployment = h.controller.create(&owner(), ungated()).await.unwrap();
    h.controller
        .start(&owner(), &deployment.id, false)
        .await
        .unwrap();

    let finished = h.run_next().await;
    assert_eq!(finished.status, DeploymentStatus::Failed);
    assert!(finished.log.contains("health check returned 503"));
    assert_eq!(finished.result.unwrap().error_kind, Some(FailureKind::Execution));
}

fn remote_host(id: &str, address: &str, port: u16) -> Host {
    serde_json::from_value(serde_json::json!({
        "id": id,
        "name": "edge",
        "address": address,
        "port": port,
        "username": "deploy",
    }))
    .unwrap()
}

#[tokio::test]
async fn test_unreachable_host_is_a_connection_failure() {
    // a port nobody listens on
    let port = std::net::TcpListener::bind("127.0.0.2:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port();

    let mut h = harness(project("echo deploying"), &[]).await;
    h.stores
        .hosts
        .create(remote_host("edge-1", "127.0.0.2", port))
        .await
        .unwrap();

    let deployment = h
        .controller
        .create(
            &owner(),
            CreateDeployment {
                host_id: Some("edge-1".to_string()),
                ..ungated()
            },
        )
        .await
        .unwrap();
    h.controller
        .start(&owner(), &deployment.id, false)
        .await
        .unwrap();

    let finished = h.run_next().await;
    assert_eq!(finished.status, DeploymentStatus::Failed);
    assert!(finished.log.contains("connecting to deploy@127.0.0.2"));
    assert!(finished.log.contains("Connection error"));
    assert!(!finished.log.contains("echo deploying"));
    let result = finished.result.unwrap();
    assert_eq!(result.mode, ExecutionMode::Remote);
    assert_eq!(result.error_kind, Some(FailureKind::Connection));

    let host = h.stores.hosts.require("edge-1").await.unwrap();
    assert_eq!(host.status, HostStatus::Unreachable);
    assert!(host.last_checked_at.is_some());
}

#[tokio::test]
async fn test_create_rejects_option_like_host_address() {
    let h = harness(project("true"), &[]).await;
    h.stores
        .hosts
        .create(remote_host("bad", "-oProxyCommand=touch", 22))
        .await
        .unwrap();

    let err = h
        .controller
        .create(
            &owner(),
            CreateDeployment {
                host_id: Some("bad".to_string()),
                ..ungated()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::ValidationError(_)));
}

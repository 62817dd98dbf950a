//! Rollback coordinator tests

use chrono::Utc;

use deployd::deploy::controller::CreateDeployment;
use deployd::deploy::rollback::{RollbackMode, RollbackRequest};
use deployd::errors::OrchestratorError;
use deployd::models::deployment::{Deployment, DeploymentStatus, Environment};
use deployd::models::project::Project;

use crate::common::{harness, owner, project, reader, Harness, PROJECT_ID};

fn rollback_project() -> Project {
    let mut project = project("echo deploy $DEPLOY_VERSION");
    project.build_script = Some("echo building".to_string());
    project.rollback_script = Some("echo restoring $DEPLOY_VERSION from $DEPLOY_ROLLBACK_OF".to_string());
    project
}

fn immediate(version: &str) -> RollbackRequest {
    RollbackRequest {
        target_version: version.to_string(),
        reason: "bad release".to_string(),
        mode: RollbackMode::Immediate,
        scheduled_at: None,
    }
}

async fn finished_deployment(h: &mut Harness) -> Deployment {
    let deployment = h
        .controller
        .create(
            &owner(),
            CreateDeployment {
                project_id: PROJECT_ID.to_string(),
                name: "release".to_string(),
                environment: Some(Environment::Staging),
                version: Some("2.0.0".to_string()),
                require_approval: Some(false),
                ..CreateDeployment::default()
            },
        )
        .await
        .unwrap();
    h.controller
        .start(&owner(), &deployment.id, false)
        .await
        .unwrap();
    let finished = h.run_next().await;
    assert_eq!(finished.status, DeploymentStatus::Success);
    finished
}

#[tokio::test]
async fn test_immediate_rollback_marks_original() {
    let mut h = harness(rollback_project(), &[]).await;
    let original = finished_deployment(&mut h).await;

    let result = h
        .rollbacks
        .rollback_to(&owner(), &original.id, immediate("1.9.0"))
        .await
        .unwrap();

    let rollback = result.rollback;
    assert_eq!(rollback.status, DeploymentStatus::Success);
    assert_eq!(rollback.rollback_of.as_deref(), Some(original.id.as_str()));
    assert_eq!(rollback.version.as_deref(), Some("1.9.0"));
    assert_eq!(rollback.environment, Environment::Staging);
    assert_eq!(rollback.name, "release rollback to 1.9.0");
    assert_eq!(rollback.build_number, Some(2));
    assert!(rollback.log.contains("reason: bad release"));
    assert!(rollback.log.contains("build skipped for rollback"));
    assert!(rollback
        .log
        .contains(&format!("restoring 1.9.0 from {}", original.id)));
    assert!(!rollback.log.contains("building\n"));

    assert_eq!(result.original.status, DeploymentStatus::RolledBack);
    assert!(result.original.log.contains(&rollback.id));
}

#[tokio::test]
async fn test_failed_rollback_leaves_original() {
    let mut h = harness(rollback_project(), &[]).await;
    let original = finished_deployment(&mut h).await;

    let mut project = rollback_project();
    project.rollback_script = Some("exit 1".to_string());
    h.stores.projects.update(PROJECT_ID, project).await.unwrap();

    let result = h
        .rollbacks
        .rollback_to(&owner(), &original.id, immediate("1.9.0"))
        .await
        .unwrap();
    assert_eq!(result.rollback.status, DeploymentStatus::Failed);
    assert_eq!(result.original.status, DeploymentStatus::Success);
}

#[tokio::test]
async fn test_scheduled_rollback_blocks_another() {
    let mut h = harness(rollback_project(), &[]).await;
    let original = finished_deployment(&mut h).await;
    let at = Utc::now() + chrono::Duration::minutes(30);

    let result = h
        .rollbacks
        .rollback_to(
            &owner(),
            &original.id,
            RollbackRequest {
                mode: RollbackMode::Scheduled,
                scheduled_at: Some(at),
                ..immediate("1.9.0")
            },
        )
        .await
        .unwrap();
    assert_eq!(result.rollback.status, DeploymentStatus::Scheduled);
    assert_eq!(result.rollback.scheduled_at, Some(at));
    assert_eq!(result.original.status, DeploymentStatus::Success);

    let err = h
        .rollbacks
        .rollback_to(&owner(), &original.id, immediate("1.8.0"))
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::IllegalTransition { .. }));
    assert!(err.to_string().contains("already in progress"));
}

#[tokio::test]
async fn test_rollback_validation() {
    let mut h = harness(rollback_project(), &[]).await;
    let original = finished_deployment(&mut h).await;

    let err = h
        .rollbacks
        .rollback_to(&reader("bob"), &original.id, immediate("1.9.0"))
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::AuthorizationError(_)));

    let err = h
        .rollbacks
        .rollback_to(&owner(), &original.id, immediate("  "))
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::ValidationError(_)));

    let err = h
        .rollbacks
        .rollback_to(
            &owner(),
            &original.id,
            RollbackRequest {
                mode: RollbackMode::Scheduled,
                ..immediate("1.9.0")
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::ValidationError(_)));

    let err = h
        .rollbacks
        .rollback_to(&owner(), "missing", immediate("1.9.0"))
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::NotFound(_)));
}

#[tokio::test]
async fn test_rollback_needs_finished_source() {
    let h = harness(rollback_project(), &[]).await;
    let approved = h
        .controller
        .create(
            &owner(),
            CreateDeployment {
                project_id: PROJECT_ID.to_string(),
                name: "release".to_string(),
                require_approval: Some(false),
                ..CreateDeployment::default()
            },
        )
        .await
        .unwrap();

    let err = h
        .rollbacks
        .rollback_to(&owner(), &approved.id, immediate("1.0.0"))
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
async fn test_scheduled_rollback_keeps_reason_when_started() {
    let mut h = harness(rollback_project(), &[]).await;
    let original = finished_deployment(&mut h).await;
    let at = Utc::now() + chrono::Duration::minutes(30);

    let scheduled = h
        .rollbacks
        .rollback_to(
            &owner(),
            &original.id,
            RollbackRequest {
                mode: RollbackMode::Scheduled,
                scheduled_at: Some(at),
                ..immediate("1.9.0")
            },
        )
        .await
        .unwrap()
        .rollback;

    assert_eq!(
        h.controller
            .start_due(at + chrono::Duration::seconds(1))
            .await
            .unwrap(),
        1
    );
    let finished = h.run_next().await;
    assert_eq!(finished.id, scheduled.id);
    assert_eq!(finished.status, DeploymentStatus::Success);
    assert!(finished.log.contains("reason: bad release"));
    assert!(finished
        .log
        .contains(&format!("rollback of deployment {}", original.id)));
    assert!(finished.log.contains("deployment started by"));
    assert!(finished
        .log
        .contains(&format!("restoring 1.9.0 from {}", original.id)));

    let original = h.controller.get(&owner(), &original.id).await.unwrap();
    assert_eq!(original.status, DeploymentStatus::RolledBack);
}

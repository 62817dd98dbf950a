//! Lifecycle state machine tests

use deployd::deploy::fsm::{DeploymentCommand, DeploymentFsm};
use deployd::errors::OrchestratorError;
use deployd::models::deployment::DeploymentStatus;

#[test]
fn test_fsm_initial_status() {
    assert_eq!(DeploymentFsm::initial(true), DeploymentStatus::PendingApproval);
    assert_eq!(DeploymentFsm::initial(false), DeploymentStatus::Approved);
}

#[test]
fn test_fsm_gated_success_flow() {
    let mut fsm = DeploymentFsm::new(DeploymentFsm::initial(true));

    fsm.process(DeploymentCommand::GateApproved).unwrap();
    assert_eq!(fsm.status(), DeploymentStatus::Approved);

    fsm.process(DeploymentCommand::Schedule).unwrap();
    assert_eq!(fsm.status(), DeploymentStatus::Scheduled);

    fsm.process(DeploymentCommand::Start { force: false }).unwrap();
    assert_eq!(fsm.status(), DeploymentStatus::Deploying);

    fsm.process(DeploymentCommand::Complete { success: true }).unwrap();
    assert_eq!(fsm.status(), DeploymentStatus::Success);

    fsm.process(DeploymentCommand::MarkRolledBack).unwrap();
    assert_eq!(fsm.status(), DeploymentStatus::RolledBack);
}

#[test]
fn test_fsm_rejected_is_final() {
    let mut fsm = DeploymentFsm::new(DeploymentStatus::PendingApproval);
    fsm.process(DeploymentCommand::GateRejected).unwrap();
    assert_eq!(fsm.status(), DeploymentStatus::Rejected);

    for command in [
        DeploymentCommand::GateApproved,
        DeploymentCommand::Schedule,
        DeploymentCommand::Start { force: true },
        DeploymentCommand::Stop,
        DeploymentCommand::MarkRolledBack,
    ] {
        let err = fsm.process(command).unwrap_err();
        assert!(matches!(
            err,
            OrchestratorError::IllegalTransition {
                status: DeploymentStatus::Rejected,
                ..
            }
        ));
        assert_eq!(fsm.status(), DeploymentStatus::Rejected);
    }
}

#[test]
fn test_fsm_start_needs_force_after_success() {
    assert!(DeploymentFsm::transition(
        DeploymentStatus::Success,
        DeploymentCommand::Start { force: false }
    )
    .is_err());
    assert_eq!(
        DeploymentFsm::transition(
            DeploymentStatus::Success,
            DeploymentCommand::Start { force: true }
        )
        .unwrap(),
        DeploymentStatus::Deploying
    );
    // force does not reopen failed deployments
    assert!(DeploymentFsm::transition(
        DeploymentStatus::Failed,
        DeploymentCommand::Start { force: true }
    )
    .is_err());
}

#[test]
fn test_fsm_stop() {
    assert_eq!(
        DeploymentFsm::transition(DeploymentStatus::Deploying, DeploymentCommand::Stop).unwrap(),
        DeploymentStatus::Failed
    );
    assert_eq!(
        DeploymentFsm::transition(DeploymentStatus::Scheduled, DeploymentCommand::Stop).unwrap(),
        DeploymentStatus::Failed
    );
    assert!(DeploymentFsm::transition(DeploymentStatus::Approved, DeploymentCommand::Stop).is_err());
    assert!(DeploymentFsm::transition(DeploymentStatus::Success, DeploymentCommand::Stop).is_err());
}

#[test]
fn test_fsm_double_start_reports_already_deploying() {
    let err = DeploymentFsm::transition(
        DeploymentStatus::Deploying,
        DeploymentCommand::Start { force: false },
    )
    .unwrap_err();
    assert!(err.to_string().contains("already deploying"));
}

#[test]
fn test_fsm_can_roll_back() {
    assert!(DeploymentFsm::can_roll_back(DeploymentStatus::Success));
    assert!(DeploymentFsm::can_roll_back(DeploymentStatus::Failed));
    assert!(!DeploymentFsm::can_roll_back(DeploymentStatus::Deploying));
    assert!(!DeploymentFsm::can_roll_back(DeploymentStatus::RolledBack));
    assert!(!DeploymentFsm::can_roll_back(DeploymentStatus::PendingApproval));
}

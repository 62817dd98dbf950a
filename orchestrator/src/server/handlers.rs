//! HTTP request handlers

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use openapi_server::models::{
    AddApproversRequest, ApprovalListResponse, ApprovalResponse, CreateDeploymentRequest,
    DecisionRequest, DeploymentListQuery, DeploymentListResponse, DeploymentResponse,
    DeploymentStatusResponse, ErrorResponse, ExecutionResultResponse, HealthResponse,
    RollbackRequest, RollbackResponse, ScheduleRequest, StartRequest, VersionResponse,
};
use serde::de::DeserializeOwned;
use tracing::{debug, error};

use crate::authz::caller::Caller;
use crate::deploy::controller::{CreateDeployment, DeploymentStatusView};
use crate::deploy::rollback::{self, RollbackMode};
use crate::errors::OrchestratorError;
use crate::models::approval::{Approval, Decision};
use crate::models::deployment::{Deployment, DeploymentFilter, DeploymentStatus, Environment};
use crate::server::state::ServerState;
use crate::utils::version_info;

type ApiResult<T> = Result<T, OrchestratorError>;

impl IntoResponse for OrchestratorError {
    fn into_response(self) -> Response {
        let status = match &self {
            OrchestratorError::ValidationError(_) => StatusCode::BAD_REQUEST,
            OrchestratorError::AuthorizationError(_) => StatusCode::FORBIDDEN,
            OrchestratorError::NotFound(_) => StatusCode::NOT_FOUND,
            OrchestratorError::IllegalTransition { .. } => StatusCode::CONFLICT,
            OrchestratorError::ConnectionError(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            error!("Request failed: {}", self);
        } else {
            debug!("Request rejected: {}", self);
        }

        let current_status = match &self {
            OrchestratorError::IllegalTransition { status, .. } => Some(status.to_string()),
            _ => None,
        };
        let body = ErrorResponse {
            error: self.kind().to_string(),
            message: self.to_string(),
            status: current_status,
        };
        (status, Json(body)).into_response()
    }
}

// ================================== SYSTEM =================================== //

pub async fn health_handler() -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: version_info().version,
        timestamp: Utc::now(),
    })
}

pub async fn version_handler() -> impl IntoResponse {
    let version = version_info();
    Json(VersionResponse {
        version: version.version,
        git_commit: version.git_hash,
        build_time: version.build_time,
    })
}

// ================================ DEPLOYMENTS ================================ //

pub async fn create_deployment_handler(
    State(state): State<Arc<ServerState>>,
    caller: Caller,
    Json(body): Json<CreateDeploymentRequest>,
) -> ApiResult<(StatusCode, Json<DeploymentResponse>)> {
    let environment = body
        .environment
        .as_deref()
        .map(str::parse::<Environment>)
        .transpose()?;
    let request = CreateDeployment {
        project_id: body.project_id,
        name: body.name,
        description: body.description,
        environment,
        version: body.version,
        host_id: body.host_id,
        require_approval: body.require_approval,
        approvers: body.approvers,
        escalation_approvers: body.escalation_approvers,
    };

    let deployment = state.controller.create(&caller, request).await?;
    Ok((StatusCode::CREATED, Json(deployment_response(deployment))))
}

pub async fn list_deployments_handler(
    State(state): State<Arc<ServerState>>,
    caller: Caller,
    Query(query): Query<DeploymentListQuery>,
) -> ApiResult<Json<DeploymentListResponse>> {
    let filter = DeploymentFilter {
        project_id: query.project_id.filter(|p| !p.is_empty()),
        owner_id: query.owner_id.filter(|o| !o.is_empty()),
        environment: query
            .environment
            .as_deref()
            .filter(|e| !e.is_empty())
            .map(str::parse::<Environment>)
            .transpose()?,
        statuses: query
            .status
            .as_deref()
            .filter(|s| !s.is_empty())
            .map(|raw| {
                raw.split(',')
                    .map(|s| s.trim().parse::<DeploymentStatus>())
                    .collect::<Result<Vec<_>, _>>()
            })
            .transpose()?,
        ..DeploymentFilter::default()
    };

    let mut deployments = state.controller.list(&caller, &filter).await?;
    deployments.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    let deployments: Vec<_> = deployments.into_iter().map(deployment_response).collect();
    Ok(Json(DeploymentListResponse {
        total: deployments.len(),
        deployments,
    }))
}

pub async fn get_deployment_handler(
    State(state): State<Arc<ServerState>>,
    caller: Caller,
    Path(id): Path<String>,
) -> ApiResult<Json<DeploymentResponse>> {
    let deployment = state.controller.get(&caller, &id).await?;
    Ok(Json(deployment_response(deployment)))
}

pub async fn deployment_status_handler(
    State(state): State<Arc<ServerState>>,
    caller: Caller,
    Path(id): Path<String>,
) -> ApiResult<Json<DeploymentStatusResponse>> {
    let view = state.controller.status(&caller, &id).await?;
    Ok(Json(status_response(view)))
}

pub async fn schedule_deployment_handler(
    State(state): State<Arc<ServerState>>,
    caller: Caller,
    Path(id): Path<String>,
    Json(body): Json<ScheduleRequest>,
) -> ApiResult<Json<DeploymentResponse>> {
    let deployment = state
        .controller
        .schedule(&caller, &id, body.scheduled_at)
        .await?;
    Ok(Json(deployment_response(deployment)))
}

/// Start accepts an empty body as `{"force": false}`
pub async fn start_deployment_handler(
    State(state): State<Arc<ServerState>>,
    caller: Caller,
    Path(id): Path<String>,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<DeploymentResponse>)> {
    let request: StartRequest = parse_optional_body(&body)?;
    let deployment = state.controller.start(&caller, &id, request.force).await?;
    Ok((StatusCode::ACCEPTED, Json(deployment_response(deployment))))
}

pub async fn stop_deployment_handler(
    State(state): State<Arc<ServerState>>,
    caller: Caller,
    Path(id): Path<String>,
) -> ApiResult<Json<DeploymentResponse>> {
    let deployment = state.controller.stop(&caller, &id).await?;
    Ok(Json(deployment_response(deployment)))
}

pub async fn rollback_deployment_handler(
    State(state): State<Arc<ServerState>>,
    caller: Caller,
    Path(id): Path<String>,
    Json(body): Json<RollbackRequest>,
) -> ApiResult<(StatusCode, Json<RollbackResponse>)> {
    let mode = match body.mode.as_deref() {
        Some(mode) => mode.parse::<RollbackMode>()?,
        None => RollbackMode::Immediate,
    };
    let request = rollback::RollbackRequest {
        target_version: body.target_version,
        reason: body.reason,
        mode,
        scheduled_at: body.scheduled_at,
    };

    let result = state.rollbacks.rollback_to(&caller, &id, request).await?;
    Ok((
        StatusCode::CREATED,
        Json(RollbackResponse {
            rollback_deployment: deployment_response(result.rollback),
            original_deployment: deployment_response(result.original),
        }),
    ))
}

// ================================= APPROVALS ================================= //

pub async fn list_approvals_handler(
    State(state): State<Arc<ServerState>>,
    caller: Caller,
    Path(id): Path<String>,
) -> ApiResult<Json<ApprovalListResponse>> {
    let approvals: Vec<_> = state
        .controller
        .approvals(&caller, &id)
        .await?
        .into_iter()
        .map(approval_response)
        .collect();
    Ok(Json(ApprovalListResponse {
        total: approvals.len(),
        approvals,
    }))
}

pub async fn add_approvers_handler(
    State(state): State<Arc<ServerState>>,
    caller: Caller,
    Path(id): Path<String>,
    Json(body): Json<AddApproversRequest>,
) -> ApiResult<(StatusCode, Json<ApprovalListResponse>)> {
    let approvals: Vec<_> = state
        .controller
        .add_approvers(&caller, &id, body.level, &body.approver_ids)
        .await?
        .into_iter()
        .map(approval_response)
        .collect();
    Ok((
        StatusCode::CREATED,
        Json(ApprovalListResponse {
            total: approvals.len(),
            approvals,
        }),
    ))
}

pub async fn decide_handler(
    State(state): State<Arc<ServerState>>,
    caller: Caller,
    Path(id): Path<String>,
    Json(body): Json<DecisionRequest>,
) -> ApiResult<Json<DeploymentResponse>> {
    let decision = body.decision.parse::<Decision>()?;
    let deployment = state
        .controller
        .decide(&caller, &id, decision, body.comment)
        .await?;
    Ok(Json(deployment_response(deployment)))
}

// ================================= CONVERSION ================================ //

fn parse_optional_body<T: DeserializeOwned + Default>(body: &[u8]) -> Result<T, OrchestratorError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body)
        .map_err(|e| OrchestratorError::ValidationError(format!("invalid request body: {}", e)))
}

pub fn deployment_response(deployment: Deployment) -> DeploymentResponse {
    DeploymentResponse {
        id: deployment.id,
        project_id: deployment.project_id,
        name: deployment.name,
        description: deployment.description,
        environment: deployment.environment.to_string(),
        version: deployment.version,
        build_number: deployment.build_number,
        status: deployment.status.to_string(),
        scheduled_at: deployment.scheduled_at,
        started_at: deployment.started_at,
        completed_at: deployment.completed_at,
        duration: deployment.duration,
        log: deployment.log,
        result: deployment.result.map(|r| ExecutionResultResponse {
            mode: r.mode.as_str().to_string(),
            build_output: r.build_output,
            deploy_output: r.deploy_output,
            verify_output: r.verify_output,
            exit_code: r.exit_code,
            error_kind: r.error_kind.map(|k| k.as_str().to_string()),
        }),
        owner_id: deployment.owner_id,
        host_id: deployment.host_id,
        rollback_of: deployment.rollback_of,
        created_at: deployment.created_at,
        updated_at: deployment.updated_at,
    }
}

fn status_response(view: DeploymentStatusView) -> DeploymentStatusResponse {
    DeploymentStatusResponse {
        status: view.status.to_string(),
        current_stage: view.current_stage,
        log: view.log,
        started_at: view.started_at,
        completed_at: view.completed_at,
        duration: view.duration,
    }
}

fn approval_response(approval: Approval) -> ApprovalResponse {
    ApprovalResponse {
        id: approval.id,
        deployment_id: approval.deployment_id,
        approver_id: approval.approver_id,
        level: approval.level,
        status: approval.status.as_str().to_string(),
        comment: approval.comment,
        decided_at: approval.decided_at,
        created_at: approval.created_at,
    }
}

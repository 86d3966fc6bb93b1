//! Pipeline Orchestration API Handlers
//!
//! Service and pipeline unit catalogue, the approval workflow and run
//! status queries.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use beacon_core::domain::pipeline::{
    AuthorizationRequest, ExecutionHistory, PipelineRun, PipelineRunDetails,
    PipelineStatusOverview,
};
use beacon_core::domain::service::Service;
use beacon_core::dto::pipeline::{
    AuthorizationDecision, CreatePipelineUnit, CreateService, PipelineUnitView,
    TriggerPipelineUnit,
};
use serde_json::{Value, json};
use uuid::Uuid;

use crate::api::AppState;
use crate::api::auth::CurrentUser;
use crate::api::error::ApiResult;

// ===== Services =====

/// POST /gitlab/services
pub async fn create_service(
    State(state): State<AppState>,
    Json(req): Json<CreateService>,
) -> ApiResult<(StatusCode, Json<Service>)> {
    tracing::info!("Registering service: {} ({})", req.name, req.kind);

    let service = state.pipelines.create_service(req).await?;
    Ok((StatusCode::CREATED, Json(service)))
}

/// GET /gitlab/services
pub async fn list_services(State(state): State<AppState>) -> ApiResult<Json<Vec<Service>>> {
    Ok(Json(state.pipelines.list_services().await?))
}

/// GET /gitlab/services/{id}
pub async fn get_service(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Service>> {
    Ok(Json(state.pipelines.get_service(id).await?))
}

// ===== Pipeline units =====

/// POST /gitlab/pipeline-units
pub async fn create_pipeline_unit(
    State(state): State<AppState>,
    Json(req): Json<CreatePipelineUnit>,
) -> ApiResult<(StatusCode, Json<PipelineUnitView>)> {
    let unit = state.pipelines.create_pipeline_unit(req).await?;
    Ok((StatusCode::CREATED, Json(unit)))
}

/// GET /gitlab/pipeline-units
pub async fn list_pipeline_units(
    State(state): State<AppState>,
) -> ApiResult<Json<Vec<PipelineUnitView>>> {
    Ok(Json(state.pipelines.list_pipeline_units().await?))
}

/// GET /gitlab/pipeline-units/{id}
pub async fn get_pipeline_unit(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<PipelineUnitView>> {
    Ok(Json(state.pipelines.get_pipeline_unit(id).await?))
}

/// POST /gitlab/pipeline-units/{id}/trigger
/// Request a run of the unit; it waits for approval
pub async fn trigger_pipeline_unit(
    State(state): State<AppState>,
    CurrentUser(requester_id): CurrentUser,
    Path(id): Path<Uuid>,
    Json(req): Json<TriggerPipelineUnit>,
) -> ApiResult<(StatusCode, Json<PipelineRun>)> {
    tracing::info!("Triggering pipeline unit {} for {}", id, requester_id);

    let run = state.pipelines.trigger(id, requester_id, req).await?;
    Ok((StatusCode::CREATED, Json(run)))
}

// ===== Authorization =====

/// GET /gitlab/authorization-requests
pub async fn list_authorization_requests(
    State(state): State<AppState>,
) -> ApiResult<Json<Vec<AuthorizationRequest>>> {
    Ok(Json(state.pipelines.list_authorization_requests().await?))
}

/// POST /gitlab/authorization-requests/{id}/approve
/// Approve a pending request; execution continues in the background
pub async fn approve_request(
    State(state): State<AppState>,
    CurrentUser(approver_id): CurrentUser,
    Path(id): Path<Uuid>,
    Json(decision): Json<AuthorizationDecision>,
) -> ApiResult<Json<Value>> {
    let run = state.pipelines.approve(id, approver_id, decision).await?;

    Ok(Json(json!({
        "message": "Pipeline run approved and execution started",
        "pipeline_run_id": run.id,
        "status": run.status,
    })))
}

/// POST /gitlab/authorization-requests/{id}/reject
pub async fn reject_request(
    State(state): State<AppState>,
    CurrentUser(approver_id): CurrentUser,
    Path(id): Path<Uuid>,
    Json(decision): Json<AuthorizationDecision>,
) -> ApiResult<Json<Value>> {
    let run = state.pipelines.reject(id, approver_id, decision).await?;

    Ok(Json(json!({
        "message": "Pipeline run rejected",
        "pipeline_run_id": run.id,
        "status": run.status,
    })))
}

// ===== Runs =====

/// GET /gitlab/pipeline-runs/{id}/status
pub async fn get_run_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Value>> {
    let status = state.pipelines.get_run_status(id).await?;
    Ok(Json(json!({ "pipeline_run_id": id, "status": status })))
}

/// GET /gitlab/pipeline-runs/{id}/history
pub async fn list_run_history(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Vec<ExecutionHistory>>> {
    Ok(Json(state.pipelines.list_run_history(id).await?))
}

/// GET /gitlab/pipeline-runs/history
pub async fn list_all_histories(
    State(state): State<AppState>,
) -> ApiResult<Json<Vec<ExecutionHistory>>> {
    Ok(Json(state.pipelines.list_all_histories().await?))
}

/// GET /gitlab/pipeline-status
/// Every run grouped by lifecycle bucket
pub async fn pipeline_status_overview(
    State(state): State<AppState>,
) -> ApiResult<Json<PipelineStatusOverview>> {
    Ok(Json(state.pipelines.status_overview().await?))
}

/// GET /gitlab/pipeline-status/{id}
pub async fn get_run_details(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<PipelineRunDetails>> {
    Ok(Json(state.pipelines.get_run_details(id).await?))
}

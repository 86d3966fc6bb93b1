//! Endpoint Monitoring API Handlers
//!
//! Scheduler control, endpoint registration and statistics.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use beacon_core::domain::endpoint::Endpoint;
use beacon_core::dto::endpoint::{
    AggregateStats, CheckResponse, CreateEndpoint, EndpointDetail, EndpointSummary,
    SchedulerStatus,
};
use serde_json::{Value, json};
use uuid::Uuid;

use crate::api::AppState;
use crate::api::error::ApiResult;

/// POST /monitor/start-checks
/// Start the periodic endpoint checks
pub async fn start_checks(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    state.scheduler.start().await?;
    tracing::info!("Endpoints check started");
    Ok(Json(json!({ "message": "Endpoints check started successfully" })))
}

/// POST /monitor/stop-checks
/// Stop the periodic endpoint checks
pub async fn stop_checks(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    state.scheduler.stop().await?;
    Ok(Json(json!({ "message": "Endpoints check stopped successfully" })))
}

/// GET /monitor/check-scheduler-status
pub async fn scheduler_status(State(state): State<AppState>) -> Json<SchedulerStatus> {
    Json(SchedulerStatus {
        scheduler_running: state.scheduler.is_running().await,
    })
}

/// POST /monitor/endpoints
/// Register an endpoint
pub async fn create_endpoint(
    State(state): State<AppState>,
    Json(req): Json<CreateEndpoint>,
) -> ApiResult<(StatusCode, Json<Endpoint>)> {
    tracing::info!("Registering endpoint: {} {}", req.api_method, req.url);

    let endpoint = state.monitor.create_endpoint(req).await?;
    Ok((StatusCode::CREATED, Json(endpoint)))
}

/// GET /monitor/endpoints
/// List every endpoint with its essential statistics
pub async fn list_endpoints(State(state): State<AppState>) -> ApiResult<Json<Vec<EndpointSummary>>> {
    tracing::debug!("Listing endpoints");

    Ok(Json(state.monitor.list_endpoint_summaries().await?))
}

/// GET /monitor/endpoints/{id}
pub async fn get_endpoint(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<EndpointDetail>> {
    tracing::debug!("Getting endpoint: {}", id);

    Ok(Json(state.monitor.get_endpoint_detail(id).await?))
}

/// POST /monitor/endpoints/{id}/check
/// Probe an endpoint immediately
pub async fn check_endpoint(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<CheckResponse>> {
    let outcome = state.monitor.check_now(id).await?;

    Ok(Json(CheckResponse {
        endpoint_id: outcome.endpoint_id,
        status: if outcome.success { "up" } else { "down" }.to_string(),
        status_code: outcome.status_code,
        latency_ms: outcome.latency_ms,
        error: outcome.error,
        checked_at: outcome.checked_at,
    }))
}

/// GET /monitor/overall-stats
pub async fn overall_stats(State(state): State<AppState>) -> ApiResult<Json<AggregateStats>> {
    Ok(Json(state.monitor.aggregate_stats().await?))
}

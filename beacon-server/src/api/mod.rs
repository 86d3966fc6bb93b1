//! API Module
//!
//! HTTP API layer of the server.
//! Each submodule handles endpoints for a specific domain.

pub mod auth;
pub mod error;
pub mod health;
pub mod monitor;
pub mod pipeline;
pub mod realtime;

use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::realtime::HubHandle;
use crate::service::monitor::SchedulerControl;
use crate::service::{MonitorService, PipelineService};

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub monitor: MonitorService,
    pub scheduler: Arc<SchedulerControl>,
    pub pipelines: PipelineService,
    pub hub: HubHandle,
}

/// Create the main API router with all endpoints
pub fn create_router(state: AppState) -> Router {
    let api = Router::new()
        // Health check
        .route("/health", get(health::health_check))
        // Endpoint monitoring
        .route("/monitor/start-checks", post(monitor::start_checks))
        .route("/monitor/stop-checks", post(monitor::stop_checks))
        .route(
            "/monitor/check-scheduler-status",
            get(monitor::scheduler_status),
        )
        .route(
            "/monitor/endpoints",
            post(monitor::create_endpoint).get(monitor::list_endpoints),
        )
        .route("/monitor/endpoints/{id}", get(monitor::get_endpoint))
        .route("/monitor/endpoints/{id}/check", post(monitor::check_endpoint))
        .route("/monitor/overall-stats", get(monitor::overall_stats))
        // Catalogue
        .route(
            "/gitlab/services",
            post(pipeline::create_service).get(pipeline::list_services),
        )
        .route("/gitlab/services/{id}", get(pipeline::get_service))
        .route(
            "/gitlab/pipeline-units",
            post(pipeline::create_pipeline_unit).get(pipeline::list_pipeline_units),
        )
        .route("/gitlab/pipeline-units/{id}", get(pipeline::get_pipeline_unit))
        .route(
            "/gitlab/pipeline-units/{id}/trigger",
            post(pipeline::trigger_pipeline_unit),
        )
        // Approval workflow
        .route(
            "/gitlab/authorization-requests",
            get(pipeline::list_authorization_requests),
        )
        .route(
            "/gitlab/authorization-requests/{id}/approve",
            post(pipeline::approve_request),
        )
        .route(
            "/gitlab/authorization-requests/{id}/reject",
            post(pipeline::reject_request),
        )
        // Runs
        .route("/gitlab/pipeline-runs/history", get(pipeline::list_all_histories))
        .route("/gitlab/pipeline-runs/{id}/status", get(pipeline::get_run_status))
        .route("/gitlab/pipeline-runs/{id}/history", get(pipeline::list_run_history))
        .route("/gitlab/pipeline-status", get(pipeline::pipeline_status_overview))
        .route("/gitlab/pipeline-status/{id}", get(pipeline::get_run_details))
        // Realtime
        .route("/gitlab/ws/pipeline-runs/{id}", get(realtime::subscribe_run));

    Router::new()
        .nest("/api/v1", api)
        .with_state(state)
        .layer(cors_layer())
        .layer(TraceLayer::new_for_http())
}

/// Dashboards are served from other origins
fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
}

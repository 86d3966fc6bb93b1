//! API Error Handling
//!
//! Unified error types and conversion for API responses.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};

use crate::repository::RepositoryError;
use crate::service::{MonitorError, PipelineError};

/// API error type
#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Unauthorized(String),
    Conflict(String),
    BadGateway(String),
    Repository(RepositoryError),
    InternalError(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::BadGateway(msg) => {
                tracing::warn!("Upstream unavailable: {}", msg);
                (StatusCode::BAD_GATEWAY, msg)
            }
            ApiError::Repository(err) => {
                tracing::error!("Database error: {:?}", err);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
            ApiError::InternalError(msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };

        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

impl From<RepositoryError> for ApiError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound(what) => ApiError::NotFound(format!("{} not found", what)),
            RepositoryError::Conflict(msg) => ApiError::Conflict(msg),
            RepositoryError::Unavailable(msg) => ApiError::BadGateway(msg),
            other => ApiError::Repository(other),
        }
    }
}

impl From<MonitorError> for ApiError {
    fn from(err: MonitorError) -> Self {
        match err {
            MonitorError::Validation(msg) => ApiError::BadRequest(msg),
            MonitorError::NotFound(_) => ApiError::NotFound(err.to_string()),
            MonitorError::Conflict(msg) => ApiError::Conflict(msg),
            MonitorError::AlreadyRunning | MonitorError::NotRunning => {
                ApiError::Conflict(err.to_string())
            }
            MonitorError::Manifest { .. } => ApiError::InternalError(err.to_string()),
            MonitorError::Repository(err) => err.into(),
        }
    }
}

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::Validation(msg) => ApiError::BadRequest(msg),
            PipelineError::InvalidSelection(_) => ApiError::BadRequest(err.to_string()),
            PipelineError::NotFound { .. } => ApiError::NotFound(err.to_string()),
            PipelineError::NotPending(_) => ApiError::Conflict(err.to_string()),
            PipelineError::Conflict(msg) => ApiError::Conflict(msg),
            PipelineError::Repository(err) => err.into(),
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn status_of(err: impl Into<ApiError>) -> StatusCode {
        err.into().into_response().status()
    }

    #[test]
    fn test_service_errors_map_to_status_codes() {
        let id = Uuid::new_v4();
        assert_eq!(
            status_of(PipelineError::InvalidSelection(id)),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(status_of(PipelineError::NotPending(id)), StatusCode::CONFLICT);
        assert_eq!(
            status_of(PipelineError::NotFound {
                entity: "Pipeline run",
                id
            }),
            StatusCode::NOT_FOUND
        );
        assert_eq!(status_of(MonitorError::AlreadyRunning), StatusCode::CONFLICT);
        assert_eq!(status_of(MonitorError::NotFound(id)), StatusCode::NOT_FOUND);
        assert_eq!(
            status_of(RepositoryError::Unavailable("pool closed".to_string())),
            StatusCode::BAD_GATEWAY
        );
    }
}

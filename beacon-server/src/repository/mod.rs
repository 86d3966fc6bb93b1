//! Repository Module
//!
//! Persistence gateway of the server. Services depend on the traits defined
//! here; `postgres` implements them over sqlx and `memory` keeps everything in
//! process for tests and storage-less deployments.
//!
//! Both implementations honour the same atomicity contracts:
//! - a recorded check and its stats upsert happen as one unit
//! - a pipeline unit and its ordered dependency links are created together
//! - a run and its authorization request are created together
//! - an authorization decision only applies while the request is pending

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use beacon_core::domain::endpoint::{CheckOutcome, Endpoint, EndpointStats};
use beacon_core::domain::pipeline::{
    AuthorizationRequest, ExecutionHistory, PipelineRun, PipelineStatus, PipelineUnit,
};
use beacon_core::domain::service::Service;
use beacon_core::dto::endpoint::CreateEndpoint;
use beacon_core::dto::pipeline::CreateService;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

pub use memory::InMemoryStore;
pub use postgres::{PgEndpointRepository, PgPipelineRepository, PgUserDirectory};

/// Repository error type
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Database error: {0}")]
    Database(sqlx::Error),

    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

impl From<sqlx::Error> for RepositoryError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                RepositoryError::Conflict(db.message().to_string())
            }
            _ => RepositoryError::Database(err),
        }
    }
}

pub type Result<T> = std::result::Result<T, RepositoryError>;

// =============================================================================
// Endpoints
// =============================================================================

#[async_trait]
pub trait EndpointRepository: Send + Sync {
    /// Insert an endpoint unless one with the same identity exists.
    ///
    /// The request URL must already be normalized. Returns `None` when the
    /// identity tuple is already registered.
    async fn insert_endpoint(&self, req: &CreateEndpoint) -> Result<Option<Endpoint>>;

    async fn find_endpoint(&self, id: Uuid) -> Result<Option<Endpoint>>;

    async fn list_endpoints(&self) -> Result<Vec<Endpoint>>;

    /// Append the check log row and fold the outcome into the endpoint's
    /// stats with a single atomic upsert.
    async fn record_check(&self, outcome: &CheckOutcome) -> Result<EndpointStats>;

    async fn find_stats(&self, endpoint_id: Uuid) -> Result<Option<EndpointStats>>;

    async fn list_stats(&self) -> Result<Vec<EndpointStats>>;
}

// =============================================================================
// Pipelines
// =============================================================================

/// Approver decision applied to a pending authorization request
#[derive(Debug, Clone)]
pub struct AuthorizationResolution {
    pub request_id: Uuid,
    pub run_id: Uuid,
    pub approver_id: Uuid,
    /// Accepted or Rejected, applied to both the request and the run
    pub status: PipelineStatus,
    pub comment: Option<String>,
    /// History row written together with the decision
    pub history: ExecutionHistory,
}

/// Terminal write of an execution history row
#[derive(Debug, Clone)]
pub struct HistoryCompletion {
    pub status: PipelineStatus,
    pub completed_at: DateTime<Utc>,
    pub execution_time_ms: i64,
    pub error_message: Option<String>,
}

#[async_trait]
pub trait PipelineRepository: Send + Sync {
    /// Fails with `Conflict` when the repository reference is taken
    async fn create_service(&self, req: &CreateService) -> Result<Service>;

    async fn find_service(&self, id: Uuid) -> Result<Option<Service>>;

    async fn list_services(&self) -> Result<Vec<Service>>;

    /// Create a unit and its ordered dependency links atomically
    async fn create_pipeline_unit(
        &self,
        macro_service_id: Option<Uuid>,
        micro_service_ids: &[Uuid],
    ) -> Result<PipelineUnit>;

    async fn find_pipeline_unit(&self, id: Uuid) -> Result<Option<PipelineUnit>>;

    async fn list_pipeline_units(&self) -> Result<Vec<PipelineUnit>>;

    /// Create a pending run and its pending authorization request atomically
    async fn create_run_with_authorization(
        &self,
        pipeline_unit_id: Uuid,
        selected_micro_service_ids: &[Uuid],
        requester_id: Uuid,
    ) -> Result<(PipelineRun, AuthorizationRequest)>;

    async fn find_run(&self, id: Uuid) -> Result<Option<PipelineRun>>;

    async fn list_runs(&self) -> Result<Vec<PipelineRun>>;

    async fn set_run_status(&self, id: Uuid, status: PipelineStatus) -> Result<()>;

    async fn set_run_gitlab_pipeline(&self, id: Uuid, gitlab_pipeline_id: i64) -> Result<()>;

    async fn finish_run(&self, id: Uuid, status: PipelineStatus, execution_time_ms: i64)
    -> Result<()>;

    async fn find_authorization(&self, id: Uuid) -> Result<Option<AuthorizationRequest>>;

    async fn find_authorization_by_run(&self, run_id: Uuid)
    -> Result<Option<AuthorizationRequest>>;

    async fn list_authorizations(&self) -> Result<Vec<AuthorizationRequest>>;

    /// Apply a decision if and only if the request is still pending.
    ///
    /// Updates the request and the run and inserts the history row in one
    /// unit. Returns `false` and changes nothing when the request was no
    /// longer pending.
    async fn resolve_authorization(&self, resolution: &AuthorizationResolution) -> Result<bool>;

    async fn finish_history(&self, id: Uuid, completion: &HistoryCompletion) -> Result<()>;

    async fn list_history_for_run(&self, run_id: Uuid) -> Result<Vec<ExecutionHistory>>;

    async fn list_histories(&self) -> Result<Vec<ExecutionHistory>>;
}

// =============================================================================
// Users
// =============================================================================

/// Contact data of a user
#[derive(Debug, Clone, PartialEq)]
pub struct UserContact {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub delivery_email: Option<String>,
}

impl UserContact {
    /// Address notifications go to: the delivery address, else the account email
    pub fn delivery_address(&self) -> Option<&str> {
        self.delivery_email
            .as_deref()
            .filter(|addr| !addr.trim().is_empty())
            .or(Some(self.email.as_str()))
            .filter(|addr| !addr.trim().is_empty())
    }
}

/// Read access to the user store owned by the identity service
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn find_user(&self, id: Uuid) -> Result<Option<UserContact>>;
}

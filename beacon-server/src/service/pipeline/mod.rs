//! Pipeline Orchestration Service
//!
//! Catalogue of CI services and pipeline units, and the approval state
//! machine of pipeline runs:
//!
//! - `trigger` validates the selection and creates a pending run together
//!   with its authorization request
//! - `approve` applies the decision once and hands the run to a background
//!   execution chain (see [`execution`])
//! - `reject` closes the run with a terminal history row
//!
//! Every transition is broadcast as a status event and the requester is
//! notified on a best-effort basis.

pub mod catalog;
pub mod execution;
pub mod notify;
pub mod render;

use std::collections::HashSet;
use std::sync::Arc;

use beacon_core::domain::pipeline::{
    AuthorizationRequest, ExecutionHistory, PipelineRun, PipelineRunDetails, PipelineStatus,
    PipelineStatusOverview, PipelineUnit,
};
use beacon_core::domain::service::{Service, ServiceKind};
use beacon_core::dto::pipeline::{
    AuthorizationDecision, CreatePipelineUnit, CreateService, PipelineUnitView, TriggerPipelineUnit,
};
use chrono::Utc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::info;
use uuid::Uuid;

use crate::config::OrchestrationConfig;
use crate::gateway::{CiProvider, Notifier};
use crate::realtime::{EventSink, StatusBroadcaster};
use crate::repository::{AuthorizationResolution, PipelineRepository, RepositoryError, UserDirectory};

pub use catalog::RunCatalog;
pub use execution::StageError;
pub use notify::NotificationDispatcher;

/// Pipeline service error type
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("{0}")]
    Validation(String),

    #[error("Micro service {0} is not part of the pipeline unit")]
    InvalidSelection(Uuid),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: Uuid },

    #[error("Authorization request {0} is not pending")]
    NotPending(Uuid),

    #[error("{0}")]
    Conflict(String),

    #[error(transparent)]
    Repository(RepositoryError),
}

impl From<RepositoryError> for PipelineError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::Conflict(msg) => PipelineError::Conflict(msg),
            other => PipelineError::Repository(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;

fn not_found(entity: &'static str, id: Uuid) -> PipelineError {
    PipelineError::NotFound { entity, id }
}

#[derive(Clone)]
pub struct PipelineService {
    repo: Arc<dyn PipelineRepository>,
    ci: Arc<dyn CiProvider>,
    catalog: RunCatalog,
    broadcaster: StatusBroadcaster,
    notifications: NotificationDispatcher,
    config: OrchestrationConfig,
    /// Parent of every execution chain; cancelled on process shutdown
    shutdown: CancellationToken,
}

impl PipelineService {
    pub fn new(
        repo: Arc<dyn PipelineRepository>,
        users: Arc<dyn UserDirectory>,
        ci: Arc<dyn CiProvider>,
        notifier: Arc<dyn Notifier>,
        events: Arc<dyn EventSink>,
        config: OrchestrationConfig,
        shutdown: CancellationToken,
    ) -> Self {
        let catalog = RunCatalog::new(repo.clone(), users.clone());
        let broadcaster = StatusBroadcaster::new(
            events,
            Arc::new(catalog.clone()),
            config.persistence_timeout,
        );
        let notifications = NotificationDispatcher::new(notifier, repo.clone(), users, catalog.clone());

        Self {
            repo,
            ci,
            catalog,
            broadcaster,
            notifications,
            config,
            shutdown,
        }
    }

    // ===== Catalogue =====

    pub async fn create_service(&self, req: CreateService) -> Result<Service> {
        for (field, value) in [
            ("gitlab_repo_id", &req.gitlab_repo_id),
            ("name", &req.name),
            ("url", &req.url),
        ] {
            if value.trim().is_empty() {
                return Err(PipelineError::Validation(format!(
                    "Service {} cannot be empty",
                    field
                )));
            }
        }

        let service = self.repo.create_service(&req).await?;
        info!(service_id = %service.id, "Service registered: {} ({})", service.name, service.kind);
        Ok(service)
    }

    pub async fn get_service(&self, id: Uuid) -> Result<Service> {
        self.repo
            .find_service(id)
            .await?
            .ok_or_else(|| not_found("Service", id))
    }

    pub async fn list_services(&self) -> Result<Vec<Service>> {
        Ok(self.repo.list_services().await?)
    }

    pub async fn create_pipeline_unit(&self, req: CreatePipelineUnit) -> Result<PipelineUnitView> {
        if req.macro_service_id.is_none() && req.micro_service_ids.is_empty() {
            return Err(PipelineError::Validation(
                "Pipeline unit needs a macro service or at least one micro service".to_string(),
            ));
        }

        if let Some(id) = req.macro_service_id {
            let service = self.get_service(id).await?;
            if service.kind != ServiceKind::Macro {
                return Err(PipelineError::Validation(format!(
                    "Service {} is not a macro service",
                    service.name
                )));
            }
        }

        let mut seen = HashSet::new();
        for id in &req.micro_service_ids {
            if !seen.insert(*id) {
                return Err(PipelineError::Validation(format!(
                    "Micro service {} is listed more than once",
                    id
                )));
            }
            let service = self.get_service(*id).await?;
            if service.kind != ServiceKind::Micro {
                return Err(PipelineError::Validation(format!(
                    "Service {} is not a micro service",
                    service.name
                )));
            }
        }

        let unit = self
            .repo
            .create_pipeline_unit(req.macro_service_id, &req.micro_service_ids)
            .await?;
        info!(
            "Pipeline unit {} created with {} micro service(s)",
            unit.id,
            unit.micro_service_ids.len()
        );
        self.unit_view(unit).await
    }

    pub async fn get_pipeline_unit(&self, id: Uuid) -> Result<PipelineUnitView> {
        let unit = self.find_unit(id).await?;
        self.unit_view(unit).await
    }

    pub async fn list_pipeline_units(&self) -> Result<Vec<PipelineUnitView>> {
        let mut views = Vec::new();
        for unit in self.repo.list_pipeline_units().await? {
            views.push(self.unit_view(unit).await?);
        }
        Ok(views)
    }

    async fn unit_view(&self, unit: PipelineUnit) -> Result<PipelineUnitView> {
        let macro_service = match unit.macro_service_id {
            Some(id) => self.repo.find_service(id).await?,
            None => None,
        };
        let mut micro_services = Vec::with_capacity(unit.micro_service_ids.len());
        for id in &unit.micro_service_ids {
            if let Some(service) = self.repo.find_service(*id).await? {
                micro_services.push(service);
            }
        }

        Ok(PipelineUnitView {
            unit,
            macro_service,
            micro_services,
        })
    }

    async fn find_unit(&self, id: Uuid) -> Result<PipelineUnit> {
        self.repo
            .find_pipeline_unit(id)
            .await?
            .ok_or_else(|| not_found("Pipeline unit", id))
    }

    async fn find_run(&self, id: Uuid) -> Result<PipelineRun> {
        self.repo
            .find_run(id)
            .await?
            .ok_or_else(|| not_found("Pipeline run", id))
    }

    // ===== State machine =====

    /// Create a pending run of `unit_id` awaiting approval
    pub async fn trigger(
        &self,
        unit_id: Uuid,
        requester_id: Uuid,
        req: TriggerPipelineUnit,
    ) -> Result<PipelineRun> {
        let unit = self.find_unit(unit_id).await?;
        let selected = req.selected_micro_service_ids;

        if let Some(foreign) = unit.first_foreign(&selected) {
            tracing::warn!(
                "Rejected trigger of unit {}: micro service {} is not a dependency",
                unit_id,
                foreign
            );
            return Err(PipelineError::InvalidSelection(foreign));
        }

        let mut seen = HashSet::new();
        if let Some(dup) = selected.iter().find(|id| !seen.insert(**id)) {
            return Err(PipelineError::Validation(format!(
                "Micro service {} is selected more than once",
                dup
            )));
        }

        if unit.stage_order(&selected).is_empty() {
            return Err(PipelineError::Validation(
                "Nothing to run: select at least one micro service".to_string(),
            ));
        }

        let (run, request) = self
            .repo
            .create_run_with_authorization(unit_id, &selected, requester_id)
            .await?;
        info!(run_id = %run.id, "Pipeline unit {} triggered by {}", unit_id, requester_id);

        self.notifications
            .authorization_request(request.id, notify::SUBJECT_TRIGGERED);
        self.broadcaster
            .publish(
                run.id,
                PipelineStatus::Pending,
                "Pipeline execution triggered, awaiting approval",
            )
            .await;

        Ok(run)
    }

    /// Accept a pending request and start executing its run in the background
    pub async fn approve(
        &self,
        request_id: Uuid,
        approver_id: Uuid,
        decision: AuthorizationDecision,
    ) -> Result<PipelineRun> {
        let (request, run) = self.pending_request(request_id).await?;
        let unit = self.find_unit(run.pipeline_unit_id).await?;

        let history = self
            .history_for(&request, &run, &unit, approver_id, PipelineStatus::Running)
            .await?;
        let resolution = AuthorizationResolution {
            request_id,
            run_id: run.id,
            approver_id,
            status: PipelineStatus::Accepted,
            comment: non_empty(decision.comment),
            history: history.clone(),
        };
        if !self.repo.resolve_authorization(&resolution).await? {
            return Err(PipelineError::NotPending(request_id));
        }

        let run = PipelineRun {
            status: PipelineStatus::Accepted,
            approver_id: Some(approver_id),
            updated_at: Utc::now(),
            ..run
        };
        info!(run_id = %run.id, "Pipeline run approved by {}", approver_id);

        self.broadcaster
            .publish(run.id, PipelineStatus::Accepted, "Pipeline run approved")
            .await;
        self.notifications
            .authorization_request(request_id, notify::SUBJECT_APPROVED);

        self.spawn_execution(run.clone(), unit, history);
        Ok(run)
    }

    /// Close a pending request and its run without executing anything
    pub async fn reject(
        &self,
        request_id: Uuid,
        approver_id: Uuid,
        decision: AuthorizationDecision,
    ) -> Result<PipelineRun> {
        let (request, run) = self.pending_request(request_id).await?;
        let unit = self.find_unit(run.pipeline_unit_id).await?;
        let comment = non_empty(decision.comment);

        let mut history = self
            .history_for(&request, &run, &unit, approver_id, PipelineStatus::Rejected)
            .await?;
        history.completed_at = Some(history.started_at);
        history.execution_time_ms = Some(0);
        history.error_message = comment.clone();

        let resolution = AuthorizationResolution {
            request_id,
            run_id: run.id,
            approver_id,
            status: PipelineStatus::Rejected,
            comment: comment.clone(),
            history,
        };
        if !self.repo.resolve_authorization(&resolution).await? {
            return Err(PipelineError::NotPending(request_id));
        }

        let run = PipelineRun {
            status: PipelineStatus::Rejected,
            approver_id: Some(approver_id),
            updated_at: Utc::now(),
            ..run
        };
        info!(run_id = %run.id, "Pipeline run rejected by {}", approver_id);

        let message = format!("Pipeline run rejected: {}", comment.as_deref().unwrap_or(""));
        self.broadcaster
            .publish(run.id, PipelineStatus::Rejected, message.trim_end())
            .await;
        self.notifications
            .authorization_request(request_id, notify::SUBJECT_REJECTED);

        Ok(run)
    }

    /// Load a request that is still pending, together with its run
    async fn pending_request(&self, request_id: Uuid) -> Result<(AuthorizationRequest, PipelineRun)> {
        let request = self
            .repo
            .find_authorization(request_id)
            .await?
            .ok_or_else(|| not_found("Authorization request", request_id))?;
        if request.status != PipelineStatus::Pending {
            tracing::warn!(
                "Authorization request {} is already {}",
                request_id,
                request.status
            );
            return Err(PipelineError::NotPending(request_id));
        }

        let run = self.find_run(request.pipeline_run_id).await?;
        Ok((request, run))
    }

    async fn history_for(
        &self,
        request: &AuthorizationRequest,
        run: &PipelineRun,
        unit: &PipelineUnit,
        approver_id: Uuid,
        status: PipelineStatus,
    ) -> Result<ExecutionHistory> {
        let names = self
            .catalog
            .service_names(unit, &run.selected_micro_service_ids)
            .await?;

        Ok(ExecutionHistory {
            id: Uuid::new_v4(),
            pipeline_run_id: run.id,
            pipeline_unit_id: unit.id,
            requester_id: request.requester_id,
            requester_name: self.catalog.user_name(request.requester_id).await?,
            approver_id: Some(approver_id),
            approver_name: self.catalog.user_name(approver_id).await?,
            status,
            started_at: Utc::now(),
            completed_at: None,
            execution_time_ms: None,
            error_message: None,
            macro_service_name: names.macro_service,
            micro_service_names: names.micro_services,
        })
    }

    // ===== Queries =====

    pub async fn get_run_status(&self, run_id: Uuid) -> Result<PipelineStatus> {
        Ok(self.find_run(run_id).await?.status)
    }

    pub async fn get_run_details(&self, run_id: Uuid) -> Result<PipelineRunDetails> {
        let run = self.find_run(run_id).await?;
        Ok(self.catalog.details_for(&run).await?)
    }

    pub async fn status_overview(&self) -> Result<PipelineStatusOverview> {
        let mut details = Vec::new();
        for run in self.repo.list_runs().await? {
            details.push(self.catalog.details_for(&run).await?);
        }
        let overview = PipelineStatusOverview::from_runs(details);
        tracing::debug!(
            total = overview.total,
            running = overview.running.len(),
            pending = overview.pending.len(),
            "Pipeline statuses collected"
        );
        Ok(overview)
    }

    pub async fn list_run_history(&self, run_id: Uuid) -> Result<Vec<ExecutionHistory>> {
        self.find_run(run_id).await?;
        Ok(self.repo.list_history_for_run(run_id).await?)
    }

    pub async fn list_all_histories(&self) -> Result<Vec<ExecutionHistory>> {
        Ok(self.repo.list_histories().await?)
    }

    pub async fn list_authorization_requests(&self) -> Result<Vec<AuthorizationRequest>> {
        let mut requests = Vec::new();
        for request in self.repo.list_authorizations().await? {
            requests.push(self.catalog.enrich_authorization(request).await?);
        }
        Ok(requests)
    }
}

fn non_empty(comment: String) -> Option<String> {
    let trimmed = comment.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

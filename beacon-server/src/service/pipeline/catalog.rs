//! Display context for runs
//!
//! Resolves service and user names for runs, authorization requests and
//! status events. Every lookup is read-only.

use std::sync::Arc;

use async_trait::async_trait;
use beacon_core::domain::pipeline::{AuthorizationRequest, PipelineRun, PipelineRunDetails, PipelineUnit};
use uuid::Uuid;

use crate::realtime::RunContextSource;
use crate::repository::{PipelineRepository, RepositoryError, UserDirectory};

type Result<T> = std::result::Result<T, RepositoryError>;

/// Service names of a run: the macro, then the selected micros in unit order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServiceNames {
    pub macro_service: Option<String>,
    pub micro_services: Vec<String>,
}

#[derive(Clone)]
pub struct RunCatalog {
    repo: Arc<dyn PipelineRepository>,
    users: Arc<dyn UserDirectory>,
}

impl RunCatalog {
    pub fn new(repo: Arc<dyn PipelineRepository>, users: Arc<dyn UserDirectory>) -> Self {
        Self { repo, users }
    }

    pub async fn user_name(&self, id: Uuid) -> Result<Option<String>> {
        Ok(self.users.find_user(id).await?.map(|user| user.name))
    }

    pub async fn service_names(&self, unit: &PipelineUnit, selected: &[Uuid]) -> Result<ServiceNames> {
        let macro_service = match unit.macro_service_id {
            Some(id) => self.repo.find_service(id).await?.map(|s| s.name),
            None => None,
        };

        let mut micro_services = Vec::new();
        for id in unit.micro_service_ids.iter().filter(|id| selected.contains(id)) {
            if let Some(service) = self.repo.find_service(*id).await? {
                micro_services.push(service.name);
            }
        }

        Ok(ServiceNames {
            macro_service,
            micro_services,
        })
    }

    pub async fn details_for(&self, run: &PipelineRun) -> Result<PipelineRunDetails> {
        let names = match self.repo.find_pipeline_unit(run.pipeline_unit_id).await? {
            Some(unit) => self.service_names(&unit, &run.selected_micro_service_ids).await?,
            None => ServiceNames::default(),
        };

        let requester_name = match self.repo.find_authorization_by_run(run.id).await? {
            Some(request) => self.user_name(request.requester_id).await?,
            None => None,
        };
        let approver_name = match run.approver_id {
            Some(id) => self.user_name(id).await?,
            None => None,
        };

        Ok(PipelineRunDetails {
            id: run.id,
            pipeline_unit_id: run.pipeline_unit_id,
            status: run.status,
            macro_service_name: names.macro_service,
            micro_service_names: names.micro_services,
            requester_name,
            approver_name,
            gitlab_pipeline_id: run.gitlab_pipeline_id,
            created_at: run.created_at,
            updated_at: run.updated_at,
        })
    }

    /// Fill the display names of an authorization request
    pub async fn enrich_authorization(
        &self,
        mut request: AuthorizationRequest,
    ) -> Result<AuthorizationRequest> {
        request.requester_name = self.user_name(request.requester_id).await?;
        request.approver_name = match request.approver_id {
            Some(id) => self.user_name(id).await?,
            None => None,
        };

        if let Some(run) = self.repo.find_run(request.pipeline_run_id).await? {
            if let Some(unit) = self.repo.find_pipeline_unit(run.pipeline_unit_id).await? {
                let names = self
                    .service_names(&unit, &run.selected_micro_service_ids)
                    .await?;
                request.macro_service_name = names.macro_service;
                request.micro_service_names = names.micro_services;
            }
        }

        Ok(request)
    }
}

#[async_trait]
impl RunContextSource for RunCatalog {
    async fn run_details(&self, run_id: Uuid) -> Result<Option<PipelineRunDetails>> {
        match self.repo.find_run(run_id).await? {
            Some(run) => Ok(Some(self.details_for(&run).await?)),
            None => Ok(None),
        }
    }
}

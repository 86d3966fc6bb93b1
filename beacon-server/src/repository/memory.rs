//! In-memory persistence
//!
//! A single `InMemoryStore` implements every repository trait. All state sits
//! behind one async mutex, so each trait method is one critical section and
//! the atomicity contracts of the Postgres implementation hold trivially.
//! Only the newest `CHECK_LOG_CAPACITY` check-log rows are retained; stats
//! keep counting past that.

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use beacon_core::domain::endpoint::{CheckOutcome, Endpoint, EndpointStats};
use beacon_core::domain::pipeline::{
    AuthorizationRequest, ExecutionHistory, PipelineRun, PipelineStatus, PipelineUnit,
};
use beacon_core::domain::service::Service;
use beacon_core::dto::endpoint::CreateEndpoint;
use beacon_core::dto::pipeline::CreateService;
use chrono::Utc;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::repository::{
    AuthorizationResolution, EndpointRepository, HistoryCompletion, PipelineRepository,
    RepositoryError, Result, UserContact, UserDirectory,
};

/// Check-log rows kept in memory, across all endpoints
pub const CHECK_LOG_CAPACITY: usize = 10_000;

#[derive(Default)]
struct State {
    endpoints: Vec<Endpoint>,
    stats: HashMap<Uuid, EndpointStats>,
    checks: VecDeque<CheckOutcome>,
    services: Vec<Service>,
    units: Vec<PipelineUnit>,
    runs: Vec<PipelineRun>,
    authorizations: Vec<AuthorizationRequest>,
    histories: Vec<ExecutionHistory>,
    users: HashMap<Uuid, UserContact>,
}

/// Process-local store implementing every repository trait
#[derive(Default)]
pub struct InMemoryStore {
    state: Mutex<State>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a user; the identity service owns users in real deployments
    pub async fn add_user(&self, user: UserContact) {
        self.state.lock().await.users.insert(user.id, user);
    }

    /// Number of retained check-log rows of an endpoint, for inspection in tests
    pub async fn check_count(&self, endpoint_id: Uuid) -> usize {
        self.state
            .lock()
            .await
            .checks
            .iter()
            .filter(|c| c.endpoint_id == endpoint_id)
            .count()
    }
}

fn run_mut<'a>(state: &'a mut State, id: Uuid) -> Result<&'a mut PipelineRun> {
    state
        .runs
        .iter_mut()
        .find(|r| r.id == id)
        .ok_or_else(|| RepositoryError::NotFound(format!("Pipeline run {}", id)))
}

#[async_trait]
impl EndpointRepository for InMemoryStore {
    async fn insert_endpoint(&self, req: &CreateEndpoint) -> Result<Option<Endpoint>> {
        let mut state = self.state.lock().await;
        let key = req.key();
        if state.endpoints.iter().any(|e| e.key() == key) {
            return Ok(None);
        }

        let endpoint = Endpoint {
            id: Uuid::new_v4(),
            service_name: req.service_name.clone(),
            server_name: req.server_name.clone(),
            url: req.url.clone(),
            api_method: req.api_method.clone(),
            expected_status_code: req.expected_status_code,
            metadata: req.metadata.clone(),
            created_at: Utc::now(),
        };
        state.endpoints.push(endpoint.clone());
        Ok(Some(endpoint))
    }

    async fn find_endpoint(&self, id: Uuid) -> Result<Option<Endpoint>> {
        let state = self.state.lock().await;
        Ok(state.endpoints.iter().find(|e| e.id == id).cloned())
    }

    async fn list_endpoints(&self) -> Result<Vec<Endpoint>> {
        Ok(self.state.lock().await.endpoints.clone())
    }

    async fn record_check(&self, outcome: &CheckOutcome) -> Result<EndpointStats> {
        let mut state = self.state.lock().await;
        if !state.endpoints.iter().any(|e| e.id == outcome.endpoint_id) {
            return Err(RepositoryError::NotFound(format!(
                "Endpoint {}",
                outcome.endpoint_id
            )));
        }

        if state.checks.len() == CHECK_LOG_CAPACITY {
            state.checks.pop_front();
        }
        state.checks.push_back(outcome.clone());
        let stats = state
            .stats
            .entry(outcome.endpoint_id)
            .or_insert_with(|| EndpointStats::empty(outcome.endpoint_id));
        stats.apply(outcome);
        Ok(stats.clone())
    }

    async fn find_stats(&self, endpoint_id: Uuid) -> Result<Option<EndpointStats>> {
        Ok(self.state.lock().await.stats.get(&endpoint_id).cloned())
    }

    async fn list_stats(&self) -> Result<Vec<EndpointStats>> {
        Ok(self.state.lock().await.stats.values().cloned().collect())
    }
}

#[async_trait]
impl PipelineRepository for InMemoryStore {
    async fn create_service(&self, req: &CreateService) -> Result<Service> {
        let mut state = self.state.lock().await;
        let repo_id = req.gitlab_repo_id.trim();
        if state.services.iter().any(|s| s.gitlab_repo_id == repo_id) {
            return Err(RepositoryError::Conflict(format!(
                "repository {} is already registered",
                repo_id
            )));
        }

        let now = Utc::now();
        let service = Service {
            id: Uuid::new_v4(),
            gitlab_repo_id: repo_id.to_string(),
            name: req.name.trim().to_string(),
            url: req.url.trim().to_string(),
            kind: req.kind,
            created_at: now,
            updated_at: now,
        };
        state.services.push(service.clone());
        Ok(service)
    }

    async fn find_service(&self, id: Uuid) -> Result<Option<Service>> {
        let state = self.state.lock().await;
        Ok(state.services.iter().find(|s| s.id == id).cloned())
    }

    async fn list_services(&self) -> Result<Vec<Service>> {
        let mut services = self.state.lock().await.services.clone();
        services.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(services)
    }

    async fn create_pipeline_unit(
        &self,
        macro_service_id: Option<Uuid>,
        micro_service_ids: &[Uuid],
    ) -> Result<PipelineUnit> {
        let mut state = self.state.lock().await;
        let known = |id: &Uuid| state.services.iter().any(|s| s.id == *id);
        if let Some(missing) = macro_service_id
            .iter()
            .chain(micro_service_ids)
            .find(|id| !known(*id))
        {
            return Err(RepositoryError::NotFound(format!("Service {}", missing)));
        }

        let now = Utc::now();
        let unit = PipelineUnit {
            id: Uuid::new_v4(),
            macro_service_id,
            micro_service_ids: micro_service_ids.to_vec(),
            created_at: now,
            updated_at: now,
        };
        state.units.push(unit.clone());
        Ok(unit)
    }

    async fn find_pipeline_unit(&self, id: Uuid) -> Result<Option<PipelineUnit>> {
        let state = self.state.lock().await;
        Ok(state.units.iter().find(|u| u.id == id).cloned())
    }

    async fn list_pipeline_units(&self) -> Result<Vec<PipelineUnit>> {
        let state = self.state.lock().await;
        Ok(state.units.iter().rev().cloned().collect())
    }

    async fn create_run_with_authorization(
        &self,
        pipeline_unit_id: Uuid,
        selected_micro_service_ids: &[Uuid],
        requester_id: Uuid,
    ) -> Result<(PipelineRun, AuthorizationRequest)> {
        let mut state = self.state.lock().await;
        if !state.units.iter().any(|u| u.id == pipeline_unit_id) {
            return Err(RepositoryError::NotFound(format!(
                "Pipeline unit {}",
                pipeline_unit_id
            )));
        }

        let now = Utc::now();
        let run = PipelineRun {
            id: Uuid::new_v4(),
            pipeline_unit_id,
            status: PipelineStatus::Pending,
            selected_micro_service_ids: selected_micro_service_ids.to_vec(),
            gitlab_pipeline_id: None,
            approver_id: None,
            execution_time_ms: None,
            created_at: now,
            updated_at: now,
        };
        let request = AuthorizationRequest {
            id: Uuid::new_v4(),
            pipeline_run_id: run.id,
            requester_id,
            requester_name: None,
            approver_id: None,
            approver_name: None,
            status: PipelineStatus::Pending,
            comment: None,
            macro_service_name: None,
            micro_service_names: vec![],
            created_at: now,
            updated_at: now,
        };
        state.runs.push(run.clone());
        state.authorizations.push(request.clone());
        Ok((run, request))
    }

    async fn find_run(&self, id: Uuid) -> Result<Option<PipelineRun>> {
        let state = self.state.lock().await;
        Ok(state.runs.iter().find(|r| r.id == id).cloned())
    }

    async fn list_runs(&self) -> Result<Vec<PipelineRun>> {
        let state = self.state.lock().await;
        Ok(state.runs.iter().rev().cloned().collect())
    }

    async fn set_run_status(&self, id: Uuid, status: PipelineStatus) -> Result<()> {
        let mut state = self.state.lock().await;
        let run = run_mut(&mut state, id)?;
        run.status = status;
        run.updated_at = Utc::now();
        Ok(())
    }

    async fn set_run_gitlab_pipeline(&self, id: Uuid, gitlab_pipeline_id: i64) -> Result<()> {
        let mut state = self.state.lock().await;
        let run = run_mut(&mut state, id)?;
        run.gitlab_pipeline_id = Some(gitlab_pipeline_id);
        run.updated_at = Utc::now();
        Ok(())
    }

    async fn finish_run(
        &self,
        id: Uuid,
        status: PipelineStatus,
        execution_time_ms: i64,
    ) -> Result<()> {
        let mut state = self.state.lock().await;
        let run = run_mut(&mut state, id)?;
        run.status = status;
        run.execution_time_ms = Some(execution_time_ms);
        run.updated_at = Utc::now();
        Ok(())
    }

    async fn find_authorization(&self, id: Uuid) -> Result<Option<AuthorizationRequest>> {
        let state = self.state.lock().await;
        Ok(state.authorizations.iter().find(|a| a.id == id).cloned())
    }

    async fn find_authorization_by_run(
        &self,
        run_id: Uuid,
    ) -> Result<Option<AuthorizationRequest>> {
        let state = self.state.lock().await;
        Ok(state
            .authorizations
            .iter()
            .find(|a| a.pipeline_run_id == run_id)
            .cloned())
    }

    async fn list_authorizations(&self) -> Result<Vec<AuthorizationRequest>> {
        let state = self.state.lock().await;
        Ok(state.authorizations.iter().rev().cloned().collect())
    }

    async fn resolve_authorization(&self, resolution: &AuthorizationResolution) -> Result<bool> {
        let mut state = self.state.lock().await;
        let now = Utc::now();
        if !state.runs.iter().any(|r| r.id == resolution.run_id) {
            return Err(RepositoryError::NotFound(format!(
                "Pipeline run {}",
                resolution.run_id
            )));
        }

        let Some(request) = state
            .authorizations
            .iter_mut()
            .find(|a| a.id == resolution.request_id)
        else {
            return Err(RepositoryError::NotFound(format!(
                "Authorization request {}",
                resolution.request_id
            )));
        };
        if request.status != PipelineStatus::Pending {
            return Ok(false);
        }
        request.status = resolution.status;
        request.approver_id = Some(resolution.approver_id);
        request.comment = resolution.comment.clone();
        request.updated_at = now;

        let run = run_mut(&mut state, resolution.run_id)?;
        run.status = resolution.status;
        run.approver_id = Some(resolution.approver_id);
        run.updated_at = now;

        state.histories.push(resolution.history.clone());
        Ok(true)
    }

    async fn finish_history(&self, id: Uuid, completion: &HistoryCompletion) -> Result<()> {
        let mut state = self.state.lock().await;
        let history = state
            .histories
            .iter_mut()
            .find(|h| h.id == id)
            .ok_or_else(|| RepositoryError::NotFound(format!("Execution history {}", id)))?;
        history.status = completion.status;
        history.completed_at = Some(completion.completed_at);
        history.execution_time_ms = Some(completion.execution_time_ms);
        history.error_message = completion.error_message.clone();
        Ok(())
    }

    async fn list_history_for_run(&self, run_id: Uuid) -> Result<Vec<ExecutionHistory>> {
        let state = self.state.lock().await;
        Ok(state
            .histories
            .iter()
            .rev()
            .filter(|h| h.pipeline_run_id == run_id)
            .cloned()
            .collect())
    }

    async fn list_histories(&self) -> Result<Vec<ExecutionHistory>> {
        let state = self.state.lock().await;
        Ok(state.histories.iter().rev().cloned().collect())
    }
}

#[async_trait]
impl UserDirectory for InMemoryStore {
    async fn find_user(&self, id: Uuid) -> Result<Option<UserContact>> {
        Ok(self.state.lock().await.users.get(&id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use beacon_core::domain::endpoint::EndpointMetadata;
    use beacon_core::domain::service::ServiceKind;
    use std::sync::Arc;

    fn endpoint_request(url: &str) -> CreateEndpoint {
        CreateEndpoint {
            service_name: "billing".to_string(),
            server_name: "srv-1".to_string(),
            url: url.to_string(),
            api_method: "GET".to_string(),
            expected_status_code: 200,
            metadata: EndpointMetadata::default(),
        }
    }

    fn outcome(endpoint_id: Uuid, success: bool) -> CheckOutcome {
        CheckOutcome {
            endpoint_id,
            status_code: Some(if success { 200 } else { 500 }),
            latency_ms: 5,
            error: None,
            success,
            checked_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_insert_endpoint_skips_duplicate_identity() {
        let store = InMemoryStore::new();
        let first = store
            .insert_endpoint(&endpoint_request("http://billing/health"))
            .await
            .unwrap();
        assert!(first.is_some());

        let second = store
            .insert_endpoint(&endpoint_request("http://billing/health"))
            .await
            .unwrap();
        assert!(second.is_none());
        assert_eq!(store.list_endpoints().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_checks_lose_no_updates() {
        let store = Arc::new(InMemoryStore::new());
        let endpoint = store
            .insert_endpoint(&endpoint_request("http://billing/health"))
            .await
            .unwrap()
            .unwrap();

        let endpoint_id = endpoint.id;
        let tasks: Vec<_> = (0..50)
            .map(|i| {
                let store = store.clone();
                tokio::spawn(async move { store.record_check(&outcome(endpoint_id, i % 2 == 0)).await })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let stats = store.find_stats(endpoint_id).await.unwrap().unwrap();
        assert_eq!(stats.total_checks, 50);
        assert_eq!(stats.successful_checks, 25);
        assert_eq!(store.check_count(endpoint_id).await, 50);
    }

    #[tokio::test]
    async fn test_check_log_keeps_newest_rows_only() {
        let store = InMemoryStore::new();
        let endpoint = store
            .insert_endpoint(&endpoint_request("http://billing/health"))
            .await
            .unwrap()
            .unwrap();

        for _ in 0..CHECK_LOG_CAPACITY + 5 {
            store.record_check(&outcome(endpoint.id, true)).await.unwrap();
        }

        assert_eq!(store.check_count(endpoint.id).await, CHECK_LOG_CAPACITY);
        let stats = store.find_stats(endpoint.id).await.unwrap().unwrap();
        assert_eq!(stats.total_checks, (CHECK_LOG_CAPACITY + 5) as i64);
    }

    #[tokio::test]
    async fn test_record_check_for_unknown_endpoint_fails() {
        let store = InMemoryStore::new();
        let err = store.record_check(&outcome(Uuid::new_v4(), true)).await;
        assert!(matches!(err, Err(RepositoryError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_resolve_authorization_applies_once() {
        let store = InMemoryStore::new();
        let service = store
            .create_service(&CreateService {
                gitlab_repo_id: "1".to_string(),
                name: "api".to_string(),
                url: "http://git/api".to_string(),
                kind: ServiceKind::Micro,
            })
            .await
            .unwrap();
        let unit = store.create_pipeline_unit(None, &[service.id]).await.unwrap();
        let (run, request) = store
            .create_run_with_authorization(unit.id, &[service.id], Uuid::new_v4())
            .await
            .unwrap();

        let resolution = AuthorizationResolution {
            request_id: request.id,
            run_id: run.id,
            approver_id: Uuid::new_v4(),
            status: PipelineStatus::Accepted,
            comment: Some("ok".to_string()),
            history: ExecutionHistory {
                id: Uuid::new_v4(),
                pipeline_run_id: run.id,
                pipeline_unit_id: unit.id,
                requester_id: request.requester_id,
                requester_name: None,
                approver_id: None,
                approver_name: None,
                status: PipelineStatus::Running,
                started_at: Utc::now(),
                completed_at: None,
                execution_time_ms: None,
                error_message: None,
                macro_service_name: None,
                micro_service_names: vec![],
            },
        };

        assert!(store.resolve_authorization(&resolution).await.unwrap());
        assert!(!store.resolve_authorization(&resolution).await.unwrap());
        assert_eq!(store.list_history_for_run(run.id).await.unwrap().len(), 1);
        assert_eq!(
            store.find_run(run.id).await.unwrap().unwrap().status,
            PipelineStatus::Accepted
        );
    }

    #[tokio::test]
    async fn test_duplicate_repository_reference_conflicts() {
        let store = InMemoryStore::new();
        let req = CreateService {
            gitlab_repo_id: "group/app".to_string(),
            name: "app".to_string(),
            url: "http://git/app".to_string(),
            kind: ServiceKind::Macro,
        };
        store.create_service(&req).await.unwrap();
        let err = store.create_service(&req).await;
        assert!(matches!(err, Err(RepositoryError::Conflict(_))));
    }
}

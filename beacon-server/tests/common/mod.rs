//! Shared fakes for the integration tests

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use beacon_core::domain::pipeline::{
    AuthorizationRequest, ExecutionHistory, PipelineRun, PipelineStatus, PipelineUnit,
};
use beacon_core::domain::realtime::{RealtimeMessage, StatusChangePayload};
use beacon_core::domain::service::{Service, ServiceKind};
use beacon_core::dto::pipeline::{CreatePipelineUnit, CreateService, PipelineUnitView};
use beacon_server::config::OrchestrationConfig;
use beacon_server::gateway::{CiError, CiPipelineStatus, CiProvider, NotifyError, Notifier};
use beacon_server::realtime::EventSink;
use beacon_server::repository::{
    AuthorizationResolution, HistoryCompletion, InMemoryStore, PipelineRepository,
    RepositoryError, UserContact,
};
use beacon_server::service::PipelineService;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

// =============================================================================
// CI provider
// =============================================================================

/// A pipeline created through the fake provider
#[derive(Debug, Clone)]
pub struct CreatedPipeline {
    pub repo_ref: String,
    pub ref_name: String,
    pub variables: HashMap<String, String>,
    pub pipeline_id: i64,
}

#[derive(Default)]
struct CiState {
    next_id: i64,
    scripts: HashMap<String, VecDeque<CiPipelineStatus>>,
    refused: Vec<String>,
    unreachable: Vec<String>,
    created: Vec<CreatedPipeline>,
    log: Vec<String>,
}

/// CI provider answering status polls from per-repository scripts
///
/// Pipeline ids start at 42. A repository without a script succeeds on the
/// first poll; the last scripted status repeats forever.
pub struct FakeCi {
    state: Mutex<CiState>,
}

impl FakeCi {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(CiState {
                next_id: 42,
                ..Default::default()
            }),
        }
    }

    pub fn script(&self, repo_ref: &str, statuses: &[CiPipelineStatus]) {
        self.state
            .lock()
            .unwrap()
            .scripts
            .insert(repo_ref.to_string(), statuses.iter().copied().collect());
    }

    /// Make pipeline creation for `repo_ref` fail
    pub fn refuse(&self, repo_ref: &str) {
        self.state.lock().unwrap().refused.push(repo_ref.to_string());
    }

    /// Make status queries for `repo_ref` fail
    pub fn lose_status(&self, repo_ref: &str) {
        self.state
            .lock()
            .unwrap()
            .unreachable
            .push(repo_ref.to_string());
    }

    pub fn created(&self) -> Vec<CreatedPipeline> {
        self.state.lock().unwrap().created.clone()
    }

    pub fn created_refs(&self) -> Vec<String> {
        self.created().into_iter().map(|p| p.repo_ref).collect()
    }

    /// Every call in arrival order, as `create <repo>` or `status <repo> <status>`
    pub fn log(&self) -> Vec<String> {
        self.state.lock().unwrap().log.clone()
    }
}

#[async_trait]
impl CiProvider for FakeCi {
    async fn create_pipeline(
        &self,
        repo_ref: &str,
        ref_name: &str,
        variables: &HashMap<String, String>,
    ) -> Result<i64, CiError> {
        let mut state = self.state.lock().unwrap();
        state.log.push(format!("create {}", repo_ref));
        if state.refused.iter().any(|r| r == repo_ref) {
            return Err(CiError::Provider(format!("project {} not found", repo_ref)));
        }

        let pipeline_id = state.next_id;
        state.next_id += 1;
        state.created.push(CreatedPipeline {
            repo_ref: repo_ref.to_string(),
            ref_name: ref_name.to_string(),
            variables: variables.clone(),
            pipeline_id,
        });
        Ok(pipeline_id)
    }

    async fn pipeline_status(
        &self,
        repo_ref: &str,
        _pipeline_id: i64,
    ) -> Result<CiPipelineStatus, CiError> {
        let mut state = self.state.lock().unwrap();
        if state.unreachable.iter().any(|r| r == repo_ref) {
            state.log.push(format!("status {} error", repo_ref));
            return Err(CiError::Provider("502 Bad Gateway".to_string()));
        }
        let status = match state.scripts.get_mut(repo_ref) {
            Some(script) if script.len() > 1 => script.pop_front().unwrap(),
            Some(script) => script.front().copied().unwrap_or(CiPipelineStatus::Success),
            None => CiPipelineStatus::Success,
        };
        state.log.push(format!("status {} {}", repo_ref, status));
        Ok(status)
    }
}

// =============================================================================
// Storage with injected faults
// =============================================================================

#[derive(Default)]
struct Faults {
    service_outage_until: Option<Instant>,
    refuse_completion: bool,
}

/// Pipeline repository over an `InMemoryStore` that can be told to fail
pub struct FaultyStore {
    inner: Arc<InMemoryStore>,
    faults: Mutex<Faults>,
}

impl FaultyStore {
    pub fn new(inner: Arc<InMemoryStore>) -> Self {
        Self {
            inner,
            faults: Mutex::new(Faults::default()),
        }
    }

    /// Service lookups fail as if storage were down for `window`
    pub fn fail_service_lookups_for(&self, window: Duration) {
        self.faults.lock().unwrap().service_outage_until = Some(Instant::now() + window);
    }

    /// Writes that mark a run completed fail
    pub fn refuse_completion(&self) {
        self.faults.lock().unwrap().refuse_completion = true;
    }

    fn unavailable(what: &str) -> RepositoryError {
        RepositoryError::Unavailable(format!("{} failed", what))
    }
}

#[async_trait]
impl PipelineRepository for FaultyStore {
    async fn create_service(&self, req: &CreateService) -> Result<Service, RepositoryError> {
        self.inner.create_service(req).await
    }

    async fn find_service(&self, id: Uuid) -> Result<Option<Service>, RepositoryError> {
        let down = self
            .faults
            .lock()
            .unwrap()
            .service_outage_until
            .is_some_and(|until| Instant::now() < until);
        if down {
            return Err(Self::unavailable("service lookup"));
        }
        self.inner.find_service(id).await
    }

    async fn list_services(&self) -> Result<Vec<Service>, RepositoryError> {
        self.inner.list_services().await
    }

    async fn create_pipeline_unit(
        &self,
        macro_service_id: Option<Uuid>,
        micro_service_ids: &[Uuid],
    ) -> Result<PipelineUnit, RepositoryError> {
        self.inner
            .create_pipeline_unit(macro_service_id, micro_service_ids)
            .await
    }

    async fn find_pipeline_unit(&self, id: Uuid) -> Result<Option<PipelineUnit>, RepositoryError> {
        self.inner.find_pipeline_unit(id).await
    }

    async fn list_pipeline_units(&self) -> Result<Vec<PipelineUnit>, RepositoryError> {
        self.inner.list_pipeline_units().await
    }

    async fn create_run_with_authorization(
        &self,
        pipeline_unit_id: Uuid,
        selected_micro_service_ids: &[Uuid],
        requester_id: Uuid,
    ) -> Result<(PipelineRun, AuthorizationRequest), RepositoryError> {
        self.inner
            .create_run_with_authorization(pipeline_unit_id, selected_micro_service_ids, requester_id)
            .await
    }

    async fn find_run(&self, id: Uuid) -> Result<Option<PipelineRun>, RepositoryError> {
        self.inner.find_run(id).await
    }

    async fn list_runs(&self) -> Result<Vec<PipelineRun>, RepositoryError> {
        self.inner.list_runs().await
    }

    async fn set_run_status(&self, id: Uuid, status: PipelineStatus) -> Result<(), RepositoryError> {
        self.inner.set_run_status(id, status).await
    }

    async fn set_run_gitlab_pipeline(
        &self,
        id: Uuid,
        gitlab_pipeline_id: i64,
    ) -> Result<(), RepositoryError> {
        self.inner.set_run_gitlab_pipeline(id, gitlab_pipeline_id).await
    }

    async fn finish_run(
        &self,
        id: Uuid,
        status: PipelineStatus,
        execution_time_ms: i64,
    ) -> Result<(), RepositoryError> {
        if status == PipelineStatus::Completed && self.faults.lock().unwrap().refuse_completion {
            return Err(Self::unavailable("run completion"));
        }
        self.inner.finish_run(id, status, execution_time_ms).await
    }

    async fn find_authorization(
        &self,
        id: Uuid,
    ) -> Result<Option<AuthorizationRequest>, RepositoryError> {
        self.inner.find_authorization(id).await
    }

    async fn find_authorization_by_run(
        &self,
        run_id: Uuid,
    ) -> Result<Option<AuthorizationRequest>, RepositoryError> {
        self.inner.find_authorization_by_run(run_id).await
    }

    async fn list_authorizations(&self) -> Result<Vec<AuthorizationRequest>, RepositoryError> {
        self.inner.list_authorizations().await
    }

    async fn resolve_authorization(
        &self,
        resolution: &AuthorizationResolution,
    ) -> Result<bool, RepositoryError> {
        self.inner.resolve_authorization(resolution).await
    }

    async fn finish_history(
        &self,
        id: Uuid,
        completion: &HistoryCompletion,
    ) -> Result<(), RepositoryError> {
        self.inner.finish_history(id, completion).await
    }

    async fn list_history_for_run(
        &self,
        run_id: Uuid,
    ) -> Result<Vec<ExecutionHistory>, RepositoryError> {
        self.inner.list_history_for_run(run_id).await
    }

    async fn list_histories(&self) -> Result<Vec<ExecutionHistory>, RepositoryError> {
        self.inner.list_histories().await
    }
}

// =============================================================================
// Notifications and events
// =============================================================================

#[derive(Debug, Clone)]
pub struct SentNotification {
    pub subject: String,
    pub body: String,
    pub recipients: Vec<String>,
}

#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<SentNotification>>,
}

impl RecordingNotifier {
    pub fn sent(&self) -> Vec<SentNotification> {
        self.sent.lock().unwrap().clone()
    }

    pub fn subjects(&self) -> Vec<String> {
        self.sent().into_iter().map(|n| n.subject).collect()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send_html(
        &self,
        subject: &str,
        html_body: &str,
        recipients: &[String],
    ) -> Result<(), NotifyError> {
        if recipients.is_empty() {
            return Err(NotifyError::NoRecipients);
        }
        self.sent.lock().unwrap().push(SentNotification {
            subject: subject.to_string(),
            body: html_body.to_string(),
            recipients: recipients.to_vec(),
        });
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingSink {
    messages: Mutex<Vec<RealtimeMessage>>,
}

impl RecordingSink {
    pub fn messages(&self) -> Vec<RealtimeMessage> {
        self.messages.lock().unwrap().clone()
    }

    /// Decoded payloads of the events published for `run_id`
    pub fn payloads(&self, run_id: Uuid) -> Vec<StatusChangePayload> {
        self.messages()
            .into_iter()
            .filter(|m| m.id == run_id)
            .map(|m| serde_json::from_str(&m.payload).unwrap())
            .collect()
    }

    pub fn statuses(&self, run_id: Uuid) -> Vec<PipelineStatus> {
        self.payloads(run_id).into_iter().map(|p| p.status).collect()
    }
}

#[async_trait]
impl EventSink for RecordingSink {
    async fn publish(&self, message: RealtimeMessage) {
        self.messages.lock().unwrap().push(message);
    }
}

// =============================================================================
// Harness
// =============================================================================

pub const DEPLOY_ENV: &str = "QA";

pub fn orchestration_config() -> OrchestrationConfig {
    OrchestrationConfig {
        ci_ref: "development".to_string(),
        deploy_env: DEPLOY_ENV.to_string(),
        ..OrchestrationConfig::default()
    }
}

pub struct Harness {
    pub store: Arc<InMemoryStore>,
    pub faults: Arc<FaultyStore>,
    pub ci: Arc<FakeCi>,
    pub notifier: Arc<RecordingNotifier>,
    pub events: Arc<RecordingSink>,
    pub service: PipelineService,
    pub shutdown: CancellationToken,
    pub requester: UserContact,
    pub approver: UserContact,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_config(orchestration_config()).await
    }

    pub async fn with_config(config: OrchestrationConfig) -> Self {
        let store = Arc::new(InMemoryStore::new());
        let faults = Arc::new(FaultyStore::new(store.clone()));
        let ci = Arc::new(FakeCi::new());
        let notifier = Arc::new(RecordingNotifier::default());
        let events = Arc::new(RecordingSink::default());
        let shutdown = CancellationToken::new();

        let requester = UserContact {
            id: Uuid::new_v4(),
            name: "Ada Requester".to_string(),
            email: "ada@corp.example".to_string(),
            delivery_email: None,
        };
        let approver = UserContact {
            id: Uuid::new_v4(),
            name: "Grace Approver".to_string(),
            email: "grace@corp.example".to_string(),
            delivery_email: Some("releases@corp.example".to_string()),
        };
        store.add_user(requester.clone()).await;
        store.add_user(approver.clone()).await;

        let service = PipelineService::new(
            faults.clone(),
            store.clone(),
            ci.clone(),
            notifier.clone(),
            events.clone(),
            config,
            shutdown.clone(),
        );

        Self {
            store,
            faults,
            ci,
            notifier,
            events,
            service,
            shutdown,
            requester,
            approver,
        }
    }

    pub async fn service(&self, name: &str, kind: ServiceKind) -> Service {
        self.service
            .create_service(CreateService {
                gitlab_repo_id: format!("group/{}", name),
                name: name.to_string(),
                url: format!("https://git.example/group/{}", name),
                kind,
            })
            .await
            .unwrap()
    }

    pub async fn unit(&self, macro_service: Option<&Service>, micros: &[&Service]) -> PipelineUnitView {
        self.service
            .create_pipeline_unit(CreatePipelineUnit {
                macro_service_id: macro_service.map(|s| s.id),
                micro_service_ids: micros.iter().map(|s| s.id).collect(),
            })
            .await
            .unwrap()
    }

    pub async fn request_for(&self, run_id: Uuid) -> AuthorizationRequest {
        self.store
            .find_authorization_by_run(run_id)
            .await
            .unwrap()
            .expect("every run has an authorization request")
    }

    /// Wait, in one-second steps of virtual time, until the run reaches `status`
    pub async fn wait_for_run(&self, run_id: Uuid, status: PipelineStatus) {
        for _ in 0..10_000 {
            if self.service.get_run_status(run_id).await.unwrap() == status {
                // Let the chain finish publishing and notifying
                tokio::time::sleep(Duration::from_secs(1)).await;
                return;
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
        panic!("run {} never reached {}", run_id, status);
    }
}

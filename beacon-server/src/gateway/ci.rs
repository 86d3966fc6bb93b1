//! CI provider gateway

use std::collections::HashMap;

use async_trait::async_trait;
use beacon_gitlab::{ClientError, GitLabClient, PipelineState};
use thiserror::Error;

/// Status of an external pipeline as seen by the orchestrator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CiPipelineStatus {
    Pending,
    Running,
    Success,
    Failed,
    Canceled,
}

impl CiPipelineStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CiPipelineStatus::Pending => "pending",
            CiPipelineStatus::Running => "running",
            CiPipelineStatus::Success => "success",
            CiPipelineStatus::Failed => "failed",
            CiPipelineStatus::Canceled => "canceled",
        }
    }
}

impl std::fmt::Display for CiPipelineStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<PipelineState> for CiPipelineStatus {
    fn from(state: PipelineState) -> Self {
        match state {
            PipelineState::Running => CiPipelineStatus::Running,
            PipelineState::Success => CiPipelineStatus::Success,
            PipelineState::Failed => CiPipelineStatus::Failed,
            PipelineState::Canceled | PipelineState::Skipped => CiPipelineStatus::Canceled,
            PipelineState::Created
            | PipelineState::WaitingForResource
            | PipelineState::Preparing
            | PipelineState::Pending
            | PipelineState::Manual
            | PipelineState::Scheduled
            | PipelineState::Unknown => CiPipelineStatus::Pending,
        }
    }
}

#[derive(Debug, Error)]
pub enum CiError {
    #[error(transparent)]
    GitLab(#[from] ClientError),

    #[error("{0}")]
    Provider(String),
}

/// Capability to run pipelines on an external CI system
#[async_trait]
pub trait CiProvider: Send + Sync {
    /// Create a pipeline for `repo_ref` on `ref_name`, returning its external id
    async fn create_pipeline(
        &self,
        repo_ref: &str,
        ref_name: &str,
        variables: &HashMap<String, String>,
    ) -> Result<i64, CiError>;

    async fn pipeline_status(
        &self,
        repo_ref: &str,
        pipeline_id: i64,
    ) -> Result<CiPipelineStatus, CiError>;
}

/// GitLab-backed CI provider
#[derive(Debug, Clone)]
pub struct GitLabCiProvider {
    client: GitLabClient,
}

impl GitLabCiProvider {
    pub fn new(client: GitLabClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl CiProvider for GitLabCiProvider {
    async fn create_pipeline(
        &self,
        repo_ref: &str,
        ref_name: &str,
        variables: &HashMap<String, String>,
    ) -> Result<i64, CiError> {
        let pipeline = self
            .client
            .create_pipeline(repo_ref, ref_name, variables)
            .await?;
        tracing::info!(
            "Created GitLab pipeline {} for project {} ({})",
            pipeline.id,
            repo_ref,
            pipeline.web_url.as_deref().unwrap_or("no url")
        );
        Ok(pipeline.id)
    }

    async fn pipeline_status(
        &self,
        repo_ref: &str,
        pipeline_id: i64,
    ) -> Result<CiPipelineStatus, CiError> {
        let pipeline = self.client.get_pipeline(repo_ref, pipeline_id).await?;
        Ok(pipeline.status.into())
    }
}

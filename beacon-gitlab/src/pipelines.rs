//! Pipeline endpoints of the GitLab API

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{ClientError, Result};
use crate::{GitLabClient, TOKEN_HEADER};

/// Pipeline as returned by GitLab
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Pipeline {
    pub id: i64,
    pub status: PipelineState,
    #[serde(rename = "ref", default)]
    pub git_ref: Option<String>,
    #[serde(default)]
    pub web_url: Option<String>,
}

/// Pipeline status values reported by GitLab
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Created,
    WaitingForResource,
    Preparing,
    Pending,
    Running,
    Success,
    Failed,
    Canceled,
    Skipped,
    Manual,
    Scheduled,
    #[serde(other)]
    Unknown,
}

impl PipelineState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineState::Created => "created",
            PipelineState::WaitingForResource => "waiting_for_resource",
            PipelineState::Preparing => "preparing",
            PipelineState::Pending => "pending",
            PipelineState::Running => "running",
            PipelineState::Success => "success",
            PipelineState::Failed => "failed",
            PipelineState::Canceled => "canceled",
            PipelineState::Skipped => "skipped",
            PipelineState::Manual => "manual",
            PipelineState::Scheduled => "scheduled",
            PipelineState::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for PipelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Serialize)]
struct CreatePipelineBody<'a> {
    #[serde(rename = "ref")]
    git_ref: &'a str,
    variables: Vec<Variable<'a>>,
}

#[derive(Serialize)]
struct Variable<'a> {
    key: &'a str,
    value: &'a str,
}

impl GitLabClient {
    // =============================================================================
    // Pipelines
    // =============================================================================

    /// Create a pipeline for `project` on `git_ref`
    ///
    /// # Arguments
    /// * `project` - Numeric project id or full project path
    /// * `git_ref` - Branch or tag to run the pipeline on
    /// * `variables` - CI variables passed to the pipeline
    pub async fn create_pipeline(
        &self,
        project: &str,
        git_ref: &str,
        variables: &HashMap<String, String>,
    ) -> Result<Pipeline> {
        if project.trim().is_empty() {
            return Err(ClientError::InvalidRequest(
                "Project reference cannot be empty".to_string(),
            ));
        }

        let url = self.project_url(project, "pipeline");
        let mut variables: Vec<Variable> = variables
            .iter()
            .map(|(key, value)| Variable { key, value })
            .collect();
        variables.sort_by(|a, b| a.key.cmp(b.key));
        let body = CreatePipelineBody { git_ref, variables };

        tracing::debug!("Creating GitLab pipeline for project {} on {}", project, git_ref);

        let response = self
            .client
            .post(&url)
            .header(TOKEN_HEADER, &self.token)
            .json(&body)
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// Get a pipeline of `project` by id
    pub async fn get_pipeline(&self, project: &str, pipeline_id: i64) -> Result<Pipeline> {
        let url = self.project_url(project, &format!("pipelines/{}", pipeline_id));
        let response = self
            .client
            .get(&url)
            .header(TOKEN_HEADER, &self.token)
            .send()
            .await?;

        self.handle_response(response).await
    }
}

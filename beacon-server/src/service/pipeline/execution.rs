//! Background execution chain
//!
//! Runs the stages of an approved run strictly in order: the selected micro
//! services as declared by the unit, then the macro service. Each stage
//! creates a pipeline at the CI provider and waits for it to succeed before
//! the next one starts. Any failure ends the run as rejected.

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use beacon_core::domain::pipeline::{ExecutionHistory, PipelineRun, PipelineStatus, PipelineUnit};
use beacon_core::domain::service::Service;
use chrono::Utc;
use thiserror::Error;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::gateway::{CiError, CiPipelineStatus};
use crate::repository::{HistoryCompletion, RepositoryError};
use crate::service::pipeline::{PipelineService, notify};
use crate::service::retry::{PollError, RetryError, RetryPolicy, poll_until, retry_with_backoff};

/// Variable handed to the last stage only
pub const DEPLOY_ENV_VARIABLE: &str = "DEPLOY_ENV";

/// Reasons an execution chain ends early
///
/// All of them leave the run rejected; the message is stored as the
/// history's error.
#[derive(Debug, Error)]
pub enum StageError {
    #[error("Failed to load service {service_id}: {cause}")]
    FetchFailed { service_id: Uuid, cause: String },

    #[error("Service {service} pipeline could not be created: {cause}")]
    TriggerFailed { service: String, cause: CiError },

    #[error("Service {service} pipeline status unavailable: {cause}")]
    StatusQueryFailed { service: String, cause: CiError },

    #[error("Service {service} pipeline timed out after {after:?}")]
    PollTimeout { service: String, after: Duration },

    #[error("Service {service} pipeline failed with status {status}")]
    PollFailed {
        service: String,
        status: CiPipelineStatus,
    },

    #[error("Failed to persist run state: {0}")]
    PersistFailed(String),

    #[error("Execution exceeded {0:?}")]
    ExecutionTimeout(Duration),

    #[error("Execution cancelled by shutdown")]
    Cancelled,
}

impl PipelineService {
    /// Run the chain of an accepted run on its own task.
    ///
    /// The task is bounded by the execution timeout and only stops early on
    /// process shutdown.
    pub(super) fn spawn_execution(
        &self,
        run: PipelineRun,
        unit: PipelineUnit,
        history: ExecutionHistory,
    ) {
        let service = self.clone();
        let cancel = self.shutdown.child_token();
        let ceiling = self.config.execution_timeout;

        tokio::spawn(async move {
            info!(run_id = %run.id, "Pipeline execution started");

            let outcome = tokio::select! {
                _ = cancel.cancelled() => Err(StageError::Cancelled),
                result = time::timeout(ceiling, service.run_stages(&run, &unit, &cancel)) => {
                    result.unwrap_or(Err(StageError::ExecutionTimeout(ceiling)))
                }
            };

            match outcome {
                Ok(()) => service.complete_run(&run, &history).await,
                Err(e) => service.fail_run(&run, &history, e).await,
            }
        });
    }

    async fn run_stages(
        &self,
        run: &PipelineRun,
        unit: &PipelineUnit,
        cancel: &CancellationToken,
    ) -> Result<(), StageError> {
        let stage_ids = unit.stage_order(&run.selected_micro_service_ids);
        let stages = self.fetch_stages(&stage_ids, cancel).await?;

        self.persist(self.repo.set_run_status(run.id, PipelineStatus::Running))
            .await?;
        self.broadcaster
            .publish(
                run.id,
                PipelineStatus::Running,
                "Pipeline run approved and execution started",
            )
            .await;

        for (index, stage) in stages.iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(StageError::Cancelled);
            }

            self.broadcaster
                .publish(
                    run.id,
                    PipelineStatus::Running,
                    &format!("Starting pipeline for service {}", stage.name),
                )
                .await;

            let mut variables = HashMap::new();
            if index + 1 == stages.len() {
                variables.insert(
                    DEPLOY_ENV_VARIABLE.to_string(),
                    self.config.deploy_env.clone(),
                );
            }

            let pipeline_id = self
                .ci
                .create_pipeline(&stage.gitlab_repo_id, &self.config.ci_ref, &variables)
                .await
                .map_err(|cause| StageError::TriggerFailed {
                    service: stage.name.clone(),
                    cause,
                })?;
            info!(
                run_id = %run.id,
                service_id = %stage.id,
                "Stage {}/{} ({}) running as CI pipeline {}",
                index + 1,
                stages.len(),
                stage.name,
                pipeline_id
            );

            self.persist(self.repo.set_run_gitlab_pipeline(run.id, pipeline_id))
                .await?;
            self.await_stage(stage, pipeline_id, cancel).await?;
        }

        Ok(())
    }

    /// Load every stage service, retrying the whole lookup with backoff
    async fn fetch_stages(
        &self,
        ids: &[Uuid],
        cancel: &CancellationToken,
    ) -> Result<Vec<Service>, StageError> {
        let policy = RetryPolicy {
            max_retries: self.config.fetch_max_retries,
            base_delay: self.config.fetch_retry_base_delay,
        };

        retry_with_backoff(policy, cancel, "Loading stage services", |_| {
            self.fetch_stages_once(ids)
        })
        .await
        .map_err(|e| match e {
            RetryError::Exhausted { attempts, last } => {
                warn!("Giving up on stage services after {} attempt(s)", attempts);
                last
            }
            RetryError::Cancelled => StageError::Cancelled,
        })
    }

    async fn fetch_stages_once(&self, ids: &[Uuid]) -> Result<Vec<Service>, StageError> {
        let mut services = Vec::with_capacity(ids.len());
        for &service_id in ids {
            let lookup = time::timeout(self.config.fetch_timeout, self.repo.find_service(service_id));
            let service = match lookup.await {
                Ok(Ok(Some(service))) => service,
                Ok(Ok(None)) => {
                    return Err(StageError::FetchFailed {
                        service_id,
                        cause: "not found".to_string(),
                    });
                }
                Ok(Err(e)) => {
                    return Err(StageError::FetchFailed {
                        service_id,
                        cause: e.to_string(),
                    });
                }
                Err(_) => {
                    return Err(StageError::FetchFailed {
                        service_id,
                        cause: format!("lookup timed out after {:?}", self.config.fetch_timeout),
                    });
                }
            };
            services.push(service);
        }
        Ok(services)
    }

    /// Poll the stage pipeline until it reaches a terminal status
    async fn await_stage(
        &self,
        stage: &Service,
        pipeline_id: i64,
        cancel: &CancellationToken,
    ) -> Result<(), StageError> {
        let outcome = poll_until(
            self.config.poll_interval,
            self.config.poll_timeout,
            cancel,
            || async move {
                let status = self
                    .ci
                    .pipeline_status(&stage.gitlab_repo_id, pipeline_id)
                    .await?;
                Ok::<_, CiError>(match status {
                    CiPipelineStatus::Success => Some(Ok(())),
                    CiPipelineStatus::Failed | CiPipelineStatus::Canceled => Some(Err(status)),
                    CiPipelineStatus::Pending | CiPipelineStatus::Running => None,
                })
            },
        )
        .await;

        match outcome {
            Ok(Ok(())) => Ok(()),
            Ok(Err(status)) => Err(StageError::PollFailed {
                service: stage.name.clone(),
                status,
            }),
            Err(PollError::TimedOut) => Err(StageError::PollTimeout {
                service: stage.name.clone(),
                after: self.config.poll_timeout,
            }),
            Err(PollError::Failed(cause)) => Err(StageError::StatusQueryFailed {
                service: stage.name.clone(),
                cause,
            }),
            Err(PollError::Cancelled) => Err(StageError::Cancelled),
        }
    }

    async fn persist<T>(
        &self,
        write: impl Future<Output = Result<T, RepositoryError>>,
    ) -> Result<T, StageError> {
        match time::timeout(self.config.persistence_timeout, write).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(StageError::PersistFailed(e.to_string())),
            Err(_) => Err(StageError::PersistFailed(format!(
                "write timed out after {:?}",
                self.config.persistence_timeout
            ))),
        }
    }

    /// Mark the run completed, then its history.
    ///
    /// The run row is written first; if that fails the run goes down the
    /// failure path so the run, its history and the broadcast agree.
    async fn complete_run(&self, run: &PipelineRun, history: &ExecutionHistory) {
        let execution_time_ms = elapsed_ms(history);

        if let Err(e) = self
            .persist(self.repo.finish_run(run.id, PipelineStatus::Completed, execution_time_ms))
            .await
        {
            error!(run_id = %run.id, "Failed to mark pipeline run completed: {}", e);
            self.fail_run(run, history, e).await;
            return;
        }

        let completion = HistoryCompletion {
            status: PipelineStatus::Completed,
            completed_at: Utc::now(),
            execution_time_ms,
            error_message: None,
        };
        if let Err(e) = self
            .persist(self.repo.finish_history(history.id, &completion))
            .await
        {
            error!(run_id = %run.id, "Failed to complete execution history: {}", e);
        }

        info!(run_id = %run.id, execution_time_ms, "Pipeline run completed");
        self.broadcaster
            .publish(
                run.id,
                PipelineStatus::Completed,
                "Pipeline run completed successfully",
            )
            .await;
        self.notifications
            .execution_history(run.id, history.id, notify::SUBJECT_COMPLETED);
    }

    async fn fail_run(&self, run: &PipelineRun, history: &ExecutionHistory, failure: StageError) {
        let message = failure.to_string();
        error!(run_id = %run.id, "Pipeline execution failed: {}", message);

        let completion = HistoryCompletion {
            status: PipelineStatus::Rejected,
            completed_at: Utc::now(),
            execution_time_ms: elapsed_ms(history),
            error_message: Some(message.clone()),
        };

        if let Err(e) = self
            .persist(self.repo.finish_history(history.id, &completion))
            .await
        {
            error!(run_id = %run.id, "Failed to record failed execution: {}", e);
        }
        if let Err(e) = self
            .persist(self.repo.finish_run(
                run.id,
                PipelineStatus::Rejected,
                completion.execution_time_ms,
            ))
            .await
        {
            error!(run_id = %run.id, "Failed to mark pipeline run rejected: {}", e);
        }

        self.broadcaster
            .publish(
                run.id,
                PipelineStatus::Rejected,
                &format!("Pipeline execution failed: {}", message),
            )
            .await;
        self.notifications
            .execution_history(run.id, history.id, notify::SUBJECT_FAILED);
    }
}

fn elapsed_ms(history: &ExecutionHistory) -> i64 {
    (Utc::now() - history.started_at).num_milliseconds().max(0)
}

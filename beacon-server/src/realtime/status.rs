//! Pipeline status broadcasting
//!
//! Every run state transition is published as a `pipeline_status_change`
//! event. The event carries the unit, service and user names of the run when
//! they can be looked up; otherwise the bare transition is sent.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use beacon_core::domain::pipeline::{PipelineRunDetails, PipelineStatus};
use beacon_core::domain::realtime::{PIPELINE_STATUS_CHANGE, RealtimeMessage, StatusChangePayload};
use chrono::Utc;
use uuid::Uuid;

use crate::realtime::hub::EventSink;
use crate::repository::RepositoryError;

/// Source of run context used to enrich events
#[async_trait]
pub trait RunContextSource: Send + Sync {
    async fn run_details(&self, run_id: Uuid) -> Result<Option<PipelineRunDetails>, RepositoryError>;
}

#[derive(Clone)]
pub struct StatusBroadcaster {
    sink: Arc<dyn EventSink>,
    context: Arc<dyn RunContextSource>,
    enrich_timeout: Duration,
}

impl StatusBroadcaster {
    pub fn new(
        sink: Arc<dyn EventSink>,
        context: Arc<dyn RunContextSource>,
        enrich_timeout: Duration,
    ) -> Self {
        Self {
            sink,
            context,
            enrich_timeout,
        }
    }

    /// Publish a transition of `run_id`; never fails
    pub async fn publish(&self, run_id: Uuid, status: PipelineStatus, message: &str) {
        let payload = self.payload(run_id, status, message).await;

        let payload = match serde_json::to_string(&payload) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!("Failed to encode status payload for run {}: {}", run_id, e);
                return;
            }
        };

        self.sink
            .publish(RealtimeMessage {
                kind: PIPELINE_STATUS_CHANGE.to_string(),
                id: run_id,
                payload,
                timestamp: Utc::now(),
            })
            .await;
    }

    async fn payload(&self, run_id: Uuid, status: PipelineStatus, message: &str) -> StatusChangePayload {
        let basic = StatusChangePayload::basic(run_id, status, message);

        match tokio::time::timeout(self.enrich_timeout, self.context.run_details(run_id)).await {
            Ok(Ok(Some(details))) => basic.enriched(details),
            Ok(Ok(None)) => {
                tracing::warn!("Run {} not found while enriching status event", run_id);
                basic
            }
            Ok(Err(e)) => {
                tracing::warn!("Failed to enrich status event for run {}: {}", run_id, e);
                basic
            }
            Err(_) => {
                tracing::warn!("Timed out enriching status event for run {}", run_id);
                basic
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        messages: Mutex<Vec<RealtimeMessage>>,
    }

    #[async_trait]
    impl EventSink for RecordingSink {
        async fn publish(&self, message: RealtimeMessage) {
            self.messages.lock().await.push(message);
        }
    }

    struct FixedContext(Result<Option<PipelineRunDetails>, ()>);

    #[async_trait]
    impl RunContextSource for FixedContext {
        async fn run_details(
            &self,
            _run_id: Uuid,
        ) -> Result<Option<PipelineRunDetails>, RepositoryError> {
            self.0
                .clone()
                .map_err(|_| RepositoryError::Unavailable("down".to_string()))
        }
    }

    fn details(run_id: Uuid) -> PipelineRunDetails {
        PipelineRunDetails {
            id: run_id,
            pipeline_unit_id: Uuid::new_v4(),
            status: PipelineStatus::Accepted,
            macro_service_name: Some("platform".to_string()),
            micro_service_names: vec!["billing".to_string()],
            requester_name: Some("Ada".to_string()),
            approver_name: Some("Grace".to_string()),
            gitlab_pipeline_id: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    async fn publish_with(context: FixedContext) -> StatusChangePayload {
        let sink = Arc::new(RecordingSink::default());
        let broadcaster =
            StatusBroadcaster::new(sink.clone(), Arc::new(context), Duration::from_secs(1));
        let run_id = Uuid::new_v4();

        broadcaster
            .publish(run_id, PipelineStatus::Accepted, "Pipeline run approved")
            .await;

        let messages = sink.messages.lock().await;
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].id, run_id);
        assert_eq!(messages[0].kind, PIPELINE_STATUS_CHANGE);
        serde_json::from_str(&messages[0].payload).unwrap()
    }

    #[tokio::test]
    async fn test_event_is_enriched_with_run_context() {
        let payload = publish_with(FixedContext(Ok(Some(details(Uuid::nil()))))).await;
        assert!(payload.is_enriched());
        assert_eq!(payload.requester_name.as_deref(), Some("Ada"));
        assert_eq!(payload.micro_service_names, Some(vec!["billing".to_string()]));
        assert_eq!(payload.message, "Pipeline run approved");
    }

    #[tokio::test]
    async fn test_lookup_failure_falls_back_to_bare_event() {
        let payload = publish_with(FixedContext(Err(()))).await;
        assert!(!payload.is_enriched());
        assert_eq!(payload.status, PipelineStatus::Accepted);
        assert_eq!(payload.message, "Pipeline run approved");
    }
}

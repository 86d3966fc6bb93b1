//! Realtime message types
//!
//! Envelopes pushed to websocket subscribers. The payload is a JSON document
//! encoded as a string so the envelope shape stays fixed for every event type.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::pipeline::{PipelineRunDetails, PipelineStatus};

/// Event type emitted for every run state transition
pub const PIPELINE_STATUS_CHANGE: &str = "pipeline_status_change";

/// Envelope delivered to every subscriber of an entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RealtimeMessage {
    #[serde(rename = "type")]
    pub kind: String,
    /// Subscription key, the pipeline run id
    pub id: Uuid,
    /// JSON-encoded payload
    pub payload: String,
    pub timestamp: DateTime<Utc>,
}

/// Payload of a `pipeline_status_change` event
///
/// The context fields are present only when the run could be enriched with
/// its unit, service and user names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusChangePayload {
    #[serde(rename = "type")]
    pub kind: String,
    pub pipeline_run_id: Uuid,
    pub status: PipelineStatus,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pipeline_unit_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub macro_service_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub micro_service_names: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requester_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approver_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pipeline_info: Option<PipelineRunDetails>,
}

impl StatusChangePayload {
    /// Bare payload carrying only the transition
    pub fn basic(pipeline_run_id: Uuid, status: PipelineStatus, message: impl Into<String>) -> Self {
        Self {
            kind: PIPELINE_STATUS_CHANGE.to_string(),
            pipeline_run_id,
            status,
            message: message.into(),
            timestamp: Utc::now(),
            pipeline_unit_id: None,
            macro_service_name: None,
            micro_service_names: None,
            requester_name: None,
            approver_name: None,
            pipeline_info: None,
        }
    }

    /// Attach run context to the payload
    pub fn enriched(mut self, details: PipelineRunDetails) -> Self {
        self.pipeline_unit_id = Some(details.pipeline_unit_id);
        self.macro_service_name = details.macro_service_name.clone();
        self.micro_service_names = Some(details.micro_service_names.clone());
        self.requester_name = details.requester_name.clone();
        self.approver_name = details.approver_name.clone();
        self.pipeline_info = Some(details);
        self
    }

    pub fn is_enriched(&self) -> bool {
        self.pipeline_info.is_some()
    }
}

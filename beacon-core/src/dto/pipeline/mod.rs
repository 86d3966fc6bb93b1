//! Pipeline DTOs

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::pipeline::PipelineUnit;
use crate::domain::service::{Service, ServiceKind};

/// Request to register a CI service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateService {
    pub gitlab_repo_id: String,
    pub name: String,
    pub url: String,
    #[serde(rename = "type")]
    pub kind: ServiceKind,
}

/// Request to define a pipeline unit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatePipelineUnit {
    pub macro_service_id: Option<Uuid>,
    /// Execution order of the micro services
    #[serde(default)]
    pub micro_service_ids: Vec<Uuid>,
}

/// Request to trigger a run of a pipeline unit
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TriggerPipelineUnit {
    #[serde(default)]
    pub selected_micro_service_ids: Vec<Uuid>,
}

/// Approver decision on an authorization request
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthorizationDecision {
    #[serde(default)]
    pub comment: String,
}

/// Pipeline unit with its services resolved
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineUnitView {
    #[serde(flatten)]
    pub unit: PipelineUnit,
    pub macro_service: Option<Service>,
    /// In the unit's declared order
    pub micro_services: Vec<Service>,
}

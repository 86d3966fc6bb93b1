//! Pipeline orchestration domain types
//!
//! A pipeline unit groups an ordered list of micro services with an optional
//! macro service. Each trigger of a unit creates a run that moves through
//! the approval state machine:
//!
//! ```text
//! Pending --approve--> Accepted --execute--> Running --all stages ok--> Completed
//!    |                                          |
//!    +--reject--> Rejected <----stage failure---+
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

/// Status shared by pipeline runs, authorization requests and execution history
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineStatus {
    Pending,
    Accepted,
    Rejected,
    Running,
    Completed,
}

impl PipelineStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineStatus::Pending => "pending",
            PipelineStatus::Accepted => "accepted",
            PipelineStatus::Rejected => "rejected",
            PipelineStatus::Running => "running",
            PipelineStatus::Completed => "completed",
        }
    }
}

impl std::fmt::Display for PipelineStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PipelineStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(PipelineStatus::Pending),
            "accepted" => Ok(PipelineStatus::Accepted),
            "rejected" => Ok(PipelineStatus::Rejected),
            "running" => Ok(PipelineStatus::Running),
            "completed" => Ok(PipelineStatus::Completed),
            other => Err(format!("unknown pipeline status: {}", other)),
        }
    }
}

/// A macro service and its ordered micro service dependencies
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineUnit {
    pub id: Uuid,
    pub macro_service_id: Option<Uuid>,
    /// Execution order of the micro services
    pub micro_service_ids: Vec<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PipelineUnit {
    /// Ordered stage list for a selection: selected micros, then the macro.
    ///
    /// Selected ids keep the order in which the unit declares them.
    pub fn stage_order(&self, selected: &[Uuid]) -> Vec<Uuid> {
        let mut stages: Vec<Uuid> = self
            .micro_service_ids
            .iter()
            .filter(|id| selected.contains(id))
            .copied()
            .collect();
        stages.extend(self.macro_service_id);
        stages
    }

    /// First selected id that is not a declared dependency of this unit
    pub fn first_foreign(&self, selected: &[Uuid]) -> Option<Uuid> {
        selected
            .iter()
            .find(|id| !self.micro_service_ids.contains(id))
            .copied()
    }
}

/// One trigger of a pipeline unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineRun {
    pub id: Uuid,
    pub pipeline_unit_id: Uuid,
    pub status: PipelineStatus,
    pub selected_micro_service_ids: Vec<Uuid>,
    /// Id of the most recent pipeline created at the CI provider
    pub gitlab_pipeline_id: Option<i64>,
    pub approver_id: Option<Uuid>,
    /// Wall-clock execution time in milliseconds
    pub execution_time_ms: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Approval gate bound 1:1 to a pipeline run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthorizationRequest {
    pub id: Uuid,
    pub pipeline_run_id: Uuid,
    pub requester_id: Uuid,
    pub requester_name: Option<String>,
    pub approver_id: Option<Uuid>,
    pub approver_name: Option<String>,
    pub status: PipelineStatus,
    pub comment: Option<String>,
    pub macro_service_name: Option<String>,
    #[serde(default)]
    pub micro_service_names: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Execution record of a run, created at approval or rejection time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionHistory {
    pub id: Uuid,
    pub pipeline_run_id: Uuid,
    pub pipeline_unit_id: Uuid,
    pub requester_id: Uuid,
    pub requester_name: Option<String>,
    pub approver_id: Option<Uuid>,
    pub approver_name: Option<String>,
    pub status: PipelineStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub execution_time_ms: Option<i64>,
    pub error_message: Option<String>,
    pub macro_service_name: Option<String>,
    #[serde(default)]
    pub micro_service_names: Vec<String>,
}

/// Run enriched with display names, used for status views and broadcasts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineRunDetails {
    pub id: Uuid,
    pub pipeline_unit_id: Uuid,
    pub status: PipelineStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub macro_service_name: Option<String>,
    pub micro_service_names: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requester_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approver_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gitlab_pipeline_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Runs grouped by lifecycle bucket
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineStatusOverview {
    pub running: Vec<PipelineRunDetails>,
    pub pending: Vec<PipelineRunDetails>,
    /// Completed runs and accepted runs that have not started yet
    pub completed: Vec<PipelineRunDetails>,
    pub failed: Vec<PipelineRunDetails>,
    pub total: usize,
}

impl PipelineStatusOverview {
    pub fn from_runs(runs: impl IntoIterator<Item = PipelineRunDetails>) -> Self {
        let mut overview = Self::default();
        for run in runs {
            overview.total += 1;
            match run.status {
                PipelineStatus::Running => overview.running.push(run),
                PipelineStatus::Pending => overview.pending.push(run),
                PipelineStatus::Completed | PipelineStatus::Accepted => {
                    overview.completed.push(run)
                }
                PipelineStatus::Rejected => overview.failed.push(run),
            }
        }
        overview
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(micros: Vec<Uuid>, macro_id: Option<Uuid>) -> PipelineUnit {
        PipelineUnit {
            id: Uuid::new_v4(),
            macro_service_id: macro_id,
            micro_service_ids: micros,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_status_round_trips_through_str() {
        for status in [
            PipelineStatus::Pending,
            PipelineStatus::Accepted,
            PipelineStatus::Rejected,
            PipelineStatus::Running,
            PipelineStatus::Completed,
        ] {
            assert_eq!(status.as_str().parse::<PipelineStatus>(), Ok(status));
        }
        assert!("done".parse::<PipelineStatus>().is_err());
    }

    #[test]
    fn test_stage_order_puts_macro_last_and_keeps_declared_order() {
        let (a, b, c, m) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let unit = unit(vec![a, b, c], Some(m));

        assert_eq!(unit.stage_order(&[c, a]), vec![a, c, m]);
        assert_eq!(unit.stage_order(&[]), vec![m]);
    }

    #[test]
    fn test_first_foreign_selection() {
        let (a, b, stranger) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let unit = unit(vec![a, b], None);

        assert_eq!(unit.first_foreign(&[a, b]), None);
        assert_eq!(unit.first_foreign(&[a, stranger]), Some(stranger));
    }

    #[test]
    fn test_overview_buckets() {
        let details = |status| PipelineRunDetails {
            id: Uuid::new_v4(),
            pipeline_unit_id: Uuid::new_v4(),
            status,
            macro_service_name: None,
            micro_service_names: vec![],
            requester_name: None,
            approver_name: None,
            gitlab_pipeline_id: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        let overview = PipelineStatusOverview::from_runs(vec![
            details(PipelineStatus::Pending),
            details(PipelineStatus::Accepted),
            details(PipelineStatus::Completed),
            details(PipelineStatus::Running),
            details(PipelineStatus::Rejected),
        ]);

        assert_eq!(overview.total, 5);
        assert_eq!(overview.pending.len(), 1);
        assert_eq!(overview.completed.len(), 2);
        assert_eq!(overview.running.len(), 1);
        assert_eq!(overview.failed.len(), 1);
    }
}

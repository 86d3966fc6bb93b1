//! Endpoint DTOs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::endpoint::{Endpoint, EndpointKey, EndpointMetadata, EndpointStats};

fn default_method() -> String {
    "GET".to_string()
}

fn default_expected_status() -> i32 {
    200
}

/// Request to register an endpoint
///
/// Also the entry format of the static endpoint manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateEndpoint {
    pub service_name: String,
    pub server_name: String,
    pub url: String,
    #[serde(default = "default_method")]
    pub api_method: String,
    #[serde(default = "default_expected_status")]
    pub expected_status_code: i32,
    #[serde(flatten)]
    pub metadata: EndpointMetadata,
}

impl CreateEndpoint {
    pub fn key(&self) -> EndpointKey {
        EndpointKey::new(
            &self.url,
            &self.api_method,
            &self.server_name,
            self.expected_status_code,
        )
    }
}

/// Endpoint with its metadata and statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointDetail {
    #[serde(flatten)]
    pub endpoint: Endpoint,
    pub total_checks: i64,
    pub successful_checks: i64,
    pub avg_latency: f64,
    pub uptime_percentage: f64,
    pub last_run_succeeded: bool,
    pub failure_count: i64,
}

impl EndpointDetail {
    pub fn new(endpoint: Endpoint, stats: Option<EndpointStats>) -> Self {
        let stats = stats.unwrap_or_else(|| EndpointStats::empty(endpoint.id));
        Self {
            endpoint,
            total_checks: stats.total_checks,
            successful_checks: stats.successful_checks,
            avg_latency: stats.average_latency(),
            uptime_percentage: stats.uptime_percentage(),
            last_run_succeeded: stats.last_run,
            failure_count: stats.failure_count,
        }
    }
}

/// Essentials of one endpoint for dashboard listings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointSummary {
    pub id: Uuid,
    pub service_name: String,
    pub server_name: String,
    pub url: String,
    pub total_checks: i64,
    pub uptime_percentage: f64,
    pub downtime_count: i64,
    pub successful_checks: i64,
    pub avg_latency: f64,
    pub last_run: bool,
    pub failure_count: i64,
}

impl EndpointSummary {
    pub fn new(endpoint: &Endpoint, stats: Option<&EndpointStats>) -> Self {
        let empty = EndpointStats::empty(endpoint.id);
        let stats = stats.unwrap_or(&empty);
        Self {
            id: endpoint.id,
            service_name: endpoint.service_name.clone(),
            server_name: endpoint.server_name.clone(),
            url: endpoint.url.clone(),
            total_checks: stats.total_checks,
            uptime_percentage: stats.uptime_percentage(),
            downtime_count: stats.downtime_count(),
            successful_checks: stats.successful_checks,
            avg_latency: stats.average_latency(),
            last_run: stats.last_run,
            failure_count: stats.failure_count,
        }
    }
}

/// Statistics across every registered endpoint
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregateStats {
    pub total_endpoints: usize,
    pub total_checks: i64,
    pub successful_checks: i64,
    pub down_time_count: i64,
    pub overall_uptime: f64,
    /// Average latency weighted by number of checks
    pub average_latency: f64,
}

impl AggregateStats {
    pub fn from_stats<'a>(
        total_endpoints: usize,
        stats: impl IntoIterator<Item = &'a EndpointStats>,
    ) -> Self {
        let mut aggregate = Self {
            total_endpoints,
            ..Default::default()
        };
        let mut total_latency = 0i64;
        for s in stats {
            aggregate.total_checks += s.total_checks;
            aggregate.successful_checks += s.successful_checks;
            total_latency += s.total_latency;
        }
        aggregate.down_time_count = aggregate.total_checks - aggregate.successful_checks;
        aggregate.overall_uptime = crate::domain::endpoint::percentage(
            aggregate.successful_checks,
            aggregate.total_checks,
        );
        if aggregate.total_checks > 0 {
            aggregate.average_latency = total_latency as f64 / aggregate.total_checks as f64;
        }
        aggregate
    }
}

/// Response of an on-demand check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckResponse {
    pub endpoint_id: Uuid,
    pub status: String,
    pub status_code: Option<i32>,
    pub latency_ms: i64,
    pub error: Option<String>,
    pub checked_at: DateTime<Utc>,
}

/// Scheduler state as reported to operators
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerStatus {
    pub scheduler_running: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manifest_entry_defaults() {
        let entry: CreateEndpoint = serde_json::from_str(
            r#"{"service_name":"billing","server_name":"srv-1","url":"http://billing/health"}"#,
        )
        .unwrap();
        assert_eq!(entry.api_method, "GET");
        assert_eq!(entry.expected_status_code, 200);
        assert!(entry.metadata.tags.is_empty());
    }

    #[test]
    fn test_aggregate_weights_latency_by_checks() {
        let a = EndpointStats {
            endpoint_id: Uuid::new_v4(),
            total_checks: 3,
            total_latency: 300,
            successful_checks: 3,
            failure_count: 0,
            last_run: true,
        };
        let b = EndpointStats {
            endpoint_id: Uuid::new_v4(),
            total_checks: 1,
            total_latency: 500,
            successful_checks: 0,
            failure_count: 1,
            last_run: false,
        };

        let aggregate = AggregateStats::from_stats(2, [&a, &b]);
        assert_eq!(aggregate.total_checks, 4);
        assert_eq!(aggregate.down_time_count, 1);
        assert_eq!(aggregate.overall_uptime, 75.0);
        assert_eq!(aggregate.average_latency, 200.0);
    }

    #[test]
    fn test_aggregate_of_nothing_is_zero() {
        assert_eq!(AggregateStats::from_stats(0, []), AggregateStats::default());
    }
}

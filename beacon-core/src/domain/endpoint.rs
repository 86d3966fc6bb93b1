//! Endpoint domain types
//!
//! An endpoint is one HTTP target probed by the check scheduler. Its identity is
//! the tuple of normalized URL, method, server name and expected status code.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A monitored HTTP endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Endpoint {
    pub id: Uuid,
    pub service_name: String,
    pub server_name: String,
    /// Normalized URL, see [`normalize_url`]
    pub url: String,
    pub api_method: String,
    pub expected_status_code: i32,
    #[serde(flatten)]
    pub metadata: EndpointMetadata,
    pub created_at: DateTime<Utc>,
}

impl Endpoint {
    /// Identity key used for duplicate detection
    pub fn key(&self) -> EndpointKey {
        EndpointKey::new(
            &self.url,
            &self.api_method,
            &self.server_name,
            self.expected_status_code,
        )
    }
}

/// Optional descriptive metadata attached to an endpoint
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EndpointMetadata {
    pub gitlab_url: Option<String>,
    pub docker_container_name: Option<String>,
    pub kubernetes_pod_name: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub description: Option<String>,
    pub last_changed_by: Option<String>,
}

/// Normalized identity of an endpoint
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EndpointKey {
    pub url: String,
    pub api_method: String,
    pub server_name: String,
    pub expected_status_code: i32,
}

impl EndpointKey {
    pub fn new(url: &str, api_method: &str, server_name: &str, expected_status_code: i32) -> Self {
        Self {
            url: normalize_url(url),
            api_method: api_method.to_string(),
            server_name: server_name.to_string(),
            expected_status_code,
        }
    }
}

/// Normalize a URL for identity comparison.
///
/// Surrounding whitespace is trimmed, a single trailing slash is removed and the
/// result is lower-cased.
pub fn normalize_url(raw: &str) -> String {
    let trimmed = raw.trim();
    let trimmed = trimmed.strip_suffix('/').unwrap_or(trimmed);
    trimmed.to_lowercase()
}

/// Aggregate statistics for one endpoint
///
/// Only ever mutated through a single atomic upsert per recorded check.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EndpointStats {
    pub endpoint_id: Uuid,
    pub total_checks: i64,
    /// Sum of observed latencies in milliseconds
    pub total_latency: i64,
    pub successful_checks: i64,
    /// Consecutive failures since the last successful check
    pub failure_count: i64,
    /// Whether the most recent check succeeded
    pub last_run: bool,
}

impl EndpointStats {
    pub fn empty(endpoint_id: Uuid) -> Self {
        Self {
            endpoint_id,
            ..Default::default()
        }
    }

    /// Fold one check outcome into the aggregate
    pub fn apply(&mut self, outcome: &CheckOutcome) {
        self.total_checks += 1;
        self.total_latency += outcome.latency_ms;
        if outcome.success {
            self.successful_checks += 1;
            self.failure_count = 0;
        } else {
            self.failure_count += 1;
        }
        self.last_run = outcome.success;
    }

    pub fn downtime_count(&self) -> i64 {
        self.total_checks - self.successful_checks
    }

    pub fn uptime_percentage(&self) -> f64 {
        percentage(self.successful_checks, self.total_checks)
    }

    pub fn average_latency(&self) -> f64 {
        if self.total_checks == 0 {
            return 0.0;
        }
        self.total_latency as f64 / self.total_checks as f64
    }
}

pub(crate) fn percentage(part: i64, total: i64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    part as f64 * 100.0 / total as f64
}

/// Result of a single probe
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckOutcome {
    pub endpoint_id: Uuid,
    /// HTTP status observed, absent on transport failure
    pub status_code: Option<i32>,
    pub latency_ms: i64,
    pub error: Option<String>,
    pub success: bool,
    pub checked_at: DateTime<Utc>,
}

impl CheckOutcome {
    /// Classify an observed response against the expected status code
    pub fn classify(
        endpoint_id: Uuid,
        expected_status_code: i32,
        status_code: Option<i32>,
        latency_ms: i64,
        error: Option<String>,
    ) -> Self {
        let success = error.is_none() && status_code == Some(expected_status_code);
        Self {
            endpoint_id,
            status_code,
            latency_ms,
            error,
            success,
            checked_at: Utc::now(),
        }
    }
}

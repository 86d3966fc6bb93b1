//! Endpoint Monitoring Service
//!
//! Registration, on-demand checks and statistics views for monitored
//! endpoints. The periodic check loop lives in [`scheduler`].

pub mod probe;
pub mod scheduler;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use beacon_core::domain::endpoint::{CheckOutcome, Endpoint, normalize_url};
use beacon_core::dto::endpoint::{AggregateStats, CreateEndpoint, EndpointDetail, EndpointSummary};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::repository::{EndpointRepository, RepositoryError};

pub use probe::Prober;
pub use scheduler::{Scheduler, SchedulerControl, SchedulerHandle};

/// Monitor service error type
#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("{0}")]
    Validation(String),

    #[error("Endpoint {0} not found")]
    NotFound(Uuid),

    #[error("{0}")]
    Conflict(String),

    #[error("Endpoints check already running")]
    AlreadyRunning,

    #[error("No endpoints check running")]
    NotRunning,

    #[error("Invalid endpoint manifest {}: {reason}", path.display())]
    Manifest { path: PathBuf, reason: String },

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

pub type Result<T> = std::result::Result<T, MonitorError>;

#[derive(Clone)]
pub struct MonitorService {
    repo: Arc<dyn EndpointRepository>,
    prober: Prober,
}

impl MonitorService {
    pub fn new(repo: Arc<dyn EndpointRepository>, prober: Prober) -> Self {
        Self { repo, prober }
    }

    /// Register an endpoint; its identity tuple must not exist yet
    pub async fn create_endpoint(&self, mut req: CreateEndpoint) -> Result<Endpoint> {
        validate_endpoint_request(&mut req)?;

        let Some(endpoint) = self.repo.insert_endpoint(&req).await? else {
            return Err(MonitorError::Conflict(format!(
                "Endpoint {} {} on {} expecting {} already exists",
                req.api_method, req.url, req.server_name, req.expected_status_code
            )));
        };

        info!(endpoint_id = %endpoint.id, "Endpoint registered: {}", endpoint.url);
        Ok(endpoint)
    }

    pub async fn get_endpoint_detail(&self, id: Uuid) -> Result<EndpointDetail> {
        let endpoint = self
            .repo
            .find_endpoint(id)
            .await?
            .ok_or(MonitorError::NotFound(id))?;
        let stats = self.repo.find_stats(id).await?;
        Ok(EndpointDetail::new(endpoint, stats))
    }

    pub async fn list_endpoint_summaries(&self) -> Result<Vec<EndpointSummary>> {
        let endpoints = self.repo.list_endpoints().await?;
        let stats = self.repo.list_stats().await?;

        Ok(endpoints
            .iter()
            .map(|endpoint| {
                let stats = stats.iter().find(|s| s.endpoint_id == endpoint.id);
                EndpointSummary::new(endpoint, stats)
            })
            .collect())
    }

    pub async fn aggregate_stats(&self) -> Result<AggregateStats> {
        let total_endpoints = self.repo.list_endpoints().await?.len();
        let stats = self.repo.list_stats().await?;
        Ok(AggregateStats::from_stats(total_endpoints, &stats))
    }

    /// Probe one endpoint right now and record the outcome
    pub async fn check_now(&self, id: Uuid) -> Result<CheckOutcome> {
        let endpoint = self
            .repo
            .find_endpoint(id)
            .await?
            .ok_or(MonitorError::NotFound(id))?;
        self.probe_and_record(&endpoint).await
    }

    /// Probe `endpoint` and fold the outcome into its statistics
    pub async fn probe_and_record(&self, endpoint: &Endpoint) -> Result<CheckOutcome> {
        let outcome = self.prober.probe(endpoint).await;
        let stats = self.repo.record_check(&outcome).await?;

        debug!(
            endpoint_id = %endpoint.id,
            success = outcome.success,
            latency_ms = outcome.latency_ms,
            total_checks = stats.total_checks,
            "Check recorded"
        );
        Ok(outcome)
    }

    /// Merge the endpoint manifest into storage and return every endpoint.
    ///
    /// A missing manifest is not an error; entries whose identity already
    /// exists are skipped.
    pub async fn load_and_sync_endpoints(&self, manifest: &Path) -> Result<Vec<Endpoint>> {
        let raw = match tokio::fs::read_to_string(manifest).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No endpoint manifest at {}", manifest.display());
                return Ok(self.repo.list_endpoints().await?);
            }
            Err(e) => {
                return Err(MonitorError::Manifest {
                    path: manifest.to_path_buf(),
                    reason: e.to_string(),
                });
            }
        };

        let entries: Vec<CreateEndpoint> =
            serde_json::from_str(&raw).map_err(|e| MonitorError::Manifest {
                path: manifest.to_path_buf(),
                reason: e.to_string(),
            })?;

        let mut added = 0;
        for mut entry in entries {
            if let Err(e) = validate_endpoint_request(&mut entry) {
                warn!("Skipping manifest entry {}: {}", entry.url, e);
                continue;
            }
            if self.repo.insert_endpoint(&entry).await?.is_some() {
                added += 1;
            }
        }

        let endpoints = self.repo.list_endpoints().await?;
        info!(
            "Endpoint manifest {} merged: {} added, {} total",
            manifest.display(),
            added,
            endpoints.len()
        );
        Ok(endpoints)
    }
}

/// Validate and normalize an endpoint registration in place
fn validate_endpoint_request(req: &mut CreateEndpoint) -> Result<()> {
    if req.service_name.trim().is_empty() {
        return Err(MonitorError::Validation(
            "Service name cannot be empty".to_string(),
        ));
    }

    if req.server_name.trim().is_empty() {
        return Err(MonitorError::Validation(
            "Server name cannot be empty".to_string(),
        ));
    }

    req.url = normalize_url(&req.url);
    if !req.url.starts_with("http://") && !req.url.starts_with("https://") {
        return Err(MonitorError::Validation(format!(
            "Endpoint URL must start with http:// or https://, got {:?}",
            req.url
        )));
    }

    req.api_method = req.api_method.trim().to_uppercase();
    if req.api_method.is_empty() {
        return Err(MonitorError::Validation(
            "API method cannot be empty".to_string(),
        ));
    }

    if !(100..=599).contains(&req.expected_status_code) {
        return Err(MonitorError::Validation(format!(
            "Expected status code {} is not a valid HTTP status",
            req.expected_status_code
        )));
    }

    Ok(())
}

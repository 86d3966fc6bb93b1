//! HTTP probe
//!
//! Issues one GET against an endpoint and classifies the response. Transport
//! failures and unexpected status codes are both valid outcomes, never errors.

use std::time::{Duration, Instant};

use beacon_core::domain::endpoint::{CheckOutcome, Endpoint};
use reqwest::Client;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct Prober {
    client: Client,
    timeout: Duration,
}

impl Prober {
    pub fn new(timeout: Duration) -> Self {
        Self::with_client(Client::new(), timeout)
    }

    pub fn with_client(client: Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    /// Probe `endpoint` once, bounded by the configured timeout
    pub async fn probe(&self, endpoint: &Endpoint) -> CheckOutcome {
        debug!(endpoint_id = %endpoint.id, "Probing {}", endpoint.url);

        let started = Instant::now();
        let result = self
            .client
            .get(&endpoint.url)
            .timeout(self.timeout)
            .send()
            .await;
        let latency_ms = started.elapsed().as_millis() as i64;

        let (status_code, error) = match result {
            Ok(response) => (Some(response.status().as_u16() as i32), None),
            Err(e) => (None, Some(e.to_string())),
        };

        CheckOutcome::classify(
            endpoint.id,
            endpoint.expected_status_code,
            status_code,
            latency_ms,
            error,
        )
    }
}

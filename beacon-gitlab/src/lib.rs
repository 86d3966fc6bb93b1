//! Beacon GitLab Client
//!
//! A small, type-safe HTTP client for the parts of the GitLab REST API the
//! release orchestrator needs: creating a pipeline on a ref and reading a
//! pipeline's status.
//!
//! # Example
//!
//! ```no_run
//! use beacon_gitlab::GitLabClient;
//! use std::collections::HashMap;
//!
//! # async fn example() -> beacon_gitlab::Result<()> {
//! let client = GitLabClient::new("https://gitlab.example.com/api/v4", "glpat-token");
//!
//! let pipeline = client
//!     .create_pipeline("42", "development", &HashMap::new())
//!     .await?;
//!
//! println!("Created pipeline: {}", pipeline.id);
//! # Ok(())
//! # }
//! ```

pub mod error;
mod pipelines;

// Re-export commonly used types
pub use error::{ClientError, Result};
pub use pipelines::{Pipeline, PipelineState};

use reqwest::Client;
use serde::de::DeserializeOwned;

/// Header carrying the personal or project access token
const TOKEN_HEADER: &str = "PRIVATE-TOKEN";

/// HTTP client for the GitLab REST API
#[derive(Debug, Clone)]
pub struct GitLabClient {
    /// Base URL of the API (e.g., "https://gitlab.com/api/v4")
    base_url: String,
    /// Access token sent with every request
    token: String,
    /// HTTP client instance
    client: Client,
}

impl GitLabClient {
    /// Create a new GitLab client
    ///
    /// # Example
    /// ```
    /// use beacon_gitlab::GitLabClient;
    ///
    /// let client = GitLabClient::new("https://gitlab.com/api/v4/", "token");
    /// assert_eq!(client.base_url(), "https://gitlab.com/api/v4");
    /// ```
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self::with_client(base_url, token, Client::new())
    }

    /// Create a new GitLab client with a custom HTTP client
    ///
    /// This allows you to configure timeouts, proxies, TLS settings, etc.
    pub fn with_client(
        base_url: impl Into<String>,
        token: impl Into<String>,
        client: Client,
    ) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.into(),
            client,
        }
    }

    /// Get the base URL of the API
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// URL of a project-scoped resource
    ///
    /// Project paths such as `group/app` are percent-encoded as GitLab expects.
    fn project_url(&self, project: &str, path: &str) -> String {
        let project = project.trim().replace('/', "%2F");
        format!("{}/projects/{}/{}", self.base_url, project, path)
    }

    // =============================================================================
    // Response Handlers
    // =============================================================================

    /// Check the status code and deserialize the JSON body
    async fn handle_response<T: DeserializeOwned>(&self, response: reqwest::Response) -> Result<T> {
        let status = response.status();

        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ClientError::api_error(status.as_u16(), error_text));
        }

        response
            .json()
            .await
            .map_err(|e| ClientError::ParseError(format!("Failed to parse JSON response: {}", e)))
    }
}

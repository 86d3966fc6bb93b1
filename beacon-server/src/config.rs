//! Server configuration
//!
//! Defines all configurable parameters for the server including storage,
//! the endpoint check scheduler, the CI provider connection and the timing
//! knobs of the pipeline execution chain.

use std::path::PathBuf;
use std::time::Duration;

/// Where durable state lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageConfig {
    /// PostgreSQL database at the given URL
    Postgres { database_url: String },
    /// Process-local store, lost on restart
    Memory,
}

/// Endpoint check scheduler settings
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Time between two ticks of the check loop
    pub check_interval: Duration,

    /// Upper bound for a single HTTP probe
    pub probe_timeout: Duration,

    /// Static endpoint manifest merged into storage on start
    pub manifest_path: PathBuf,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(60),
            probe_timeout: Duration::from_secs(5),
            manifest_path: PathBuf::from("endpoints.json"),
        }
    }
}

/// Pipeline execution chain settings
#[derive(Debug, Clone)]
pub struct OrchestrationConfig {
    /// Git ref every stage pipeline is created on
    pub ci_ref: String,

    /// Value of `DEPLOY_ENV` handed to the last stage
    pub deploy_env: String,

    /// Time between two status polls of a stage pipeline
    pub poll_interval: Duration,

    /// Ceiling for a single stage to reach a terminal status
    pub poll_timeout: Duration,

    /// Ceiling for a whole execution chain
    pub execution_timeout: Duration,

    /// Additional attempts when a stage service cannot be loaded
    pub fetch_max_retries: u32,

    /// First backoff delay, doubled after every failed attempt
    pub fetch_retry_base_delay: Duration,

    /// Upper bound for a single stage service lookup
    pub fetch_timeout: Duration,

    /// Upper bound for a state transition write
    pub persistence_timeout: Duration,
}

impl Default for OrchestrationConfig {
    fn default() -> Self {
        Self {
            ci_ref: "development".to_string(),
            deploy_env: "QA".to_string(),
            poll_interval: Duration::from_secs(10),
            poll_timeout: Duration::from_secs(30 * 60),
            execution_timeout: Duration::from_secs(60 * 60),
            fetch_max_retries: 3,
            fetch_retry_base_delay: Duration::from_secs(1),
            fetch_timeout: Duration::from_secs(10),
            persistence_timeout: Duration::from_secs(30),
        }
    }
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Address the HTTP server binds to
    pub bind_addr: String,

    pub storage: StorageConfig,

    pub scheduler: SchedulerConfig,

    /// GitLab API base URL (e.g., "https://gitlab.com/api/v4")
    pub gitlab_url: String,

    /// GitLab access token
    pub gitlab_token: String,

    /// HTTP mail relay receiving outbound notifications; log-only when absent
    pub notify_relay_url: Option<String>,

    pub orchestration: OrchestrationConfig,
}

impl Config {
    /// Creates a new configuration with defaults and in-memory storage
    pub fn new() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".to_string(),
            storage: StorageConfig::Memory,
            scheduler: SchedulerConfig::default(),
            gitlab_url: "https://gitlab.com/api/v4".to_string(),
            gitlab_token: String::new(),
            notify_relay_url: None,
            orchestration: OrchestrationConfig::default(),
        }
    }

    /// Creates configuration from environment variables
    ///
    /// Expected environment variables:
    /// - DATABASE_URL (optional, in-memory storage when unset)
    /// - BEACON_STORAGE (optional, `memory` forces in-memory storage)
    /// - BIND_ADDR (optional, default: 0.0.0.0:8080)
    /// - CHECK_TIMER (optional, seconds, default: 60)
    /// - ENDPOINTS_MANIFEST (optional, default: endpoints.json)
    /// - PROBE_TIMEOUT_SECS (optional, default: 5)
    /// - GITLAB_URL / GITLAB_TOKEN
    /// - CI_REF (optional, default: development)
    /// - DEPLOY_ENV (optional, default: QA)
    /// - NOTIFY_RELAY_URL (optional)
    /// - STAGE_POLL_INTERVAL_SECS, STAGE_POLL_TIMEOUT_SECS, EXECUTION_TIMEOUT_SECS
    /// - FETCH_MAX_RETRIES, FETCH_RETRY_BASE_MS
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = Self::new();

        let force_memory = std::env::var("BEACON_STORAGE")
            .map(|v| v.eq_ignore_ascii_case("memory"))
            .unwrap_or(false);
        let storage = match std::env::var("DATABASE_URL") {
            Ok(database_url) if !force_memory && !database_url.is_empty() => {
                StorageConfig::Postgres { database_url }
            }
            _ => StorageConfig::Memory,
        };

        let check_interval = match std::env::var("CHECK_TIMER") {
            Ok(raw) => raw
                .trim()
                .parse::<u64>()
                .map(Duration::from_secs)
                .map_err(|_| anyhow::anyhow!("CHECK_TIMER must be a number of seconds, got {:?}", raw))?,
            Err(_) => defaults.scheduler.check_interval,
        };

        let scheduler = SchedulerConfig {
            check_interval,
            probe_timeout: env_secs("PROBE_TIMEOUT_SECS", defaults.scheduler.probe_timeout),
            manifest_path: std::env::var("ENDPOINTS_MANIFEST")
                .map(PathBuf::from)
                .unwrap_or(defaults.scheduler.manifest_path),
        };

        let base = defaults.orchestration;
        let orchestration = OrchestrationConfig {
            ci_ref: std::env::var("CI_REF").unwrap_or(base.ci_ref),
            deploy_env: std::env::var("DEPLOY_ENV").unwrap_or(base.deploy_env),
            poll_interval: env_secs("STAGE_POLL_INTERVAL_SECS", base.poll_interval),
            poll_timeout: env_secs("STAGE_POLL_TIMEOUT_SECS", base.poll_timeout),
            execution_timeout: env_secs("EXECUTION_TIMEOUT_SECS", base.execution_timeout),
            fetch_max_retries: std::env::var("FETCH_MAX_RETRIES")
                .ok()
                .and_then(|s| s.parse::<u32>().ok())
                .unwrap_or(base.fetch_max_retries),
            fetch_retry_base_delay: std::env::var("FETCH_RETRY_BASE_MS")
                .ok()
                .and_then(|s| s.parse::<u64>().ok())
                .map(Duration::from_millis)
                .unwrap_or(base.fetch_retry_base_delay),
            fetch_timeout: base.fetch_timeout,
            persistence_timeout: base.persistence_timeout,
        };

        Ok(Self {
            bind_addr: std::env::var("BIND_ADDR").unwrap_or(defaults.bind_addr),
            storage,
            scheduler,
            gitlab_url: std::env::var("GITLAB_URL").unwrap_or(defaults.gitlab_url),
            gitlab_token: std::env::var("GITLAB_TOKEN").unwrap_or_default(),
            notify_relay_url: std::env::var("NOTIFY_RELAY_URL")
                .ok()
                .filter(|url| !url.trim().is_empty()),
            orchestration,
        })
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.bind_addr.is_empty() {
            anyhow::bail!("bind_addr cannot be empty");
        }

        if self.scheduler.check_interval.is_zero() {
            anyhow::bail!("check interval must be greater than 0");
        }

        if self.scheduler.probe_timeout.is_zero() {
            anyhow::bail!("probe timeout must be greater than 0");
        }

        if !self.gitlab_url.starts_with("http://") && !self.gitlab_url.starts_with("https://") {
            anyhow::bail!("gitlab_url must start with http:// or https://");
        }

        if let Some(relay) = &self.notify_relay_url {
            if !relay.starts_with("http://") && !relay.starts_with("https://") {
                anyhow::bail!("notify_relay_url must start with http:// or https://");
            }
        }

        let orchestration = &self.orchestration;
        if orchestration.ci_ref.trim().is_empty() {
            anyhow::bail!("ci_ref cannot be empty");
        }

        if orchestration.poll_interval.is_zero() {
            anyhow::bail!("stage poll interval must be greater than 0");
        }

        if orchestration.poll_timeout < orchestration.poll_interval {
            anyhow::bail!("stage poll timeout must not be shorter than the poll interval");
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

fn env_secs(name: &str, default: Duration) -> Duration {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.storage, StorageConfig::Memory);
        assert_eq!(config.scheduler.probe_timeout, Duration::from_secs(5));
        assert_eq!(config.orchestration.poll_interval, Duration::from_secs(10));
        assert_eq!(config.orchestration.poll_timeout, Duration::from_secs(1800));
        assert_eq!(config.orchestration.execution_timeout, Duration::from_secs(3600));
        assert_eq!(config.orchestration.fetch_max_retries, 3);
        assert_eq!(config.orchestration.ci_ref, "development");
        assert_eq!(config.orchestration.deploy_env, "QA");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();

        config.scheduler.check_interval = Duration::ZERO;
        assert!(config.validate().is_err());
        config.scheduler.check_interval = Duration::from_secs(30);

        config.gitlab_url = "gitlab.local".to_string();
        assert!(config.validate().is_err());
        config.gitlab_url = "https://gitlab.local/api/v4".to_string();

        config.notify_relay_url = Some("smtp://relay".to_string());
        assert!(config.validate().is_err());
        config.notify_relay_url = Some("http://relay/send".to_string());

        config.orchestration.poll_timeout = Duration::from_secs(1);
        assert!(config.validate().is_err());
        config.orchestration.poll_timeout = Duration::from_secs(600);

        assert!(config.validate().is_ok());
    }
}

//! Application wiring
//!
//! Builds repositories, gateways, the realtime hub and the services from a
//! [`Config`] and returns the state shared by request handlers.

use std::sync::Arc;

use beacon_gitlab::GitLabClient;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::api::AppState;
use crate::config::{Config, StorageConfig};
use crate::db;
use crate::gateway::{CiProvider, GitLabCiProvider, HttpRelayNotifier, LogNotifier, Notifier};
use crate::realtime::Hub;
use crate::repository::{
    EndpointRepository, InMemoryStore, PgEndpointRepository, PgPipelineRepository,
    PgUserDirectory, PipelineRepository, UserDirectory,
};
use crate::service::monitor::{Prober, Scheduler, SchedulerControl};
use crate::service::{MonitorService, PipelineService};

/// Pending hub commands before producers wait
const HUB_CAPACITY: usize = 256;

struct Stores {
    endpoints: Arc<dyn EndpointRepository>,
    pipelines: Arc<dyn PipelineRepository>,
    users: Arc<dyn UserDirectory>,
}

async fn open_stores(storage: &StorageConfig) -> anyhow::Result<Stores> {
    match storage {
        StorageConfig::Postgres { database_url } => {
            info!("Connecting to database...");
            let pool = db::create_pool(database_url).await?;
            db::run_migrations(&pool).await?;
            info!("Database ready");

            Ok(Stores {
                endpoints: Arc::new(PgEndpointRepository::new(pool.clone())),
                pipelines: Arc::new(PgPipelineRepository::new(pool.clone())),
                users: Arc::new(PgUserDirectory::new(pool)),
            })
        }
        StorageConfig::Memory => {
            tracing::warn!("No database configured, state is kept in memory only");
            let store = Arc::new(InMemoryStore::new());
            Ok(Stores {
                endpoints: store.clone(),
                pipelines: store.clone(),
                users: store,
            })
        }
    }
}

/// Build the application state; background tasks stop when `shutdown` fires
pub async fn bootstrap(config: &Config, shutdown: CancellationToken) -> anyhow::Result<AppState> {
    let stores = open_stores(&config.storage).await?;

    let (hub, hub_handle) = Hub::new(HUB_CAPACITY);
    tokio::spawn(hub.run(shutdown.clone()));

    let ci: Arc<dyn CiProvider> = Arc::new(GitLabCiProvider::new(GitLabClient::new(
        &config.gitlab_url,
        &config.gitlab_token,
    )));

    let notifier: Arc<dyn Notifier> = match &config.notify_relay_url {
        Some(url) => {
            info!("Sending notifications through relay {}", url);
            Arc::new(HttpRelayNotifier::new(url.clone()))
        }
        None => Arc::new(LogNotifier),
    };

    let monitor = MonitorService::new(
        stores.endpoints,
        Prober::new(config.scheduler.probe_timeout),
    );
    let scheduler = SchedulerControl::new(
        Scheduler::new(monitor.clone(), config.scheduler.clone()),
        shutdown.clone(),
    );

    let pipelines = PipelineService::new(
        stores.pipelines,
        stores.users,
        ci,
        notifier,
        Arc::new(hub_handle.clone()),
        config.orchestration.clone(),
        shutdown,
    );

    Ok(AppState {
        monitor,
        scheduler: Arc::new(scheduler),
        pipelines,
        hub: hub_handle,
    })
}

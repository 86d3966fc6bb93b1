//! Endpoint monitoring against a local HTTP target

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::{Router, http::StatusCode, routing::get};
use beacon_core::domain::endpoint::EndpointMetadata;
use beacon_core::dto::endpoint::CreateEndpoint;
use beacon_server::config::SchedulerConfig;
use beacon_server::repository::InMemoryStore;
use beacon_server::service::{MonitorError, MonitorService};
use beacon_server::service::monitor::{Prober, Scheduler, SchedulerControl};
use futures::future::join_all;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

async fn serve_target() -> String {
    let app = Router::new()
        .route("/health", get(|| async { "ok" }))
        .route(
            "/broken",
            get(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "boom") }),
        );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

fn endpoint(url: &str) -> CreateEndpoint {
    CreateEndpoint {
        service_name: "billing".to_string(),
        server_name: "srv-1".to_string(),
        url: url.to_string(),
        api_method: "GET".to_string(),
        expected_status_code: 200,
        metadata: EndpointMetadata::default(),
    }
}

fn monitor() -> (MonitorService, Arc<InMemoryStore>) {
    let store = Arc::new(InMemoryStore::new());
    let monitor = MonitorService::new(store.clone(), Prober::new(Duration::from_secs(2)));
    (monitor, store)
}

fn manifest_path() -> PathBuf {
    std::env::temp_dir().join(format!("beacon-endpoints-{}.json", Uuid::new_v4()))
}

#[tokio::test]
async fn test_manifest_merge_is_idempotent() {
    let (monitor, _) = monitor();
    let path = manifest_path();
    std::fs::write(
        &path,
        r#"[
            {"service_name": "billing", "server_name": "srv-1", "url": "http://billing.local/health"},
            {"service_name": "billing", "server_name": "srv-1", "url": "HTTP://Billing.local/health/"},
            {"service_name": "orders", "server_name": "srv-2", "url": "http://orders.local/health",
             "api_method": "head", "expected_status_code": 204, "tags": ["core"]},
            {"service_name": "", "server_name": "srv-3", "url": "http://nameless.local"}
        ]"#,
    )
    .unwrap();

    let first = monitor.load_and_sync_endpoints(&path).await.unwrap();
    let second = monitor.load_and_sync_endpoints(&path).await.unwrap();
    std::fs::remove_file(&path).unwrap();

    assert_eq!(first.len(), 2);
    assert_eq!(second.len(), 2);
    let orders = second
        .iter()
        .find(|e| e.service_name == "orders")
        .unwrap();
    assert_eq!(orders.api_method, "HEAD");
    assert_eq!(orders.expected_status_code, 204);
    assert_eq!(orders.metadata.tags, vec!["core".to_string()]);
}

#[tokio::test]
async fn test_missing_manifest_keeps_stored_endpoints() {
    let (monitor, _) = monitor();
    monitor
        .create_endpoint(endpoint("http://billing.local/health"))
        .await
        .unwrap();

    let endpoints = monitor
        .load_and_sync_endpoints(&manifest_path())
        .await
        .unwrap();
    assert_eq!(endpoints.len(), 1);
}

#[tokio::test]
async fn test_malformed_manifest_is_reported() {
    let (monitor, _) = monitor();
    let path = manifest_path();
    std::fs::write(&path, "{ not json").unwrap();

    let result = monitor.load_and_sync_endpoints(&path).await;
    std::fs::remove_file(&path).unwrap();

    assert!(matches!(result, Err(MonitorError::Manifest { .. })));
}

#[tokio::test]
async fn test_duplicate_registration_conflicts() {
    let (monitor, _) = monitor();
    monitor
        .create_endpoint(endpoint("http://billing.local/health"))
        .await
        .unwrap();

    let err = monitor
        .create_endpoint(endpoint("http://BILLING.local/health/"))
        .await
        .unwrap_err();
    assert!(matches!(err, MonitorError::Conflict(_)));
}

#[tokio::test]
async fn test_concurrent_checks_are_all_counted() {
    let target = serve_target().await;
    let (monitor, store) = monitor();
    let created = monitor
        .create_endpoint(endpoint(&format!("{}/health", target)))
        .await
        .unwrap();

    let checks = (0..20).map(|_| monitor.check_now(created.id));
    let outcomes = join_all(checks).await;

    assert!(outcomes.iter().all(|o| o.as_ref().unwrap().success));
    let detail = monitor.get_endpoint_detail(created.id).await.unwrap();
    assert_eq!(detail.total_checks, 20);
    assert_eq!(detail.successful_checks, 20);
    assert_eq!(detail.failure_count, 0);
    assert_eq!(detail.uptime_percentage, 100.0);
    assert_eq!(store.check_count(created.id).await, 20);
}

#[tokio::test]
async fn test_unexpected_status_and_unreachable_are_failures() {
    let target = serve_target().await;
    let (monitor, _) = monitor();
    let broken = monitor
        .create_endpoint(endpoint(&format!("{}/broken", target)))
        .await
        .unwrap();

    let outcome = monitor.check_now(broken.id).await.unwrap();
    assert!(!outcome.success);
    assert_eq!(outcome.status_code, Some(500));
    assert!(outcome.error.is_none());

    // Nothing listens on the port of a dropped listener
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let closed = format!("http://{}/health", listener.local_addr().unwrap());
    drop(listener);
    let unreachable = monitor.create_endpoint(endpoint(&closed)).await.unwrap();

    let outcome = monitor.check_now(unreachable.id).await.unwrap();
    assert!(!outcome.success);
    assert_eq!(outcome.status_code, None);
    assert!(outcome.error.is_some());

    let stats = monitor.aggregate_stats().await.unwrap();
    assert_eq!(stats.total_endpoints, 2);
    assert_eq!(stats.total_checks, 2);
    assert_eq!(stats.down_time_count, 2);
    assert_eq!(stats.overall_uptime, 0.0);
}

#[tokio::test]
async fn test_check_of_unknown_endpoint() {
    let (monitor, _) = monitor();
    let err = monitor.check_now(Uuid::new_v4()).await.unwrap_err();
    assert!(matches!(err, MonitorError::NotFound(_)));
}

fn scheduler(monitor: MonitorService) -> SchedulerControl {
    let config = SchedulerConfig {
        check_interval: Duration::from_millis(100),
        probe_timeout: Duration::from_secs(2),
        manifest_path: manifest_path(),
    };
    SchedulerControl::new(Scheduler::new(monitor, config), CancellationToken::new())
}

#[tokio::test]
async fn test_scheduler_ticks_until_stopped() {
    let target = serve_target().await;
    let (monitor, store) = monitor();
    let created = monitor
        .create_endpoint(endpoint(&format!("{}/health", target)))
        .await
        .unwrap();
    let control = scheduler(monitor);

    control.start().await.unwrap();
    assert!(control.is_running().await);
    assert!(matches!(
        control.start().await,
        Err(MonitorError::AlreadyRunning)
    ));

    tokio::time::sleep(Duration::from_millis(450)).await;
    control.stop().await.unwrap();
    assert!(!control.is_running().await);

    tokio::time::sleep(Duration::from_millis(100)).await;
    let after_stop = store.check_count(created.id).await;
    assert!(after_stop >= 2, "only {} checks recorded", after_stop);

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(store.check_count(created.id).await, after_stop);

    assert!(matches!(control.stop().await, Err(MonitorError::NotRunning)));
}

#[tokio::test]
async fn test_scheduler_can_restart_after_stop() {
    let (monitor, _) = monitor();
    let control = scheduler(monitor);

    control.start().await.unwrap();
    control.stop().await.unwrap();
    control.start().await.unwrap();
    assert!(control.is_running().await);
    control.stop().await.unwrap();
}

#[tokio::test]
async fn test_dropped_handle_releases_the_scheduler() {
    let (monitor, _) = monitor();
    let scheduler = Scheduler::new(
        monitor,
        SchedulerConfig {
            manifest_path: manifest_path(),
            ..SchedulerConfig::default()
        },
    );
    let shutdown = CancellationToken::new();

    let handle = scheduler.start(&shutdown).await.unwrap();
    assert!(scheduler.is_running());
    assert!(matches!(
        scheduler.start(&shutdown).await,
        Err(MonitorError::AlreadyRunning)
    ));

    drop(handle);
    assert!(!scheduler.is_running());
}

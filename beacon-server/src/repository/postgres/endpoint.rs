//! Endpoint Repository
//!
//! Handles all database operations related to endpoints, their check log and
//! their aggregate statistics.

use async_trait::async_trait;
use beacon_core::domain::endpoint::{CheckOutcome, Endpoint, EndpointMetadata, EndpointStats};
use beacon_core::dto::endpoint::CreateEndpoint;
use sqlx::PgPool;
use uuid::Uuid;

use crate::repository::{EndpointRepository, Result};

#[derive(Debug, Clone)]
pub struct PgEndpointRepository {
    pool: PgPool,
}

impl PgEndpointRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const ENDPOINT_COLUMNS: &str = r#"
    id, service_name, server_name, url, api_method, expected_status_code,
    gitlab_url, docker_container_name, kubernetes_pod_name, tags,
    description, last_changed_by, created_at
"#;

#[async_trait]
impl EndpointRepository for PgEndpointRepository {
    async fn insert_endpoint(&self, req: &CreateEndpoint) -> Result<Option<Endpoint>> {
        let sql = format!(
            r#"
            INSERT INTO endpoints (id, service_name, server_name, url, api_method,
                                   expected_status_code, gitlab_url, docker_container_name,
                                   kubernetes_pod_name, tags, description, last_changed_by,
                                   created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ON CONFLICT (url, api_method, server_name, expected_status_code) DO NOTHING
            RETURNING {}
            "#,
            ENDPOINT_COLUMNS
        );

        let row = sqlx::query_as::<_, EndpointRow>(&sql)
            .bind(Uuid::new_v4())
            .bind(&req.service_name)
            .bind(&req.server_name)
            .bind(&req.url)
            .bind(&req.api_method)
            .bind(req.expected_status_code)
            .bind(&req.metadata.gitlab_url)
            .bind(&req.metadata.docker_container_name)
            .bind(&req.metadata.kubernetes_pod_name)
            .bind(&req.metadata.tags)
            .bind(&req.metadata.description)
            .bind(&req.metadata.last_changed_by)
            .bind(chrono::Utc::now())
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(Into::into))
    }

    async fn find_endpoint(&self, id: Uuid) -> Result<Option<Endpoint>> {
        let sql = format!("SELECT {} FROM endpoints WHERE id = $1", ENDPOINT_COLUMNS);
        let row = sqlx::query_as::<_, EndpointRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(Into::into))
    }

    async fn list_endpoints(&self) -> Result<Vec<Endpoint>> {
        let sql = format!(
            "SELECT {} FROM endpoints ORDER BY created_at ASC",
            ENDPOINT_COLUMNS
        );
        let rows = sqlx::query_as::<_, EndpointRow>(&sql)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn record_check(&self, outcome: &CheckOutcome) -> Result<EndpointStats> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO checks (endpoint_id, status_code, latency_ms, error, success, checked_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(outcome.endpoint_id)
        .bind(outcome.status_code)
        .bind(outcome.latency_ms)
        .bind(&outcome.error)
        .bind(outcome.success)
        .bind(outcome.checked_at)
        .execute(&mut *tx)
        .await?;

        // Increment in place so concurrent checks of one endpoint never lose updates
        let stats = sqlx::query_as::<_, StatsRow>(
            r#"
            INSERT INTO endpoint_stats (endpoint_id, total_checks, total_latency,
                                        successful_checks, failure_count, last_run)
            VALUES ($1, 1, $2, $3, $4, $5)
            ON CONFLICT (endpoint_id) DO UPDATE SET
                total_checks = endpoint_stats.total_checks + 1,
                total_latency = endpoint_stats.total_latency + EXCLUDED.total_latency,
                successful_checks = endpoint_stats.successful_checks + EXCLUDED.successful_checks,
                failure_count = CASE WHEN EXCLUDED.last_run THEN 0
                                     ELSE endpoint_stats.failure_count + 1 END,
                last_run = EXCLUDED.last_run
            RETURNING endpoint_id, total_checks, total_latency, successful_checks,
                      failure_count, last_run
            "#,
        )
        .bind(outcome.endpoint_id)
        .bind(outcome.latency_ms)
        .bind(if outcome.success { 1i64 } else { 0 })
        .bind(if outcome.success { 0i64 } else { 1 })
        .bind(outcome.success)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(stats.into())
    }

    async fn find_stats(&self, endpoint_id: Uuid) -> Result<Option<EndpointStats>> {
        let row = sqlx::query_as::<_, StatsRow>(
            r#"
            SELECT endpoint_id, total_checks, total_latency, successful_checks,
                   failure_count, last_run
            FROM endpoint_stats
            WHERE endpoint_id = $1
            "#,
        )
        .bind(endpoint_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Into::into))
    }

    async fn list_stats(&self) -> Result<Vec<EndpointStats>> {
        let rows = sqlx::query_as::<_, StatsRow>(
            r#"
            SELECT endpoint_id, total_checks, total_latency, successful_checks,
                   failure_count, last_run
            FROM endpoint_stats
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct EndpointRow {
    id: Uuid,
    service_name: String,
    server_name: String,
    url: String,
    api_method: String,
    expected_status_code: i32,
    gitlab_url: Option<String>,
    docker_container_name: Option<String>,
    kubernetes_pod_name: Option<String>,
    tags: Vec<String>,
    description: Option<String>,
    last_changed_by: Option<String>,
    created_at: chrono::DateTime<chrono::Utc>,
}

impl From<EndpointRow> for Endpoint {
    fn from(row: EndpointRow) -> Self {
        Endpoint {
            id: row.id,
            service_name: row.service_name,
            server_name: row.server_name,
            url: row.url,
            api_method: row.api_method,
            expected_status_code: row.expected_status_code,
            metadata: EndpointMetadata {
                gitlab_url: row.gitlab_url,
                docker_container_name: row.docker_container_name,
                kubernetes_pod_name: row.kubernetes_pod_name,
                tags: row.tags,
                description: row.description,
                last_changed_by: row.last_changed_by,
            },
            created_at: row.created_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct StatsRow {
    endpoint_id: Uuid,
    total_checks: i64,
    total_latency: i64,
    successful_checks: i64,
    failure_count: i64,
    last_run: bool,
}

impl From<StatsRow> for EndpointStats {
    fn from(row: StatsRow) -> Self {
        EndpointStats {
            endpoint_id: row.endpoint_id,
            total_checks: row.total_checks,
            total_latency: row.total_latency,
            successful_checks: row.successful_checks,
            failure_count: row.failure_count,
            last_run: row.last_run,
        }
    }
}

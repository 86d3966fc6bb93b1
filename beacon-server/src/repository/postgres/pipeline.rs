//! Pipeline Repository
//!
//! Handles all database operations related to CI services, pipeline units,
//! runs, authorization requests and execution history.

use std::collections::HashMap;

use async_trait::async_trait;
use beacon_core::domain::pipeline::{
    AuthorizationRequest, ExecutionHistory, PipelineRun, PipelineStatus, PipelineUnit,
};
use beacon_core::domain::service::{Service, ServiceKind};
use beacon_core::dto::pipeline::CreateService;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::repository::{
    AuthorizationResolution, HistoryCompletion, PipelineRepository, RepositoryError, Result,
};

#[derive(Debug, Clone)]
pub struct PgPipelineRepository {
    pool: PgPool,
}

impl PgPipelineRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn dependencies_of(&self, unit_ids: &[Uuid]) -> Result<HashMap<Uuid, Vec<Uuid>>> {
        let rows = sqlx::query_as::<_, DependencyRow>(
            r#"
            SELECT pipeline_unit_id, micro_service_id
            FROM pipeline_dependencies
            WHERE pipeline_unit_id = ANY($1)
            ORDER BY pipeline_unit_id, order_index ASC
            "#,
        )
        .bind(unit_ids)
        .fetch_all(&self.pool)
        .await?;

        let mut grouped: HashMap<Uuid, Vec<Uuid>> = HashMap::new();
        for row in rows {
            grouped
                .entry(row.pipeline_unit_id)
                .or_default()
                .push(row.micro_service_id);
        }
        Ok(grouped)
    }
}

const RUN_COLUMNS: &str = r#"
    id, pipeline_unit_id, status, selected_micro_service_ids, gitlab_pipeline_id,
    approver_id, execution_time_ms, created_at, updated_at
"#;

const AUTHORIZATION_COLUMNS: &str = r#"
    id, pipeline_run_id, requester_id, approver_id, status, comment, created_at, updated_at
"#;

const HISTORY_COLUMNS: &str = r#"
    id, pipeline_run_id, pipeline_unit_id, requester_id, requester_name, approver_id,
    approver_name, status, started_at, completed_at, execution_time_ms, error_message,
    macro_service_name, micro_service_names
"#;

#[async_trait]
impl PipelineRepository for PgPipelineRepository {
    // =========================================================================
    // Services
    // =========================================================================

    async fn create_service(&self, req: &CreateService) -> Result<Service> {
        let now = Utc::now();
        let service = Service {
            id: Uuid::new_v4(),
            gitlab_repo_id: req.gitlab_repo_id.trim().to_string(),
            name: req.name.trim().to_string(),
            url: req.url.trim().to_string(),
            kind: req.kind,
            created_at: now,
            updated_at: now,
        };

        sqlx::query(
            r#"
            INSERT INTO services (id, gitlab_repo_id, name, url, type, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(service.id)
        .bind(&service.gitlab_repo_id)
        .bind(&service.name)
        .bind(&service.url)
        .bind(service.kind.as_str())
        .bind(service.created_at)
        .bind(service.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|err| match RepositoryError::from(err) {
            RepositoryError::Conflict(_) => RepositoryError::Conflict(format!(
                "repository {} is already registered",
                service.gitlab_repo_id
            )),
            other => other,
        })?;

        Ok(service)
    }

    async fn find_service(&self, id: Uuid) -> Result<Option<Service>> {
        let row = sqlx::query_as::<_, ServiceRow>(
            r#"
            SELECT id, gitlab_repo_id, name, url, type, created_at, updated_at
            FROM services
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Into::into))
    }

    async fn list_services(&self) -> Result<Vec<Service>> {
        let rows = sqlx::query_as::<_, ServiceRow>(
            r#"
            SELECT id, gitlab_repo_id, name, url, type, created_at, updated_at
            FROM services
            ORDER BY name ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    // =========================================================================
    // Pipeline Units
    // =========================================================================

    async fn create_pipeline_unit(
        &self,
        macro_service_id: Option<Uuid>,
        micro_service_ids: &[Uuid],
    ) -> Result<PipelineUnit> {
        let now = Utc::now();
        let unit = PipelineUnit {
            id: Uuid::new_v4(),
            macro_service_id,
            micro_service_ids: micro_service_ids.to_vec(),
            created_at: now,
            updated_at: now,
        };

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO pipeline_units (id, macro_service_id, created_at, updated_at)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(unit.id)
        .bind(unit.macro_service_id)
        .bind(unit.created_at)
        .bind(unit.updated_at)
        .execute(&mut *tx)
        .await?;

        for (index, micro_id) in unit.micro_service_ids.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO pipeline_dependencies (pipeline_unit_id, micro_service_id, order_index)
                VALUES ($1, $2, $3)
                "#,
            )
            .bind(unit.id)
            .bind(micro_id)
            .bind(index as i32)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        Ok(unit)
    }

    async fn find_pipeline_unit(&self, id: Uuid) -> Result<Option<PipelineUnit>> {
        let row = sqlx::query_as::<_, UnitRow>(
            "SELECT id, macro_service_id, created_at, updated_at FROM pipeline_units WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let mut dependencies = self.dependencies_of(&[row.id]).await?;
        let micros = dependencies.remove(&row.id).unwrap_or_default();
        Ok(Some(row.into_unit(micros)))
    }

    async fn list_pipeline_units(&self) -> Result<Vec<PipelineUnit>> {
        let rows = sqlx::query_as::<_, UnitRow>(
            r#"
            SELECT id, macro_service_id, created_at, updated_at
            FROM pipeline_units
            ORDER BY created_at DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let ids: Vec<Uuid> = rows.iter().map(|r| r.id).collect();
        let mut dependencies = self.dependencies_of(&ids).await?;

        Ok(rows
            .into_iter()
            .map(|row| {
                let micros = dependencies.remove(&row.id).unwrap_or_default();
                row.into_unit(micros)
            })
            .collect())
    }

    // =========================================================================
    // Pipeline Runs
    // =========================================================================

    async fn create_run_with_authorization(
        &self,
        pipeline_unit_id: Uuid,
        selected_micro_service_ids: &[Uuid],
        requester_id: Uuid,
    ) -> Result<(PipelineRun, AuthorizationRequest)> {
        let now = Utc::now();
        let run = PipelineRun {
            id: Uuid::new_v4(),
            pipeline_unit_id,
            status: PipelineStatus::Pending,
            selected_micro_service_ids: selected_micro_service_ids.to_vec(),
            gitlab_pipeline_id: None,
            approver_id: None,
            execution_time_ms: None,
            created_at: now,
            updated_at: now,
        };
        let request = AuthorizationRequest {
            id: Uuid::new_v4(),
            pipeline_run_id: run.id,
            requester_id,
            requester_name: None,
            approver_id: None,
            approver_name: None,
            status: PipelineStatus::Pending,
            comment: None,
            macro_service_name: None,
            micro_service_names: vec![],
            created_at: now,
            updated_at: now,
        };

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO pipeline_runs (id, pipeline_unit_id, status, selected_micro_service_ids,
                                       created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(run.id)
        .bind(run.pipeline_unit_id)
        .bind(run.status.as_str())
        .bind(&run.selected_micro_service_ids)
        .bind(run.created_at)
        .bind(run.updated_at)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO authorization_requests (id, pipeline_run_id, requester_id, status,
                                                created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(request.id)
        .bind(request.pipeline_run_id)
        .bind(request.requester_id)
        .bind(request.status.as_str())
        .bind(request.created_at)
        .bind(request.updated_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok((run, request))
    }

    async fn find_run(&self, id: Uuid) -> Result<Option<PipelineRun>> {
        let sql = format!("SELECT {} FROM pipeline_runs WHERE id = $1", RUN_COLUMNS);
        let row = sqlx::query_as::<_, RunRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(Into::into))
    }

    async fn list_runs(&self) -> Result<Vec<PipelineRun>> {
        let sql = format!(
            "SELECT {} FROM pipeline_runs ORDER BY created_at DESC",
            RUN_COLUMNS
        );
        let rows = sqlx::query_as::<_, RunRow>(&sql)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn set_run_status(&self, id: Uuid, status: PipelineStatus) -> Result<()> {
        let result = sqlx::query(
            "UPDATE pipeline_runs SET status = $1, updated_at = $2 WHERE id = $3",
        )
        .bind(status.as_str())
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?;

        ensure_updated(result.rows_affected(), "Pipeline run", id)
    }

    async fn set_run_gitlab_pipeline(&self, id: Uuid, gitlab_pipeline_id: i64) -> Result<()> {
        let result = sqlx::query(
            "UPDATE pipeline_runs SET gitlab_pipeline_id = $1, updated_at = $2 WHERE id = $3",
        )
        .bind(gitlab_pipeline_id)
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?;

        ensure_updated(result.rows_affected(), "Pipeline run", id)
    }

    async fn finish_run(
        &self,
        id: Uuid,
        status: PipelineStatus,
        execution_time_ms: i64,
    ) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE pipeline_runs
            SET status = $1, execution_time_ms = $2, updated_at = $3
            WHERE id = $4
            "#,
        )
        .bind(status.as_str())
        .bind(execution_time_ms)
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?;

        ensure_updated(result.rows_affected(), "Pipeline run", id)
    }

    // =========================================================================
    // Authorization Requests
    // =========================================================================

    async fn find_authorization(&self, id: Uuid) -> Result<Option<AuthorizationRequest>> {
        let sql = format!(
            "SELECT {} FROM authorization_requests WHERE id = $1",
            AUTHORIZATION_COLUMNS
        );
        let row = sqlx::query_as::<_, AuthorizationRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(Into::into))
    }

    async fn find_authorization_by_run(
        &self,
        run_id: Uuid,
    ) -> Result<Option<AuthorizationRequest>> {
        let sql = format!(
            "SELECT {} FROM authorization_requests WHERE pipeline_run_id = $1",
            AUTHORIZATION_COLUMNS
        );
        let row = sqlx::query_as::<_, AuthorizationRow>(&sql)
            .bind(run_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(Into::into))
    }

    async fn list_authorizations(&self) -> Result<Vec<AuthorizationRequest>> {
        let sql = format!(
            "SELECT {} FROM authorization_requests ORDER BY created_at DESC",
            AUTHORIZATION_COLUMNS
        );
        let rows = sqlx::query_as::<_, AuthorizationRow>(&sql)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn resolve_authorization(&self, resolution: &AuthorizationResolution) -> Result<bool> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        // The status guard makes a concurrent second decision a no-op
        let updated = sqlx::query(
            r#"
            UPDATE authorization_requests
            SET status = $1, approver_id = $2, comment = $3, updated_at = $4
            WHERE id = $5 AND status = 'pending'
            "#,
        )
        .bind(resolution.status.as_str())
        .bind(resolution.approver_id)
        .bind(&resolution.comment)
        .bind(now)
        .bind(resolution.request_id)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        sqlx::query(
            r#"
            UPDATE pipeline_runs
            SET status = $1, approver_id = $2, updated_at = $3
            WHERE id = $4
            "#,
        )
        .bind(resolution.status.as_str())
        .bind(resolution.approver_id)
        .bind(now)
        .bind(resolution.run_id)
        .execute(&mut *tx)
        .await?;

        let history = &resolution.history;
        sqlx::query(
            r#"
            INSERT INTO execution_history (id, pipeline_run_id, pipeline_unit_id, requester_id,
                                           requester_name, approver_id, approver_name, status,
                                           started_at, completed_at, execution_time_ms,
                                           error_message, macro_service_name, micro_service_names)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#,
        )
        .bind(history.id)
        .bind(history.pipeline_run_id)
        .bind(history.pipeline_unit_id)
        .bind(history.requester_id)
        .bind(&history.requester_name)
        .bind(history.approver_id)
        .bind(&history.approver_name)
        .bind(history.status.as_str())
        .bind(history.started_at)
        .bind(history.completed_at)
        .bind(history.execution_time_ms)
        .bind(&history.error_message)
        .bind(&history.macro_service_name)
        .bind(&history.micro_service_names)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(true)
    }

    // =========================================================================
    // Execution History
    // =========================================================================

    async fn finish_history(&self, id: Uuid, completion: &HistoryCompletion) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE execution_history
            SET status = $1, completed_at = $2, execution_time_ms = $3, error_message = $4
            WHERE id = $5
            "#,
        )
        .bind(completion.status.as_str())
        .bind(completion.completed_at)
        .bind(completion.execution_time_ms)
        .bind(&completion.error_message)
        .bind(id)
        .execute(&self.pool)
        .await?;

        ensure_updated(result.rows_affected(), "Execution history", id)
    }

    async fn list_history_for_run(&self, run_id: Uuid) -> Result<Vec<ExecutionHistory>> {
        let sql = format!(
            "SELECT {} FROM execution_history WHERE pipeline_run_id = $1 ORDER BY started_at DESC",
            HISTORY_COLUMNS
        );
        let rows = sqlx::query_as::<_, HistoryRow>(&sql)
            .bind(run_id)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn list_histories(&self) -> Result<Vec<ExecutionHistory>> {
        let sql = format!(
            "SELECT {} FROM execution_history ORDER BY started_at DESC",
            HISTORY_COLUMNS
        );
        let rows = sqlx::query_as::<_, HistoryRow>(&sql)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

fn ensure_updated(rows_affected: u64, entity: &str, id: Uuid) -> Result<()> {
    if rows_affected == 0 {
        return Err(RepositoryError::NotFound(format!("{} {}", entity, id)));
    }
    Ok(())
}

fn string_to_status(s: &str) -> PipelineStatus {
    s.parse().unwrap_or_else(|err| {
        tracing::warn!("{}, treating as pending", err);
        PipelineStatus::Pending
    })
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct ServiceRow {
    id: Uuid,
    gitlab_repo_id: String,
    name: String,
    url: String,
    #[sqlx(rename = "type")]
    kind: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<ServiceRow> for Service {
    fn from(row: ServiceRow) -> Self {
        Service {
            id: row.id,
            gitlab_repo_id: row.gitlab_repo_id,
            name: row.name,
            url: row.url,
            kind: row.kind.parse().unwrap_or(ServiceKind::Micro),
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct UnitRow {
    id: Uuid,
    macro_service_id: Option<Uuid>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl UnitRow {
    fn into_unit(self, micro_service_ids: Vec<Uuid>) -> PipelineUnit {
        PipelineUnit {
            id: self.id,
            macro_service_id: self.macro_service_id,
            micro_service_ids,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct DependencyRow {
    pipeline_unit_id: Uuid,
    micro_service_id: Uuid,
}

#[derive(sqlx::FromRow)]
struct RunRow {
    id: Uuid,
    pipeline_unit_id: Uuid,
    status: String,
    selected_micro_service_ids: Vec<Uuid>,
    gitlab_pipeline_id: Option<i64>,
    approver_id: Option<Uuid>,
    execution_time_ms: Option<i64>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<RunRow> for PipelineRun {
    fn from(row: RunRow) -> Self {
        PipelineRun {
            id: row.id,
            pipeline_unit_id: row.pipeline_unit_id,
            status: string_to_status(&row.status),
            selected_micro_service_ids: row.selected_micro_service_ids,
            gitlab_pipeline_id: row.gitlab_pipeline_id,
            approver_id: row.approver_id,
            execution_time_ms: row.execution_time_ms,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct AuthorizationRow {
    id: Uuid,
    pipeline_run_id: Uuid,
    requester_id: Uuid,
    approver_id: Option<Uuid>,
    status: String,
    comment: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<AuthorizationRow> for AuthorizationRequest {
    fn from(row: AuthorizationRow) -> Self {
        AuthorizationRequest {
            id: row.id,
            pipeline_run_id: row.pipeline_run_id,
            requester_id: row.requester_id,
            requester_name: None,
            approver_id: row.approver_id,
            approver_name: None,
            status: string_to_status(&row.status),
            comment: row.comment,
            macro_service_name: None,
            micro_service_names: vec![],
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct HistoryRow {
    id: Uuid,
    pipeline_run_id: Uuid,
    pipeline_unit_id: Uuid,
    requester_id: Uuid,
    requester_name: Option<String>,
    approver_id: Option<Uuid>,
    approver_name: Option<String>,
    status: String,
    started_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
    execution_time_ms: Option<i64>,
    error_message: Option<String>,
    macro_service_name: Option<String>,
    micro_service_names: Vec<String>,
}

impl From<HistoryRow> for ExecutionHistory {
    fn from(row: HistoryRow) -> Self {
        ExecutionHistory {
            id: row.id,
            pipeline_run_id: row.pipeline_run_id,
            pipeline_unit_id: row.pipeline_unit_id,
            requester_id: row.requester_id,
            requester_name: row.requester_name,
            approver_id: row.approver_id,
            approver_name: row.approver_name,
            status: string_to_status(&row.status),
            started_at: row.started_at,
            completed_at: row.completed_at,
            execution_time_ms: row.execution_time_ms,
            error_message: row.error_message,
            macro_service_name: row.macro_service_name,
            micro_service_names: row.micro_service_names,
        }
    }
}

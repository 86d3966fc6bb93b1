use sqlx::{PgPool, postgres::PgPoolOptions};
use std::time::Duration;

pub async fn create_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(5))
        .connect(database_url)
        .await
}

pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    // Monitored endpoints, identity enforced by the unique tuple
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS endpoints (
            id UUID PRIMARY KEY,
            service_name VARCHAR(255) NOT NULL,
            server_name VARCHAR(255) NOT NULL,
            url TEXT NOT NULL,
            api_method VARCHAR(16) NOT NULL,
            expected_status_code INTEGER NOT NULL,
            gitlab_url TEXT,
            docker_container_name TEXT,
            kubernetes_pod_name TEXT,
            tags TEXT[] NOT NULL DEFAULT '{}',
            description TEXT,
            last_changed_by TEXT,
            created_at TIMESTAMPTZ NOT NULL,
            UNIQUE (url, api_method, server_name, expected_status_code)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Immutable probe log
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS checks (
            id BIGSERIAL PRIMARY KEY,
            endpoint_id UUID NOT NULL REFERENCES endpoints(id) ON DELETE CASCADE,
            status_code INTEGER,
            latency_ms BIGINT NOT NULL,
            error TEXT,
            success BOOLEAN NOT NULL,
            checked_at TIMESTAMPTZ NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS endpoint_stats (
            endpoint_id UUID PRIMARY KEY REFERENCES endpoints(id) ON DELETE CASCADE,
            total_checks BIGINT NOT NULL DEFAULT 0,
            total_latency BIGINT NOT NULL DEFAULT 0,
            successful_checks BIGINT NOT NULL DEFAULT 0,
            failure_count BIGINT NOT NULL DEFAULT 0,
            last_run BOOLEAN NOT NULL DEFAULT FALSE
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_checks_endpoint_id ON checks(endpoint_id, checked_at DESC)")
        .execute(pool)
        .await?;

    // Users are managed by the identity service; only contact data is read here
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS users (
            id UUID PRIMARY KEY,
            name VARCHAR(255) NOT NULL,
            email VARCHAR(255) NOT NULL,
            delivery_email VARCHAR(255)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS services (
            id UUID PRIMARY KEY,
            gitlab_repo_id VARCHAR(255) NOT NULL UNIQUE,
            name VARCHAR(255) NOT NULL,
            url TEXT NOT NULL,
            type VARCHAR(10) NOT NULL CHECK (type IN ('macro', 'micro')),
            created_at TIMESTAMPTZ NOT NULL,
            updated_at TIMESTAMPTZ NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS pipeline_units (
            id UUID PRIMARY KEY,
            macro_service_id UUID REFERENCES services(id),
            created_at TIMESTAMPTZ NOT NULL,
            updated_at TIMESTAMPTZ NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS pipeline_dependencies (
            pipeline_unit_id UUID NOT NULL REFERENCES pipeline_units(id) ON DELETE CASCADE,
            micro_service_id UUID NOT NULL REFERENCES services(id),
            order_index INTEGER NOT NULL,
            PRIMARY KEY (pipeline_unit_id, micro_service_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS pipeline_runs (
            id UUID PRIMARY KEY,
            pipeline_unit_id UUID NOT NULL REFERENCES pipeline_units(id),
            status VARCHAR(20) NOT NULL,
            selected_micro_service_ids UUID[] NOT NULL DEFAULT '{}',
            gitlab_pipeline_id BIGINT,
            approver_id UUID,
            execution_time_ms BIGINT,
            created_at TIMESTAMPTZ NOT NULL,
            updated_at TIMESTAMPTZ NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS authorization_requests (
            id UUID PRIMARY KEY,
            pipeline_run_id UUID NOT NULL UNIQUE REFERENCES pipeline_runs(id) ON DELETE CASCADE,
            requester_id UUID NOT NULL,
            approver_id UUID,
            status VARCHAR(20) NOT NULL,
            comment TEXT,
            created_at TIMESTAMPTZ NOT NULL,
            updated_at TIMESTAMPTZ NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS execution_history (
            id UUID PRIMARY KEY,
            pipeline_run_id UUID NOT NULL REFERENCES pipeline_runs(id) ON DELETE CASCADE,
            pipeline_unit_id UUID NOT NULL,
            requester_id UUID NOT NULL,
            requester_name VARCHAR(255),
            approver_id UUID,
            approver_name VARCHAR(255),
            status VARCHAR(20) NOT NULL,
            started_at TIMESTAMPTZ NOT NULL,
            completed_at TIMESTAMPTZ,
            execution_time_ms BIGINT,
            error_message TEXT,
            macro_service_name VARCHAR(255),
            micro_service_names TEXT[] NOT NULL DEFAULT '{}'
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_pipeline_runs_status ON pipeline_runs(status)")
        .execute(pool)
        .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_execution_history_run ON execution_history(pipeline_run_id, started_at DESC)",
    )
    .execute(pool)
    .await?;

    tracing::info!("Database migrations completed successfully");
    Ok(())
}

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
    // Create pipeline table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS pipeline (
            id BIGSERIAL PRIMARY KEY,
            name VARCHAR(255) NOT NULL,
            description TEXT,
            schedule_interval VARCHAR(255) NOT NULL DEFAULT 'None',
            start_date TIMESTAMPTZ NOT NULL,
            date_created TIMESTAMPTZ NOT NULL,
            username_created VARCHAR(255),
            hard_code_data BOOLEAN NOT NULL DEFAULT FALSE,
            sequential BOOLEAN NOT NULL DEFAULT TRUE,
            definition JSONB NOT NULL DEFAULT '{}',
            task_order JSONB NOT NULL DEFAULT '[]',
            default_args JSONB NOT NULL DEFAULT '{}',
            pipeline_file_path TEXT,
            tags TEXT[] NOT NULL DEFAULT '{}',
            deleted BOOLEAN NOT NULL DEFAULT FALSE,
            max_active_runs INTEGER NOT NULL DEFAULT 100,
            concurrency INTEGER NOT NULL DEFAULT 1
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create task_run table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS task_run (
            id BIGSERIAL PRIMARY KEY,
            pipeline_id BIGINT REFERENCES pipeline(id),
            task_id VARCHAR(255),
            module_name VARCHAR(255) NOT NULL,
            class_name VARCHAR(255) NOT NULL,
            pipeline_run_id VARCHAR(255),
            upstream_task_run_id BIGINT REFERENCES task_run(id),
            username VARCHAR(255),
            args JSONB NOT NULL DEFAULT '{}',
            output JSONB,
            status VARCHAR(20) NOT NULL,
            saved_query_id BIGINT,
            db_env VARCHAR(10),
            execution_date VARCHAR(255),
            datetime_started TIMESTAMPTZ,
            datetime_finished TIMESTAMPTZ,
            created_by_add_task BOOLEAN NOT NULL DEFAULT FALSE
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Names are unique among live pipelines only
    sqlx::query(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_pipeline_live_name ON pipeline(name) WHERE deleted = FALSE",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_task_run_pipeline_task ON task_run(pipeline_id, task_id, status)",
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_task_run_status ON task_run(status)")
        .execute(pool)
        .await?;

    tracing::info!("Database migrations completed successfully");
    Ok(())
}

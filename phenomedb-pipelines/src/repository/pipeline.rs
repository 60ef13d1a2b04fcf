//! Pipeline Repository
//!
//! Handles all database operations related to pipelines.

use chrono::{DateTime, Utc};
use phenomedb_core::domain::pipeline::Pipeline;
use phenomedb_core::dto::pipeline::CreatePipeline;
use sqlx::PgConnection;

use super::{StoreError, StoreResult};

const COLUMNS: &str = r#"
    id, name, description, schedule_interval, start_date, date_created,
    username_created, hard_code_data, sequential, definition, task_order,
    default_args, pipeline_file_path, tags, deleted, max_active_runs, concurrency
"#;

/// Create a new pipeline with an empty definition
pub async fn create(conn: &mut PgConnection, req: CreatePipeline) -> StoreResult<Pipeline> {
    let sql = format!(
        r#"
        INSERT INTO pipeline (
            name, description, schedule_interval, start_date, date_created,
            username_created, hard_code_data, sequential, definition, task_order,
            default_args, pipeline_file_path, tags, deleted, max_active_runs, concurrency
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, '{{}}'::jsonb, '[]'::jsonb, $9, $10, $11, FALSE, $12, $13)
        RETURNING {COLUMNS}
        "#
    );

    let row = sqlx::query_as::<_, PipelineRow>(&sql)
        .bind(&req.name)
        .bind(&req.description)
        .bind(req.schedule_interval.as_str())
        .bind(req.start_date)
        .bind(Utc::now())
        .bind(&req.username_created)
        .bind(req.hard_code_data)
        .bind(req.sequential)
        .bind(serde_json::to_value(&req.default_args)?)
        .bind(&req.pipeline_file_path)
        .bind(&req.tags)
        .bind(req.max_active_runs)
        .bind(req.concurrency)
        .fetch_one(conn)
        .await?;

    row.try_into()
}

/// Find a pipeline by ID, including soft-deleted ones
pub async fn find_by_id(conn: &mut PgConnection, id: i64) -> StoreResult<Option<Pipeline>> {
    let sql = format!("SELECT {COLUMNS} FROM pipeline WHERE id = $1");

    let row = sqlx::query_as::<_, PipelineRow>(&sql)
        .bind(id)
        .fetch_optional(conn)
        .await?;

    row.map(Pipeline::try_from).transpose()
}

/// Find a live pipeline by name
pub async fn find_by_name(conn: &mut PgConnection, name: &str) -> StoreResult<Option<Pipeline>> {
    let sql = format!(
        "SELECT {COLUMNS} FROM pipeline WHERE name = $1 AND deleted = FALSE ORDER BY id LIMIT 1"
    );

    let row = sqlx::query_as::<_, PipelineRow>(&sql)
        .bind(name)
        .fetch_optional(conn)
        .await?;

    row.map(Pipeline::try_from).transpose()
}

/// Persist every mutable column of a pipeline
pub async fn update(conn: &mut PgConnection, pipeline: &Pipeline) -> StoreResult<()> {
    let result = sqlx::query(
        r#"
        UPDATE pipeline
        SET name = $1, description = $2, schedule_interval = $3, start_date = $4,
            username_created = $5, hard_code_data = $6, sequential = $7, definition = $8,
            task_order = $9, default_args = $10, pipeline_file_path = $11, tags = $12,
            deleted = $13, max_active_runs = $14, concurrency = $15
        WHERE id = $16
        "#,
    )
    .bind(&pipeline.name)
    .bind(&pipeline.description)
    .bind(pipeline.schedule_interval.as_str())
    .bind(pipeline.start_date)
    .bind(&pipeline.username_created)
    .bind(pipeline.hard_code_data)
    .bind(pipeline.sequential)
    .bind(serde_json::to_value(&pipeline.definition)?)
    .bind(serde_json::to_value(&pipeline.task_order)?)
    .bind(serde_json::to_value(&pipeline.default_args)?)
    .bind(&pipeline.pipeline_file_path)
    .bind(&pipeline.tags)
    .bind(pipeline.deleted)
    .bind(pipeline.max_active_runs)
    .bind(pipeline.concurrency)
    .bind(pipeline.id)
    .execute(conn)
    .await?;

    if result.rows_affected() == 0 {
        return Err(StoreError::RowNotFound {
            table: "pipeline",
            id: pipeline.id,
        });
    }

    Ok(())
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct PipelineRow {
    id: i64,
    name: String,
    description: Option<String>,
    schedule_interval: String,
    start_date: DateTime<Utc>,
    date_created: DateTime<Utc>,
    username_created: Option<String>,
    hard_code_data: bool,
    sequential: bool,
    definition: serde_json::Value,
    task_order: serde_json::Value,
    default_args: serde_json::Value,
    pipeline_file_path: Option<String>,
    tags: Vec<String>,
    deleted: bool,
    max_active_runs: i32,
    concurrency: i32,
}

impl TryFrom<PipelineRow> for Pipeline {
    type Error = StoreError;

    fn try_from(row: PipelineRow) -> Result<Self, Self::Error> {
        let pipeline = Pipeline {
            id: row.id,
            name: row.name,
            description: row.description,
            schedule_interval: row.schedule_interval.into(),
            start_date: row.start_date,
            date_created: row.date_created,
            username_created: row.username_created,
            hard_code_data: row.hard_code_data,
            sequential: row.sequential,
            definition: serde_json::from_value(row.definition)?,
            task_order: serde_json::from_value(row.task_order)?,
            default_args: serde_json::from_value(row.default_args)?,
            pipeline_file_path: row.pipeline_file_path,
            tags: row.tags,
            deleted: row.deleted,
            max_active_runs: row.max_active_runs,
            concurrency: row.concurrency,
        };

        let mut ordered: Vec<&String> = pipeline.task_order.iter().collect();
        ordered.sort();
        ordered.dedup();
        if ordered.len() != pipeline.task_order.len()
            || !ordered.iter().copied().eq(pipeline.definition.keys())
        {
            return Err(StoreError::Corrupt {
                column: "task_order",
                message: format!(
                    "pipeline {} task_order does not match its definition",
                    pipeline.id
                ),
            });
        }

        Ok(pipeline)
    }
}

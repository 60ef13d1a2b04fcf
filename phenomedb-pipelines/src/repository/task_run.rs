//! Task Run Repository
//!
//! Handles all database operations related to task runs.

use chrono::{DateTime, Utc};
use phenomedb_core::domain::env::DbEnv;
use phenomedb_core::domain::task_run::{TaskRun, TaskRunStatus};
use phenomedb_core::dto::task_run::{CreateTaskRun, TaskRunFilter};
use sqlx::{PgConnection, Postgres, QueryBuilder};

use super::{StoreError, StoreResult};

const COLUMNS: &str = r#"
    id, pipeline_id, task_id, module_name, class_name, pipeline_run_id,
    upstream_task_run_id, username, args, output, status, saved_query_id,
    db_env, execution_date, datetime_started, datetime_finished, created_by_add_task
"#;

/// Create a new task run in status `created`
pub async fn create(conn: &mut PgConnection, req: CreateTaskRun) -> StoreResult<TaskRun> {
    let sql = format!(
        r#"
        INSERT INTO task_run (
            pipeline_id, task_id, module_name, class_name, username, args, status,
            saved_query_id, db_env, datetime_started, created_by_add_task
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        RETURNING {COLUMNS}
        "#
    );

    let row = sqlx::query_as::<_, TaskRunRow>(&sql)
        .bind(req.pipeline_id)
        .bind(&req.task_id)
        .bind(&req.module_name)
        .bind(&req.class_name)
        .bind(&req.username)
        .bind(serde_json::Value::Object(req.args))
        .bind(TaskRunStatus::Created.as_str())
        .bind(req.saved_query_id)
        .bind(req.db_env.as_str())
        .bind(req.datetime_started)
        .bind(req.created_by_add_task)
        .fetch_one(conn)
        .await?;

    row.try_into()
}

/// Find a task run by ID
pub async fn find_by_id(conn: &mut PgConnection, id: i64) -> StoreResult<Option<TaskRun>> {
    let sql = format!("SELECT {COLUMNS} FROM task_run WHERE id = $1");

    let row = sqlx::query_as::<_, TaskRunRow>(&sql)
        .bind(id)
        .fetch_optional(conn)
        .await?;

    row.map(TaskRun::try_from).transpose()
}

/// Find task runs matching a filter, oldest first
pub async fn find(conn: &mut PgConnection, filter: &TaskRunFilter) -> StoreResult<Vec<TaskRun>> {
    let mut query = QueryBuilder::<Postgres>::new(format!("SELECT {COLUMNS} FROM task_run WHERE TRUE"));

    if let Some(pipeline_id) = filter.pipeline_id {
        query.push(" AND pipeline_id = ").push_bind(pipeline_id);
    }
    if let Some(task_id) = &filter.task_id {
        query.push(" AND task_id = ").push_bind(task_id.clone());
    }
    if let Some(status) = filter.status {
        query.push(" AND status = ").push_bind(status.as_str());
    }
    if let Some(created_by_add_task) = filter.created_by_add_task {
        query
            .push(" AND created_by_add_task = ")
            .push_bind(created_by_add_task);
    }
    query.push(" ORDER BY id");

    let rows = query.build_query_as::<TaskRunRow>().fetch_all(conn).await?;

    rows.into_iter().map(TaskRun::try_from).collect()
}

/// Persist every mutable column of a task run
pub async fn update(conn: &mut PgConnection, task_run: &TaskRun) -> StoreResult<()> {
    let result = sqlx::query(
        r#"
        UPDATE task_run
        SET pipeline_run_id = $1, upstream_task_run_id = $2, username = $3, args = $4,
            output = $5, status = $6, saved_query_id = $7, db_env = $8, execution_date = $9,
            datetime_started = $10, datetime_finished = $11
        WHERE id = $12
        "#,
    )
    .bind(&task_run.pipeline_run_id)
    .bind(task_run.upstream_task_run_id)
    .bind(&task_run.username)
    .bind(serde_json::Value::Object(task_run.args.clone()))
    .bind(&task_run.output)
    .bind(task_run.status.as_str())
    .bind(task_run.saved_query_id)
    .bind(task_run.db_env.as_str())
    .bind(&task_run.execution_date)
    .bind(task_run.datetime_started)
    .bind(task_run.datetime_finished)
    .bind(task_run.id)
    .execute(conn)
    .await?;

    if result.rows_affected() == 0 {
        return Err(StoreError::RowNotFound {
            table: "task_run",
            id: task_run.id,
        });
    }

    Ok(())
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct TaskRunRow {
    id: i64,
    pipeline_id: Option<i64>,
    task_id: Option<String>,
    module_name: String,
    class_name: String,
    pipeline_run_id: Option<String>,
    upstream_task_run_id: Option<i64>,
    username: Option<String>,
    args: serde_json::Value,
    output: Option<serde_json::Value>,
    status: String,
    saved_query_id: Option<i64>,
    db_env: Option<String>,
    execution_date: Option<String>,
    datetime_started: Option<DateTime<Utc>>,
    datetime_finished: Option<DateTime<Utc>>,
    created_by_add_task: bool,
}

impl TryFrom<TaskRunRow> for TaskRun {
    type Error = StoreError;

    fn try_from(row: TaskRunRow) -> Result<Self, Self::Error> {
        let status = row
            .status
            .parse::<TaskRunStatus>()
            .map_err(|message| StoreError::Corrupt {
                column: "status",
                message,
            })?;

        let args = match row.args {
            serde_json::Value::Object(map) => map,
            serde_json::Value::Null => serde_json::Map::new(),
            other => {
                return Err(StoreError::Corrupt {
                    column: "args",
                    message: format!("task run {} args is not an object: {}", row.id, other),
                });
            }
        };

        Ok(TaskRun {
            id: row.id,
            pipeline_id: row.pipeline_id,
            task_id: row.task_id,
            module_name: row.module_name,
            class_name: row.class_name,
            pipeline_run_id: row.pipeline_run_id,
            upstream_task_run_id: row.upstream_task_run_id,
            username: row.username,
            args,
            output: row.output,
            status,
            saved_query_id: row.saved_query_id,
            db_env: DbEnv::from_optional(row.db_env.as_deref()),
            execution_date: row.execution_date,
            datetime_started: row.datetime_started,
            datetime_finished: row.datetime_finished,
            created_by_add_task: row.created_by_add_task,
        })
    }
}

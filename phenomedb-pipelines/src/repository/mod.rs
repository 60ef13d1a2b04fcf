//! Repository Module
//!
//! Data access layer for pipelines and task runs.
//!
//! `PipelineStore` models a database session: writes are visible to later
//! reads on the same store straight away (flush), and only become durable on
//! `commit`. `rollback` discards everything since the last commit.

pub mod memory;
pub mod pipeline;
pub mod postgres;
pub mod task_run;

// Re-export for convenience
pub use memory::MemoryStore;
pub use pipeline as pipeline_repository;
pub use postgres::PgStore;
pub use task_run as task_run_repository;

use async_trait::async_trait;
use phenomedb_core::domain::pipeline::Pipeline;
use phenomedb_core::domain::task_run::TaskRun;
use phenomedb_core::dto::pipeline::CreatePipeline;
use phenomedb_core::dto::task_run::{CreateTaskRun, TaskRunFilter};
use thiserror::Error;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Corrupt {column} value: {message}")]
    Corrupt { column: &'static str, message: String },

    #[error("{table} row {id} not found")]
    RowNotFound { table: &'static str, id: i64 },
}

/// Session-scoped persistence for pipelines and task runs
#[async_trait]
pub trait PipelineStore: Send + Sync {
    async fn find_pipeline(&self, id: i64) -> StoreResult<Option<Pipeline>>;

    /// Looks up a non-deleted pipeline by exact name.
    async fn find_pipeline_by_name(&self, name: &str) -> StoreResult<Option<Pipeline>>;

    async fn create_pipeline(&self, req: CreatePipeline) -> StoreResult<Pipeline>;

    async fn update_pipeline(&self, pipeline: &Pipeline) -> StoreResult<()>;

    async fn create_task_run(&self, req: CreateTaskRun) -> StoreResult<TaskRun>;

    async fn find_task_run(&self, id: i64) -> StoreResult<Option<TaskRun>>;

    /// Task runs matching `filter`, ordered by id.
    async fn find_task_runs(&self, filter: &TaskRunFilter) -> StoreResult<Vec<TaskRun>>;

    async fn update_task_run(&self, task_run: &TaskRun) -> StoreResult<()>;

    async fn commit(&self) -> StoreResult<()>;

    async fn rollback(&self) -> StoreResult<()>;

    /// Oldest task run matching `filter`.
    async fn find_first_task_run(&self, filter: &TaskRunFilter) -> StoreResult<Option<TaskRun>> {
        Ok(self.find_task_runs(filter).await?.into_iter().next())
    }
}

//! Postgres-backed store
//!
//! One transaction per store, opened by the first statement and closed by
//! `commit` or `rollback`.

use async_trait::async_trait;
use phenomedb_core::domain::pipeline::Pipeline;
use phenomedb_core::domain::task_run::TaskRun;
use phenomedb_core::dto::pipeline::CreatePipeline;
use phenomedb_core::dto::task_run::{CreateTaskRun, TaskRunFilter};
use sqlx::{PgConnection, PgPool, Postgres, Transaction};
use tokio::sync::Mutex;

use super::{PipelineStore, StoreResult, pipeline_repository, task_run_repository};

pub struct PgStore {
    pool: PgPool,
    tx: Mutex<Option<Transaction<'static, Postgres>>>,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            tx: Mutex::new(None),
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Connection of the open transaction, beginning one if needed
    async fn session<'a>(
        &self,
        slot: &'a mut Option<Transaction<'static, Postgres>>,
    ) -> StoreResult<&'a mut PgConnection> {
        let tx = match slot.take() {
            Some(tx) => tx,
            None => self.pool.begin().await?,
        };
        let tx = slot.insert(tx);
        Ok(&mut **tx)
    }
}

#[async_trait]
impl PipelineStore for PgStore {
    async fn find_pipeline(&self, id: i64) -> StoreResult<Option<Pipeline>> {
        let mut slot = self.tx.lock().await;
        let conn = self.session(&mut slot).await?;
        pipeline_repository::find_by_id(conn, id).await
    }

    async fn find_pipeline_by_name(&self, name: &str) -> StoreResult<Option<Pipeline>> {
        let mut slot = self.tx.lock().await;
        let conn = self.session(&mut slot).await?;
        pipeline_repository::find_by_name(conn, name).await
    }

    async fn create_pipeline(&self, req: CreatePipeline) -> StoreResult<Pipeline> {
        let mut slot = self.tx.lock().await;
        let conn = self.session(&mut slot).await?;
        pipeline_repository::create(conn, req).await
    }

    async fn update_pipeline(&self, pipeline: &Pipeline) -> StoreResult<()> {
        let mut slot = self.tx.lock().await;
        let conn = self.session(&mut slot).await?;
        pipeline_repository::update(conn, pipeline).await
    }

    async fn create_task_run(&self, req: CreateTaskRun) -> StoreResult<TaskRun> {
        let mut slot = self.tx.lock().await;
        let conn = self.session(&mut slot).await?;
        task_run_repository::create(conn, req).await
    }

    async fn find_task_run(&self, id: i64) -> StoreResult<Option<TaskRun>> {
        let mut slot = self.tx.lock().await;
        let conn = self.session(&mut slot).await?;
        task_run_repository::find_by_id(conn, id).await
    }

    async fn find_task_runs(&self, filter: &TaskRunFilter) -> StoreResult<Vec<TaskRun>> {
        let mut slot = self.tx.lock().await;
        let conn = self.session(&mut slot).await?;
        task_run_repository::find(conn, filter).await
    }

    async fn update_task_run(&self, task_run: &TaskRun) -> StoreResult<()> {
        let mut slot = self.tx.lock().await;
        let conn = self.session(&mut slot).await?;
        task_run_repository::update(conn, task_run).await
    }

    async fn commit(&self) -> StoreResult<()> {
        if let Some(tx) = self.tx.lock().await.take() {
            tx.commit().await?;
            tracing::debug!("Transaction committed");
        }
        Ok(())
    }

    async fn rollback(&self) -> StoreResult<()> {
        if let Some(tx) = self.tx.lock().await.take() {
            tx.rollback().await?;
            tracing::debug!("Transaction rolled back");
        }
        Ok(())
    }
}

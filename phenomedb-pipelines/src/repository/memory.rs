//! In-memory store
//!
//! Same session semantics as the Postgres store: the first write takes a
//! working copy of the committed tables, `commit` publishes it and `rollback`
//! throws it away. Ids come from sequences that are not rolled back.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::Utc;
use phenomedb_core::domain::pipeline::Pipeline;
use phenomedb_core::domain::task_run::{TaskRun, TaskRunStatus};
use phenomedb_core::dto::pipeline::CreatePipeline;
use phenomedb_core::dto::task_run::{CreateTaskRun, TaskRunFilter};
use tokio::sync::Mutex;

use super::{PipelineStore, StoreError, StoreResult};

#[derive(Debug, Clone, Default)]
struct Tables {
    pipelines: BTreeMap<i64, Pipeline>,
    task_runs: BTreeMap<i64, TaskRun>,
}

#[derive(Debug, Default)]
struct Inner {
    committed: Tables,
    working: Option<Tables>,
    pipeline_seq: i64,
    task_run_seq: i64,
}

impl Inner {
    fn read(&self) -> &Tables {
        self.working.as_ref().unwrap_or(&self.committed)
    }

    fn write(&mut self) -> &mut Tables {
        let committed = &self.committed;
        self.working.get_or_insert_with(|| committed.clone())
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pipelines as of the last commit
    pub async fn committed_pipelines(&self) -> Vec<Pipeline> {
        self.inner.lock().await.committed.pipelines.values().cloned().collect()
    }

    /// Task runs as of the last commit
    pub async fn committed_task_runs(&self) -> Vec<TaskRun> {
        self.inner.lock().await.committed.task_runs.values().cloned().collect()
    }
}

fn matches(task_run: &TaskRun, filter: &TaskRunFilter) -> bool {
    filter.pipeline_id.is_none_or(|id| task_run.pipeline_id == Some(id))
        && filter
            .task_id
            .as_deref()
            .is_none_or(|id| task_run.task_id.as_deref() == Some(id))
        && filter.status.is_none_or(|s| task_run.status == s)
        && filter
            .created_by_add_task
            .is_none_or(|flag| task_run.created_by_add_task == flag)
}

#[async_trait]
impl PipelineStore for MemoryStore {
    async fn find_pipeline(&self, id: i64) -> StoreResult<Option<Pipeline>> {
        Ok(self.inner.lock().await.read().pipelines.get(&id).cloned())
    }

    async fn find_pipeline_by_name(&self, name: &str) -> StoreResult<Option<Pipeline>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .read()
            .pipelines
            .values()
            .find(|p| p.name == name && !p.deleted)
            .cloned())
    }

    async fn create_pipeline(&self, req: CreatePipeline) -> StoreResult<Pipeline> {
        let mut inner = self.inner.lock().await;
        inner.pipeline_seq += 1;
        let id = inner.pipeline_seq;

        let pipeline = Pipeline {
            id,
            name: req.name,
            description: req.description,
            schedule_interval: req.schedule_interval,
            start_date: req.start_date,
            date_created: Utc::now(),
            username_created: req.username_created,
            hard_code_data: req.hard_code_data,
            sequential: req.sequential,
            definition: BTreeMap::new(),
            task_order: Vec::new(),
            default_args: req.default_args,
            pipeline_file_path: req.pipeline_file_path,
            tags: req.tags,
            deleted: false,
            max_active_runs: req.max_active_runs,
            concurrency: req.concurrency,
        };

        inner.write().pipelines.insert(id, pipeline.clone());
        Ok(pipeline)
    }

    async fn update_pipeline(&self, pipeline: &Pipeline) -> StoreResult<()> {
        let mut inner = self.inner.lock().await;
        match inner.write().pipelines.get_mut(&pipeline.id) {
            Some(slot) => {
                *slot = pipeline.clone();
                Ok(())
            }
            None => Err(StoreError::RowNotFound {
                table: "pipeline",
                id: pipeline.id,
            }),
        }
    }

    async fn create_task_run(&self, req: CreateTaskRun) -> StoreResult<TaskRun> {
        let mut inner = self.inner.lock().await;
        inner.task_run_seq += 1;
        let id = inner.task_run_seq;

        let task_run = TaskRun {
            id,
            pipeline_id: req.pipeline_id,
            task_id: req.task_id,
            module_name: req.module_name,
            class_name: req.class_name,
            pipeline_run_id: None,
            upstream_task_run_id: None,
            username: req.username,
            args: req.args,
            output: None,
            status: TaskRunStatus::Created,
            saved_query_id: req.saved_query_id,
            db_env: req.db_env,
            execution_date: None,
            datetime_started: req.datetime_started,
            datetime_finished: None,
            created_by_add_task: req.created_by_add_task,
        };

        inner.write().task_runs.insert(id, task_run.clone());
        Ok(task_run)
    }

    async fn find_task_run(&self, id: i64) -> StoreResult<Option<TaskRun>> {
        Ok(self.inner.lock().await.read().task_runs.get(&id).cloned())
    }

    async fn find_task_runs(&self, filter: &TaskRunFilter) -> StoreResult<Vec<TaskRun>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .read()
            .task_runs
            .values()
            .filter(|t| matches(t, filter))
            .cloned()
            .collect())
    }

    async fn update_task_run(&self, task_run: &TaskRun) -> StoreResult<()> {
        let mut inner = self.inner.lock().await;
        match inner.write().task_runs.get_mut(&task_run.id) {
            Some(slot) => {
                *slot = task_run.clone();
                Ok(())
            }
            None => Err(StoreError::RowNotFound {
                table: "task_run",
                id: task_run.id,
            }),
        }
    }

    async fn commit(&self) -> StoreResult<()> {
        let mut inner = self.inner.lock().await;
        if let Some(working) = inner.working.take() {
            inner.committed = working;
        }
        Ok(())
    }

    async fn rollback(&self) -> StoreResult<()> {
        self.inner.lock().await.working = None;
        Ok(())
    }
}

//! In-process task execution for debug runs.
//!
//! Stands in for the scheduler's task execution environment: each task run is
//! moved through `started` to `success` or `error`, committing after every
//! transition so progress is visible to other sessions.

use std::sync::Arc;

use chrono::Utc;
use phenomedb_core::domain::task_run::{TaskRun, TaskRunStatus};
use serde_json::json;

use crate::cache::Cache;
use crate::error::{PipelineError, Result};
use crate::registry::TaskRegistry;
use crate::repository::PipelineStore;

pub struct DebugExecutor {
    store: Arc<dyn PipelineStore>,
    registry: Arc<TaskRegistry>,
    /// Output destination; without one, output stays in the task run row
    cache: Option<Arc<dyn Cache>>,
}

impl DebugExecutor {
    pub fn new(store: Arc<dyn PipelineStore>, registry: Arc<TaskRegistry>, cache: Option<Arc<dyn Cache>>) -> Self {
        Self { store, registry, cache }
    }

    /// Runs one task run to completion
    pub async fn execute(&self, task_run: &mut TaskRun) -> Result<()> {
        let task = self.registry.runner(&task_run.module_name, &task_run.class_name)?;
        let label = task_run
            .task_id
            .clone()
            .unwrap_or_else(|| format!("{}.{}", task_run.module_name, task_run.class_name));

        let started = Utc::now();
        self.transition(task_run, TaskRunStatus::Started);
        task_run.datetime_started = Some(started);
        task_run.execution_date = Some(started.to_rfc3339());
        self.save(task_run).await?;

        let mut args = task_run.args.clone();
        args.insert("execution_date".to_string(), json!(started.to_rfc3339()));

        tracing::info!("Running task {} ({}) in-process", label, task_run.id);

        match task.run(&args).await {
            Ok(output) => {
                match &self.cache {
                    Some(cache) => {
                        cache.set(&task_run.output_cache_key(), &output, None).await?;
                        task_run.output = None;
                    }
                    None => task_run.output = Some(output),
                }
                self.transition(task_run, TaskRunStatus::Success);
                task_run.datetime_finished = Some(Utc::now());
                self.save(task_run).await?;

                tracing::info!("Task {} ({}) succeeded", label, task_run.id);
                Ok(())
            }
            Err(e) => {
                self.transition(task_run, TaskRunStatus::Error);
                task_run.datetime_finished = Some(Utc::now());
                self.save(task_run).await?;

                tracing::error!("Task {} ({}) failed: {:#}", label, task_run.id, e);
                Err(PipelineError::TaskFailed {
                    task_id: label,
                    message: format!("{:#}", e),
                })
            }
        }
    }

    fn transition(&self, task_run: &mut TaskRun, status: TaskRunStatus) {
        if !task_run.advance(status) {
            tracing::warn!(
                "Task run {} cannot move from {} to {}",
                task_run.id,
                task_run.status,
                status
            );
        }
    }

    async fn save(&self, task_run: &TaskRun) -> Result<()> {
        self.store.update_task_run(task_run).await?;
        self.store.commit().await?;
        Ok(())
    }
}

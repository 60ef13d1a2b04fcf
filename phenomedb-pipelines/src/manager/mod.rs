//! Pipeline managers
//!
//! [`BasePipelineManager`] owns the pipeline definition and its persistence.
//! Scheduler-backed managers wrap it and add artifact generation, admission
//! and triggering on top.

pub mod airflow;

pub use airflow::{AirflowPipelineManager, PipelineOptions};

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Timelike, Utc};
use phenomedb_core::domain::env::DbEnv;
use phenomedb_core::domain::pipeline::Pipeline;
use phenomedb_core::domain::task::{RunConfig, TaskArgs, TaskDefinition, normalize_task_id, starts_with_digit};
use phenomedb_core::domain::task_run::TaskRun;
use phenomedb_core::dto::task_run::CreateTaskRun;
use serde::Serialize;
use serde_json::Value;

use crate::error::{PipelineError, Result};
use crate::registry::TaskRegistry;
use crate::repository::PipelineStore;

/// Outcome of a `run_pipeline` call
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PipelineRun {
    /// Run identifier assigned by the scheduler, if the run was accepted
    pub pipeline_run_id: Option<String>,
    /// Task run used for each task in this run
    pub task_run_ids: BTreeMap<String, i64>,
}

/// Operations every pipeline manager offers
#[async_trait]
pub trait PipelineManager: Send {
    /// The resolved pipeline, if any
    fn pipeline(&self) -> Option<&Pipeline>;

    /// Adds a task to the definition and returns its resolved id.
    ///
    /// Returns `Ok(None)` without doing anything when no pipeline is resolved.
    async fn add_task(
        &mut self,
        task_module: &str,
        task_class: &str,
        task_id: Option<&str>,
        run_config: Option<TaskArgs>,
        upstream_task_id: Option<&str>,
    ) -> Result<Option<String>>;

    /// Persists the definition. Returns false when there is nothing to commit.
    async fn commit_definition(&mut self) -> Result<bool>;

    async fn run_pipeline(&mut self, run_config: Option<RunConfig>, debug: bool) -> Result<PipelineRun>;

    async fn pause_pipeline(&mut self) -> Result<bool>;

    async fn delete_pipeline(&mut self) -> Result<bool>;
}

/// Definition bookkeeping shared by every manager
pub struct BasePipelineManager {
    pub(crate) store: Arc<dyn PipelineStore>,
    pub(crate) registry: Arc<TaskRegistry>,
    pub(crate) db_env: DbEnv,
    pub(crate) pipeline: Option<Pipeline>,
    /// Task id to the task run this manager created or resolved for it
    pub(crate) task_runs: BTreeMap<String, i64>,
}

impl BasePipelineManager {
    /// Loads a pipeline by id or by name.
    ///
    /// An id that matches nothing is `PipelineNotFound`; an id and a name that
    /// resolve to different pipelines are `IllegalState`. A name with no live
    /// pipeline leaves the manager unresolved.
    pub async fn resolve(
        store: Arc<dyn PipelineStore>,
        registry: Arc<TaskRegistry>,
        db_env: DbEnv,
        pipeline_name: Option<&str>,
        pipeline_id: Option<i64>,
    ) -> Result<Self> {
        let pipeline = match (pipeline_id, pipeline_name) {
            (Some(id), name) => {
                let pipeline = store
                    .find_pipeline(id)
                    .await?
                    .ok_or(PipelineError::PipelineNotFound(id))?;

                if let Some(name) = name {
                    if pipeline.name != name {
                        return Err(PipelineError::IllegalState(format!(
                            "pipeline_id {} and pipeline_name {} do not match (id {} is named {})",
                            id, name, id, pipeline.name
                        )));
                    }
                }
                Some(pipeline)
            }
            (None, Some(name)) => store.find_pipeline_by_name(name).await?,
            (None, None) => None,
        };

        if let Some(p) = &pipeline {
            tracing::debug!("Resolved pipeline {} ({})", p.name, p.id);
        }

        Ok(Self {
            store,
            registry,
            db_env,
            pipeline,
            task_runs: BTreeMap::new(),
        })
    }

    pub fn pipeline(&self) -> Option<&Pipeline> {
        self.pipeline.as_ref()
    }

    pub fn db_env(&self) -> DbEnv {
        self.db_env
    }

    pub fn registry(&self) -> &TaskRegistry {
        &self.registry
    }

    pub fn task_run_ids(&self) -> &BTreeMap<String, i64> {
        &self.task_runs
    }

    pub async fn add_task(
        &mut self,
        task_module: &str,
        task_class: &str,
        task_id: Option<&str>,
        run_config: Option<TaskArgs>,
        upstream_task_id: Option<&str>,
    ) -> Result<Option<String>> {
        let Some(pipeline) = self.pipeline.as_mut() else {
            tracing::debug!("add_task({}.{}) ignored, no pipeline resolved", task_module, task_class);
            return Ok(None);
        };

        self.registry.signature(task_module, task_class)?;

        let task_id = match task_id {
            Some(raw) => checked_task_id(pipeline, raw)?,
            None => generate_task_id(pipeline, task_class),
        };

        if let Some(upstream) = upstream_task_id {
            if !pipeline.contains_task(upstream) {
                return Err(PipelineError::UnknownUpstreamTask(upstream.to_string()));
            }
        }

        pipeline.insert_task(
            task_id.clone(),
            TaskDefinition::new(task_module, task_class),
            upstream_task_id,
        );
        self.store.update_pipeline(pipeline).await?;

        tracing::info!("Task {} ({}.{}) added to pipeline {}", task_id, task_module, task_class, pipeline.name);

        let pipeline_id = pipeline.id;
        let default_username = pipeline.username_created.clone();

        if let Some(args) = run_config {
            let args = strip_unset(args);
            let saved_query_id = saved_query_id(&args);
            let username = username(&args).or(default_username);
            let args = self.sanitize_args(task_module, task_class, args)?;

            let task_run = self
                .store
                .create_task_run(CreateTaskRun {
                    pipeline_id: Some(pipeline_id),
                    task_id: Some(task_id.clone()),
                    module_name: task_module.to_string(),
                    class_name: task_class.to_string(),
                    username,
                    args,
                    saved_query_id,
                    db_env: self.db_env,
                    datetime_started: Some(Utc::now()),
                    created_by_add_task: true,
                })
                .await?;

            tracing::debug!("Task run {} created for task {}", task_run.id, task_id);
            self.task_runs.insert(task_id.clone(), task_run.id);
        }

        Ok(Some(task_id))
    }

    /// Persists the pipeline row and commits the session
    pub async fn commit_definition(&mut self) -> Result<bool> {
        let Some(pipeline) = self.pipeline.as_ref() else {
            return Ok(false);
        };
        if pipeline.name.is_empty() {
            return Ok(false);
        }

        self.store.update_pipeline(pipeline).await?;
        self.store.commit().await?;

        tracing::info!("Pipeline definition committed: {}", pipeline.name);
        Ok(true)
    }

    /// Filters `args` against the task's accepted parameters, warning on drops
    pub(crate) fn sanitize_args(&self, task_module: &str, task_class: &str, args: TaskArgs) -> Result<TaskArgs> {
        let (kept, dropped) = self.registry.sanitize(task_module, task_class, args)?;
        for name in dropped {
            tracing::warn!(
                "Argument {} is not accepted by {}.{}, dropping it",
                name,
                task_module,
                task_class
            );
        }
        Ok(kept)
    }

    pub(crate) async fn find_task_run(&self, id: i64) -> Result<TaskRun> {
        self.store
            .find_task_run(id)
            .await?
            .ok_or(PipelineError::TaskRunNotFound(id))
    }
}

#[async_trait]
impl PipelineManager for BasePipelineManager {
    fn pipeline(&self) -> Option<&Pipeline> {
        BasePipelineManager::pipeline(self)
    }

    async fn add_task(
        &mut self,
        task_module: &str,
        task_class: &str,
        task_id: Option<&str>,
        run_config: Option<TaskArgs>,
        upstream_task_id: Option<&str>,
    ) -> Result<Option<String>> {
        BasePipelineManager::add_task(self, task_module, task_class, task_id, run_config, upstream_task_id).await
    }

    async fn commit_definition(&mut self) -> Result<bool> {
        BasePipelineManager::commit_definition(self).await
    }

    /// Without a scheduler, running only commits the session
    async fn run_pipeline(&mut self, _run_config: Option<RunConfig>, _debug: bool) -> Result<PipelineRun> {
        self.store.commit().await?;
        Ok(PipelineRun {
            pipeline_run_id: None,
            task_run_ids: self.task_runs.clone(),
        })
    }

    async fn pause_pipeline(&mut self) -> Result<bool> {
        Ok(false)
    }

    async fn delete_pipeline(&mut self) -> Result<bool> {
        let Some(pipeline) = self.pipeline.as_mut() else {
            return Ok(false);
        };
        pipeline.deleted = true;
        self.store.update_pipeline(pipeline).await?;
        self.store.commit().await?;
        Ok(true)
    }
}

// =============================================================================
// Task ids and argument bundles
// =============================================================================

fn checked_task_id(pipeline: &Pipeline, raw: &str) -> Result<String> {
    if pipeline.contains_task(raw) {
        return Err(PipelineError::DuplicateTaskId(raw.to_string()));
    }
    if starts_with_digit(raw) {
        return Err(PipelineError::invalid_task_id(raw, "must not start with a digit"));
    }

    let task_id = normalize_task_id(raw);
    if task_id.trim_matches('_').is_empty() {
        return Err(PipelineError::invalid_task_id(raw, "no alphanumeric characters"));
    }
    if pipeline.contains_task(&task_id) {
        return Err(PipelineError::DuplicateTaskId(task_id));
    }

    Ok(task_id)
}

/// `<class>_<second><micros>`, suffixed `_2`, `_3`, ... on collision
fn generate_task_id(pipeline: &Pipeline, task_class: &str) -> String {
    let now = Utc::now();
    let base = normalize_task_id(&format!(
        "{}_{}{:06}",
        task_class,
        now.second(),
        now.timestamp_subsec_micros() % 1_000_000
    ));

    let mut candidate = base.clone();
    let mut n = 2;
    while pipeline.contains_task(&candidate) {
        candidate = format!("{}_{}", base, n);
        n += 1;
    }
    candidate
}

/// Drops arguments whose value is an empty string or null
pub(crate) fn strip_unset(args: TaskArgs) -> TaskArgs {
    args.into_iter()
        .filter(|(_, value)| !matches!(value, Value::Null) && value.as_str() != Some(""))
        .collect()
}

pub(crate) fn saved_query_id(args: &TaskArgs) -> Option<i64> {
    match args.get("saved_query_id")? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

pub(crate) fn username(args: &TaskArgs) -> Option<String> {
    args.get("username").and_then(Value::as_str).map(str::to_string)
}

/// Removes the pipeline-wiring key `upstream_task_id` from a bundle
pub(crate) fn take_upstream_task_id(args: &mut TaskArgs) -> Option<String> {
    match args.remove("upstream_task_id")? {
        Value::String(s) if !s.is_empty() => Some(s),
        _ => None,
    }
}

//! Airflow-backed pipeline manager
//!
//! Writes each pipeline as a DAG module into the scheduler's DAG folder, waits
//! for the scheduler to pick it up, then triggers runs through its REST API.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use phenomedb_core::domain::env::DbEnv;
use phenomedb_core::domain::pipeline::{FACTORY_TAG, Pipeline, ScheduleInterval, default_pipeline_args};
use phenomedb_core::domain::task::{RunConfig, TaskArgs};
use phenomedb_core::domain::task_run::{TaskRun, TaskRunStatus};
use phenomedb_core::dto::pipeline::CreatePipeline;
use phenomedb_core::dto::task_run::{CreateTaskRun, TaskRunFilter};
use serde_json::{Value, json};

use super::{
    BasePipelineManager, PipelineManager, PipelineRun, saved_query_id, strip_unset, take_upstream_task_id, username,
};
use crate::artifact::{self, ArtifactLocation};
use crate::cache::Cache;
use crate::config::{Config, TriggerFailurePolicy};
use crate::error::{PipelineError, Result};
use crate::executor::DebugExecutor;
use crate::registry::TaskRegistry;
use crate::repository::PipelineStore;
use crate::retry::AdmissionRetry;
use crate::scheduler::SchedulerApi;

/// How to find or create the managed pipeline
#[derive(Debug, Clone, Default)]
pub struct PipelineOptions {
    pub pipeline_name: Option<String>,
    pub pipeline_id: Option<i64>,
    pub description: Option<String>,
    /// Folder recorded in `pipeline_file_path`, defaults to the scheduler's DAG folder
    pub pipeline_folder: Option<PathBuf>,
    pub start_date: Option<DateTime<Utc>>,
    pub default_args: Option<serde_json::Map<String, Value>>,
    pub schedule_interval: ScheduleInterval,
    pub db_env: DbEnv,
    pub tags: Vec<String>,
    /// Defaults to true
    pub sequential: Option<bool>,
    pub username: Option<String>,
    pub hard_code_data: bool,
    pub max_active_runs: Option<i32>,
    pub concurrency: Option<i32>,
}

impl PipelineOptions {
    pub fn named(pipeline_name: impl Into<String>) -> Self {
        Self {
            pipeline_name: Some(pipeline_name.into()),
            ..Default::default()
        }
    }

    pub fn with_db_env(mut self, db_env: DbEnv) -> Self {
        self.db_env = db_env;
        self
    }
}

pub struct AirflowPipelineManager {
    base: BasePipelineManager,
    scheduler: Arc<dyn SchedulerApi>,
    location: ArtifactLocation,
    retry: AdmissionRetry,
    trigger_policy: TriggerFailurePolicy,
    cache: Option<Arc<dyn Cache>>,
}

impl AirflowPipelineManager {
    /// Resolves the pipeline, creating it (flushed, not committed) when no
    /// live pipeline has the name.
    pub async fn new(
        store: Arc<dyn PipelineStore>,
        registry: Arc<TaskRegistry>,
        scheduler: Arc<dyn SchedulerApi>,
        config: &Config,
        options: PipelineOptions,
    ) -> Result<Self> {
        if options.pipeline_name.is_none() && options.pipeline_id.is_none() {
            return Err(PipelineError::IllegalState(
                "either pipeline_name or pipeline_id must be set".to_string(),
            ));
        }

        let db_env = options.db_env;
        let pipeline_name = options.pipeline_name.clone().map(|name| match db_env {
            DbEnv::Test => format!("{}_TEST", name),
            _ => name,
        });

        let location = ArtifactLocation {
            pipeline_folder: config.pipeline_folder.clone(),
            scheduler_dag_folder: config.scheduler_dag_folder.clone(),
            docker: config.docker,
        };

        let mut base = BasePipelineManager::resolve(
            store.clone(),
            registry,
            db_env,
            pipeline_name.as_deref(),
            options.pipeline_id,
        )
        .await?;

        if base.pipeline.is_none() {
            let name = pipeline_name.ok_or_else(|| {
                PipelineError::IllegalState("cannot create a pipeline without a name".to_string())
            })?;
            let pipeline = store.create_pipeline(create_request(name, &location, options)).await?;
            tracing::info!("Pipeline created: {} ({})", pipeline.name, pipeline.id);
            base.pipeline = Some(pipeline);
        }

        Ok(Self {
            base,
            scheduler,
            location,
            retry: config.admission_retry(),
            trigger_policy: config.trigger_failure_policy,
            cache: None,
        })
    }

    /// Stores debug-run outputs in `cache` instead of the inline column
    pub fn with_cache(mut self, cache: Arc<dyn Cache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_retry(mut self, retry: AdmissionRetry) -> Self {
        self.retry = retry;
        self
    }

    pub fn base(&self) -> &BasePipelineManager {
        &self.base
    }

    /// Where this process reads and writes the pipeline's artifact
    pub fn artifact_path(&self) -> Result<PathBuf> {
        let pipeline = self.base.pipeline.as_ref().ok_or(PipelineError::NoPipeline)?;
        let recorded = pipeline
            .pipeline_file_path
            .clone()
            .unwrap_or_else(|| self.location.file_path_for(&pipeline.name, None));
        Ok(self.location.local_path(&recorded))
    }

    /// Renders the pipeline and writes its artifact.
    ///
    /// For hard-coded pipelines this also stamps `task_run_id` and `db_env`
    /// into each embedded task run's arguments.
    pub async fn write_out_pipeline(&self) -> Result<PathBuf> {
        let pipeline = self.base.pipeline.as_ref().ok_or(PipelineError::NoPipeline)?;
        let path = self.artifact_path()?;

        tracing::info!("Writing pipeline {} to {}", pipeline.name, path.display());

        let rendered = if pipeline.hard_code_data {
            let bundles = self.hard_coded_args(pipeline).await?;
            artifact::render_pipeline(pipeline, Some(&bundles))?
        } else {
            artifact::render_pipeline(pipeline, None)?
        };

        artifact::write_artifact(&path, &rendered).await?;
        tracing::info!("Pipeline written to {}", path.display());
        Ok(path)
    }

    async fn hard_coded_args(&self, pipeline: &Pipeline) -> Result<BTreeMap<String, TaskArgs>> {
        let mut bundles = BTreeMap::new();

        for task_id in &pipeline.task_order {
            let filter = TaskRunFilter {
                pipeline_id: Some(pipeline.id),
                task_id: Some(task_id.clone()),
                status: None,
                created_by_add_task: Some(true),
            };
            let mut task_run = self
                .base
                .store
                .find_first_task_run(&filter)
                .await?
                .ok_or_else(|| PipelineError::MissingHardCodedTaskRun(task_id.clone()))?;

            self.stamp_identity(&mut task_run.args, task_run.id);
            self.base.store.update_task_run(&task_run).await?;
            bundles.insert(task_id.clone(), task_run.args);
        }

        Ok(bundles)
    }

    /// Checks the scheduler has registered the pipeline, setting its paused
    /// state to `pause` when it differs.
    pub async fn check_if_pipeline_in_airflow(&self, pause: bool) -> Result<bool> {
        let pipeline = self.base.pipeline.as_ref().ok_or(PipelineError::NoPipeline)?;

        let Some(dag) = self.scheduler.find_dag(&pipeline.name).await? else {
            tracing::debug!("Pipeline {} not registered with the scheduler", pipeline.name);
            return Ok(false);
        };

        if dag.is_paused == pause {
            return Ok(true);
        }

        match self.scheduler.set_dag_paused(&pipeline.name, pause).await {
            Ok(updated) => {
                tracing::info!("Pipeline {} is_paused set to {}", pipeline.name, updated.is_paused);
                Ok(updated.is_paused == pause)
            }
            Err(e) => {
                tracing::warn!("Failed to set is_paused={} on {}: {}", pause, pipeline.name, e);
                Ok(false)
            }
        }
    }

    async fn ensure_registered(&mut self, pipeline_name: &str) -> Result<()> {
        let path = self.artifact_path()?;

        if !tokio::fs::try_exists(&path).await? {
            tracing::info!("Artifact {} missing, committing pipeline {}", path.display(), pipeline_name);
            self.commit_definition().await?;
            tokio::time::sleep(self.retry.initial_wait).await;
        }

        let this: &Self = self;
        let registered = this
            .retry
            .poll(move |attempt| {
                tracing::debug!("Registration check {} for {}", attempt, pipeline_name);
                this.check_if_pipeline_in_airflow(false)
            })
            .await?;

        if !registered {
            return Err(PipelineError::SchedulerRegistrationTimeout {
                pipeline: pipeline_name.to_string(),
                attempts: self.retry.attempts(),
            });
        }
        Ok(())
    }

    /// Resolves a task run and argument bundle for every configured task,
    /// then submits them as one run.
    pub async fn trigger_pipeline(&mut self, mut run_config: RunConfig, debug: bool) -> Result<PipelineRun> {
        let pipeline = self.base.pipeline.clone().ok_or(PipelineError::NoPipeline)?;
        let mut resolved: Vec<(String, TaskRun)> = Vec::new();
        let mut upstreams: Vec<(String, String)> = Vec::new();

        for task_id in &pipeline.task_order {
            let Some(supplied) = run_config.remove(task_id) else {
                continue;
            };

            let mut supplied = strip_unset(supplied);
            if let Some(upstream) = take_upstream_task_id(&mut supplied) {
                upstreams.push((task_id.clone(), upstream));
            }

            let (mut task_run, args) = self.resolve_task_run(&pipeline, task_id, supplied).await?;

            let mut args = self
                .base
                .sanitize_args(&task_run.module_name, &task_run.class_name, args)?;
            self.stamp_identity(&mut args, task_run.id);
            task_run.args = args;
            self.base.store.update_task_run(&task_run).await?;

            resolved.push((task_id.clone(), task_run));
        }

        for (task_id, upstream_id) in upstreams {
            let upstream_run_id = resolved
                .iter()
                .find(|(id, _)| *id == upstream_id)
                .map(|(_, run)| run.id)
                .ok_or_else(|| PipelineError::UnknownUpstreamTask(upstream_id.clone()))?;

            if let Some((_, task_run)) = resolved.iter_mut().find(|(id, _)| *id == task_id) {
                task_run
                    .args
                    .insert("upstream_task_run_id".to_string(), json!(upstream_run_id));
                task_run.upstream_task_run_id = Some(upstream_run_id);
                self.base.store.update_task_run(task_run).await?;
            }
        }

        let task_run_ids: BTreeMap<String, i64> = resolved.iter().map(|(id, run)| (id.clone(), run.id)).collect();

        if debug {
            self.base.store.commit().await?;
            self.base.task_runs.extend(task_run_ids.clone());
            let executor = DebugExecutor::new(self.base.store.clone(), self.base.registry.clone(), self.cache.clone());
            for (_, task_run) in resolved.iter_mut() {
                executor.execute(task_run).await?;
            }
            return Ok(PipelineRun {
                pipeline_run_id: None,
                task_run_ids,
            });
        }

        let conf: RunConfig = resolved
            .iter()
            .map(|(id, run)| (id.clone(), run.args.clone()))
            .collect();

        let pipeline_run_id = match self.scheduler.trigger_dag_run(&pipeline.name, conf).await {
            Ok(dag_run) => {
                for (task_id, task_run) in resolved.iter_mut() {
                    if !task_run.advance(TaskRunStatus::Scheduled) {
                        tracing::warn!(
                            "Task run {} for {} is already {}, leaving it unchanged",
                            task_run.id,
                            task_id,
                            task_run.status
                        );
                        continue;
                    }
                    task_run.pipeline_run_id = Some(dag_run.dag_run_id.clone());
                    self.base.store.update_task_run(task_run).await?;
                }
                self.base.store.commit().await?;
                tracing::info!(
                    "Pipeline {} triggered via API, pipeline_run_id: {}",
                    pipeline.name,
                    dag_run.dag_run_id
                );
                Some(dag_run.dag_run_id)
            }
            Err(source) => match self.trigger_policy {
                TriggerFailurePolicy::Log => {
                    tracing::warn!("Scheduler did not accept run of {}: {}", pipeline.name, source);
                    self.base.store.commit().await?;
                    None
                }
                TriggerFailurePolicy::Raise => {
                    return Err(PipelineError::SchedulerTriggerFailed {
                        pipeline: pipeline.name.clone(),
                        source,
                    });
                }
            },
        };
        self.base.task_runs.extend(task_run_ids.clone());

        Ok(PipelineRun {
            pipeline_run_id,
            task_run_ids,
        })
    }

    /// Picks the task run for one configured task.
    ///
    /// An explicit `task_run_id` wins, then a hard-coded run created by
    /// `add_task`, otherwise a new run is created from the supplied bundle.
    async fn resolve_task_run(
        &self,
        pipeline: &Pipeline,
        task_id: &str,
        supplied: TaskArgs,
    ) -> Result<(TaskRun, TaskArgs)> {
        if let Some(id) = explicit_task_run_id(&supplied) {
            let mut task_run = self.base.find_task_run(id).await?;
            if let Some(query_id) = saved_query_id(&supplied) {
                task_run.saved_query_id = Some(query_id);
            }
            if let Some(name) = username(&supplied) {
                task_run.username = Some(name);
            }
            return Ok((task_run, supplied));
        }

        let filter = TaskRunFilter {
            pipeline_id: Some(pipeline.id),
            task_id: Some(task_id.to_string()),
            status: Some(TaskRunStatus::Created),
            created_by_add_task: Some(true),
        };
        if let Some(task_run) = self.base.store.find_first_task_run(&filter).await? {
            tracing::debug!("Reusing hard-coded task run {} for {}", task_run.id, task_id);
            let args = task_run.args.clone();
            return Ok((task_run, args));
        }

        let definition = pipeline
            .definition
            .get(task_id)
            .ok_or_else(|| PipelineError::IllegalState(format!("{} missing from definition", task_id)))?;

        let task_run = self
            .base
            .store
            .create_task_run(CreateTaskRun {
                pipeline_id: Some(pipeline.id),
                task_id: Some(task_id.to_string()),
                module_name: definition.task_module.clone(),
                class_name: definition.task_class.clone(),
                username: username(&supplied).or_else(|| pipeline.username_created.clone()),
                args: supplied.clone(),
                saved_query_id: saved_query_id(&supplied),
                db_env: self.base.db_env,
                datetime_started: Some(Utc::now()),
                created_by_add_task: false,
            })
            .await?;

        Ok((task_run, supplied))
    }

    fn stamp_identity(&self, args: &mut TaskArgs, task_run_id: i64) {
        args.insert("task_run_id".to_string(), json!(task_run_id));
        args.insert("db_env".to_string(), json!(self.base.db_env.as_str()));
    }

    async fn submit(&mut self, pipeline_name: &str, run_config: RunConfig, debug: bool) -> Result<PipelineRun> {
        if !debug {
            self.ensure_registered(pipeline_name).await?;
        }
        self.trigger_pipeline(run_config, debug).await
    }
}

#[async_trait]
impl PipelineManager for AirflowPipelineManager {
    fn pipeline(&self) -> Option<&Pipeline> {
        self.base.pipeline()
    }

    async fn add_task(
        &mut self,
        task_module: &str,
        task_class: &str,
        task_id: Option<&str>,
        run_config: Option<TaskArgs>,
        upstream_task_id: Option<&str>,
    ) -> Result<Option<String>> {
        self.base
            .add_task(task_module, task_class, task_id, run_config, upstream_task_id)
            .await
    }

    /// Persists the pipeline, then writes its artifact
    async fn commit_definition(&mut self) -> Result<bool> {
        if !self.base.commit_definition().await? {
            return Ok(false);
        }
        self.write_out_pipeline().await?;
        self.base.store.commit().await?;
        Ok(true)
    }

    /// Waits for scheduler registration, then triggers a run.
    ///
    /// Any failure rolls back the session before the error is returned.
    async fn run_pipeline(&mut self, run_config: Option<RunConfig>, debug: bool) -> Result<PipelineRun> {
        let run_config = run_config.unwrap_or_default();
        let pipeline = self.base.pipeline.as_ref().ok_or(PipelineError::NoPipeline)?;

        if pipeline.definition.is_empty() {
            return Err(PipelineError::EmptyDefinition(pipeline.name.clone()));
        }
        if let Some(unknown) = run_config.keys().find(|id| !pipeline.contains_task(id)) {
            return Err(PipelineError::UnrecognisedTaskId(unknown.clone()));
        }

        let pipeline_name = pipeline.name.clone();
        match self.submit(&pipeline_name, run_config, debug).await {
            Ok(run) => Ok(run),
            Err(e) => {
                if let Err(rollback) = self.base.store.rollback().await {
                    tracing::error!("Rollback after failed run of {} failed: {}", pipeline_name, rollback);
                }
                tracing::error!("Run of pipeline {} failed: {}", pipeline_name, e);
                Err(e)
            }
        }
    }

    async fn pause_pipeline(&mut self) -> Result<bool> {
        if self.base.pipeline.is_none() {
            return Ok(false);
        }
        self.check_if_pipeline_in_airflow(true).await
    }

    /// Pauses and deregisters the pipeline, removes its artifact and marks
    /// the row deleted. Scheduler and file errors are logged, not returned.
    async fn delete_pipeline(&mut self) -> Result<bool> {
        let Some(pipeline_name) = self.base.pipeline.as_ref().map(|p| p.name.clone()) else {
            return Ok(false);
        };

        let paused = match self.check_if_pipeline_in_airflow(true).await {
            Ok(paused) => paused,
            Err(e) => {
                tracing::warn!("Could not pause {} before deletion: {}", pipeline_name, e);
                false
            }
        };

        if paused {
            if let Err(e) = self.scheduler.delete_dag(&pipeline_name).await {
                tracing::warn!("Scheduler failed to delete {}: {}", pipeline_name, e);
            }
        }

        let path = self.artifact_path()?;
        remove_artifact(&path).await;

        let Some(pipeline) = self.base.pipeline.as_mut() else {
            return Ok(false);
        };
        pipeline.deleted = true;
        self.base.store.update_pipeline(pipeline).await?;
        self.base.store.commit().await?;

        tracing::info!("Pipeline deleted: {}", pipeline_name);
        Ok(pipeline.deleted)
    }
}

fn create_request(name: String, location: &ArtifactLocation, options: PipelineOptions) -> CreatePipeline {
    let mut tags = options.tags;
    if !tags.iter().any(|t| t == FACTORY_TAG) {
        tags.push(FACTORY_TAG.to_string());
    }

    CreatePipeline {
        pipeline_file_path: Some(location.file_path_for(&name, options.pipeline_folder.as_deref())),
        name,
        description: options.description,
        schedule_interval: options.schedule_interval,
        start_date: options
            .start_date
            .unwrap_or_else(|| Utc::now() - ChronoDuration::days(1)),
        username_created: options.username,
        hard_code_data: options.hard_code_data,
        sequential: options.sequential.unwrap_or(true),
        default_args: options.default_args.unwrap_or_else(default_pipeline_args),
        tags,
        max_active_runs: options.max_active_runs.unwrap_or(100),
        concurrency: options.concurrency.unwrap_or(1),
    }
}

fn explicit_task_run_id(args: &TaskArgs) -> Option<i64> {
    match args.get("task_run_id")? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

async fn remove_artifact(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => tracing::info!("Artifact removed: {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!("Failed to remove artifact {}: {}", path.display(), e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_request_defaults() {
        let location = ArtifactLocation {
            pipeline_folder: PathBuf::from("./dags"),
            scheduler_dag_folder: PathBuf::from("/opt/airflow/dags"),
            docker: false,
        };
        let req = create_request("P_TEST".to_string(), &location, PipelineOptions::named("P"));

        assert_eq!(req.pipeline_file_path.as_deref(), Some("/opt/airflow/dags/P_TEST.py"));
        assert_eq!(req.tags, vec![FACTORY_TAG.to_string()]);
        assert!(req.sequential);
        assert!(!req.hard_code_data);
        assert_eq!(req.max_active_runs, 100);
        assert_eq!(req.concurrency, 1);
        assert_eq!(req.default_args.get("owner"), Some(&json!("airflow")));
        assert!(req.start_date < Utc::now() - ChronoDuration::hours(23));
    }

    #[test]
    fn test_explicit_task_run_id() {
        let args: TaskArgs = serde_json::from_value(json!({"task_run_id": "12"})).unwrap();
        assert_eq!(explicit_task_run_id(&args), Some(12));
        let args: TaskArgs = serde_json::from_value(json!({"task_run_id": 5})).unwrap();
        assert_eq!(explicit_task_run_id(&args), Some(5));
        assert_eq!(explicit_task_run_id(&TaskArgs::new()), None);
    }
}

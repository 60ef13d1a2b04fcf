//! Pipeline factory
//!
//! Front door for callers that build and run pipelines. It picks the manager
//! implementation from configuration and forwards to it.

use std::collections::BTreeMap;
use std::sync::Arc;

use phenomedb_core::domain::pipeline::Pipeline;
use phenomedb_core::domain::task::{RunConfig, TaskArgs};

use crate::cache::Cache;
use crate::config::{Config, ManagerKind};
use crate::error::{PipelineError, Result};
use crate::manager::{AirflowPipelineManager, PipelineManager, PipelineOptions, PipelineRun};
use crate::registry::{self, TaskCatalogueEntry, TaskRegistry, TaskSpec};
use crate::repository::PipelineStore;
use crate::scheduler::SchedulerApi;

/// Collaborators shared by every manager a factory builds
#[derive(Clone)]
pub struct Backends {
    pub store: Arc<dyn PipelineStore>,
    pub registry: Arc<TaskRegistry>,
    pub scheduler: Arc<dyn SchedulerApi>,
    pub cache: Option<Arc<dyn Cache>>,
}

pub struct PipelineFactory {
    manager: Option<Box<dyn PipelineManager>>,
}

impl PipelineFactory {
    /// Builds the configured manager for the pipeline in `options`.
    ///
    /// Without a configured manager the factory is still usable when no
    /// pipeline was named; every operation is then a no-op.
    pub async fn new(config: &Config, backends: &Backends, options: PipelineOptions) -> Result<Self> {
        match config.pipeline_manager {
            Some(ManagerKind::ApacheAirflow) => {
                let mut manager = AirflowPipelineManager::new(
                    backends.store.clone(),
                    backends.registry.clone(),
                    backends.scheduler.clone(),
                    config,
                    options,
                )
                .await?;
                if let Some(cache) = &backends.cache {
                    manager = manager.with_cache(cache.clone());
                }
                Ok(Self::with_manager(Box::new(manager)))
            }
            None if options.pipeline_name.is_none() && options.pipeline_id.is_none() => {
                tracing::info!("Pipeline name and id both unset, no pipeline manager initialised");
                Ok(Self { manager: None })
            }
            None => Err(PipelineError::Config(
                "PHENOMEDB__PIPELINES__PIPELINE_MANAGER must be set".to_string(),
            )),
        }
    }

    pub fn with_manager(manager: Box<dyn PipelineManager>) -> Self {
        Self { manager: Some(manager) }
    }

    pub fn pipeline(&self) -> Option<&Pipeline> {
        self.manager.as_ref().and_then(|m| m.pipeline())
    }

    pub async fn add_task(
        &mut self,
        task_module: &str,
        task_class: &str,
        task_id: Option<&str>,
        run_config: Option<TaskArgs>,
        upstream_task_id: Option<&str>,
    ) -> Result<Option<String>> {
        match self.manager.as_mut() {
            Some(manager) => {
                manager
                    .add_task(task_module, task_class, task_id, run_config, upstream_task_id)
                    .await
            }
            None => Ok(None),
        }
    }

    pub async fn commit_definition(&mut self) -> Result<bool> {
        match self.manager.as_mut() {
            Some(manager) => manager.commit_definition().await,
            None => Ok(false),
        }
    }

    pub async fn run_pipeline(&mut self, run_config: Option<RunConfig>, debug: bool) -> Result<PipelineRun> {
        match self.manager.as_mut() {
            Some(manager) => manager.run_pipeline(run_config, debug).await,
            None => Err(PipelineError::NoPipeline),
        }
    }

    pub async fn pause_pipeline(&mut self) -> Result<bool> {
        match self.manager.as_mut() {
            Some(manager) => manager.pause_pipeline().await,
            None => Ok(false),
        }
    }

    pub async fn delete_pipeline(&mut self) -> Result<bool> {
        match self.manager.as_mut() {
            Some(manager) => manager.delete_pipeline().await,
            None => Ok(false),
        }
    }

    /// Reads the task spec document named in the configuration
    pub async fn get_json_task_spec(config: &Config) -> Result<TaskSpec> {
        registry::load_task_spec(&config.task_spec_file).await
    }

    /// Task catalogue for the configured task spec, see [`registry::get_tasks_from_json`]
    pub async fn get_tasks_from_json(
        config: &Config,
        registry: &TaskRegistry,
        modules_to_include: Option<&[String]>,
    ) -> Result<BTreeMap<String, TaskCatalogueEntry>> {
        let spec = Self::get_json_task_spec(config).await?;
        registry::get_tasks_from_json(&spec, registry, modules_to_include)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::MemoryStore;
    use async_trait::async_trait;
    use phenomedb_client::{Dag, DagRun, Result as ClientResult};

    struct Unreachable;

    #[async_trait]
    impl SchedulerApi for Unreachable {
        async fn find_dag(&self, _dag_id: &str) -> ClientResult<Option<Dag>> {
            Ok(None)
        }

        async fn set_dag_paused(&self, dag_id: &str, paused: bool) -> ClientResult<Dag> {
            Ok(Dag {
                dag_id: dag_id.to_string(),
                is_paused: paused,
                is_active: None,
                fileloc: None,
            })
        }

        async fn delete_dag(&self, _dag_id: &str) -> ClientResult<()> {
            Ok(())
        }

        async fn trigger_dag_run(&self, _dag_id: &str, _conf: RunConfig) -> ClientResult<DagRun> {
            Err(phenomedb_client::ClientError::api_error(503, "unavailable"))
        }
    }

    fn backends() -> Backends {
        Backends {
            store: Arc::new(MemoryStore::new()),
            registry: Arc::new(TaskRegistry::new()),
            scheduler: Arc::new(Unreachable),
            cache: None,
        }
    }

    #[tokio::test]
    async fn test_factory_without_manager_is_inert() {
        let config = Config::default();
        let mut factory = PipelineFactory::new(&config, &backends(), PipelineOptions::default())
            .await
            .unwrap();

        assert!(factory.pipeline().is_none());
        assert_eq!(
            factory
                .add_task("phenomedb.imports", "ImportManifest", None, None, None)
                .await
                .unwrap(),
            None
        );
        assert!(!factory.commit_definition().await.unwrap());
        assert!(!factory.pause_pipeline().await.unwrap());
        assert!(!factory.delete_pipeline().await.unwrap());
        assert!(matches!(
            factory.run_pipeline(None, false).await,
            Err(PipelineError::NoPipeline)
        ));
    }

    #[tokio::test]
    async fn test_named_pipeline_requires_manager() {
        let config = Config::default();
        let result = PipelineFactory::new(&config, &backends(), PipelineOptions::named("P")).await;
        assert!(matches!(result, Err(PipelineError::Config(_))));
    }

    #[tokio::test]
    async fn test_configured_manager_creates_pipeline() {
        let config = Config {
            pipeline_manager: Some(ManagerKind::ApacheAirflow),
            ..Config::default()
        };
        let factory = PipelineFactory::new(&config, &backends(), PipelineOptions::named("P"))
            .await
            .unwrap();
        assert_eq!(factory.pipeline().map(|p| p.name.as_str()), Some("P"));
    }

    #[tokio::test]
    async fn test_get_json_task_spec_reads_configured_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("task_typespec.json");
        std::fs::write(&path, r#"{"imports.ImportManifest": {"project_name": {"type": "project"}}}"#).unwrap();

        let config = Config {
            task_spec_file: path,
            ..Config::default()
        };
        let spec = PipelineFactory::get_json_task_spec(&config).await.unwrap();
        assert!(spec.contains_key("imports.ImportManifest"));

        let mut registry = TaskRegistry::new();
        registry.register("phenomedb.imports", "ImportManifest", ["project_name"]);
        let catalogue = PipelineFactory::get_tasks_from_json(&config, &registry, None)
            .await
            .unwrap();
        assert_eq!(catalogue["imports.ImportManifest"].module, "phenomedb.imports");
    }

    #[tokio::test]
    async fn test_get_json_task_spec_reports_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            task_spec_file: dir.path().join("absent.json"),
            ..Config::default()
        };
        let err = PipelineFactory::get_json_task_spec(&config).await.unwrap_err();
        assert!(matches!(err, PipelineError::Io(ref e) if e.kind() == std::io::ErrorKind::NotFound));
    }
}

//! Single-task pipelines.
//!
//! Every catalogued task gets a pipeline of its own, named after its class,
//! so API and admin callers can run one task without building a pipeline.

use std::collections::BTreeMap;
use std::path::PathBuf;

use phenomedb_core::domain::env::DbEnv;
use phenomedb_core::domain::task::normalize_task_id;

use crate::config::{Config, ManagerKind};
use crate::error::{PipelineError, Result};
use crate::factory::Backends;
use crate::manager::{AirflowPipelineManager, PipelineManager, PipelineOptions};
use crate::registry::{TaskSpec, get_tasks_from_json};

/// Ensures a committed single-task pipeline exists for every task in `spec`.
///
/// Returns `module.ClassName` to the artifact path of its pipeline.
pub async fn generate_single_task_pipelines(
    config: &Config,
    backends: &Backends,
    spec: &TaskSpec,
    db_env: DbEnv,
) -> Result<BTreeMap<String, PathBuf>> {
    if config.pipeline_manager != Some(ManagerKind::ApacheAirflow) {
        return Err(PipelineError::Config(
            "single-task pipelines need PHENOMEDB__PIPELINES__PIPELINE_MANAGER=apache-airflow".to_string(),
        ));
    }

    let catalogue = get_tasks_from_json(spec, &backends.registry, None)?;
    let mut artifacts = BTreeMap::new();

    for (key, entry) in &catalogue {
        tracing::info!("Single-task pipeline for {}", key);

        let options = PipelineOptions {
            description: Some(entry.task.clone()),
            ..PipelineOptions::named(entry.task.clone()).with_db_env(db_env)
        };
        let mut manager = AirflowPipelineManager::new(
            backends.store.clone(),
            backends.registry.clone(),
            backends.scheduler.clone(),
            config,
            options,
        )
        .await?;

        let task_id = normalize_task_id(&entry.task);
        let has_task = manager.pipeline().is_some_and(|p| p.contains_task(&task_id));
        if !has_task {
            manager
                .add_task(&entry.module, &entry.task, Some(task_id.as_str()), None, None)
                .await?;
        }

        let path = manager.artifact_path()?;
        if !has_task || !tokio::fs::try_exists(&path).await? {
            manager.commit_definition().await?;
        }

        artifacts.insert(key.clone(), path);
    }

    for path in artifacts.values() {
        if !tokio::fs::try_exists(path).await? {
            return Err(PipelineError::MissingArtifact(path.clone()));
        }
    }

    Ok(artifacts)
}

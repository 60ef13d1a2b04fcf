//! Pipeline manager scenarios against an in-memory store and a fake scheduler

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use phenomedb_client::{ClientError, Dag, DagRun, Result as ClientResult};
use phenomedb_core::domain::env::DbEnv;
use phenomedb_core::domain::task::{RunConfig, TaskArgs};
use phenomedb_core::domain::task_run::{TaskRun, TaskRunStatus};
use phenomedb_pipelines::cache::{Cache, MemoryCache};
use phenomedb_pipelines::config::{ManagerKind, TriggerFailurePolicy};
use phenomedb_pipelines::registry::{Task, TaskRegistry, TaskSpec};
use phenomedb_pipelines::repository::{MemoryStore, PipelineStore};
use phenomedb_pipelines::scheduler::SchedulerApi;
use phenomedb_pipelines::setup::generate_single_task_pipelines;
use phenomedb_pipelines::{AirflowPipelineManager, Backends, Config, PipelineError, PipelineManager, PipelineOptions};
use serde_json::{Value, json};
use tempfile::TempDir;

// =============================================================================
// Fakes
// =============================================================================

struct FakeScheduler {
    /// Listings that miss the pipeline before it shows up; `None` never registers
    registered_after: Option<usize>,
    paused: Mutex<bool>,
    reject_triggers: bool,
    listings: AtomicUsize,
    patches: Mutex<Vec<bool>>,
    deleted: Mutex<Vec<String>>,
    triggers: Mutex<Vec<(String, RunConfig)>>,
}

impl FakeScheduler {
    fn registered() -> Self {
        Self::new(Some(0))
    }

    fn new(registered_after: Option<usize>) -> Self {
        Self {
            registered_after,
            paused: Mutex::new(true),
            reject_triggers: false,
            listings: AtomicUsize::new(0),
            patches: Mutex::new(Vec::new()),
            deleted: Mutex::new(Vec::new()),
            triggers: Mutex::new(Vec::new()),
        }
    }

    fn rejecting() -> Self {
        Self {
            reject_triggers: true,
            ..Self::registered()
        }
    }

    fn listings(&self) -> usize {
        self.listings.load(Ordering::SeqCst)
    }

    fn dag(&self, dag_id: &str) -> Dag {
        Dag {
            dag_id: dag_id.to_string(),
            is_paused: *self.paused.lock().unwrap(),
            is_active: Some(true),
            fileloc: None,
        }
    }
}

#[async_trait]
impl SchedulerApi for FakeScheduler {
    async fn find_dag(&self, dag_id: &str) -> ClientResult<Option<Dag>> {
        let seen = self.listings.fetch_add(1, Ordering::SeqCst);
        match self.registered_after {
            Some(misses) if seen >= misses => Ok(Some(self.dag(dag_id))),
            _ => Ok(None),
        }
    }

    async fn set_dag_paused(&self, dag_id: &str, paused: bool) -> ClientResult<Dag> {
        self.patches.lock().unwrap().push(paused);
        *self.paused.lock().unwrap() = paused;
        Ok(self.dag(dag_id))
    }

    async fn delete_dag(&self, dag_id: &str) -> ClientResult<()> {
        self.deleted.lock().unwrap().push(dag_id.to_string());
        Ok(())
    }

    async fn trigger_dag_run(&self, dag_id: &str, conf: RunConfig) -> ClientResult<DagRun> {
        self.triggers.lock().unwrap().push((dag_id.to_string(), conf));
        if self.reject_triggers {
            return Err(ClientError::api_error(409, "DAGRun already exists"));
        }
        Ok(DagRun {
            dag_run_id: "manual__1".to_string(),
            dag_id: Some(dag_id.to_string()),
            state: Some("queued".to_string()),
        })
    }
}

struct Summarise;

#[async_trait]
impl Task for Summarise {
    async fn run(&self, args: &TaskArgs) -> anyhow::Result<Value> {
        Ok(json!({"task_run_id": args.get("task_run_id"), "rows": 42}))
    }
}

// =============================================================================
// Harness
// =============================================================================

const BASE: [&str; 4] = ["username", "task_run_id", "db_env", "upstream_task_run_id"];

fn registry() -> TaskRegistry {
    let mut registry = TaskRegistry::new();
    registry
        .register(
            "phenomedb.imports",
            "ImportManifest",
            ["project_name", "sample_manifest_path"].into_iter().chain(BASE),
        )
        .register(
            "phenomedb.imports",
            "ImportDataLocations",
            ["project_name", "data_locations_path"].into_iter().chain(BASE),
        )
        .register("phenomedb.test", "Ab", ["a", "b"])
        .register_runnable(
            "phenomedb.test",
            "Summarise",
            ["task_run_id", "db_env"],
            Arc::new(Summarise),
        );
    registry
}

struct Harness {
    store: Arc<MemoryStore>,
    scheduler: Arc<FakeScheduler>,
    registry: Arc<TaskRegistry>,
    config: Config,
    dir: TempDir,
}

impl Harness {
    fn new(scheduler: FakeScheduler) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            pipeline_manager: Some(ManagerKind::ApacheAirflow),
            pipeline_folder: dir.path().to_path_buf(),
            scheduler_dag_folder: PathBuf::from("/opt/airflow/dags"),
            docker: false,
            registration_wait: Duration::ZERO,
            admission_delays: vec![Duration::ZERO; 3],
            ..Config::default()
        };

        Self {
            store: Arc::new(MemoryStore::new()),
            scheduler: Arc::new(scheduler),
            registry: Arc::new(registry()),
            config,
            dir,
        }
    }

    fn raising(mut self) -> Self {
        self.config.trigger_failure_policy = TriggerFailurePolicy::Raise;
        self
    }

    fn backends(&self) -> Backends {
        Backends {
            store: self.store.clone(),
            registry: self.registry.clone(),
            scheduler: self.scheduler.clone(),
            cache: None,
        }
    }

    async fn manager(&self, options: PipelineOptions) -> AirflowPipelineManager {
        AirflowPipelineManager::new(
            self.store.clone(),
            self.registry.clone(),
            self.scheduler.clone(),
            &self.config,
            options,
        )
        .await
        .unwrap()
    }

    async fn test_pipeline(&self) -> AirflowPipelineManager {
        self.manager(PipelineOptions::named("P").with_db_env(DbEnv::Test)).await
    }

    fn artifact(&self, name: &str) -> PathBuf {
        self.dir.path().join(format!("{}.py", name))
    }

    async fn committed_runs(&self, task_id: &str) -> Vec<TaskRun> {
        self.store
            .committed_task_runs()
            .await
            .into_iter()
            .filter(|r| r.task_id.as_deref() == Some(task_id))
            .collect()
    }
}

fn args(value: Value) -> TaskArgs {
    serde_json::from_value(value).unwrap()
}

fn run_config(value: Value) -> RunConfig {
    serde_json::from_value(value).unwrap()
}

async fn add(manager: &mut AirflowPipelineManager, class: &str, task_id: &str) {
    let module = if class == "Ab" || class == "Summarise" {
        "phenomedb.test"
    } else {
        "phenomedb.imports"
    };
    manager
        .add_task(module, class, Some(task_id), None, None)
        .await
        .unwrap();
}

// =============================================================================
// Scenarios
// =============================================================================

#[tokio::test]
async fn test_end_to_end_two_task_pipeline() {
    let harness = Harness::new(FakeScheduler::registered());
    let mut manager = harness.test_pipeline().await;

    add(&mut manager, "ImportManifest", "import_manifest").await;
    add(&mut manager, "ImportDataLocations", "import_data_locations").await;
    assert!(manager.commit_definition().await.unwrap());

    let pipeline = manager.pipeline().unwrap();
    assert_eq!(pipeline.name, "P_TEST");
    assert_eq!(
        pipeline.pipeline_file_path.as_deref(),
        Some("/opt/airflow/dags/P_TEST.py")
    );

    let rendered = std::fs::read_to_string(harness.artifact("P_TEST")).unwrap();
    assert!(rendered.contains("def task_import_manifest():"));
    assert!(rendered.contains("def task_import_data_locations():"));
    assert_eq!(rendered.matches(".set_upstream(").count(), 1);
    assert!(rendered.contains("data_import_data_locations.set_upstream(data_import_manifest)"));

    let run = manager
        .run_pipeline(
            Some(run_config(json!({
                "import_manifest": {"project_name": "PipelineTesting", "sample_manifest_path": "/data/manifest.xlsx"},
                "import_data_locations": {}
            }))),
            false,
        )
        .await
        .unwrap();

    assert_eq!(run.pipeline_run_id.as_deref(), Some("manual__1"));
    assert_eq!(run.task_run_ids.len(), 2);

    for task_id in ["import_manifest", "import_data_locations"] {
        let runs = harness.committed_runs(task_id).await;
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].status, TaskRunStatus::Scheduled);
        assert_eq!(runs[0].pipeline_run_id.as_deref(), Some("manual__1"));
        assert_eq!(runs[0].args.get("db_env"), Some(&json!("TEST")));
        assert_eq!(runs[0].args.get("task_run_id"), Some(&json!(runs[0].id)));
    }

    // Registered but paused: admission un-paused it
    assert_eq!(*harness.scheduler.patches.lock().unwrap(), vec![false]);

    let triggers = harness.scheduler.triggers.lock().unwrap();
    assert_eq!(triggers.len(), 1);
    assert_eq!(triggers[0].0, "P_TEST");
    assert_eq!(
        triggers[0].1["import_manifest"].get("project_name"),
        Some(&json!("PipelineTesting"))
    );
}

#[tokio::test]
async fn test_run_with_only_first_task_configured() {
    let harness = Harness::new(FakeScheduler::registered());
    let mut manager = harness.test_pipeline().await;

    add(&mut manager, "ImportManifest", "import_manifest").await;
    add(&mut manager, "ImportDataLocations", "import_data_locations").await;
    assert!(manager.commit_definition().await.unwrap());

    let run = manager
        .run_pipeline(
            Some(run_config(json!({
                "import_manifest": {"project_name": "PipelineTesting", "sample_manifest_path": "/data/manifest.xlsx"}
            }))),
            false,
        )
        .await
        .unwrap();

    assert_eq!(run.pipeline_run_id.as_deref(), Some("manual__1"));
    assert_eq!(run.task_run_ids.keys().collect::<Vec<_>>(), vec!["import_manifest"]);
    assert_eq!(manager.base().task_run_ids(), &run.task_run_ids);

    let runs = harness.committed_runs("import_manifest").await;
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].status, TaskRunStatus::Scheduled);
    assert_eq!(runs[0].pipeline_run_id.as_deref(), Some("manual__1"));
    assert_eq!(runs[0].args.get("sample_manifest_path"), Some(&json!("/data/manifest.xlsx")));
    assert!(harness.committed_runs("import_data_locations").await.is_empty());

    let triggers = harness.scheduler.triggers.lock().unwrap();
    assert_eq!(triggers[0].1.keys().collect::<Vec<_>>(), vec!["import_manifest"]);

    // The unconfigured task is skipped by the artifact at run time
    let rendered = std::fs::read_to_string(harness.artifact("P_TEST")).unwrap();
    assert!(rendered.contains("elif \"import_data_locations\" in conf:"));
    assert_eq!(rendered.matches("            return {}").count(), 2);
}

#[tokio::test]
async fn test_run_writes_missing_artifact_before_admission() {
    let harness = Harness::new(FakeScheduler::new(Some(2)));
    let mut manager = harness.test_pipeline().await;
    add(&mut manager, "ImportManifest", "import_manifest").await;

    assert!(!harness.artifact("P_TEST").exists());
    manager
        .run_pipeline(Some(run_config(json!({"import_manifest": {}}))), false)
        .await
        .unwrap();

    assert!(harness.artifact("P_TEST").exists());
    assert_eq!(harness.scheduler.listings(), 3);
}

#[tokio::test]
async fn test_sanitization_drops_unknown_arguments() {
    let harness = Harness::new(FakeScheduler::registered());
    let mut manager = harness.test_pipeline().await;
    add(&mut manager, "Ab", "ab").await;

    manager
        .run_pipeline(Some(run_config(json!({"ab": {"a": 1, "b": 2, "c": 3}}))), false)
        .await
        .unwrap();

    let runs = harness.committed_runs("ab").await;
    let keys: Vec<&str> = runs[0].args.keys().map(String::as_str).collect();
    assert_eq!(keys, vec!["a", "b", "db_env", "task_run_id"]);
}

#[tokio::test]
async fn test_upstream_task_run_id_is_propagated() {
    let harness = Harness::new(FakeScheduler::registered());
    let mut manager = harness.test_pipeline().await;
    add(&mut manager, "ImportManifest", "y").await;
    add(&mut manager, "ImportDataLocations", "x").await;

    manager
        .run_pipeline(
            Some(run_config(json!({
                "y": {"project_name": "PipelineTesting"},
                "x": {"project_name": "PipelineTesting", "upstream_task_id": "y"}
            }))),
            false,
        )
        .await
        .unwrap();

    let y = &harness.committed_runs("y").await[0];
    let x = &harness.committed_runs("x").await[0];
    assert_eq!(x.args.get("upstream_task_run_id"), Some(&json!(y.id)));
    assert_eq!(x.upstream_task_run_id, Some(y.id));
    assert!(!x.args.contains_key("upstream_task_id"));

    let triggers = harness.scheduler.triggers.lock().unwrap();
    assert_eq!(triggers[0].1["x"].get("upstream_task_run_id"), Some(&json!(y.id)));
}

#[tokio::test]
async fn test_upstream_outside_the_run_is_rejected() {
    let harness = Harness::new(FakeScheduler::registered());
    let mut manager = harness.test_pipeline().await;
    add(&mut manager, "ImportManifest", "y").await;
    add(&mut manager, "ImportDataLocations", "x").await;
    manager.commit_definition().await.unwrap();

    let err = manager
        .run_pipeline(Some(run_config(json!({"x": {"upstream_task_id": "y"}}))), false)
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::UnknownUpstreamTask(id) if id == "y"));
    assert!(harness.store.committed_task_runs().await.is_empty());
}

#[tokio::test]
async fn test_hard_coded_task_run_is_reused() {
    let harness = Harness::new(FakeScheduler::registered());
    let mut manager = harness.test_pipeline().await;
    manager
        .add_task(
            "phenomedb.imports",
            "ImportManifest",
            Some("import_manifest"),
            Some(args(json!({"project_name": "PipelineTesting"}))),
            None,
        )
        .await
        .unwrap();
    let hard_coded = manager.base().task_run_ids()["import_manifest"];

    let run = manager
        .run_pipeline(Some(run_config(json!({"import_manifest": {}}))), false)
        .await
        .unwrap();

    assert_eq!(run.task_run_ids["import_manifest"], hard_coded);
    let runs = harness.committed_runs("import_manifest").await;
    assert_eq!(runs.len(), 1);
    assert!(runs[0].created_by_add_task);
    assert_eq!(runs[0].args.get("project_name"), Some(&json!("PipelineTesting")));
    assert_eq!(runs[0].status, TaskRunStatus::Scheduled);
}

#[tokio::test]
async fn test_explicit_task_run_id_is_reused() {
    let harness = Harness::new(FakeScheduler::registered());
    let mut manager = harness.test_pipeline().await;
    add(&mut manager, "ImportManifest", "import_manifest").await;

    let first = manager
        .run_pipeline(Some(run_config(json!({"import_manifest": {"project_name": "A"}}))), false)
        .await
        .unwrap();
    let id = first.task_run_ids["import_manifest"];

    let second = manager
        .run_pipeline(
            Some(run_config(json!({
                "import_manifest": {"task_run_id": id, "username": "bob", "project_name": "B", "sample_manifest_path": ""}
            }))),
            false,
        )
        .await
        .unwrap();

    assert_eq!(second.task_run_ids["import_manifest"], id);
    let runs = harness.committed_runs("import_manifest").await;
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].username.as_deref(), Some("bob"));
    assert!(!runs[0].args.contains_key("sample_manifest_path"));
    assert_eq!(runs[0].status, TaskRunStatus::Scheduled);
}

#[tokio::test]
async fn test_registration_timeout_rolls_back() {
    let harness = Harness::new(FakeScheduler::new(None));
    let mut manager = harness.test_pipeline().await;
    add(&mut manager, "ImportManifest", "import_manifest").await;
    manager.commit_definition().await.unwrap();

    let err = manager
        .run_pipeline(Some(run_config(json!({"import_manifest": {}}))), false)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        PipelineError::SchedulerRegistrationTimeout { attempts: 4, .. }
    ));
    assert_eq!(harness.scheduler.listings(), 4);
    assert!(harness.store.committed_task_runs().await.is_empty());
    assert!(harness.scheduler.triggers.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_run_config_is_validated_before_waiting() {
    let harness = Harness::new(FakeScheduler::registered());
    let mut manager = harness.test_pipeline().await;
    add(&mut manager, "ImportManifest", "import_manifest").await;

    let err = manager
        .run_pipeline(Some(run_config(json!({"nope": {}}))), false)
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::UnrecognisedTaskId(id) if id == "nope"));
    assert_eq!(harness.scheduler.listings(), 0);
}

#[tokio::test]
async fn test_empty_pipeline_cannot_run() {
    let harness = Harness::new(FakeScheduler::registered());
    let mut manager = harness.test_pipeline().await;

    let err = manager.run_pipeline(None, false).await.unwrap_err();
    assert!(matches!(err, PipelineError::EmptyDefinition(name) if name == "P_TEST"));
}

#[tokio::test]
async fn test_rejected_trigger_is_logged_by_default() {
    let harness = Harness::new(FakeScheduler::rejecting());
    let mut manager = harness.test_pipeline().await;
    add(&mut manager, "ImportManifest", "import_manifest").await;

    let run = manager
        .run_pipeline(Some(run_config(json!({"import_manifest": {}}))), false)
        .await
        .unwrap();

    assert_eq!(run.pipeline_run_id, None);
    let runs = harness.committed_runs("import_manifest").await;
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].status, TaskRunStatus::Created);
}

#[tokio::test]
async fn test_rejected_trigger_can_raise() {
    let harness = Harness::new(FakeScheduler::rejecting()).raising();
    let mut manager = harness.test_pipeline().await;
    add(&mut manager, "ImportManifest", "import_manifest").await;
    manager.commit_definition().await.unwrap();

    let err = manager
        .run_pipeline(Some(run_config(json!({"import_manifest": {}}))), false)
        .await
        .unwrap_err();

    match err {
        PipelineError::SchedulerTriggerFailed { pipeline, source } => {
            assert_eq!(pipeline, "P_TEST");
            assert_eq!(source.status(), Some(409));
        }
        other => panic!("unexpected error: {}", other),
    }
    assert!(harness.store.committed_task_runs().await.is_empty());
    assert!(manager.base().task_run_ids().is_empty());
}

#[tokio::test]
async fn test_hard_coded_pipeline_needs_task_runs() {
    let harness = Harness::new(FakeScheduler::registered());
    let options = PipelineOptions {
        hard_code_data: true,
        ..PipelineOptions::named("H").with_db_env(DbEnv::Test)
    };
    let mut manager = harness.manager(options).await;
    add(&mut manager, "ImportManifest", "import_manifest").await;

    let err = manager.commit_definition().await.unwrap_err();
    assert!(matches!(err, PipelineError::MissingHardCodedTaskRun(id) if id == "import_manifest"));
}

#[tokio::test]
async fn test_hard_coded_pipeline_embeds_arguments() {
    let harness = Harness::new(FakeScheduler::registered());
    let options = PipelineOptions {
        hard_code_data: true,
        ..PipelineOptions::named("H").with_db_env(DbEnv::Test)
    };
    let mut manager = harness.manager(options).await;
    manager
        .add_task(
            "phenomedb.imports",
            "ImportManifest",
            Some("import_manifest"),
            Some(args(json!({"project_name": "PipelineTesting"}))),
            None,
        )
        .await
        .unwrap();

    assert!(manager.commit_definition().await.unwrap());

    let runs = harness.committed_runs("import_manifest").await;
    let id = runs[0].id;
    assert_eq!(runs[0].args.get("task_run_id"), Some(&json!(id)));
    assert_eq!(runs[0].args.get("db_env"), Some(&json!("TEST")));

    let rendered = std::fs::read_to_string(harness.artifact("H_TEST")).unwrap();
    assert!(rendered.contains(&format!(
        r#"args = {{"db_env": "TEST", "project_name": "PipelineTesting", "task_run_id": {}}}"#,
        id
    )));
}

#[tokio::test]
async fn test_pause_sets_is_paused() {
    let harness = Harness::new(FakeScheduler::registered());
    *harness.scheduler.paused.lock().unwrap() = false;
    let mut manager = harness.test_pipeline().await;

    assert!(manager.pause_pipeline().await.unwrap());
    assert!(manager.pause_pipeline().await.unwrap());
    assert_eq!(*harness.scheduler.patches.lock().unwrap(), vec![true]);
}

#[tokio::test]
async fn test_delete_removes_artifact_and_soft_deletes() {
    let harness = Harness::new(FakeScheduler::registered());
    let mut manager = harness.test_pipeline().await;
    add(&mut manager, "ImportManifest", "import_manifest").await;
    manager.commit_definition().await.unwrap();
    assert!(harness.artifact("P_TEST").exists());

    assert!(manager.delete_pipeline().await.unwrap());

    assert!(!harness.artifact("P_TEST").exists());
    assert_eq!(*harness.scheduler.deleted.lock().unwrap(), vec!["P_TEST".to_string()]);
    assert!(harness.store.find_pipeline_by_name("P_TEST").await.unwrap().is_none());

    let pipelines = harness.store.committed_pipelines().await;
    assert_eq!(pipelines.len(), 1);
    assert!(pipelines[0].deleted);
}

#[tokio::test]
async fn test_delete_tolerates_unregistered_pipeline() {
    let harness = Harness::new(FakeScheduler::new(None));
    let mut manager = harness.test_pipeline().await;

    assert!(manager.delete_pipeline().await.unwrap());
    assert!(harness.scheduler.deleted.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_debug_run_executes_in_process() {
    let harness = Harness::new(FakeScheduler::new(None));
    let cache = Arc::new(MemoryCache::new());
    let mut manager = harness.test_pipeline().await.with_cache(cache.clone());
    add(&mut manager, "Summarise", "first").await;
    add(&mut manager, "Summarise", "second").await;

    let run = manager
        .run_pipeline(Some(run_config(json!({"first": {}, "second": {}}))), true)
        .await
        .unwrap();

    assert_eq!(run.pipeline_run_id, None);
    assert_eq!(harness.scheduler.listings(), 0);

    for task_id in ["first", "second"] {
        let id = run.task_run_ids[task_id];
        let runs = harness.committed_runs(task_id).await;
        assert_eq!(runs[0].status, TaskRunStatus::Success);
        assert!(runs[0].output.is_none());
        assert_eq!(
            cache.get(&format!("TaskOutput::{}", id)).await.unwrap(),
            Some(json!({"task_run_id": id, "rows": 42}))
        );
    }
}

#[tokio::test]
async fn test_existing_pipeline_is_resolved_by_name() {
    let harness = Harness::new(FakeScheduler::registered());
    let mut first = harness.test_pipeline().await;
    add(&mut first, "ImportManifest", "import_manifest").await;
    first.commit_definition().await.unwrap();
    let id = first.pipeline().unwrap().id;

    let second = harness.test_pipeline().await;
    assert_eq!(second.pipeline().unwrap().id, id);
    assert_eq!(second.pipeline().unwrap().task_order, vec!["import_manifest"]);

    let by_id = harness
        .manager(PipelineOptions {
            pipeline_id: Some(id),
            ..Default::default()
        })
        .await;
    assert_eq!(by_id.pipeline().unwrap().name, "P_TEST");
}

#[tokio::test]
async fn test_single_task_pipelines() {
    let harness = Harness::new(FakeScheduler::registered());
    let spec: TaskSpec = serde_json::from_value(json!({
        "imports.ImportManifest": {"project_name": {"type": "project"}},
        "imports.ImportDataLocations": {"data_locations_path": {"type": "file_upload"}}
    }))
    .unwrap();

    let artifacts = generate_single_task_pipelines(&harness.config, &harness.backends(), &spec, DbEnv::Prod)
        .await
        .unwrap();

    assert_eq!(artifacts.len(), 2);
    assert_eq!(artifacts["imports.ImportManifest"], harness.artifact("ImportManifest"));
    assert!(artifacts.values().all(|p| p.exists()));

    let again = generate_single_task_pipelines(&harness.config, &harness.backends(), &spec, DbEnv::Prod)
        .await
        .unwrap();
    assert_eq!(again, artifacts);

    let pipelines = harness.store.committed_pipelines().await;
    assert_eq!(pipelines.len(), 2);
    let manifest = pipelines.iter().find(|p| p.name == "ImportManifest").unwrap();
    assert_eq!(manifest.task_order, vec!["importmanifest"]);
}

#[tokio::test]
async fn test_construction_requires_name_or_id() {
    let harness = Harness::new(FakeScheduler::registered());
    let result = AirflowPipelineManager::new(
        harness.store.clone(),
        harness.registry.clone(),
        harness.scheduler.clone(),
        &harness.config,
        PipelineOptions::default(),
    )
    .await;
    assert!(matches!(result, Err(PipelineError::IllegalState(_))));
}

#[tokio::test]
async fn test_task_runs_map_is_per_instance() {
    let harness = Harness::new(FakeScheduler::registered());
    let mut first = harness.test_pipeline().await;
    first
        .add_task(
            "phenomedb.imports",
            "ImportManifest",
            Some("import_manifest"),
            Some(TaskArgs::new()),
            None,
        )
        .await
        .unwrap();
    first.commit_definition().await.unwrap();

    let second = harness.test_pipeline().await;
    assert_eq!(first.base().task_run_ids().len(), 1);
    assert!(second.base().task_run_ids().is_empty());
}

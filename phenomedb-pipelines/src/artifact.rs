//! Scheduler artifact rendering.
//!
//! A committed pipeline is materialized as one Airflow DAG module: the
//! preamble, one stanza per task in `task_order`, then the dependency chain.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use phenomedb_core::domain::pipeline::{Pipeline, ScheduleInterval};
use phenomedb_core::domain::task::TaskArgs;
use serde_json::Value;
use tera::{Context, Tera};

use crate::error::{PipelineError, Result};

const BOILER_PLATE: &str = "boiler_plate.py";
const TASK_WITH_CONFIG: &str = "task_with_config.py";
const TASK_WITH_DATA: &str = "task_with_data.py";
const SET_UPSTREAM: &str = "set_upstream.py";

fn templates() -> Result<Tera> {
    let mut tera = Tera::default();
    tera.add_raw_templates(vec![
        (BOILER_PLATE, include_str!("../templates/boiler_plate.py.tera")),
        (TASK_WITH_CONFIG, include_str!("../templates/task_with_config.py.tera")),
        (TASK_WITH_DATA, include_str!("../templates/task_with_data.py.tera")),
        (SET_UPSTREAM, include_str!("../templates/set_upstream.py.tera")),
    ])?;
    Ok(tera)
}

/// Renders the DAG module for a pipeline.
///
/// With `hard_coded` set, every task stanza embeds its argument bundle and a
/// task without one is `MissingHardCodedTaskRun`. Without it, tasks read their
/// arguments from the run configuration at trigger time.
pub fn render_pipeline(pipeline: &Pipeline, hard_coded: Option<&BTreeMap<String, TaskArgs>>) -> Result<String> {
    let tera = templates()?;
    let mut out = tera.render(BOILER_PLATE, &preamble_context(pipeline)?)?;

    for task_id in &pipeline.task_order {
        let task = pipeline
            .definition
            .get(task_id)
            .ok_or_else(|| PipelineError::IllegalState(format!("{} missing from definition", task_id)))?;

        let mut context = Context::new();
        context.insert("task_id", task_id);
        context.insert("task_module", &task.task_module);
        context.insert("task_class", &task.task_class);

        let template = match hard_coded {
            Some(bundles) => {
                let args = bundles
                    .get(task_id)
                    .ok_or_else(|| PipelineError::MissingHardCodedTaskRun(task_id.clone()))?;
                context.insert("args", &python_literal(&Value::Object(args.clone())));
                TASK_WITH_DATA
            }
            None => TASK_WITH_CONFIG,
        };

        out.push_str(&tera.render(template, &context)?);
    }

    let chain = pipeline.dependency_chain();
    if !chain.is_empty() {
        out.push('\n');
    }
    for (upstream, downstream) in chain {
        let mut context = Context::new();
        context.insert("upstream", upstream);
        context.insert("downstream", downstream);
        out.push_str(&tera.render(SET_UPSTREAM, &context)?);
    }

    Ok(out)
}

fn preamble_context(pipeline: &Pipeline) -> Result<Context> {
    let description = pipeline
        .description
        .clone()
        .unwrap_or_else(|| "default description".to_string());
    let tags = Value::Array(pipeline.tags.iter().cloned().map(Value::String).collect());
    let schedule_interval = match &pipeline.schedule_interval {
        ScheduleInterval::Manual => "None".to_string(),
        other => python_literal(&Value::String(other.as_str().to_string())),
    };

    let mut context = Context::new();
    context.insert("pipeline_id", &pipeline.id);
    context.insert("name", &pipeline.name);
    context.insert("description_comment", &description.replace(['\r', '\n'], " "));
    context.insert(
        "username_created",
        pipeline.username_created.as_deref().unwrap_or("unknown"),
    );
    context.insert("date_created", &pipeline.date_created.to_rfc3339());
    context.insert("dag_id", &python_literal(&Value::String(pipeline.name.clone())));
    context.insert("start_timestamp", &pipeline.start_date.timestamp());
    context.insert(
        "default_args",
        &python_literal(&Value::Object(pipeline.default_args.clone())),
    );
    context.insert("description", &python_literal(&Value::String(description)));
    context.insert("max_active_runs", &pipeline.max_active_runs);
    context.insert("concurrency", &pipeline.concurrency);
    context.insert("tags", &python_literal(&tags));
    context.insert("schedule_interval", &schedule_interval);
    Ok(context)
}

/// Renders a JSON value as the equivalent Python literal
pub fn python_literal(value: &Value) -> String {
    match value {
        Value::Null => "None".to_string(),
        Value::Bool(true) => "True".to_string(),
        Value::Bool(false) => "False".to_string(),
        Value::Number(n) => n.to_string(),
        // JSON string escapes are valid Python string escapes
        Value::String(s) => Value::String(s.clone()).to_string(),
        Value::Array(items) => {
            let items: Vec<String> = items.iter().map(python_literal).collect();
            format!("[{}]", items.join(", "))
        }
        Value::Object(map) => {
            let entries: Vec<String> = map
                .iter()
                .map(|(k, v)| format!("{}: {}", Value::String(k.clone()), python_literal(v)))
                .collect();
            format!("{{{}}}", entries.join(", "))
        }
    }
}

// =============================================================================
// Paths
// =============================================================================

/// Where artifacts live, as seen by this process and by the scheduler
#[derive(Debug, Clone)]
pub struct ArtifactLocation {
    /// Folder mounted locally
    pub pipeline_folder: PathBuf,
    /// Same folder inside the scheduler
    pub scheduler_dag_folder: PathBuf,
    /// Whether this process shares the scheduler's filesystem view
    pub docker: bool,
}

impl ArtifactLocation {
    /// Path recorded on a new pipeline
    pub fn file_path_for(&self, pipeline_name: &str, folder: Option<&Path>) -> String {
        let folder = folder.unwrap_or(&self.scheduler_dag_folder);
        folder
            .join(format!("{}.py", pipeline_name))
            .to_string_lossy()
            .into_owned()
    }

    /// Path this process reads and writes for a recorded artifact path
    pub fn local_path(&self, recorded: &str) -> PathBuf {
        let recorded = Path::new(recorded);
        if self.docker {
            return recorded.to_path_buf();
        }
        match recorded.strip_prefix(&self.scheduler_dag_folder) {
            Ok(rest) => self.pipeline_folder.join(rest),
            Err(_) => recorded.to_path_buf(),
        }
    }
}

/// Writes an artifact, creating parent directories as needed
pub async fn write_artifact(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, contents).await?;
    Ok(())
}

//! Task registry and task catalogue.
//!
//! The registry knows, for every task type a pipeline may contain, the
//! parameter names its constructor accepts and optionally an in-process
//! implementation. Argument bundles are filtered against it before they are
//! persisted or sent to the scheduler.
//!
//! The catalogue is built from the task spec document, a JSON object mapping
//! `"module.ClassName"` to declared parameter metadata:
//!
//! ```json
//! { "imports.ImportSampleManifest": { "project_name": {"type": "project"} } }
//! ```

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use phenomedb_core::domain::task::TaskArgs;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{PipelineError, Result};

/// Package every task module lives under
pub const PACKAGE_ROOT: &str = "phenomedb";

/// Parameters every task constructor accepts
pub const BASE_TASK_PARAMETERS: [&str; 6] = [
    "username",
    "task_run_id",
    "db_env",
    "execution_date",
    "pipeline_run_id",
    "upstream_task_run_id",
];

/// Task spec document: `module.ClassName` to declared parameters
pub type TaskSpec = BTreeMap<String, BTreeMap<String, Value>>;

/// In-process task implementation, used by debug runs
#[async_trait]
pub trait Task: Send + Sync {
    /// Runs the task with its resolved argument bundle and returns its output
    async fn run(&self, args: &TaskArgs) -> anyhow::Result<Value>;
}

/// Parameter names accepted by a task type, in declaration order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSignature {
    pub module: String,
    pub class: String,
    pub parameters: Vec<String>,
}

impl TaskSignature {
    pub fn accepts(&self, parameter: &str) -> bool {
        self.parameters.iter().any(|p| p == parameter)
    }
}

#[derive(Clone)]
struct RegisteredTask {
    signature: TaskSignature,
    runner: Option<Arc<dyn Task>>,
}

#[derive(Clone, Default)]
pub struct TaskRegistry {
    tasks: BTreeMap<(String, String), RegisteredTask>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a task type by its accepted parameter names
    pub fn register<I, S>(&mut self, module: &str, class: &str, parameters: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.insert(module, class, parameters, None)
    }

    /// Registers a task type together with an in-process implementation
    pub fn register_runnable<I, S>(
        &mut self,
        module: &str,
        class: &str,
        parameters: I,
        task: Arc<dyn Task>,
    ) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.insert(module, class, parameters, Some(task))
    }

    fn insert<I, S>(&mut self, module: &str, class: &str, parameters: I, runner: Option<Arc<dyn Task>>) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let signature = TaskSignature {
            module: module.to_string(),
            class: class.to_string(),
            parameters: parameters.into_iter().map(Into::into).collect(),
        };
        self.tasks.insert(
            (module.to_string(), class.to_string()),
            RegisteredTask { signature, runner },
        );
        self
    }

    /// Builds a registry from the parameters declared in a task spec
    ///
    /// Each signature is the declared parameters followed by the base task
    /// parameters.
    pub fn from_task_spec(spec: &TaskSpec) -> Result<Self> {
        let mut registry = Self::new();
        for (key, params) in spec {
            let (module, class) = split_task_key(key)?;
            let mut parameters: Vec<String> = params.keys().cloned().collect();
            for base in BASE_TASK_PARAMETERS {
                if !parameters.iter().any(|p| p == base) {
                    parameters.push(base.to_string());
                }
            }
            registry.register(&qualify_module(&module), &class, parameters);
        }
        Ok(registry)
    }

    pub fn describe(&self, module: &str, class: &str) -> Option<&TaskSignature> {
        self.tasks
            .get(&(module.to_string(), class.to_string()))
            .map(|t| &t.signature)
    }

    pub fn signature(&self, module: &str, class: &str) -> Result<&TaskSignature> {
        self.describe(module, class)
            .ok_or_else(|| PipelineError::unknown_task_type(module, class))
    }

    pub fn runner(&self, module: &str, class: &str) -> Result<Arc<dyn Task>> {
        let task = self
            .tasks
            .get(&(module.to_string(), class.to_string()))
            .ok_or_else(|| PipelineError::unknown_task_type(module, class))?;

        task.runner.clone().ok_or_else(|| PipelineError::TaskNotExecutable {
            module: module.to_string(),
            class: class.to_string(),
        })
    }

    pub fn signatures(&self) -> impl Iterator<Item = &TaskSignature> {
        self.tasks.values().map(|t| &t.signature)
    }

    /// Drops every argument the task type does not accept.
    ///
    /// Returns the kept arguments and the names of the dropped ones.
    pub fn sanitize(&self, module: &str, class: &str, args: TaskArgs) -> Result<(TaskArgs, Vec<String>)> {
        let signature = self.signature(module, class)?;
        let mut kept = TaskArgs::new();
        let mut dropped = Vec::new();

        for (key, value) in args {
            if signature.accepts(&key) {
                kept.insert(key, value);
            } else {
                dropped.push(key);
            }
        }

        Ok((kept, dropped))
    }
}

// =============================================================================
// Task Spec
// =============================================================================

/// Reads the task spec document
pub async fn load_task_spec(path: &Path) -> Result<TaskSpec> {
    let raw = tokio::fs::read_to_string(path).await?;
    Ok(serde_json::from_str(&raw)?)
}

/// Splits `module.ClassName` into its two parts
pub fn split_task_key(key: &str) -> Result<(String, String)> {
    let mut parts = key.split('.');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(module), Some(class), None) if !module.is_empty() && !class.is_empty() => {
            Ok((module.to_string(), class.to_string()))
        }
        _ => Err(PipelineError::TaskSpecFormat(key.to_string())),
    }
}

/// Prefixes a spec module with the package root
pub fn qualify_module(module: &str) -> String {
    if module == PACKAGE_ROOT || module.starts_with(&format!("{}.", PACKAGE_ROOT)) {
        module.to_string()
    } else {
        format!("{}.{}", PACKAGE_ROOT, module)
    }
}

/// Catalogue entry describing one addable task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskCatalogueEntry {
    /// Class name
    pub task: String,
    /// Fully qualified module
    pub module: String,
    /// Comma-joined accepted argument names
    pub args: String,
    /// Declared parameter metadata as JSON
    pub params: String,
}

/// Builds the task catalogue, cross-checked against the registry.
///
/// `modules_to_include` restricts the catalogue to the given fully qualified
/// modules. A spec entry the registry does not know, or that declares a
/// parameter the task does not accept, is an error.
pub fn get_tasks_from_json(
    spec: &TaskSpec,
    registry: &TaskRegistry,
    modules_to_include: Option<&[String]>,
) -> Result<BTreeMap<String, TaskCatalogueEntry>> {
    let mut catalogue = BTreeMap::new();

    for (key, params) in spec {
        let (module, class) = split_task_key(key)?;
        let full_module = qualify_module(&module);

        if let Some(include) = modules_to_include {
            if !include.is_empty() && !include.iter().any(|m| *m == full_module) {
                continue;
            }
        }

        let signature = registry.signature(&full_module, &class)?;

        if let Some(undeclared) = params.keys().find(|p| !signature.accepts(p)) {
            return Err(PipelineError::TaskSpecMismatch {
                task: key.clone(),
                parameter: undeclared.clone(),
            });
        }

        catalogue.insert(
            key.clone(),
            TaskCatalogueEntry {
                task: class,
                module: full_module,
                args: signature.parameters.join(","),
                params: serde_json::to_string(params)?,
            },
        );
    }

    Ok(catalogue)
}

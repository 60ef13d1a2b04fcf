//! Task identity types
//!
//! A pipeline refers to its tasks by a pipeline-local identifier. Each
//! identifier maps to the module and class implementing the task.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Argument bundle handed to a single task
pub type TaskArgs = serde_json::Map<String, Value>;

/// Per-run configuration: task id to that task's argument bundle
pub type RunConfig = BTreeMap<String, TaskArgs>;

/// Implementation reference stored in a pipeline definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskDefinition {
    pub task_module: String,
    pub task_class: String,
}

impl TaskDefinition {
    pub fn new(task_module: impl Into<String>, task_class: impl Into<String>) -> Self {
        Self {
            task_module: task_module.into(),
            task_class: task_class.into(),
        }
    }
}

/// Normalizes a task identifier so it is safe as a file-level Python name.
///
/// Lowercases and collapses every run of non-alphanumeric characters into a
/// single underscore.
pub fn normalize_task_id(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut in_run = false;

    for c in raw.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
            in_run = false;
        } else if !in_run {
            out.push('_');
            in_run = true;
        }
    }

    out
}

/// Leading digits are reserved for generated identifiers
pub fn starts_with_digit(task_id: &str) -> bool {
    task_id.chars().next().is_some_and(|c| c.is_ascii_digit())
}

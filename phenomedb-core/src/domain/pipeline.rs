//! Pipeline domain types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::fmt;

use super::task::TaskDefinition;

/// Tag added to every pipeline created through the pipeline manager
pub const FACTORY_TAG: &str = "pipeline_factory";

/// Named, ordered task-graph definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pipeline {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub schedule_interval: ScheduleInterval,
    pub start_date: DateTime<Utc>,
    pub date_created: DateTime<Utc>,
    pub username_created: Option<String>,
    pub hard_code_data: bool,
    pub sequential: bool,
    pub definition: BTreeMap<String, TaskDefinition>,
    pub task_order: Vec<String>,
    pub default_args: serde_json::Map<String, Value>,
    pub pipeline_file_path: Option<String>,
    pub tags: Vec<String>,
    pub deleted: bool,
    pub max_active_runs: i32,
    pub concurrency: i32,
}

impl Pipeline {
    pub fn contains_task(&self, task_id: &str) -> bool {
        self.definition.contains_key(task_id)
    }

    /// Adds a task to the definition.
    ///
    /// The task is placed right after `after` in `task_order` when that task
    /// exists, otherwise at the end.
    pub fn insert_task(&mut self, task_id: String, task: TaskDefinition, after: Option<&str>) {
        let position = after
            .and_then(|upstream| self.task_order.iter().position(|t| t == upstream))
            .map(|idx| idx + 1)
            .unwrap_or(self.task_order.len());

        self.task_order.insert(position, task_id.clone());
        self.definition.insert(task_id, task);
    }

    /// Dependency edges as `(upstream, downstream)` pairs.
    ///
    /// Only sequential pipelines with more than one task declare edges, and
    /// they always form the straight chain given by `task_order`.
    pub fn dependency_chain(&self) -> Vec<(&str, &str)> {
        if !self.sequential || self.task_order.len() < 2 {
            return Vec::new();
        }

        self.task_order
            .windows(2)
            .map(|pair| (pair[0].as_str(), pair[1].as_str()))
            .collect()
    }
}

/// Scheduler defaults applied to pipelines created without explicit ones
pub fn default_pipeline_args() -> serde_json::Map<String, Value> {
    let value = json!({
        "owner": "airflow",
        "retries": 1,
        "retries_delay": "0:05:00",
    });

    match value {
        Value::Object(map) => map,
        _ => serde_json::Map::new(),
    }
}

/// When the scheduler should start runs of a pipeline on its own
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ScheduleInterval {
    /// Never scheduled automatically, runs are triggered explicitly
    #[default]
    Manual,
    /// Scheduled exactly once
    Once,
    /// Cron expression or preset such as `@daily`
    Cron(String),
}

impl ScheduleInterval {
    pub fn as_str(&self) -> &str {
        match self {
            ScheduleInterval::Manual => "None",
            ScheduleInterval::Once => "@once",
            ScheduleInterval::Cron(expr) => expr,
        }
    }
}

impl From<&str> for ScheduleInterval {
    fn from(value: &str) -> Self {
        match value.trim() {
            "" | "None" => ScheduleInterval::Manual,
            "@once" => ScheduleInterval::Once,
            other => ScheduleInterval::Cron(other.to_string()),
        }
    }
}

impl From<String> for ScheduleInterval {
    fn from(value: String) -> Self {
        ScheduleInterval::from(value.as_str())
    }
}

impl From<ScheduleInterval> for String {
    fn from(value: ScheduleInterval) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for ScheduleInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

//! Task run DTOs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::env::DbEnv;
use crate::domain::task::TaskArgs;

/// Request to create a new task run in status `created`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateTaskRun {
    pub pipeline_id: Option<i64>,
    pub task_id: Option<String>,
    pub module_name: String,
    pub class_name: String,
    pub username: Option<String>,
    pub args: TaskArgs,
    pub saved_query_id: Option<i64>,
    pub db_env: DbEnv,
    pub datetime_started: Option<DateTime<Utc>>,
    pub created_by_add_task: bool,
}

/// Criteria for locating existing task runs
///
/// Unset fields match anything. Results are ordered by id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskRunFilter {
    pub pipeline_id: Option<i64>,
    pub task_id: Option<String>,
    pub status: Option<crate::domain::task_run::TaskRunStatus>,
    pub created_by_add_task: Option<bool>,
}

//! Task run domain types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

use super::env::DbEnv;
use super::task::TaskArgs;

/// One execution attempt of one task
///
/// Created by the pipeline manager, advanced by the task execution environment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRun {
    pub id: i64,
    pub pipeline_id: Option<i64>,
    pub task_id: Option<String>,
    pub module_name: String,
    pub class_name: String,
    pub pipeline_run_id: Option<String>,
    pub upstream_task_run_id: Option<i64>,
    pub username: Option<String>,
    pub args: TaskArgs,
    pub output: Option<Value>,
    pub status: TaskRunStatus,
    pub saved_query_id: Option<i64>,
    pub db_env: DbEnv,
    pub execution_date: Option<String>,
    pub datetime_started: Option<DateTime<Utc>>,
    pub datetime_finished: Option<DateTime<Utc>>,
    pub created_by_add_task: bool,
}

impl TaskRun {
    /// Cache key holding the task's output payload
    pub fn output_cache_key(&self) -> String {
        format!("TaskOutput::{}", self.id)
    }

    /// Cache key holding the task's input data payload
    pub fn data_cache_key(&self) -> String {
        format!("TaskData::{}", self.id)
    }

    /// Moves the run to `status` if that is a forward transition.
    ///
    /// Returns whether the status changed.
    pub fn advance(&mut self, status: TaskRunStatus) -> bool {
        if !self.status.can_advance_to(status) {
            return false;
        }
        self.status = status;
        true
    }
}

/// Task run state machine
///
/// `created -> scheduled -> started -> success | error`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskRunStatus {
    Created,
    Scheduled,
    Started,
    Success,
    Error,
}

impl TaskRunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskRunStatus::Created => "created",
            TaskRunStatus::Scheduled => "scheduled",
            TaskRunStatus::Started => "started",
            TaskRunStatus::Success => "success",
            TaskRunStatus::Error => "error",
        }
    }

    fn rank(&self) -> u8 {
        match self {
            TaskRunStatus::Created => 0,
            TaskRunStatus::Scheduled => 1,
            TaskRunStatus::Started => 2,
            TaskRunStatus::Success | TaskRunStatus::Error => 3,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskRunStatus::Success | TaskRunStatus::Error)
    }

    /// Transitions only move forward; skipping states is allowed.
    pub fn can_advance_to(&self, next: TaskRunStatus) -> bool {
        next.rank() > self.rank()
    }
}

impl fmt::Display for TaskRunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskRunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(TaskRunStatus::Created),
            "scheduled" => Ok(TaskRunStatus::Scheduled),
            "started" => Ok(TaskRunStatus::Started),
            "success" => Ok(TaskRunStatus::Success),
            "error" => Ok(TaskRunStatus::Error),
            other => Err(format!("unknown task run status '{}'", other)),
        }
    }
}

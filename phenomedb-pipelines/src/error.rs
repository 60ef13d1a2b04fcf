//! Pipeline error taxonomy
//!
//! Every variant is fatal to the operation that raised it. The only retried
//! condition is scheduler registration, which surfaces here as
//! `SchedulerRegistrationTimeout` once the retry schedule is exhausted.

use std::path::PathBuf;

use phenomedb_client::ClientError;
use thiserror::Error;

use crate::cache::CacheError;
use crate::repository::StoreError;

pub type Result<T> = std::result::Result<T, PipelineError>;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Task ID already exists in pipeline: {0}")]
    DuplicateTaskId(String),

    #[error("Invalid task ID '{task_id}': {reason}")]
    InvalidTaskId { task_id: String, reason: String },

    #[error("Upstream task ID not found in pipeline: {0}")]
    UnknownUpstreamTask(String),

    #[error("Unrecognised task ID in run config: {0}")]
    UnrecognisedTaskId(String),

    #[error("No hard-coded task run exists for task {0}")]
    MissingHardCodedTaskRun(String),

    #[error("Pipeline {pipeline} not registered by the scheduler after {attempts} checks")]
    SchedulerRegistrationTimeout { pipeline: String, attempts: usize },

    #[error("Scheduler API error: {0}")]
    SchedulerApi(#[from] ClientError),

    #[error("Scheduler rejected run of {pipeline}: {source}")]
    SchedulerTriggerFailed {
        pipeline: String,
        #[source]
        source: ClientError,
    },

    #[error("Illegal state: {0}")]
    IllegalState(String),

    #[error("Pipeline ID not recognised: {0}")]
    PipelineNotFound(i64),

    #[error("No pipeline has been resolved")]
    NoPipeline,

    #[error("Pipeline {0} has no tasks")]
    EmptyDefinition(String),

    #[error("Unknown task type: {module}.{class}")]
    UnknownTaskType { module: String, class: String },

    #[error("Malformed task spec entry '{0}': expected module.ClassName")]
    TaskSpecFormat(String),

    #[error("Task spec declares parameter '{parameter}' not accepted by {task}")]
    TaskSpecMismatch { task: String, parameter: String },

    #[error("Task run not found: {0}")]
    TaskRunNotFound(i64),

    #[error("Task {module}.{class} cannot run in-process")]
    TaskNotExecutable { module: String, class: String },

    #[error("Task {task_id} failed: {message}")]
    TaskFailed { task_id: String, message: String },

    #[error("Pipeline artifact missing: {0}")]
    MissingArtifact(PathBuf),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error("Template error: {0}")]
    Template(#[from] tera::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl PipelineError {
    pub(crate) fn invalid_task_id(task_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidTaskId {
            task_id: task_id.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn unknown_task_type(module: &str, class: &str) -> Self {
        Self::UnknownTaskType {
            module: module.to_string(),
            class: class.to_string(),
        }
    }
}

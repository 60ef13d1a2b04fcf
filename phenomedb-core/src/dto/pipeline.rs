//! Pipeline DTOs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::pipeline::ScheduleInterval;

/// Request to create a new pipeline row
///
/// The definition starts empty; tasks are added afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatePipeline {
    pub name: String,
    pub description: Option<String>,
    pub schedule_interval: ScheduleInterval,
    pub start_date: DateTime<Utc>,
    pub username_created: Option<String>,
    pub hard_code_data: bool,
    pub sequential: bool,
    pub default_args: serde_json::Map<String, Value>,
    pub pipeline_file_path: Option<String>,
    pub tags: Vec<String>,
    pub max_active_runs: i32,
    pub concurrency: i32,
}

//! Scheduler REST payloads
//!
//! Shapes of the Airflow-style `/api/v1` resources consumed by the client.

use serde::{Deserialize, Serialize};

use crate::domain::task::RunConfig;

/// A registered pipeline as reported by the scheduler
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dag {
    pub dag_id: String,
    pub is_paused: bool,
    #[serde(default)]
    pub is_active: Option<bool>,
    #[serde(default)]
    pub fileloc: Option<String>,
}

/// One page of the pipeline listing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DagCollection {
    pub dags: Vec<Dag>,
    #[serde(default)]
    pub total_entries: i64,
}

/// Body of a pause/unpause request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateDag {
    pub is_paused: bool,
}

/// Body of a trigger request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerDagRun {
    pub conf: RunConfig,
}

/// Run created by a trigger request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DagRun {
    pub dag_run_id: String,
    #[serde(default)]
    pub dag_id: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
}

//! Scheduler seam
//!
//! The manager talks to the scheduler only through [`SchedulerApi`], so runs
//! can be exercised against a fake in tests.

use async_trait::async_trait;
use phenomedb_client::{Dag, DagRun, Result as ClientResult, SchedulerClient};
use phenomedb_core::domain::task::RunConfig;

#[async_trait]
pub trait SchedulerApi: Send + Sync {
    /// Looks up a registered pipeline by exact name
    async fn find_dag(&self, dag_id: &str) -> ClientResult<Option<Dag>>;

    async fn set_dag_paused(&self, dag_id: &str, paused: bool) -> ClientResult<Dag>;

    async fn delete_dag(&self, dag_id: &str) -> ClientResult<()>;

    /// Starts a run with the given per-task configuration
    async fn trigger_dag_run(&self, dag_id: &str, conf: RunConfig) -> ClientResult<DagRun>;
}

#[async_trait]
impl SchedulerApi for SchedulerClient {
    async fn find_dag(&self, dag_id: &str) -> ClientResult<Option<Dag>> {
        SchedulerClient::find_dag(self, dag_id).await
    }

    async fn set_dag_paused(&self, dag_id: &str, paused: bool) -> ClientResult<Dag> {
        SchedulerClient::set_dag_paused(self, dag_id, paused).await
    }

    async fn delete_dag(&self, dag_id: &str) -> ClientResult<()> {
        SchedulerClient::delete_dag(self, dag_id).await
    }

    async fn trigger_dag_run(&self, dag_id: &str, conf: RunConfig) -> ClientResult<DagRun> {
        SchedulerClient::trigger_dag_run(self, dag_id, conf).await
    }
}

//! Pipeline run endpoints

use crate::SchedulerClient;
use crate::error::Result;
use phenomedb_core::domain::task::RunConfig;
use phenomedb_core::dto::scheduler::{DagRun, TriggerDagRun};
use reqwest::Method;

impl SchedulerClient {
    /// Trigger a run of a registered pipeline
    ///
    /// # Arguments
    /// * `dag_id` - The pipeline name
    /// * `conf` - Per-task argument bundles, keyed by task id
    ///
    /// # Returns
    /// The created run, carrying the scheduler-assigned `dag_run_id`
    pub async fn trigger_dag_run(&self, dag_id: &str, conf: RunConfig) -> Result<DagRun> {
        let response = self
            .request(Method::POST, &["dags", dag_id, "dagRuns"])?
            .json(&TriggerDagRun { conf })
            .send()
            .await?;

        self.handle_response(response).await
    }
}

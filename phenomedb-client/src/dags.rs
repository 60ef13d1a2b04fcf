//! Pipeline (DAG) endpoints

use crate::SchedulerClient;
use crate::error::Result;
use phenomedb_core::dto::scheduler::{Dag, DagCollection, UpdateDag};
use reqwest::Method;

/// Page size used when walking the listing
const PAGE_SIZE: u32 = 100;

impl SchedulerClient {
    // =============================================================================
    // Pipeline Registration
    // =============================================================================

    /// List one page of registered pipelines
    ///
    /// # Arguments
    /// * `limit` - Maximum number of entries to return
    /// * `offset` - Number of entries to skip
    pub async fn list_dags(&self, limit: u32, offset: u32) -> Result<DagCollection> {
        let response = self
            .request(Method::GET, &["dags"])?
            .query(&[("limit", limit), ("offset", offset)])
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// Find a registered pipeline by exact id, walking every page
    ///
    /// # Returns
    /// `None` when the scheduler has not (yet) registered the pipeline
    pub async fn find_dag(&self, dag_id: &str) -> Result<Option<Dag>> {
        let mut offset = 0;

        loop {
            let page = self.list_dags(PAGE_SIZE, offset).await?;
            let fetched = page.dags.len() as u32;

            if let Some(dag) = page.dags.into_iter().find(|d| d.dag_id == dag_id) {
                return Ok(Some(dag));
            }

            offset += fetched;
            if fetched == 0 || i64::from(offset) >= page.total_entries {
                tracing::debug!("Pipeline {} not listed by scheduler ({} entries)", dag_id, offset);
                return Ok(None);
            }
        }
    }

    /// Pause or unpause a pipeline
    ///
    /// # Arguments
    /// * `dag_id` - The pipeline name
    /// * `paused` - Desired paused state
    ///
    /// # Returns
    /// The pipeline as reported after the update
    pub async fn set_dag_paused(&self, dag_id: &str, paused: bool) -> Result<Dag> {
        let response = self
            .request(Method::PATCH, &["dags", dag_id])?
            .json(&UpdateDag { is_paused: paused })
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// Deregister a pipeline
    ///
    /// The scheduler re-registers it if the artifact is still on disk.
    pub async fn delete_dag(&self, dag_id: &str) -> Result<()> {
        let response = self
            .request(Method::DELETE, &["dags", dag_id])?
            .send()
            .await?;

        self.handle_empty_response(response).await
    }
}

//! PhenomeDB Scheduler Client
//!
//! A small, typed HTTP client for the Airflow-style REST API that executes
//! PhenomeDB pipelines.
//!
//! The pipeline manager uses it to check that a generated pipeline has been
//! registered, to pause and delete pipelines, and to trigger runs.
//!
//! # Example
//!
//! ```no_run
//! use phenomedb_client::SchedulerClient;
//!
//! #[tokio::main]
//! async fn main() -> phenomedb_client::Result<()> {
//!     let client = SchedulerClient::new("http://localhost:8080")
//!         .with_credentials("airflow", "airflow");
//!
//!     if let Some(dag) = client.find_dag("import_manifest").await? {
//!         println!("{} paused={}", dag.dag_id, dag.is_paused);
//!     }
//!     Ok(())
//! }
//! ```

mod dag_runs;
mod dags;
pub mod error;

// Re-export commonly used types
pub use error::{ClientError, Result};
pub use phenomedb_core::dto::scheduler::{Dag, DagCollection, DagRun};

use reqwest::{Client, Method, RequestBuilder, Url};
use serde::de::DeserializeOwned;

/// HTTP client for the scheduler API
#[derive(Debug, Clone)]
pub struct SchedulerClient {
    /// Base URL of the scheduler webserver (e.g., "http://localhost:8080")
    base_url: String,
    /// Basic-auth username and password
    credentials: Option<(String, String)>,
    /// HTTP client instance
    client: Client,
}

impl SchedulerClient {
    /// Create a new scheduler client
    ///
    /// # Arguments
    /// * `base_url` - The base URL of the scheduler webserver
    ///
    /// # Example
    /// ```
    /// use phenomedb_client::SchedulerClient;
    ///
    /// let client = SchedulerClient::new("http://localhost:8080/");
    /// assert_eq!(client.base_url(), "http://localhost:8080");
    /// ```
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(base_url, Client::new())
    }

    /// Create a new scheduler client with a custom HTTP client
    ///
    /// This allows you to configure timeouts, proxies, TLS settings, etc.
    pub fn with_client(base_url: impl Into<String>, client: Client) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            credentials: None,
            client,
        }
    }

    /// Authenticate every request with HTTP basic auth
    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.credentials = Some((username.into(), password.into()));
        self
    }

    /// Get the base URL of the scheduler
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Start a request against `/api/v1/<segments>`
    ///
    /// Segments are percent-encoded, so pipeline names are safe to pass as-is.
    fn request(&self, method: Method, segments: &[&str]) -> Result<RequestBuilder> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|e| ClientError::InvalidRequest(format!("invalid base URL: {}", e)))?;

        url.path_segments_mut()
            .map_err(|_| ClientError::InvalidRequest(format!("{} cannot be a base URL", self.base_url)))?
            .pop_if_empty()
            .extend(["api", "v1"])
            .extend(segments);

        let builder = self.client.request(method, url);

        Ok(match &self.credentials {
            Some((user, password)) => builder.basic_auth(user, Some(password)),
            None => builder,
        })
    }

    // =============================================================================
    // Response Handlers
    // =============================================================================

    /// Handle an API response and deserialize JSON
    async fn handle_response<T: DeserializeOwned>(&self, response: reqwest::Response) -> Result<T> {
        let status = response.status();

        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ClientError::api_error(status.as_u16(), error_text));
        }

        response
            .json()
            .await
            .map_err(|e| ClientError::ParseError(format!("Failed to parse JSON response: {}", e)))
    }

    /// Handle an API response that returns no content (e.g., DELETE operations)
    async fn handle_empty_response(&self, response: reqwest::Response) -> Result<()> {
        let status = response.status();

        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ClientError::api_error(status.as_u16(), error_text));
        }

        Ok(())
    }
}

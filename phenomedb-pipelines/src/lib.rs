//! PhenomeDB Pipelines
//!
//! Pipeline definition and execution orchestration for PhenomeDB.
//!
//! This crate contains:
//! - Repository: persistence of pipelines and task runs (Postgres and in-memory)
//! - Registry: task types, their accepted parameters and the task catalogue
//! - Managers: pipeline definition bookkeeping and the Airflow-backed manager
//! - Factory: configuration-driven front door over the managers

pub mod artifact;
pub mod cache;
pub mod config;
pub mod db;
pub mod error;
pub mod executor;
pub mod factory;
pub mod manager;
pub mod registry;
pub mod repository;
pub mod retry;
pub mod scheduler;
pub mod setup;

pub use config::Config;
pub use error::{PipelineError, Result};
pub use factory::{Backends, PipelineFactory};
pub use manager::{AirflowPipelineManager, BasePipelineManager, PipelineManager, PipelineOptions, PipelineRun};

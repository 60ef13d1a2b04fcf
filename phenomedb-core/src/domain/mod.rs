//! Core domain types
//!
//! These types are the durable contract between the pipeline manager, the UI
//! layer and the task execution environment.

pub mod env;
pub mod pipeline;
pub mod task;
pub mod task_run;

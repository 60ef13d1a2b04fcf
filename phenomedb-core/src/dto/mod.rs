//! Data Transfer Objects
//!
//! Insert requests for the persistence layer and the payloads exchanged with
//! the external scheduler's REST API.

pub mod pipeline;
pub mod scheduler;
pub mod task_run;

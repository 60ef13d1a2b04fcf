//! PhenomeDB Core
//!
//! Core types shared by the PhenomeDB pipeline services.
//!
//! This crate contains:
//! - Domain types: Pipeline, TaskRun and the task-run state machine
//! - DTOs: insert requests and the scheduler REST payloads

pub mod domain;
pub mod dto;

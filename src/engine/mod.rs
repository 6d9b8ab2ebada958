// src/engine/mod.rs

//! Orchestration layer.
//!
//! - [`orchestrator`] owns plans and drives them level by level.
//! - [`policy`] decides when a failure aborts a plan.
//! - [`report`] holds the serializable plan and node status views.

pub mod orchestrator;
pub mod policy;
pub mod report;

pub use orchestrator::{NodeRegistration, Orchestrator};
pub use policy::AbortPolicy;
pub use report::{FailureDetail, NodeHealthReport, PlanStatusReport, TaskStatusReport};

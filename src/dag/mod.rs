// src/dag/mod.rs

//! DAG planning.
//!
//! - [`graph`] holds the adjacency view of a submitted task graph.
//! - [`planner`] groups tasks into parallel execution levels and detects cycles.
//! - [`plan`] owns per-execution state: levels, task states, plan status.

pub mod graph;
pub mod plan;
pub mod planner;

pub use graph::DagGraph;
pub use plan::{ExecutionPlan, SharedPlan, TaskExecutionState, lock_plan};
pub use planner::{build_plan, plan_levels};

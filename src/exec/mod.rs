// src/exec/mod.rs

//! Task execution layer.
//!
//! - [`dispatcher`] runs a level's tasks concurrently with bounded retries.
//! - [`handler`] defines the task-kind handler boundary, the registry and
//!   the default [`RemoteHandler`] that forwards work over the channel.
//! - [`inputs`] merges predecessor results into a task's inputs.

pub mod dispatcher;
pub mod handler;
pub mod inputs;

pub use dispatcher::{DispatchOptions, Dispatcher, LevelOutcome};
pub use handler::{HandlerRegistry, RemoteHandler, TaskHandler, TaskInvocation};
pub use inputs::merge_inputs;

// src/graph/mod.rs

//! Task graph submission model.
//!
//! A [`TaskGraph`] is the immutable input produced by the external editor:
//! tasks with a kind, an opaque parameter payload and the ids they depend on.
//! Edges are implied by `dependsOn`.

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::load_graph;
pub use model::{TaskGraph, TaskSpec};
pub use validate::validate_graph;

// src/graph/loader.rs

use std::fs;
use std::path::Path;

use crate::errors::Result;
use crate::graph::model::TaskGraph;

/// Read a task graph from a JSON file.
///
/// Only deserialization happens here; structural checks (unknown
/// dependencies, cycles) run at submission time.
pub fn load_graph(path: impl AsRef<Path>) -> Result<TaskGraph> {
    let contents = fs::read_to_string(path.as_ref())?;
    let graph: TaskGraph = serde_json::from_str(&contents)?;
    Ok(graph)
}

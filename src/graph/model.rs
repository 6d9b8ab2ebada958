// src/graph/model.rs

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{TaskId, TaskKind};

/// Submitted task graph.
///
/// ```json
/// { "tasks": [
///     { "id": "A", "kind": "image", "params": { "prompt": "..." } },
///     { "id": "B", "kind": "video", "dependsOn": ["A"] }
/// ] }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskGraph {
    #[serde(default)]
    pub tasks: Vec<TaskSpec>,
}

/// One task descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSpec {
    pub id: TaskId,
    pub kind: TaskKind,
    /// Opaque parameters handed to the task-kind handler.
    #[serde(default)]
    pub params: Value,
    #[serde(default, alias = "depends_on")]
    pub depends_on: Vec<TaskId>,
}

impl TaskGraph {
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }
}

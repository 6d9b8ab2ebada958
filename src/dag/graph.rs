// src/dag/graph.rs

use std::collections::HashMap;

use crate::graph::TaskGraph;
use crate::types::TaskId;

/// Adjacency entry: immediate predecessors and successors of one task.
#[derive(Debug, Clone)]
struct DagNode {
    /// Position of the task in the submitted graph.
    index: usize,
    deps: Vec<TaskId>,
    dependents: Vec<TaskId>,
}

/// In-memory adjacency view of a submitted graph, keyed by task id.
///
/// Keeps the declaration order of the submission so that everything derived
/// from it (level contents, input merge order) is deterministic.
#[derive(Debug, Clone)]
pub struct DagGraph {
    order: Vec<TaskId>,
    nodes: HashMap<TaskId, DagNode>,
}

impl DagGraph {
    /// Build the adjacency view. Assumes ids are unique and every
    /// dependency exists (see [`crate::graph::validate_graph`]).
    pub fn from_task_graph(graph: &TaskGraph) -> Self {
        let mut nodes: HashMap<TaskId, DagNode> = HashMap::with_capacity(graph.len());
        let mut order = Vec::with_capacity(graph.len());

        for (index, task) in graph.tasks.iter().enumerate() {
            order.push(task.id.clone());
            nodes.insert(
                task.id.clone(),
                DagNode {
                    index,
                    deps: task.depends_on.clone(),
                    dependents: Vec::new(),
                },
            );
        }

        // Walking in declaration order keeps each dependents list ordered too.
        for task in graph.tasks.iter() {
            for dep in task.depends_on.iter() {
                if let Some(dep_node) = nodes.get_mut(dep) {
                    if !dep_node.dependents.contains(&task.id) {
                        dep_node.dependents.push(task.id.clone());
                    }
                }
            }
        }

        Self { order, nodes }
    }

    /// Task ids in declaration order.
    pub fn tasks(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(|s| s.as_str())
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Immediate predecessors of a task, as declared in `dependsOn`.
    pub fn dependencies_of(&self, id: &str) -> &[TaskId] {
        self.nodes
            .get(id)
            .map(|n| n.deps.as_slice())
            .unwrap_or(&[])
    }

    /// Immediate successors of a task.
    pub fn dependents_of(&self, id: &str) -> &[TaskId] {
        self.nodes
            .get(id)
            .map(|n| n.dependents.as_slice())
            .unwrap_or(&[])
    }

    /// Declaration index of a task, `usize::MAX` for unknown ids.
    pub fn declaration_index(&self, id: &str) -> usize {
        self.nodes.get(id).map(|n| n.index).unwrap_or(usize::MAX)
    }
}

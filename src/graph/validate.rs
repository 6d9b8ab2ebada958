// src/graph/validate.rs

use std::collections::HashSet;

use crate::errors::PlanError;
use crate::graph::model::TaskGraph;

/// Reject graphs with empty or duplicate ids, or dependencies on tasks that
/// do not exist. Cycles are detected later by the planner.
pub fn validate_graph(graph: &TaskGraph) -> Result<(), PlanError> {
    let mut seen: HashSet<&str> = HashSet::with_capacity(graph.tasks.len());

    for task in graph.tasks.iter() {
        if task.id.trim().is_empty() {
            return Err(PlanError::EmptyTaskId);
        }
        if !seen.insert(task.id.as_str()) {
            return Err(PlanError::DuplicateTask(task.id.clone()));
        }
    }

    for task in graph.tasks.iter() {
        for dep in task.depends_on.iter() {
            if !seen.contains(dep.as_str()) {
                return Err(PlanError::UnknownDependency {
                    task: task.id.clone(),
                    dependency: dep.clone(),
                });
            }
        }
    }

    Ok(())
}

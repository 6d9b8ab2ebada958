// src/dag/planner.rs

//! Level planner.
//!
//! Levels are built by iterative frontier expansion: level 0 holds every task
//! without predecessors, and each following level holds the tasks whose last
//! outstanding predecessor was placed in the previous one. Within a level,
//! ids are ordered by declaration so plans are reproducible.

use std::collections::{HashMap, HashSet};

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;
use tracing::debug;

use crate::dag::graph::DagGraph;
use crate::dag::plan::ExecutionPlan;
use crate::errors::PlanError;
use crate::graph::{TaskGraph, validate_graph};
use crate::types::{PlanId, TaskId};

/// Validate a submitted graph and build its execution plan skeleton.
pub fn build_plan(plan_id: PlanId, graph: &TaskGraph) -> Result<ExecutionPlan, PlanError> {
    validate_graph(graph)?;
    let dag = DagGraph::from_task_graph(graph);
    let levels = plan_levels(&dag)?;

    debug!(
        plan_id = %plan_id,
        tasks = dag.len(),
        levels = levels.len(),
        "built execution plan"
    );

    Ok(ExecutionPlan::new(plan_id, graph, levels))
}

/// Group tasks into parallel levels, or fail with [`PlanError::CyclicGraph`].
pub fn plan_levels(dag: &DagGraph) -> Result<Vec<Vec<TaskId>>, PlanError> {
    // Outstanding predecessor count per task; duplicates in `dependsOn`
    // count once, matching the deduplicated dependents lists.
    let mut outstanding: HashMap<&str, usize> = dag
        .tasks()
        .map(|id| {
            let unique: HashSet<&str> = dag
                .dependencies_of(id)
                .iter()
                .map(|d| d.as_str())
                .collect();
            (id, unique.len())
        })
        .collect();

    let mut frontier: Vec<&str> = dag
        .tasks()
        .filter(|id| outstanding.get(id).copied() == Some(0))
        .collect();

    let mut placed: HashSet<&str> = HashSet::with_capacity(dag.len());
    let mut levels: Vec<Vec<TaskId>> = Vec::new();

    while !frontier.is_empty() {
        let mut next: Vec<&str> = Vec::new();

        for &id in frontier.iter() {
            placed.insert(id);
            for child in dag.dependents_of(id) {
                if let Some(count) = outstanding.get_mut(child.as_str()) {
                    *count = count.saturating_sub(1);
                    if *count == 0 {
                        next.push(child.as_str());
                    }
                }
            }
        }

        levels.push(frontier.iter().map(|s| s.to_string()).collect());

        next.sort_by_key(|id| dag.declaration_index(id));
        frontier = next;
    }

    if placed.len() < dag.len() {
        let unplaced: Vec<&str> = dag.tasks().filter(|id| !placed.contains(id)).collect();
        return Err(PlanError::CyclicGraph {
            involving: cycle_witness(dag, &unplaced),
        });
    }

    Ok(levels)
}

/// Name one task that sits on a cycle among the tasks that could not be placed.
fn cycle_witness(dag: &DagGraph, unplaced: &[&str]) -> TaskId {
    let members: HashSet<&str> = unplaced.iter().copied().collect();
    let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();

    for &id in unplaced {
        graph.add_node(id);
    }
    for &id in unplaced {
        for dep in dag.dependencies_of(id) {
            if members.contains(dep.as_str()) {
                graph.add_edge(dep.as_str(), id, ());
            }
        }
    }

    match toposort(&graph, None) {
        Err(cycle) => cycle.node_id().to_string(),
        // Unreachable for a stuck frontier; fall back to the first unplaced task.
        Ok(_) => unplaced.first().map(|s| s.to_string()).unwrap_or_default(),
    }
}

// tests/planner_properties.rs

use std::collections::{HashMap, HashSet};

use proptest::prelude::*;

use dagrelay::dag::build_plan;
use dagrelay::errors::PlanError;
use dagrelay::graph::TaskGraph;
use dagrelay_test_utils::builders::{GraphBuilder, TaskSpecBuilder};

// Acyclic by construction: task N may only depend on tasks 0..N-1.
fn dag_strategy(max_tasks: usize) -> impl Strategy<Value = TaskGraph> {
    (1..=max_tasks).prop_flat_map(|num_tasks| {
        proptest::collection::vec(
            proptest::collection::vec(any::<usize>(), 0..num_tasks),
            num_tasks,
        )
        .prop_map(move |raw_deps| {
            let mut builder = GraphBuilder::new();
            for (i, potential) in raw_deps.into_iter().enumerate() {
                let mut task = TaskSpecBuilder::new(&format!("task_{i}"), "image");
                if i > 0 {
                    for dep in potential {
                        task = task.after(&format!("task_{}", dep % i));
                    }
                }
                builder = builder.with_task(task);
            }
            builder.build()
        })
    })
}

proptest! {
    #[test]
    fn levels_partition_tasks_and_respect_dependencies(graph in dag_strategy(24)) {
        let plan = build_plan("prop".to_string(), &graph).unwrap();

        let mut level_of: HashMap<&str, usize> = HashMap::new();
        for (index, level) in plan.levels().iter().enumerate() {
            prop_assert!(!level.is_empty());
            for id in level {
                prop_assert!(level_of.insert(id.as_str(), index).is_none(), "{id} placed twice");
            }
        }
        prop_assert_eq!(level_of.len(), graph.tasks.len());

        for task in &graph.tasks {
            let own = level_of[task.id.as_str()];
            for dep in &task.depends_on {
                prop_assert!(level_of[dep.as_str()] < own, "{} not before {}", dep, task.id);
            }
        }
    }

    #[test]
    fn every_level_after_the_first_is_needed(graph in dag_strategy(24)) {
        // Frontier expansion places a task as early as possible: each task in
        // level k > 0 has a predecessor in level k - 1.
        let plan = build_plan("prop".to_string(), &graph).unwrap();
        let mut level_of: HashMap<&str, usize> = HashMap::new();
        for (index, level) in plan.levels().iter().enumerate() {
            for id in level {
                level_of.insert(id.as_str(), index);
            }
        }
        for task in &graph.tasks {
            let own = level_of[task.id.as_str()];
            if own > 0 {
                let deps: HashSet<usize> =
                    task.depends_on.iter().map(|d| level_of[d.as_str()]).collect();
                prop_assert!(deps.contains(&(own - 1)));
            }
        }
    }

    #[test]
    fn closing_a_back_edge_is_always_rejected(graph in dag_strategy(12)) {
        // Make the first task depend on the last one; if the last task
        // reaches the first, this closes a cycle.
        let mut graph = graph;
        let n = graph.tasks.len();
        let last = graph.tasks[n - 1].id.clone();
        graph.tasks[0].depends_on.push(last.clone());

        let reaches_first = {
            let mut stack = vec![last.as_str()];
            let mut seen = HashSet::new();
            let mut found = false;
            while let Some(id) = stack.pop() {
                if id == "task_0" { found = true; break; }
                if !seen.insert(id) { continue; }
                if let Some(t) = graph.tasks.iter().find(|t| t.id == id) {
                    for d in &t.depends_on {
                        stack.push(d.as_str());
                    }
                }
            }
            found
        };

        let result = build_plan("prop".to_string(), &graph);
        if reaches_first {
            let is_cycle = matches!(result, Err(PlanError::CyclicGraph { .. }));
            prop_assert!(is_cycle);
        } else {
            prop_assert!(result.is_ok());
        }
    }
}

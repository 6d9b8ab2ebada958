// src/dag/plan.rs

//! Execution plan and per-task execution state.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::{PlanError, TaskError};
use crate::graph::TaskGraph;
use crate::types::{NodeId, PlanId, PlanStatus, TaskId, TaskKind, TaskStatus};

/// A plan shared between the orchestrator, the dispatcher and status readers.
///
/// The lock is only ever held for a single bookkeeping step, never across
/// an `.await`.
pub type SharedPlan = Arc<Mutex<ExecutionPlan>>;

/// Lock a shared plan. Every mutation is a single consistent step, so a
/// poisoned lock still guards valid state.
pub fn lock_plan(plan: &SharedPlan) -> MutexGuard<'_, ExecutionPlan> {
    plan.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Execution state of one task, owned by its plan.
#[derive(Debug, Clone)]
pub struct TaskExecutionState {
    pub id: TaskId,
    pub kind: TaskKind,
    pub params: Value,
    pub dependencies: Vec<TaskId>,
    status: TaskStatus,
    retry_count: u32,
    started_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
    result: Option<Value>,
    failure: Option<TaskError>,
    assigned_node: Option<NodeId>,
}

impl TaskExecutionState {
    fn new(id: TaskId, kind: TaskKind, params: Value, dependencies: Vec<TaskId>) -> Self {
        Self {
            id,
            kind,
            params,
            dependencies,
            status: TaskStatus::Pending,
            retry_count: 0,
            started_at: None,
            ended_at: None,
            result: None,
            failure: None,
            assigned_node: None,
        }
    }

    pub fn status(&self) -> TaskStatus {
        self.status
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn ended_at(&self) -> Option<DateTime<Utc>> {
        self.ended_at
    }

    /// Result payload; only present once the task is `completed`.
    pub fn result(&self) -> Option<&Value> {
        self.result.as_ref()
    }

    /// Most recent failure (the terminal one once `failed-terminal`).
    pub fn failure(&self) -> Option<&TaskError> {
        self.failure.as_ref()
    }

    pub fn assigned_node(&self) -> Option<&str> {
        self.assigned_node.as_deref()
    }
}

/// One submitted graph turned into ordered levels plus per-task state.
#[derive(Debug)]
pub struct ExecutionPlan {
    id: PlanId,
    status: PlanStatus,
    /// Task ids in declaration order.
    order: Vec<TaskId>,
    tasks: HashMap<TaskId, TaskExecutionState>,
    levels: Vec<Vec<TaskId>>,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
    abort_reason: Option<String>,
}

impl ExecutionPlan {
    /// Build the plan skeleton. An empty graph yields a plan that is
    /// already `completed`.
    pub(crate) fn new(id: PlanId, graph: &TaskGraph, levels: Vec<Vec<TaskId>>) -> Self {
        let now = Utc::now();
        let mut order = Vec::with_capacity(graph.len());
        let mut tasks = HashMap::with_capacity(graph.len());

        for spec in graph.tasks.iter() {
            order.push(spec.id.clone());
            tasks.insert(
                spec.id.clone(),
                TaskExecutionState::new(
                    spec.id.clone(),
                    spec.kind.clone(),
                    spec.params.clone(),
                    spec.depends_on.clone(),
                ),
            );
        }

        let (status, finished_at) = if tasks.is_empty() {
            (PlanStatus::Completed, Some(now))
        } else {
            (PlanStatus::Pending, None)
        };

        Self {
            id,
            status,
            order,
            tasks,
            levels,
            created_at: now,
            started_at: None,
            finished_at,
            abort_reason: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn status(&self) -> PlanStatus {
        self.status
    }

    pub fn levels(&self) -> &[Vec<TaskId>] {
        &self.levels
    }

    pub fn task(&self, id: &str) -> Option<&TaskExecutionState> {
        self.tasks.get(id)
    }

    /// Task states in declaration order.
    pub fn tasks(&self) -> impl Iterator<Item = &TaskExecutionState> {
        self.order.iter().filter_map(|id| self.tasks.get(id))
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.finished_at
    }

    pub fn abort_reason(&self) -> Option<&str> {
        self.abort_reason.as_deref()
    }

    /// Completed predecessor results of `id`, in declaration order.
    ///
    /// Fails with `MissingInput` naming the first predecessor that has no
    /// published result.
    pub fn predecessor_results(&self, id: &str) -> Result<Vec<(&str, &Value)>, TaskError> {
        let Some(task) = self.tasks.get(id) else {
            return Ok(Vec::new());
        };

        let mut preds: Vec<&str> = Vec::with_capacity(task.dependencies.len());
        for dep in task.dependencies.iter() {
            if !preds.contains(&dep.as_str()) {
                preds.push(dep.as_str());
            }
        }
        preds.sort_by_key(|dep| self.order.iter().position(|o| o.as_str() == *dep));

        let mut results = Vec::with_capacity(preds.len());
        for dep in preds {
            let published = self
                .tasks
                .get(dep)
                .filter(|d| d.status == TaskStatus::Completed)
                .and_then(|d| d.result.as_ref());
            match published {
                Some(value) => results.push((dep, value)),
                None => {
                    return Err(TaskError::MissingInput {
                        predecessor: dep.to_string(),
                    });
                }
            }
        }

        Ok(results)
    }

    /// `pending -> running`.
    pub(crate) fn start(&mut self) -> Result<(), PlanError> {
        if self.status != PlanStatus::Pending {
            return Err(PlanError::AlreadyStarted(self.id.clone()));
        }
        self.status = PlanStatus::Running;
        self.started_at = Some(Utc::now());
        Ok(())
    }

    /// Record that the abort policy (or a cancellation) stopped the plan.
    pub(crate) fn abort(&mut self, reason: impl Into<String>) {
        if self.abort_reason.is_none() {
            self.abort_reason = Some(reason.into());
        }
    }

    /// Settle the final status: `completed` iff every task completed and no
    /// abort happened, `failed` otherwise. A plan that continued past
    /// non-critical failures is intentionally `failed`, not `completed`.
    pub(crate) fn finish(&mut self) -> PlanStatus {
        if self.status.is_terminal() {
            return self.status;
        }

        let all_completed = self
            .tasks
            .values()
            .all(|t| t.status == TaskStatus::Completed);

        self.status = if all_completed && self.abort_reason.is_none() {
            PlanStatus::Completed
        } else {
            PlanStatus::Failed
        };
        self.finished_at = Some(Utc::now());
        self.status
    }

    pub(crate) fn mark_running(&mut self, id: &str, node: &str) {
        if let Some(task) = self.transition(id, TaskStatus::Running) {
            task.assigned_node = Some(node.to_string());
            if task.started_at.is_none() {
                task.started_at = Some(Utc::now());
            }
            debug!(task = %id, node = %node, "task running");
        }
    }

    /// Publish a result. After this returns, successors may read it.
    pub(crate) fn mark_completed(&mut self, id: &str, result: Value) {
        if let Some(task) = self.transition(id, TaskStatus::Completed) {
            task.result = Some(result);
            task.failure = None;
            task.ended_at = Some(Utc::now());
        }
    }

    /// `-> failed-retryable -> pending`, bumping the retry count.
    pub(crate) fn mark_retry(&mut self, id: &str, error: TaskError) {
        if let Some(task) = self.transition(id, TaskStatus::FailedRetryable) {
            task.retry_count += 1;
            task.failure = Some(error);
        }
        self.transition(id, TaskStatus::Pending);
    }

    pub(crate) fn mark_failed(&mut self, id: &str, error: TaskError) {
        if let Some(task) = self.transition(id, TaskStatus::FailedTerminal) {
            task.failure = Some(error);
            task.ended_at = Some(Utc::now());
        }
    }

    fn transition(&mut self, id: &str, next: TaskStatus) -> Option<&mut TaskExecutionState> {
        let Some(task) = self.tasks.get_mut(id) else {
            warn!(task = %id, "transition for unknown task; ignoring");
            return None;
        };

        if !task.status.can_transition_to(next) {
            warn!(
                task = %id,
                from = %task.status,
                to = %next,
                "invalid task status transition; ignoring"
            );
            return None;
        }

        task.status = next;
        Some(task)
    }
}

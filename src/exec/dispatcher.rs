// src/exec/dispatcher.rs

//! Execution dispatcher.
//!
//! Runs every task of one level concurrently. Each task goes through an
//! explicit bounded retry loop:
//!
//! 1. resolve inputs from completed predecessors (once),
//! 2. reserve a node (bounded wait),
//! 3. call the kind's handler against the reserved node,
//! 4. publish the result, or classify the error and retry / fail.
//!
//! The reservation is a guard scoped to one attempt, so it is released on
//! every exit path. Plan bookkeeping happens in single locked steps and the
//! plan lock is never held across an `.await`.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::alloc::{Allocator, ResourceHint};
use crate::channel::RemoteChannel;
use crate::config::CoordinatorSection;
use crate::dag::{SharedPlan, lock_plan};
use crate::errors::TaskError;
use crate::exec::handler::{HandlerRegistry, TaskInvocation};
use crate::exec::inputs::merge_inputs;
use crate::types::{TaskId, TaskKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchOptions {
    /// Retries allowed after the first attempt for retryable failures.
    pub max_retries: u32,
    /// How long one attempt may wait for a reservation.
    pub reserve_wait: Duration,
}

impl Default for DispatchOptions {
    fn default() -> Self {
        Self::from(&CoordinatorSection::default())
    }
}

impl From<&CoordinatorSection> for DispatchOptions {
    fn from(section: &CoordinatorSection) -> Self {
        Self {
            max_retries: section.max_retries,
            reserve_wait: section.reserve_wait(),
        }
    }
}

/// Result of one level: which tasks completed and which failed terminally,
/// each in level order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LevelOutcome {
    pub completed: Vec<TaskId>,
    pub failed: Vec<TaskId>,
}

impl LevelOutcome {
    pub fn all_succeeded(&self) -> bool {
        self.failed.is_empty()
    }
}

pub struct Dispatcher {
    allocator: Arc<Allocator>,
    channel: Arc<dyn RemoteChannel>,
    handlers: HandlerRegistry,
    options: DispatchOptions,
}

impl Dispatcher {
    pub fn new(
        allocator: Arc<Allocator>,
        channel: Arc<dyn RemoteChannel>,
        handlers: HandlerRegistry,
        options: DispatchOptions,
    ) -> Self {
        Self {
            allocator,
            channel,
            handlers,
            options,
        }
    }

    /// Drive every task in `level` to a terminal state, concurrently.
    ///
    /// Cancelling `cancel` stops further retries; in-flight handler calls
    /// finish, their results are discarded and the task fails as cancelled.
    pub async fn run_level(
        self: &Arc<Self>,
        plan: &SharedPlan,
        level: &[TaskId],
        cancel: &CancellationToken,
    ) -> LevelOutcome {
        let handles: Vec<_> = level
            .iter()
            .map(|task_id| {
                let dispatcher = Arc::clone(self);
                let plan = Arc::clone(plan);
                let task_id = task_id.clone();
                let cancel = cancel.clone();
                tokio::spawn(async move { dispatcher.run_task(plan, task_id, cancel).await })
            })
            .collect();

        let joined = join_all(handles).await;

        let mut outcome = LevelOutcome::default();
        for (task_id, joined) in level.iter().zip(joined) {
            let completed = match joined {
                Ok(completed) => completed,
                Err(join_err) => {
                    error!(task = %task_id, error = %join_err, "task execution aborted");
                    lock_plan(plan).mark_failed(
                        task_id,
                        TaskError::handler(format!("task execution aborted: {join_err}"), false),
                    );
                    false
                }
            };
            if completed {
                outcome.completed.push(task_id.clone());
            } else {
                outcome.failed.push(task_id.clone());
            }
        }

        outcome
    }

    /// Run one task to a terminal state. Returns whether it completed.
    async fn run_task(
        self: Arc<Self>,
        plan: SharedPlan,
        task_id: TaskId,
        cancel: CancellationToken,
    ) -> bool {
        let plan_id = lock_plan(&plan).id().to_string();

        let Some((kind, inputs)) = resolve_inputs(&plan, &task_id) else {
            warn!(plan_id = %plan_id, task = %task_id, "task not part of plan; skipping");
            return false;
        };
        let inputs = match inputs {
            Ok(inputs) => inputs,
            Err(err) => {
                warn!(plan_id = %plan_id, task = %task_id, error = %err, "input resolution failed");
                lock_plan(&plan).mark_failed(&task_id, err);
                return false;
            }
        };

        let Some(handler) = self.handlers.get(&kind) else {
            let err = TaskError::handler(format!("no handler registered for kind '{kind}'"), false);
            warn!(plan_id = %plan_id, task = %task_id, error = %err, "cannot dispatch");
            lock_plan(&plan).mark_failed(&task_id, err);
            return false;
        };

        let mut attempt: u32 = 0;
        loop {
            if cancel.is_cancelled() {
                lock_plan(&plan).mark_failed(&task_id, TaskError::Cancelled);
                info!(plan_id = %plan_id, task = %task_id, "task cancelled before dispatch");
                return false;
            }

            let hint = ResourceHint::for_task(task_id.clone(), attempt);
            let reserved = tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(TaskError::Cancelled),
                r = self.allocator.reserve_within(&kind, &hint, self.options.reserve_wait) => r,
            };

            // Lives until the end of this attempt, after the status change.
            let (outcome, _guard) = match reserved {
                Ok(guard) => {
                    let node_id = guard.node_id().to_string();
                    lock_plan(&plan).mark_running(&task_id, &node_id);
                    debug!(
                        plan_id = %plan_id,
                        task = %task_id,
                        node = %node_id,
                        attempt,
                        "invoking handler"
                    );

                    let invocation = TaskInvocation {
                        task_id: &task_id,
                        kind: &kind,
                        inputs: &inputs,
                        node_id: &node_id,
                        attempt,
                    };
                    let result = handler.execute(invocation, self.channel.as_ref()).await;

                    let result = if cancel.is_cancelled() {
                        if result.is_ok() {
                            debug!(task = %task_id, "discarding result of cancelled task");
                        }
                        Err(TaskError::Cancelled)
                    } else {
                        result
                    };
                    (result, Some(guard))
                }
                Err(err) => (Err(err), None),
            };

            match outcome {
                Ok(value) => {
                    lock_plan(&plan).mark_completed(&task_id, value);
                    info!(plan_id = %plan_id, task = %task_id, attempt, "task completed");
                    return true;
                }
                Err(TaskError::Cancelled) => {
                    lock_plan(&plan).mark_failed(&task_id, TaskError::Cancelled);
                    info!(plan_id = %plan_id, task = %task_id, "task cancelled");
                    return false;
                }
                Err(err) if err.is_retryable() && attempt < self.options.max_retries => {
                    warn!(
                        plan_id = %plan_id,
                        task = %task_id,
                        attempt,
                        error = %err,
                        "retryable failure; retrying"
                    );
                    lock_plan(&plan).mark_retry(&task_id, err);
                    attempt += 1;
                }
                Err(err) => {
                    error!(
                        plan_id = %plan_id,
                        task = %task_id,
                        attempt,
                        class = err.class(),
                        error = %err,
                        "task failed terminally"
                    );
                    lock_plan(&plan).mark_failed(&task_id, err);
                    return false;
                }
            }
        }
    }
}

/// Look up the task's kind and build its merged inputs in one locked step.
fn resolve_inputs(
    plan: &SharedPlan,
    task_id: &str,
) -> Option<(TaskKind, Result<Value, TaskError>)> {
    let plan = lock_plan(plan);
    let task = plan.task(task_id)?;
    let inputs = plan
        .predecessor_results(task_id)
        .map(|preds| merge_inputs(&task.params, preds));
    Some((task.kind.clone(), inputs))
}

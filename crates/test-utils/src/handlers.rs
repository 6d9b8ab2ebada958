//! Scripted task handler for dispatcher and orchestrator tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures::future::BoxFuture;
use serde_json::{Value, json};

use dagrelay::channel::RemoteChannel;
use dagrelay::errors::TaskError;
use dagrelay::exec::{TaskHandler, TaskInvocation};

/// One recorded handler call.
#[derive(Debug, Clone, PartialEq)]
pub struct InvocationRecord {
    pub task_id: String,
    pub kind: String,
    pub inputs: Value,
    pub node_id: String,
    pub attempt: u32,
}

/// Answers from a per-task script; tasks without a (remaining) script
/// succeed with `{"done": <task id>}`.
#[derive(Default)]
pub struct ScriptedHandler {
    scripts: Mutex<HashMap<String, VecDeque<Result<Value, TaskError>>>>,
    delays: Mutex<HashMap<String, Duration>>,
    invocations: Mutex<Vec<InvocationRecord>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue results for `task_id`, consumed one per attempt.
    pub fn script(
        self,
        task_id: &str,
        results: impl IntoIterator<Item = Result<Value, TaskError>>,
    ) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .entry(task_id.to_string())
            .or_default()
            .extend(results);
        self
    }

    /// Fail `times` attempts with a handler error, then succeed with `value`.
    pub fn fail_then_succeed(self, task_id: &str, times: usize, transient: bool, value: Value) -> Self {
        let failures = (0..times).map(|i| Err(TaskError::handler(format!("attempt {i} failed"), transient)));
        self.script(task_id, failures.chain(std::iter::once(Ok(value))))
    }

    /// Always succeed with `value`.
    pub fn succeed(self, task_id: &str, value: Value) -> Self {
        self.script(task_id, [Ok(value)])
    }

    /// Fail once, terminally.
    pub fn fail(self, task_id: &str, message: &str) -> Self {
        self.script(task_id, [Err(TaskError::handler(message, false))])
    }

    /// Hold each call for `task_id` for `delay` before answering.
    pub fn delay(self, task_id: &str, delay: Duration) -> Self {
        self.delays.lock().unwrap().insert(task_id.to_string(), delay);
        self
    }

    pub fn invocations(&self) -> Vec<InvocationRecord> {
        self.invocations.lock().unwrap().clone()
    }

    pub fn calls_for(&self, task_id: &str) -> usize {
        self.invocations
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.task_id == task_id)
            .count()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

impl TaskHandler for ScriptedHandler {
    fn execute<'a>(
        &'a self,
        invocation: TaskInvocation<'a>,
        _channel: &'a dyn RemoteChannel,
    ) -> BoxFuture<'a, Result<Value, TaskError>> {
        Box::pin(async move {
            self.invocations.lock().unwrap().push(InvocationRecord {
                task_id: invocation.task_id.to_string(),
                kind: invocation.kind.to_string(),
                inputs: invocation.inputs.clone(),
                node_id: invocation.node_id.to_string(),
                attempt: invocation.attempt,
            });

            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);

            let delay = self.delays.lock().unwrap().get(invocation.task_id).copied();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }

            let scripted = {
                let mut scripts = self.scripts.lock().unwrap();
                let queue = scripts.get_mut(invocation.task_id);
                match queue {
                    // The last entry is sticky so "always" scripts keep answering.
                    Some(q) if q.len() > 1 => q.pop_front(),
                    Some(q) => q.front().cloned(),
                    None => None,
                }
            };

            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            scripted.unwrap_or_else(|| Ok(json!({ "done": invocation.task_id })))
        })
    }
}

// src/engine/report.rs

//! Serializable status views. These are what the binary prints and what
//! status queries return; nothing here is mutable plan state.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::alloc::NodeSnapshot;
use crate::channel::TunnelStatusReport;
use crate::dag::{ExecutionPlan, TaskExecutionState};
use crate::errors::TaskError;
use crate::types::{NodeId, PlanId, PlanStatus, TaskId, TaskKind, TaskStatus, TunnelStatus};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanStatusReport {
    pub plan_id: PlanId,
    pub status: PlanStatus,
    pub levels: Vec<Vec<TaskId>>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub abort_reason: Option<String>,
    pub per_task_status: Vec<TaskStatusReport>,
}

impl PlanStatusReport {
    pub fn task(&self, id: &str) -> Option<&TaskStatusReport> {
        self.per_task_status.iter().find(|t| t.id == id)
    }
}

impl From<&ExecutionPlan> for PlanStatusReport {
    fn from(plan: &ExecutionPlan) -> Self {
        Self {
            plan_id: plan.id().to_string(),
            status: plan.status(),
            levels: plan.levels().to_vec(),
            created_at: plan.created_at(),
            started_at: plan.started_at(),
            finished_at: plan.finished_at(),
            abort_reason: plan.abort_reason().map(str::to_string),
            per_task_status: plan.tasks().map(TaskStatusReport::from).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskStatusReport {
    pub id: TaskId,
    pub kind: TaskKind,
    pub status: TaskStatus,
    pub retry_count: u32,
    pub assigned_node: Option<NodeId>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_detail: Option<FailureDetail>,
}

impl From<&TaskExecutionState> for TaskStatusReport {
    fn from(task: &TaskExecutionState) -> Self {
        Self {
            id: task.id.clone(),
            kind: task.kind.clone(),
            status: task.status(),
            retry_count: task.retry_count(),
            assigned_node: task.assigned_node().map(str::to_string),
            started_at: task.started_at(),
            ended_at: task.ended_at(),
            result: task.result().cloned(),
            // The last retryable error stays recorded on a completed task; only
            // report failures for tasks that did not complete.
            failure_detail: match task.status() {
                TaskStatus::Completed => None,
                _ => task.failure().map(FailureDetail::from),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureDetail {
    pub class: String,
    pub message: String,
    pub retryable: bool,
}

impl From<&TaskError> for FailureDetail {
    fn from(err: &TaskError) -> Self {
        Self {
            class: err.class().to_string(),
            message: err.to_string(),
            retryable: err.is_retryable(),
        }
    }
}

/// Per-node health, joined from the allocator snapshot and the tunnel record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeHealthReport {
    pub node_id: NodeId,
    pub reachable: bool,
    pub reservation_count: usize,
    pub capacity: usize,
    pub capabilities: Vec<TaskKind>,
    pub tunnel_status: Option<TunnelStatus>,
    pub reconnect_attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl NodeHealthReport {
    pub fn new(snapshot: NodeSnapshot, tunnel: Option<TunnelStatusReport>) -> Self {
        let (tunnel_status, reconnect_attempts, last_error) = match tunnel {
            Some(t) => (Some(t.status), t.reconnect_attempts, t.last_error),
            None => (None, 0, None),
        };
        Self {
            node_id: snapshot.node_id,
            reachable: snapshot.reachable,
            reservation_count: snapshot.reservation_count,
            capacity: snapshot.capacity,
            capabilities: snapshot.capabilities,
            tunnel_status,
            reconnect_attempts,
            last_error,
        }
    }
}

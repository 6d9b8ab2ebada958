use std::fmt;

use serde::{Deserialize, Serialize};

/// Unique id of a task within one graph.
pub type TaskId = String;

/// Kind of work a task performs (e.g. "image", "video", "text").
pub type TaskKind = String;

/// Unique id of a remote compute node.
pub type NodeId = String;

/// Id of one submitted execution plan.
pub type PlanId = String;

/// Per-task status machine.
///
/// `Pending -> Running -> {Completed | FailedRetryable -> Pending | FailedTerminal}`.
/// A pending task may also fail directly (no reservation, or a missing
/// predecessor result) without ever running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    FailedRetryable,
    FailedTerminal,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::FailedTerminal)
    }

    /// Whether the status machine allows moving from `self` to `next`.
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, next),
            (Pending, Running)
                | (Pending, FailedRetryable)
                | (Pending, FailedTerminal)
                | (Running, Completed)
                | (Running, FailedRetryable)
                | (Running, FailedTerminal)
                | (FailedRetryable, Pending)
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::FailedRetryable => "failed-retryable",
            TaskStatus::FailedTerminal => "failed-terminal",
        };
        f.write_str(s)
    }
}

/// Overall status of an execution plan. Terminal states are final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl PlanStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, PlanStatus::Completed | PlanStatus::Failed)
    }
}

impl fmt::Display for PlanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PlanStatus::Pending => "pending",
            PlanStatus::Running => "running",
            PlanStatus::Completed => "completed",
            PlanStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Lifecycle of the tunnel to one remote node.
///
/// `Connecting -> Connected -> {Error -> Connecting | Closed}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TunnelStatus {
    Connecting,
    Connected,
    Error,
    Closed,
}

impl fmt::Display for TunnelStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TunnelStatus::Connecting => "connecting",
            TunnelStatus::Connected => "connected",
            TunnelStatus::Error => "error",
            TunnelStatus::Closed => "closed",
        };
        f.write_str(s)
    }
}

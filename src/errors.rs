// src/errors.rs

//! Crate-wide error types.
//!
//! - [`DagRelayError`] covers startup concerns (config, files, registration).
//! - [`PlanError`] is the submission-time structural taxonomy.
//! - [`TaskError`] is the runtime taxonomy recorded on individual tasks.
//! - [`TransportError`] is what the channel layer reports for a node.

use thiserror::Error;

use crate::types::{NodeId, TaskId, TaskKind, TunnelStatus};

#[derive(Error, Debug)]
pub enum DagRelayError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Node already registered: {0}")]
    DuplicateNode(NodeId),

    #[error(transparent)]
    Plan(#[from] PlanError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Structural problems with a submitted graph, or lookups of unknown plans.
///
/// These are reported synchronously and never retried.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlanError {
    #[error("cyclic graph: cycle detected involving task '{involving}'")]
    CyclicGraph { involving: TaskId },

    #[error("task '{task}' depends on unknown task '{dependency}'")]
    UnknownDependency { task: TaskId, dependency: TaskId },

    #[error("duplicate task id: {0}")]
    DuplicateTask(TaskId),

    #[error("task id must not be empty")]
    EmptyTaskId,

    #[error("unknown plan: {0}")]
    UnknownPlan(String),

    #[error("plan {0} has already been started")]
    AlreadyStarted(String),
}

/// Failures reported by the channel layer for one node.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("unknown node: {0}")]
    UnknownNode(NodeId),

    #[error("tunnel to {node} is not connected (status: {status})")]
    NotConnected { node: NodeId, status: TunnelStatus },

    #[error("request to {node} timed out after {millis}ms")]
    Timeout { node: NodeId, millis: u64 },

    #[error("connection closed")]
    Closed,

    #[error("io failure: {0}")]
    Io(String),

    #[error("protocol violation: {0}")]
    Protocol(String),

    #[error("connect failed: {0}")]
    Connect(String),
}

impl TransportError {
    /// Whether the failure means the underlying tunnel is broken and must be
    /// repaired by the reconnect loop.
    pub fn is_fault(&self) -> bool {
        matches!(
            self,
            TransportError::Timeout { .. }
                | TransportError::Closed
                | TransportError::Io(_)
                | TransportError::Protocol(_)
        )
    }
}

/// Handler error messages containing one of these markers are treated as
/// transient even when the handler did not tag them.
pub const TRANSIENT_MARKERS: &[&str] = &["ECONNREFUSED", "ETIMEDOUT", "GPU_BUSY", "RATE_LIMIT"];

/// Runtime failure of a single task.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TaskError {
    #[error("no capable, reachable node with free capacity for kind '{kind}'")]
    ResourceUnavailable { kind: TaskKind },

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("missing input from predecessor '{predecessor}'")]
    MissingInput { predecessor: TaskId },

    #[error("handler error: {message}")]
    Handler { message: String, transient: bool },

    #[error("cancelled")]
    Cancelled,
}

impl TaskError {
    /// Build a handler error, classifying it as transient when either the
    /// handler said so or the message carries a known transient marker.
    pub fn handler(message: impl Into<String>, transient: bool) -> Self {
        let message = message.into();
        let transient = transient || TRANSIENT_MARKERS.iter().any(|m| message.contains(m));
        TaskError::Handler { message, transient }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            TaskError::ResourceUnavailable { .. } | TaskError::Transport(_) => true,
            TaskError::Handler { transient, .. } => *transient,
            TaskError::MissingInput { .. } | TaskError::Cancelled => false,
        }
    }

    /// Short stable name of the taxonomy class, used in status reports.
    pub fn class(&self) -> &'static str {
        match self {
            TaskError::ResourceUnavailable { .. } => "ResourceUnavailable",
            TaskError::Transport(_) => "TransportError",
            TaskError::MissingInput { .. } => "MissingInput",
            TaskError::Handler { .. } => "HandlerError",
            TaskError::Cancelled => "Cancelled",
        }
    }
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, DagRelayError>;

// src/channel/protocol.rs

//! Wire messages exchanged with a remote node.
//!
//! Every request travels in an [`Envelope`] with a connection-local id; the
//! node answers with an envelope carrying the same id.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{TaskId, TaskKind};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub id: u64,
    pub body: T,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RemoteRequest {
    /// Run one task on the node.
    Execute {
        task_id: TaskId,
        kind: TaskKind,
        inputs: Value,
        attempt: u32,
    },
    /// Liveness probe.
    Ping,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RemoteResponse {
    Result {
        payload: Value,
    },
    Failed {
        message: String,
        /// Set by the node when a retry may succeed (busy GPU, rate limit).
        #[serde(default)]
        transient: bool,
    },
    Pong,
}

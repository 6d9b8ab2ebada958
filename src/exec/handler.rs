// src/exec/handler.rs

//! Task-kind handlers.
//!
//! A handler turns `(kind, merged inputs, assigned node)` into a result
//! payload. The dispatcher never talks to nodes itself; it looks the handler
//! up in a [`HandlerRegistry`] and hands it the channel.
//!
//! Handlers may be called more than once for the same logical task (retries),
//! so they must be safe to repeat.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::Value;
use tracing::debug;

use crate::channel::{RemoteChannel, RemoteRequest, RemoteResponse};
use crate::errors::TaskError;
use crate::types::TaskKind;

/// Everything a handler gets to know about one attempt.
#[derive(Debug, Clone, Copy)]
pub struct TaskInvocation<'a> {
    pub task_id: &'a str,
    pub kind: &'a str,
    pub inputs: &'a Value,
    pub node_id: &'a str,
    /// Zero-based attempt number.
    pub attempt: u32,
}

pub trait TaskHandler: Send + Sync {
    fn execute<'a>(
        &'a self,
        invocation: TaskInvocation<'a>,
        channel: &'a dyn RemoteChannel,
    ) -> BoxFuture<'a, Result<Value, TaskError>>;
}

/// Forwards the invocation to the assigned node as an `execute` request.
#[derive(Debug, Default, Clone, Copy)]
pub struct RemoteHandler;

impl TaskHandler for RemoteHandler {
    fn execute<'a>(
        &'a self,
        invocation: TaskInvocation<'a>,
        channel: &'a dyn RemoteChannel,
    ) -> BoxFuture<'a, Result<Value, TaskError>> {
        Box::pin(async move {
            let request = RemoteRequest::Execute {
                task_id: invocation.task_id.to_string(),
                kind: invocation.kind.to_string(),
                inputs: invocation.inputs.clone(),
                attempt: invocation.attempt,
            };

            match channel.send(invocation.node_id, request).await? {
                RemoteResponse::Result { payload } => Ok(payload),
                RemoteResponse::Failed { message, transient } => {
                    Err(TaskError::handler(message, transient))
                }
                RemoteResponse::Pong => Err(TaskError::handler(
                    format!("node {} answered execute with pong", invocation.node_id),
                    false,
                )),
            }
        })
    }
}

/// Handlers by task kind, with an optional fallback for everything else.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<TaskKind, Arc<dyn TaskHandler>>,
    fallback: Option<Arc<dyn TaskHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry where every kind goes to the assigned node via [`RemoteHandler`].
    pub fn remote() -> Self {
        Self::new().with_fallback(Arc::new(RemoteHandler))
    }

    pub fn register(&mut self, kind: impl Into<TaskKind>, handler: Arc<dyn TaskHandler>) {
        let kind = kind.into();
        debug!(kind = %kind, "registering task handler");
        self.handlers.insert(kind, handler);
    }

    pub fn with_handler(mut self, kind: impl Into<TaskKind>, handler: Arc<dyn TaskHandler>) -> Self {
        self.register(kind, handler);
        self
    }

    pub fn register_fallback(&mut self, handler: Arc<dyn TaskHandler>) {
        self.fallback = Some(handler);
    }

    pub fn with_fallback(mut self, handler: Arc<dyn TaskHandler>) -> Self {
        self.register_fallback(handler);
        self
    }

    pub fn get(&self, kind: &str) -> Option<Arc<dyn TaskHandler>> {
        self.handlers
            .get(kind)
            .cloned()
            .or_else(|| self.fallback.clone())
    }

    pub fn kinds(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut kinds: Vec<&str> = self.kinds().collect();
        kinds.sort_unstable();
        f.debug_struct("HandlerRegistry")
            .field("kinds", &kinds)
            .field("fallback", &self.fallback.is_some())
            .finish()
    }
}

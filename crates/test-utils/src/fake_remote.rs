//! In-memory stand-ins for remote nodes.
//!
//! `FakeConnector` hands out `FakeTransport`s, records every connect attempt
//! with its (tokio) timestamp and can be told to refuse connections. Each
//! transport answers requests through a shared responder closure and can be
//! disconnected or made to fail its health probes.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;
use serde_json::json;
use tokio::sync::watch;
use tokio::time::Instant;

use dagrelay::channel::{Connector, NodeEndpoint, RemoteRequest, RemoteResponse, Transport};
use dagrelay::errors::TransportError;

pub type Responder =
    Arc<dyn Fn(&str, &RemoteRequest) -> Result<RemoteResponse, TransportError> + Send + Sync>;

/// Echoes the task back: `{"node": ..., "task": ..., "inputs": ...}`.
pub fn echo_responder() -> Responder {
    Arc::new(|node: &str, request: &RemoteRequest| match request {
        RemoteRequest::Execute { task_id, inputs, .. } => Ok(RemoteResponse::Result {
            payload: json!({ "node": node, "task": task_id, "inputs": inputs }),
        }),
        RemoteRequest::Ping => Ok(RemoteResponse::Pong),
    })
}

pub struct FakeTransport {
    node_id: String,
    responder: Responder,
    closed: watch::Sender<bool>,
    probe_fails: AtomicBool,
    delay: Mutex<Option<Duration>>,
    requests: Mutex<Vec<RemoteRequest>>,
}

impl FakeTransport {
    fn new(node_id: &str, responder: Responder) -> Self {
        let (closed, _) = watch::channel(false);
        Self {
            node_id: node_id.to_string(),
            responder,
            closed,
            probe_fails: AtomicBool::new(false),
            delay: Mutex::new(None),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Simulate the peer dropping the connection.
    pub fn disconnect(&self) {
        self.closed.send_replace(true);
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    pub fn fail_probes(&self, fail: bool) {
        self.probe_fails.store(fail, Ordering::SeqCst);
    }

    /// Delay every response, e.g. to trip the request timeout.
    pub fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.lock().unwrap() = delay;
    }

    pub fn requests(&self) -> Vec<RemoteRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl Transport for FakeTransport {
    fn request(
        &self,
        request: RemoteRequest,
    ) -> BoxFuture<'_, Result<RemoteResponse, TransportError>> {
        Box::pin(async move {
            if self.is_closed() {
                return Err(TransportError::Closed);
            }
            self.requests.lock().unwrap().push(request.clone());
            let delay = *self.delay.lock().unwrap();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            (self.responder)(&self.node_id, &request)
        })
    }

    fn probe(&self) -> BoxFuture<'_, Result<(), TransportError>> {
        Box::pin(async move {
            if self.is_closed() || self.probe_fails.load(Ordering::SeqCst) {
                return Err(TransportError::Io("probe failed".to_string()));
            }
            Ok(())
        })
    }

    fn closed(&self) -> BoxFuture<'_, ()> {
        let mut rx = self.closed.subscribe();
        Box::pin(async move {
            let _ = rx.wait_for(|closed| *closed).await;
        })
    }

    fn local_endpoint(&self) -> Option<String> {
        Some(format!("fake://{}", self.node_id))
    }
}

#[derive(Default)]
struct ConnectorState {
    fail_next: HashMap<String, u32>,
    refused: HashSet<String>,
    attempts: HashMap<String, Vec<Instant>>,
    transports: HashMap<String, Arc<FakeTransport>>,
}

pub struct FakeConnector {
    state: Mutex<ConnectorState>,
    responder: Responder,
}

impl FakeConnector {
    pub fn new() -> Self {
        Self::with_responder(echo_responder())
    }

    pub fn with_responder(responder: Responder) -> Self {
        Self {
            state: Mutex::new(ConnectorState::default()),
            responder,
        }
    }

    /// Fail the next `n` connect attempts to `node`.
    pub fn fail_next(&self, node: &str, n: u32) {
        self.state.lock().unwrap().fail_next.insert(node.to_string(), n);
    }

    /// Refuse every connect attempt to `node` until called with `false`.
    pub fn refuse(&self, node: &str, refuse: bool) {
        let mut state = self.state.lock().unwrap();
        if refuse {
            state.refused.insert(node.to_string());
        } else {
            state.refused.remove(node);
        }
    }

    /// Timestamps of every connect attempt to `node`.
    pub fn connect_attempts(&self, node: &str) -> Vec<Instant> {
        self.state
            .lock()
            .unwrap()
            .attempts
            .get(node)
            .cloned()
            .unwrap_or_default()
    }

    /// The most recently established transport to `node`.
    pub fn transport(&self, node: &str) -> Option<Arc<FakeTransport>> {
        self.state.lock().unwrap().transports.get(node).cloned()
    }
}

impl Default for FakeConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl Connector for FakeConnector {
    fn connect<'a>(
        &'a self,
        endpoint: &'a NodeEndpoint,
    ) -> BoxFuture<'a, Result<Arc<dyn Transport>, TransportError>> {
        Box::pin(async move {
            let mut state = self.state.lock().unwrap();
            let node = endpoint.node_id.clone();
            state.attempts.entry(node.clone()).or_default().push(Instant::now());

            if state.refused.contains(&node) {
                return Err(TransportError::Connect("ECONNREFUSED".to_string()));
            }
            if let Some(left) = state.fail_next.get_mut(&node) {
                if *left > 0 {
                    *left -= 1;
                    return Err(TransportError::Connect("ECONNREFUSED".to_string()));
                }
            }

            let transport = Arc::new(FakeTransport::new(&node, Arc::clone(&self.responder)));
            state.transports.insert(node, Arc::clone(&transport));
            let transport: Arc<dyn Transport> = transport;
            Ok(transport)
        })
    }
}

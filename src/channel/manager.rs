// src/channel/manager.rs

//! Tunnel table and per-node supervision.
//!
//! Each opened node gets a [`TunnelSlot`] and one background supervisor task.
//! The supervisor is the only place that reconnects; request paths merely
//! report faults to it. All record mutations go through the slot's methods,
//! each a single step under the slot lock.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use futures::future::BoxFuture;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at, sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::channel::protocol::{RemoteRequest, RemoteResponse};
use crate::channel::transport::{Connector, NodeEndpoint, Transport};
use crate::channel::tunnel::{TunnelRecord, TunnelStatusReport};
use crate::channel::{ChannelOptions, Reachability, RemoteChannel};
use crate::errors::TransportError;
use crate::types::{NodeId, TunnelStatus};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn same_transport(a: &Arc<dyn Transport>, b: &Arc<dyn Transport>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

struct TunnelState {
    record: TunnelRecord,
    transport: Option<Arc<dyn Transport>>,
}

/// One node's tunnel: record, live transport and supervisor plumbing.
struct TunnelSlot {
    endpoint: NodeEndpoint,
    state: Mutex<TunnelState>,
    /// Wakes the supervisor when a request path observed a broken transport.
    fault: Notify,
    cancel: CancellationToken,
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

impl TunnelSlot {
    fn new(endpoint: NodeEndpoint, cancel: CancellationToken) -> Self {
        let record = TunnelRecord::new(endpoint.node_id.clone(), endpoint.target.clone());
        Self {
            endpoint,
            state: Mutex::new(TunnelState {
                record,
                transport: None,
            }),
            fault: Notify::new(),
            cancel,
            supervisor: Mutex::new(None),
        }
    }

    fn node_id(&self) -> &str {
        &self.endpoint.node_id
    }

    fn status(&self) -> TunnelStatus {
        lock(&self.state).record.status
    }

    fn record(&self) -> TunnelRecord {
        lock(&self.state).record.clone()
    }

    fn last_error(&self) -> Option<String> {
        lock(&self.state).record.last_error.clone()
    }

    fn connected_transport(&self) -> Result<Arc<dyn Transport>, TransportError> {
        let state = lock(&self.state);
        match (&state.transport, state.record.status) {
            (Some(t), TunnelStatus::Connected) => Ok(Arc::clone(t)),
            (_, status) => Err(TransportError::NotConnected {
                node: self.endpoint.node_id.clone(),
                status,
            }),
        }
    }

    /// `error -> connecting`. Returns false once the tunnel is closed.
    fn mark_connecting(&self) -> bool {
        let mut state = lock(&self.state);
        if state.record.status == TunnelStatus::Closed {
            return false;
        }
        state.record.status = TunnelStatus::Connecting;
        true
    }

    /// `connecting -> connected`; resets the reconnect counter.
    fn mark_connected(&self, transport: Arc<dyn Transport>) -> bool {
        let mut state = lock(&self.state);
        if state.record.status == TunnelStatus::Closed {
            return false;
        }
        state.record.local_endpoint = transport.local_endpoint();
        state.record.status = TunnelStatus::Connected;
        state.record.reconnect_attempts = 0;
        state.record.connected_since = Some(Utc::now());
        state.transport = Some(transport);
        true
    }

    fn mark_error(&self, reason: String) {
        let mut state = lock(&self.state);
        if state.record.status == TunnelStatus::Closed {
            return;
        }
        state.record.status = TunnelStatus::Error;
        state.record.last_error = Some(reason);
        state.record.connected_since = None;
        state.transport = None;
    }

    fn mark_closed(&self) {
        let mut state = lock(&self.state);
        state.record.status = TunnelStatus::Closed;
        state.record.connected_since = None;
        state.transport = None;
    }

    /// Flag a broken transport seen by a request. Ignored when the tunnel
    /// already moved on to a different transport.
    fn report_fault(&self, transport: &Arc<dyn Transport>, error: &TransportError) -> bool {
        {
            let mut state = lock(&self.state);
            let current = match &state.transport {
                Some(t) => same_transport(t, transport),
                None => false,
            };
            if !current || state.record.status != TunnelStatus::Connected {
                return false;
            }
            state.record.status = TunnelStatus::Error;
            state.record.last_error = Some(error.to_string());
            state.record.connected_since = None;
            state.transport = None;
        }
        self.fault.notify_one();
        true
    }

    /// Current attempt count for the next backoff delay, then bump it.
    fn next_backoff_attempt(&self) -> u32 {
        let mut state = lock(&self.state);
        let attempts = state.record.reconnect_attempts;
        state.record.reconnect_attempts = attempts.saturating_add(1);
        attempts
    }

    fn set_supervisor(&self, handle: JoinHandle<()>) {
        *lock(&self.supervisor) = Some(handle);
    }

    fn take_supervisor(&self) -> Option<JoinHandle<()>> {
        lock(&self.supervisor).take()
    }
}

/// Owns one persistent transport per remote node.
pub struct ChannelManager {
    connector: Arc<dyn Connector>,
    options: ChannelOptions,
    tunnels: Mutex<HashMap<NodeId, Arc<TunnelSlot>>>,
    shutdown: CancellationToken,
}

impl ChannelManager {
    pub fn new(connector: Arc<dyn Connector>, options: ChannelOptions) -> Self {
        Self {
            connector,
            options,
            tunnels: Mutex::new(HashMap::new()),
            shutdown: CancellationToken::new(),
        }
    }

    fn slot(&self, node_id: &str) -> Option<Arc<TunnelSlot>> {
        lock(&self.tunnels).get(node_id).cloned()
    }

    /// Establish the tunnel to one node and start supervising it.
    ///
    /// The result reflects the first connection attempt only; on failure the
    /// record is left in `error` and the supervisor keeps reconnecting.
    /// Opening a node whose tunnel is not closed is a no-op.
    pub async fn open(&self, endpoint: NodeEndpoint) -> Result<(), TransportError> {
        let slot = {
            let mut tunnels = lock(&self.tunnels);
            if let Some(existing) = tunnels.get(&endpoint.node_id) {
                if existing.status() != TunnelStatus::Closed {
                    debug!(node = %endpoint.node_id, "tunnel already open");
                    return Ok(());
                }
            }
            let slot = Arc::new(TunnelSlot::new(endpoint, self.shutdown.child_token()));
            tunnels.insert(slot.endpoint.node_id.clone(), Arc::clone(&slot));
            slot
        };

        info!(
            node = %slot.node_id(),
            target = %slot.endpoint.target,
            "opening tunnel"
        );

        let first = connect_once(&slot, self.connector.as_ref(), &self.options).await;

        let handle = tokio::spawn(supervise(
            Arc::clone(&slot),
            Arc::clone(&self.connector),
            self.options.clone(),
        ));
        slot.set_supervisor(handle);

        first
    }

    /// Forward a request to a node, bounded by the request timeout.
    ///
    /// Fails fast when the tunnel is not connected. Transport-level failures
    /// flag the tunnel so its supervisor reconnects.
    pub async fn send(
        &self,
        node_id: &str,
        request: RemoteRequest,
    ) -> Result<RemoteResponse, TransportError> {
        let slot = self
            .slot(node_id)
            .ok_or_else(|| TransportError::UnknownNode(node_id.to_string()))?;
        let transport = slot.connected_transport()?;

        let limit = self.options.request_timeout;
        let outcome = match timeout(limit, transport.request(request)).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout {
                node: node_id.to_string(),
                millis: limit.as_millis() as u64,
            }),
        };

        if let Err(err) = &outcome {
            if err.is_fault() && slot.report_fault(&transport, err) {
                warn!(node = %node_id, error = %err, "request failed; tunnel flagged for reconnect");
            }
        }

        outcome
    }

    /// Whether the node's tunnel is currently `connected`.
    pub fn is_reachable(&self, node_id: &str) -> bool {
        self.slot(node_id)
            .map(|slot| slot.status() == TunnelStatus::Connected)
            .unwrap_or(false)
    }

    pub fn tunnel_record(&self, node_id: &str) -> Option<TunnelRecord> {
        self.slot(node_id).map(|slot| slot.record())
    }

    pub fn tunnel_status(&self, node_id: &str) -> Option<TunnelStatusReport> {
        self.tunnel_record(node_id).map(|r| r.report())
    }

    /// Status of every known tunnel, ordered by node id.
    pub fn tunnel_statuses(&self) -> Vec<TunnelStatusReport> {
        let slots: Vec<Arc<TunnelSlot>> = lock(&self.tunnels).values().cloned().collect();
        let mut reports: Vec<TunnelStatusReport> =
            slots.iter().map(|slot| slot.record().report()).collect();
        reports.sort_by(|a, b| a.node_id.cmp(&b.node_id));
        reports
    }

    /// Stop supervising a node and drop its transport. This is the only way
    /// reconnection stops. Returns false for unknown nodes.
    pub async fn close(&self, node_id: &str) -> bool {
        let Some(slot) = self.slot(node_id) else {
            return false;
        };

        slot.cancel.cancel();
        slot.mark_closed();
        if let Some(handle) = slot.take_supervisor() {
            if let Err(e) = handle.await {
                warn!(node = %node_id, error = %e, "tunnel supervisor ended abnormally");
            }
        }

        info!(node = %node_id, "tunnel closed");
        true
    }

    pub async fn close_all(&self) {
        let ids: Vec<NodeId> = lock(&self.tunnels).keys().cloned().collect();
        for id in ids {
            self.close(&id).await;
        }
    }
}

impl Drop for ChannelManager {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

impl Reachability for ChannelManager {
    fn is_reachable(&self, node_id: &str) -> bool {
        ChannelManager::is_reachable(self, node_id)
    }
}

impl RemoteChannel for ChannelManager {
    fn send<'a>(
        &'a self,
        node_id: &'a str,
        request: RemoteRequest,
    ) -> BoxFuture<'a, Result<RemoteResponse, TransportError>> {
        Box::pin(ChannelManager::send(self, node_id, request))
    }
}

/// One connection attempt, recorded on the slot.
async fn connect_once(
    slot: &TunnelSlot,
    connector: &dyn Connector,
    options: &ChannelOptions,
) -> Result<(), TransportError> {
    let attempt = tokio::select! {
        _ = slot.cancel.cancelled() => return Err(TransportError::Closed),
        res = timeout(options.connect_timeout, connector.connect(&slot.endpoint)) => res,
    };

    let result = match attempt {
        Ok(result) => result,
        Err(_) => Err(TransportError::Connect(format!(
            "timed out after {}ms",
            options.connect_timeout.as_millis()
        ))),
    };

    match result {
        Ok(transport) => {
            if slot.mark_connected(transport) {
                info!(node = %slot.node_id(), "tunnel connected");
                Ok(())
            } else {
                Err(TransportError::Closed)
            }
        }
        Err(err) => {
            warn!(node = %slot.node_id(), error = %err, "tunnel connect failed");
            slot.mark_error(err.to_string());
            Err(err)
        }
    }
}

/// Per-node background loop: watch a live connection, and after any loss
/// reconnect with exponential backoff, indefinitely, until cancelled.
async fn supervise(slot: Arc<TunnelSlot>, connector: Arc<dyn Connector>, options: ChannelOptions) {
    debug!(node = %slot.node_id(), "tunnel supervisor started");

    loop {
        if slot.status() == TunnelStatus::Connected {
            match watch_connection(&slot, &options).await {
                None => break,
                Some(reason) => {
                    warn!(node = %slot.node_id(), reason = %reason, "tunnel lost");
                    slot.mark_error(reason);
                }
            }
        }

        let attempt = slot.next_backoff_attempt();
        let delay = options.backoff.delay(attempt);
        info!(
            node = %slot.node_id(),
            attempt = attempt + 1,
            delay_ms = delay.as_millis() as u64,
            "scheduling reconnect"
        );

        tokio::select! {
            _ = slot.cancel.cancelled() => break,
            _ = sleep(delay) => {}
        }

        if !slot.mark_connecting() {
            break;
        }
        // Failures are recorded on the slot; the loop backs off again.
        let _ = connect_once(&slot, connector.as_ref(), &options).await;
    }

    debug!(node = %slot.node_id(), "tunnel supervisor stopped");
}

/// Health loop for a connected tunnel. Returns `None` when cancelled, or the
/// reason the connection is considered lost.
async fn watch_connection(slot: &TunnelSlot, options: &ChannelOptions) -> Option<String> {
    let transport = match slot.connected_transport() {
        Ok(t) => t,
        Err(e) => return Some(e.to_string()),
    };

    let mut ticker = interval_at(
        Instant::now() + options.health_interval,
        options.health_interval,
    );
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = slot.cancel.cancelled() => return None,
            _ = slot.fault.notified() => {
                // A stale wake-up from an earlier transport leaves us connected.
                if slot.status() != TunnelStatus::Connected {
                    return Some(
                        slot.last_error()
                            .unwrap_or_else(|| "request failure".to_string()),
                    );
                }
            }
            _ = transport.closed() => {
                return Some("connection closed by peer".to_string());
            }
            _ = ticker.tick() => {
                match timeout(options.probe_timeout, transport.probe()).await {
                    Ok(Ok(())) => trace!(node = %slot.node_id(), "health probe ok"),
                    Ok(Err(e)) => return Some(format!("health probe failed: {e}")),
                    Err(_) => {
                        return Some(format!(
                            "health probe timed out after {}ms",
                            options.probe_timeout.as_millis()
                        ));
                    }
                }
            }
        }
    }
}

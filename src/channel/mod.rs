// src/channel/mod.rs

//! Remote channel management.
//!
//! One persistent transport ("tunnel") per remote node, supervised by a
//! background task that probes its health and reconnects with exponential
//! backoff. Everything above this layer only sees two capabilities:
//! [`RemoteChannel`] (send a request, await the response) and
//! [`Reachability`] (is this node currently connected).
//!
//! - [`protocol`] defines the request/response envelopes.
//! - [`codec`] frames them as newline-delimited JSON.
//! - [`transport`] abstracts connecting to a node; [`tcp`] is the production impl.
//! - [`backoff`] computes reconnect delays.
//! - [`tunnel`] holds the per-node tunnel record and its status report.
//! - [`manager`] owns the tunnel table and the per-node supervisors.

use std::time::Duration;

use futures::future::BoxFuture;

use crate::config::ChannelSection;
use crate::errors::TransportError;

pub mod backoff;
pub mod codec;
pub mod manager;
pub mod protocol;
pub mod tcp;
pub mod transport;
pub mod tunnel;

pub use backoff::BackoffPolicy;
pub use manager::ChannelManager;
pub use protocol::{Envelope, RemoteRequest, RemoteResponse};
pub use tcp::{TcpConnector, TcpTransport};
pub use transport::{Connector, NodeEndpoint, Transport};
pub use tunnel::{TunnelRecord, TunnelStatusReport};

/// Read-only view of which nodes can currently accept work.
pub trait Reachability: Send + Sync {
    fn is_reachable(&self, node_id: &str) -> bool;
}

impl<F> Reachability for F
where
    F: Fn(&str) -> bool + Send + Sync,
{
    fn is_reachable(&self, node_id: &str) -> bool {
        self(node_id)
    }
}

/// Request/response access to remote nodes.
pub trait RemoteChannel: Send + Sync {
    fn send<'a>(
        &'a self,
        node_id: &'a str,
        request: RemoteRequest,
    ) -> BoxFuture<'a, Result<RemoteResponse, TransportError>>;
}

/// Timing knobs for tunnel supervision.
#[derive(Debug, Clone)]
pub struct ChannelOptions {
    pub health_interval: Duration,
    pub probe_timeout: Duration,
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
    pub backoff: BackoffPolicy,
}

impl From<&ChannelSection> for ChannelOptions {
    fn from(section: &ChannelSection) -> Self {
        Self {
            health_interval: Duration::from_millis(section.health_interval_ms),
            probe_timeout: Duration::from_millis(section.probe_timeout_ms),
            request_timeout: Duration::from_millis(section.request_timeout_ms),
            connect_timeout: Duration::from_millis(section.connect_timeout_ms),
            backoff: BackoffPolicy::new(
                Duration::from_millis(section.backoff_base_ms),
                Duration::from_millis(section.backoff_cap_ms),
            ),
        }
    }
}

impl Default for ChannelOptions {
    fn default() -> Self {
        Self::from(&ChannelSection::default())
    }
}

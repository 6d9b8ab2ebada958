// src/channel/transport.rs

//! Pluggable transport abstraction.
//!
//! The channel manager talks to a [`Connector`] instead of opening sockets
//! itself, so tests can swap in in-memory transports while production uses
//! [`crate::channel::TcpConnector`].

use std::sync::Arc;

use futures::future::BoxFuture;

use crate::channel::protocol::{RemoteRequest, RemoteResponse};
use crate::errors::TransportError;
use crate::types::NodeId;

/// Where to reach one node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeEndpoint {
    pub node_id: NodeId,
    pub target: String,
}

/// An established, persistent connection to one node.
pub trait Transport: Send + Sync {
    /// One request/response exchange.
    fn request(&self, request: RemoteRequest)
    -> BoxFuture<'_, Result<RemoteResponse, TransportError>>;

    /// Lightweight liveness check.
    fn probe(&self) -> BoxFuture<'_, Result<(), TransportError>>;

    /// Resolves once the connection is known to be gone.
    fn closed(&self) -> BoxFuture<'_, ()>;

    /// Local address bound for this connection, if meaningful.
    fn local_endpoint(&self) -> Option<String> {
        None
    }
}

/// Opens transports.
pub trait Connector: Send + Sync {
    fn connect<'a>(
        &'a self,
        endpoint: &'a NodeEndpoint,
    ) -> BoxFuture<'a, Result<Arc<dyn Transport>, TransportError>>;
}

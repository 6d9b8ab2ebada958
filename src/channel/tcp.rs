// src/channel/tcp.rs

//! TCP transport speaking newline-delimited JSON envelopes.
//!
//! Requests on one connection are multiplexed by envelope id: writes go
//! through a short-lived lock and a reader task routes each response to the
//! request waiting for it. The reader also notices a peer closing an idle
//! connection, which resolves [`Transport::closed`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};

use futures::future::BoxFuture;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{Mutex, oneshot};
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::channel::codec::NdJsonCodec;
use crate::channel::protocol::{Envelope, RemoteRequest, RemoteResponse};
use crate::channel::transport::{Connector, NodeEndpoint, Transport};
use crate::errors::TransportError;

type ResponseReader = FramedRead<OwnedReadHalf, NdJsonCodec<Envelope<RemoteResponse>>>;
type RequestWriter = FramedWrite<OwnedWriteHalf, NdJsonCodec<Envelope<RemoteRequest>>>;

/// Connects to `NodeEndpoint::target` (`host:port`).
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpConnector;

impl Connector for TcpConnector {
    fn connect<'a>(
        &'a self,
        endpoint: &'a NodeEndpoint,
    ) -> BoxFuture<'a, Result<Arc<dyn Transport>, TransportError>> {
        Box::pin(async move {
            let stream = TcpStream::connect(&endpoint.target)
                .await
                .map_err(|e| TransportError::Connect(format!("{}: {e}", endpoint.target)))?;
            if let Err(e) = stream.set_nodelay(true) {
                debug!(node = %endpoint.node_id, error = %e, "could not set TCP_NODELAY");
            }
            let transport: Arc<dyn Transport> = Arc::new(TcpTransport::new(stream));
            Ok(transport)
        })
    }
}

/// State shared between request futures and the reader task.
struct Shared {
    pending: StdMutex<HashMap<u64, oneshot::Sender<RemoteResponse>>>,
    failure: StdMutex<Option<TransportError>>,
    next_id: AtomicU64,
    closed: CancellationToken,
}

impl Shared {
    fn pending(&self) -> MutexGuard<'_, HashMap<u64, oneshot::Sender<RemoteResponse>>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Why the connection went away, for requests caught in flight.
    fn failure(&self) -> TransportError {
        self.failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .unwrap_or(TransportError::Closed)
    }

    /// Close the connection. Waiting requests observe `failure`.
    fn shut(&self, failure: Option<TransportError>) {
        if let Some(failure) = failure {
            let mut slot = self.failure.lock().unwrap_or_else(PoisonError::into_inner);
            if slot.is_none() {
                *slot = Some(failure);
            }
        }
        self.closed.cancel();
        self.pending().clear();
    }

    fn route(&self, envelope: Envelope<RemoteResponse>) -> Result<(), TransportError> {
        let Envelope { id, body } = envelope;
        let waiter = self.pending().remove(&id);
        match waiter {
            Some(waiter) => {
                // The requester may have given up; nothing to do then.
                let _ = waiter.send(body);
                Ok(())
            }
            None if id < self.next_id.load(Ordering::Acquire) => {
                debug!(id, "discarding response for an abandoned request");
                Ok(())
            }
            None => Err(TransportError::Protocol(format!(
                "response for unknown request id {id}"
            ))),
        }
    }
}

pub struct TcpTransport {
    writer: Mutex<RequestWriter>,
    shared: Arc<Shared>,
    local: Option<String>,
}

impl TcpTransport {
    /// Wrap a connected stream. Spawns the reader task, so this must be
    /// called from within a Tokio runtime.
    pub fn new(stream: TcpStream) -> Self {
        let local = stream.local_addr().ok().map(|a| a.to_string());
        let (read_half, write_half) = stream.into_split();
        let shared = Arc::new(Shared {
            pending: StdMutex::new(HashMap::new()),
            failure: StdMutex::new(None),
            next_id: AtomicU64::new(1),
            closed: CancellationToken::new(),
        });

        tokio::spawn(read_responses(
            Arc::clone(&shared),
            FramedRead::new(read_half, NdJsonCodec::new()),
        ));

        Self {
            writer: Mutex::new(FramedWrite::new(write_half, NdJsonCodec::new())),
            shared,
            local,
        }
    }

    async fn exchange(&self, body: RemoteRequest) -> Result<RemoteResponse, TransportError> {
        if self.shared.closed.is_cancelled() {
            return Err(TransportError::Closed);
        }

        let id = self.shared.next_id.fetch_add(1, Ordering::AcqRel);
        let (tx, rx) = oneshot::channel();
        self.shared.pending().insert(id, tx);
        let _entry = PendingEntry {
            shared: &self.shared,
            id,
        };

        {
            let mut writer = self.writer.lock().await;
            if let Err(e) = writer.send(Envelope { id, body }).await {
                let err = TransportError::Io(e.to_string());
                self.shared.shut(Some(err.clone()));
                return Err(err);
            }
        }

        tokio::select! {
            biased;
            response = rx => response.map_err(|_| self.shared.failure()),
            _ = self.shared.closed.cancelled() => Err(self.shared.failure()),
        }
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        self.shared.closed.cancel();
    }
}

impl Transport for TcpTransport {
    fn request(
        &self,
        request: RemoteRequest,
    ) -> BoxFuture<'_, Result<RemoteResponse, TransportError>> {
        Box::pin(self.exchange(request))
    }

    fn probe(&self) -> BoxFuture<'_, Result<(), TransportError>> {
        Box::pin(async move {
            match self.exchange(RemoteRequest::Ping).await? {
                RemoteResponse::Pong => Ok(()),
                other => Err(TransportError::Protocol(format!(
                    "unexpected probe response: {other:?}"
                ))),
            }
        })
    }

    fn closed(&self) -> BoxFuture<'_, ()> {
        Box::pin(self.shared.closed.cancelled())
    }

    fn local_endpoint(&self) -> Option<String> {
        self.local.clone()
    }
}

/// Drops the waiter of a request that finished or was abandoned.
struct PendingEntry<'a> {
    shared: &'a Shared,
    id: u64,
}

impl Drop for PendingEntry<'_> {
    fn drop(&mut self) {
        self.shared.pending().remove(&self.id);
    }
}

async fn read_responses(shared: Arc<Shared>, mut reader: ResponseReader) {
    let failure = loop {
        let next = tokio::select! {
            _ = shared.closed.cancelled() => break None,
            next = reader.next() => next,
        };
        match next {
            Some(Ok(envelope)) => {
                if let Err(e) = shared.route(envelope) {
                    warn!(error = %e, "closing connection");
                    break Some(e);
                }
            }
            Some(Err(e)) => break Some(TransportError::Io(e.to_string())),
            None => {
                debug!("connection closed by peer");
                break Some(TransportError::Closed);
            }
        }
    };
    shared.shut(failure);
}

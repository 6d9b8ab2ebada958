// src/alloc/allocator.rs

//! The node table and its single-writer operations.
//!
//! All reservation counts live behind one mutex; every public operation is a
//! single locked step, so `reserve` is atomic with respect to concurrent
//! callers and a node's count can never exceed its capacity.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::{Instant, sleep_until};
use tracing::{debug, info, trace};

use crate::alloc::node::{NodeDescriptor, NodeSnapshot};
use crate::alloc::reservation::{Reservation, ReservationGuard, ReservationId, ResourceHint};
use crate::alloc::selection::select_node;
use crate::channel::Reachability;
use crate::errors::{DagRelayError, TaskError};
use crate::types::NodeId;

/// Reachability is not pushed to the allocator, so waiters re-check at
/// least this often.
const RESERVE_POLL: Duration = Duration::from_millis(50);

#[derive(Debug, Default)]
struct AllocState {
    nodes: BTreeMap<NodeId, NodeDescriptor>,
    live: HashMap<ReservationId, NodeId>,
    next_id: u64,
}

pub struct Allocator {
    state: Mutex<AllocState>,
    reachability: Arc<dyn Reachability>,
    freed: Notify,
}

impl Allocator {
    pub fn new(reachability: Arc<dyn Reachability>) -> Self {
        Self {
            state: Mutex::new(AllocState::default()),
            reachability,
            freed: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, AllocState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add_node(&self, node: NodeDescriptor) -> Result<(), DagRelayError> {
        let mut state = self.lock();
        if state.nodes.contains_key(&node.id) {
            return Err(DagRelayError::DuplicateNode(node.id));
        }
        info!(
            node = %node.id,
            capacity = node.capacity,
            capabilities = ?node.capabilities,
            "node added to allocator"
        );
        state.nodes.insert(node.id.clone(), NodeDescriptor { reservations: 0, ..node });
        drop(state);
        self.freed.notify_waiters();
        Ok(())
    }

    pub fn contains(&self, node_id: &str) -> bool {
        self.lock().nodes.contains_key(node_id)
    }

    /// Try once to reserve a slot for `kind`.
    pub fn reserve(&self, kind: &str, hint: &ResourceHint) -> Result<Reservation, TaskError> {
        let mut state = self.lock();

        let node_id = select_node(state.nodes.values(), kind, self.reachability.as_ref())
            .map(|n| n.id.clone())
            .ok_or_else(|| TaskError::ResourceUnavailable {
                kind: kind.to_string(),
            })?;

        let id = ReservationId(state.next_id);
        state.next_id += 1;

        let Some(node) = state.nodes.get_mut(&node_id) else {
            return Err(TaskError::ResourceUnavailable {
                kind: kind.to_string(),
            });
        };
        node.reservations += 1;
        let load = node.reservations;
        state.live.insert(id, node_id.clone());

        debug!(
            reservation = %id,
            node = %node_id,
            kind = %kind,
            task = %hint.task_id,
            attempt = hint.attempt,
            load,
            "reserved"
        );

        Ok(Reservation {
            id,
            node_id,
            kind: kind.to_string(),
            task_id: hint.task_id.clone(),
        })
    }

    /// Reserve, waiting up to `wait` for capacity or reachability to appear.
    /// The returned guard releases the reservation when dropped.
    pub async fn reserve_within(
        self: &Arc<Self>,
        kind: &str,
        hint: &ResourceHint,
        wait: Duration,
    ) -> Result<ReservationGuard, TaskError> {
        let deadline = Instant::now() + wait;

        loop {
            // Register interest before trying, so a release between the
            // attempt and the wait is not missed.
            let freed = self.freed.notified();
            tokio::pin!(freed);
            freed.as_mut().enable();

            match self.reserve(kind, hint) {
                Ok(reservation) => {
                    return Ok(ReservationGuard::new(Arc::clone(self), reservation));
                }
                Err(err) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(err);
                    }
                    trace!(kind = %kind, task = %hint.task_id, "waiting for a free node");
                    let next_poll = (now + RESERVE_POLL).min(deadline);
                    tokio::select! {
                        _ = &mut freed => {}
                        _ = sleep_until(next_poll) => {}
                    }
                }
            }
        }
    }

    /// Give a reservation back. Releasing twice, or releasing something this
    /// allocator never issued, changes nothing. Returns whether a slot was
    /// actually freed.
    pub fn release(&self, reservation: &Reservation) -> bool {
        let mut state = self.lock();
        let Some(node_id) = state.live.remove(&reservation.id) else {
            trace!(reservation = %reservation.id, "release of unknown reservation ignored");
            return false;
        };
        if let Some(node) = state.nodes.get_mut(&node_id) {
            node.reservations = node.reservations.saturating_sub(1);
            debug!(
                reservation = %reservation.id,
                node = %node_id,
                load = node.reservations,
                "released"
            );
        }
        drop(state);
        self.freed.notify_waiters();
        true
    }

    /// Number of reservations currently outstanding.
    pub fn live_reservations(&self) -> usize {
        self.lock().live.len()
    }

    /// Node table view ordered by node id.
    pub fn snapshot(&self) -> Vec<NodeSnapshot> {
        let nodes: Vec<NodeDescriptor> = self.lock().nodes.values().cloned().collect();
        nodes
            .into_iter()
            .map(|n| NodeSnapshot {
                reachable: self.reachability.is_reachable(&n.id),
                capabilities: n.capabilities.into_iter().collect(),
                capacity: n.capacity,
                reservation_count: n.reservations,
                node_id: n.id,
            })
            .collect()
    }
}

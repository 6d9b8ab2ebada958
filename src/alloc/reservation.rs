// src/alloc/reservation.rs

use std::fmt;
use std::sync::Arc;

use tracing::trace;

use crate::alloc::allocator::Allocator;
use crate::types::{NodeId, TaskId, TaskKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ReservationId(pub(crate) u64);

impl fmt::Display for ReservationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "r{}", self.0)
    }
}

/// A capacity claim on one node for one task attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reservation {
    pub id: ReservationId,
    pub node_id: NodeId,
    pub kind: TaskKind,
    pub task_id: TaskId,
}

/// What the caller knows about the work it is reserving for. Every task
/// currently costs one slot; the hint identifies the claim in logs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceHint {
    pub task_id: TaskId,
    pub attempt: u32,
}

impl ResourceHint {
    pub fn for_task(task_id: impl Into<TaskId>, attempt: u32) -> Self {
        Self {
            task_id: task_id.into(),
            attempt,
        }
    }
}

/// Scoped reservation: released when dropped, whichever way the holder
/// exits (success, error, cancellation, panic).
pub struct ReservationGuard {
    allocator: Arc<Allocator>,
    reservation: Option<Reservation>,
}

impl ReservationGuard {
    pub(crate) fn new(allocator: Arc<Allocator>, reservation: Reservation) -> Self {
        Self {
            allocator,
            reservation: Some(reservation),
        }
    }

    pub fn node_id(&self) -> &str {
        self.reservation
            .as_ref()
            .map(|r| r.node_id.as_str())
            .unwrap_or_default()
    }

    /// Release now instead of at drop.
    pub fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        if let Some(reservation) = self.reservation.take() {
            trace!(reservation = %reservation.id, node = %reservation.node_id, "guard releasing");
            self.allocator.release(&reservation);
        }
    }
}

impl Drop for ReservationGuard {
    fn drop(&mut self) {
        self.release_inner();
    }
}

impl fmt::Debug for ReservationGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReservationGuard")
            .field("reservation", &self.reservation)
            .finish()
    }
}

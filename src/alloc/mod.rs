// src/alloc/mod.rs

//! Resource allocation.
//!
//! - [`node`] describes a registered node and its externally visible snapshot.
//! - [`selection`] is the pure, deterministic node choice.
//! - [`reservation`] holds reservation tokens and the release-on-drop guard.
//! - [`allocator`] owns the node table and serializes reserve/release.

pub mod allocator;
pub mod node;
pub mod reservation;
pub mod selection;

pub use allocator::Allocator;
pub use node::{NodeDescriptor, NodeSnapshot};
pub use reservation::{Reservation, ReservationGuard, ReservationId, ResourceHint};
pub use selection::select_node;

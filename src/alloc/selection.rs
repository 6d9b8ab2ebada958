// src/alloc/selection.rs

//! Node selection.
//!
//! A pure function of capability, reachability, load and node id: the same
//! inputs always pick the same node, so allocation is reproducible without
//! any timing in play.

use crate::alloc::node::NodeDescriptor;
use crate::channel::Reachability;

/// Pick the least-loaded node that can serve `kind`, is reachable and has
/// free capacity. Ties go to the lowest node id.
pub fn select_node<'a, I>(
    nodes: I,
    kind: &str,
    reachability: &dyn Reachability,
) -> Option<&'a NodeDescriptor>
where
    I: IntoIterator<Item = &'a NodeDescriptor>,
{
    nodes
        .into_iter()
        .filter(|n| n.can_serve(kind))
        .filter(|n| n.has_free_capacity())
        .filter(|n| reachability.is_reachable(&n.id))
        .min_by(|a, b| {
            a.reservations
                .cmp(&b.reservations)
                .then_with(|| a.id.cmp(&b.id))
        })
}

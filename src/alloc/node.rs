// src/alloc/node.rs

use std::collections::BTreeSet;

use serde::Serialize;

use crate::types::{NodeId, TaskKind};

/// A registered compute node as the allocator sees it.
///
/// `reservations` is only ever changed by the allocator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeDescriptor {
    pub id: NodeId,
    pub capabilities: BTreeSet<TaskKind>,
    pub capacity: usize,
    pub(crate) reservations: usize,
}

impl NodeDescriptor {
    pub fn new(
        id: impl Into<NodeId>,
        capabilities: impl IntoIterator<Item = impl Into<TaskKind>>,
        capacity: usize,
    ) -> Self {
        Self {
            id: id.into(),
            capabilities: capabilities.into_iter().map(Into::into).collect(),
            capacity,
            reservations: 0,
        }
    }

    pub fn reservations(&self) -> usize {
        self.reservations
    }

    pub fn can_serve(&self, kind: &str) -> bool {
        self.capabilities.contains(kind)
    }

    pub fn has_free_capacity(&self) -> bool {
        self.reservations < self.capacity
    }
}

/// Read-only view of one node for status reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeSnapshot {
    pub node_id: NodeId,
    pub capabilities: Vec<TaskKind>,
    pub capacity: usize,
    pub reservation_count: usize,
    pub reachable: bool,
}

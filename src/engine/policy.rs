// src/engine/policy.rs

use std::collections::BTreeSet;

use crate::config::CoordinatorSection;
use crate::dag::ExecutionPlan;
use crate::types::{TaskId, TaskKind};

/// Decides whether a level's terminal failures abort the whole plan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AbortPolicy {
    critical_kinds: BTreeSet<TaskKind>,
}

impl AbortPolicy {
    pub fn new(critical_kinds: impl IntoIterator<Item = impl Into<TaskKind>>) -> Self {
        Self {
            critical_kinds: critical_kinds.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_critical(&self, kind: &str) -> bool {
        self.critical_kinds.contains(kind)
    }

    /// First failed task (in the given order) whose kind is critical.
    pub fn critical_failure<'a>(
        &self,
        plan: &ExecutionPlan,
        failed: &'a [TaskId],
    ) -> Option<&'a TaskId> {
        failed.iter().find(|id| {
            plan.task(id)
                .map(|task| self.is_critical(&task.kind))
                .unwrap_or(false)
        })
    }
}

impl From<&CoordinatorSection> for AbortPolicy {
    fn from(section: &CoordinatorSection) -> Self {
        Self::new(section.critical_kinds.iter().cloned())
    }
}

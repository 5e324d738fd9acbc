// src/engine/queue.rs

use std::collections::{HashSet, VecDeque};

use tracing::debug;

use crate::dag::TaskGroupId;

/// Task groups that are eligible to run but not placed yet.
///
/// Semantics:
/// - Plain FIFO: offers from different stages interleave in arrival order,
///   which keeps every stage FIFO on its own.
/// - A task group is queued at most once; offering it again while queued is
///   a no-op.
/// - Entries are references only. The orchestrator re-checks the state store
///   on `poll()` and skips entries that are no longer `Ready`.
#[derive(Debug, Default)]
pub struct PendingQueue {
    entries: VecDeque<TaskGroupId>,
    queued: HashSet<TaskGroupId>,
}

impl PendingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn contains(&self, id: &TaskGroupId) -> bool {
        self.queued.contains(id)
    }

    /// Append `id` at the tail. Used for first offers, retries and for task
    /// groups that could not be placed this cycle.
    ///
    /// Returns `false` if it was already queued.
    pub fn offer(&mut self, id: TaskGroupId) -> bool {
        if !self.queued.insert(id.clone()) {
            debug!(task_group = %id, "already queued; ignoring offer");
            return false;
        }
        self.entries.push_back(id);
        true
    }

    /// Next task group to place, if any.
    pub fn poll(&mut self) -> Option<TaskGroupId> {
        let id = self.entries.pop_front()?;
        self.queued.remove(&id);
        Some(id)
    }

    /// Drop every queued entry.
    pub fn clear(&mut self) -> usize {
        let dropped = self.entries.len();
        self.entries.clear();
        self.queued.clear();
        if dropped > 0 {
            debug!(dropped, "cleared pending queue");
        }
        dropped
    }
}

// src/exec/registry.rs

//! Live executors, their slot capacity, and which attempts occupy them.

use std::collections::BTreeMap;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::dag::TaskGroupId;
use crate::types::{Attempt, ExecutorId};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("executor '{0}' is already registered")]
    DuplicateExecutor(ExecutorId),

    #[error("executor '{0}' is not registered")]
    UnknownExecutor(ExecutorId),

    #[error("executor '{executor}' is at capacity ({capacity})")]
    AtCapacity { executor: ExecutorId, capacity: usize },

    #[error("{task_group} already occupies a slot on '{executor}'")]
    AlreadyPlaced {
        executor: ExecutorId,
        task_group: TaskGroupId,
    },
}

#[derive(Debug, Clone)]
struct ExecutorSlots {
    capacity: usize,
    running: BTreeMap<TaskGroupId, Attempt>,
}

impl ExecutorSlots {
    fn free(&self) -> usize {
        self.capacity.saturating_sub(self.running.len())
    }
}

/// Read-only view of one executor, as handed to the scheduling policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutorView {
    pub id: ExecutorId,
    pub capacity: usize,
    pub running: usize,
}

impl ExecutorView {
    pub fn free_slots(&self) -> usize {
        self.capacity.saturating_sub(self.running)
    }
}

/// Registry snapshot, ordered by executor id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistrySnapshot {
    pub executors: Vec<ExecutorView>,
}

impl RegistrySnapshot {
    pub fn get(&self, id: &str) -> Option<&ExecutorView> {
        self.executors.iter().find(|e| e.id == id)
    }

    pub fn total_free_slots(&self) -> usize {
        self.executors.iter().map(ExecutorView::free_slots).sum()
    }
}

#[derive(Debug, Default)]
pub struct ResourceRegistry {
    executors: BTreeMap<ExecutorId, ExecutorSlots>,
}

impl ResourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_executor(&mut self, id: ExecutorId, capacity: usize) -> Result<(), RegistryError> {
        if self.executors.contains_key(&id) {
            return Err(RegistryError::DuplicateExecutor(id));
        }
        if capacity == 0 {
            warn!(executor = %id, "executor registered with zero capacity; it will never be selected");
        }
        info!(executor = %id, capacity, "executor added");
        self.executors.insert(
            id,
            ExecutorSlots {
                capacity,
                running: BTreeMap::new(),
            },
        );
        Ok(())
    }

    /// Unregister `id` and hand back every attempt that was running there.
    ///
    /// Never waits on the executor; its slots are simply gone.
    pub fn remove_executor(&mut self, id: &str) -> Result<Vec<(TaskGroupId, Attempt)>, RegistryError> {
        let slots = self
            .executors
            .remove(id)
            .ok_or_else(|| RegistryError::UnknownExecutor(id.to_string()))?;

        let orphaned: Vec<(TaskGroupId, Attempt)> = slots.running.into_iter().collect();
        info!(executor = %id, orphaned = orphaned.len(), "executor removed");
        Ok(orphaned)
    }

    pub fn reserve_slot(
        &mut self,
        executor: &str,
        task_group: &TaskGroupId,
        attempt: Attempt,
    ) -> Result<(), RegistryError> {
        let slots = self
            .executors
            .get_mut(executor)
            .ok_or_else(|| RegistryError::UnknownExecutor(executor.to_string()))?;

        if slots.running.contains_key(task_group) {
            return Err(RegistryError::AlreadyPlaced {
                executor: executor.to_string(),
                task_group: task_group.clone(),
            });
        }
        if slots.free() == 0 {
            return Err(RegistryError::AtCapacity {
                executor: executor.to_string(),
                capacity: slots.capacity,
            });
        }

        slots.running.insert(task_group.clone(), attempt);
        debug!(executor, task_group = %task_group, attempt, "slot reserved");
        Ok(())
    }

    /// Free the slot `task_group` holds on `executor`.
    ///
    /// Returns the attempt that held it, or `None` if nothing was there.
    pub fn release_slot(&mut self, executor: &str, task_group: &TaskGroupId) -> Option<Attempt> {
        let released = self
            .executors
            .get_mut(executor)
            .and_then(|slots| slots.running.remove(task_group));
        if let Some(attempt) = released {
            debug!(executor, task_group = %task_group, attempt, "slot released");
        }
        released
    }

    /// Free every occupied slot, keeping the executors registered.
    pub fn release_all(&mut self) -> Vec<(ExecutorId, TaskGroupId, Attempt)> {
        let mut released = Vec::new();
        for (id, slots) in self.executors.iter_mut() {
            for (tg, attempt) in std::mem::take(&mut slots.running) {
                released.push((id.clone(), tg, attempt));
            }
        }
        released
    }

    pub fn contains(&self, executor: &str) -> bool {
        self.executors.contains_key(executor)
    }

    pub fn len(&self) -> usize {
        self.executors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.executors.is_empty()
    }

    pub fn occupied_slots(&self) -> usize {
        self.executors.values().map(|s| s.running.len()).sum()
    }

    pub fn snapshot(&self) -> RegistrySnapshot {
        RegistrySnapshot {
            executors: self
                .executors
                .iter()
                .map(|(id, slots)| ExecutorView {
                    id: id.clone(),
                    capacity: slots.capacity,
                    running: slots.running.len(),
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tg(index: usize) -> TaskGroupId {
        TaskGroupId::new("s", index)
    }

    #[test]
    fn reserve_respects_capacity() {
        let mut reg = ResourceRegistry::new();
        reg.add_executor("e1".into(), 1).unwrap();

        reg.reserve_slot("e1", &tg(0), 1).unwrap();
        assert_eq!(
            reg.reserve_slot("e1", &tg(1), 1),
            Err(RegistryError::AtCapacity {
                executor: "e1".into(),
                capacity: 1
            })
        );

        assert_eq!(reg.release_slot("e1", &tg(0)), Some(1));
        assert_eq!(reg.release_slot("e1", &tg(0)), None);
        reg.reserve_slot("e1", &tg(1), 1).unwrap();
    }

    #[test]
    fn removal_returns_every_orphan_exactly_once() {
        let mut reg = ResourceRegistry::new();
        reg.add_executor("e1".into(), 3).unwrap();
        reg.add_executor("e2".into(), 1).unwrap();
        reg.reserve_slot("e1", &tg(0), 1).unwrap();
        reg.reserve_slot("e1", &tg(1), 2).unwrap();
        reg.reserve_slot("e2", &tg(2), 1).unwrap();

        let orphans = reg.remove_executor("e1").unwrap();
        assert_eq!(orphans, vec![(tg(0), 1), (tg(1), 2)]);
        assert_eq!(reg.occupied_slots(), 1);
        assert!(reg.snapshot().get("e1").is_none());
        assert!(matches!(
            reg.remove_executor("e1"),
            Err(RegistryError::UnknownExecutor(_))
        ));
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let mut reg = ResourceRegistry::new();
        reg.add_executor("e1".into(), 2).unwrap();
        assert!(matches!(
            reg.add_executor("e1".into(), 4),
            Err(RegistryError::DuplicateExecutor(_))
        ));
        assert_eq!(reg.snapshot().total_free_slots(), 2);
    }
}

// src/engine/policy.rs

//! Executor selection.
//!
//! Policies are pure functions of the request and the registry snapshot, so
//! the same inputs always produce the same placement.

use crate::dag::TaskGroupId;
use crate::exec::registry::{ExecutorView, RegistrySnapshot};
use crate::types::{ExecutorId, PlacementPolicy};

/// What the policy knows about the task group it is placing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlacementRequest<'a> {
    pub task_group: &'a TaskGroupId,
    /// Executors holding upstream output, best first. Empty when the stage
    /// has no locality preference.
    pub preferred: &'a [ExecutorId],
}

pub trait SchedulingPolicy: Send + std::fmt::Debug {
    /// Pick an executor with a free slot, or `None` if there is none.
    fn select_executor(
        &self,
        request: &PlacementRequest<'_>,
        snapshot: &RegistrySnapshot,
    ) -> Option<ExecutorId>;
}

/// Colocate with upstream output when possible, otherwise least loaded.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalityPolicy;

impl SchedulingPolicy for LocalityPolicy {
    fn select_executor(
        &self,
        request: &PlacementRequest<'_>,
        snapshot: &RegistrySnapshot,
    ) -> Option<ExecutorId> {
        let colocated = request
            .preferred
            .iter()
            .filter_map(|id| snapshot.get(id))
            .find(|e| e.free_slots() > 0);

        match colocated {
            Some(e) => Some(e.id.clone()),
            None => least_loaded(snapshot),
        }
    }
}

/// Most free slots wins; ties go to the smallest executor id.
#[derive(Debug, Clone, Copy, Default)]
pub struct LeastLoadedPolicy;

impl SchedulingPolicy for LeastLoadedPolicy {
    fn select_executor(
        &self,
        _request: &PlacementRequest<'_>,
        snapshot: &RegistrySnapshot,
    ) -> Option<ExecutorId> {
        least_loaded(snapshot)
    }
}

fn least_loaded(snapshot: &RegistrySnapshot) -> Option<ExecutorId> {
    snapshot
        .executors
        .iter()
        .filter(|e| e.free_slots() > 0)
        // Snapshot is sorted by id; `max_by_key` keeps the last maximum, so
        // reverse to let the smallest id win a tie.
        .rev()
        .max_by_key(|e| e.free_slots())
        .map(|e: &ExecutorView| e.id.clone())
}

/// Build the policy selected in configuration.
pub fn policy_for(placement: PlacementPolicy) -> Box<dyn SchedulingPolicy> {
    match placement {
        PlacementPolicy::Locality => Box::new(LocalityPolicy),
        PlacementPolicy::LeastLoaded => Box::new(LeastLoadedPolicy),
    }
}

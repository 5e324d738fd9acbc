// src/engine/mod.rs

//! Orchestration engine for stagedag.
//!
//! This module ties together:
//! - the pending-work queue and the scheduling policy
//! - the failure handler
//! - the orchestrator state machine that reacts to:
//!   - job submission and plan updates
//!   - executors joining and leaving
//!   - task-group state reports
//!   - termination
//!
//! The pure core state machine lives in [`core`]; the async/IO shell is
//! implemented in [`runtime`].

use crate::dag::{LaunchRequest, PhysicalPlan, TaskGroupId, TaskGroupState};
use crate::types::{Attempt, EscalationPolicy, ExecutorId, PlacementPolicy};

/// A state report from an executor for one attempt of a task group.
///
/// Attempt numbers restart with every job, so a report is only matched
/// against the job named by `job_id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskGroupReport {
    pub job_id: String,
    pub executor: ExecutorId,
    pub task_group: TaskGroupId,
    pub state: TaskGroupState,
    pub attempt: Attempt,
    /// Tasks paused by the executor; only meaningful with `OnHold`.
    pub held_tasks: Vec<String>,
    /// Only meaningful with the failed states.
    pub failure: Option<FailureCause>,
}

impl TaskGroupReport {
    /// Report a state without hold or failure details.
    pub fn new(
        job_id: impl Into<String>,
        executor: impl Into<ExecutorId>,
        task_group: TaskGroupId,
        state: TaskGroupState,
        attempt: Attempt,
    ) -> Self {
        Self {
            job_id: job_id.into(),
            executor: executor.into(),
            task_group,
            state,
            attempt,
            held_tasks: Vec::new(),
            failure: None,
        }
    }

    /// Report `state` for the attempt `launch` started.
    pub fn from_launch(launch: &LaunchRequest, state: TaskGroupState) -> Self {
        Self::new(
            launch.job_id.clone(),
            launch.executor.clone(),
            launch.task_group.clone(),
            state,
            launch.attempt,
        )
    }

    pub fn with_failure(mut self, cause: FailureCause) -> Self {
        self.failure = Some(cause);
        self
    }

    pub fn with_held_tasks(mut self, tasks: Vec<String>) -> Self {
        self.held_tasks = tasks;
        self
    }
}

/// Scheduler behaviour knobs shared by the core and the async shell.
#[derive(Debug, Clone, Copy, Default)]
pub struct SchedulerOptions {
    pub escalation: EscalationPolicy,
    pub placement: PlacementPolicy,
}

/// Events flowing into the core scheduler.
#[derive(Debug, Clone)]
pub enum CoreEvent {
    SubmitJob {
        plan: PhysicalPlan,
        max_schedule_attempt: u32,
    },
    /// Replace the plan of not-yet-started stages. `completed` names a task
    /// group (and the executor holding its output) to mark complete under
    /// the old plan first.
    UpdateJob {
        plan: PhysicalPlan,
        completed: Option<(ExecutorId, TaskGroupId)>,
    },
    ExecutorAdded {
        executor: ExecutorId,
        capacity: usize,
    },
    ExecutorRemoved {
        executor: ExecutorId,
    },
    TaskGroupStateChanged(TaskGroupReport),
    Terminate,
}

pub mod core;
pub mod event_handlers;
pub mod failure;
pub mod policy;
pub mod queue;
pub mod runtime;

pub use core::CoreScheduler;
pub use event_handlers::{CoreCommand, CoreStep};
pub use failure::{classify, FailureCause, FailureDecision};
pub use policy::{LeastLoadedPolicy, LocalityPolicy, PlacementRequest, SchedulingPolicy};
pub use queue::PendingQueue;
pub use runtime::{JobHandle, Runtime, SchedulerHandle};

// src/dag/task_group.rs

//! Task group identity, per-task-group state machine and bookkeeping.

use std::fmt;
use std::str::FromStr;

use crate::engine::failure::FailureCause;
use crate::types::{Attempt, ExecutorId, StageId};

/// Identity of a task group: `(stage id, index)`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskGroupId {
    pub stage: StageId,
    pub index: usize,
}

impl TaskGroupId {
    pub fn new(stage: impl Into<StageId>, index: usize) -> Self {
        Self {
            stage: stage.into(),
            index,
        }
    }
}

impl fmt::Display for TaskGroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.stage, self.index)
    }
}

impl FromStr for TaskGroupId {
    type Err = String;

    /// Parses the `"<stage>-<index>"` form produced by `Display`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (stage, index) = s
            .rsplit_once('-')
            .ok_or_else(|| format!("invalid task group id '{s}' (expected <stage>-<index>)"))?;
        let index = index
            .parse::<usize>()
            .map_err(|_| format!("invalid task group index in '{s}'"))?;
        if stage.is_empty() {
            return Err(format!("invalid task group id '{s}': empty stage"));
        }
        Ok(Self::new(stage, index))
    }
}

/// Per-task-group state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskGroupState {
    /// The owning stage is not eligible yet.
    Pending,
    /// Eligible and waiting for placement.
    Ready,
    /// Launched on an executor.
    Executing,
    /// Paused pending an external decision; keeps its slot.
    OnHold,
    Complete,
    FailedRecoverable,
    FailedUnrecoverable,
}

impl TaskGroupState {
    /// Whether `self -> to` is an edge of the state machine.
    ///
    /// `Complete -> Ready` only happens when a downstream fetch failure
    /// forces the output to be recomputed.
    pub fn can_transition_to(self, to: TaskGroupState) -> bool {
        use TaskGroupState::*;
        matches!(
            (self, to),
            (Pending, Ready)
                | (Ready, Executing)
                | (Ready, Pending)
                | (Executing, Complete)
                | (Executing, FailedRecoverable)
                | (Executing, FailedUnrecoverable)
                | (Executing, OnHold)
                | (OnHold, Executing)
                | (OnHold, Ready)
                | (OnHold, Complete)
                | (OnHold, FailedRecoverable)
                | (OnHold, FailedUnrecoverable)
                | (FailedRecoverable, Ready)
                | (FailedRecoverable, Pending)
                | (Complete, Ready)
        )
    }

    /// Launched and holding a slot.
    pub fn is_in_flight(self) -> bool {
        matches!(self, TaskGroupState::Executing | TaskGroupState::OnHold)
    }
}

impl fmt::Display for TaskGroupState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskGroupState::Pending => "PENDING",
            TaskGroupState::Ready => "READY",
            TaskGroupState::Executing => "EXECUTING",
            TaskGroupState::OnHold => "ON_HOLD",
            TaskGroupState::Complete => "COMPLETE",
            TaskGroupState::FailedRecoverable => "FAILED_RECOVERABLE",
            TaskGroupState::FailedUnrecoverable => "FAILED_UNRECOVERABLE",
        };
        f.write_str(s)
    }
}

/// Stage state, derived from the states of its task groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageState {
    /// Every task group is still `Pending`.
    Pending,
    /// At least one task group left `Pending` and not all are complete.
    Executing,
    Complete,
    /// A failure of one of its task groups was escalated.
    Failed,
}

/// Job-level state as seen by callers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobState {
    Executing,
    Complete,
    /// Unrecoverable failure; `cause` is the last escalation cause.
    Failed { cause: String },
    /// Stopped by `terminate()` before reaching a terminal state.
    Terminated,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobState::Executing)
    }
}

/// Bookkeeping the state store keeps for one task group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskGroupInfo {
    pub id: TaskGroupId,
    pub state: TaskGroupState,
    /// Number of launches so far.
    pub attempt: Attempt,
    /// Executor running the current attempt, while in flight.
    pub executor: Option<ExecutorId>,
    /// Executor holding this task group's output once complete.
    pub output_location: Option<ExecutorId>,
    /// Tasks reported as put on hold by the executor.
    pub held_tasks: Vec<String>,
    pub last_failure: Option<FailureCause>,
}

impl TaskGroupInfo {
    pub fn new(id: TaskGroupId) -> Self {
        Self {
            id,
            state: TaskGroupState::Pending,
            attempt: 0,
            executor: None,
            output_location: None,
            held_tasks: Vec::new(),
            last_failure: None,
        }
    }
}

/// Description of a task group the scheduler wants launched now.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchRequest {
    pub job_id: String,
    pub task_group: TaskGroupId,
    pub attempt: Attempt,
    pub executor: ExecutorId,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_round_trips_through_display_with_dashed_stage_names() {
        let id: TaskGroupId = "map-side-3".parse().unwrap();
        assert_eq!(id, TaskGroupId::new("map-side", 3));
        assert_eq!(id.to_string(), "map-side-3");
        assert!("nodash".parse::<TaskGroupId>().is_err());
        assert!("-1".parse::<TaskGroupId>().is_err());
    }

    #[test]
    fn unrecoverable_failure_is_terminal() {
        use TaskGroupState::*;
        for to in [Pending, Ready, Executing, OnHold, Complete, FailedRecoverable] {
            assert!(!FailedUnrecoverable.can_transition_to(to));
        }
        assert!(!Pending.can_transition_to(Executing));
        assert!(OnHold.can_transition_to(Ready));
    }

    #[test]
    fn completed_output_is_only_reset_to_ready() {
        use TaskGroupState::*;
        assert!(Complete.can_transition_to(Ready));
        assert!(!Complete.can_transition_to(Pending));
        assert!(!Complete.can_transition_to(Executing));
    }
}

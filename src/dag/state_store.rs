// src/dag/state_store.rs

//! Authoritative per-job state: every task group's state machine plus the
//! derived stage and job queries.

use std::collections::{BTreeMap, BTreeSet};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::dag::plan::{LocalityHint, PhysicalPlan};
use crate::dag::task_group::{JobState, StageState, TaskGroupId, TaskGroupInfo, TaskGroupState};
use crate::errors::{Result, StagedagError};
use crate::types::{Attempt, ExecutorId, StageId};

/// Why the store refused a transition. None of these mutate state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionRejected {
    #[error("unknown task group {0}")]
    UnknownTaskGroup(TaskGroupId),

    /// The report belongs to a superseded or duplicate attempt.
    #[error("stale attempt for {id}: reported {reported}, tracked {tracked}")]
    StaleAttempt {
        id: TaskGroupId,
        reported: Attempt,
        tracked: Attempt,
    },

    #[error("{id} is {actual}, expected {expected}")]
    UnexpectedState {
        id: TaskGroupId,
        expected: TaskGroupState,
        actual: TaskGroupState,
    },

    #[error("illegal transition for {id}: {from} -> {to}")]
    IllegalTransition {
        id: TaskGroupId,
        from: TaskGroupState,
        to: TaskGroupState,
    },
}

/// A transition the store accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub id: TaskGroupId,
    pub from: TaskGroupState,
    pub to: TaskGroupState,
    pub attempt: Attempt,
}

/// Point-in-time copy of a job's state, used for progress queries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSnapshot {
    pub job_id: String,
    pub plan_id: String,
    pub state: JobState,
    pub stages: BTreeMap<StageId, StageState>,
    pub task_groups: BTreeMap<TaskGroupId, TaskGroupInfo>,
}

impl JobSnapshot {
    pub fn stage_state(&self, stage: &str) -> Option<StageState> {
        self.stages.get(stage).copied()
    }

    pub fn task_group(&self, id: &TaskGroupId) -> Option<&TaskGroupInfo> {
        self.task_groups.get(id)
    }

    pub fn task_group_state(&self, id: &TaskGroupId) -> Option<TaskGroupState> {
        self.task_groups.get(id).map(|info| info.state)
    }
}

/// State store for one job run.
#[derive(Debug)]
pub struct JobStateStore {
    job_id: String,
    plan: PhysicalPlan,
    task_groups: BTreeMap<TaskGroupId, TaskGroupInfo>,
    failed_stages: BTreeSet<StageId>,
    job_state: JobState,
}

impl JobStateStore {
    /// Every task group starts `Pending` with attempt 0.
    pub fn new(job_id: impl Into<String>, plan: PhysicalPlan) -> Self {
        let task_groups = plan
            .stages()
            .flat_map(|stage| stage.task_group_ids())
            .map(|id| (id.clone(), TaskGroupInfo::new(id)))
            .collect();

        Self {
            job_id: job_id.into(),
            plan,
            task_groups,
            failed_stages: BTreeSet::new(),
            job_state: JobState::Executing,
        }
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn plan(&self) -> &PhysicalPlan {
        &self.plan
    }

    pub fn job_state(&self) -> &JobState {
        &self.job_state
    }

    pub fn task_group(&self, id: &TaskGroupId) -> Option<&TaskGroupInfo> {
        self.task_groups.get(id)
    }

    pub fn task_groups(&self) -> impl Iterator<Item = &TaskGroupInfo> {
        self.task_groups.values()
    }

    pub fn state_of(&self, id: &TaskGroupId) -> Option<TaskGroupState> {
        self.task_groups.get(id).map(|info| info.state)
    }

    /// Atomically move `id` to `to`.
    ///
    /// `attempt` is the attempt the transition belongs to. A launch
    /// (`Ready -> Executing`) must carry `tracked + 1` and becomes the new
    /// tracked attempt; every other transition must carry the tracked attempt.
    /// `from`, when given, must match the current state.
    pub fn transition(
        &mut self,
        id: &TaskGroupId,
        from: Option<TaskGroupState>,
        to: TaskGroupState,
        attempt: Attempt,
    ) -> std::result::Result<Transition, TransitionRejected> {
        let info = self
            .task_groups
            .get_mut(id)
            .ok_or_else(|| TransitionRejected::UnknownTaskGroup(id.clone()))?;

        let is_launch = info.state == TaskGroupState::Ready && to == TaskGroupState::Executing;
        let expected_attempt = if is_launch { info.attempt + 1 } else { info.attempt };
        if attempt != expected_attempt {
            return Err(TransitionRejected::StaleAttempt {
                id: id.clone(),
                reported: attempt,
                tracked: info.attempt,
            });
        }

        if let Some(expected) = from {
            if expected != info.state {
                return Err(TransitionRejected::UnexpectedState {
                    id: id.clone(),
                    expected,
                    actual: info.state,
                });
            }
        }

        let prev = info.state;
        if !prev.can_transition_to(to) {
            return Err(TransitionRejected::IllegalTransition {
                id: id.clone(),
                from: prev,
                to,
            });
        }

        info.state = to;
        info.attempt = attempt;
        if !to.is_in_flight() {
            info.executor = None;
        }
        if to != TaskGroupState::OnHold {
            info.held_tasks.clear();
        }
        if prev == TaskGroupState::Complete {
            info.output_location = None;
        }

        debug!(
            task_group = %id,
            attempt,
            from = %prev,
            to = %to,
            "task group transition"
        );

        Ok(Transition {
            id: id.clone(),
            from: prev,
            to,
            attempt,
        })
    }

    /// `Ready -> Executing` on `executor`, consuming a new attempt.
    pub fn launch(
        &mut self,
        id: &TaskGroupId,
        executor: &ExecutorId,
    ) -> std::result::Result<Transition, TransitionRejected> {
        let next = self.attempt_of(id).map(|a| a + 1).unwrap_or(1);
        let transition = self.transition(
            id,
            Some(TaskGroupState::Ready),
            TaskGroupState::Executing,
            next,
        )?;
        if let Some(info) = self.task_groups.get_mut(id) {
            info.executor = Some(executor.clone());
        }
        Ok(transition)
    }

    /// In-flight -> `Complete`, recording where the output lives.
    pub fn complete(
        &mut self,
        id: &TaskGroupId,
        attempt: Attempt,
        location: Option<ExecutorId>,
    ) -> std::result::Result<Transition, TransitionRejected> {
        let transition = self.transition(id, None, TaskGroupState::Complete, attempt)?;
        if let Some(info) = self.task_groups.get_mut(id) {
            info.output_location = location;
            info.last_failure = None;
        }
        Ok(transition)
    }

    /// `Executing -> OnHold`, remembering which tasks were paused.
    pub fn hold(
        &mut self,
        id: &TaskGroupId,
        attempt: Attempt,
        held_tasks: Vec<String>,
    ) -> std::result::Result<Transition, TransitionRejected> {
        let transition = self.transition(
            id,
            Some(TaskGroupState::Executing),
            TaskGroupState::OnHold,
            attempt,
        )?;
        if let Some(info) = self.task_groups.get_mut(id) {
            info.held_tasks = held_tasks;
        }
        Ok(transition)
    }

    /// Record the cause of the latest failure of `id`.
    pub fn record_failure(&mut self, id: &TaskGroupId, cause: crate::engine::FailureCause) {
        if let Some(info) = self.task_groups.get_mut(id) {
            info.last_failure = Some(cause);
        }
    }

    pub fn attempt_of(&self, id: &TaskGroupId) -> Option<Attempt> {
        self.task_groups.get(id).map(|info| info.attempt)
    }

    /// Derived stage state. `None` for unknown stages.
    pub fn stage_state(&self, stage: &str) -> Option<StageState> {
        let spec = self.plan.stage(stage)?;
        if self.failed_stages.contains(stage) {
            return Some(StageState::Failed);
        }

        let states: Vec<TaskGroupState> = spec
            .task_group_ids()
            .filter_map(|id| self.state_of(&id))
            .collect();

        if states.iter().all(|s| *s == TaskGroupState::Complete) {
            Some(StageState::Complete)
        } else if states.iter().all(|s| *s == TaskGroupState::Pending) {
            Some(StageState::Pending)
        } else {
            Some(StageState::Executing)
        }
    }

    pub fn is_stage_complete(&self, stage: &str) -> bool {
        self.stage_state(stage) == Some(StageState::Complete)
    }

    /// Whether every upstream stage of `stage` is complete.
    pub fn upstream_complete(&self, stage: &str) -> bool {
        self.plan
            .graph()
            .upstream_of(stage)
            .iter()
            .all(|up| self.is_stage_complete(up))
    }

    pub fn is_job_complete(&self) -> bool {
        self.task_groups
            .values()
            .all(|info| info.state == TaskGroupState::Complete)
    }

    pub fn is_job_failed(&self) -> bool {
        matches!(self.job_state, JobState::Failed { .. })
    }

    /// Move every `Pending` task group whose upstream stages are all complete
    /// to `Ready`, in topological stage order. Returns the promoted ids.
    pub fn promote_eligible(&mut self) -> Vec<TaskGroupId> {
        let mut promoted = Vec::new();

        for stage in self.plan.graph().topological_order() {
            if !self.upstream_complete(&stage) {
                continue;
            }

            let candidates: Vec<(TaskGroupId, Attempt)> = self
                .task_groups
                .range(TaskGroupId::new(stage.clone(), 0)..)
                .take_while(|(id, _)| id.stage == stage)
                .filter(|(_, info)| info.state == TaskGroupState::Pending)
                .map(|(id, info)| (id.clone(), info.attempt))
                .collect();

            for (id, attempt) in candidates {
                if self
                    .transition(&id, Some(TaskGroupState::Pending), TaskGroupState::Ready, attempt)
                    .is_ok()
                {
                    promoted.push(id);
                }
            }
        }

        if !promoted.is_empty() {
            debug!(count = promoted.len(), "task groups became eligible");
        }
        promoted
    }

    /// A `Ready` task group whose upstream regressed goes back to `Pending`.
    ///
    /// Returns `true` if it was demoted.
    pub fn demote_if_blocked(&mut self, id: &TaskGroupId) -> bool {
        let Some(attempt) = self.attempt_of(id) else {
            return false;
        };
        if self.state_of(id) != Some(TaskGroupState::Ready) || self.upstream_complete(&id.stage) {
            return false;
        }
        self.transition(id, Some(TaskGroupState::Ready), TaskGroupState::Pending, attempt)
            .is_ok()
    }

    /// Every launched attempt that still holds a slot.
    pub fn in_flight(&self) -> Vec<(TaskGroupId, Attempt, Option<ExecutorId>)> {
        self.task_groups
            .values()
            .filter(|info| info.state.is_in_flight())
            .map(|info| (info.id.clone(), info.attempt, info.executor.clone()))
            .collect()
    }

    /// Executors holding upstream output for `id`, best candidate first.
    ///
    /// Empty unless the stage declares [`LocalityHint::UpstreamOutput`].
    /// Executors holding the same-index upstream partition come first, the
    /// rest follow by number of upstream outputs held, then by id.
    pub fn preferred_locations(&self, id: &TaskGroupId) -> Vec<ExecutorId> {
        let Some(spec) = self.plan.stage(&id.stage) else {
            return Vec::new();
        };
        if spec.locality != LocalityHint::UpstreamOutput {
            return Vec::new();
        }

        let mut preferred: Vec<ExecutorId> = Vec::new();
        let mut counts: BTreeMap<ExecutorId, usize> = BTreeMap::new();

        for up in spec.upstream.iter() {
            let aligned = TaskGroupId::new(up.clone(), id.index);
            if let Some(loc) = self
                .task_groups
                .get(&aligned)
                .and_then(|info| info.output_location.clone())
            {
                if !preferred.contains(&loc) {
                    preferred.push(loc);
                }
            }

            for info in self.task_groups.values().filter(|info| &info.id.stage == up) {
                if let Some(loc) = info.output_location.as_ref() {
                    *counts.entry(loc.clone()).or_default() += 1;
                }
            }
        }

        let mut rest: Vec<(ExecutorId, usize)> = counts
            .into_iter()
            .filter(|(loc, _)| !preferred.contains(loc))
            .collect();
        rest.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        preferred.extend(rest.into_iter().map(|(loc, _)| loc));
        preferred
    }

    /// Forget outputs stored on a lost executor. Returns affected task groups.
    pub fn clear_locations_on(&mut self, executor: &str) -> Vec<TaskGroupId> {
        let mut cleared = Vec::new();
        for info in self.task_groups.values_mut() {
            if info.output_location.as_deref() == Some(executor) {
                info.output_location = None;
                cleared.push(info.id.clone());
            }
        }
        cleared
    }

    /// Escalation: the stage and the job are failed for good.
    pub fn fail_job(&mut self, stage: &str, cause: impl Into<String>) {
        let cause = cause.into();
        self.failed_stages.insert(stage.to_string());
        if !self.job_state.is_terminal() {
            warn!(job = %self.job_id, stage, cause = %cause, "job failed");
            self.job_state = JobState::Failed { cause };
        }
    }

    /// Mark the job complete if every task group is complete.
    ///
    /// Returns `true` if this call finished the job.
    pub fn maybe_finish_job(&mut self) -> bool {
        if self.job_state.is_terminal() || !self.is_job_complete() {
            return false;
        }
        info!(job = %self.job_id, "all stages complete; job finished");
        self.job_state = JobState::Complete;
        true
    }

    /// Record an explicit termination, unless the job already ended.
    pub fn mark_terminated(&mut self) {
        if !self.job_state.is_terminal() {
            self.job_state = JobState::Terminated;
        }
    }

    /// Check that `new_plan` keeps the shape of every stage that already
    /// left `Pending`.
    pub fn check_update(&self, new_plan: &PhysicalPlan) -> Result<()> {
        for stage in self.plan.stages() {
            let state = self.stage_state(&stage.id).unwrap_or(StageState::Pending);
            if state == StageState::Pending {
                continue;
            }

            match new_plan.stage(&stage.id) {
                None => {
                    return Err(StagedagError::InvalidUpdate(format!(
                        "stage '{}' is {:?} and cannot be removed",
                        stage.id, state
                    )));
                }
                Some(replacement) if !replacement.same_shape(stage) => {
                    return Err(StagedagError::InvalidUpdate(format!(
                        "stage '{}' is {:?} and cannot change its partitioning or upstream stages",
                        stage.id, state
                    )));
                }
                Some(_) => {}
            }
        }
        Ok(())
    }

    /// Switch to `new_plan`, keeping the bookkeeping of every started stage
    /// and rebuilding the task groups of stages that have not started.
    pub fn replace_plan(&mut self, new_plan: PhysicalPlan) -> Result<()> {
        self.check_update(&new_plan)?;

        let started: BTreeSet<StageId> = self
            .plan
            .stages()
            .filter(|s| self.stage_state(&s.id) != Some(StageState::Pending))
            .map(|s| s.id.clone())
            .collect();

        let mut task_groups = BTreeMap::new();
        for stage in new_plan.stages() {
            for id in stage.task_group_ids() {
                let info = if started.contains(&stage.id) {
                    self.task_groups
                        .remove(&id)
                        .unwrap_or_else(|| TaskGroupInfo::new(id.clone()))
                } else {
                    TaskGroupInfo::new(id.clone())
                };
                task_groups.insert(id, info);
            }
        }

        info!(
            job = %self.job_id,
            old_plan = %self.plan.id(),
            new_plan = %new_plan.id(),
            kept_stages = started.len(),
            "physical plan replaced"
        );

        self.task_groups = task_groups;
        self.plan = new_plan;
        Ok(())
    }

    pub fn snapshot(&self) -> JobSnapshot {
        let stages = self
            .plan
            .stages()
            .map(|s| {
                (
                    s.id.clone(),
                    self.stage_state(&s.id).unwrap_or(StageState::Pending),
                )
            })
            .collect();

        JobSnapshot {
            job_id: self.job_id.clone(),
            plan_id: self.plan.id().to_string(),
            state: self.job_state.clone(),
            stages,
            task_groups: self.task_groups.clone(),
        }
    }
}

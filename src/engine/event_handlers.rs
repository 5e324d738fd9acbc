// src/engine/event_handlers.rs

//! Event handling logic for the core scheduler.

use tracing::{debug, info, warn};

use crate::dag::{
    JobState, JobStateStore, LaunchRequest, PhysicalPlan, TaskGroupId, TaskGroupState,
    Transition, TransitionRejected,
};
use crate::engine::core::{ActiveJob, CoreScheduler};
use crate::engine::failure::{classify, FailureCause, FailureDecision};
use crate::engine::policy::{PlacementRequest, SchedulingPolicy};
use crate::engine::queue::PendingQueue;
use crate::engine::{SchedulerOptions, TaskGroupReport};
use crate::errors::StagedagError;
use crate::exec::registry::ResourceRegistry;
use crate::metrics::MetricEvent;
use crate::types::{Attempt, EscalationPolicy, ExecutorId};

/// Command produced by the pure core, to be executed by the outer IO shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoreCommand {
    /// Ship this task group attempt to its executor.
    Launch(LaunchRequest),
    /// Stop an in-flight attempt. Fire-and-forget: its slot is already free.
    Cancel {
        executor: ExecutorId,
        task_group: TaskGroupId,
        attempt: Attempt,
    },
    /// Forward to the metric sink.
    Metric(MetricEvent),
    /// The job reached a terminal state.
    JobFinished { job_id: String, state: JobState },
}

/// Decision returned by the core after handling a single event.
#[derive(Debug)]
pub struct CoreStep {
    /// Commands the IO shell should execute, in order.
    pub commands: Vec<CoreCommand>,
    /// Whether the outer runtime loop should keep running.
    pub keep_running: bool,
    /// Set when the event was rejected (e.g. an invalid plan update). The
    /// commands still have to be executed.
    pub error: Option<StagedagError>,
}

impl CoreStep {
    fn running(commands: Vec<CoreCommand>) -> Self {
        Self {
            commands,
            keep_running: true,
            error: None,
        }
    }

    fn rejected(commands: Vec<CoreCommand>, error: StagedagError) -> Self {
        Self {
            commands,
            keep_running: true,
            error: Some(error),
        }
    }

    pub(crate) fn stopped() -> Self {
        Self {
            commands: Vec::new(),
            keep_running: false,
            error: None,
        }
    }
}

/// Mutable view over the latest job plus the shared scheduling parts.
///
/// Every handler that touches a job goes through this type so the state
/// store, registry and queue are updated together.
pub(crate) struct JobContext<'a> {
    pub(crate) store: &'a mut JobStateStore,
    pub(crate) max_schedule_attempt: u32,
    pub(crate) registry: &'a mut ResourceRegistry,
    pub(crate) queue: &'a mut PendingQueue,
    pub(crate) policy: &'a dyn SchedulingPolicy,
    pub(crate) options: SchedulerOptions,
    pub(crate) commands: Vec<CoreCommand>,
}

impl CoreScheduler {
    /// Submit a job: build its state, seed the source stages and schedule.
    pub(crate) fn handle_submit(&mut self, plan: PhysicalPlan, max_schedule_attempt: u32) -> CoreStep {
        if let Some(job) = self.job.as_ref() {
            if !job.store.job_state().is_terminal() {
                let active = job.store.job_id().to_string();
                warn!(job = %active, plan = %plan.id(), "rejecting submission while a job is active");
                return CoreStep::rejected(Vec::new(), StagedagError::JobAlreadyActive(active));
            }
        }

        let mut commands = Vec::new();

        // Attempts the previous job left running can no longer be tracked.
        for (executor, task_group, attempt) in self.registry.release_all() {
            commands.push(CoreCommand::Cancel {
                executor,
                task_group,
                attempt,
            });
        }
        self.queue.clear();

        self.jobs_submitted += 1;
        let job_id = format!("{}-{}", plan.id(), self.jobs_submitted);
        info!(
            job = %job_id,
            stages = plan.stages().count(),
            task_groups = plan.task_group_count(),
            max_schedule_attempt,
            "job submitted"
        );

        self.job = Some(ActiveJob {
            store: JobStateStore::new(job_id, plan),
            max_schedule_attempt,
        });

        let Some(mut ctx) = self.job_context() else {
            return CoreStep::running(commands);
        };
        ctx.promote_eligible();
        ctx.schedule();
        commands.append(&mut ctx.commands);
        CoreStep::running(commands)
    }

    /// Swap in a new plan for stages that have not started yet.
    pub(crate) fn handle_update(
        &mut self,
        plan: PhysicalPlan,
        completed: Option<(ExecutorId, TaskGroupId)>,
    ) -> CoreStep {
        let Some(mut ctx) = self.job_context() else {
            return CoreStep::rejected(Vec::new(), StagedagError::NoActiveJob);
        };
        if ctx.store.job_state().is_terminal() {
            return CoreStep::rejected(Vec::new(), StagedagError::NoActiveJob);
        }

        // Completion is booked under the old plan, before eligibility is
        // recomputed, so downstream stages are still `Pending` below.
        if let Some((executor, task_group)) = completed {
            ctx.complete_for_update(&executor, &task_group);
        }

        let result = ctx.store.replace_plan(plan);
        if let Err(err) = &result {
            warn!(job = %ctx.store.job_id(), error = %err, "plan update rejected; keeping current plan");
        }

        ctx.promote_eligible();
        if !ctx.finish_if_done() {
            ctx.schedule();
        }

        match result {
            Ok(()) => CoreStep::running(ctx.commands),
            Err(err) => CoreStep::rejected(ctx.commands, err),
        }
    }

    pub(crate) fn handle_executor_added(&mut self, executor: ExecutorId, capacity: usize) -> CoreStep {
        if let Err(err) = self.registry.add_executor(executor.clone(), capacity) {
            warn!(executor = %executor, error = %err, "ignoring executor registration");
            return CoreStep::running(Vec::new());
        }

        match self.job_context() {
            Some(mut ctx) => {
                ctx.schedule();
                CoreStep::running(ctx.commands)
            }
            None => CoreStep::running(Vec::new()),
        }
    }

    /// Every attempt orphaned by the removal goes through the same failure
    /// path as a reported recoverable failure.
    pub(crate) fn handle_executor_removed(&mut self, executor: ExecutorId) -> CoreStep {
        let orphaned = match self.registry.remove_executor(&executor) {
            Ok(orphaned) => orphaned,
            Err(err) => {
                warn!(executor = %executor, error = %err, "ignoring executor removal");
                return CoreStep::running(Vec::new());
            }
        };

        let Some(mut ctx) = self.job_context() else {
            return CoreStep::running(Vec::new());
        };

        let lost_outputs = ctx.store.clear_locations_on(&executor);
        if !lost_outputs.is_empty() {
            debug!(executor = %executor, outputs = lost_outputs.len(), "forgot output locations on removed executor");
        }

        for (task_group, attempt) in orphaned {
            info!(
                executor = %executor,
                task_group = %task_group,
                attempt,
                "attempt orphaned by executor removal"
            );
            ctx.handle_failure(
                &task_group,
                attempt,
                TaskGroupState::FailedRecoverable,
                FailureCause::ExecutorLost {
                    executor: executor.clone(),
                },
            );
        }

        ctx.schedule();
        CoreStep::running(ctx.commands)
    }

    pub(crate) fn handle_state_changed(&mut self, report: TaskGroupReport) -> CoreStep {
        let Some(mut ctx) = self.job_context() else {
            debug!(task_group = %report.task_group, "state report with no job; dropping");
            return CoreStep::running(Vec::new());
        };

        ctx.apply_report(report);
        ctx.schedule();
        CoreStep::running(ctx.commands)
    }

    /// Stop scheduling, cancel in-flight work, free every slot. The state
    /// store is left as observed for post-mortem queries.
    pub(crate) fn handle_terminate(&mut self) -> CoreStep {
        self.terminated = true;
        let mut commands = Vec::new();

        if let Some(job) = self.job.as_mut() {
            let was_running = !job.store.job_state().is_terminal();
            job.store.mark_terminated();
            if was_running {
                commands.push(CoreCommand::JobFinished {
                    job_id: job.store.job_id().to_string(),
                    state: job.store.job_state().clone(),
                });
            }
        }

        for (executor, task_group, attempt) in self.registry.release_all() {
            commands.push(CoreCommand::Cancel {
                executor,
                task_group,
                attempt,
            });
        }
        self.queue.clear();

        info!(cancelled = commands.len(), "scheduler terminated");
        CoreStep {
            commands,
            keep_running: false,
            error: None,
        }
    }
}

impl JobContext<'_> {
    fn accepting(&self) -> bool {
        !self.store.job_state().is_terminal()
    }

    fn record_transition(&mut self, t: &Transition) {
        self.commands.push(CoreCommand::Metric(MetricEvent::TaskGroupTransition {
            job_id: self.store.job_id().to_string(),
            task_group: t.id.clone(),
            from: t.from,
            to: t.to,
            attempt: t.attempt,
        }));
    }

    fn drop_stale(&mut self, task_group: &TaskGroupId, attempt: Attempt, rejected: &TransitionRejected) {
        debug!(task_group = %task_group, attempt, reason = %rejected, "dropping stale event");
        self.commands.push(CoreCommand::Metric(MetricEvent::StaleEventDropped {
            task_group: task_group.clone(),
            attempt,
            reason: rejected.to_string(),
        }));
    }

    /// Promote newly eligible task groups and offer them.
    pub(crate) fn promote_eligible(&mut self) {
        if !self.accepting() {
            return;
        }
        for id in self.store.promote_eligible() {
            let attempt = self.store.attempt_of(&id).unwrap_or(0);
            self.record_transition(&Transition {
                id: id.clone(),
                from: TaskGroupState::Pending,
                to: TaskGroupState::Ready,
                attempt,
            });
            self.queue.offer(id);
        }
    }

    /// Place queued task groups until the queue is empty or no executor has
    /// a free slot.
    pub(crate) fn schedule(&mut self) {
        if !self.accepting() {
            return;
        }

        while let Some(id) = self.queue.poll() {
            if self.store.state_of(&id) != Some(TaskGroupState::Ready) {
                debug!(task_group = %id, "queued task group no longer ready; skipping");
                continue;
            }
            if self.store.demote_if_blocked(&id) {
                debug!(task_group = %id, "upstream stage incomplete again; back to pending");
                continue;
            }

            let preferred = self.store.preferred_locations(&id);
            let snapshot = self.registry.snapshot();
            let request = PlacementRequest {
                task_group: &id,
                preferred: &preferred,
            };

            let Some(executor) = self.policy.select_executor(&request, &snapshot) else {
                debug!(
                    task_group = %id,
                    queued = self.queue.len() + 1,
                    "no free slot; waiting for capacity"
                );
                self.queue.offer(id);
                break;
            };

            let attempt = self.store.attempt_of(&id).unwrap_or(0) + 1;
            if let Err(err) = self.registry.reserve_slot(&executor, &id, attempt) {
                warn!(task_group = %id, executor = %executor, error = %err, "policy chose an unusable executor");
                self.queue.offer(id);
                break;
            }

            match self.store.launch(&id, &executor) {
                Ok(t) => {
                    info!(task_group = %id, attempt, executor = %executor, "launching task group");
                    self.record_transition(&t);
                    let job_id = self.store.job_id().to_string();
                    self.commands.push(CoreCommand::Metric(MetricEvent::Launched {
                        job_id: job_id.clone(),
                        task_group: id.clone(),
                        attempt,
                        executor: executor.clone(),
                    }));
                    self.commands.push(CoreCommand::Launch(LaunchRequest {
                        job_id,
                        task_group: id,
                        attempt,
                        executor,
                    }));
                }
                Err(rejected) => {
                    warn!(task_group = %id, error = %rejected, "launch rejected by state store");
                    self.registry.release_slot(&executor, &id);
                }
            }
        }
    }

    /// Route one executor report through the state store.
    pub(crate) fn apply_report(&mut self, report: TaskGroupReport) {
        let TaskGroupReport {
            job_id,
            executor,
            task_group,
            state,
            attempt,
            held_tasks,
            failure,
        } = report;

        if job_id != self.store.job_id() {
            debug!(
                task_group = %task_group,
                attempt,
                report_job = %job_id,
                job = %self.store.job_id(),
                "report for another job"
            );
            self.commands.push(CoreCommand::Metric(MetricEvent::StaleEventDropped {
                task_group,
                attempt,
                reason: format!("report belongs to job '{job_id}'"),
            }));
            return;
        }

        let Some(info) = self.store.task_group(&task_group) else {
            self.drop_stale(&task_group, attempt, &TransitionRejected::UnknownTaskGroup(task_group.clone()));
            return;
        };
        if info.state.is_in_flight() && info.executor.as_ref() != Some(&executor) {
            debug!(
                task_group = %task_group,
                reported_by = %executor,
                tracked = ?info.executor,
                "report from an executor not running this attempt"
            );
            self.commands.push(CoreCommand::Metric(MetricEvent::StaleEventDropped {
                task_group: task_group.clone(),
                attempt,
                reason: format!("reported by '{executor}', not the executor running it"),
            }));
            return;
        }

        match state {
            TaskGroupState::Complete => self.handle_complete(&task_group, attempt, executor),
            TaskGroupState::FailedRecoverable => {
                let cause = failure.unwrap_or(FailureCause::Unspecified);
                self.handle_failure(&task_group, attempt, state, cause);
            }
            TaskGroupState::FailedUnrecoverable => {
                let cause = match failure {
                    Some(FailureCause::Unrecoverable { reason }) => FailureCause::Unrecoverable { reason },
                    Some(other) => FailureCause::Unrecoverable {
                        reason: other.to_string(),
                    },
                    None => FailureCause::Unrecoverable {
                        reason: format!("{task_group} reported unrecoverable by '{executor}'"),
                    },
                };
                self.handle_failure(&task_group, attempt, state, cause);
            }
            TaskGroupState::OnHold => match self.store.hold(&task_group, attempt, held_tasks) {
                Ok(t) => {
                    info!(task_group = %task_group, attempt, "task group on hold; keeping its slot");
                    self.record_transition(&t);
                }
                Err(rejected) => self.drop_stale(&task_group, attempt, &rejected),
            },
            TaskGroupState::Executing => {
                match self.store.transition(
                    &task_group,
                    Some(TaskGroupState::OnHold),
                    TaskGroupState::Executing,
                    attempt,
                ) {
                    Ok(t) => {
                        debug!(task_group = %task_group, attempt, "task group resumed");
                        self.record_transition(&t);
                    }
                    Err(rejected) => self.drop_stale(&task_group, attempt, &rejected),
                }
            }
            TaskGroupState::Ready => {
                // The executor gave the held task group back.
                match self.store.transition(
                    &task_group,
                    Some(TaskGroupState::OnHold),
                    TaskGroupState::Ready,
                    attempt,
                ) {
                    Ok(t) => {
                        self.record_transition(&t);
                        self.registry.release_slot(&executor, &task_group);
                        self.requeue(&task_group);
                    }
                    Err(rejected) => self.drop_stale(&task_group, attempt, &rejected),
                }
            }
            TaskGroupState::Pending => {
                warn!(task_group = %task_group, attempt, "executors cannot report PENDING; dropping");
            }
        }
    }

    fn handle_complete(&mut self, task_group: &TaskGroupId, attempt: Attempt, executor: ExecutorId) {
        let running_on = self
            .store
            .task_group(task_group)
            .and_then(|info| info.executor.clone());

        match self.store.complete(task_group, attempt, Some(executor)) {
            Ok(t) => {
                debug!(task_group = %task_group, attempt, "task group complete");
                self.record_transition(&t);
                if let Some(running_on) = running_on {
                    self.registry.release_slot(&running_on, task_group);
                }
                self.promote_eligible();
                self.finish_if_done();
            }
            Err(rejected) => self.drop_stale(task_group, attempt, &rejected),
        }
    }

    /// Complete the task group named by a plan update (usually `OnHold`).
    fn complete_for_update(&mut self, executor: &ExecutorId, task_group: &TaskGroupId) {
        let Some(info) = self.store.task_group(task_group) else {
            warn!(task_group = %task_group, "plan update names an unknown task group");
            return;
        };
        let attempt = info.attempt;
        let running_on = info.executor.clone();

        match self.store.complete(task_group, attempt, Some(executor.clone())) {
            Ok(t) => {
                info!(task_group = %task_group, attempt, "task group completed by plan update");
                self.record_transition(&t);
                if let Some(running_on) = running_on {
                    self.registry.release_slot(&running_on, task_group);
                }
            }
            Err(rejected) => {
                warn!(task_group = %task_group, error = %rejected, "could not complete task group for plan update");
            }
        }
    }

    /// Record a failed attempt and retry or escalate it.
    ///
    /// `reported` is `FailedRecoverable` or `FailedUnrecoverable`; it only
    /// matters once the job has ended and nothing is acted on anymore.
    pub(crate) fn handle_failure(
        &mut self,
        task_group: &TaskGroupId,
        attempt: Attempt,
        reported: TaskGroupState,
        cause: FailureCause,
    ) {
        let running_on = self
            .store
            .task_group(task_group)
            .and_then(|info| info.executor.clone());

        // Once the job ended, failures are recorded but never acted on.
        if !self.accepting() {
            match self.store.transition(task_group, None, reported, attempt) {
                Ok(t) => {
                    self.record_transition(&t);
                    self.store.record_failure(task_group, cause);
                    if let Some(running_on) = running_on {
                        self.registry.release_slot(&running_on, task_group);
                    }
                }
                Err(rejected) => self.drop_stale(task_group, attempt, &rejected),
            }
            return;
        }

        // Unrecoverable reports always carry `FailureCause::Unrecoverable`.
        let decision = classify(&cause, attempt, self.max_schedule_attempt);
        let target = match decision {
            FailureDecision::Retry { .. } => TaskGroupState::FailedRecoverable,
            FailureDecision::Escalate { .. } => TaskGroupState::FailedUnrecoverable,
        };

        let transition = match self.store.transition(task_group, None, target, attempt) {
            Ok(t) => t,
            Err(rejected) => {
                self.drop_stale(task_group, attempt, &rejected);
                return;
            }
        };
        self.record_transition(&transition);
        self.store.record_failure(task_group, cause.clone());
        if let Some(running_on) = running_on {
            self.registry.release_slot(&running_on, task_group);
        }

        match decision {
            FailureDecision::Retry { recompute } => {
                info!(task_group = %task_group, attempt, cause = %cause, "retrying task group");
                if let Some(upstream) = recompute {
                    self.recompute(&upstream);
                }
                match self.store.transition(
                    task_group,
                    Some(TaskGroupState::FailedRecoverable),
                    TaskGroupState::Ready,
                    attempt,
                ) {
                    Ok(t) => {
                        self.record_transition(&t);
                        self.requeue(task_group);
                    }
                    Err(rejected) => {
                        warn!(task_group = %task_group, error = %rejected, "could not re-ready failed task group");
                    }
                }
            }
            FailureDecision::Escalate { reason } => self.escalate(task_group, reason),
        }
    }

    /// Re-execute a completed upstream task group whose output went missing.
    fn recompute(&mut self, upstream: &TaskGroupId) {
        let Some(info) = self.store.task_group(upstream) else {
            warn!(task_group = %upstream, "fetch failure names an unknown upstream task group");
            return;
        };
        if info.state != TaskGroupState::Complete {
            debug!(task_group = %upstream, state = %info.state, "upstream already being recomputed");
            return;
        }

        let attempt = info.attempt;
        match self.store.transition(
            upstream,
            Some(TaskGroupState::Complete),
            TaskGroupState::Ready,
            attempt,
        ) {
            Ok(t) => {
                info!(task_group = %upstream, "recomputing upstream output");
                self.record_transition(&t);
                self.requeue(upstream);
            }
            Err(rejected) => {
                warn!(task_group = %upstream, error = %rejected, "could not reset upstream task group");
            }
        }
    }

    /// Offer a `Ready` task group at the tail, or park it as `Pending` if an
    /// upstream stage is incomplete again.
    fn requeue(&mut self, task_group: &TaskGroupId) {
        if self.store.demote_if_blocked(task_group) {
            debug!(task_group = %task_group, "waiting for upstream recomputation");
            return;
        }
        self.queue.offer(task_group.clone());
    }

    /// Fail the owning stage and the job; stop all further scheduling.
    fn escalate(&mut self, task_group: &TaskGroupId, reason: String) {
        warn!(task_group = %task_group, reason = %reason, "escalating failure; job failed");
        self.store.fail_job(&task_group.stage, reason.clone());

        let job_id = self.store.job_id().to_string();
        self.commands.push(CoreCommand::Metric(MetricEvent::Escalated {
            job_id: job_id.clone(),
            task_group: task_group.clone(),
            reason,
        }));
        self.queue.clear();

        if self.options.escalation == EscalationPolicy::CancelRunning {
            // Cancelled attempts end as FAILED_UNRECOVERABLE; their late
            // reports are illegal transitions from here on.
            for (id, attempt, executor) in self.store.in_flight() {
                if let Some(executor) = executor {
                    if self.registry.release_slot(&executor, &id).is_some() {
                        self.commands.push(CoreCommand::Cancel {
                            executor,
                            task_group: id.clone(),
                            attempt,
                        });
                    }
                }
                match self.store.transition(&id, None, TaskGroupState::FailedUnrecoverable, attempt) {
                    Ok(t) => {
                        self.record_transition(&t);
                        self.store.record_failure(
                            &id,
                            FailureCause::Unrecoverable {
                                reason: format!("cancelled after {task_group} escalated"),
                            },
                        );
                    }
                    Err(rejected) => {
                        warn!(task_group = %id, error = %rejected, "could not record cancelled attempt");
                    }
                }
            }
        }

        self.commands.push(CoreCommand::JobFinished {
            job_id,
            state: self.store.job_state().clone(),
        });
    }

    /// Announce job completion once every task group is complete.
    ///
    /// Returns `true` if the job just finished.
    pub(crate) fn finish_if_done(&mut self) -> bool {
        if !self.store.maybe_finish_job() {
            return false;
        }
        let job_id = self.store.job_id().to_string();
        self.queue.clear();
        self.commands.push(CoreCommand::Metric(MetricEvent::JobCompleted {
            job_id: job_id.clone(),
        }));
        self.commands.push(CoreCommand::JobFinished {
            job_id,
            state: JobState::Complete,
        });
        true
    }
}

#![allow(dead_code)]

use stagedag::dag::{JobSnapshot, LaunchRequest, PhysicalPlan, TaskGroupId, TaskGroupState};
use stagedag::engine::{
    CoreCommand, CoreEvent, CoreScheduler, CoreStep, FailureCause, SchedulerOptions,
    TaskGroupReport,
};
use stagedag::metrics::MetricEvent;
use stagedag::types::Attempt;

/// Drives a [`CoreScheduler`] synchronously and keeps every command it
/// produced, so tests can assert on launches without an async runtime.
pub struct CoreHarness {
    pub core: CoreScheduler,
    pub commands: Vec<CoreCommand>,
}

impl CoreHarness {
    pub fn new() -> Self {
        Self::with_options(SchedulerOptions::default())
    }

    pub fn with_options(options: SchedulerOptions) -> Self {
        Self {
            core: CoreScheduler::new(options),
            commands: Vec::new(),
        }
    }

    /// Step the core, remember its commands and return the step.
    pub fn step(&mut self, event: CoreEvent) -> CoreStep {
        let step = self.core.step(event);
        self.commands.extend(step.commands.iter().cloned());
        step
    }

    pub fn add_executor(&mut self, id: &str, capacity: usize) -> Vec<LaunchRequest> {
        let step = self.step(CoreEvent::ExecutorAdded {
            executor: id.to_string(),
            capacity,
        });
        launches_in(&step)
    }

    pub fn remove_executor(&mut self, id: &str) -> Vec<LaunchRequest> {
        let step = self.step(CoreEvent::ExecutorRemoved {
            executor: id.to_string(),
        });
        launches_in(&step)
    }

    pub fn submit(&mut self, plan: PhysicalPlan, max_schedule_attempt: u32) -> Vec<LaunchRequest> {
        let step = self.step(CoreEvent::SubmitJob {
            plan,
            max_schedule_attempt,
        });
        assert!(step.error.is_none(), "submit rejected: {:?}", step.error);
        launches_in(&step)
    }

    pub fn report(&mut self, report: TaskGroupReport) -> Vec<LaunchRequest> {
        let step = self.step(CoreEvent::TaskGroupStateChanged(report));
        launches_in(&step)
    }

    /// Report `COMPLETE` for a launch, from the executor it was sent to.
    pub fn complete(&mut self, launch: &LaunchRequest) -> Vec<LaunchRequest> {
        self.report(TaskGroupReport::from_launch(launch, TaskGroupState::Complete))
    }

    /// Report a recoverable failure for a launch.
    pub fn fail(&mut self, launch: &LaunchRequest, cause: FailureCause) -> Vec<LaunchRequest> {
        self.report(
            TaskGroupReport::from_launch(launch, TaskGroupState::FailedRecoverable)
                .with_failure(cause),
        )
    }

    /// Complete launches until no new ones appear; returns every launch seen.
    pub fn drain(&mut self, mut pending: Vec<LaunchRequest>) -> Vec<LaunchRequest> {
        let mut seen = Vec::new();
        while let Some(launch) = pending.pop() {
            let next = self.complete(&launch);
            seen.push(launch);
            pending.extend(next);
        }
        seen
    }

    pub fn snapshot(&self) -> JobSnapshot {
        self.core.snapshot().expect("no job submitted")
    }

    pub fn state_of(&self, stage: &str, index: usize) -> Option<TaskGroupState> {
        self.snapshot().task_group_state(&TaskGroupId::new(stage, index))
    }

    pub fn attempt_of(&self, stage: &str, index: usize) -> Attempt {
        self.snapshot()
            .task_group(&TaskGroupId::new(stage, index))
            .map(|info| info.attempt)
            .unwrap_or(0)
    }

    pub fn metrics(&self) -> Vec<MetricEvent> {
        self.commands
            .iter()
            .filter_map(|c| match c {
                CoreCommand::Metric(event) => Some(event.clone()),
                _ => None,
            })
            .collect()
    }

    /// Every cancel emitted so far, as `(executor, task group, attempt)`.
    pub fn cancels(&self) -> Vec<(String, TaskGroupId, Attempt)> {
        self.commands
            .iter()
            .filter_map(|c| match c {
                CoreCommand::Cancel {
                    executor,
                    task_group,
                    attempt,
                } => Some((executor.clone(), task_group.clone(), *attempt)),
                _ => None,
            })
            .collect()
    }
}

impl Default for CoreHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// Launch commands of one step, in emission order.
pub fn launches_in(step: &CoreStep) -> Vec<LaunchRequest> {
    step.commands
        .iter()
        .filter_map(|c| match c {
            CoreCommand::Launch(request) => Some(request.clone()),
            _ => None,
        })
        .collect()
}

/// Shorthand for `TaskGroupId::new`.
pub fn tg(stage: &str, index: usize) -> TaskGroupId {
    TaskGroupId::new(stage, index)
}

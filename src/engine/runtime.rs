// src/engine/runtime.rs

use std::collections::VecDeque;
use std::fmt;

use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

use crate::dag::{JobSnapshot, JobState, PhysicalPlan, StageState, TaskGroupId, TaskGroupState};
use crate::engine::FailureCause;
use crate::errors::{Result, StagedagError};
use crate::exec::ExecutorBackend;
use crate::metrics::MetricSink;
use crate::types::ExecutorId;

use super::core::CoreScheduler;
use super::{CoreCommand, CoreEvent, TaskGroupReport};

/// Events accepted by the runtime loop.
///
/// Submissions and updates carry a reply channel; everything else is
/// fire-and-forget, exactly as executors deliver it.
#[derive(Debug)]
pub enum RuntimeEvent {
    Submit {
        plan: PhysicalPlan,
        max_schedule_attempt: u32,
        reply: oneshot::Sender<Result<JobHandle>>,
    },
    Update {
        plan: PhysicalPlan,
        completed: Option<(ExecutorId, TaskGroupId)>,
        reply: oneshot::Sender<Result<()>>,
    },
    Core(CoreEvent),
}

/// Cloneable entry point into a running scheduler.
#[derive(Debug, Clone)]
pub struct SchedulerHandle {
    tx: mpsc::Sender<RuntimeEvent>,
}

impl SchedulerHandle {
    /// Create a handle plus the receiver the [`Runtime`] consumes.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<RuntimeEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    pub async fn submit_job(&self, plan: PhysicalPlan, max_schedule_attempt: u32) -> Result<JobHandle> {
        let (reply, rx) = oneshot::channel();
        self.send(RuntimeEvent::Submit {
            plan,
            max_schedule_attempt,
            reply,
        })
        .await?;
        rx.await.map_err(|_| StagedagError::SchedulerClosed)?
    }

    /// Replace the plan of stages that have not started.
    ///
    /// `completed` names a task group to mark complete first, together with
    /// the executor holding its output.
    pub async fn update_job(
        &self,
        plan: PhysicalPlan,
        completed: Option<(ExecutorId, TaskGroupId)>,
    ) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(RuntimeEvent::Update {
            plan,
            completed,
            reply,
        })
        .await?;
        rx.await.map_err(|_| StagedagError::SchedulerClosed)?
    }

    pub async fn on_executor_added(&self, executor: impl Into<ExecutorId>, capacity: usize) -> Result<()> {
        self.send(RuntimeEvent::Core(CoreEvent::ExecutorAdded {
            executor: executor.into(),
            capacity,
        }))
        .await
    }

    pub async fn on_executor_removed(&self, executor: impl Into<ExecutorId>) -> Result<()> {
        self.send(RuntimeEvent::Core(CoreEvent::ExecutorRemoved {
            executor: executor.into(),
        }))
        .await
    }

    pub async fn on_task_group_state_changed(&self, report: TaskGroupReport) -> Result<()> {
        self.send(RuntimeEvent::Core(CoreEvent::TaskGroupStateChanged(report)))
            .await
    }

    pub async fn terminate(&self) -> Result<()> {
        self.send(RuntimeEvent::Core(CoreEvent::Terminate)).await
    }

    async fn send(&self, event: RuntimeEvent) -> Result<()> {
        self.tx
            .send(event)
            .await
            .map_err(|_| StagedagError::SchedulerClosed)
    }
}

/// Read-only view of one submitted job.
///
/// Snapshots are published by the runtime after every event that touched
/// the job, so queries never block the scheduler.
#[derive(Debug, Clone)]
pub struct JobHandle {
    job_id: String,
    rx: watch::Receiver<JobSnapshot>,
}

impl JobHandle {
    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn state(&self) -> JobState {
        self.rx.borrow().state.clone()
    }

    pub fn stage_state(&self, stage: &str) -> Option<StageState> {
        self.rx.borrow().stage_state(stage)
    }

    pub fn task_group_state(&self, id: &TaskGroupId) -> Option<TaskGroupState> {
        self.rx.borrow().task_group_state(id)
    }

    pub fn snapshot(&self) -> JobSnapshot {
        self.rx.borrow().clone()
    }

    /// Wait until the job is complete, failed or terminated.
    pub async fn wait_for_terminal(&mut self) -> Result<JobState> {
        let snapshot = self
            .rx
            .wait_for(|s| s.state.is_terminal())
            .await
            .map_err(|_| StagedagError::SchedulerClosed)?;
        Ok(snapshot.state.clone())
    }
}

/// Drives the [`CoreScheduler`] in response to `RuntimeEvent`s and delegates
/// launches and cancels to an `ExecutorBackend`.
///
/// This is a pure IO shell around the core, which contains all the
/// scheduling semantics.
pub struct Runtime<E: ExecutorBackend, M: MetricSink> {
    core: CoreScheduler,
    event_rx: mpsc::Receiver<RuntimeEvent>,
    executor: E,
    metrics: M,
    snapshots: Option<watch::Sender<JobSnapshot>>,
}

impl<E: ExecutorBackend, M: MetricSink> fmt::Debug for Runtime<E, M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("core", &self.core)
            .finish_non_exhaustive()
    }
}

impl<E: ExecutorBackend, M: MetricSink> Runtime<E, M> {
    pub fn new(
        core: CoreScheduler,
        event_rx: mpsc::Receiver<RuntimeEvent>,
        executor: E,
        metrics: M,
    ) -> Self {
        Self {
            core,
            event_rx,
            executor,
            metrics,
            snapshots: None,
        }
    }

    /// Main event loop.
    ///
    /// - Consumes `RuntimeEvent`s in arrival order.
    /// - Feeds them into the core scheduler.
    /// - Executes the commands it returns and publishes the job snapshot.
    ///
    /// Returns once `terminate` was handled or every handle was dropped.
    pub async fn run(mut self) -> Result<()> {
        info!("stagedag scheduler started");

        while let Some(event) = self.event_rx.recv().await {
            debug!(?event, "runtime received event");

            let keep_running = match event {
                RuntimeEvent::Submit {
                    plan,
                    max_schedule_attempt,
                    reply,
                } => self.submit(plan, max_schedule_attempt, reply).await,
                RuntimeEvent::Update {
                    plan,
                    completed,
                    reply,
                } => {
                    let step = self.core.step(CoreEvent::UpdateJob { plan, completed });
                    let keep_running = step.keep_running;
                    let outcome = match step.error {
                        Some(err) => Err(err),
                        None => Ok(()),
                    };
                    self.execute(step.commands).await;
                    self.publish();
                    if reply.send(outcome).is_err() {
                        debug!("update caller went away before the reply");
                    }
                    keep_running
                }
                RuntimeEvent::Core(event) => {
                    let step = self.core.step(event);
                    if let Some(err) = step.error {
                        warn!(error = %err, "event rejected");
                    }
                    self.execute(step.commands).await;
                    self.publish();
                    step.keep_running
                }
            };

            if !keep_running {
                info!("core requested exit; stopping runtime");
                break;
            }
        }

        info!("runtime exiting");
        Ok(())
    }

    async fn submit(
        &mut self,
        plan: PhysicalPlan,
        max_schedule_attempt: u32,
        reply: oneshot::Sender<Result<JobHandle>>,
    ) -> bool {
        let step = self.core.step(CoreEvent::SubmitJob {
            plan,
            max_schedule_attempt,
        });
        let keep_running = step.keep_running;

        let outcome = match (step.error, self.core.snapshot()) {
            (Some(err), _) => Err(err),
            (None, Some(snapshot)) if keep_running => {
                let job_id = snapshot.job_id.clone();
                let (tx, rx) = watch::channel(snapshot);
                self.snapshots = Some(tx);
                Ok(JobHandle { job_id, rx })
            }
            (None, _) => Err(StagedagError::SchedulerClosed),
        };

        self.execute(step.commands).await;
        self.publish();
        if reply.send(outcome).is_err() {
            debug!("submit caller went away before the reply");
        }
        keep_running
    }

    /// Execute commands from the core.
    ///
    /// A launch that cannot be delivered will never be reported on, so it is
    /// fed back to the core as a recoverable failure of that attempt and the
    /// resulting commands run here too. Cancels and metric sinks are
    /// fire-and-forget: their failures are only logged.
    async fn execute(&mut self, commands: Vec<CoreCommand>) {
        let mut pending: VecDeque<CoreCommand> = commands.into();

        while let Some(command) = pending.pop_front() {
            match command {
                CoreCommand::Launch(request) => {
                    let undelivered = TaskGroupReport::from_launch(&request, TaskGroupState::FailedRecoverable);
                    if let Err(err) = self.executor.launch(request).await {
                        warn!(
                            task_group = %undelivered.task_group,
                            attempt = undelivered.attempt,
                            executor = %undelivered.executor,
                            error = %err,
                            "launch delivery failed; failing the attempt"
                        );
                        let report = undelivered.with_failure(FailureCause::LaunchNotDelivered {
                            reason: err.to_string(),
                        });
                        let step = self.core.step(CoreEvent::TaskGroupStateChanged(report));
                        pending.extend(step.commands);
                    }
                }
                CoreCommand::Cancel {
                    executor,
                    task_group,
                    attempt,
                } => {
                    debug!(task_group = %task_group, attempt, executor = %executor, "cancelling attempt");
                    if let Err(err) = self.executor.cancel(executor, task_group, attempt).await {
                        warn!(error = %err, "cancel delivery failed");
                    }
                }
                CoreCommand::Metric(event) => {
                    if let Err(err) = self.metrics.record(event) {
                        warn!(error = %err, "metric sink failed");
                    }
                }
                CoreCommand::JobFinished { job_id, state } => {
                    info!(job = %job_id, state = ?state, "job finished");
                }
            }
        }
    }

    fn publish(&self) {
        let (Some(tx), Some(snapshot)) = (self.snapshots.as_ref(), self.core.snapshot()) else {
            return;
        };
        tx.send_if_modified(|current| {
            if *current == snapshot {
                false
            } else {
                *current = snapshot;
                true
            }
        });
    }
}

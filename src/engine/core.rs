// src/engine/core.rs

//! Pure core scheduler state machine.
//!
//! This module contains a synchronous, deterministic "core" that consumes
//! [`CoreEvent`]s one at a time and produces:
//! - an updated job state store, resource registry and pending queue
//! - a list of commands describing what the IO shell should do next
//!   (launch, cancel, record a metric, announce the end of a job)
//!
//! The async shell (`engine::runtime::Runtime`) is responsible for:
//! - reading events from the inbound channel in arrival order
//! - sending launches and cancels to the executor backend
//! - publishing job snapshots to `JobHandle`s
//!
//! Because every mutation happens inside [`CoreScheduler::step`], the
//! registry and the state store are only ever touched by one event at a time.

use tracing::debug;

use crate::dag::{JobSnapshot, JobStateStore};
use crate::engine::event_handlers::{CoreStep, JobContext};
use crate::engine::policy::{policy_for, SchedulingPolicy};
use crate::engine::queue::PendingQueue;
use crate::engine::{CoreEvent, SchedulerOptions};
use crate::exec::registry::ResourceRegistry;

/// The job currently owned by the scheduler.
#[derive(Debug)]
pub(crate) struct ActiveJob {
    pub(crate) store: JobStateStore,
    pub(crate) max_schedule_attempt: u32,
}

/// Pure core scheduler state.
///
/// It has **no** channels, no Tokio types, and does not perform any IO.
#[derive(Debug)]
pub struct CoreScheduler {
    pub(crate) registry: ResourceRegistry,
    pub(crate) queue: PendingQueue,
    pub(crate) policy: Box<dyn SchedulingPolicy>,
    pub(crate) options: SchedulerOptions,
    /// Latest job; kept after it ends so it can still be queried.
    pub(crate) job: Option<ActiveJob>,
    pub(crate) jobs_submitted: u64,
    pub(crate) terminated: bool,
}

impl CoreScheduler {
    pub fn new(options: SchedulerOptions) -> Self {
        Self::with_policy(options, policy_for(options.placement))
    }

    /// Use a custom placement policy instead of the configured one.
    pub fn with_policy(options: SchedulerOptions, policy: Box<dyn SchedulingPolicy>) -> Self {
        Self {
            registry: ResourceRegistry::new(),
            queue: PendingQueue::new(),
            policy,
            options,
            job: None,
            jobs_submitted: 0,
            terminated: false,
        }
    }

    /// No job, or the latest job reached a terminal state.
    pub fn is_idle(&self) -> bool {
        self.job
            .as_ref()
            .is_none_or(|job| job.store.job_state().is_terminal())
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn registry(&self) -> &ResourceRegistry {
        &self.registry
    }

    pub fn snapshot(&self) -> Option<JobSnapshot> {
        self.job.as_ref().map(|job| job.store.snapshot())
    }

    /// Handle a single event, updating core state and returning the
    /// resulting commands for the IO shell.
    pub fn step(&mut self, event: CoreEvent) -> CoreStep {
        if self.terminated {
            debug!(?event, "scheduler terminated; ignoring event");
            return CoreStep::stopped();
        }

        match event {
            CoreEvent::SubmitJob {
                plan,
                max_schedule_attempt,
            } => self.handle_submit(plan, max_schedule_attempt),
            CoreEvent::UpdateJob { plan, completed } => self.handle_update(plan, completed),
            CoreEvent::ExecutorAdded { executor, capacity } => {
                self.handle_executor_added(executor, capacity)
            }
            CoreEvent::ExecutorRemoved { executor } => self.handle_executor_removed(executor),
            CoreEvent::TaskGroupStateChanged(report) => self.handle_state_changed(report),
            CoreEvent::Terminate => self.handle_terminate(),
        }
    }

    /// Borrow the latest job together with the shared scheduling parts.
    pub(crate) fn job_context(&mut self) -> Option<JobContext<'_>> {
        let job = self.job.as_mut()?;
        Some(JobContext {
            store: &mut job.store,
            max_schedule_attempt: job.max_schedule_attempt,
            registry: &mut self.registry,
            queue: &mut self.queue,
            policy: self.policy.as_ref(),
            options: self.options,
            commands: Vec::new(),
        })
    }
}

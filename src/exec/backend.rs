// src/exec/backend.rs

//! Pluggable executor transport.
//!
//! The runtime talks to an `ExecutorBackend` instead of to executors
//! directly. This makes it easy to swap in a recording backend in tests
//! while keeping the in-process simulated pool in [`executor_loop`].
//!
//! - `LocalExecutorBackend` forwards launches and cancels to the simulated
//!   pool over an mpsc channel.
//! - Tests can provide their own `ExecutorBackend` that records requests and
//!   reports state changes back through a `SchedulerHandle`.
//!
//! [`executor_loop`]: super::executor_loop

use std::future::Future;
use std::pin::Pin;

use tokio::sync::mpsc;

use crate::dag::{LaunchRequest, TaskGroupId};
use crate::engine::SchedulerHandle;
use crate::errors::{Result, StagedagError};
use crate::types::{Attempt, ExecutorId};

use super::executor_loop::{spawn_local_pool, PoolCommand, SimulationSettings};

/// Trait abstracting how launches and cancels reach executors.
///
/// Both calls are fire-and-forget: a returned error only means the request
/// could not be handed to the transport. Outcomes come back as state
/// reports through the scheduler handle.
pub trait ExecutorBackend: Send {
    fn launch(
        &mut self,
        request: LaunchRequest,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    fn cancel(
        &mut self,
        executor: ExecutorId,
        task_group: TaskGroupId,
        attempt: Attempt,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;
}

/// Backend running every executor as a simulated in-process slot pool.
pub struct LocalExecutorBackend {
    tx: mpsc::Sender<PoolCommand>,
}

impl LocalExecutorBackend {
    /// Spawn the pool immediately; it reports back through `scheduler`.
    pub fn new(scheduler: SchedulerHandle, settings: SimulationSettings) -> Self {
        let tx = spawn_local_pool(scheduler, settings);
        Self { tx }
    }
}

impl ExecutorBackend for LocalExecutorBackend {
    fn launch(
        &mut self,
        request: LaunchRequest,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        // Clone the sender so the future doesn't borrow `self` across `await`.
        let tx = self.tx.clone();

        Box::pin(async move {
            tx.send(PoolCommand::Launch(request))
                .await
                .map_err(|_| StagedagError::Transport("local executor pool stopped".into()))
        })
    }

    fn cancel(
        &mut self,
        executor: ExecutorId,
        task_group: TaskGroupId,
        attempt: Attempt,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let tx = self.tx.clone();

        Box::pin(async move {
            tx.send(PoolCommand::Cancel {
                executor,
                task_group,
                attempt,
            })
            .await
            .map_err(|_| StagedagError::Transport("local executor pool stopped".into()))
        })
    }
}

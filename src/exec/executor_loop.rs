// src/exec/executor_loop.rs

//! Simulated executor pool used by the `stagedag` binary.
//!
//! Every registered executor is a set of slots inside this process. A
//! launched attempt sleeps for the configured duration and then reports its
//! outcome back to the scheduler, the same way a remote executor would.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::Deserialize;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::dag::{LaunchRequest, TaskGroupId};
use crate::engine::SchedulerHandle;
use crate::exec::task_runner::run_attempt;
use crate::types::{Attempt, ExecutorId};

/// Knobs for the simulated pool, read from the `[simulation]` table.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct SimulationSettings {
    /// How long every attempt runs, in milliseconds.
    pub task_millis: u64,
    /// Task groups (as `stage-index`) whose first attempt fails recoverably.
    pub fail_first_attempt: BTreeSet<String>,
    /// Executors that disappear after completing this many attempts.
    pub lose_executor_after: BTreeMap<ExecutorId, usize>,
}

impl Default for SimulationSettings {
    fn default() -> Self {
        Self {
            task_millis: 50,
            fail_first_attempt: BTreeSet::new(),
            lose_executor_after: BTreeMap::new(),
        }
    }
}

/// Messages accepted by the pool loop.
#[derive(Debug)]
pub enum PoolCommand {
    Launch(LaunchRequest),
    Cancel {
        executor: ExecutorId,
        task_group: TaskGroupId,
        attempt: Attempt,
    },
    /// Sent by an attempt runner once it reported its outcome.
    Finished {
        executor: ExecutorId,
        task_group: TaskGroupId,
        attempt: Attempt,
    },
}

/// Internal handle for a running attempt.
struct ActiveAttempt {
    executor: ExecutorId,
    attempt: Attempt,
    cancel: Option<oneshot::Sender<()>>,
}

struct PoolState {
    scheduler: SchedulerHandle,
    settings: SimulationSettings,
    self_tx: mpsc::WeakSender<PoolCommand>,
    active: HashMap<TaskGroupId, ActiveAttempt>,
    finished: HashMap<ExecutorId, usize>,
    lost: BTreeSet<ExecutorId>,
}

/// Spawn the background pool loop.
///
/// The returned sender is what `LocalExecutorBackend` uses to deliver
/// launches and cancels. The loop stops once every sender is dropped.
pub fn spawn_local_pool(
    scheduler: SchedulerHandle,
    settings: SimulationSettings,
) -> mpsc::Sender<PoolCommand> {
    let (tx, mut rx) = mpsc::channel::<PoolCommand>(64);
    let self_tx = tx.downgrade();

    tokio::spawn(async move {
        info!("local executor pool started");

        let mut state = PoolState {
            scheduler,
            settings,
            self_tx,
            active: HashMap::new(),
            finished: HashMap::new(),
            lost: BTreeSet::new(),
        };

        while let Some(command) = rx.recv().await {
            match command {
                PoolCommand::Launch(request) => state.launch(request),
                PoolCommand::Cancel {
                    executor,
                    task_group,
                    attempt,
                } => state.cancel(&executor, &task_group, attempt),
                PoolCommand::Finished {
                    executor,
                    task_group,
                    attempt,
                } => state.finished(executor, task_group, attempt),
            }
        }

        info!("local executor pool finished (channel closed)");
    });

    tx
}

impl PoolState {
    fn launch(&mut self, request: LaunchRequest) {
        if self.lost.contains(&request.executor) {
            debug!(
                task_group = %request.task_group,
                executor = %request.executor,
                "launch for a lost executor; dropping"
            );
            return;
        }

        if let Some(previous) = self.active.get_mut(&request.task_group) {
            // A newer attempt supersedes whatever is still running.
            if let Some(cancel) = previous.cancel.take() {
                let _ = cancel.send(());
            }
        }

        let (cancel_tx, cancel_rx) = oneshot::channel::<()>();
        let fail = request.attempt == 1
            && self
                .settings
                .fail_first_attempt
                .contains(&request.task_group.to_string());

        self.active.insert(
            request.task_group.clone(),
            ActiveAttempt {
                executor: request.executor.clone(),
                attempt: request.attempt,
                cancel: Some(cancel_tx),
            },
        );

        let scheduler = self.scheduler.clone();
        let pool_tx = self.self_tx.clone();
        let millis = self.settings.task_millis;
        tokio::spawn(async move {
            let executor = request.executor.clone();
            let task_group = request.task_group.clone();
            let attempt = request.attempt;

            if !run_attempt(request, millis, fail, scheduler, cancel_rx).await {
                return;
            }
            if let Some(pool_tx) = pool_tx.upgrade() {
                let _ = pool_tx
                    .send(PoolCommand::Finished {
                        executor,
                        task_group,
                        attempt,
                    })
                    .await;
            }
        });
    }

    fn cancel(&mut self, executor: &str, task_group: &TaskGroupId, attempt: Attempt) {
        let Some(active) = self.active.get_mut(task_group) else {
            debug!(task_group = %task_group, attempt, "cancel for an attempt that is not running");
            return;
        };
        if active.executor != executor || active.attempt != attempt {
            debug!(task_group = %task_group, attempt, "cancel for a superseded attempt");
            return;
        }
        if let Some(cancel) = active.cancel.take() {
            info!(task_group = %task_group, attempt, executor, "cancelling running attempt");
            let _ = cancel.send(());
        }
        self.active.remove(task_group);
    }

    fn finished(&mut self, executor: ExecutorId, task_group: TaskGroupId, attempt: Attempt) {
        if self
            .active
            .get(&task_group)
            .is_some_and(|a| a.attempt == attempt && a.executor == executor)
        {
            self.active.remove(&task_group);
        }

        let count = self.finished.entry(executor.clone()).or_default();
        *count += 1;

        let Some(limit) = self.settings.lose_executor_after.get(&executor) else {
            return;
        };
        if *count < *limit || self.lost.contains(&executor) {
            return;
        }

        warn!(executor = %executor, finished = *count, "simulating executor loss");
        self.lost.insert(executor.clone());

        // Attempts still running there vanish with the executor.
        let orphaned: Vec<TaskGroupId> = self
            .active
            .iter()
            .filter(|(_, a)| a.executor == executor)
            .map(|(id, _)| id.clone())
            .collect();
        for id in orphaned {
            if let Some(mut active) = self.active.remove(&id) {
                if let Some(cancel) = active.cancel.take() {
                    let _ = cancel.send(());
                }
            }
        }

        // The pool loop never awaits the scheduler.
        let scheduler = self.scheduler.clone();
        tokio::spawn(async move {
            if let Err(err) = scheduler.on_executor_removed(executor).await {
                warn!(error = %err, "could not report executor loss");
            }
        });
    }
}

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use stagedag::dag::{LaunchRequest, TaskGroupId, TaskGroupState};
use stagedag::engine::{SchedulerHandle, TaskGroupReport};
use stagedag::errors::{Result, StagedagError};
use stagedag::exec::ExecutorBackend;
use stagedag::metrics::{MetricEvent, MetricSink};
use stagedag::types::{Attempt, ExecutorId};

/// What a [`RecordingExecutor`] was asked to do, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivered {
    Launch(LaunchRequest),
    Cancel {
        executor: ExecutorId,
        task_group: TaskGroupId,
        attempt: Attempt,
    },
}

/// A fake executor backend that:
/// - records every launch and cancel
/// - optionally reports `COMPLETE` for each launch right away.
pub struct RecordingExecutor {
    scheduler: Option<SchedulerHandle>,
    delivered: Arc<Mutex<Vec<Delivered>>>,
}

impl RecordingExecutor {
    /// Record only; the test drives state reports itself.
    pub fn new(delivered: Arc<Mutex<Vec<Delivered>>>) -> Self {
        Self {
            scheduler: None,
            delivered,
        }
    }

    /// Record and complete every launched attempt.
    pub fn auto_complete(scheduler: SchedulerHandle, delivered: Arc<Mutex<Vec<Delivered>>>) -> Self {
        Self {
            scheduler: Some(scheduler),
            delivered,
        }
    }
}

impl ExecutorBackend for RecordingExecutor {
    fn launch(
        &mut self,
        request: LaunchRequest,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let scheduler = self.scheduler.clone();
        let delivered = Arc::clone(&self.delivered);

        Box::pin(async move {
            delivered
                .lock()
                .unwrap()
                .push(Delivered::Launch(request.clone()));

            if let Some(scheduler) = scheduler {
                let report = TaskGroupReport::from_launch(&request, TaskGroupState::Complete);
                // Reported from a separate task: the runtime is still busy
                // handling the event that produced this launch.
                tokio::spawn(async move {
                    let _ = scheduler.on_task_group_state_changed(report).await;
                });
            }
            Ok(())
        })
    }

    fn cancel(
        &mut self,
        executor: ExecutorId,
        task_group: TaskGroupId,
        attempt: Attempt,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let delivered = Arc::clone(&self.delivered);

        Box::pin(async move {
            delivered.lock().unwrap().push(Delivered::Cancel {
                executor,
                task_group,
                attempt,
            });
            Ok(())
        })
    }
}

/// A backend that refuses the first `failures` launches with a transport
/// error, then records and completes every launch like
/// [`RecordingExecutor::auto_complete`].
pub struct FlakyExecutor {
    failures: usize,
    inner: RecordingExecutor,
}

impl FlakyExecutor {
    pub fn new(
        failures: usize,
        scheduler: SchedulerHandle,
        delivered: Arc<Mutex<Vec<Delivered>>>,
    ) -> Self {
        Self {
            failures,
            inner: RecordingExecutor::auto_complete(scheduler, delivered),
        }
    }

    /// Never delivers a launch.
    pub fn unreachable(scheduler: SchedulerHandle, delivered: Arc<Mutex<Vec<Delivered>>>) -> Self {
        Self::new(usize::MAX, scheduler, delivered)
    }
}

impl ExecutorBackend for FlakyExecutor {
    fn launch(
        &mut self,
        request: LaunchRequest,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        if self.failures > 0 {
            self.failures -= 1;
            let executor = request.executor;
            return Box::pin(async move {
                Err(StagedagError::Transport(format!("executor '{executor}' unreachable")))
            });
        }
        self.inner.launch(request)
    }

    fn cancel(
        &mut self,
        executor: ExecutorId,
        task_group: TaskGroupId,
        attempt: Attempt,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        self.inner.cancel(executor, task_group, attempt)
    }
}

/// Metric sink whose events stay readable after it moved into a runtime.
#[derive(Debug, Clone, Default)]
pub struct RecordingMetricSink {
    events: Arc<Mutex<Vec<MetricEvent>>>,
}

impl RecordingMetricSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<MetricEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl MetricSink for RecordingMetricSink {
    fn record(&mut self, event: MetricEvent) -> Result<()> {
        self.events.lock().unwrap().push(event);
        Ok(())
    }
}

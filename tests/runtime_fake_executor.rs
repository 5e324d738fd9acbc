// tests/runtime_fake_executor.rs

use std::error::Error;
use std::sync::{Arc, Mutex};

use tokio::time::{timeout, Duration};

use stagedag::dag::{JobState, StageState, TaskGroupState};
use stagedag::engine::{CoreScheduler, Runtime, SchedulerHandle, SchedulerOptions, TaskGroupReport};
use stagedag::errors::StagedagError;
use stagedag::metrics::MetricEvent;
use stagedag_test_utils::builders::PlanBuilder;
use stagedag_test_utils::fake_executor::{
    Delivered, FlakyExecutor, RecordingExecutor, RecordingMetricSink,
};
use stagedag_test_utils::harness::tg;
use stagedag_test_utils::init_tracing;

type TestResult = Result<(), Box<dyn Error>>;

fn launches(delivered: &Arc<Mutex<Vec<Delivered>>>) -> usize {
    delivered
        .lock()
        .unwrap()
        .iter()
        .filter(|d| matches!(d, Delivered::Launch(_)))
        .count()
}

#[tokio::test]
async fn runtime_with_auto_completing_executor_runs_a_diamond() -> TestResult {
    init_tracing();

    let (handle, rx) = SchedulerHandle::channel(16);
    let delivered = Arc::new(Mutex::new(Vec::new()));
    let executor = RecordingExecutor::auto_complete(handle.clone(), delivered.clone());
    let metrics = RecordingMetricSink::new();
    let runtime = Runtime::new(
        CoreScheduler::new(SchedulerOptions::default()),
        rx,
        executor,
        metrics.clone(),
    );
    let runtime_task = tokio::spawn(runtime.run());

    handle.on_executor_added("e1", 2).await?;
    let plan = PlanBuilder::new("diamond")
        .stage("a", 1)
        .stage_after("b", 2, &["a"])
        .stage_after("c", 1, &["a"])
        .stage_after("d", 1, &["b", "c"])
        .build();
    let mut job = handle.submit_job(plan, 3).await?;
    assert_eq!(job.job_id(), "diamond-1");

    let state = timeout(Duration::from_secs(3), job.wait_for_terminal()).await??;
    assert_eq!(state, JobState::Complete);
    assert_eq!(job.stage_state("d"), Some(StageState::Complete));
    assert_eq!(job.task_group_state(&tg("b", 1)), Some(TaskGroupState::Complete));
    assert_eq!(launches(&delivered), 5);
    assert!(metrics
        .events()
        .iter()
        .any(|m| matches!(m, MetricEvent::JobCompleted { .. })));

    handle.terminate().await?;
    timeout(Duration::from_secs(3), runtime_task).await???;

    // The last snapshot survives the runtime.
    assert_eq!(job.state(), JobState::Complete);
    Ok(())
}

#[tokio::test]
async fn runtime_reports_rejections_to_the_caller() -> TestResult {
    init_tracing();

    let (handle, rx) = SchedulerHandle::channel(16);
    let delivered = Arc::new(Mutex::new(Vec::new()));
    let runtime = Runtime::new(
        CoreScheduler::new(SchedulerOptions::default()),
        rx,
        RecordingExecutor::new(delivered.clone()),
        RecordingMetricSink::new(),
    );
    let runtime_task = tokio::spawn(runtime.run());

    handle.on_executor_added("e1", 4).await?;
    let v1 = PlanBuilder::new("v1")
        .stage("a", 2)
        .stage_after("b", 1, &["a"])
        .build();
    let mut job = handle.submit_job(v1, 3).await?;

    let second = handle
        .submit_job(PlanBuilder::new("other").stage("x", 1).build(), 3)
        .await;
    assert!(matches!(second, Err(StagedagError::JobAlreadyActive(_))));

    let reshaped = PlanBuilder::new("v2")
        .stage("a", 3)
        .stage_after("b", 1, &["a"])
        .build();
    let update = handle.update_job(reshaped, None).await;
    assert!(matches!(update, Err(StagedagError::InvalidUpdate(_))));
    assert_eq!(job.snapshot().plan_id, "v1");

    // Drive the job by hand; `b-0` is launched while `a-1` is processed.
    for (stage, index) in [("a", 0), ("a", 1), ("b", 0)] {
        handle
            .on_task_group_state_changed(TaskGroupReport::new(
                job.job_id(),
                "e1",
                tg(stage, index),
                TaskGroupState::Complete,
                1,
            ))
            .await?;
    }

    let state = timeout(Duration::from_secs(3), job.wait_for_terminal()).await??;
    assert_eq!(state, JobState::Complete);
    assert_eq!(launches(&delivered), 3);

    handle.terminate().await?;
    timeout(Duration::from_secs(3), runtime_task).await???;
    Ok(())
}

#[tokio::test]
async fn terminate_stops_the_runtime_and_closes_the_handle() -> TestResult {
    init_tracing();

    let (handle, rx) = SchedulerHandle::channel(16);
    let delivered = Arc::new(Mutex::new(Vec::new()));
    let runtime = Runtime::new(
        CoreScheduler::new(SchedulerOptions::default()),
        rx,
        RecordingExecutor::new(delivered.clone()),
        RecordingMetricSink::new(),
    );
    let runtime_task = tokio::spawn(runtime.run());

    handle.on_executor_added("e1", 1).await?;
    let mut job = handle
        .submit_job(PlanBuilder::new("p").stage("s", 2).build(), 3)
        .await?;

    handle.terminate().await?;
    let state = timeout(Duration::from_secs(3), job.wait_for_terminal()).await??;
    assert_eq!(state, JobState::Terminated);
    timeout(Duration::from_secs(3), runtime_task).await???;

    let cancels: Vec<_> = delivered
        .lock()
        .unwrap()
        .iter()
        .filter_map(|d| match d {
            Delivered::Cancel { task_group, .. } => Some(task_group.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(cancels, vec![tg("s", 0)]);
    assert_eq!(job.task_group_state(&tg("s", 1)), Some(TaskGroupState::Ready));

    let after = handle
        .submit_job(PlanBuilder::new("q").stage("t", 1).build(), 3)
        .await;
    assert!(matches!(after, Err(StagedagError::SchedulerClosed)));
    Ok(())
}

#[tokio::test]
async fn undelivered_launch_is_retried_as_a_failed_attempt() -> TestResult {
    init_tracing();

    let (handle, rx) = SchedulerHandle::channel(16);
    let delivered = Arc::new(Mutex::new(Vec::new()));
    let executor = FlakyExecutor::new(1, handle.clone(), delivered.clone());
    let runtime = Runtime::new(
        CoreScheduler::new(SchedulerOptions::default()),
        rx,
        executor,
        RecordingMetricSink::new(),
    );
    let runtime_task = tokio::spawn(runtime.run());

    handle.on_executor_added("e1", 1).await?;
    let mut job = handle
        .submit_job(PlanBuilder::new("p").stage("s", 1).build(), 3)
        .await?;

    let state = timeout(Duration::from_secs(3), job.wait_for_terminal()).await??;
    assert_eq!(state, JobState::Complete);
    let info = job.snapshot().task_group(&tg("s", 0)).cloned().unwrap();
    assert_eq!(info.attempt, 2);
    assert_eq!(launches(&delivered), 1);

    handle.terminate().await?;
    timeout(Duration::from_secs(3), runtime_task).await???;
    Ok(())
}

#[tokio::test]
async fn unreachable_executor_fails_the_job_instead_of_hanging() -> TestResult {
    init_tracing();

    let (handle, rx) = SchedulerHandle::channel(16);
    let delivered = Arc::new(Mutex::new(Vec::new()));
    let runtime = Runtime::new(
        CoreScheduler::new(SchedulerOptions::default()),
        rx,
        FlakyExecutor::unreachable(handle.clone(), delivered.clone()),
        RecordingMetricSink::new(),
    );
    let runtime_task = tokio::spawn(runtime.run());

    handle.on_executor_added("e1", 1).await?;
    let mut job = handle
        .submit_job(PlanBuilder::new("p").stage("s", 1).build(), 1)
        .await?;

    let state = timeout(Duration::from_secs(3), job.wait_for_terminal()).await??;
    assert!(matches!(state, JobState::Failed { ref cause } if cause.contains("launch not delivered")));
    assert_eq!(
        job.task_group_state(&tg("s", 0)),
        Some(TaskGroupState::FailedUnrecoverable)
    );
    assert_eq!(job.snapshot().task_group(&tg("s", 0)).map(|i| i.attempt), Some(2));
    assert_eq!(launches(&delivered), 0);

    handle.terminate().await?;
    timeout(Duration::from_secs(3), runtime_task).await???;
    Ok(())
}

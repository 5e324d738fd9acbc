// tests/core_job_lifecycle.rs

use stagedag::dag::{JobState, TaskGroupState};
use stagedag::engine::{CoreCommand, CoreEvent, FailureCause, SchedulerOptions, TaskGroupReport};
use stagedag::metrics::MetricEvent;
use stagedag::errors::StagedagError;
use stagedag::types::EscalationPolicy;
use stagedag_test_utils::builders::PlanBuilder;
use stagedag_test_utils::harness::{launches_in, tg, CoreHarness};
use stagedag_test_utils::init_tracing;

#[test]
fn second_submission_is_rejected_while_a_job_is_active() {
    init_tracing();

    let mut h = CoreHarness::new();
    h.add_executor("e1", 1);
    h.submit(PlanBuilder::new("first").stage("s", 1).build(), 3);

    let step = h.step(CoreEvent::SubmitJob {
        plan: PlanBuilder::new("second").stage("s", 1).build(),
        max_schedule_attempt: 3,
    });
    assert!(matches!(
        step.error,
        Some(StagedagError::JobAlreadyActive(ref id)) if id == "first-1"
    ));
    assert!(step.commands.is_empty());
    assert_eq!(h.snapshot().plan_id, "first");
}

#[test]
fn executors_persist_across_jobs() {
    init_tracing();

    let mut h = CoreHarness::new();
    h.add_executor("e1", 2);
    let first = h.submit(PlanBuilder::new("p").stage("s", 1).build(), 3);
    h.drain(first);
    assert_eq!(h.snapshot().state, JobState::Complete);
    assert_eq!(h.snapshot().job_id, "p-1");

    let second = h.submit(PlanBuilder::new("p").stage("s", 2).build(), 3);
    assert_eq!(second.len(), 2);
    assert_eq!(h.snapshot().job_id, "p-2");
    assert_eq!(h.attempt_of("s", 0), 1);
}

#[test]
fn new_job_cancels_attempts_left_running_by_a_failed_one() {
    init_tracing();

    let mut h = CoreHarness::with_options(SchedulerOptions {
        escalation: EscalationPolicy::LetRunningFinish,
        ..SchedulerOptions::default()
    });
    h.add_executor("e1", 2);
    let launches = h.submit(PlanBuilder::new("p").stage("s", 2).build(), 0);
    h.fail(&launches[0], FailureCause::OutputWriteFailure);
    assert_eq!(h.core.registry().occupied_slots(), 1);

    let step = h.step(CoreEvent::SubmitJob {
        plan: PlanBuilder::new("q").stage("t", 1).build(),
        max_schedule_attempt: 3,
    });
    assert!(step.error.is_none());
    assert!(matches!(
        step.commands.first(),
        Some(CoreCommand::Cancel { task_group, attempt: 1, .. }) if *task_group == tg("s", 1)
    ));
    let launched = launches_in(&step);
    assert_eq!(launched.len(), 1);
    assert_eq!(launched[0].task_group, tg("t", 0));
    assert_eq!(h.core.registry().occupied_slots(), 1);
}

#[test]
fn late_report_from_a_previous_job_is_dropped() {
    init_tracing();

    let mut h = CoreHarness::new();
    h.add_executor("e1", 2);
    let plan = || PlanBuilder::new("p").stage("s", 2).build();

    // Escalation cancels `s-1` attempt 1 of the first job.
    let first = h.submit(plan(), 0);
    h.fail(&first[0], FailureCause::OutputWriteFailure);
    assert!(matches!(h.snapshot().state, JobState::Failed { .. }));
    let cancelled = first[1].clone();
    assert_eq!(cancelled.task_group, tg("s", 1));

    // The second job launches the same task groups with the same attempts.
    let second = h.submit(plan(), 0);
    assert_eq!(h.snapshot().job_id, "p-2");
    assert!(second.iter().any(|l| l.task_group == tg("s", 1) && l.attempt == 1));

    let before = h.snapshot();
    let next = h.report(TaskGroupReport::from_launch(&cancelled, TaskGroupState::Complete));
    assert!(next.is_empty());
    assert_eq!(h.snapshot(), before);
    assert_eq!(h.state_of("s", 1), Some(TaskGroupState::Executing));
    assert!(h.metrics().iter().any(|m| matches!(
        m,
        MetricEvent::StaleEventDropped { task_group, reason, .. }
            if *task_group == tg("s", 1) && reason.contains("p-1")
    )));
}

#[test]
fn terminate_releases_everything_and_freezes_state() {
    init_tracing();

    let mut h = CoreHarness::new();
    h.add_executor("e1", 2);
    h.submit(PlanBuilder::new("p").stage("s", 3).build(), 3);

    let step = h.step(CoreEvent::Terminate);
    assert!(!step.keep_running);
    let cancels = step
        .commands
        .iter()
        .filter(|c| matches!(c, CoreCommand::Cancel { .. }))
        .count();
    assert_eq!(cancels, 2);
    assert!(step.commands.iter().any(|c| matches!(
        c,
        CoreCommand::JobFinished { state: JobState::Terminated, .. }
    )));

    assert!(h.core.is_terminated());
    assert_eq!(h.core.registry().occupied_slots(), 0);
    assert_eq!(h.core.queue_len(), 0);

    let snapshot = h.snapshot();
    assert_eq!(snapshot.state, JobState::Terminated);
    assert_eq!(h.state_of("s", 0), Some(TaskGroupState::Executing));
    assert_eq!(h.state_of("s", 2), Some(TaskGroupState::Ready));

    // Nothing is processed afterwards.
    let after = h.step(CoreEvent::ExecutorAdded {
        executor: "e2".into(),
        capacity: 4,
    });
    assert!(after.commands.is_empty());
    assert!(!after.keep_running);
    assert_eq!(h.snapshot(), snapshot);
}

#[test]
fn terminate_keeps_the_outcome_of_a_finished_job() {
    init_tracing();

    let mut h = CoreHarness::new();
    h.add_executor("e1", 1);
    let launches = h.submit(PlanBuilder::new("p").stage("s", 1).build(), 3);
    h.drain(launches);

    let step = h.step(CoreEvent::Terminate);
    assert!(step.commands.is_empty());
    assert_eq!(h.snapshot().state, JobState::Complete);
}

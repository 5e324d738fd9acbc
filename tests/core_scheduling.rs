// tests/core_scheduling.rs

use stagedag::dag::{JobState, LaunchRequest, StageState, TaskGroupId, TaskGroupState};
use stagedag::engine::{CoreCommand, CoreEvent, SchedulerOptions};
use stagedag::types::PlacementPolicy;
use stagedag_test_utils::builders::PlanBuilder;
use stagedag_test_utils::harness::{tg, CoreHarness};
use stagedag_test_utils::init_tracing;

fn ids(launches: &[LaunchRequest]) -> Vec<TaskGroupId> {
    launches.iter().map(|l| l.task_group.clone()).collect()
}

#[test]
fn two_stage_linear_dag_waits_for_every_upstream_task_group() {
    init_tracing();

    let mut h = CoreHarness::new();
    h.add_executor("e1", 4);
    let plan = PlanBuilder::new("linear")
        .stage("a", 2)
        .stage_after("b", 1, &["a"])
        .build();

    let launches = h.submit(plan, 3);
    assert_eq!(ids(&launches), vec![tg("a", 0), tg("a", 1)]);
    assert!(launches.iter().all(|l| l.attempt == 1 && l.executor == "e1"));
    assert_eq!(h.state_of("b", 0), Some(TaskGroupState::Pending));
    assert_eq!(h.snapshot().stage_state("a"), Some(StageState::Executing));
    assert_eq!(h.snapshot().stage_state("b"), Some(StageState::Pending));

    assert!(h.complete(&launches[0]).is_empty());
    assert_eq!(h.state_of("b", 0), Some(TaskGroupState::Pending));

    let b = h.complete(&launches[1]);
    assert_eq!(ids(&b), vec![tg("b", 0)]);
    assert_eq!(b[0].attempt, 1);
    assert_eq!(h.snapshot().stage_state("a"), Some(StageState::Complete));

    h.complete(&b[0]);
    let snapshot = h.snapshot();
    assert_eq!(snapshot.state, JobState::Complete);
    assert_eq!(snapshot.stage_state("b"), Some(StageState::Complete));
    assert!(h.commands.iter().any(|c| matches!(
        c,
        CoreCommand::JobFinished { state: JobState::Complete, .. }
    )));
    assert_eq!(h.core.registry().occupied_slots(), 0);
}

#[test]
fn single_slot_keeps_second_task_group_queued_until_first_completes() {
    init_tracing();

    let mut h = CoreHarness::new();
    h.add_executor("e1", 1);
    let launches = h.submit(PlanBuilder::new("p").stage("s", 2).build(), 3);

    assert_eq!(ids(&launches), vec![tg("s", 0)]);
    assert_eq!(h.state_of("s", 1), Some(TaskGroupState::Ready));
    assert_eq!(h.core.queue_len(), 1);

    let next = h.complete(&launches[0]);
    assert_eq!(ids(&next), vec![tg("s", 1)]);
    assert_eq!(h.core.queue_len(), 0);
}

#[test]
fn single_slot_releases_queued_work_when_its_executor_is_removed() {
    init_tracing();

    let mut h = CoreHarness::new();
    h.add_executor("e1", 1);
    let launches = h.submit(PlanBuilder::new("p").stage("s", 2).build(), 3);
    assert_eq!(ids(&launches), vec![tg("s", 0)]);

    // No executor left: both stay queued.
    assert!(h.remove_executor("e1").is_empty());
    assert_eq!(h.state_of("s", 0), Some(TaskGroupState::Ready));
    assert_eq!(h.state_of("s", 1), Some(TaskGroupState::Ready));

    let mut relaunched = h.add_executor("e2", 2);
    relaunched.sort_by(|a, b| a.task_group.cmp(&b.task_group));
    assert_eq!(ids(&relaunched), vec![tg("s", 0), tg("s", 1)]);
    assert_eq!(relaunched[0].attempt, 2);
    assert_eq!(relaunched[1].attempt, 1);
    assert!(relaunched.iter().all(|l| l.executor == "e2"));
}

#[test]
fn diamond_branches_are_offered_together() {
    init_tracing();

    let mut h = CoreHarness::new();
    h.add_executor("e1", 4);
    let plan = PlanBuilder::new("diamond")
        .stage("a", 1)
        .stage_after("b", 1, &["a"])
        .stage_after("c", 1, &["a"])
        .stage_after("d", 1, &["b", "c"])
        .build();

    let a = h.submit(plan, 3);
    let branches = h.complete(&a[0]);
    assert_eq!(ids(&branches), vec![tg("b", 0), tg("c", 0)]);

    assert!(h.complete(&branches[0]).is_empty());
    let d = h.complete(&branches[1]);
    assert_eq!(ids(&d), vec![tg("d", 0)]);

    h.complete(&d[0]);
    assert_eq!(h.snapshot().state, JobState::Complete);
}

#[test]
fn submitting_before_any_executor_launches_once_capacity_arrives() {
    init_tracing();

    let mut h = CoreHarness::new();
    assert!(h.submit(PlanBuilder::new("p").stage("s", 3).build(), 3).is_empty());
    assert_eq!(h.core.queue_len(), 3);

    let launches = h.add_executor("e1", 3);
    assert_eq!(launches.len(), 3);
    assert_eq!(h.core.queue_len(), 0);
}

#[test]
fn zero_capacity_executor_is_never_selected() {
    init_tracing();

    let mut h = CoreHarness::new();
    h.add_executor("idle", 0);
    assert!(h.submit(PlanBuilder::new("p").stage("s", 1).build(), 3).is_empty());
    assert_eq!(h.state_of("s", 0), Some(TaskGroupState::Ready));

    let launches = h.add_executor("e1", 1);
    assert_eq!(launches.len(), 1);
    assert_eq!(launches[0].executor, "e1");
}

#[test]
fn duplicate_executor_registration_is_ignored() {
    init_tracing();

    let mut h = CoreHarness::new();
    h.add_executor("e1", 1);
    h.add_executor("e1", 5);

    let snapshot = h.core.registry().snapshot();
    assert_eq!(snapshot.executors.len(), 1);
    assert_eq!(snapshot.get("e1").map(|e| e.capacity), Some(1));
}

/// `a-0` runs on the small executor; `b-0` reads its output.
fn run_colocated_plan(placement: PlacementPolicy) -> LaunchRequest {
    let mut h = CoreHarness::with_options(SchedulerOptions {
        placement,
        ..SchedulerOptions::default()
    });
    h.add_executor("small", 1);
    let plan = PlanBuilder::new("loc")
        .stage("a", 1)
        .stage_after("b", 1, &["a"])
        .colocated()
        .build();

    let a = h.submit(plan, 3);
    assert_eq!(a[0].executor, "small");
    h.add_executor("big", 4);

    let b = h.complete(&a[0]);
    assert_eq!(ids(&b), vec![tg("b", 0)]);
    b[0].clone()
}

#[test]
fn locality_policy_follows_upstream_output() {
    init_tracing();
    assert_eq!(run_colocated_plan(PlacementPolicy::Locality).executor, "small");
}

#[test]
fn least_loaded_policy_ignores_upstream_output() {
    init_tracing();
    assert_eq!(run_colocated_plan(PlacementPolicy::LeastLoaded).executor, "big");
}

#[test]
fn removing_an_executor_forgets_outputs_without_recomputing_them() {
    init_tracing();

    let mut h = CoreHarness::new();
    h.add_executor("e1", 2);
    let plan = PlanBuilder::new("p")
        .stage("a", 1)
        .stage_after("b", 1, &["a"])
        .build();

    let a = h.submit(plan, 3);
    let b = h.complete(&a[0]);
    assert_eq!(
        h.snapshot().task_group(&tg("a", 0)).and_then(|i| i.output_location.clone()),
        Some("e1".to_string())
    );

    h.add_executor("e2", 1);
    let relaunched = h.remove_executor("e1");
    assert_eq!(ids(&relaunched), vec![tg("b", 0)]);
    assert_eq!(relaunched[0].executor, "e2");
    assert_eq!(relaunched[0].attempt, b[0].attempt + 1);

    let a0 = h.snapshot().task_group(&tg("a", 0)).cloned().unwrap();
    assert_eq!(a0.state, TaskGroupState::Complete);
    assert_eq!(a0.attempt, 1);
    assert_eq!(a0.output_location, None);
}

#[test]
fn unknown_executor_removal_is_a_no_op() {
    init_tracing();

    let mut h = CoreHarness::new();
    let step = h.step(CoreEvent::ExecutorRemoved {
        executor: "ghost".into(),
    });
    assert!(step.commands.is_empty());
    assert!(step.keep_running);
    assert!(step.error.is_none());
}

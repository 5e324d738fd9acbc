// tests/core_update.rs

use stagedag::dag::{JobState, PhysicalPlan, TaskGroupState};
use stagedag::engine::{CoreEvent, TaskGroupReport};
use stagedag::errors::StagedagError;
use stagedag_test_utils::builders::PlanBuilder;
use stagedag_test_utils::harness::{launches_in, tg, CoreHarness};
use stagedag_test_utils::init_tracing;

fn linear(id: &str, a: usize, b: usize) -> PhysicalPlan {
    PlanBuilder::new(id)
        .stage("a", a)
        .stage_after("b", b, &["a"])
        .build()
}

#[test]
fn repartitioning_an_unstarted_stage_keeps_finished_upstream_work() {
    init_tracing();

    let mut h = CoreHarness::new();
    h.add_executor("e1", 4);
    let a = h.submit(linear("v1", 2, 1), 3);
    h.complete(&a[0]);

    // The last upstream task group completes as part of the update, so `b`
    // has not started yet when the new plan is applied.
    let step = h.step(CoreEvent::UpdateJob {
        plan: linear("v2", 2, 3),
        completed: Some(("e1".into(), tg("a", 1))),
    });
    assert!(step.error.is_none(), "update rejected: {:?}", step.error);

    let launches = launches_in(&step);
    let mut launched: Vec<_> = launches.iter().map(|l| l.task_group.clone()).collect();
    launched.sort();
    assert_eq!(launched, vec![tg("b", 0), tg("b", 1), tg("b", 2)]);

    let snapshot = h.snapshot();
    assert_eq!(snapshot.plan_id, "v2");
    assert_eq!(h.attempt_of("a", 0), 1);
    assert_eq!(h.attempt_of("a", 1), 1);
    assert_eq!(h.state_of("a", 1), Some(TaskGroupState::Complete));

    for launch in launches {
        h.complete(&launch);
    }
    assert_eq!(h.snapshot().state, JobState::Complete);
}

#[test]
fn reshaping_an_executing_stage_is_rejected_and_the_job_continues() {
    init_tracing();

    let mut h = CoreHarness::new();
    h.add_executor("e1", 4);
    let a = h.submit(linear("v1", 2, 1), 3);

    let step = h.step(CoreEvent::UpdateJob {
        plan: linear("v2", 3, 1),
        completed: None,
    });
    assert!(matches!(step.error, Some(StagedagError::InvalidUpdate(_))));
    assert!(step.keep_running);
    assert_eq!(h.snapshot().plan_id, "v1");
    assert_eq!(h.snapshot().task_groups.len(), 3);

    h.complete(&a[0]);
    let b = h.complete(&a[1]);
    assert_eq!(b.len(), 1);
    h.complete(&b[0]);
    assert_eq!(h.snapshot().state, JobState::Complete);
}

#[test]
fn rejected_update_still_applies_the_named_completion() {
    init_tracing();

    let mut h = CoreHarness::new();
    h.add_executor("e1", 4);
    let a = h.submit(linear("v1", 2, 1), 3);
    h.complete(&a[0]);

    // Completing a-1 makes `b` eligible; `a` itself cannot be reshaped.
    let step = h.step(CoreEvent::UpdateJob {
        plan: linear("v2", 5, 1),
        completed: Some(("e1".into(), tg("a", 1))),
    });
    assert!(matches!(step.error, Some(StagedagError::InvalidUpdate(_))));

    let launches = launches_in(&step);
    assert_eq!(launches.len(), 1);
    assert_eq!(launches[0].task_group, tg("b", 0));
    assert_eq!(h.state_of("a", 1), Some(TaskGroupState::Complete));
}

#[test]
fn update_can_replace_unstarted_stages_entirely() {
    init_tracing();

    let mut h = CoreHarness::new();
    h.add_executor("e1", 4);
    let a = h.submit(linear("v1", 1, 1), 3);

    let v2 = PlanBuilder::new("v2")
        .stage("a", 1)
        .stage_after("c", 2, &["a"])
        .build();
    let step = h.step(CoreEvent::UpdateJob {
        plan: v2,
        completed: None,
    });
    assert!(step.error.is_none());
    assert_eq!(h.snapshot().stage_state("b"), None);

    let c = h.complete(&a[0]);
    assert_eq!(c.len(), 2);
    assert!(c.iter().all(|l| l.task_group.stage == "c"));
}

#[test]
fn update_completes_a_task_group_that_was_put_on_hold() {
    init_tracing();

    let mut h = CoreHarness::new();
    h.add_executor("e1", 1);
    let a = h.submit(linear("v1", 1, 1), 3).remove(0);

    h.report(TaskGroupReport::from_launch(&a, TaskGroupState::OnHold));
    assert_eq!(h.core.registry().occupied_slots(), 1);

    let step = h.step(CoreEvent::UpdateJob {
        plan: linear("v2", 1, 1),
        completed: Some((a.executor.clone(), tg("a", 0))),
    });
    assert!(step.error.is_none());

    let b = launches_in(&step);
    assert_eq!(b.len(), 1);
    assert_eq!(b[0].task_group, tg("b", 0));
    assert_eq!(
        h.snapshot()
            .task_group(&tg("a", 0))
            .and_then(|i| i.output_location.clone()),
        Some("e1".to_string())
    );
}

#[test]
fn update_without_a_job_is_rejected() {
    init_tracing();

    let mut h = CoreHarness::new();
    let step = h.step(CoreEvent::UpdateJob {
        plan: linear("v1", 1, 1),
        completed: None,
    });
    assert!(matches!(step.error, Some(StagedagError::NoActiveJob)));
}

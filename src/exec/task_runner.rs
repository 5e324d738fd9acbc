// src/exec/task_runner.rs

//! Runs a single simulated task group attempt.

use std::time::Duration;

use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::dag::{LaunchRequest, TaskGroupState};
use crate::engine::{FailureCause, SchedulerHandle, TaskGroupReport};

/// Sleep for `millis`, then report the attempt's outcome.
///
/// - If the cancel channel fires, **no** report is sent for this attempt;
///   the scheduler already freed its slot.
/// - With `fail` set the attempt reports a recoverable output write failure
///   instead of completing.
///
/// Returns `true` if a report was delivered.
pub async fn run_attempt(
    request: LaunchRequest,
    millis: u64,
    fail: bool,
    scheduler: SchedulerHandle,
    mut cancel_rx: oneshot::Receiver<()>,
) -> bool {
    debug!(
        task_group = %request.task_group,
        attempt = request.attempt,
        executor = %request.executor,
        "attempt started"
    );

    tokio::select! {
        _ = tokio::time::sleep(Duration::from_millis(millis)) => {}
        cancel = &mut cancel_rx => {
            if cancel.is_ok() {
                info!(
                    task_group = %request.task_group,
                    attempt = request.attempt,
                    "attempt cancelled"
                );
            }
            return false;
        }
    }

    let report = if fail {
        TaskGroupReport::from_launch(&request, TaskGroupState::FailedRecoverable)
            .with_failure(FailureCause::OutputWriteFailure)
    } else {
        TaskGroupReport::from_launch(&request, TaskGroupState::Complete)
    };

    match scheduler.on_task_group_state_changed(report).await {
        Ok(()) => true,
        Err(err) => {
            warn!(
                task_group = %request.task_group,
                attempt = request.attempt,
                error = %err,
                "could not deliver attempt report"
            );
            false
        }
    }
}

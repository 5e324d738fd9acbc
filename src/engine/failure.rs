// src/engine/failure.rs

//! Failure classification: retry or escalate.
//!
//! Stale and duplicate reports never reach this module; the state store's
//! attempt check drops them first.

use std::fmt;

use crate::dag::TaskGroupId;
use crate::types::{Attempt, ExecutorId};

/// Why a task group attempt failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureCause {
    /// The executor went away (detected by the registry, not reported).
    ExecutorLost { executor: ExecutorId },
    /// Upstream data could not be fetched. `upstream` names the task group
    /// whose output is missing, when the executor knows it.
    InputReadFailure { upstream: Option<TaskGroupId> },
    OutputWriteFailure,
    /// The launch never reached the executor.
    LaunchNotDelivered { reason: String },
    /// A recoverable failure reported without a cause.
    Unspecified,
    /// The executor reported the attempt as unrecoverable.
    Unrecoverable { reason: String },
}

impl fmt::Display for FailureCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureCause::ExecutorLost { executor } => write!(f, "executor '{executor}' lost"),
            FailureCause::InputReadFailure { upstream: Some(up) } => {
                write!(f, "input read failure (missing output of {up})")
            }
            FailureCause::InputReadFailure { upstream: None } => f.write_str("input read failure"),
            FailureCause::OutputWriteFailure => f.write_str("output write failure"),
            FailureCause::LaunchNotDelivered { reason } => write!(f, "launch not delivered: {reason}"),
            FailureCause::Unspecified => f.write_str("unspecified failure"),
            FailureCause::Unrecoverable { reason } => write!(f, "unrecoverable: {reason}"),
        }
    }
}

/// What the orchestrator should do with a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureDecision {
    /// Re-offer the task group. `recompute` is an upstream task group whose
    /// output must be produced again first.
    Retry { recompute: Option<TaskGroupId> },
    /// Fail the owning stage and the job.
    Escalate { reason: String },
}

/// Decide between retry and escalation.
///
/// `attempt` is the launch number of the failed attempt (1 for the first
/// launch). An attempt is retried while `attempt <= max_schedule_attempt`,
/// so `max_schedule_attempt = N` allows N retries and escalates the
/// (N+1)th failure, whatever its cause.
pub fn classify(cause: &FailureCause, attempt: Attempt, max_schedule_attempt: u32) -> FailureDecision {
    if let FailureCause::Unrecoverable { reason } = cause {
        return FailureDecision::Escalate {
            reason: reason.clone(),
        };
    }

    if attempt > max_schedule_attempt {
        return FailureDecision::Escalate {
            reason: format!(
                "{cause} on attempt {attempt}; max_schedule_attempt ({max_schedule_attempt}) exhausted"
            ),
        };
    }

    match cause {
        FailureCause::InputReadFailure { upstream } => FailureDecision::Retry {
            recompute: upstream.clone(),
        },
        FailureCause::ExecutorLost { .. }
        | FailureCause::OutputWriteFailure
        | FailureCause::LaunchNotDelivered { .. }
        | FailureCause::Unspecified
        | FailureCause::Unrecoverable { .. } => FailureDecision::Retry { recompute: None },
    }
}

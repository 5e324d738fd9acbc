// src/dag/mod.rs

//! Physical plans and per-job state.
//!
//! - [`plan`] holds validated physical plans (stages, parallelism, edges).
//! - [`graph`] is the stage DAG derived from a plan.
//! - [`task_group`] defines task group ids and the task group, stage and
//!   job state types.
//! - [`state_store`] owns every task group's state machine for one job.

pub mod graph;
pub mod plan;
pub mod state_store;
pub mod task_group;

pub use graph::DagGraph;
pub use plan::{LocalityHint, PhysicalPlan, StageSpec};
pub use state_store::{JobSnapshot, JobStateStore, Transition, TransitionRejected};
pub use task_group::{
    JobState, LaunchRequest, StageState, TaskGroupId, TaskGroupInfo, TaskGroupState,
};

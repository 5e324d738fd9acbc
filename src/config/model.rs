// src/config/model.rs

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::dag::{LocalityHint, PhysicalPlan};
use crate::engine::SchedulerOptions;
use crate::exec::SimulationSettings;
use crate::types::{EscalationPolicy, ExecutorId, PlacementPolicy, StageId};

/// Validated job file.
///
/// Built from [`RawJobFile`] through `TryFrom`, which is where all checks
/// live (see `validate.rs`). Holding one means the plan is a valid DAG.
#[derive(Debug, Clone)]
pub struct JobFile {
    pub scheduler: SchedulerSection,
    pub simulation: SimulationSettings,
    /// Executors to register before the job is submitted.
    pub executors: BTreeMap<ExecutorId, ExecutorConfig>,
    pub plan: PhysicalPlan,
}

impl JobFile {
    pub(crate) fn new_unchecked(
        scheduler: SchedulerSection,
        simulation: SimulationSettings,
        executors: BTreeMap<ExecutorId, ExecutorConfig>,
        plan: PhysicalPlan,
    ) -> Self {
        Self {
            scheduler,
            simulation,
            executors,
            plan,
        }
    }

    pub fn options(&self) -> SchedulerOptions {
        SchedulerOptions {
            escalation: self.scheduler.escalation,
            placement: self.scheduler.placement,
        }
    }
}

/// Job file as read from TOML:
///
/// ```toml
/// name = "wordcount"
///
/// [scheduler]
/// max_schedule_attempt = 3
///
/// [executor.exec-1]
/// capacity = 2
///
/// [stage.map]
/// parallelism = 2
///
/// [stage.reduce]
/// parallelism = 1
/// after = ["map"]
/// ```
///
/// Every section except `[stage.*]` is optional.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawJobFile {
    /// Plan id; job ids are derived from it.
    #[serde(default = "default_plan_name")]
    pub name: String,

    #[serde(default)]
    pub scheduler: SchedulerSection,

    #[serde(default)]
    pub simulation: SimulationSettings,

    #[serde(default)]
    pub executor: BTreeMap<ExecutorId, ExecutorConfig>,

    /// Keys are stage ids.
    #[serde(default)]
    pub stage: BTreeMap<StageId, StageConfig>,
}

fn default_plan_name() -> String {
    "job".to_string()
}

/// `[scheduler]` section.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct SchedulerSection {
    /// Retries allowed per task group before a failure is escalated.
    #[serde(default = "default_max_schedule_attempt")]
    pub max_schedule_attempt: u32,

    #[serde(default)]
    pub escalation: EscalationPolicy,

    #[serde(default)]
    pub placement: PlacementPolicy,

    /// Bound of the scheduler's inbound event channel.
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,
}

fn default_max_schedule_attempt() -> u32 {
    3
}

fn default_event_channel_capacity() -> usize {
    256
}

impl Default for SchedulerSection {
    fn default() -> Self {
        Self {
            max_schedule_attempt: default_max_schedule_attempt(),
            escalation: EscalationPolicy::default(),
            placement: PlacementPolicy::default(),
            event_channel_capacity: default_event_channel_capacity(),
        }
    }
}

/// `[executor.<id>]` section.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ExecutorConfig {
    #[serde(default = "default_capacity")]
    pub capacity: usize,
}

fn default_capacity() -> usize {
    1
}

/// `[stage.<id>]` section.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct StageConfig {
    pub parallelism: usize,

    /// Upstream stage ids.
    #[serde(default)]
    pub after: Vec<StageId>,

    #[serde(default)]
    pub locality: LocalityHint,
}

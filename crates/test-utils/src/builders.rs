#![allow(dead_code)]

use std::collections::BTreeMap;

use stagedag::config::{ExecutorConfig, JobFile, RawJobFile, SchedulerSection, StageConfig};
use stagedag::dag::{LocalityHint, PhysicalPlan, StageSpec};
use stagedag::exec::SimulationSettings;
use stagedag::types::{EscalationPolicy, PlacementPolicy};

/// Builder for `PhysicalPlan` to simplify test setup.
pub struct PlanBuilder {
    id: String,
    stages: Vec<StageSpec>,
}

impl PlanBuilder {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            stages: Vec::new(),
        }
    }

    /// Add a source stage.
    pub fn stage(mut self, id: &str, parallelism: usize) -> Self {
        self.stages.push(StageSpec::new(id, parallelism));
        self
    }

    /// Add a stage depending on every stage in `after`.
    pub fn stage_after(mut self, id: &str, parallelism: usize, after: &[&str]) -> Self {
        let spec = after
            .iter()
            .fold(StageSpec::new(id, parallelism), |spec, up| spec.after(*up));
        self.stages.push(spec);
        self
    }

    /// Mark the most recently added stage as locality-sensitive.
    pub fn colocated(mut self) -> Self {
        if let Some(last) = self.stages.pop() {
            self.stages
                .push(last.with_locality(LocalityHint::UpstreamOutput));
        }
        self
    }

    pub fn build(self) -> PhysicalPlan {
        PhysicalPlan::new(self.id, self.stages).expect("Failed to build valid plan from builder")
    }
}

/// Builder for `JobFile`, going through the same validation as the loader.
pub struct JobFileBuilder {
    raw: RawJobFile,
}

impl JobFileBuilder {
    pub fn new() -> Self {
        Self {
            raw: RawJobFile {
                name: "job".to_string(),
                scheduler: SchedulerSection::default(),
                simulation: SimulationSettings::default(),
                executor: BTreeMap::new(),
                stage: BTreeMap::new(),
            },
        }
    }

    pub fn max_schedule_attempt(mut self, n: u32) -> Self {
        self.raw.scheduler.max_schedule_attempt = n;
        self
    }

    pub fn escalation(mut self, policy: EscalationPolicy) -> Self {
        self.raw.scheduler.escalation = policy;
        self
    }

    pub fn placement(mut self, policy: PlacementPolicy) -> Self {
        self.raw.scheduler.placement = policy;
        self
    }

    pub fn task_millis(mut self, millis: u64) -> Self {
        self.raw.simulation.task_millis = millis;
        self
    }

    pub fn fail_first_attempt(mut self, task_group: &str) -> Self {
        self.raw
            .simulation
            .fail_first_attempt
            .insert(task_group.to_string());
        self
    }

    pub fn lose_executor_after(mut self, executor: &str, finished: usize) -> Self {
        self.raw
            .simulation
            .lose_executor_after
            .insert(executor.to_string(), finished);
        self
    }

    pub fn executor(mut self, id: &str, capacity: usize) -> Self {
        self.raw
            .executor
            .insert(id.to_string(), ExecutorConfig { capacity });
        self
    }

    pub fn stage(mut self, id: &str, parallelism: usize, after: &[&str]) -> Self {
        self.raw.stage.insert(
            id.to_string(),
            StageConfig {
                parallelism,
                after: after.iter().map(|s| s.to_string()).collect(),
                locality: LocalityHint::None,
            },
        );
        self
    }

    pub fn raw(self) -> RawJobFile {
        self.raw
    }

    pub fn build(self) -> JobFile {
        JobFile::try_from(self.raw).expect("Failed to build valid job file from builder")
    }
}

impl Default for JobFileBuilder {
    fn default() -> Self {
        Self::new()
    }
}

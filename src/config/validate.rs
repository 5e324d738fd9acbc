// src/config/validate.rs

use tracing::warn;

use crate::config::model::{JobFile, RawJobFile};
use crate::dag::{PhysicalPlan, StageSpec, TaskGroupId};
use crate::errors::{Result, StagedagError};

impl TryFrom<RawJobFile> for JobFile {
    type Error = crate::errors::StagedagError;

    fn try_from(raw: RawJobFile) -> std::result::Result<Self, Self::Error> {
        validate_raw_job(&raw)?;
        let plan = build_plan(&raw)?;
        warn_unknown_simulation_targets(&raw, &plan);
        Ok(JobFile::new_unchecked(
            raw.scheduler,
            raw.simulation,
            raw.executor,
            plan,
        ))
    }
}

fn validate_raw_job(raw: &RawJobFile) -> Result<()> {
    ensure_has_stages(raw)?;
    validate_scheduler_section(raw)?;
    validate_executors(raw)?;
    Ok(())
}

fn ensure_has_stages(raw: &RawJobFile) -> Result<()> {
    if raw.stage.is_empty() {
        return Err(StagedagError::ConfigError(
            "job file must contain at least one [stage.<id>] section".to_string(),
        ));
    }
    Ok(())
}

fn validate_scheduler_section(raw: &RawJobFile) -> Result<()> {
    if raw.scheduler.event_channel_capacity == 0 {
        return Err(StagedagError::ConfigError(
            "[scheduler].event_channel_capacity must be >= 1 (got 0)".to_string(),
        ));
    }
    Ok(())
}

fn validate_executors(raw: &RawJobFile) -> Result<()> {
    for (id, executor) in raw.executor.iter() {
        if id.trim().is_empty() {
            return Err(StagedagError::ConfigError(
                "executor ids must not be empty".to_string(),
            ));
        }
        if executor.capacity == 0 {
            warn!(executor = %id, "executor has capacity 0 and will never run anything");
        }
    }
    Ok(())
}

/// Plan construction checks parallelism, dependencies and cycles.
fn build_plan(raw: &RawJobFile) -> Result<PhysicalPlan> {
    let stages = raw.stage.iter().map(|(id, cfg)| {
        cfg.after
            .iter()
            .fold(StageSpec::new(id.clone(), cfg.parallelism), |spec, up| {
                spec.after(up.clone())
            })
            .with_locality(cfg.locality)
    });

    PhysicalPlan::new(raw.name.clone(), stages).map_err(|err| match err {
        StagedagError::InvalidPlan(msg) => StagedagError::ConfigError(msg),
        other => other,
    })
}

fn warn_unknown_simulation_targets(raw: &RawJobFile, plan: &PhysicalPlan) {
    for name in raw.simulation.fail_first_attempt.iter() {
        let known = name
            .parse::<TaskGroupId>()
            .ok()
            .and_then(|id| plan.stage(&id.stage).map(|s| id.index < s.parallelism))
            .unwrap_or(false);
        if !known {
            warn!(task_group = %name, "[simulation].fail_first_attempt names an unknown task group");
        }
    }
    for id in raw.simulation.lose_executor_after.keys() {
        if !raw.executor.contains_key(id) {
            warn!(executor = %id, "[simulation].lose_executor_after names an unknown executor");
        }
    }
}

// src/lib.rs

pub mod cli;
pub mod config;
pub mod dag;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod logging;
pub mod metrics;
pub mod types;

use anyhow::{bail, Result};
use tracing::{debug, info};

use crate::cli::CliArgs;
use crate::config::loader::load_and_validate;
use crate::config::model::JobFile;
use crate::dag::{JobSnapshot, JobState};
use crate::engine::{CoreScheduler, Runtime, SchedulerHandle};
use crate::exec::LocalExecutorBackend;
use crate::metrics::TracingMetricSink;

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - job file loading
/// - core scheduler + runtime
/// - the simulated local executor pool
/// - Ctrl-C handling
pub async fn run(args: CliArgs) -> Result<()> {
    let job = load_and_validate(&args.plan)?;

    if args.dry_run {
        print_dry_run(&job);
        return Ok(());
    }

    let (handle, event_rx) = SchedulerHandle::channel(job.scheduler.event_channel_capacity);
    let executor = LocalExecutorBackend::new(handle.clone(), job.simulation.clone());
    let core = CoreScheduler::new(job.options());
    let runtime = Runtime::new(core, event_rx, executor, TracingMetricSink);
    let runtime_task = tokio::spawn(runtime.run());

    // Ctrl-C → terminate.
    {
        let handle = handle.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                eprintln!("failed to listen for Ctrl+C: {e}");
                return;
            }
            let _ = handle.terminate().await;
        });
    }

    for (id, executor) in job.executors.iter() {
        handle.on_executor_added(id.clone(), executor.capacity).await?;
    }

    let mut job_handle = handle
        .submit_job(job.plan.clone(), job.scheduler.max_schedule_attempt)
        .await?;
    info!(job = %job_handle.job_id(), "waiting for job");

    let state = job_handle.wait_for_terminal().await?;
    print_summary(&job_handle.snapshot());

    if !matches!(state, JobState::Terminated) {
        handle.terminate().await?;
    }
    runtime_task.await??;

    match state {
        JobState::Complete => Ok(()),
        JobState::Failed { cause } => bail!("job {} failed: {cause}", job_handle.job_id()),
        JobState::Terminated => bail!("job {} was terminated", job_handle.job_id()),
        JobState::Executing => bail!("job {} did not finish", job_handle.job_id()),
    }
}

/// Dry-run output: stages in topological order plus the executor pool.
fn print_dry_run(job: &JobFile) {
    let plan = &job.plan;
    println!("stagedag dry-run: plan '{}'", plan.id());
    println!(
        "  scheduler.max_schedule_attempt = {}",
        job.scheduler.max_schedule_attempt
    );
    println!("  scheduler.escalation = {:?}", job.scheduler.escalation);
    println!("  scheduler.placement = {:?}", job.scheduler.placement);
    println!();

    println!("stages ({}):", plan.stages().count());
    for id in plan.graph().topological_order() {
        let Some(stage) = plan.stage(&id) else { continue };
        println!("  - {id}");
        println!("      parallelism: {}", stage.parallelism);
        if !stage.upstream.is_empty() {
            println!("      after: {:?}", stage.upstream);
        }
        println!("      locality: {:?}", stage.locality);
    }
    println!();

    println!("executors ({}):", job.executors.len());
    for (id, executor) in job.executors.iter() {
        println!("  - {id} (capacity {})", executor.capacity);
    }

    debug!("dry-run complete (nothing scheduled)");
}

fn print_summary(snapshot: &JobSnapshot) {
    println!("job {} ({:?})", snapshot.job_id, snapshot.state);
    for (stage, state) in snapshot.stages.iter() {
        println!("  stage {stage}: {state:?}");
    }
    for info in snapshot.task_groups.values() {
        let location = info.output_location.as_deref().unwrap_or("-");
        println!(
            "    {} {} attempts={} output={location}",
            info.id, info.state, info.attempt
        );
    }
}

// src/errors.rs

//! Crate-wide error aliases and helpers.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StagedagError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Invalid physical plan: {0}")]
    InvalidPlan(String),

    #[error("Cycle detected in stage DAG: {0}")]
    DagCycle(String),

    /// A plan update conflicts with a stage that already started; the job
    /// keeps running under the previous plan.
    #[error("Invalid plan update: {0}")]
    InvalidUpdate(String),

    #[error("Job '{0}' is still active; terminate it or wait for it to finish")]
    JobAlreadyActive(String),

    #[error("No active job")]
    NoActiveJob,

    #[error("Scheduler is no longer running")]
    SchedulerClosed,

    #[error("Executor transport error: {0}")]
    Transport(String),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, StagedagError>;

// src/config/mod.rs

//! Job file loading and validation for stagedag.
//!
//! Responsibilities:
//! - Define the TOML-backed data model (`model.rs`).
//! - Load a job file from disk (`loader.rs`).
//! - Validate it into a physical plan plus scheduler settings (`validate.rs`).

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{load_and_validate, load_from_path, parse_str};
pub use model::{ExecutorConfig, JobFile, RawJobFile, SchedulerSection, StageConfig};

// src/exec/mod.rs

//! Executor side of the scheduler.
//!
//! - [`registry`] tracks live executors and the attempts occupying their
//!   slots.
//! - [`backend`] provides the `ExecutorBackend` trait the runtime delivers
//!   launches and cancels through, plus `LocalExecutorBackend`.
//! - [`executor_loop`] owns the simulated in-process executor pool.
//! - [`task_runner`] runs a single simulated attempt.

pub mod backend;
pub mod executor_loop;
pub mod registry;
pub mod task_runner;

pub use backend::{ExecutorBackend, LocalExecutorBackend};
pub use executor_loop::{spawn_local_pool, PoolCommand, SimulationSettings};
pub use registry::{ExecutorView, RegistryError, RegistrySnapshot, ResourceRegistry};

//! Local execution of claimed jobs.
//!
//! - [`JobExecutor`]: runs `<shell> -c <configuration>` and captures output
//!   incrementally into [`StreamBuffers`]
//! - [`LocalLauncher`]: the [`ExecutionLauncher`] that spawns executions,
//!   tracks them for stop/abandon and writes their result
//!
//! # Security Note
//!
//! Configurations are executed directly via shell without sandboxing.

pub mod executor;
pub mod launcher;

pub use executor::{ExecutionOutcome, JobExecutor, StreamBuffers};
pub use launcher::{ExecutionHandle, ExecutionLauncher, LocalLauncher};

//! A process-level micro-benchmark orchestrator.
//!
//! `procbench` runs a benchmark function in a short-lived worker child process, calibrates the
//! loop count needed to clear a minimum measurement duration, and spawns as many such workers as
//! requested — never in parallel — collecting each one's result over an inherited pipe. It also
//! supports measuring an external command and comparing a reference executable against a changed
//! one.
//!
//! # Usage
//! ```no_run
//! use procbench::Runner;
//! use procbench::model::Metadata;
//!
//! # fn main() -> anyhow::Result<()> {
//! let mut runner = Runner::new()?;
//! runner.bench_func("my-benchmark", Metadata::new(), || {
//!     // do the thing being measured
//!     Ok(())
//! })?;
//! #     Ok(())
//! # }
//! ```
//!
//! Run the resulting binary with `--help` to see the full flag surface (`--rigorous`, `--fast`,
//! `--calibrate`, `--compare-to`, `--affinity`, ...).

#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::cargo)]

pub mod affinity;
pub mod bench_command;
pub mod calibrate;
pub mod cli;
pub mod compare;
pub mod error;
pub mod master;
pub mod memtrack;
pub mod model;
pub mod pipe;
pub mod policy;
pub mod runner;
pub mod runtime;
pub mod task;
pub mod worker;
pub mod worker_cmd;

pub use cli::CliArgs;
pub use error::OrchestratorError;
pub use policy::{Policy, RunnerDefaults};
pub use runner::Runner;
pub use runtime::RuntimeDescriptor;

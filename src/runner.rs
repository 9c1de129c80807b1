//! Task Registry and top-level public API (C9): the `Runner` that benchmark programs construct,
//! register tasks against, and let decide whether this process invocation is a worker, a compare
//! driver, or a master orchestrator (§4.9).

use std::collections::HashSet;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use clap::Parser;

use crate::cli::CliArgs;
use crate::error::OrchestratorError;
use crate::model::{Benchmark, Metadata};
use crate::pipe::WritePipe;
use crate::policy::{self, Policy, RunnerDefaults};
use crate::runtime::RuntimeDescriptor;
use crate::task::{BenchCommandTask, MeasureFn, MeasuredSample, Task, WorkerProcessTask};
use crate::worker_cmd::AddCmdlineArgs;

/// Registers and runs benchmark tasks, dispatching each one to the worker, compare, or master
/// path depending on how the surrounding program was invoked (§4.9).
///
/// A `Runner` is normally constructed once per `main`, via [`Runner::new`], and every
/// `bench_*`/`timeit` call on it decides on the spot whether this process invocation should
/// actually measure that task or skip it — mirroring how the underlying script re-executes itself
/// once per worker and relies on task registration order to find the one task each worker should
/// run.
pub struct Runner {
    cli: CliArgs,
    defaults: RunnerDefaults,
    runtime: RuntimeDescriptor,
    add_cmdline_args: Option<Box<AddCmdlineArgs>>,
    names: HashSet<String>,
    worker_task_counter: usize,
    emitted_benchmarks: usize,
}

impl Runner {
    /// Build a `Runner` from the process's real command line and executable path, with the
    /// canonical defaults (§4.1 rule 11 picks JIT-aware numbers from there).
    ///
    /// Initializes the ambient logging and panic-reporting stack (`env_logger`, `human-panic`)
    /// the way a standalone binary built on this crate is expected to.
    ///
    /// # Errors
    /// Returns an error if the current executable's path cannot be resolved.
    pub fn new() -> anyhow::Result<Self> {
        human_panic::setup_panic!();
        let _ = env_logger::try_init();
        Self::with_defaults(RunnerDefaults::new())
    }

    /// Build a `Runner` with caller-specified defaults, otherwise identical to [`Runner::new`].
    ///
    /// # Errors
    /// Returns an error if the current executable's path cannot be resolved.
    pub fn with_defaults(defaults: RunnerDefaults) -> anyhow::Result<Self> {
        let cli = CliArgs::parse();
        let runtime = RuntimeDescriptor::current()?;
        Ok(Runner {
            cli,
            defaults,
            runtime,
            add_cmdline_args: None,
            names: HashSet::new(),
            worker_task_counter: 0,
            emitted_benchmarks: 0,
        })
    }

    /// Register a hook invoked while building every worker command line, so an embedding program
    /// can pass its own extra flags down to its workers.
    pub fn set_add_cmdline_args<F>(&mut self, hook: F)
    where
        F: Fn(&mut Vec<String>, &Policy) + Send + Sync + 'static,
    {
        self.add_cmdline_args = Some(Box::new(hook));
    }

    fn next_worker_task_id(&mut self, name: &str) -> anyhow::Result<usize> {
        if !self.names.insert(name.to_string()) {
            anyhow::bail!(OrchestratorError::Config(format!("a benchmark named {name:?} is already registered")));
        }
        let id = self.worker_task_counter;
        self.worker_task_counter += 1;
        Ok(id)
    }

    fn current_policy(&self) -> Result<Policy, OrchestratorError> {
        policy::resolve(&self.cli, &self.defaults, &self.runtime, self.emitted_benchmarks)
    }

    /// Register and, if this process invocation calls for it, run a benchmark whose measurement
    /// is an in-process function called `loops` times per value.
    ///
    /// # Errors
    /// Returns an error if `name` is already registered, if the resolved [`Policy`] is invalid, or
    /// if dispatch (worker/compare/master) fails.
    pub fn bench_func<F>(&mut self, name: impl Into<String>, metadata: Metadata, mut f: F) -> anyhow::Result<Option<Benchmark>>
    where
        F: FnMut() -> anyhow::Result<()> + Send + 'static,
    {
        let measure: MeasureFn = Box::new(move |loops| {
            let start = Instant::now();
            for _ in 0..loops {
                f()?;
            }
            Ok(MeasuredSample { duration: start.elapsed(), rss: None })
        });
        self.dispatch_worker_process(name, metadata, None, measure)
    }

    /// Register and, if called for, run a benchmark whose function measures its own duration and
    /// returns it, rather than being timed by the `Runner` around a loop (the distilled design's
    /// `bench_time_func`).
    ///
    /// # Errors
    /// Same as [`Runner::bench_func`].
    pub fn bench_time_func<F>(&mut self, name: impl Into<String>, metadata: Metadata, mut f: F) -> anyhow::Result<Option<Benchmark>>
    where
        F: FnMut(u64) -> anyhow::Result<Duration> + Send + 'static,
    {
        let measure: MeasureFn = Box::new(move |loops| Ok(MeasuredSample { duration: f(loops)?, rss: None }));
        self.dispatch_worker_process(name, metadata, None, measure)
    }

    /// Register and, if called for, run a benchmark equivalent to the distilled design's
    /// `timeit`: `setup` runs once per value before the timed loop, `stmt` runs `loops` times
    /// inside it. There is no string evaluation here — both are ordinary closures (see
    /// `SPEC_FULL.md` on why this surface is translated rather than copied verbatim).
    ///
    /// # Errors
    /// Same as [`Runner::bench_func`].
    pub fn timeit<S, T>(&mut self, name: impl Into<String>, mut setup: S, mut stmt: T) -> anyhow::Result<Option<Benchmark>>
    where
        S: FnMut() + Send + 'static,
        T: FnMut() + Send + 'static,
    {
        let measure: MeasureFn = Box::new(move |loops| {
            setup();
            let start = Instant::now();
            for _ in 0..loops {
                stmt();
            }
            Ok(MeasuredSample { duration: start.elapsed(), rss: None })
        });
        self.dispatch_worker_process(name, Metadata::new(), None, measure)
    }

    fn dispatch_worker_process(&mut self, name: impl Into<String>, metadata: Metadata, inner_loops: Option<u64>, measure: MeasureFn) -> anyhow::Result<Option<Benchmark>> {
        let name = name.into();
        let worker_task_id = self.next_worker_task_id(&name)?;
        let mut task = Task::WorkerProcess(WorkerProcessTask::new(name, metadata, worker_task_id, measure));
        if let Task::WorkerProcess(inner) = &mut task {
            inner.inner_loops = inner_loops;
        }
        self.dispatch(task)
    }

    /// Register and, if called for, run a benchmark that measures an external command via the
    /// `bench-time-shim` helper launcher (§4.9 `bench_command`).
    ///
    /// # Errors
    /// Same as [`Runner::bench_func`].
    pub fn bench_command(&mut self, name: impl Into<String>, command: Vec<String>) -> anyhow::Result<Option<Benchmark>> {
        let name = name.into();
        let worker_task_id = self.next_worker_task_id(&name)?;
        let task = Task::Command(BenchCommandTask::new(name, command, worker_task_id));
        self.dispatch(task)
    }

    fn dispatch(&mut self, mut task: Task) -> anyhow::Result<Option<Benchmark>> {
        let policy = self.current_policy()?;

        if policy.worker {
            if policy.worker_task != Some(task.worker_task_id() as u64) {
                return Ok(None);
            }
            let pipe_fd = policy.pipe_fd.ok_or_else(|| OrchestratorError::Config("--worker requires --pipe".to_string()))?;
            // A worker has no master-style poll loop to check an AtomicBool between steps, so it
            // reacts to SIGINT directly in the handler: print the diagnostic §4.5/§7 specify and
            // exit nonzero on the spot, rather than limping through a possibly mid-measurement
            // benchmark loop.
            let _ = ctrlc::set_handler(|| {
                eprintln!("Benchmark worker interrupted: exit");
                std::process::exit(1);
            });
            // SAFETY: --pipe is the fd a master process created and passed to us specifically as
            // our inherited write end; this process owns it exclusively from here on.
            let pipe = unsafe { WritePipe::from_raw_fd(pipe_fd) };
            crate::worker::run_worker_and_emit(&mut task, &policy, pipe)?;
            std::process::exit(0);
        }

        let benchmark = if policy.python_ref.is_some() {
            let comparison = crate::compare::run_comparison(&mut task, &policy, &self.runtime, self.add_cmdline_args.as_deref())?;
            if !policy.quiet {
                println!("{}", crate::compare::render(&comparison));
            }
            comparison.changed.benchmark
        } else {
            let benchmark = crate::master::run_master(&task, &policy, &self.runtime, &policy.python_changed, self.add_cmdline_args.as_deref())?;
            if !policy.quiet {
                self.display(&policy, &benchmark);
            }
            self.persist(&policy, &benchmark)?;
            benchmark
        };

        self.emitted_benchmarks += 1;
        Ok(Some(benchmark))
    }

    fn display(&self, policy: &Policy, benchmark: &Benchmark) {
        let values: Vec<f64> = benchmark.runs.iter().flat_map(crate::model::Run::values).filter_map(|s| if let crate::model::Sample::Value { duration, .. } = s { Some(duration.as_secs_f64()) } else { None }).collect();

        let average = if values.is_empty() { 0.0 } else { values.iter().sum::<f64>() / values.len() as f64 };
        println!("{}: {:.9} sec/value ({} runs)", benchmark.name, average, benchmark.run_count());

        if policy.metadata {
            for (key, value) in &benchmark.metadata {
                println!("  metadata: {key} = {value}");
            }
        }
        if policy.stats && !values.is_empty() {
            let min = values.iter().cloned().fold(f64::INFINITY, f64::min);
            let max = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
            println!("  min: {min:.9} sec, max: {max:.9} sec");
        }
        if policy.dump {
            for (index, run) in benchmark.runs.iter().enumerate() {
                println!("  run {index}: {} samples", run.samples.len());
            }
        }
        if policy.hist {
            for value in &values {
                println!("  {}", "#".repeat((value * 1000.0).round().max(1.0) as usize));
            }
        }
    }

    fn persist(&self, policy: &Policy, benchmark: &Benchmark) -> anyhow::Result<()> {
        let Some(path) = policy.output.as_ref().or(policy.append.as_ref()) else {
            return Ok(());
        };
        let mut suite = if policy.append.is_some() && path.exists() {
            let existing = std::fs::read_to_string(path)?;
            crate::model::Suite::from_json(&existing).unwrap_or_else(|_| crate::model::Suite::single(benchmark.clone()))
        } else {
            crate::model::Suite { benchmarks: Vec::new() }
        };
        suite.benchmarks.push(benchmark.clone());
        std::fs::write(path, suite.to_json().map_err(OrchestratorError::Json)?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_benchmark_names_are_rejected() {
        let cli = CliArgs::parse_from(["prog", "--debug-single-value"]);
        let mut runner = Runner {
            cli,
            defaults: RunnerDefaults::new(),
            runtime: RuntimeDescriptor { executable: PathBuf::from("/bin/true"), program_args: Vec::new(), has_jit: false },
            add_cmdline_args: None,
            names: HashSet::new(),
            worker_task_counter: 0,
            emitted_benchmarks: 0,
        };
        assert!(runner.next_worker_task_id("dup").is_ok());
        assert!(runner.next_worker_task_id("dup").is_err());
    }

    #[test]
    fn worker_task_ids_increment_regardless_of_name() {
        let cli = CliArgs::parse_from(["prog", "--debug-single-value"]);
        let mut runner = Runner {
            cli,
            defaults: RunnerDefaults::new(),
            runtime: RuntimeDescriptor { executable: PathBuf::from("/bin/true"), program_args: Vec::new(), has_jit: false },
            add_cmdline_args: None,
            names: HashSet::new(),
            worker_task_counter: 0,
            emitted_benchmarks: 0,
        };
        assert_eq!(runner.next_worker_task_id("a").unwrap(), 0);
        assert_eq!(runner.next_worker_task_id("b").unwrap(), 1);
    }
}

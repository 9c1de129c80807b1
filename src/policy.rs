//! Policy Resolver (C8): translates the raw CLI flag set into a frozen [`Policy`] per the
//! numbered rules in §4.1 of the design.

use std::path::{Path, PathBuf};

use crate::cli::CliArgs;
use crate::error::OrchestratorError;
use crate::runtime::RuntimeDescriptor;

/// Defaults a [`crate::runner::Runner`] is constructed with, before the JIT-aware fallback in
/// rule 11 and before any CLI flag overrides them.
#[derive(Clone, Debug, Default)]
pub struct RunnerDefaults {
    /// Explicit default process count, if the embedding program wants one.
    pub processes: Option<u64>,
    /// Explicit default value count, if the embedding program wants one.
    pub values: Option<u64>,
    /// Explicit default warmup count, if the embedding program wants one.
    pub warmups: Option<u64>,
    /// Default loop count; `0` means "calibrate".
    pub loops: u64,
    /// Minimum duration in seconds a single measured value should take.
    pub min_time: f64,
    /// Maximum duration in seconds a single measured value should take before the calibrator
    /// stops doubling.
    pub max_time: f64,
}

impl RunnerDefaults {
    /// The canonical defaults: loops=0 (calibrate), `min_time=0.1`, `max_time=1.0`, chosen so an
    /// uncalibrated run takes about half a second and a full `processes`-worker run takes about
    /// five seconds by default.
    #[must_use]
    pub fn new() -> Self {
        RunnerDefaults {
            processes: None,
            values: None,
            warmups: None,
            loops: 0,
            min_time: 0.1,
            max_time: 1.0,
        }
    }
}

/// The resolved configuration for one orchestration (§3 Data Model, §4.1 Policy Resolver).
#[derive(Clone, Debug)]
pub struct Policy {
    /// Number of worker processes to spawn.
    pub processes: u64,
    /// Number of measured values per process.
    pub values_per_process: u64,
    /// Number of warmup iterations per process, excluded from statistics.
    pub warmups_per_process: u64,
    /// Loop count per value; `0` until calibration fixes it.
    pub loops: u64,
    /// Minimum duration in seconds a measured value should take.
    pub min_time: f64,
    /// Maximum duration in seconds a measured value should take.
    pub max_time: f64,
    /// Explicit or auto-detected CPU affinity list, formatted as `a,b-c,...`.
    pub affinity_cpus: Option<String>,
    /// Whether `affinity_cpus` came from auto-detected isolated CPUs rather than an explicit
    /// `--affinity` flag. Threaded separately from `affinity_cpus` itself (as `--affinity-auto` on
    /// the worker command line) so a worker can tell a re-forwarded auto-detected list apart from
    /// a user-supplied one and treat a pinning failure accordingly (warn vs. abort, §4.2/§7).
    pub affinity_auto: bool,
    /// Whether `--track-memory` was requested.
    pub track_memory: bool,
    /// Whether `--tracemalloc` was requested.
    pub tracemalloc: bool,
    /// Whether `--verbose` is in effect.
    pub verbose: bool,
    /// Whether `--quiet` is in effect.
    pub quiet: bool,
    /// The pipe file descriptor a worker should write its result suite to.
    pub pipe_fd: Option<i32>,
    /// Environment variables to propagate to worker processes, beyond locale variables.
    pub inherit_environ: Vec<String>,
    /// Whether to propagate locale environment variables (`LANG`, `LC_*`).
    pub locale: bool,
    /// Absolute path to the reference executable (for `--compare-to`).
    pub python_ref: Option<PathBuf>,
    /// Absolute path to the executable under test.
    pub python_changed: PathBuf,
    /// Display names for the compare flow, if `--python-names` was given.
    pub python_names: Option<(String, String)>,
    /// Whether this is a worker process.
    pub worker: bool,
    /// Which registered task id a worker should actually run.
    pub worker_task: Option<u64>,
    /// Whether to only calibrate (no measured values).
    pub calibrate: bool,
    /// `-d/--dump`: display individual run results.
    pub dump: bool,
    /// `-m/--metadata`: display metadata.
    pub metadata: bool,
    /// `-g/--hist`: display a histogram.
    pub hist: bool,
    /// `-t/--stats`: display statistics.
    pub stats: bool,
    /// `-o/--output FILE`, if set.
    pub output: Option<PathBuf>,
    /// `--append FILE`, if set.
    pub append: Option<PathBuf>,
}

fn resolve_absolute(path: &Path) -> Result<PathBuf, OrchestratorError> {
    std::fs::canonicalize(path).map_err(|source| OrchestratorError::InvalidExecutable {
        path: path.to_path_buf(),
        source,
    })
}

/// Resolve the raw CLI flags against the Runner's defaults and the runtime's capabilities into a
/// frozen [`Policy`], implementing the numbered rules in §4.1 of the design in order.
///
/// # Errors
/// Returns [`OrchestratorError::Config`] for any of the fatal combinations in §4.1 (rules 6, 7, 8,
/// 9), or [`OrchestratorError::InvalidExecutable`] if an executable path cannot be resolved.
pub fn resolve(cli: &CliArgs, defaults: &RunnerDefaults, runtime: &RuntimeDescriptor, emitted_benchmarks: usize) -> Result<Policy, OrchestratorError> {
    let (default_processes, default_values, default_warmups) = jit_aware_defaults(defaults, runtime);

    let mut verbose = cli.verbose;
    let mut quiet = cli.quiet;

    // Rules 1-2.
    if cli.pipe.is_some() {
        quiet = true;
        verbose = false;
    } else if quiet {
        verbose = false;
    }

    let mut processes = cli.processes.unwrap_or(default_processes);
    let mut values_per_process = cli.values.unwrap_or(default_values);
    let mut warmups_per_process = cli.warmups.unwrap_or(default_warmups);
    let mut loops = cli.loops;
    let mut min_time = cli.min_time;

    // Rules 3-5, mutually exclusive, in this precedence order.
    if cli.rigorous {
        processes = default_processes * 2;
    } else if cli.fast {
        processes = (default_processes / 2).max(3);
        values_per_process = (default_values * 2 / 3).max(2);
    } else if cli.debug_single_value {
        processes = 1;
        warmups_per_process = 0;
        values_per_process = 1;
        loops = 1;
        min_time = 1e-9;
    }

    // Rule 6.
    let calibrate = cli.calibrate;
    if calibrate {
        if !cli.worker {
            return Err(OrchestratorError::Config(
                "calibration can only be done in a worker process".to_string(),
            ));
        }
        loops = 0;
        warmups_per_process = 0;
        values_per_process = 0;
    }

    // Rule 7.
    if cli.worker_task.is_some() && !cli.worker {
        return Err(OrchestratorError::Config("--worker-task can only be used with --worker".to_string()));
    }

    // Rule 8, overridden by the append-after-first rule (SPEC_FULL.md §9) when this Runner has
    // already emitted at least one benchmark.
    if let Some(output) = &cli.output {
        if emitted_benchmarks == 0 && output.exists() {
            return Err(OrchestratorError::Config(format!("the JSON file {} already exists", output.display())));
        }
    }

    // Rule 9.
    if cli.compare_to.is_some() && (cli.output.is_some() || cli.append.is_some()) {
        return Err(OrchestratorError::Config(
            "--compare-to is incompatible with --output/--append".to_string(),
        ));
    }

    // Rule 10.
    let python_changed = match &cli.python {
        Some(path) => resolve_absolute(path)?,
        None => runtime.executable.clone(),
    };
    let python_ref = cli.compare_to.as_ref().map(|path| resolve_absolute(path)).transpose()?;

    Ok(Policy {
        processes,
        values_per_process,
        warmups_per_process,
        loops,
        min_time,
        max_time: defaults.max_time,
        affinity_cpus: cli.affinity.clone(),
        affinity_auto: cli.affinity_auto,
        track_memory: cli.track_memory,
        tracemalloc: cli.tracemalloc,
        verbose,
        quiet,
        pipe_fd: cli.pipe,
        inherit_environ: cli.inherit_environ.clone().unwrap_or_default(),
        locale: !cli.no_locale,
        python_ref,
        python_changed,
        python_names: cli.python_names.clone(),
        worker: cli.worker,
        worker_task: cli.worker_task,
        calibrate,
        dump: cli.dump,
        metadata: cli.metadata,
        hist: cli.hist,
        stats: cli.stats,
        output: cli.output.clone(),
        append: cli.append.clone(),
    })
}

/// Rule 11: if the caller didn't pick explicit defaults, fall back to JIT-aware ones.
fn jit_aware_defaults(defaults: &RunnerDefaults, runtime: &RuntimeDescriptor) -> (u64, u64, u64) {
    if runtime.has_jit {
        let processes = defaults.processes.unwrap_or(6);
        let values = defaults.values.unwrap_or(10);
        let warmups = defaults.warmups.unwrap_or_else(|| (1.0 / defaults.min_time).ceil() as u64);
        (processes, values, warmups)
    } else {
        let processes = defaults.processes.unwrap_or(20);
        let values = defaults.values.unwrap_or(3);
        let warmups = defaults.warmups.unwrap_or(1);
        (processes, values, warmups)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn runtime() -> RuntimeDescriptor {
        RuntimeDescriptor {
            executable: PathBuf::from("/bin/true"),
            program_args: Vec::new(),
            has_jit: false,
        }
    }

    fn parse(args: &[&str]) -> CliArgs {
        let mut full = vec!["prog"];
        full.extend_from_slice(args);
        CliArgs::parse_from(full)
    }

    #[test]
    fn debug_single_value_forces_exact_policy() {
        let cli = parse(&["--debug-single-value"]);
        let policy = resolve(&cli, &RunnerDefaults::new(), &runtime(), 0).unwrap();
        assert_eq!(policy.processes, 1);
        assert_eq!(policy.values_per_process, 1);
        assert_eq!(policy.warmups_per_process, 0);
        assert_eq!(policy.loops, 1);
    }

    #[test]
    fn fast_halves_processes_with_floor_and_scales_values() {
        let cli = parse(&["--fast"]);
        let policy = resolve(&cli, &RunnerDefaults::new(), &runtime(), 0).unwrap();
        assert_eq!(policy.processes, 10); // max(20/2, 3)
        assert_eq!(policy.values_per_process, 2); // max(3*2/3, 2)
    }

    #[test]
    fn rigorous_doubles_processes_and_leaves_values_alone() {
        let cli = parse(&["--rigorous"]);
        let policy = resolve(&cli, &RunnerDefaults::new(), &runtime(), 0).unwrap();
        assert_eq!(policy.processes, 40);
        assert_eq!(policy.values_per_process, 3);
    }

    #[test]
    fn calibrate_without_worker_is_fatal() {
        let cli = parse(&["--calibrate"]);
        let err = resolve(&cli, &RunnerDefaults::new(), &runtime(), 0).unwrap_err();
        assert!(matches!(err, OrchestratorError::Config(_)));
    }

    #[test]
    fn worker_task_without_worker_is_fatal() {
        let cli = parse(&["--worker-task", "2"]);
        let err = resolve(&cli, &RunnerDefaults::new(), &runtime(), 0).unwrap_err();
        assert!(matches!(err, OrchestratorError::Config(_)));
    }

    #[test]
    fn compare_to_conflicts_with_output() {
        let cli = parse(&["--compare-to", "/bin/false", "--output", "/tmp/does-not-exist-procbench.json"]);
        let err = resolve(&cli, &RunnerDefaults::new(), &runtime(), 0).unwrap_err();
        assert!(matches!(err, OrchestratorError::Config(_)));
    }

    #[test]
    fn existing_output_is_fatal_only_for_the_first_benchmark() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let cli = parse(&["--output", file.path().to_str().unwrap()]);

        let err = resolve(&cli, &RunnerDefaults::new(), &runtime(), 0).unwrap_err();
        assert!(matches!(err, OrchestratorError::Config(_)));

        let policy = resolve(&cli, &RunnerDefaults::new(), &runtime(), 1).unwrap();
        assert_eq!(policy.output, Some(file.path().to_path_buf()));
    }

    #[test]
    fn pipe_forces_quiet_and_not_verbose() {
        let cli = parse(&["--pipe", "5", "--verbose"]);
        let policy = resolve(&cli, &RunnerDefaults::new(), &runtime(), 0).unwrap();
        assert!(policy.quiet);
        assert!(!policy.verbose);
    }

    #[test]
    fn jit_defaults_apply_only_when_caller_left_fields_unset() {
        let mut rt = runtime();
        rt.has_jit = true;
        let cli = parse(&[]);
        let policy = resolve(&cli, &RunnerDefaults::new(), &rt, 0).unwrap();
        assert_eq!(policy.processes, 6);
        assert_eq!(policy.values_per_process, 10);
        assert_eq!(policy.warmups_per_process, 10); // ceil(1.0 / 0.1)
    }
}

//! Worker Runtime (C4): inside a child process, run one benchmark task, measure it, stream the
//! result suite over the pipe, and exit (§4.5).

use crate::affinity;
use crate::error::OrchestratorError;
use crate::memtrack::{MemoryTracker, NullTracker, SysinfoTracker};
use crate::model::{Benchmark, Metadata, Run, Sample, Suite};
use crate::pipe::WritePipe;
use crate::policy::Policy;
use crate::task::Task;

/// Run `task` as a worker under `policy` and return the [`Run`] it produced.
///
/// This performs CPU affinity pinning and memory tracking, then either calibrates (§4.6, if
/// `policy.calibrate`) or performs `policy.warmups_per_process` warmup iterations followed by
/// `policy.values_per_process` measured iterations, in that order (§5 Ordering).
///
/// # Errors
/// Returns [`OrchestratorError::PinningUnavailable`] if an *explicit* `--affinity` CPU list could
/// not be pinned, or propagates any error from the task's measurement function (surfaced by the
/// caller as a nonzero worker exit, per §7 `MeasurementError`).
pub fn run_worker(task: &mut Task, policy: &Policy) -> anyhow::Result<Run> {
    if let Some(affinity) = affinity::bind(policy.affinity_cpus.as_deref(), policy.affinity_auto, policy.quiet)? {
        log::debug!("pinned worker process to CPUs: {affinity}");
    }

    let mut tracker: Box<dyn MemoryTracker> = if policy.track_memory || policy.tracemalloc {
        Box::new(SysinfoTracker::default())
    } else {
        Box::new(NullTracker)
    };
    tracker.start();

    let result = if policy.calibrate {
        run_calibration(task, policy)
    } else {
        run_measurement(task, policy)
    };

    let peak_rss = tracker.stop();
    result.map(|mut run| {
        if let Some(rss) = peak_rss {
            run.metadata.insert("worker_max_rss".to_string(), serde_json::Value::from(rss));
        }
        run
    })
}

fn run_calibration(task: &mut Task, policy: &Policy) -> anyhow::Result<Run> {
    let loops = crate::calibrate::calibrate(task, policy.min_time, policy.max_time)?;
    Ok(Run::from_calibration(loops, task.metadata()))
}

fn run_measurement(task: &mut Task, policy: &Policy) -> anyhow::Result<Run> {
    let inner_loops = task.inner_loops();

    let mut warmups = Vec::with_capacity(policy.warmups_per_process as usize);
    for _ in 0..policy.warmups_per_process {
        let sample = task.measure(policy.loops)?;
        warmups.push(Sample::Warmup {
            loops: policy.loops,
            inner_loops,
            duration: sample.duration,
        });
    }

    let mut values = Vec::with_capacity(policy.values_per_process as usize);
    for _ in 0..policy.values_per_process {
        let sample = task.measure(policy.loops)?;
        values.push(Sample::Value {
            loops: policy.loops,
            inner_loops,
            duration: sample.duration,
        });
    }

    Ok(Run::from_warmups_and_values(warmups, values, task.metadata()))
}

/// Run `task` as a worker, serialize a one-benchmark [`Suite`] containing the resulting [`Run`],
/// and write it to the inherited pipe (§4.5 steps 6-7).
///
/// # Errors
/// Propagates measurement errors from [`run_worker`], or [`OrchestratorError::Io`]/`Json` if the
/// pipe write or serialization fails.
pub fn run_worker_and_emit(task: &mut Task, policy: &Policy, pipe: WritePipe) -> anyhow::Result<()> {
    let run = run_worker(task, policy)?;
    let benchmark = Benchmark::new(task.name(), unit_metadata(task), run);
    let suite = Suite::single(benchmark);
    let json = suite.to_json().map_err(OrchestratorError::Json)?;
    pipe.write_suite(&json)?;
    Ok(())
}

fn unit_metadata(task: &Task) -> Metadata {
    let mut metadata = task.metadata();
    metadata.entry("unit".to_string()).or_insert_with(|| serde_json::Value::String("second".to_string()));
    metadata
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::CliArgs;
    use crate::model::Metadata;
    use crate::runtime::RuntimeDescriptor;
    use crate::task::{MeasuredSample, WorkerProcessTask};
    use clap::Parser;
    use std::path::PathBuf;
    use std::time::Duration;

    fn policy_with(args: &[&str]) -> Policy {
        let mut full = vec!["prog"];
        full.extend_from_slice(args);
        let cli = CliArgs::parse_from(full);
        let runtime = RuntimeDescriptor {
            executable: PathBuf::from("/bin/true"),
            program_args: Vec::new(),
            has_jit: false,
        };
        crate::policy::resolve(&cli, &crate::policy::RunnerDefaults::new(), &runtime, 0).unwrap()
    }

    fn constant_task(seconds: f64) -> Task {
        Task::WorkerProcess(WorkerProcessTask::new(
            "const-task",
            Metadata::new(),
            0,
            Box::new(move |_loops| Ok(MeasuredSample { duration: Duration::from_secs_f64(seconds), rss: None })),
        ))
    }

    #[test]
    fn debug_single_value_yields_one_value_sample() {
        let policy = policy_with(&["--debug-single-value", "--worker"]);
        let mut task = constant_task(0.01);
        let run = run_worker(&mut task, &policy).unwrap();
        assert_eq!(run.samples.len(), 1);
        assert!(matches!(run.samples[0], Sample::Value { .. }));
    }

    #[test]
    fn calibrate_flag_produces_a_single_calibration_sample() {
        let policy = policy_with(&["--worker", "--calibrate", "--min-time", "0.0000001"]);
        let mut task = constant_task(0.01);
        let run = run_worker(&mut task, &policy).unwrap();
        assert_eq!(run.samples.len(), 1);
        assert!(run.calibrated_loops().is_some());
    }

    #[test]
    fn warmups_precede_values_in_sample_order() {
        let mut full = vec!["prog", "--worker", "--warmups", "2", "--values", "3", "--loops", "1"];
        let cli = CliArgs::parse_from(full.drain(..));
        let runtime = RuntimeDescriptor {
            executable: PathBuf::from("/bin/true"),
            program_args: Vec::new(),
            has_jit: false,
        };
        let policy = crate::policy::resolve(&cli, &crate::policy::RunnerDefaults::new(), &runtime, 0).unwrap();

        let mut task = constant_task(0.001);
        let run = run_worker(&mut task, &policy).unwrap();
        assert_eq!(run.samples.len(), 5);
        assert!(run.samples[..2].iter().all(|s| matches!(s, Sample::Warmup { .. })));
        assert!(run.samples[2..].iter().all(|s| matches!(s, Sample::Value { .. })));
    }
}

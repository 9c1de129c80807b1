//! In-memory description of what to measure (§3 Data Model, Design Note "Dynamic dispatch on task
//! kind"): a tagged variant rather than an inheritance hierarchy.

use std::time::Duration;

use crate::model::Metadata;

/// The outcome of one call to a task's measurement function.
#[derive(Clone, Copy, Debug)]
pub struct MeasuredSample {
    /// Wall-clock duration of the measured iteration.
    pub duration: Duration,
    /// Peak resident set size observed during the iteration, if the task tracks it
    /// (`bench_command` tasks report this from the helper launcher's output; see
    /// `src/bin/bench_time_shim.rs`).
    pub rss: Option<u64>,
}

/// A measurement function `(task, loops) -> duration`, boxed so `bench_func`, `bench_time_func`,
/// and `timeit` can all produce the same [`Task::WorkerProcess`] variant from different closures.
pub type MeasureFn = Box<dyn FnMut(u64) -> anyhow::Result<MeasuredSample> + Send>;

/// A registered benchmark task, in one of the two shapes the design names (§3).
pub enum Task {
    /// Wraps a measurement function, used by `bench_func`, `bench_time_func`, and `timeit`.
    WorkerProcess(WorkerProcessTask),
    /// Wraps a subprocess command, used by `bench_command`.
    Command(BenchCommandTask),
}

/// A task whose measurement is an in-process closure.
pub struct WorkerProcessTask {
    /// Benchmark name, unique within a Runner.
    pub name: String,
    /// Metadata attached to every run this task produces.
    pub metadata: Metadata,
    /// Task-declared multiplier reported alongside durations so downstream tools can compute
    /// per-iteration time.
    pub inner_loops: Option<u64>,
    /// 0-based registration order.
    pub worker_task_id: usize,
    measure: MeasureFn,
}

/// A task whose measurement delegates to a subprocess command via a helper launcher.
pub struct BenchCommandTask {
    /// Benchmark name, unique within a Runner.
    pub name: String,
    /// Metadata attached to every run this task produces (includes `command`, and accumulates
    /// `command_max_rss` as runs complete).
    pub metadata: Metadata,
    /// 0-based registration order.
    pub worker_task_id: usize,
    /// The command (argv) to benchmark.
    pub command: Vec<String>,
}

impl Task {
    /// The task's registered name.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Task::WorkerProcess(t) => &t.name,
            Task::Command(t) => &t.name,
        }
    }

    /// The task's stable 0-based registration id.
    #[must_use]
    pub fn worker_task_id(&self) -> usize {
        match self {
            Task::WorkerProcess(t) => t.worker_task_id,
            Task::Command(t) => t.worker_task_id,
        }
    }

    /// The task's metadata as it stands right now (mutated in place as `bench_command` runs
    /// accumulate `command_max_rss`).
    #[must_use]
    pub fn metadata(&self) -> Metadata {
        match self {
            Task::WorkerProcess(t) => t.metadata.clone(),
            Task::Command(t) => t.metadata.clone(),
        }
    }

    /// `inner_loops` metadata, only meaningful for [`Task::WorkerProcess`].
    #[must_use]
    pub fn inner_loops(&self) -> Option<u64> {
        match self {
            Task::WorkerProcess(t) => t.inner_loops,
            Task::Command(_) => None,
        }
    }

    /// Run one measurement at the given loop count.
    ///
    /// # Errors
    /// Returns whatever error the underlying measurement function or subprocess launcher
    /// produces; this surfaces in the worker as [`crate::error::OrchestratorError::WorkerFailed`]
    /// via a nonzero exit.
    pub fn measure(&mut self, loops: u64) -> anyhow::Result<MeasuredSample> {
        match self {
            Task::WorkerProcess(t) => (t.measure)(loops),
            Task::Command(t) => crate::bench_command::run_command_measurement(t, loops),
        }
    }
}

impl WorkerProcessTask {
    /// Wrap a measurement function as a [`Task::WorkerProcess`].
    #[must_use]
    pub fn new(name: impl Into<String>, metadata: Metadata, worker_task_id: usize, measure: MeasureFn) -> Self {
        WorkerProcessTask {
            name: name.into(),
            metadata,
            inner_loops: None,
            worker_task_id,
            measure,
        }
    }
}

impl BenchCommandTask {
    /// Describe a subprocess command as a [`Task::Command`].
    #[must_use]
    pub fn new(name: impl Into<String>, command: Vec<String>, worker_task_id: usize) -> Self {
        let command_str = command.iter().map(|arg| format!("{arg:?}")).collect::<Vec<_>>().join(" ");
        let mut metadata = Metadata::new();
        metadata.insert("command".to_string(), serde_json::Value::String(command_str));
        BenchCommandTask {
            name: name.into(),
            metadata,
            worker_task_id,
            command,
        }
    }
}

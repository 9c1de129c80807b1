//! The data model shared between a worker and the master: [`Sample`], [`Run`], [`Benchmark`], and
//! [`Suite`].
//!
//! A worker produces exactly one [`Suite`] containing exactly one [`Benchmark`] containing exactly
//! one [`Run`]. The master accumulates one [`Run`] per worker into a single aggregated
//! [`Benchmark`]. See [`crate::master`] for the aggregation logic.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Arbitrary metadata attached to a benchmark or a run (unit, command, command_max_rss, ...).
///
/// Values are kept as [`serde_json::Value`] so callers can attach numbers, strings, or booleans
/// without a metadata schema.
pub type Metadata = BTreeMap<String, serde_json::Value>;

/// One measurement within a [`Run`].
///
/// Calibration produces [`Sample::Calibration`] instead of [`Sample::Warmup`]/[`Sample::Value`]
/// samples; see the Calibrator (`crate::calibrate`) and the open question in `SPEC_FULL.md` about
/// representing calibration as its own sample kind rather than overloading the warmup slot.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum Sample {
    /// A warmup iteration, excluded from statistics downstream but still recorded for replay.
    Warmup {
        /// Number of inner loops the measurement function ran.
        loops: u64,
        /// Task-declared multiplier, if any.
        inner_loops: Option<u64>,
        /// Measured wall-clock duration.
        duration: Duration,
    },
    /// A measured value iteration.
    Value {
        /// Number of inner loops the measurement function ran.
        loops: u64,
        /// Task-declared multiplier, if any.
        inner_loops: Option<u64>,
        /// Measured wall-clock duration.
        duration: Duration,
    },
    /// The outcome of the calibration protocol: the chosen loop count, with no timing attached.
    Calibration {
        /// The loop count the calibrator settled on.
        loops: u64,
    },
}

impl Sample {
    /// The loop count this sample was produced with, regardless of kind.
    #[must_use]
    pub fn loops(&self) -> u64 {
        match self {
            Sample::Warmup { loops, .. } | Sample::Value { loops, .. } | Sample::Calibration { loops } => *loops,
        }
    }

    /// `true` for [`Sample::Value`], `false` for warmups and calibration decisions.
    #[must_use]
    pub fn is_value(&self) -> bool {
        matches!(self, Sample::Value { .. })
    }
}

/// An immutable record produced by one worker execution of one task.
///
/// Invariant: within a single `Run`, all [`Sample::Warmup`] entries precede all [`Sample::Value`]
/// entries, matching the ordering the Worker Runtime produces them in.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Run {
    /// Samples in the order they were produced: warmups first, then values (or a single
    /// calibration sample).
    pub samples: Vec<Sample>,
    /// Metadata specific to this run (e.g. `command_max_rss` for a `bench_command` task).
    pub metadata: Metadata,
}

impl Run {
    /// Build a run from separately-collected warmup and value samples.
    #[must_use]
    pub fn from_warmups_and_values(warmups: Vec<Sample>, values: Vec<Sample>, metadata: Metadata) -> Self {
        let mut samples = warmups;
        samples.extend(values);
        Run { samples, metadata }
    }

    /// Build the single-sample run a calibration worker produces.
    #[must_use]
    pub fn from_calibration(loops: u64, metadata: Metadata) -> Self {
        Run {
            samples: vec![Sample::Calibration { loops }],
            metadata,
        }
    }

    /// The calibrated loop count, if this run is a calibration run.
    #[must_use]
    pub fn calibrated_loops(&self) -> Option<u64> {
        match self.samples.first() {
            Some(Sample::Calibration { loops }) => Some(*loops),
            _ => None,
        }
    }

    /// All value (non-warmup, non-calibration) samples.
    pub fn values(&self) -> impl Iterator<Item = &Sample> {
        self.samples.iter().filter(|s| s.is_value())
    }
}

/// A named aggregate of [`Run`]s sharing a task identity.
///
/// Invariant: all `Run`s in a `Benchmark` share compatible metadata (same unit, same
/// `inner_loops`); this crate does not validate that invariant beyond what naturally falls out of
/// every run for a given name coming from the same [`crate::task::Task`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Benchmark {
    /// Unique name of this benchmark within a [`crate::runner::Runner`] instance.
    pub name: String,
    /// Metadata shared across all runs (unit, inner_loops, command, ...).
    pub metadata: Metadata,
    /// One run per worker that has reported in so far.
    pub runs: Vec<Run>,
}

impl Benchmark {
    /// Start a new benchmark aggregate from the first worker's run.
    #[must_use]
    pub fn new(name: impl Into<String>, metadata: Metadata, first_run: Run) -> Self {
        Benchmark {
            name: name.into(),
            metadata,
            runs: vec![first_run],
        }
    }

    /// Fold another worker's run into this aggregate.
    pub fn add_run(&mut self, run: Run) {
        self.runs.push(run);
    }

    /// Number of runs accumulated so far.
    #[must_use]
    pub fn run_count(&self) -> usize {
        self.runs.len()
    }
}

/// A set of [`Benchmark`]s produced by one worker invocation.
///
/// Invariant: in this harness a worker emits exactly one `Benchmark` per suite; a suite with a
/// different count is a hard [`crate::error::OrchestratorError::WorkerProtocol`] error in the
/// master.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Suite {
    /// The benchmarks contained in this suite — always length 1 on the wire this crate produces.
    pub benchmarks: Vec<Benchmark>,
}

impl Suite {
    /// Wrap a single benchmark, the only shape a worker ever emits.
    #[must_use]
    pub fn single(benchmark: Benchmark) -> Self {
        Suite {
            benchmarks: vec![benchmark],
        }
    }

    /// Serialize to the UTF-8 JSON document written to the pipe.
    ///
    /// # Errors
    /// Returns an error if the benchmark contains data `serde_json` cannot represent (it never
    /// does for the types in this crate, but the signature stays fallible to match `serde_json`).
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Parse the UTF-8 JSON document read from the pipe.
    ///
    /// # Errors
    /// Returns an error if `json` is not a valid `Suite` document.
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_from_warmups_and_values_orders_warmups_first() {
        let warmups = vec![Sample::Warmup {
            loops: 10,
            inner_loops: None,
            duration: Duration::from_millis(1),
        }];
        let values = vec![Sample::Value {
            loops: 10,
            inner_loops: None,
            duration: Duration::from_millis(2),
        }];
        let run = Run::from_warmups_and_values(warmups, values, Metadata::new());
        assert!(matches!(run.samples[0], Sample::Warmup { .. }));
        assert!(matches!(run.samples[1], Sample::Value { .. }));
        assert_eq!(run.values().count(), 1);
    }

    #[test]
    fn suite_round_trips_through_json() {
        let run = Run::from_calibration(64, Metadata::new());
        let bench = Benchmark::new("bench-a", Metadata::new(), run);
        let suite = Suite::single(bench);

        let json = suite.to_json().expect("serialize");
        let parsed = Suite::from_json(&json).expect("deserialize");

        assert_eq!(parsed.benchmarks.len(), 1);
        assert_eq!(parsed.benchmarks[0].name, "bench-a");
        assert_eq!(parsed.benchmarks[0].runs[0].calibrated_loops(), Some(64));
    }

    #[test]
    fn benchmark_add_run_increments_cardinality() {
        let run_a = Run::from_calibration(1, Metadata::new());
        let mut bench = Benchmark::new("b", Metadata::new(), run_a);
        assert_eq!(bench.run_count(), 1);
        bench.add_run(Run::from_calibration(2, Metadata::new()));
        assert_eq!(bench.run_count(), 2);
    }
}

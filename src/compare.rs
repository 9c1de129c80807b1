//! Compare Driver (C7): runs a task's Master Orchestrator pass twice — once against the reference
//! executable, once against the executable under test — and renders the two resulting benchmarks
//! side by side (§4.8).

use std::path::Path;

use crate::model::{Benchmark, Run, Sample};
use crate::policy::Policy;
use crate::runtime::RuntimeDescriptor;
use crate::task::Task;
use crate::worker_cmd::AddCmdlineArgs;

/// Relative significance threshold below which two mean durations are reported as indistinguishable
/// rather than "faster"/"slower" (chosen the same way `_runner.py`'s comparison picks a practical
/// cutoff rather than running a full statistical test — see `DESIGN.md`).
const SIGNIFICANCE_THRESHOLD: f64 = 0.05;

/// One side of an A/B comparison: a display name and the benchmark it produced.
#[derive(Clone, Debug)]
pub struct NamedBenchmark {
    /// The name shown in comparison output; either user-supplied via `--python-names` or derived
    /// from the executable's file name.
    pub display_name: String,
    /// The aggregated benchmark from that side's master run.
    pub benchmark: Benchmark,
}

/// The result of comparing a reference run against a changed run.
#[derive(Clone, Debug)]
pub struct Comparison {
    /// The baseline side.
    pub reference: NamedBenchmark,
    /// The side under test.
    pub changed: NamedBenchmark,
}

/// A relative speed ratio between the two sides of a [`Comparison`] (§4.8).
///
/// `ratio` is `changed_mean / reference_mean` seconds-per-iteration; a ratio above `1.0` means
/// `changed` is slower than `reference`, below `1.0` means it's faster.
#[derive(Clone, Copy, Debug)]
pub struct SpeedRatio {
    /// Mean measured seconds per iteration on the reference side.
    pub reference_mean: f64,
    /// Mean measured seconds per iteration on the changed side.
    pub changed_mean: f64,
    /// `changed_mean / reference_mean`, or `f64::NAN` if the reference side has no value samples.
    pub ratio: f64,
}

/// Computes the relative speed ratio between two benchmarks, the external collaborator §4.8 calls
/// for. This crate ships exactly one implementation, [`MeanDurationComparator`].
pub trait Comparator {
    /// Compare `reference` against `changed`, returning their relative speed ratio.
    fn compare(&self, reference: &Benchmark, changed: &Benchmark) -> SpeedRatio;
}

/// Compares two benchmarks by the mean wall-clock duration of their measured (non-warmup,
/// non-calibration) samples, normalized by loop count so differing calibrated loop counts between
/// the two sides don't skew the ratio.
pub struct MeanDurationComparator;

impl Comparator for MeanDurationComparator {
    fn compare(&self, reference: &Benchmark, changed: &Benchmark) -> SpeedRatio {
        let reference_mean = mean_seconds_per_iteration(reference);
        let changed_mean = mean_seconds_per_iteration(changed);
        let ratio = if reference_mean > 0.0 { changed_mean / reference_mean } else { f64::NAN };
        SpeedRatio { reference_mean, changed_mean, ratio }
    }
}

fn mean_seconds_per_iteration(benchmark: &Benchmark) -> f64 {
    let per_iteration: Vec<f64> = benchmark.runs.iter().flat_map(Run::values).filter_map(value_seconds_per_iteration).collect();
    if per_iteration.is_empty() {
        0.0
    } else {
        per_iteration.iter().sum::<f64>() / per_iteration.len() as f64
    }
}

fn value_seconds_per_iteration(sample: &Sample) -> Option<f64> {
    match sample {
        Sample::Value { loops, duration, .. } if *loops > 0 => Some(duration.as_secs_f64() / *loops as f64),
        _ => None,
    }
}

fn derive_name(path: &Path) -> String {
    path.file_name().map(|name| name.to_string_lossy().into_owned()).unwrap_or_else(|| path.to_string_lossy().into_owned())
}

/// Run `task` once against `policy.python_ref` and once against `policy.python_changed`, and
/// return both named benchmarks for comparison.
///
/// # Errors
/// Propagates anything [`crate::master::run_master`] can fail with. The caller (the `Runner`) is
/// responsible for ensuring `policy.python_ref` is `Some` before calling this.
pub fn run_comparison(task: &mut Task, policy: &Policy, runtime: &RuntimeDescriptor, add_cmdline_args: Option<&AddCmdlineArgs>) -> anyhow::Result<Comparison> {
    let reference_path = policy.python_ref.as_ref().expect("run_comparison requires policy.python_ref");

    let (ref_name, changed_name) = match &policy.python_names {
        Some((ref_name, changed_name)) => (ref_name.clone(), changed_name.clone()),
        None => (derive_name(reference_path), derive_name(&policy.python_changed)),
    };

    let reference_benchmark = crate::master::run_master(task, policy, runtime, reference_path, add_cmdline_args)?;
    let changed_benchmark = crate::master::run_master(task, policy, runtime, &policy.python_changed, add_cmdline_args)?;

    Ok(Comparison {
        reference: NamedBenchmark { display_name: ref_name, benchmark: reference_benchmark },
        changed: NamedBenchmark { display_name: changed_name, benchmark: changed_benchmark },
    })
}

/// Describe a [`SpeedRatio`] the way §4.8's "significance-aware comparison" calls for: a ratio
/// within [`SIGNIFICANCE_THRESHOLD`] of `1.0` is reported as not significant rather than as
/// spuriously faster/slower.
fn describe_ratio(ratio: &SpeedRatio) -> String {
    if !ratio.ratio.is_finite() {
        return "not significant (no measured values)".to_string();
    }
    if (ratio.ratio - 1.0).abs() < SIGNIFICANCE_THRESHOLD {
        return "not significant".to_string();
    }
    if ratio.ratio > 1.0 {
        format!("{:.2}x slower", ratio.ratio)
    } else {
        format!("{:.2}x faster", 1.0 / ratio.ratio)
    }
}

/// Render a [`Comparison`] to a human-readable summary.
///
/// Benchmarks with a single run each are rendered on one line; anything with more runs (the
/// common case) is rendered multiline, one side per paragraph, matching the single-vs-multiline
/// heuristic in §4.8. Either form includes the [`MeanDurationComparator`]'s relative speed ratio
/// between the two sides' measured durations, not just their run counts.
#[must_use]
pub fn render(comparison: &Comparison) -> String {
    let ratio = MeanDurationComparator.compare(&comparison.reference.benchmark, &comparison.changed.benchmark);
    let verdict = describe_ratio(&ratio);

    let single_line = comparison.reference.benchmark.run_count() <= 1 && comparison.changed.benchmark.run_count() <= 1;
    if single_line {
        format!(
            "{}: {:.9} sec vs {}: {:.9} sec -> {} is {verdict}",
            comparison.reference.display_name,
            ratio.reference_mean,
            comparison.changed.display_name,
            ratio.changed_mean,
            comparison.changed.display_name,
        )
    } else {
        format!(
            "{}\n  {}: {:.9} sec ({} runs)\n{}\n  {}: {:.9} sec ({} runs)\n  {} is {verdict}",
            comparison.reference.benchmark.name,
            comparison.reference.display_name,
            ratio.reference_mean,
            comparison.reference.benchmark.run_count(),
            comparison.changed.benchmark.name,
            comparison.changed.display_name,
            ratio.changed_mean,
            comparison.changed.benchmark.run_count(),
            comparison.changed.display_name,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Metadata;
    use std::path::PathBuf;
    use std::time::Duration;

    fn run_with_value(seconds: f64, loops: u64) -> Run {
        Run::from_warmups_and_values(Vec::new(), vec![Sample::Value { loops, inner_loops: None, duration: Duration::from_secs_f64(seconds * loops as f64) }], Metadata::new())
    }

    fn named(run_count: usize, seconds_per_iteration: f64) -> NamedBenchmark {
        let mut benchmark = Benchmark::new("bench", Metadata::new(), run_with_value(seconds_per_iteration, 1));
        for _ in 1..run_count {
            benchmark.add_run(run_with_value(seconds_per_iteration, 1));
        }
        NamedBenchmark { display_name: "side".to_string(), benchmark }
    }

    #[test]
    fn derive_name_uses_the_executable_file_name() {
        assert_eq!(derive_name(&PathBuf::from("/usr/bin/python3.11")), "python3.11");
    }

    #[test]
    fn render_is_single_line_when_both_sides_have_one_run() {
        let comparison = Comparison { reference: named(1, 0.001), changed: named(1, 0.001) };
        assert!(!render(&comparison).contains('\n'));
    }

    #[test]
    fn render_is_multiline_when_a_side_has_multiple_runs() {
        let comparison = Comparison { reference: named(3, 0.001), changed: named(3, 0.001) };
        assert!(render(&comparison).contains('\n'));
    }

    #[test]
    fn mean_duration_comparator_divides_by_loops() {
        let reference = named(1, 0.001).benchmark;
        let changed = named(1, 0.002).benchmark;
        let ratio = MeanDurationComparator.compare(&reference, &changed);
        assert!((ratio.ratio - 2.0).abs() < 1e-6, "expected changed to be ~2x slower, got {}", ratio.ratio);
    }

    #[test]
    fn render_reports_a_real_slowdown_not_just_run_counts() {
        let comparison = Comparison { reference: named(1, 0.001), changed: named(1, 0.010) };
        let text = render(&comparison);
        assert!(text.contains("slower"), "expected a slower verdict in {text:?}");
    }

    #[test]
    fn render_reports_not_significant_for_near_identical_means() {
        let comparison = Comparison { reference: named(1, 0.001), changed: named(1, 0.00101) };
        let text = render(&comparison);
        assert!(text.contains("not significant"), "expected a not-significant verdict in {text:?}");
    }
}

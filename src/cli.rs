//! The CLI surface (C10): a `clap`-derived argument struct covering every flag in §6 of the
//! design, handed to the Policy Resolver as the "raw parsed flag set".

use std::path::PathBuf;

use clap::Parser;

/// Parse a `--loops`/`--warmups`-style value: a plain integer, or `a^b` meaning `a.pow(b)`.
///
/// # Errors
/// Returns an error string if the value isn't a non-negative integer or `a^b` expression.
fn positive_or_nul(value: &str) -> Result<u64, String> {
    let parsed = if let Some((base, exp)) = value.split_once('^') {
        let base: u64 = base.trim().parse().map_err(|_| format!("invalid base in {value:?}"))?;
        let exp: u32 = exp.trim().parse().map_err(|_| format!("invalid exponent in {value:?}"))?;
        base.checked_pow(exp).ok_or_else(|| format!("{value:?} overflows"))?
    } else {
        value.parse().map_err(|_| format!("{value:?} is not a non-negative integer"))?
    };
    Ok(parsed)
}

/// Parse a `--processes`/`--values`-style value: a strictly positive integer.
///
/// # Errors
/// Returns an error string if the value is not an integer `> 0`.
fn strictly_positive(value: &str) -> Result<u64, String> {
    let parsed: i64 = value.parse().map_err(|_| format!("{value:?} is not an integer"))?;
    if parsed <= 0 {
        return Err("value must be > 0".to_string());
    }
    Ok(parsed as u64)
}

/// Parse `REF_NAME:CHANGED_NAME` into its two halves.
///
/// # Errors
/// Returns an error string if there isn't exactly one `:` separator.
fn python_names(value: &str) -> Result<(String, String), String> {
    match value.split_once(':') {
        Some((ref_name, changed_name)) => Ok((ref_name.to_string(), changed_name.to_string())),
        None => Err("syntax is REF_NAME:CHANGED_NAME".to_string()),
    }
}

/// Parse a comma-separated list, dropping empty entries.
fn comma_separated(value: &str) -> Result<Vec<String>, std::convert::Infallible> {
    Ok(value.split(',').map(str::trim).filter(|s| !s.is_empty()).map(str::to_string).collect())
}

/// Raw CLI flags for a benchmark program built on [`crate::runner::Runner`].
///
/// Field documentation intentionally mirrors the flag descriptions in §6 of the design verbatim;
/// this struct is the single source of truth for `--help` output.
#[derive(Parser, Clone, Debug)]
#[command(author, version, about = "Benchmark")]
pub struct CliArgs {
    /// Spend longer running tests to get more accurate results
    #[arg(long)]
    pub rigorous: bool,

    /// Get rough answers quickly
    #[arg(long)]
    pub fast: bool,

    /// Debug mode, only compute a single value
    #[arg(long = "debug-single-value")]
    pub debug_single_value: bool,

    /// Number of processes used to run benchmarks
    #[arg(short = 'p', long, value_parser = strictly_positive)]
    pub processes: Option<u64>,

    /// Number of values per process
    #[arg(short = 'n', long, value_parser = strictly_positive)]
    pub values: Option<u64>,

    /// Number of skipped values per run used to warm up the benchmark
    #[arg(short = 'w', long, value_parser = positive_or_nul)]
    pub warmups: Option<u64>,

    /// Number of loops per value, 0 means automatic calibration
    #[arg(short = 'l', long, value_parser = positive_or_nul, default_value = "0")]
    pub loops: u64,

    /// Enable verbose mode
    #[arg(short, long)]
    pub verbose: bool,

    /// Enable quiet mode
    #[arg(short, long)]
    pub quiet: bool,

    /// Write benchmarks encoded as JSON into the pipe FD
    #[arg(long, value_name = "FD")]
    pub pipe: Option<i32>,

    /// Write results encoded to JSON into FILENAME
    #[arg(short, long, value_name = "FILENAME")]
    pub output: Option<PathBuf>,

    /// Append results encoded to JSON into FILENAME
    #[arg(long, value_name = "FILENAME")]
    pub append: Option<PathBuf>,

    /// Minimum duration in seconds of a single value, used to calibrate the number of loops
    #[arg(long = "min-time", default_value = "0.1")]
    pub min_time: f64,

    /// Worker process, run the benchmark
    #[arg(long)]
    pub worker: bool,

    /// Identifier of the worker task: only execute the benchmark function TASK_ID
    #[arg(long = "worker-task", value_name = "TASK_ID", value_parser = positive_or_nul)]
    pub worker_task: Option<u64>,

    /// Only calibrate the benchmark, don't compute values
    #[arg(long)]
    pub calibrate: bool,

    /// Display benchmark run results
    #[arg(short, long)]
    pub dump: bool,

    /// Show metadata
    #[arg(short, long)]
    pub metadata: bool,

    /// Display a histogram of values
    #[arg(short = 'g', long = "hist")]
    pub hist: bool,

    /// Display statistics (min, max, ...)
    #[arg(short = 't', long = "stats")]
    pub stats: bool,

    /// Specify CPU affinity for worker processes
    #[arg(long, value_name = "CPU_LIST")]
    pub affinity: Option<String>,

    /// (internal) marks --affinity as carrying a Master-auto-detected CPU list rather than a
    /// user-supplied one, so a worker's pinning failure on it only warns instead of aborting
    #[arg(long = "affinity-auto", hide = true)]
    pub affinity_auto: bool,

    /// Comma-separated list of environment variables inherited by worker child processes
    #[arg(long = "inherit-environ", value_name = "VARS", value_parser = comma_separated)]
    pub inherit_environ: Option<Vec<String>>,

    /// Don't copy locale environment variables like LANG or LC_CTYPE
    #[arg(long = "no-locale")]
    pub no_locale: bool,

    /// Executable to benchmark (default: the running program)
    #[arg(long)]
    pub python: Option<PathBuf>,

    /// Run benchmark on REF_EXECUTABLE, then on `--python`, and compare the two
    #[arg(long = "compare-to", value_name = "REF_EXECUTABLE")]
    pub compare_to: Option<PathBuf>,

    /// Name REF_EXECUTABLE/--python as REF_NAME/CHANGED_NAME in results
    #[arg(long = "python-names", value_name = "REF_NAME:CHANGED_NAME", value_parser = python_names)]
    pub python_names: Option<(String, String)>,

    /// Trace memory allocations (mutually exclusive with --track-memory)
    #[arg(long, conflicts_with = "track_memory")]
    pub tracemalloc: bool,

    /// Track memory usage using a background thread (mutually exclusive with --tracemalloc)
    #[arg(long)]
    pub track_memory: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn positive_or_nul_expands_caret_syntax() {
        assert_eq!(positive_or_nul("2^10").unwrap(), 1024);
        assert_eq!(positive_or_nul("0").unwrap(), 0);
        assert!(positive_or_nul("-1").is_err());
    }

    #[test]
    fn strictly_positive_rejects_zero_and_negative() {
        assert_eq!(strictly_positive("20").unwrap(), 20);
        assert!(strictly_positive("0").is_err());
        assert!(strictly_positive("-5").is_err());
    }

    #[test]
    fn python_names_requires_single_colon() {
        assert_eq!(python_names("ref:changed").unwrap(), ("ref".to_string(), "changed".to_string()));
        assert!(python_names("ref-changed").is_err());
    }

    #[test]
    fn comma_separated_drops_blank_entries() {
        assert_eq!(comma_separated("A,B,, C").unwrap(), vec!["A", "B", "C"]);
    }
}

//! Measurement delegate for [`crate::task::BenchCommandTask`]: shells out to the
//! `bench-time-shim` helper launcher (`src/bin/bench_time_shim.rs`), which runs the target command
//! `loops` times and prints the elapsed seconds (and optionally peak RSS in bytes) on stdout,
//! mirroring the distilled design's `_process_time.py` helper (§4.9, `bench_command`).

use std::process::Command;
use std::time::Duration;

use anyhow::{bail, Context};

use crate::task::{BenchCommandTask, MeasuredSample};

/// Locate the `bench-time-shim` binary next to the currently running executable.
fn shim_path() -> anyhow::Result<std::path::PathBuf> {
    let mut path = std::env::current_exe().context("resolving current executable to locate bench-time-shim")?;
    path.set_file_name(if cfg!(windows) { "bench-time-shim.exe" } else { "bench-time-shim" });
    Ok(path)
}

/// Run `task.command` `loops` times via the helper launcher and parse its timing/RSS output.
///
/// # Errors
/// Returns an error if the launcher cannot be spawned, exits nonzero, or prints output that
/// doesn't parse as `<seconds>\n[<rss_bytes>]`.
pub fn run_command_measurement(task: &mut BenchCommandTask, loops: u64) -> anyhow::Result<MeasuredSample> {
    let shim = shim_path()?;
    let output = Command::new(&shim)
        .arg(loops.to_string())
        .args(&task.command)
        .output()
        .with_context(|| format!("spawning bench-time-shim for command {:?}", task.command))?;

    if !output.status.success() {
        bail!("command failed with exit status {}", output.status);
    }

    let stdout = String::from_utf8(output.stdout).context("bench-time-shim produced non-UTF-8 output")?;
    let mut lines = stdout.lines();
    let timing: f64 = lines
        .next()
        .context("bench-time-shim produced no output")?
        .trim()
        .parse()
        .context("failed to parse bench-time-shim timing line")?;
    let rss: Option<u64> = match lines.next() {
        Some(line) if !line.trim().is_empty() => Some(line.trim().parse().context("failed to parse bench-time-shim rss line")?),
        _ => None,
    };

    if let Some(rss) = rss {
        let max_rss = task.metadata.get("command_max_rss").and_then(serde_json::Value::as_u64).unwrap_or(0);
        task.metadata.insert("command_max_rss".to_string(), serde_json::Value::from(max_rss.max(rss)));
    }

    Ok(MeasuredSample {
        duration: Duration::from_secs_f64(timing),
        rss,
    })
}

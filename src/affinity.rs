//! CPU Affinity Binder (C1): detect isolated CPUs, pin the current process to a set, and render
//! CPU lists back to the `a,b-c` wire syntax (§4.2, §6).
//!
//! Pinning is a raw `libc::sched_setaffinity` call behind a safe wrapper — this crate's dependency
//! set has no CPU-isolation library, so it follows the same raw-`libc` idiom the pack's own
//! benchmarking tools use for this (see `DESIGN.md`).

use std::collections::BTreeSet;
use std::fs;

use crate::error::OrchestratorError;

const ISOLATED_CPUS_PATH: &str = "/sys/devices/system/cpu/isolated";

/// Parse a CPU list of the form `0,2-5,7` into the set of CPU indices it names.
///
/// # Errors
/// Returns [`OrchestratorError::Config`] if any entry isn't a plain index or an inclusive range,
/// or if a range is reversed/empty.
pub fn parse_cpu_list(spec: &str) -> Result<BTreeSet<usize>, OrchestratorError> {
    let mut cpus = BTreeSet::new();
    for entry in spec.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        if let Some((lo, hi)) = entry.split_once('-') {
            let lo: usize = lo.trim().parse().map_err(|_| OrchestratorError::Config(format!("bad CPU list entry {entry:?}")))?;
            let hi: usize = hi.trim().parse().map_err(|_| OrchestratorError::Config(format!("bad CPU list entry {entry:?}")))?;
            if hi < lo {
                return Err(OrchestratorError::Config(format!("reversed CPU range {entry:?}")));
            }
            cpus.extend(lo..=hi);
        } else {
            let cpu: usize = entry.parse().map_err(|_| OrchestratorError::Config(format!("bad CPU list entry {entry:?}")))?;
            cpus.insert(cpu);
        }
    }
    if cpus.is_empty() {
        return Err(OrchestratorError::Config(format!("empty CPU list {spec:?}")));
    }
    Ok(cpus)
}

/// Render a CPU set back into the compact `a,b-c` wire syntax, collapsing consecutive runs into
/// ranges.
#[must_use]
pub fn format_cpu_list(cpus: &BTreeSet<usize>) -> String {
    let mut parts = Vec::new();
    let mut iter = cpus.iter().copied().peekable();
    while let Some(start) = iter.next() {
        let mut end = start;
        while iter.peek() == Some(&(end + 1)) {
            end = iter.next().unwrap();
        }
        if end == start {
            parts.push(start.to_string());
        } else {
            parts.push(format!("{start}-{end}"));
        }
    }
    parts.join(",")
}

/// Read the kernel's isolated-CPU list (`/sys/devices/system/cpu/isolated` on Linux).
///
/// Returns `None` if the file is absent, unreadable, or empty (no isolated CPUs configured) —
/// this is the auto-detection path, not an error.
#[must_use]
pub fn get_isolated_cpus() -> Option<BTreeSet<usize>> {
    let contents = fs::read_to_string(ISOLATED_CPUS_PATH).ok()?;
    let trimmed = contents.trim();
    if trimmed.is_empty() {
        return None;
    }
    parse_cpu_list(trimmed).ok()
}

/// Pin the current process to the given CPU set.
///
/// # Errors
/// Returns [`OrchestratorError::PinningUnavailable`] if the underlying `sched_setaffinity` call
/// fails (unsupported platform, invalid CPU index, insufficient permission).
#[cfg(target_os = "linux")]
pub fn set_cpu_affinity(cpus: &BTreeSet<usize>) -> Result<(), OrchestratorError> {
    unsafe {
        let mut set: libc::cpu_set_t = std::mem::zeroed();
        for &cpu in cpus {
            libc::CPU_SET(cpu, &mut set);
        }
        let rc = libc::sched_setaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &set);
        if rc != 0 {
            return Err(OrchestratorError::PinningUnavailable(std::io::Error::last_os_error().to_string()));
        }
    }
    Ok(())
}

/// Pin the current process to the given CPU set.
///
/// # Errors
/// Always returns [`OrchestratorError::PinningUnavailable`] on non-Linux targets: this crate only
/// implements hard pinning via `sched_setaffinity`.
#[cfg(not(target_os = "linux"))]
pub fn set_cpu_affinity(_cpus: &BTreeSet<usize>) -> Result<(), OrchestratorError> {
    Err(OrchestratorError::PinningUnavailable("CPU affinity is only implemented on Linux".to_string()))
}

/// Resolve and apply the effective CPU affinity for the current process (§4.2):
/// explicit `--affinity` if given, otherwise auto-detected isolated CPUs.
///
/// `auto` records *provenance*, not just "is `cpus` absent" — a caller that re-forwarded an
/// already-resolved auto-detected list (the Master does this so every worker pins to the same
/// CPUs) must still pass `auto: true` here, since the list itself can no longer be distinguished
/// from an explicit `--affinity` value once it's just a string. See `crate::master::run_master`
/// and `crate::worker_cmd::build_worker_command`, which carry that provenance across the worker
/// command line as a separate `--affinity-auto` flag.
///
/// Returns the CPU list that was actually pinned, formatted for `--affinity=...` on a worker
/// command line, or `None` if no pinning occurred (no isolated CPUs found, auto mode).
///
/// # Errors
/// Returns [`OrchestratorError::PinningUnavailable`] if an *explicit* `--affinity` list could not
/// be pinned. Auto-detected failures are swallowed here; the caller is expected to log a warning
/// (see `crate::worker::run_worker`).
pub fn bind(cpus: Option<&str>, auto: bool, quiet: bool) -> Result<Option<String>, OrchestratorError> {
    let (cpus, is_auto) = match cpus {
        Some(spec) => (parse_cpu_list(spec)?, auto),
        None => match get_isolated_cpus() {
            Some(cpus) => (cpus, true),
            None => return Ok(None),
        },
    };

    match set_cpu_affinity(&cpus) {
        Ok(()) => Ok(Some(format_cpu_list(&cpus))),
        Err(err) if is_auto => {
            if !quiet {
                log::warn!("unable to pin worker process to isolated CPUs, CPU affinity not available: {err}");
            }
            Ok(None)
        }
        Err(err) => Err(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_cpu_list_expands_ranges_and_dedupes() {
        let cpus = parse_cpu_list("0,2-5,7,3").unwrap();
        assert_eq!(cpus, BTreeSet::from([0, 2, 3, 4, 5, 7]));
    }

    #[test]
    fn parse_cpu_list_rejects_reversed_range() {
        assert!(parse_cpu_list("5-2").is_err());
    }

    #[test]
    fn parse_cpu_list_rejects_garbage() {
        assert!(parse_cpu_list("a-b").is_err());
        assert!(parse_cpu_list("").is_err());
    }

    #[test]
    fn format_cpu_list_collapses_runs() {
        let cpus = BTreeSet::from([0, 2, 3, 4, 5, 7]);
        assert_eq!(format_cpu_list(&cpus), "0,2-5,7");
    }

    #[test]
    fn format_roundtrips_through_parse() {
        let cpus = parse_cpu_list("0,2-5,7").unwrap();
        assert_eq!(parse_cpu_list(&format_cpu_list(&cpus)).unwrap(), cpus);
    }

    #[test]
    fn explicit_pinning_failure_is_fatal_even_with_a_valid_looking_list() {
        // CPU 1023 is within cpu_set_t's bit range but doesn't exist on any real test machine, so
        // set_cpu_affinity is expected to fail; with auto=false (an explicit --affinity) that
        // failure must propagate, not warn-and-skip.
        let err = bind(Some("1023"), false, true).unwrap_err();
        assert!(matches!(err, OrchestratorError::PinningUnavailable(_)));
    }

    #[test]
    fn auto_detected_pinning_failure_is_swallowed() {
        // Same bogus CPU, but auto=true: this models a Master-forwarded auto-detected list, which
        // must warn and return None rather than aborting the whole benchmark.
        let result = bind(Some("1023"), true, true).unwrap();
        assert_eq!(result, None);
    }
}

//! Master Orchestrator (C6): spawns worker processes one at a time, reads each one's result suite
//! off its pipe, and aggregates the runs into a single [`Benchmark`] (§4.7).

use std::path::Path;
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use anyhow::{bail, Context};

use crate::affinity;
use crate::error::OrchestratorError;
use crate::model::Benchmark;
use crate::pipe;
use crate::policy::Policy;
use crate::runtime::RuntimeDescriptor;
use crate::task::Task;
use crate::worker_cmd::{build_worker_command, AddCmdlineArgs};

static INTERRUPTED: OnceLock<Arc<AtomicBool>> = OnceLock::new();

fn interrupt_flag() -> Arc<AtomicBool> {
    INTERRUPTED
        .get_or_init(|| {
            let flag = Arc::new(AtomicBool::new(false));
            let handler_flag = Arc::clone(&flag);
            let _ = ctrlc::set_handler(move || {
                handler_flag.store(true, Ordering::SeqCst);
            });
            flag
        })
        .clone()
}

/// Spawn `policy.processes` worker processes sequentially for `task` and aggregate their runs
/// into one [`Benchmark`] (§4.7, §5 "never in parallel").
///
/// If `policy.loops == 0`, a calibration worker runs first; its chosen loop count is used for
/// every subsequent worker and is not itself part of the returned benchmark's runs (§4.6, §4.7
/// step 1).
///
/// # Errors
/// Returns [`OrchestratorError::WorkerSpawn`] if a worker process cannot be started,
/// [`OrchestratorError::WorkerFailed`] if one exits nonzero, [`OrchestratorError::WorkerProtocol`]
/// if a worker's pipe payload doesn't parse as a single-benchmark [`crate::model::Suite`], or
/// [`OrchestratorError::Interrupted`] if Ctrl-C arrives mid-run.
pub fn run_master(
    task: &Task,
    policy: &Policy,
    runtime: &RuntimeDescriptor,
    executable: &Path,
    add_cmdline_args: Option<&AddCmdlineArgs>,
) -> anyhow::Result<Benchmark> {
    let interrupted = interrupt_flag();

    let mut policy = policy.clone();
    if policy.affinity_cpus.is_none() {
        if let Some(cpus) = affinity::get_isolated_cpus() {
            policy.affinity_cpus = Some(affinity::format_cpu_list(&cpus));
            policy.affinity_auto = true;
        }
    }

    if policy.loops == 0 {
        let loops = spawn_one_worker(task, &policy, runtime, executable, 0, true, add_cmdline_args, &interrupted)?
            .calibrated_loops()
            .ok_or_else(|| OrchestratorError::WorkerProtocol("calibration worker produced no calibration sample".to_string()))?;
        policy.loops = loops;
        log::debug!("calibrated {} to {loops} loops", task.name());
    }

    let mut benchmark: Option<Benchmark> = None;
    for worker_index in 0..policy.processes {
        if interrupted.load(Ordering::SeqCst) {
            bail!(OrchestratorError::Interrupted);
        }

        let run = spawn_one_worker(task, &policy, runtime, executable, worker_index, false, add_cmdline_args, &interrupted)?;

        if !policy.quiet {
            eprint!(".");
        }
        log::debug!("worker {worker_index} of {} for {} reported in", policy.processes, task.name());

        match &mut benchmark {
            Some(bench) => bench.add_run(run),
            None => benchmark = Some(Benchmark::new(task.name(), task.metadata(), run)),
        }
    }
    if !policy.quiet {
        eprintln!();
    }

    benchmark.ok_or_else(|| OrchestratorError::Config("processes must be at least 1".to_string()).into())
}

fn spawn_one_worker(
    task: &Task,
    policy: &Policy,
    runtime: &RuntimeDescriptor,
    executable: &Path,
    worker_index: u64,
    calibrate: bool,
    add_cmdline_args: Option<&AddCmdlineArgs>,
    interrupted: &Arc<AtomicBool>,
) -> anyhow::Result<crate::model::Run> {
    let (read_pipe, write_pipe) = pipe::create_pipe()?;

    let argv = build_worker_command(runtime, executable, policy, task.worker_task_id(), write_pipe.as_raw_fd(), calibrate, add_cmdline_args);

    let mut command = Command::new(&argv[0]);
    command.args(&argv[1..]).stdin(Stdio::null()).stdout(Stdio::null()).stderr(Stdio::inherit());
    apply_environ(&mut command, policy);

    let mut child = command.spawn().map_err(|source| OrchestratorError::WorkerSpawn { command: argv.clone(), source })?;

    drop(write_pipe);

    let payload = match read_pipe.read_to_string(interrupted) {
        Ok(payload) => payload,
        Err(OrchestratorError::Interrupted) => {
            kill_with_grace(&mut child)?;
            bail!(OrchestratorError::Interrupted);
        }
        Err(err) => return Err(err.into()),
    };

    let status = wait_with_interrupt(&mut child, interrupted)?;
    if !status.success() {
        bail!(OrchestratorError::WorkerFailed {
            code: status.code().unwrap_or(-1),
        });
    }

    let suite = crate::model::Suite::from_json(&payload).map_err(OrchestratorError::Json)?;
    if suite.benchmarks.len() != 1 {
        bail!(OrchestratorError::WorkerProtocol(format!(
            "expected exactly one benchmark from a worker, got {}",
            suite.benchmarks.len()
        )));
    }
    let mut benchmark = suite.benchmarks.into_iter().next().expect("checked len == 1 above");
    let run = benchmark.runs.pop().ok_or_else(|| OrchestratorError::WorkerProtocol("worker benchmark carried no run".to_string()))?;
    Ok(run)
}

fn apply_environ(command: &mut Command, policy: &Policy) {
    command.env_clear();
    for var in &policy.inherit_environ {
        if let Ok(value) = std::env::var(var) {
            command.env(var, value);
        }
    }
    if policy.locale {
        for var in ["LANG", "LC_ALL", "LC_CTYPE", "LC_NUMERIC", "LC_TIME"] {
            if let Ok(value) = std::env::var(var) {
                command.env(var, value);
            }
        }
    }
    if let Ok(path) = std::env::var("PATH") {
        command.env("PATH", path);
    }
}

fn wait_with_interrupt(child: &mut std::process::Child, interrupted: &Arc<AtomicBool>) -> anyhow::Result<std::process::ExitStatus> {
    loop {
        if let Some(status) = child.try_wait().context("polling worker process status")? {
            return Ok(status);
        }
        if interrupted.load(Ordering::SeqCst) {
            kill_with_grace(child)?;
            bail!(OrchestratorError::Interrupted);
        }
        std::thread::sleep(Duration::from_millis(10));
    }
}

#[cfg(unix)]
fn kill_with_grace(child: &mut std::process::Child) -> anyhow::Result<()> {
    let pid = child.id() as libc::pid_t;
    unsafe {
        libc::kill(pid, libc::SIGTERM);
    }
    for _ in 0..50 {
        if child.try_wait().ok().flatten().is_some() {
            return Ok(());
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    let _ = child.kill();
    let _ = child.wait();
    Ok(())
}

#[cfg(not(unix))]
fn kill_with_grace(child: &mut std::process::Child) -> anyhow::Result<()> {
    let _ = child.kill();
    let _ = child.wait();
    Ok(())
}

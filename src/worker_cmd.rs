//! Worker Command Builder (C2): renders the argument vector that re-invokes this program in
//! worker mode (§4.3).

use std::os::fd::RawFd;

use crate::policy::Policy;
use crate::runtime::RuntimeDescriptor;

/// A caller-supplied hook that may append additional flags to a worker command line, given the
/// policy driving that worker.
pub type AddCmdlineArgs = dyn Fn(&mut Vec<String>, &Policy) + Send + Sync;

/// Build the argument vector that re-invokes `runtime` as a worker for task `worker_task_id`.
#[allow(clippy::too_many_arguments)]
#[must_use]
pub fn build_worker_command(
    runtime: &RuntimeDescriptor,
    executable: &std::path::Path,
    policy: &Policy,
    worker_task_id: usize,
    pipe_fd: RawFd,
    calibrate: bool,
    add_cmdline_args: Option<&AddCmdlineArgs>,
) -> Vec<String> {
    let mut cmd = vec![executable.to_string_lossy().into_owned()];
    cmd.extend(runtime.program_args.iter().cloned());
    cmd.push("--worker".to_string());
    cmd.push(format!("--pipe={pipe_fd}"));
    cmd.push(format!("--worker-task={worker_task_id}"));
    cmd.push(format!("--values={}", policy.values_per_process));
    cmd.push(format!("--warmups={}", policy.warmups_per_process));
    cmd.push(format!("--loops={}", policy.loops));
    cmd.push(format!("--min-time={}", policy.min_time));

    if calibrate {
        cmd.push("--calibrate".to_string());
    }
    if policy.verbose {
        cmd.push("--verbose".to_string());
    }
    if let Some(affinity) = &policy.affinity_cpus {
        cmd.push(format!("--affinity={affinity}"));
        if policy.affinity_auto {
            cmd.push("--affinity-auto".to_string());
        }
    }
    if policy.tracemalloc {
        cmd.push("--tracemalloc".to_string());
    }
    if policy.track_memory {
        cmd.push("--track-memory".to_string());
    }

    if let Some(hook) = add_cmdline_args {
        hook(&mut cmd, policy);
    }

    cmd
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::CliArgs;
    use clap::Parser;
    use std::path::PathBuf;

    fn policy() -> Policy {
        let cli = CliArgs::parse_from(["prog"]);
        crate::policy::resolve(&cli, &crate::policy::RunnerDefaults::new(), &runtime(), 0).unwrap()
    }

    fn runtime() -> RuntimeDescriptor {
        RuntimeDescriptor {
            executable: PathBuf::from("/bin/true"),
            program_args: Vec::new(),
            has_jit: false,
        }
    }

    #[test]
    fn command_carries_worker_flags_and_pipe_fd() {
        let rt = runtime();
        let policy = policy();
        let cmd = build_worker_command(&rt, &rt.executable, &policy, 2, 7, false, None);
        assert_eq!(cmd[0], "/bin/true");
        assert!(cmd.contains(&"--worker".to_string()));
        assert!(cmd.contains(&"--pipe=7".to_string()));
        assert!(cmd.contains(&"--worker-task=2".to_string()));
    }

    #[test]
    fn affinity_auto_flag_is_forwarded_alongside_the_cpu_list() {
        let rt = runtime();
        let mut policy = policy();
        policy.affinity_cpus = Some("0,2-3".to_string());
        policy.affinity_auto = true;
        let cmd = build_worker_command(&rt, &rt.executable, &policy, 0, 7, false, None);
        assert!(cmd.contains(&"--affinity=0,2-3".to_string()));
        assert!(cmd.contains(&"--affinity-auto".to_string()));
    }

    #[test]
    fn affinity_auto_flag_is_absent_for_an_explicit_affinity() {
        let rt = runtime();
        let mut policy = policy();
        policy.affinity_cpus = Some("0,2-3".to_string());
        policy.affinity_auto = false;
        let cmd = build_worker_command(&rt, &rt.executable, &policy, 0, 7, false, None);
        assert!(cmd.contains(&"--affinity=0,2-3".to_string()));
        assert!(!cmd.contains(&"--affinity-auto".to_string()));
    }

    #[test]
    fn calibrate_flag_is_appended_only_when_requested() {
        let rt = runtime();
        let policy = policy();
        let cmd = build_worker_command(&rt, &rt.executable, &policy, 0, 7, true, None);
        assert!(cmd.contains(&"--calibrate".to_string()));
    }

    #[test]
    fn hook_can_append_extra_flags() {
        let rt = runtime();
        let policy = policy();
        let hook: Box<AddCmdlineArgs> = Box::new(|cmd: &mut Vec<String>, _policy: &Policy| cmd.push("--extra".to_string()));
        let cmd = build_worker_command(&rt, &rt.executable, &policy, 0, 7, false, Some(&*hook));
        assert!(cmd.contains(&"--extra".to_string()));
    }
}

//! Helper launcher used by `bench_command` tasks to time an external command without the timing
//! loop itself paying for a shell or for `procbench`'s own startup cost — mirrors the distilled
//! design's `_process_time.py` helper (§4.9).
//!
//! Usage: `bench-time-shim <loops> <command> [args...]`. Runs `<command>` `loops` times back to
//! back, then prints the total elapsed wall-clock seconds on stdout's first line, and the peak
//! resident set size in bytes (if `sysinfo` could read it) on the second.

use std::process::Command;
use std::time::Instant;

use sysinfo::{PidExt, ProcessExt, System, SystemExt};

fn main() {
    let mut args = std::env::args().skip(1);
    let loops: u64 = match args.next().and_then(|raw| raw.parse().ok()) {
        Some(loops) => loops,
        None => {
            eprintln!("usage: bench-time-shim <loops> <command> [args...]");
            std::process::exit(2);
        }
    };
    let command_args: Vec<String> = args.collect();
    let Some((program, rest)) = command_args.split_first() else {
        eprintln!("usage: bench-time-shim <loops> <command> [args...]");
        std::process::exit(2);
    };

    let mut peak_rss: u64 = 0;
    let mut system = System::new();
    let start = Instant::now();
    for _ in 0..loops.max(1) {
        let mut child = match Command::new(program).args(rest).spawn() {
            Ok(child) => child,
            Err(err) => {
                eprintln!("bench-time-shim: failed to spawn {program}: {err}");
                std::process::exit(1);
            }
        };
        let pid = sysinfo::Pid::from_u32(child.id());
        let status = loop {
            if let Some(status) = child.try_wait().expect("polling child status") {
                break status;
            }
            system.refresh_process(pid);
            if let Some(process) = system.process(pid) {
                peak_rss = peak_rss.max(process.memory() * 1024);
            }
            std::thread::sleep(std::time::Duration::from_millis(1));
        };
        if !status.success() {
            eprintln!("bench-time-shim: command exited with {status}");
            std::process::exit(status.code().unwrap_or(1));
        }
    }
    let elapsed = start.elapsed();

    println!("{:.9}", elapsed.as_secs_f64());
    if peak_rss > 0 {
        println!("{peak_rss}");
    }
}

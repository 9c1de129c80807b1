//! Memory Tracker (C12, ambient): an injected collaborator with `start()`/`stop()`/`max_rss()`,
//! per the Design Note "Optional memory-tracker" — the core never imports platform-specific memory
//! APIs directly beyond this one `sysinfo`-backed implementation.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use sysinfo::{PidExt, ProcessExt, System, SystemExt};

/// Samples the current process's resident set size on a background thread so measurement code
/// never has to care how RSS sampling works.
pub trait MemoryTracker: Send {
    /// Begin sampling.
    fn start(&mut self);
    /// Stop sampling and return the peak resident set size observed, in bytes.
    fn stop(&mut self) -> Option<u64>;
}

/// A tracker that never samples; used when neither `--track-memory` nor `--tracemalloc` is set.
#[derive(Default)]
pub struct NullTracker;

impl MemoryTracker for NullTracker {
    fn start(&mut self) {}
    fn stop(&mut self) -> Option<u64> {
        None
    }
}

/// Samples this process's RSS on a background thread at a fixed interval using `sysinfo`, per
/// §5 Concurrency & Resource Model: "the optional memory-tracking facility may start one
/// background thread whose only job is to sample RSS, but it must not perturb the measurement
/// clock."
pub struct SysinfoTracker {
    interval: Duration,
    running: Option<Arc<AtomicBool>>,
    peak_bytes: Option<Arc<AtomicU64>>,
    handle: Option<JoinHandle<()>>,
}

impl SysinfoTracker {
    /// Build a tracker that samples RSS every `interval`.
    #[must_use]
    pub fn new(interval: Duration) -> Self {
        SysinfoTracker {
            interval,
            running: None,
            peak_bytes: None,
            handle: None,
        }
    }
}

impl Default for SysinfoTracker {
    fn default() -> Self {
        SysinfoTracker::new(Duration::from_millis(10))
    }
}

impl MemoryTracker for SysinfoTracker {
    fn start(&mut self) {
        let running = Arc::new(AtomicBool::new(true));
        let peak_bytes = Arc::new(AtomicU64::new(0));
        let running_clone = Arc::clone(&running);
        let peak_clone = Arc::clone(&peak_bytes);
        let interval = self.interval;

        let handle = std::thread::spawn(move || {
            let pid = sysinfo::Pid::from_u32(std::process::id());
            let mut system = System::new();
            while running_clone.load(Ordering::Relaxed) {
                system.refresh_process(pid);
                if let Some(process) = system.process(pid) {
                    let rss_bytes = process.memory() * 1024;
                    peak_clone.fetch_max(rss_bytes, Ordering::Relaxed);
                }
                std::thread::sleep(interval);
            }
        });

        self.running = Some(running);
        self.peak_bytes = Some(peak_bytes);
        self.handle = Some(handle);
    }

    fn stop(&mut self) -> Option<u64> {
        if let Some(running) = self.running.take() {
            running.store(false, Ordering::Relaxed);
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
        self.peak_bytes.take().map(|peak| peak.load(Ordering::Relaxed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_tracker_reports_no_rss() {
        let mut tracker = NullTracker;
        tracker.start();
        assert_eq!(tracker.stop(), None);
    }

    #[test]
    fn sysinfo_tracker_reports_a_nonzero_peak() {
        let mut tracker = SysinfoTracker::new(Duration::from_millis(5));
        tracker.start();
        // Allocate to make sure RSS is nonzero by the time we sample.
        let _buf = vec![0u8; 4 * 1024 * 1024];
        std::thread::sleep(Duration::from_millis(20));
        let peak = tracker.stop();
        assert!(peak.unwrap_or(0) > 0);
    }
}

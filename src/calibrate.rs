//! Calibrator (C5): chooses the smallest doubling loop count whose measurement clears `min_time`
//! without badly overshooting `max_time` (§4.6).

use crate::task::Task;

/// Calibrate `task`, doubling `loops` from 1 until one measurement takes at least `min_time`
/// seconds (or would likely take more than `max_time`, in which case the last measured loop count
/// is returned rather than doubling past it).
///
/// # Errors
/// Propagates any error from the task's measurement function.
///
/// # Invariant
/// The returned `loops` satisfies `measure(loops) >= min_time` and, whenever `loops > 1`,
/// `measure(loops / 2) < min_time` (§8.3) — except in the overshoot-avoidance branch, where the
/// last measured `dt` is `>= max_time / 2` and a further doubling is skipped to avoid drastically
/// overshooting `max_time`.
pub fn calibrate(task: &mut Task, min_time: f64, max_time: f64) -> anyhow::Result<u64> {
    let mut loops: u64 = 1;
    loop {
        let sample = task.measure(loops)?;
        let dt = sample.duration.as_secs_f64();
        if dt >= min_time {
            return Ok(loops);
        }
        if dt >= max_time / 2.0 {
            return Ok(loops);
        }
        loops = loops.checked_mul(2).expect("loop count overflowed u64 during calibration");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Metadata;
    use crate::task::{MeasuredSample, WorkerProcessTask};
    use std::time::Duration;

    fn task_with_per_loop_time(seconds_per_loop: f64) -> Task {
        Task::WorkerProcess(WorkerProcessTask::new(
            "calibration-target",
            Metadata::new(),
            0,
            Box::new(move |loops| {
                Ok(MeasuredSample {
                    duration: Duration::from_secs_f64(seconds_per_loop * loops as f64),
                    rss: None,
                })
            }),
        ))
    }

    #[test]
    fn calibration_stops_at_the_smallest_loops_clearing_min_time() {
        let mut task = task_with_per_loop_time(1e-4);
        let loops = calibrate(&mut task, 0.01, 1.0).unwrap();

        // Property from §8.3: measure(loops) >= min_time, measure(loops/2) < min_time.
        assert!(loops > 1);
        assert!((loops as f64) * 1e-4 >= 0.01);
        assert!((loops / 2) as f64 * 1e-4 < 0.01);
    }

    #[test]
    fn a_single_loop_already_clearing_min_time_stops_immediately() {
        let mut task = task_with_per_loop_time(1.0);
        let loops = calibrate(&mut task, 0.01, 1.0).unwrap();
        assert_eq!(loops, 1);
    }

    #[test]
    fn overshoot_avoidance_stops_before_blowing_past_max_time() {
        // Each loop takes 0.6s; min_time is huge (never reached at reasonable loop counts) but
        // max_time/2 = 0.5s is cleared at loops=1 already, so calibration should stop at loops=1.
        let mut task = task_with_per_loop_time(0.6);
        let loops = calibrate(&mut task, 100.0, 1.0).unwrap();
        assert_eq!(loops, 1);
    }
}

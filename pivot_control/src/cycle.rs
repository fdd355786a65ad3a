//! Fixed-rate tick runner, one thread per axis.
//!
//! The loop paces itself by sleeping out the remainder of each period. A
//! tick that overruns its period raises the `TICK_OVERRUN` alarm and is
//! logged, but does not abort — at 10 Hz a late tick only delays
//! convergence. Every exit path ends with a final `stop` on the drive.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use pivot_common::state::AxisAlarm;
use tracing::{info, warn};

use crate::seek::AxisController;

/// O(1) per-tick timing statistics. Updated every tick, no allocation.
#[derive(Debug, Clone)]
pub struct TickStats {
    /// Total ticks executed.
    pub tick_count: u64,
    /// Last tick duration [ns].
    pub last_tick_ns: i64,
    /// Minimum tick duration [ns].
    pub min_tick_ns: i64,
    /// Maximum tick duration [ns].
    pub max_tick_ns: i64,
    /// Running sum for average computation.
    pub sum_tick_ns: i64,
    /// Number of period overruns.
    pub overruns: u64,
}

impl TickStats {
    pub const fn new() -> Self {
        Self {
            tick_count: 0,
            last_tick_ns: 0,
            min_tick_ns: i64::MAX,
            max_tick_ns: 0,
            sum_tick_ns: 0,
            overruns: 0,
        }
    }

    #[inline]
    pub fn record(&mut self, duration_ns: i64) {
        self.tick_count += 1;
        self.last_tick_ns = duration_ns;
        if duration_ns < self.min_tick_ns {
            self.min_tick_ns = duration_ns;
        }
        if duration_ns > self.max_tick_ns {
            self.max_tick_ns = duration_ns;
        }
        self.sum_tick_ns += duration_ns;
    }

    /// Average tick time [ns] (0 before the first tick).
    #[inline]
    pub fn avg_tick_ns(&self) -> i64 {
        if self.tick_count == 0 {
            0
        } else {
            self.sum_tick_ns / self.tick_count as i64
        }
    }
}

impl Default for TickStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Runs one axis controller at its configured tick rate until the shared
/// running flag drops.
pub struct AxisLoop {
    controller: AxisController,
    period: Duration,
    running: Arc<AtomicBool>,
    stats: TickStats,
}

impl AxisLoop {
    pub fn new(controller: AxisController, running: Arc<AtomicBool>) -> Self {
        let period = controller.tick_period();
        Self {
            controller,
            period,
            running,
            stats: TickStats::new(),
        }
    }

    /// Enter the tick loop. Returns the accumulated statistics once the
    /// running flag drops; the drive receives a final `stop` on every
    /// exit path.
    pub fn run(mut self) -> TickStats {
        let axis = self.controller.axis();
        info!(axis, period_ms = self.period.as_millis() as u64, "control loop started");

        while self.running.load(Ordering::SeqCst) {
            let started = Instant::now();
            self.controller.tick();
            let elapsed = started.elapsed();
            self.stats.record(elapsed.as_nanos() as i64);

            if let Some(remaining) = self.period.checked_sub(elapsed) {
                self.controller
                    .shared()
                    .set_alarm(axis, AxisAlarm::TICK_OVERRUN, false);
                std::thread::sleep(remaining);
            } else {
                self.stats.overruns += 1;
                warn!(
                    axis,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "control tick overran its period"
                );
                self.controller
                    .shared()
                    .set_alarm(axis, AxisAlarm::TICK_OVERRUN, true);
            }
        }

        self.controller.shutdown();
        info!(axis, ticks = self.stats.tick_count, "control loop stopped");
        self.stats
    }
}

/// Spawn one named loop thread per controller.
pub fn spawn_axis_loops(
    controllers: Vec<AxisController>,
    running: &Arc<AtomicBool>,
) -> std::io::Result<Vec<JoinHandle<TickStats>>> {
    controllers
        .into_iter()
        .map(|controller| {
            let name = controller
                .shared()
                .axis_name(controller.axis())
                .unwrap_or("axis")
                .to_string();
            let axis_loop = AxisLoop::new(controller, running.clone());
            std::thread::Builder::new()
                .name(format!("axis-{name}"))
                .spawn(move || axis_loop.run())
        })
        .collect()
}

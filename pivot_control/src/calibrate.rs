//! Calibration: discover the voltage range of each axis's travel.
//!
//! The calibrator drives an axis into both physical extremes, watches the
//! feedback voltage until it stabilizes against the hard stop, and builds
//! the [`CalibrationMapping`] from the two settled values. Failure leaves
//! any previously stored mapping untouched — the caller only stores the
//! result on success.

use std::time::{Duration, Instant};

use heapless::Deque;
use pivot_common::calibration::CalibrationMapping;
use pivot_common::config::CalibrationConfig;
use pivot_common::error::CalibrationError;
use pivot_common::state::AxisId;
use pivot_hal::drive::{AxisDrive, DriveDirection};
use pivot_hal::feedback::AnalogFeedback;
use tracing::{debug, info, warn};

/// Capacity of the settle window; the configured length must fit inside.
const SETTLE_CAPACITY: usize = 32;

/// Sliding voltage window with a variance-based settle check.
pub struct SettleWindow {
    buf: Deque<f64, SETTLE_CAPACITY>,
    need: usize,
}

impl SettleWindow {
    pub fn new(need: usize) -> Self {
        Self {
            buf: Deque::new(),
            need: need.clamp(2, SETTLE_CAPACITY),
        }
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }

    pub fn push(&mut self, sample: f64) {
        if self.buf.is_full() {
            self.buf.pop_front();
        }
        // Cannot fail: a slot was just freed if the buffer was full.
        let _ = self.buf.push_back(sample);
    }

    fn recent(&self) -> impl Iterator<Item = f64> + '_ {
        let skip = self.buf.len().saturating_sub(self.need);
        self.buf.iter().copied().skip(skip)
    }

    /// Mean of the most recent `need` samples, once enough exist.
    pub fn mean(&self) -> Option<f64> {
        if self.buf.len() < self.need {
            return None;
        }
        Some(self.recent().sum::<f64>() / self.need as f64)
    }

    /// Settled when the window is full and the population variance of the
    /// recent samples is below `variance_limit`.
    pub fn is_settled(&self, variance_limit: f64) -> bool {
        let Some(mean) = self.mean() else {
            return false;
        };
        let variance =
            self.recent().map(|v| (v - mean) * (v - mean)).sum::<f64>() / self.need as f64;
        variance <= variance_limit
    }
}

/// Which travel extreme is being sampled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Extreme {
    Low,
    High,
}

impl Extreme {
    fn position_percent(&self) -> f64 {
        match self {
            Self::Low => 0.0,
            Self::High => 100.0,
        }
    }

    fn direction(&self) -> DriveDirection {
        match self {
            Self::Low => DriveDirection::Reverse,
            Self::High => DriveDirection::Forward,
        }
    }
}

/// One-shot calibration runner for a single axis.
pub struct Calibrator {
    cfg: CalibrationConfig,
    /// Sampling cadence while waiting for the feedback to settle.
    tick: Duration,
}

impl Calibrator {
    pub fn new(cfg: CalibrationConfig, tick: Duration) -> Self {
        Self { cfg, tick }
    }

    /// Run the full calibration sequence.
    ///
    /// `cancelled` is probed between samples; emergency stop and shutdown
    /// abort the run with the drive stopped. Any in-flight seek must have
    /// been aborted by the caller before entering.
    pub fn run(
        &self,
        axis: AxisId,
        feedback: &mut AnalogFeedback,
        drive: &mut AxisDrive,
        cancelled: &dyn Fn() -> bool,
    ) -> Result<CalibrationMapping, CalibrationError> {
        info!(axis, "calibration started");

        let min_voltage = self.sample_extreme(Extreme::Low, axis, feedback, drive, cancelled)?;
        drive.stop()?;
        debug!(axis, min_voltage, "low extreme settled");

        let max_voltage = self.sample_extreme(Extreme::High, axis, feedback, drive, cancelled)?;
        drive.stop()?;
        debug!(axis, max_voltage, "high extreme settled");

        let mapping = CalibrationMapping::new(min_voltage, max_voltage, self.cfg.min_separation_v)?;
        info!(axis, min_voltage, max_voltage, "calibration complete");
        Ok(mapping)
    }

    /// Drive toward one extreme and wait for the feedback to stabilize.
    fn sample_extreme(
        &self,
        extreme: Extreme,
        axis: AxisId,
        feedback: &mut AnalogFeedback,
        drive: &mut AxisDrive,
        cancelled: &dyn Fn() -> bool,
    ) -> Result<f64, CalibrationError> {
        match drive {
            AxisDrive::Position(actuator) => actuator.set_position(extreme.position_percent())?,
            AxisDrive::Velocity(actuator) => {
                actuator.drive(extreme.direction(), self.cfg.drive_speed_percent)?
            }
        }

        let mut window = SettleWindow::new(self.cfg.settle_samples);
        let deadline = Instant::now() + Duration::from_secs_f64(self.cfg.settle_timeout_s);

        loop {
            if cancelled() {
                let _ = drive.stop();
                return Err(CalibrationError::Cancelled);
            }
            match feedback.sample_raw() {
                Ok(voltage) => {
                    window.push(voltage);
                    if window.is_settled(self.cfg.settle_variance)
                        && let Some(mean) = window.mean()
                    {
                        return Ok(mean);
                    }
                }
                Err(e) => {
                    // A glitched sample invalidates the stability evidence.
                    warn!(axis, error = %e, "sample failed during calibration");
                    window.clear();
                }
            }
            if Instant::now() >= deadline {
                let _ = drive.stop();
                return Err(CalibrationError::SettleTimeout {
                    timeout_s: self.cfg.settle_timeout_s,
                });
            }
            std::thread::sleep(self.tick);
        }
    }
}

//! The per-axis control state machine.
//!
//! `Idle → Seeking → {Converged | Faulted}`; `Calibrating` is entered
//! only between seeks and returns to `Idle` (or `Faulted` when the
//! hardware failed). A new target preempts the in-flight seek at the
//! next tick boundary — in-flight drive writes are never interrupted,
//! only superseded.
//!
//! Position actuators close their own loop, so seeking writes the target
//! once per tick and uses feedback only to detect convergence and faults.
//! Velocity actuators get direction from the error sign and a speed
//! proportional to the error magnitude, clamped between the configured
//! floor and ceiling.

use std::sync::Arc;
use std::time::{Duration, Instant};

use pivot_common::calibration::CalibrationMapping;
use pivot_common::config::{CalibrationConfig, ControlConfig};
use pivot_common::error::CalibrationError;
use pivot_common::shared::SharedState;
use pivot_common::state::{AxisAlarm, AxisId, ControlState, ControlTarget, FaultReason};
use pivot_hal::drive::{AxisDrive, DriveDirection};
use pivot_hal::feedback::AnalogFeedback;
use tracing::{debug, info, warn};

use crate::calibrate::Calibrator;

/// Book-keeping for the seek in flight.
struct ActiveSeek {
    seq: u64,
    target: ControlTarget,
    started: Instant,
    /// Consecutive stale/unusable samples.
    stale_run: u32,
    /// A drive command has been issued for this seek.
    moving: bool,
}

/// Owns one axis end to end: feedback, drive, and its slice of the
/// shared state. Driven by [`crate::cycle::AxisLoop`] at the tick rate.
pub struct AxisController {
    axis: AxisId,
    cfg: ControlConfig,
    cal_cfg: CalibrationConfig,
    tick_period: Duration,
    feedback: AnalogFeedback,
    drive: AxisDrive,
    shared: Arc<SharedState>,
    seek: Option<ActiveSeek>,
    /// Sequence number of the last target fully handled (converged or
    /// faulted), so a finished target does not restart every tick.
    done_seq: u64,
    /// The latched emergency stop has been acted on.
    estop_handled: bool,
}

impl AxisController {
    pub fn new(
        axis: AxisId,
        cfg: ControlConfig,
        cal_cfg: CalibrationConfig,
        feedback: AnalogFeedback,
        drive: AxisDrive,
        shared: Arc<SharedState>,
    ) -> Self {
        let tick_period = Duration::from_secs_f64(1.0 / cfg.tick_hz);
        Self {
            axis,
            cfg,
            cal_cfg,
            tick_period,
            feedback,
            drive,
            shared,
            seek: None,
            done_seq: 0,
            estop_handled: false,
        }
    }

    pub fn axis(&self) -> AxisId {
        self.axis
    }

    pub fn tick_period(&self) -> Duration {
        self.tick_period
    }

    pub fn shared(&self) -> &Arc<SharedState> {
        &self.shared
    }

    /// One control tick.
    pub fn tick(&mut self) {
        if self.shared.estop_engaged() {
            if !self.estop_handled {
                self.estop_handled = true;
                self.abort_seek();
                self.fault(FaultReason::EmergencyStop);
            }
            return;
        }
        self.estop_handled = false;

        if self.shared.take_calibration_request(self.axis) {
            self.run_calibration();
            return;
        }

        // Pick up a new target; replaces the in-flight seek cooperatively.
        if let Some((seq, target)) = self.shared.current_target(self.axis) {
            let active = self.seek.as_ref().map(|s| s.seq);
            if active != Some(seq) && self.done_seq != seq {
                debug!(axis = self.axis, seq, target = target.position_percent, "seek begins");
                self.seek = Some(ActiveSeek {
                    seq,
                    target,
                    started: Instant::now(),
                    stale_run: 0,
                    moving: false,
                });
            }
        }

        match self.shared.get_calibration(self.axis) {
            Some(cal) if self.seek.is_some() => self.run_seek(cal),
            Some(cal) => self.idle_sample(cal),
            None => {}
        }
    }

    /// Final stop on the way out; called from every loop exit path.
    pub fn shutdown(&mut self) {
        if let Err(e) = self.drive.stop() {
            warn!(axis = self.axis, error = %e, "stop failed during shutdown");
        }
    }

    // ─── Seeking ────────────────────────────────────────────────────

    fn run_seek(&mut self, cal: CalibrationMapping) {
        let Some(mut seek) = self.seek.take() else {
            return;
        };

        let reading = match self.feedback.acquire(&cal) {
            Ok(reading) => {
                self.shared.store_reading(self.axis, reading);
                Some(reading)
            }
            Err(e) => {
                debug!(axis = self.axis, error = %e, "no usable sample");
                None
            }
        };

        // Staleness escalation before anything else: a blind axis must
        // not keep driving.
        if reading.is_none_or(|r| r.stale) {
            seek.stale_run += 1;
        } else {
            seek.stale_run = 0;
        }
        if seek.stale_run > self.cfg.stale_sample_limit {
            warn!(
                axis = self.axis,
                run = seek.stale_run,
                "feedback lost while seeking"
            );
            self.done_seq = seek.seq;
            self.fault(FaultReason::FeedbackLost);
            return;
        }

        let Some(reading) = reading else {
            // Never had a good sample; keep the slot and retry next tick.
            self.seek = Some(seek);
            return;
        };

        let error = seek.target.position_percent - reading.position_percent;

        if error.abs() <= seek.target.tolerance_percent {
            // Only an axis that was actually commanded needs a stop; a
            // target already inside tolerance produces no drive traffic.
            if seek.moving && !self.try_drive_stop() {
                self.done_seq = seek.seq;
                return;
            }
            info!(
                axis = self.axis,
                position = reading.position_percent,
                target = seek.target.position_percent,
                "converged"
            );
            self.done_seq = seek.seq;
            self.shared.set_state(self.axis, ControlState::Converged, None);
            return;
        }

        if seek.started.elapsed() > seek.target.timeout {
            warn!(
                axis = self.axis,
                elapsed_s = seek.started.elapsed().as_secs_f64(),
                "seek timed out"
            );
            self.done_seq = seek.seq;
            self.fault(FaultReason::SeekTimeout);
            return;
        }

        self.shared.set_state(self.axis, ControlState::Seeking, None);

        let issued = match &mut self.drive {
            // The actuator closes the position loop itself; feedback only
            // decides convergence and faults.
            AxisDrive::Position(actuator) => {
                actuator.set_position(seek.target.position_percent)
            }
            AxisDrive::Velocity(actuator) => {
                let direction = if error > 0.0 {
                    DriveDirection::Forward
                } else {
                    DriveDirection::Reverse
                };
                let speed = (self.cfg.gain_percent_per_error * error.abs())
                    .clamp(self.cfg.min_speed_percent, self.cfg.max_speed_percent);
                actuator.drive(direction, speed)
            }
        };

        match issued {
            Ok(()) => {
                seek.moving = true;
                self.seek = Some(seek);
            }
            Err(e) => {
                warn!(axis = self.axis, error = %e, "drive rejected command");
                self.done_seq = seek.seq;
                self.shared.set_alarm(self.axis, AxisAlarm::DRIVE_FAULT, true);
                self.fault(FaultReason::DriveFault);
            }
        }
    }

    /// Keep the published position live while no seek is active.
    fn idle_sample(&mut self, cal: CalibrationMapping) {
        if let Ok(reading) = self.feedback.acquire(&cal) {
            self.shared.store_reading(self.axis, reading);
        }
    }

    // ─── Faults & calibration ───────────────────────────────────────

    /// Stop the drive and latch the fault. The stop is issued exactly
    /// once — a faulted axis issues no further drive commands.
    fn fault(&mut self, reason: FaultReason) {
        if let Err(e) = self.drive.stop() {
            warn!(axis = self.axis, error = %e, "stop command failed");
            self.shared.set_alarm(self.axis, AxisAlarm::DRIVE_FAULT, true);
        }
        self.shared
            .set_state(self.axis, ControlState::Faulted, Some(reason));
    }

    fn try_drive_stop(&mut self) -> bool {
        match self.drive.stop() {
            Ok(()) => true,
            Err(e) => {
                warn!(axis = self.axis, error = %e, "stop command failed");
                self.shared.set_alarm(self.axis, AxisAlarm::DRIVE_FAULT, true);
                self.shared
                    .set_state(self.axis, ControlState::Faulted, Some(FaultReason::DriveFault));
                false
            }
        }
    }

    fn abort_seek(&mut self) {
        if let Some(seek) = self.seek.take() {
            self.done_seq = seek.seq;
        }
    }

    fn run_calibration(&mut self) {
        // Calibration is destructive to any in-flight seek.
        if self.seek.is_some() {
            self.abort_seek();
            if !self.try_drive_stop() {
                return;
            }
        }
        self.shared
            .set_state(self.axis, ControlState::Calibrating, None);

        let calibrator = Calibrator::new(self.cal_cfg, self.tick_period);
        let shared = self.shared.clone();
        let cancelled = move || shared.estop_engaged();
        let result = calibrator.run(self.axis, &mut self.feedback, &mut self.drive, &cancelled);

        match result {
            Ok(mapping) => {
                self.shared.store_calibration(self.axis, mapping);
                self.shared.set_state(self.axis, ControlState::Idle, None);
            }
            Err(CalibrationError::Cancelled) => {
                // The calibrator already stopped the drive.
                self.estop_handled = true;
                self.shared.set_state(
                    self.axis,
                    ControlState::Faulted,
                    Some(FaultReason::EmergencyStop),
                );
            }
            Err(e @ (CalibrationError::Invalid { .. }
            | CalibrationError::SeparationTooSmall { .. })) => {
                // Rejected mapping: prior calibration stays in effect.
                warn!(axis = self.axis, error = %e, "calibration rejected");
                self.shared.set_state(self.axis, ControlState::Idle, None);
            }
            Err(e @ CalibrationError::SettleTimeout { .. }) => {
                warn!(axis = self.axis, error = %e, "calibration failed");
                self.fault(FaultReason::FeedbackLost);
            }
            Err(CalibrationError::Hal(e)) => {
                warn!(axis = self.axis, error = %e, "calibration hardware failure");
                let reason = match e {
                    pivot_common::error::HalError::DriveUnavailable { .. } => {
                        FaultReason::DriveFault
                    }
                    pivot_common::error::HalError::SensorUnavailable { .. } => {
                        FaultReason::FeedbackLost
                    }
                };
                self.fault(reason);
            }
        }
    }
}

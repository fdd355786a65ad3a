//! Simulated rig: virtual carriages with potentiometer feedback.
//!
//! Each axis is a carriage on a normalized 0..1 travel span with hard
//! stops at both ends. Velocity actuators integrate a signed rate;
//! position actuators slew toward their commanded fraction. The simulated
//! potentiometer maps travel linearly onto a voltage range, optionally
//! inverted to model swapped wiring.
//!
//! Physics advance either from wall-clock time (daemon `--simulate` mode)
//! or by explicit [`SimRig::step`] calls for deterministic tests. Fault
//! injection covers a failing ADC and a failing drive, and every drive
//! command is recorded for assertions.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use pivot_common::error::HalError;
use pivot_common::state::AxisId;
use tracing::trace;

use crate::drive::{DriveDirection, PositionActuator, VelocityActuator};
use crate::feedback::AdcInput;

/// Per-axis simulation parameters.
#[derive(Debug, Clone, Copy)]
pub struct SimAxisParams {
    /// Full-span travel per second at 100 % drive speed [1/s].
    pub travel_rate: f64,
    /// Position-actuator slew rate [1/s].
    pub slew_rate: f64,
    /// Potentiometer voltage at travel 0 (or 1 when inverted) [V].
    pub min_voltage: f64,
    /// Potentiometer voltage at travel 1 (or 0 when inverted) [V].
    pub max_voltage: f64,
    /// Swap the wiper ends, as mis-wired rigs do.
    pub inverted: bool,
}

impl Default for SimAxisParams {
    fn default() -> Self {
        Self {
            travel_rate: 0.25,
            slew_rate: 0.5,
            min_voltage: 0.5,
            max_voltage: 2.9,
            inverted: false,
        }
    }
}

/// A recorded drive command.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DriveEvent {
    SetPosition(f64),
    Drive(DriveDirection, f64),
    Stop,
}

#[derive(Debug)]
struct SimAxis {
    params: SimAxisParams,
    /// Carriage travel, fraction of the full span.
    travel: f64,
    /// Signed travel velocity [1/s] (velocity actuators).
    velocity: f64,
    /// Commanded travel fraction (position actuators).
    slew_target: Option<f64>,
    /// Remaining injected ADC failures; `u32::MAX` means persistent.
    adc_failures: u32,
    drive_failing: bool,
    log: Vec<DriveEvent>,
}

impl SimAxis {
    fn new(params: SimAxisParams) -> Self {
        Self {
            params,
            travel: 0.5,
            velocity: 0.0,
            slew_target: None,
            adc_failures: 0,
            drive_failing: false,
            log: Vec::new(),
        }
    }

    fn advance(&mut self, dt: f64) {
        if let Some(target) = self.slew_target {
            let step = self.params.slew_rate * dt;
            let delta = target - self.travel;
            if delta.abs() <= step {
                self.travel = target;
            } else {
                self.travel += delta.signum() * step;
            }
        } else {
            self.travel += self.velocity * dt;
        }
        // Hard stops at the travel extremes.
        self.travel = self.travel.clamp(0.0, 1.0);
    }

    fn voltage(&self) -> f64 {
        let span = self.params.max_voltage - self.params.min_voltage;
        if self.params.inverted {
            self.params.max_voltage - self.travel * span
        } else {
            self.params.min_voltage + self.travel * span
        }
    }
}

struct SimInner {
    axes: Vec<SimAxis>,
    last_advance: Instant,
    auto_advance: bool,
}

impl SimInner {
    fn advance(&mut self, dt: Duration) {
        let dt_s = dt.as_secs_f64();
        for axis in &mut self.axes {
            axis.advance(dt_s);
        }
    }

    fn maybe_auto_advance(&mut self) {
        if self.auto_advance {
            let now = Instant::now();
            let dt = now - self.last_advance;
            self.last_advance = now;
            self.advance(dt);
        }
    }
}

/// Handle to the simulated rig; cheap to clone, all handles share state.
#[derive(Clone)]
pub struct SimRig {
    inner: Arc<Mutex<SimInner>>,
}

impl SimRig {
    pub fn new(params: Vec<SimAxisParams>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(SimInner {
                axes: params.into_iter().map(SimAxis::new).collect(),
                last_advance: Instant::now(),
                auto_advance: true,
            })),
        }
    }

    /// A rig with `count` default axes.
    pub fn with_axes(count: usize) -> Self {
        Self::new(vec![SimAxisParams::default(); count])
    }

    /// Disable wall-clock physics; tests then call [`SimRig::step`].
    pub fn set_auto_advance(&self, on: bool) {
        let mut inner = self.inner.lock();
        inner.auto_advance = on;
        inner.last_advance = Instant::now();
    }

    /// Advance physics by `dt` of simulated time.
    pub fn step(&self, dt: Duration) {
        self.inner.lock().advance(dt);
    }

    pub fn travel(&self, axis: AxisId) -> f64 {
        self.inner.lock().axes[axis as usize].travel
    }

    pub fn set_travel(&self, axis: AxisId, fraction: f64) {
        self.inner.lock().axes[axis as usize].travel = fraction.clamp(0.0, 1.0);
    }

    /// Inject `count` failing ADC reads (`u32::MAX` = fail forever).
    pub fn fail_adc(&self, axis: AxisId, count: u32) {
        self.inner.lock().axes[axis as usize].adc_failures = count;
    }

    pub fn fail_drive(&self, axis: AxisId, failing: bool) {
        self.inner.lock().axes[axis as usize].drive_failing = failing;
    }

    pub fn drive_log(&self, axis: AxisId) -> Vec<DriveEvent> {
        self.inner.lock().axes[axis as usize].log.clone()
    }

    pub fn clear_drive_log(&self, axis: AxisId) {
        self.inner.lock().axes[axis as usize].log.clear();
    }

    /// ADC handle for one axis.
    pub fn adc(&self, axis: AxisId) -> SimAdc {
        SimAdc {
            inner: self.inner.clone(),
            axis,
        }
    }

    /// Position-actuator handle for one axis.
    pub fn position_actuator(&self, axis: AxisId) -> SimPositionActuator {
        SimPositionActuator {
            inner: self.inner.clone(),
            axis,
        }
    }

    /// Velocity-actuator handle for one axis.
    pub fn velocity_actuator(&self, axis: AxisId) -> SimVelocityActuator {
        SimVelocityActuator {
            inner: self.inner.clone(),
            axis,
        }
    }
}

/// Simulated ADC channel.
pub struct SimAdc {
    inner: Arc<Mutex<SimInner>>,
    axis: AxisId,
}

impl AdcInput for SimAdc {
    fn read_voltage(&mut self) -> Result<f64, HalError> {
        let mut inner = self.inner.lock();
        inner.maybe_auto_advance();
        let axis = &mut inner.axes[self.axis as usize];
        if axis.adc_failures > 0 {
            if axis.adc_failures != u32::MAX {
                axis.adc_failures -= 1;
            }
            return Err(HalError::SensorUnavailable {
                channel: self.axis,
                detail: "injected ADC fault".into(),
            });
        }
        let voltage = axis.voltage();
        trace!(axis = self.axis, voltage, travel = axis.travel, "sim sample");
        Ok(voltage)
    }

    fn channel(&self) -> u8 {
        self.axis
    }
}

/// Simulated direct position actuator.
pub struct SimPositionActuator {
    inner: Arc<Mutex<SimInner>>,
    axis: AxisId,
}

impl PositionActuator for SimPositionActuator {
    fn set_position(&mut self, percent: f64) -> Result<(), HalError> {
        let mut inner = self.inner.lock();
        inner.maybe_auto_advance();
        let axis = &mut inner.axes[self.axis as usize];
        axis.log.push(DriveEvent::SetPosition(percent));
        if axis.drive_failing {
            return Err(HalError::DriveUnavailable {
                axis: self.axis,
                detail: "injected drive fault".into(),
            });
        }
        axis.slew_target = Some(percent.clamp(0.0, 100.0) / 100.0);
        Ok(())
    }

    fn stop(&mut self) -> Result<(), HalError> {
        let mut inner = self.inner.lock();
        inner.maybe_auto_advance();
        let axis = &mut inner.axes[self.axis as usize];
        axis.log.push(DriveEvent::Stop);
        axis.slew_target = None;
        Ok(())
    }
}

/// Simulated velocity actuator.
pub struct SimVelocityActuator {
    inner: Arc<Mutex<SimInner>>,
    axis: AxisId,
}

impl VelocityActuator for SimVelocityActuator {
    fn drive(&mut self, direction: DriveDirection, speed_percent: f64) -> Result<(), HalError> {
        let mut inner = self.inner.lock();
        inner.maybe_auto_advance();
        let axis = &mut inner.axes[self.axis as usize];
        axis.log.push(DriveEvent::Drive(direction, speed_percent));
        if axis.drive_failing {
            return Err(HalError::DriveUnavailable {
                axis: self.axis,
                detail: "injected drive fault".into(),
            });
        }
        let speed = speed_percent.clamp(0.0, 100.0) / 100.0;
        axis.velocity = direction.sign() * speed * axis.params.travel_rate;
        Ok(())
    }

    fn stop(&mut self) -> Result<(), HalError> {
        let mut inner = self.inner.lock();
        inner.maybe_auto_advance();
        let axis = &mut inner.axes[self.axis as usize];
        axis.log.push(DriveEvent::Stop);
        axis.velocity = 0.0;
        Ok(())
    }
}

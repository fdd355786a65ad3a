//! Actuator drive abstraction.
//!
//! Two actuator capabilities exist: direct position actuators (hobby
//! servos — the device closes its own position loop) and velocity
//! actuators (DC motors behind an H-bridge — the control loop must stop
//! them from feedback). The variant is selected at configuration time via
//! [`AxisDrive`]; drive code never inspects types at runtime.
//!
//! Both capabilities expose `stop` as the unconditional safety primitive
//! used on fault, timeout and shutdown.

use pivot_common::error::HalError;
use pivot_common::state::AxisId;
use tracing::debug;

/// Raw drive command direction for velocity actuators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum DriveDirection {
    /// Travel toward the high extreme.
    Forward = 0,
    /// Travel toward the low extreme.
    Reverse = 1,
    /// Short brake (both bridge legs high).
    Brake = 2,
    /// Coast (both bridge legs low).
    Stop = 3,
}

impl DriveDirection {
    #[inline]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Forward),
            1 => Some(Self::Reverse),
            2 => Some(Self::Brake),
            3 => Some(Self::Stop),
            _ => None,
        }
    }

    /// Travel sign: +1 forward, -1 reverse, 0 for brake/stop.
    #[inline]
    pub const fn sign(&self) -> f64 {
        match self {
            Self::Forward => 1.0,
            Self::Reverse => -1.0,
            Self::Brake | Self::Stop => 0.0,
        }
    }
}

/// Direct position actuator: one idempotent position write, the device
/// converges on its own.
pub trait PositionActuator: Send {
    fn set_position(&mut self, percent: f64) -> Result<(), HalError>;
    fn stop(&mut self) -> Result<(), HalError>;
}

/// Velocity actuator: direction + speed, needs feedback-based stopping.
pub trait VelocityActuator: Send {
    fn drive(&mut self, direction: DriveDirection, speed_percent: f64) -> Result<(), HalError>;
    fn stop(&mut self) -> Result<(), HalError>;
}

/// The drive capability of one axis, fixed at configuration time.
pub enum AxisDrive {
    Position(Box<dyn PositionActuator>),
    Velocity(Box<dyn VelocityActuator>),
}

impl AxisDrive {
    /// Unconditional safety primitive.
    pub fn stop(&mut self) -> Result<(), HalError> {
        match self {
            Self::Position(actuator) => actuator.stop(),
            Self::Velocity(actuator) => actuator.stop(),
        }
    }

    pub fn is_velocity(&self) -> bool {
        matches!(self, Self::Velocity(_))
    }
}

// ─── Output device contracts ────────────────────────────────────────

/// A PWM output device (hardware or software PWM).
pub trait PwmOutput: Send {
    fn set_pulse_width_us(&mut self, width_us: u64) -> Result<(), HalError>;
    fn set_duty_percent(&mut self, percent: f64) -> Result<(), HalError>;
}

/// A single digital output pin.
pub trait DigitalOutput: Send {
    fn write(&mut self, high: bool) -> Result<(), HalError>;
}

// ─── PWM servo ──────────────────────────────────────────────────────

/// Hobby servo on a PWM output.
///
/// Percent maps linearly onto the configured pulse-width range. Calibrate
/// the pulse bounds against the physical horn before trusting the ends of
/// the range.
pub struct PwmServo {
    axis: AxisId,
    pwm: Box<dyn PwmOutput>,
    min_pulse_us: u64,
    max_pulse_us: u64,
}

impl PwmServo {
    pub fn new(axis: AxisId, pwm: Box<dyn PwmOutput>, min_pulse_us: u64, max_pulse_us: u64) -> Self {
        Self {
            axis,
            pwm,
            min_pulse_us,
            max_pulse_us,
        }
    }

    fn pulse_for(&self, percent: f64) -> u64 {
        let fraction = percent.clamp(0.0, 100.0) / 100.0;
        let span = (self.max_pulse_us - self.min_pulse_us) as f64;
        self.min_pulse_us + (fraction * span).round() as u64
    }
}

impl PositionActuator for PwmServo {
    fn set_position(&mut self, percent: f64) -> Result<(), HalError> {
        let width_us = self.pulse_for(percent);
        debug!(axis = self.axis, percent, width_us, "servo position");
        self.pwm.set_pulse_width_us(width_us)
    }

    /// Drop the duty cycle to zero: the servo goes limp and holds no
    /// torque, which is the no-motion default for this device class.
    fn stop(&mut self) -> Result<(), HalError> {
        self.pwm.set_duty_percent(0.0)
    }
}

// ─── H-bridge DC motor ──────────────────────────────────────────────

/// Brushed DC motor behind a TB6612-style H-bridge.
///
/// Truth table: IN1/IN2 high/low = forward, low/high = reverse,
/// high/high = short brake, low/low = coast. Construction enables the
/// driver (standby high) and leaves the bridge coasting — the fail-safe
/// default is no motion until explicitly commanded.
pub struct HBridgeMotor {
    axis: AxisId,
    forward: Box<dyn DigitalOutput>,
    reverse: Box<dyn DigitalOutput>,
    pwm: Box<dyn PwmOutput>,
    standby: Option<Box<dyn DigitalOutput>>,
}

impl HBridgeMotor {
    pub fn new(
        axis: AxisId,
        forward: Box<dyn DigitalOutput>,
        reverse: Box<dyn DigitalOutput>,
        pwm: Box<dyn PwmOutput>,
        standby: Option<Box<dyn DigitalOutput>>,
    ) -> Result<Self, HalError> {
        let mut motor = Self {
            axis,
            forward,
            reverse,
            pwm,
            standby,
        };
        if let Some(standby) = motor.standby.as_mut() {
            standby.write(true)?;
        }
        motor.apply(DriveDirection::Stop, 0.0)?;
        Ok(motor)
    }

    fn apply(&mut self, direction: DriveDirection, speed_percent: f64) -> Result<(), HalError> {
        match direction {
            DriveDirection::Forward => {
                self.forward.write(true)?;
                self.reverse.write(false)?;
                self.pwm.set_duty_percent(speed_percent)
            }
            DriveDirection::Reverse => {
                self.forward.write(false)?;
                self.reverse.write(true)?;
                self.pwm.set_duty_percent(speed_percent)
            }
            DriveDirection::Brake => {
                self.forward.write(true)?;
                self.reverse.write(true)?;
                self.pwm.set_duty_percent(100.0)
            }
            DriveDirection::Stop => {
                self.forward.write(false)?;
                self.reverse.write(false)?;
                self.pwm.set_duty_percent(0.0)
            }
        }
    }
}

impl VelocityActuator for HBridgeMotor {
    fn drive(&mut self, direction: DriveDirection, speed_percent: f64) -> Result<(), HalError> {
        let speed = speed_percent.clamp(0.0, 100.0);
        debug!(axis = self.axis, ?direction, speed, "motor drive");
        self.apply(direction, speed)
    }

    fn stop(&mut self) -> Result<(), HalError> {
        self.apply(DriveDirection::Stop, 0.0)
    }
}

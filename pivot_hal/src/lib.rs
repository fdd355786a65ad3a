//! Pivot Hardware Abstraction Layer
//!
//! Pluggable hardware access for the position controller:
//!
//! - [`feedback`] - ADC input trait and the calibrated feedback wrapper
//! - [`drive`] - Actuator capability traits and the PWM/H-bridge devices
//! - [`drivers`] - Backends: simulation (always available) and Raspberry
//!   Pi GPIO/PWM/I2C behind the `raspi` feature
//!
//! The control loop only ever sees [`feedback::AnalogFeedback`] and
//! [`drive::AxisDrive`]; which backend sits underneath is decided at
//! configuration time.

pub mod drive;
pub mod drivers;
pub mod feedback;

pub use drive::{AxisDrive, DriveDirection, PositionActuator, VelocityActuator};
pub use feedback::{AdcInput, AnalogFeedback};

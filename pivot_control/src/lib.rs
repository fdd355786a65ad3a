//! Pivot Control
//!
//! The closed-loop position control core:
//!
//! - [`calibrate`] - Travel-extreme discovery with settle detection
//! - [`seek`] - The per-axis control state machine
//! - [`cycle`] - Fixed-rate tick runner and timing statistics
//!
//! One [`seek::AxisController`] owns one axis's feedback and drive; one
//! [`cycle::AxisLoop`] runs it at the configured tick rate on its own
//! thread. Axes never share locks, so a stalled or calibrating axis
//! cannot delay another.

pub mod calibrate;
pub mod cycle;
pub mod seek;

pub use calibrate::Calibrator;
pub use cycle::{AxisLoop, TickStats, spawn_axis_loops};
pub use seek::AxisController;

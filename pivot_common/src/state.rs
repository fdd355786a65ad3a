//! Axis identifiers, control-state enums, targets and feedback readings.
//!
//! All state enums use `#[repr(u8)]` for compact layout and carry a
//! `from_u8` companion so raw values coming from payloads can be checked.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

/// Axis identifier — 0-based index into the configured axis set.
pub type AxisId = u8;

/// Maximum number of axes supported.
pub const MAX_AXES: usize = 8;

/// Horizontal axis of the two-axis reference rig.
pub const AXIS_X: AxisId = 0;
/// Vertical axis of the two-axis reference rig.
pub const AXIS_Y: AxisId = 1;

/// Microseconds since the Unix epoch, for timestamping readings and events.
pub fn now_us() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_micros() as u64
}

/// Per-axis control state.
///
/// Exactly one state is active per axis at any instant. `Calibrating` is
/// entered only from `Idle`; a new target forces any non-`Calibrating`
/// state into `Seeking`. `Faulted` is not self-clearing — it takes a new
/// target or calibration command to leave it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum ControlState {
    /// No active target, no motion commanded.
    Idle = 0,
    /// Calibration run in progress on this axis.
    Calibrating = 1,
    /// Closed-loop seek toward the active target.
    Seeking = 2,
    /// Current position is within tolerance of the target.
    Converged = 3,
    /// Axis refused further motion; requires operator intervention.
    Faulted = 4,
}

impl ControlState {
    /// Convert from raw `u8`. Returns `None` for invalid values.
    #[inline]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Idle),
            1 => Some(Self::Calibrating),
            2 => Some(Self::Seeking),
            3 => Some(Self::Converged),
            4 => Some(Self::Faulted),
            _ => None,
        }
    }

    /// Lowercase name used in published payloads.
    #[inline]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Calibrating => "calibrating",
            Self::Seeking => "seeking",
            Self::Converged => "converged",
            Self::Faulted => "faulted",
        }
    }
}

impl Default for ControlState {
    fn default() -> Self {
        Self::Idle
    }
}

/// Reason an axis entered `Faulted`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum FaultReason {
    /// Consecutive stale feedback samples exceeded the configured limit.
    FeedbackLost = 0,
    /// The seek did not converge within the target's timeout.
    SeekTimeout = 1,
    /// The output device rejected a drive command.
    DriveFault = 2,
    /// Operator emergency stop.
    EmergencyStop = 3,
}

impl FaultReason {
    #[inline]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::FeedbackLost),
            1 => Some(Self::SeekTimeout),
            2 => Some(Self::DriveFault),
            3 => Some(Self::EmergencyStop),
            _ => None,
        }
    }

    /// Snake-case name used in published payloads.
    #[inline]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::FeedbackLost => "feedback_lost",
            Self::SeekTimeout => "seek_timeout",
            Self::DriveFault => "drive_fault",
            Self::EmergencyStop => "emergency_stop",
        }
    }
}

bitflags! {
    /// Per-axis diagnostic alarms, published alongside the control state.
    ///
    /// Alarms are advisory; they do not change the state machine on their
    /// own (the staleness counter and drive errors do that).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct AxisAlarm: u8 {
        /// Last sample was served from the cache, not the ADC.
        const STALE_SAMPLE   = 0x01;
        /// ADC returned a reading far outside the calibrated span.
        const SENSOR_RANGE   = 0x02;
        /// A control tick overran its period.
        const TICK_OVERRUN   = 0x04;
        /// The output device rejected a command.
        const DRIVE_FAULT    = 0x08;
        /// No valid calibration mapping is loaded.
        const NOT_CALIBRATED = 0x10;
    }
}

impl Default for AxisAlarm {
    fn default() -> Self {
        Self::empty()
    }
}

/// One calibrated feedback sample.
///
/// Produced by the feedback path every control tick; transient, never
/// persisted. `stale` marks a value served from the last known-good cache
/// because a live sample could not be obtained in time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PositionReading {
    pub axis: AxisId,
    /// Raw potentiometer voltage [V].
    pub voltage: f64,
    /// Calibrated position [0, 100] %.
    pub position_percent: f64,
    /// True when this is a cached value, not a live sample.
    pub stale: bool,
    /// Sample timestamp [µs since epoch].
    pub timestamp_us: u64,
}

/// An active position command for one axis.
///
/// One target is active per axis at a time; a newly submitted target
/// replaces the in-flight one atomically.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ControlTarget {
    /// Commanded position [0, 100] %.
    pub position_percent: f64,
    /// Convergence window [%].
    pub tolerance_percent: f64,
    /// Maximum seek duration before the axis faults.
    pub timeout: Duration,
}

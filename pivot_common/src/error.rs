//! Error types shared across the workspace.

use thiserror::Error;

use crate::state::AxisId;

/// Errors surfaced by the hardware access layer.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum HalError {
    /// The ADC transaction did not complete in time or returned an
    /// out-of-range code. Transient; the caller decides whether to retry.
    #[error("sensor unavailable on channel {channel}: {detail}")]
    SensorUnavailable { channel: u8, detail: String },

    /// The output device rejected a drive command. Fatal for the axis —
    /// uncommanded partial drive is unsafe, so there is no retry.
    #[error("drive unavailable on axis {axis}: {detail}")]
    DriveUnavailable { axis: AxisId, detail: String },
}

/// Errors from a calibration run.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum CalibrationError {
    /// The sampled extremes are inverted or degenerate.
    #[error("invalid mapping: min {min_voltage:.3} V >= max {max_voltage:.3} V")]
    Invalid { min_voltage: f64, max_voltage: f64 },

    /// The extremes are ordered but too close together to trust.
    #[error("voltage separation {separation:.3} V below required margin {margin:.3} V")]
    SeparationTooSmall { separation: f64, margin: f64 },

    /// Feedback never stabilized at an extreme within the settle timeout.
    #[error("feedback did not settle within {timeout_s:.1} s")]
    SettleTimeout { timeout_s: f64 },

    /// The run was cancelled (emergency stop or shutdown).
    #[error("calibration cancelled")]
    Cancelled,

    #[error(transparent)]
    Hal(#[from] HalError),
}

/// Rejected inbound commands.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum CommandError {
    #[error("unknown axis {0}")]
    UnknownAxis(AxisId),

    /// Position commands are refused until a valid mapping exists.
    #[error("axis {0} has no valid calibration")]
    NotCalibrated(AxisId),

    /// Targets submitted during a calibration run are dropped, not queued.
    #[error("axis {0} is calibrating")]
    CalibrationInProgress(AxisId),

    #[error("target position {0} is not a finite number")]
    NonFiniteTarget(f64),
}

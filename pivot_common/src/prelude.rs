//! Common re-exports for convenience.

pub use crate::calibration::CalibrationMapping;
pub use crate::config::{
    AxisConfig, CalibrationConfig, ControlConfig, DriveConfig, PivotConfig, SensorConfig,
    load_config,
};
pub use crate::error::{CalibrationError, CommandError, HalError};
pub use crate::shared::{AxisMeta, AxisSnapshot, SharedState, StateEvent};
pub use crate::state::{
    AXIS_X, AXIS_Y, AxisAlarm, AxisId, ControlState, ControlTarget, FaultReason, MAX_AXES,
    PositionReading, now_us,
};

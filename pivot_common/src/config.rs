//! TOML configuration loading and validation.
//!
//! A single `pivot.toml` describes the service, the hub liaison, and one
//! `[[axis]]` table per axis. Control and calibration tuning carry
//! defaults so a minimal file only names the axes and their wiring.
//!
//! # TOML Example
//!
//! ```toml
//! [shared]
//! log_level = "info"
//! service_name = "pivotd-livingroom"
//!
//! [[axis]]
//! name = "x"
//!
//! [axis.sensor]
//! channel = 0
//!
//! [axis.drive]
//! type = "motor"
//! forward_pin = 17
//! reverse_pin = 27
//! pwm_pin = 22
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::calibration::CalibrationMapping;
use crate::state::MAX_AXES;

/// Error type for configuration loading operations.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    /// Configuration file not found at the specified path.
    #[error("configuration file not found")]
    FileNotFound,

    /// TOML parsing failed.
    #[error("failed to parse configuration: {0}")]
    ParseError(String),

    /// Semantic validation failed.
    #[error("configuration validation failed: {0}")]
    ValidationError(String),
}

/// Log level for application logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Directive string understood by `tracing_subscriber::EnvFilter`.
    pub const fn as_filter(&self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

/// Common configuration fields shared by every pivot binary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SharedConfig {
    /// Logging verbosity level.
    #[serde(default)]
    pub log_level: LogLevel,
    /// Application instance identifier.
    pub service_name: String,
}

/// Hub liaison settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubConfig {
    /// Topic prefix for all published and subscribed topics.
    #[serde(default = "default_topic_prefix")]
    pub topic_prefix: String,
    /// Periodic status publish interval [s].
    #[serde(default = "default_publish_interval")]
    pub publish_interval_s: f64,
}

fn default_topic_prefix() -> String {
    "pivot".to_string()
}
fn default_publish_interval() -> f64 {
    1.0
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            topic_prefix: default_topic_prefix(),
            publish_interval_s: default_publish_interval(),
        }
    }
}

/// Startup behavior.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StartupConfig {
    /// Seek each axis to its `default_position_percent` at boot, when a
    /// valid calibration is present.
    #[serde(default)]
    pub restore_position: bool,
}

/// Analog feedback wiring and sampling limits for one axis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensorConfig {
    /// ADC channel the axis potentiometer is wired to.
    pub channel: u8,
    /// Hard per-sample deadline [ms]; a stalled bus must not stall a tick.
    #[serde(default = "default_sample_timeout_ms")]
    pub sample_timeout_ms: u64,
    /// Largest credible voltage jump between consecutive samples, as a
    /// percentage of the calibrated span. Bigger jumps are treated as
    /// sensor noise and served from the last good reading.
    #[serde(default = "default_max_drift_percent")]
    pub max_drift_percent: f64,
}

fn default_sample_timeout_ms() -> u64 {
    50
}
fn default_max_drift_percent() -> f64 {
    10.0
}

/// Actuator wiring, selected at configuration time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum DriveConfig {
    /// Direct position actuator: hobby servo on a PWM channel.
    Servo {
        /// Hardware PWM channel.
        pwm_channel: u8,
        /// Pulse width at 0 % [µs].
        #[serde(default = "default_min_pulse_us")]
        min_pulse_us: u64,
        /// Pulse width at 100 % [µs].
        #[serde(default = "default_max_pulse_us")]
        max_pulse_us: u64,
        /// PWM period [ms] (20 ms = 50 Hz).
        #[serde(default = "default_period_ms")]
        period_ms: u64,
    },
    /// Velocity actuator: brushed DC motor behind an H-bridge.
    Motor {
        /// Direction input 1 (forward high).
        forward_pin: u8,
        /// Direction input 2 (reverse high).
        reverse_pin: u8,
        /// Speed PWM pin.
        pwm_pin: u8,
        /// Optional driver standby/enable pin, may be shared across axes.
        #[serde(default)]
        standby_pin: Option<u8>,
        /// PWM carrier frequency [Hz].
        #[serde(default = "default_pwm_frequency")]
        pwm_frequency_hz: f64,
    },
}

fn default_min_pulse_us() -> u64 {
    1200
}
fn default_max_pulse_us() -> u64 {
    1800
}
fn default_period_ms() -> u64 {
    20
}
fn default_pwm_frequency() -> f64 {
    1000.0
}

/// Control-loop tuning for one axis.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ControlConfig {
    /// Control tick rate [Hz].
    #[serde(default = "default_tick_hz")]
    pub tick_hz: f64,
    /// Default convergence window [%] for targets without an explicit one.
    #[serde(default = "default_tolerance")]
    pub tolerance_percent: f64,
    /// Default seek timeout [s].
    #[serde(default = "default_seek_timeout")]
    pub seek_timeout_s: f64,
    /// Proportional gain: drive speed [%] per position error [%].
    #[serde(default = "default_gain")]
    pub gain_percent_per_error: f64,
    /// Drive speed ceiling [%].
    #[serde(default = "default_max_speed")]
    pub max_speed_percent: f64,
    /// Drive speed floor [%]; brushed motors stall below a minimum duty.
    #[serde(default = "default_min_speed")]
    pub min_speed_percent: f64,
    /// Consecutive stale samples tolerated while seeking before the axis
    /// faults with `FeedbackLost`.
    #[serde(default = "default_stale_limit")]
    pub stale_sample_limit: u32,
}

fn default_tick_hz() -> f64 {
    10.0
}
fn default_tolerance() -> f64 {
    3.0
}
fn default_seek_timeout() -> f64 {
    30.0
}
fn default_gain() -> f64 {
    2.0
}
fn default_max_speed() -> f64 {
    80.0
}
fn default_min_speed() -> f64 {
    20.0
}
fn default_stale_limit() -> u32 {
    5
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            tick_hz: default_tick_hz(),
            tolerance_percent: default_tolerance(),
            seek_timeout_s: default_seek_timeout(),
            gain_percent_per_error: default_gain(),
            max_speed_percent: default_max_speed(),
            min_speed_percent: default_min_speed(),
            stale_sample_limit: default_stale_limit(),
        }
    }
}

/// Calibration tuning for one axis.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CalibrationConfig {
    /// Drive speed while traveling to an extreme [%] (velocity actuators).
    #[serde(default = "default_cal_speed")]
    pub drive_speed_percent: f64,
    /// Sliding-window length used for the settle check [samples].
    #[serde(default = "default_settle_samples")]
    pub settle_samples: usize,
    /// Variance threshold below which the window counts as settled [V²].
    #[serde(default = "default_settle_variance")]
    pub settle_variance: f64,
    /// Per-extreme settle timeout [s].
    #[serde(default = "default_settle_timeout")]
    pub settle_timeout_s: f64,
    /// Minimum voltage separation between the extremes [V].
    #[serde(default = "default_min_separation")]
    pub min_separation_v: f64,
}

fn default_cal_speed() -> f64 {
    40.0
}
fn default_settle_samples() -> usize {
    8
}
fn default_settle_variance() -> f64 {
    0.0004
}
fn default_settle_timeout() -> f64 {
    20.0
}
fn default_min_separation() -> f64 {
    0.5
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            drive_speed_percent: default_cal_speed(),
            settle_samples: default_settle_samples(),
            settle_variance: default_settle_variance(),
            settle_timeout_s: default_settle_timeout(),
            min_separation_v: default_min_separation(),
        }
    }
}

/// Full configuration of one axis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AxisConfig {
    /// Axis name, used in topics and log lines (e.g. "x", "y").
    pub name: String,
    pub sensor: SensorConfig,
    pub drive: DriveConfig,
    #[serde(default)]
    pub control: ControlConfig,
    #[serde(default)]
    pub calibration: CalibrationConfig,
    /// Position to restore at boot when `[startup] restore_position` is on.
    #[serde(default = "default_position")]
    pub default_position_percent: f64,
    /// Factory calibration, used until the first persisted calibration
    /// exists. Must satisfy the mapping invariant if present.
    #[serde(default)]
    pub factory_calibration: Option<CalibrationMapping>,
}

fn default_position() -> f64 {
    50.0
}

/// Top-level configuration document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PivotConfig {
    pub shared: SharedConfig,
    #[serde(default)]
    pub hub: HubConfig,
    #[serde(default)]
    pub startup: StartupConfig,
    #[serde(rename = "axis")]
    pub axes: Vec<AxisConfig>,
}

impl PivotConfig {
    /// Semantic validation beyond what serde can express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.axes.is_empty() {
            return Err(ConfigError::ValidationError(
                "at least one [[axis]] table is required".into(),
            ));
        }
        if self.axes.len() > MAX_AXES {
            return Err(ConfigError::ValidationError(format!(
                "{} axes configured, maximum is {MAX_AXES}",
                self.axes.len()
            )));
        }
        for (i, axis) in self.axes.iter().enumerate() {
            if axis.name.is_empty() {
                return Err(ConfigError::ValidationError(format!(
                    "axis {i} has an empty name"
                )));
            }
            if self.axes[..i].iter().any(|a| a.name == axis.name) {
                return Err(ConfigError::ValidationError(format!(
                    "duplicate axis name '{}'",
                    axis.name
                )));
            }
            if self.axes[..i]
                .iter()
                .any(|a| a.sensor.channel == axis.sensor.channel)
            {
                return Err(ConfigError::ValidationError(format!(
                    "axis '{}' reuses ADC channel {}",
                    axis.name, axis.sensor.channel
                )));
            }
            let ctl = &axis.control;
            if ctl.tick_hz <= 0.0 {
                return Err(ConfigError::ValidationError(format!(
                    "axis '{}': tick_hz must be positive",
                    axis.name
                )));
            }
            if ctl.tolerance_percent <= 0.0 {
                return Err(ConfigError::ValidationError(format!(
                    "axis '{}': tolerance_percent must be positive",
                    axis.name
                )));
            }
            if ctl.min_speed_percent > ctl.max_speed_percent {
                return Err(ConfigError::ValidationError(format!(
                    "axis '{}': min_speed_percent exceeds max_speed_percent",
                    axis.name
                )));
            }
            if !(0.0..=100.0).contains(&ctl.max_speed_percent) {
                return Err(ConfigError::ValidationError(format!(
                    "axis '{}': max_speed_percent outside [0, 100]",
                    axis.name
                )));
            }
            let cal = &axis.calibration;
            if cal.settle_samples < 2 || cal.settle_samples > 32 {
                return Err(ConfigError::ValidationError(format!(
                    "axis '{}': settle_samples must be within 2..=32",
                    axis.name
                )));
            }
            if cal.min_separation_v <= 0.0 {
                return Err(ConfigError::ValidationError(format!(
                    "axis '{}': min_separation_v must be positive",
                    axis.name
                )));
            }
            if let DriveConfig::Servo {
                min_pulse_us,
                max_pulse_us,
                ..
            } = axis.drive
                && min_pulse_us >= max_pulse_us
            {
                return Err(ConfigError::ValidationError(format!(
                    "axis '{}': min_pulse_us must be below max_pulse_us",
                    axis.name
                )));
            }
            if let Some(factory) = &axis.factory_calibration
                && !factory.is_valid()
            {
                return Err(ConfigError::ValidationError(format!(
                    "axis '{}': factory_calibration is not a valid mapping",
                    axis.name
                )));
            }
        }
        if self.hub.publish_interval_s <= 0.0 {
            return Err(ConfigError::ValidationError(
                "hub.publish_interval_s must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Load and validate a configuration file.
pub fn load_config(path: &Path) -> Result<PivotConfig, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|_| ConfigError::FileNotFound)?;
    let config: PivotConfig =
        toml::from_str(&text).map_err(|e| ConfigError::ParseError(e.to_string()))?;
    config.validate()?;
    Ok(config)
}

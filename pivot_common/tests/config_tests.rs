//! Configuration loading tests against real TOML files on disk.

use std::io::Write;

use pivot_common::config::{ConfigError, DriveConfig, LogLevel, load_config};
use tempfile::NamedTempFile;

fn write_config(text: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("create temp file");
    file.write_all(text.as_bytes()).expect("write config");
    file
}

#[test]
fn loads_full_two_axis_config() {
    let file = write_config(
        r#"
[shared]
log_level = "debug"
service_name = "pivotd-test"

[hub]
topic_prefix = "livingroom/tvarm"
publish_interval_s = 2.0

[startup]
restore_position = true

[[axis]]
name = "x"
default_position_percent = 40.0

[axis.sensor]
channel = 0
sample_timeout_ms = 40

[axis.drive]
type = "motor"
forward_pin = 17
reverse_pin = 27
pwm_pin = 22
standby_pin = 23

[axis.control]
tick_hz = 20.0
tolerance_percent = 2.0

[axis.calibration]
drive_speed_percent = 30.0

[[axis]]
name = "y"

[axis.sensor]
channel = 2

[axis.drive]
type = "servo"
pwm_channel = 0
min_pulse_us = 1200
max_pulse_us = 1800

[axis.factory_calibration]
min_voltage = 0.82
max_voltage = 3.02
"#,
    );

    let config = load_config(file.path()).expect("config should load");
    assert_eq!(config.shared.log_level, LogLevel::Debug);
    assert_eq!(config.shared.service_name, "pivotd-test");
    assert_eq!(config.hub.topic_prefix, "livingroom/tvarm");
    assert!(config.startup.restore_position);
    assert_eq!(config.axes.len(), 2);

    let x = &config.axes[0];
    assert_eq!(x.name, "x");
    assert_eq!(x.sensor.sample_timeout_ms, 40);
    assert_eq!(x.control.tick_hz, 20.0);
    assert_eq!(x.control.tolerance_percent, 2.0);
    // Unspecified tuning falls back to defaults.
    assert_eq!(x.control.stale_sample_limit, 5);
    assert_eq!(x.calibration.drive_speed_percent, 30.0);
    assert!(matches!(
        x.drive,
        DriveConfig::Motor {
            standby_pin: Some(23),
            ..
        }
    ));

    let y = &config.axes[1];
    assert!(matches!(y.drive, DriveConfig::Servo { .. }));
    let factory = y.factory_calibration.expect("factory calibration");
    assert_eq!(factory.min_voltage, 0.82);
}

#[test]
fn minimal_config_gets_defaults() {
    let file = write_config(
        r#"
[shared]
service_name = "pivotd"

[[axis]]
name = "x"

[axis.sensor]
channel = 0

[axis.drive]
type = "motor"
forward_pin = 5
reverse_pin = 6
pwm_pin = 12
"#,
    );

    let config = load_config(file.path()).expect("config should load");
    assert_eq!(config.shared.log_level, LogLevel::Info);
    assert_eq!(config.hub.topic_prefix, "pivot");
    assert_eq!(config.hub.publish_interval_s, 1.0);
    assert!(!config.startup.restore_position);
    assert_eq!(config.axes[0].control.tick_hz, 10.0);
    assert_eq!(config.axes[0].default_position_percent, 50.0);
}

#[test]
fn missing_file_is_reported() {
    let err = load_config(std::path::Path::new("/nonexistent/pivot.toml")).unwrap_err();
    assert!(matches!(err, ConfigError::FileNotFound));
}

#[test]
fn malformed_toml_is_a_parse_error() {
    let file = write_config("this is not toml [");
    let err = load_config(file.path()).unwrap_err();
    assert!(matches!(err, ConfigError::ParseError(_)));
}

#[test]
fn duplicate_axis_names_fail_validation() {
    let file = write_config(
        r#"
[shared]
service_name = "pivotd"

[[axis]]
name = "x"
[axis.sensor]
channel = 0
[axis.drive]
type = "motor"
forward_pin = 5
reverse_pin = 6
pwm_pin = 12

[[axis]]
name = "x"
[axis.sensor]
channel = 1
[axis.drive]
type = "motor"
forward_pin = 20
reverse_pin = 21
pwm_pin = 13
"#,
    );
    let err = load_config(file.path()).unwrap_err();
    assert!(matches!(err, ConfigError::ValidationError(_)));
}

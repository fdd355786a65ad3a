//! State-machine tests over the simulated rig.
//!
//! Ticks are driven manually with explicit physics steps, so every test
//! is deterministic regardless of host load.

use std::sync::Arc;
use std::time::Duration;

use pivot_common::calibration::CalibrationMapping;
use pivot_common::config::{CalibrationConfig, ControlConfig};
use pivot_common::shared::{AxisMeta, SharedState, StateEvent};
use pivot_common::state::{ControlState, ControlTarget, FaultReason};
use pivot_control::AxisController;
use pivot_hal::drive::{AxisDrive, DriveDirection};
use pivot_hal::drivers::simulation::{DriveEvent, SimAxisParams, SimRig};
use pivot_hal::feedback::AnalogFeedback;

const TICK: Duration = Duration::from_millis(100);

fn test_control_cfg() -> ControlConfig {
    ControlConfig {
        tick_hz: 10.0,
        tolerance_percent: 3.0,
        seek_timeout_s: 30.0,
        gain_percent_per_error: 2.0,
        max_speed_percent: 80.0,
        min_speed_percent: 20.0,
        stale_sample_limit: 3,
    }
}

fn shared_for_one_axis() -> Arc<SharedState> {
    Arc::new(SharedState::new(vec![AxisMeta {
        name: "x".into(),
        tolerance_percent: 3.0,
        seek_timeout: Duration::from_secs(30),
    }]))
}

/// Rig + controller wired for a velocity actuator, with the mapping
/// matching the simulated potentiometer so travel fraction == percent.
fn velocity_setup(params: SimAxisParams) -> (SimRig, Arc<SharedState>, AxisController) {
    let rig = SimRig::new(vec![params]);
    rig.set_auto_advance(false);
    let shared = shared_for_one_axis();
    shared
        .load_calibration(
            0,
            CalibrationMapping::new(params.min_voltage, params.max_voltage, 0.1).unwrap(),
        )
        .unwrap();
    let feedback = AnalogFeedback::new(0, Box::new(rig.adc(0)), 100.0);
    let drive = AxisDrive::Velocity(Box::new(rig.velocity_actuator(0)));
    let controller = AxisController::new(
        0,
        test_control_cfg(),
        CalibrationConfig::default(),
        feedback,
        drive,
        shared.clone(),
    );
    (rig, shared, controller)
}

fn drive_commands(log: &[DriveEvent]) -> usize {
    log.iter()
        .filter(|e| matches!(e, DriveEvent::Drive(..) | DriveEvent::SetPosition(_)))
        .count()
}

fn stops(log: &[DriveEvent]) -> usize {
    log.iter().filter(|e| matches!(e, DriveEvent::Stop)).count()
}

#[test]
fn converges_from_zero_to_fifty_percent() {
    let (rig, shared, mut controller) = velocity_setup(SimAxisParams::default());
    rig.set_travel(0, 0.0);
    shared
        .set_target_with(
            0,
            ControlTarget {
                position_percent: 50.0,
                tolerance_percent: 2.0,
                timeout: Duration::from_secs(30),
            },
        )
        .unwrap();

    let mut converged = false;
    for _ in 0..300 {
        controller.tick();
        if shared.state_of(0) == Some(ControlState::Converged) {
            converged = true;
            break;
        }
        rig.step(TICK);
    }
    assert!(converged, "axis never converged; travel = {}", rig.travel(0));
    assert!(
        (rig.travel(0) - 0.5).abs() <= 0.03,
        "travel = {}",
        rig.travel(0)
    );
    // The seek ended with a stop and the motor only ever drove forward.
    let log = rig.drive_log(0);
    assert_eq!(log.last(), Some(&DriveEvent::Stop));
    assert!(log.iter().all(|e| !matches!(
        e,
        DriveEvent::Drive(DriveDirection::Reverse, _)
    )));
}

#[test]
fn target_within_tolerance_converges_without_driving() {
    // Calibrated 0.12..3.20 V; the wiper reads 1.66 V ≈ 50 %.
    let params = SimAxisParams {
        min_voltage: 0.12,
        max_voltage: 3.20,
        ..SimAxisParams::default()
    };
    let (rig, shared, mut controller) = velocity_setup(params);
    shared
        .load_calibration(0, CalibrationMapping::new(0.12, 3.20, 0.1).unwrap())
        .unwrap();
    rig.set_travel(0, 0.5);

    shared
        .set_target_with(
            0,
            ControlTarget {
                position_percent: 50.0,
                tolerance_percent: 3.0,
                timeout: Duration::from_secs(30),
            },
        )
        .unwrap();
    controller.tick();

    assert_eq!(shared.state_of(0), Some(ControlState::Converged));
    let reading = shared.snapshot(0).unwrap().reading.unwrap();
    assert!((reading.position_percent - 50.0).abs() < 0.5);
    assert!(rig.drive_log(0).is_empty(), "no drive traffic expected");
}

#[test]
fn repeated_target_while_converged_is_idempotent() {
    let (rig, shared, mut controller) = velocity_setup(SimAxisParams::default());
    rig.set_travel(0, 0.5);
    shared.set_target(0, 50.0).unwrap();
    controller.tick();
    assert_eq!(shared.state_of(0), Some(ControlState::Converged));
    assert!(rig.drive_log(0).is_empty());

    // Same command again, in immediate succession.
    shared.set_target(0, 50.0).unwrap();
    controller.tick();
    controller.tick();
    assert_eq!(shared.state_of(0), Some(ControlState::Converged));
    assert!(rig.drive_log(0).is_empty(), "no additional drive commands");
}

#[test]
fn new_target_preempts_inflight_seek() {
    let (rig, shared, mut controller) = velocity_setup(SimAxisParams::default());
    rig.set_travel(0, 0.0);
    shared.set_target(0, 90.0).unwrap();
    for _ in 0..5 {
        controller.tick();
        rig.step(TICK);
    }
    assert_eq!(shared.state_of(0), Some(ControlState::Seeking));

    // Preempt with a target behind the current position.
    shared.set_target(0, 0.0).unwrap();
    controller.tick();
    let log = rig.drive_log(0);
    assert!(matches!(
        log.last(),
        Some(DriveEvent::Drive(DriveDirection::Reverse, _))
    ));
}

#[test]
fn feedback_loss_faults_with_exactly_one_stop() {
    let (rig, shared, mut controller) = velocity_setup(SimAxisParams::default());
    rig.set_travel(0, 0.0);
    shared.set_target(0, 80.0).unwrap();

    // A few healthy ticks to get moving.
    for _ in 0..3 {
        controller.tick();
        rig.step(TICK);
    }
    assert_eq!(shared.state_of(0), Some(ControlState::Seeking));

    rig.fail_adc(0, u32::MAX);
    // stale_sample_limit = 3: the fourth stale tick faults.
    for _ in 0..4 {
        controller.tick();
        rig.step(TICK);
    }
    assert_eq!(shared.state_of(0), Some(ControlState::Faulted));
    assert_eq!(
        shared.snapshot(0).unwrap().fault,
        Some(FaultReason::FeedbackLost)
    );
    let log = rig.drive_log(0);
    assert_eq!(stops(&log), 1, "stop must be issued exactly once: {log:?}");

    // A faulted axis issues no further drive commands.
    let before = log.len();
    for _ in 0..5 {
        controller.tick();
    }
    assert_eq!(rig.drive_log(0).len(), before);
}

#[test]
fn seek_timeout_faults_the_axis() {
    let (rig, shared, mut controller) = velocity_setup(SimAxisParams::default());
    rig.set_travel(0, 0.0);
    shared
        .set_target_with(
            0,
            ControlTarget {
                position_percent: 90.0,
                tolerance_percent: 2.0,
                timeout: Duration::ZERO,
            },
        )
        .unwrap();
    controller.tick();

    assert_eq!(shared.state_of(0), Some(ControlState::Faulted));
    assert_eq!(
        shared.snapshot(0).unwrap().fault,
        Some(FaultReason::SeekTimeout)
    );
    assert_eq!(rig.drive_log(0).last(), Some(&DriveEvent::Stop));
}

#[test]
fn drive_failure_faults_immediately_without_retry() {
    let (rig, shared, mut controller) = velocity_setup(SimAxisParams::default());
    rig.set_travel(0, 0.0);
    rig.fail_drive(0, true);
    shared.set_target(0, 80.0).unwrap();
    controller.tick();

    assert_eq!(shared.state_of(0), Some(ControlState::Faulted));
    assert_eq!(
        shared.snapshot(0).unwrap().fault,
        Some(FaultReason::DriveFault)
    );
    // One rejected drive attempt, then only the stop; no retries.
    let log = rig.drive_log(0);
    assert_eq!(drive_commands(&log), 1);

    controller.tick();
    controller.tick();
    assert_eq!(drive_commands(&rig.drive_log(0)), 1);
}

#[test]
fn emergency_stop_takes_effect_within_one_tick() {
    let (rig, shared, mut controller) = velocity_setup(SimAxisParams::default());
    let events = shared.subscribe_events();
    rig.set_travel(0, 0.0);
    shared.set_target(0, 90.0).unwrap();
    for _ in 0..3 {
        controller.tick();
        rig.step(TICK);
    }
    while events.try_recv().is_ok() {}

    shared.emergency_stop();
    controller.tick();

    assert_eq!(shared.state_of(0), Some(ControlState::Faulted));
    assert_eq!(
        shared.snapshot(0).unwrap().fault,
        Some(FaultReason::EmergencyStop)
    );
    assert_eq!(rig.drive_log(0).last(), Some(&DriveEvent::Stop));
    // The transition was pushed immediately for the status publisher.
    assert!(matches!(
        events.try_recv(),
        Ok(StateEvent::Transition {
            state: ControlState::Faulted,
            fault: Some(FaultReason::EmergencyStop),
            ..
        })
    ));

    // A new command is the explicit clear.
    shared.set_target(0, 10.0).unwrap();
    controller.tick();
    assert_eq!(shared.state_of(0), Some(ControlState::Seeking));
}

#[test]
fn position_actuator_seeks_by_writing_the_target() {
    let params = SimAxisParams {
        slew_rate: 1.0,
        ..SimAxisParams::default()
    };
    let rig = SimRig::new(vec![params]);
    rig.set_auto_advance(false);
    let shared = shared_for_one_axis();
    shared
        .load_calibration(
            0,
            CalibrationMapping::new(params.min_voltage, params.max_voltage, 0.1).unwrap(),
        )
        .unwrap();
    let feedback = AnalogFeedback::new(0, Box::new(rig.adc(0)), 100.0);
    let drive = AxisDrive::Position(Box::new(rig.position_actuator(0)));
    let mut controller = AxisController::new(
        0,
        test_control_cfg(),
        CalibrationConfig::default(),
        feedback,
        drive,
        shared.clone(),
    );

    rig.set_travel(0, 0.0);
    shared.set_target(0, 75.0).unwrap();
    let mut converged = false;
    for _ in 0..200 {
        controller.tick();
        if shared.state_of(0) == Some(ControlState::Converged) {
            converged = true;
            break;
        }
        rig.step(TICK);
    }
    assert!(converged);
    // All motion commands were direct position writes of the target.
    let log = rig.drive_log(0);
    assert!(drive_commands(&log) > 0);
    assert!(log.iter().all(|e| match e {
        DriveEvent::SetPosition(p) => *p == 75.0,
        DriveEvent::Stop => true,
        DriveEvent::Drive(..) => false,
    }));
}

#[test]
fn calibration_request_runs_and_stores_mapping() {
    // Fast physics with wall-clock advance: calibration sleeps for real.
    let params = SimAxisParams {
        travel_rate: 20.0,
        slew_rate: 20.0,
        min_voltage: 0.8,
        max_voltage: 3.0,
        inverted: false,
    };
    let rig = SimRig::new(vec![params]);
    let shared = shared_for_one_axis();
    let events = shared.subscribe_events();
    let feedback = AnalogFeedback::new(0, Box::new(rig.adc(0)), 100.0);
    let drive = AxisDrive::Velocity(Box::new(rig.velocity_actuator(0)));
    let cfg = ControlConfig {
        tick_hz: 500.0,
        ..test_control_cfg()
    };
    let cal_cfg = CalibrationConfig {
        drive_speed_percent: 100.0,
        settle_samples: 4,
        settle_variance: 1e-9,
        settle_timeout_s: 5.0,
        min_separation_v: 0.5,
    };
    let mut controller = AxisController::new(0, cfg, cal_cfg, feedback, drive, shared.clone());

    shared.request_calibration(0).unwrap();
    controller.tick();

    assert_eq!(shared.state_of(0), Some(ControlState::Idle));
    let mapping = shared.get_calibration(0).expect("mapping stored");
    assert!((mapping.min_voltage - 0.8).abs() < 0.01);
    assert!((mapping.max_voltage - 3.0).abs() < 0.01);
    // Calibrating → Idle transitions plus the stored-calibration event.
    let mut saw_stored = false;
    while let Ok(event) = events.try_recv() {
        if matches!(event, StateEvent::CalibrationStored { axis: 0, .. }) {
            saw_stored = true;
        }
    }
    assert!(saw_stored);
}

#[test]
fn rejected_calibration_keeps_prior_mapping() {
    let params = SimAxisParams {
        travel_rate: 20.0,
        slew_rate: 20.0,
        min_voltage: 0.8,
        max_voltage: 3.0,
        inverted: true,
    };
    let rig = SimRig::new(vec![params]);
    let shared = shared_for_one_axis();
    let prior = CalibrationMapping::new(0.9, 2.8, 0.1).unwrap();
    shared.load_calibration(0, prior).unwrap();

    let feedback = AnalogFeedback::new(0, Box::new(rig.adc(0)), 100.0);
    let drive = AxisDrive::Velocity(Box::new(rig.velocity_actuator(0)));
    let cfg = ControlConfig {
        tick_hz: 500.0,
        ..test_control_cfg()
    };
    let cal_cfg = CalibrationConfig {
        drive_speed_percent: 100.0,
        settle_samples: 4,
        settle_variance: 1e-9,
        settle_timeout_s: 5.0,
        min_separation_v: 0.5,
    };
    let mut controller = AxisController::new(0, cfg, cal_cfg, feedback, drive, shared.clone());

    shared.request_calibration(0).unwrap();
    controller.tick();

    // Inverted wiring: low extreme sampled above the high extreme.
    assert_eq!(shared.state_of(0), Some(ControlState::Idle));
    assert_eq!(shared.get_calibration(0), Some(prior));
}

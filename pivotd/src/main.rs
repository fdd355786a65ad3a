//! # pivotd
//!
//! Two-axis closed-loop positioner daemon. Wires the configuration, the
//! hardware (or simulation) backend, one control loop per axis, the hub
//! bridge and calibration persistence, and keeps `stop` guaranteed on
//! every termination path.
//!
//! ```bash
//! # Run against the simulated rig
//! pivotd --config config/pivot.toml --simulate
//!
//! # Discover and persist the voltage ranges, then exit
//! pivotd --calibrate
//!
//! # Drive the corner/center test pattern
//! pivotd --exercise --simulate
//! ```

mod persist;

use std::error::Error;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use clap::Parser;
use pivot_common::config::{DriveConfig, PivotConfig, load_config};
use pivot_common::error::HalError;
use pivot_common::shared::{SharedState, StateEvent};
use pivot_common::state::{AxisId, ControlState};
use pivot_control::{AxisController, spawn_axis_loops};
use pivot_hal::drive::AxisDrive;
use pivot_hal::drivers::simulation::SimRig;
use pivot_hal::feedback::AnalogFeedback;
use pivot_mqtt::{HubBridge, TopicSet, TraceTransport};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// pivotd — closed-loop two-axis positioner with hub integration
#[derive(Parser, Debug)]
#[command(name = "pivotd")]
#[command(version)]
#[command(about = "Closed-loop actuator positioning with hub integration")]
struct Args {
    /// Path to the configuration file.
    #[arg(short, long, default_value = "config/pivot.toml")]
    config: PathBuf,

    /// Run calibration for every axis, persist the results, and exit.
    #[arg(long)]
    calibrate: bool,

    /// Drive a corner/center test pattern, then exit.
    #[arg(long)]
    exercise: bool,

    /// Force the simulation backend.
    #[arg(short, long)]
    simulate: bool,

    /// Enable verbose logging (DEBUG level).
    #[arg(short, long)]
    verbose: bool,

    /// Output logs in JSON format.
    #[arg(long)]
    json: bool,
}

fn main() {
    let args = Args::parse();
    let config = match load_config(&args.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("failed to load {}: {e}", args.config.display());
            process::exit(1);
        }
    };
    setup_tracing(&args, &config);

    info!(
        "pivotd v{} starting ({}, {} axes)",
        env!("CARGO_PKG_VERSION"),
        config.shared.service_name,
        config.axes.len()
    );

    if let Err(e) = run(&args, config) {
        error!("FATAL: {e}");
        process::exit(1);
    }

    info!("pivotd shutdown complete");
}

fn setup_tracing(args: &Args, config: &PivotConfig) {
    let default_filter = if args.verbose {
        "debug"
    } else {
        config.shared.log_level.as_filter()
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    if args.json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).compact().init();
    }
}

fn run(args: &Args, config: PivotConfig) -> Result<(), Box<dyn Error>> {
    let shared = Arc::new(SharedState::from_config(&config));

    // Restore persisted calibrations before anything can move.
    let cal_path = persist::calibration_path(&args.config);
    let cal_file = persist::load(&cal_path)?;
    persist::restore_into(&shared, &cal_file);

    let rig = build_rig(&config, args.simulate)?;
    let controllers: Vec<AxisController> = rig
        .into_iter()
        .zip(config.axes.iter())
        .enumerate()
        .map(|(i, ((feedback, drive), axis))| {
            AxisController::new(
                i as AxisId,
                axis.control,
                axis.calibration,
                feedback,
                drive,
                shared.clone(),
            )
        })
        .collect();

    if args.calibrate {
        return run_calibration_mode(&shared, controllers, &cal_path);
    }

    let running = Arc::new(AtomicBool::new(true));
    {
        let running = running.clone();
        ctrlc::set_handler(move || {
            info!("shutdown signal received");
            running.store(false, Ordering::SeqCst);
        })?;
    }

    // Subscriptions must exist before the loops start producing events.
    let persist_events = shared.subscribe_events();
    let bridge = HubBridge::new(
        TraceTransport,
        TopicSet::new(&config.hub.topic_prefix),
        shared.clone(),
        Duration::from_secs_f64(config.hub.publish_interval_s),
    );

    let axis_threads = spawn_axis_loops(controllers, &running)?;
    let bridge_thread = {
        let running = running.clone();
        std::thread::Builder::new()
            .name("hub-bridge".into())
            .spawn(move || {
                let mut bridge = bridge;
                bridge.run(&running);
            })?
    };
    let persist_thread =
        spawn_persistence(persist_events, cal_path, shared.clone(), running.clone())?;

    if config.startup.restore_position {
        restore_startup_positions(&shared, &config);
    }

    if args.exercise {
        run_exercise(&shared, &config);
        running.store(false, Ordering::SeqCst);
    }

    for handle in axis_threads {
        match handle.join() {
            Ok(stats) => info!(
                ticks = stats.tick_count,
                overruns = stats.overruns,
                avg_us = stats.avg_tick_ns() / 1_000,
                "axis loop finished"
            ),
            Err(_) => warn!("axis loop panicked"),
        }
    }
    if bridge_thread.join().is_err() {
        warn!("bridge thread panicked");
    }
    if persist_thread.join().is_err() {
        warn!("persistence thread panicked");
    }
    Ok(())
}

// ─── Backend selection ──────────────────────────────────────────────

fn build_sim_rig(config: &PivotConfig) -> Vec<(AnalogFeedback, AxisDrive)> {
    info!(axes = config.axes.len(), "simulation backend");
    let rig = SimRig::with_axes(config.axes.len());
    config
        .axes
        .iter()
        .enumerate()
        .map(|(i, axis)| {
            let id = i as AxisId;
            let feedback =
                AnalogFeedback::new(id, Box::new(rig.adc(id)), axis.sensor.max_drift_percent);
            let drive = match &axis.drive {
                DriveConfig::Servo { .. } => {
                    AxisDrive::Position(Box::new(rig.position_actuator(id)))
                }
                DriveConfig::Motor { .. } => {
                    AxisDrive::Velocity(Box::new(rig.velocity_actuator(id)))
                }
            };
            (feedback, drive)
        })
        .collect()
}

#[cfg(feature = "raspi")]
fn build_rig(
    config: &PivotConfig,
    simulate: bool,
) -> Result<Vec<(AnalogFeedback, AxisDrive)>, HalError> {
    if simulate {
        Ok(build_sim_rig(config))
    } else {
        pivot_hal::drivers::raspi::build_rig(config)
    }
}

#[cfg(not(feature = "raspi"))]
fn build_rig(
    config: &PivotConfig,
    simulate: bool,
) -> Result<Vec<(AnalogFeedback, AxisDrive)>, HalError> {
    if !simulate {
        info!("built without the raspi feature; falling back to simulation");
    }
    Ok(build_sim_rig(config))
}

// ─── Modes ──────────────────────────────────────────────────────────

/// Calibrate every axis in turn, print and persist the results.
fn run_calibration_mode(
    shared: &Arc<SharedState>,
    mut controllers: Vec<AxisController>,
    cal_path: &Path,
) -> Result<(), Box<dyn Error>> {
    info!("calibration mode");
    let events = shared.subscribe_events();
    for controller in &mut controllers {
        let axis = controller.axis();
        let name = shared.axis_name(axis).unwrap_or("axis").to_string();
        println!("calibrating {name}...");
        shared.request_calibration(axis)?;
        controller.tick();

        let mut fresh = None;
        while let Ok(event) = events.try_recv() {
            if let StateEvent::CalibrationStored {
                axis: event_axis,
                mapping,
                ..
            } = event
                && event_axis == axis
            {
                fresh = Some(mapping);
            }
        }
        match fresh {
            Some(mapping) => {
                println!(
                    "{name}: min={:.3} V, max={:.3} V",
                    mapping.min_voltage, mapping.max_voltage
                );
                persist::record(cal_path, &name, mapping)?;
            }
            None => println!("{name}: calibration failed (see log)"),
        }
        controller.shutdown();
    }
    Ok(())
}

/// Seek each axis to its configured default position at boot.
fn restore_startup_positions(shared: &Arc<SharedState>, config: &PivotConfig) {
    for (i, axis) in config.axes.iter().enumerate() {
        match shared.set_target(i as AxisId, axis.default_position_percent) {
            Ok(target) => info!(
                axis = %axis.name,
                percent = target.position_percent,
                "startup position restored"
            ),
            Err(e) => warn!(axis = %axis.name, error = %e, "startup restore skipped"),
        }
    }
}

/// Corner/center test pattern over the first two axes.
fn run_exercise(shared: &Arc<SharedState>, config: &PivotConfig) {
    info!("exercise mode");
    let axes: Vec<AxisId> = (0..config.axes.len().min(2)).map(|i| i as AxisId).collect();
    let waypoints = [
        (0.0, 0.0, "bottom-left"),
        (100.0, 0.0, "bottom-right"),
        (100.0, 100.0, "top-right"),
        (0.0, 100.0, "top-left"),
        (50.0, 50.0, "center"),
    ];

    for (x, y, label) in waypoints {
        println!("moving to {label} ({x}%, {y}%)");
        for (&axis, position) in axes.iter().zip([x, y]) {
            if let Err(e) = shared.set_target(axis, position) {
                warn!(axis, error = %e, "exercise target rejected");
            }
        }
        wait_for_settle(shared, &axes, Duration::from_secs(15));
        for &axis in &axes {
            let Some(snapshot) = shared.snapshot(axis) else {
                continue;
            };
            let name = shared.axis_name(axis).unwrap_or("axis");
            match snapshot.reading {
                Some(reading) => println!(
                    "  {name}: {} at {:.1}%",
                    snapshot.state.as_str(),
                    reading.position_percent
                ),
                None => println!("  {name}: {}", snapshot.state.as_str()),
            }
        }
    }
}

fn wait_for_settle(shared: &Arc<SharedState>, axes: &[AxisId], timeout: Duration) {
    // Give the loops a couple of ticks to pick the targets up.
    std::thread::sleep(Duration::from_millis(300));
    let deadline = Instant::now() + timeout;
    loop {
        let settled = axes.iter().all(|&axis| {
            matches!(
                shared.state_of(axis),
                Some(ControlState::Converged | ControlState::Faulted)
            )
        });
        if settled {
            return;
        }
        if Instant::now() >= deadline {
            warn!("exercise waypoint timed out");
            return;
        }
        std::thread::sleep(Duration::from_millis(100));
    }
}

/// Write freshly discovered calibrations to disk as they appear.
fn spawn_persistence(
    events: Receiver<StateEvent>,
    path: PathBuf,
    shared: Arc<SharedState>,
    running: Arc<AtomicBool>,
) -> std::io::Result<JoinHandle<()>> {
    std::thread::Builder::new()
        .name("calibration-persist".into())
        .spawn(move || {
            while running.load(Ordering::SeqCst) {
                match events.recv_timeout(Duration::from_millis(500)) {
                    Ok(StateEvent::CalibrationStored { axis, mapping, .. }) => {
                        let Some(name) = shared.axis_name(axis).map(str::to_string) else {
                            continue;
                        };
                        match persist::record(&path, &name, mapping) {
                            Ok(()) => info!(axis = %name, "calibration persisted"),
                            Err(e) => {
                                warn!(axis = %name, error = %e, "calibration persist failed")
                            }
                        }
                    }
                    Ok(_) => {}
                    Err(RecvTimeoutError::Timeout) => {}
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }
        })
}

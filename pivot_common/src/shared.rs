//! The single source of truth shared between the control loops and the
//! messaging path.
//!
//! One `RwLock` per axis — writers (controller, calibrator) hold short
//! per-axis critical sections, readers (messaging path) copy a snapshot
//! without blocking writers beyond that. There is no global lock across
//! axes: a stalled or faulted axis never blocks another axis's tick.
//!
//! The emergency-stop latch is a process-wide atomic checked by every
//! control tick, so `emergency_stop()` takes effect within one tick from
//! any thread without touching a lock.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info};

use crate::calibration::CalibrationMapping;
use crate::config::PivotConfig;
use crate::error::{CalibrationError, CommandError};
use crate::state::{
    AxisAlarm, AxisId, ControlState, ControlTarget, FaultReason, PositionReading, now_us,
};

/// Immutable per-axis metadata captured at construction.
#[derive(Debug, Clone)]
pub struct AxisMeta {
    /// Axis name used in topics and log lines.
    pub name: String,
    /// Default convergence window for bare position commands [%].
    pub tolerance_percent: f64,
    /// Default seek timeout for bare position commands.
    pub seek_timeout: Duration,
}

/// Mutable per-axis fields, guarded by one lock per axis.
#[derive(Debug, Default)]
struct AxisShared {
    reading: Option<PositionReading>,
    target: Option<ControlTarget>,
    /// Bumped on every accepted target; the control loop uses it to detect
    /// preemption without comparing payloads.
    target_seq: u64,
    state: ControlState,
    fault: Option<FaultReason>,
    alarms: AxisAlarm,
    calibration: Option<CalibrationMapping>,
    calibration_requested: bool,
}

/// Consistent per-axis copy for the messaging path.
#[derive(Debug, Clone, PartialEq)]
pub struct AxisSnapshot {
    pub axis: AxisId,
    pub state: ControlState,
    pub fault: Option<FaultReason>,
    pub alarms: AxisAlarm,
    pub reading: Option<PositionReading>,
    pub target_percent: Option<f64>,
    pub calibrated: bool,
}

/// Pushed to subscribers on every state transition and stored calibration,
/// independent of the periodic publish cadence.
#[derive(Debug, Clone, PartialEq)]
pub enum StateEvent {
    Transition {
        axis: AxisId,
        state: ControlState,
        fault: Option<FaultReason>,
        timestamp_us: u64,
    },
    CalibrationStored {
        axis: AxisId,
        mapping: CalibrationMapping,
        timestamp_us: u64,
    },
}

/// Shared state for all axes plus the emergency-stop latch.
pub struct SharedState {
    metas: Vec<AxisMeta>,
    axes: Vec<RwLock<AxisShared>>,
    estop: AtomicBool,
    subscribers: Mutex<Vec<Sender<StateEvent>>>,
}

impl SharedState {
    pub fn new(metas: Vec<AxisMeta>) -> Self {
        let axes = metas
            .iter()
            .map(|_| {
                RwLock::new(AxisShared {
                    alarms: AxisAlarm::NOT_CALIBRATED,
                    ..AxisShared::default()
                })
            })
            .collect();
        Self {
            metas,
            axes,
            estop: AtomicBool::new(false),
            subscribers: Mutex::new(Vec::new()),
        }
    }

    /// Build from configuration, seeding factory calibrations when present.
    pub fn from_config(config: &PivotConfig) -> Self {
        let metas = config
            .axes
            .iter()
            .map(|axis| AxisMeta {
                name: axis.name.clone(),
                tolerance_percent: axis.control.tolerance_percent,
                seek_timeout: Duration::from_secs_f64(axis.control.seek_timeout_s),
            })
            .collect();
        let state = Self::new(metas);
        for (i, axis) in config.axes.iter().enumerate() {
            if let Some(factory) = axis.factory_calibration
                && state.load_calibration(i as AxisId, factory).is_ok()
            {
                debug!(axis = %axis.name, "seeded factory calibration");
            }
        }
        state
    }

    pub fn axis_count(&self) -> usize {
        self.metas.len()
    }

    pub fn axis_name(&self, axis: AxisId) -> Option<&str> {
        self.metas.get(axis as usize).map(|m| m.name.as_str())
    }

    /// Resolve an axis id from its configured name.
    pub fn axis_by_name(&self, name: &str) -> Option<AxisId> {
        self.metas
            .iter()
            .position(|m| m.name == name)
            .map(|i| i as AxisId)
    }

    // ─── Inbound command surface ────────────────────────────────────

    /// Submit a position command with the axis's configured tolerance and
    /// timeout. Finite values are clamped into [0, 100].
    ///
    /// Accepting a command is the explicit operator action that releases a
    /// latched fault or emergency stop.
    pub fn set_target(&self, axis: AxisId, percent: f64) -> Result<ControlTarget, CommandError> {
        let meta = self
            .metas
            .get(axis as usize)
            .ok_or(CommandError::UnknownAxis(axis))?;
        if !percent.is_finite() {
            return Err(CommandError::NonFiniteTarget(percent));
        }
        let target = ControlTarget {
            position_percent: percent.clamp(0.0, 100.0),
            tolerance_percent: meta.tolerance_percent,
            timeout: meta.seek_timeout,
        };
        self.set_target_with(axis, target)?;
        Ok(target)
    }

    /// Submit a fully specified position command.
    pub fn set_target_with(&self, axis: AxisId, target: ControlTarget) -> Result<(), CommandError> {
        let cell = self
            .axes
            .get(axis as usize)
            .ok_or(CommandError::UnknownAxis(axis))?;
        if !target.position_percent.is_finite() {
            return Err(CommandError::NonFiniteTarget(target.position_percent));
        }
        let clamped = ControlTarget {
            position_percent: target.position_percent.clamp(0.0, 100.0),
            ..target
        };
        {
            let mut ax = cell.write();
            if ax.state == ControlState::Calibrating {
                return Err(CommandError::CalibrationInProgress(axis));
            }
            if !ax.calibration.is_some_and(|c| c.is_valid()) {
                return Err(CommandError::NotCalibrated(axis));
            }
            ax.target = Some(clamped);
            ax.target_seq += 1;
        }
        self.estop.store(false, Ordering::SeqCst);
        Ok(())
    }

    /// Request a calibration run; picked up by the axis loop at its next
    /// tick. Like `set_target`, this releases a latched emergency stop.
    pub fn request_calibration(&self, axis: AxisId) -> Result<(), CommandError> {
        let cell = self
            .axes
            .get(axis as usize)
            .ok_or(CommandError::UnknownAxis(axis))?;
        {
            let mut ax = cell.write();
            if ax.state == ControlState::Calibrating {
                return Err(CommandError::CalibrationInProgress(axis));
            }
            ax.calibration_requested = true;
        }
        self.estop.store(false, Ordering::SeqCst);
        Ok(())
    }

    /// Latch the emergency stop. Every axis loop observes it within one
    /// tick, stops its drive and faults. Stays latched until the next
    /// accepted command.
    pub fn emergency_stop(&self) {
        info!("emergency stop latched");
        self.estop.store(true, Ordering::SeqCst);
    }

    pub fn estop_engaged(&self) -> bool {
        self.estop.load(Ordering::SeqCst)
    }

    // ─── Calibration persistence boundary ───────────────────────────

    pub fn get_calibration(&self, axis: AxisId) -> Option<CalibrationMapping> {
        self.axes.get(axis as usize).and_then(|c| c.read().calibration)
    }

    /// Restore a persisted mapping. Re-validates the invariant — persisted
    /// files bypass the constructor. Does not emit `CalibrationStored`;
    /// that event marks newly discovered calibrations only.
    pub fn load_calibration(
        &self,
        axis: AxisId,
        mapping: CalibrationMapping,
    ) -> Result<(), CalibrationError> {
        if !mapping.is_valid() {
            return Err(CalibrationError::Invalid {
                min_voltage: mapping.min_voltage,
                max_voltage: mapping.max_voltage,
            });
        }
        if let Some(cell) = self.axes.get(axis as usize) {
            let mut ax = cell.write();
            ax.calibration = Some(mapping);
            ax.alarms.remove(AxisAlarm::NOT_CALIBRATED);
        }
        Ok(())
    }

    // ─── Snapshots & events ─────────────────────────────────────────

    pub fn snapshot(&self, axis: AxisId) -> Option<AxisSnapshot> {
        let ax = self.axes.get(axis as usize)?.read();
        Some(AxisSnapshot {
            axis,
            state: ax.state,
            fault: ax.fault,
            alarms: ax.alarms,
            reading: ax.reading,
            target_percent: ax.target.map(|t| t.position_percent),
            calibrated: ax.calibration.is_some_and(|c| c.is_valid()),
        })
    }

    pub fn snapshot_all(&self) -> Vec<AxisSnapshot> {
        (0..self.axes.len())
            .filter_map(|i| self.snapshot(i as AxisId))
            .collect()
    }

    /// Subscribe to state transitions and stored calibrations. Each call
    /// returns an independent receiver; disconnected receivers are pruned
    /// on the next publish.
    pub fn subscribe_events(&self) -> Receiver<StateEvent> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.lock().push(tx);
        rx
    }

    fn publish(&self, event: StateEvent) {
        let mut subs = self.subscribers.lock();
        subs.retain(|tx| tx.send(event.clone()).is_ok());
    }

    // ─── Control-side writers ───────────────────────────────────────

    /// Store the latest feedback reading; mirrors its staleness into the
    /// alarm flags.
    pub fn store_reading(&self, axis: AxisId, reading: PositionReading) {
        let Some(cell) = self.axes.get(axis as usize) else {
            return;
        };
        let mut ax = cell.write();
        ax.alarms.set(AxisAlarm::STALE_SAMPLE, reading.stale);
        ax.reading = Some(reading);
    }

    /// Transition the axis state, publishing an event when it changed.
    pub fn set_state(&self, axis: AxisId, state: ControlState, fault: Option<FaultReason>) {
        let Some(cell) = self.axes.get(axis as usize) else {
            return;
        };
        let changed = {
            let mut ax = cell.write();
            let changed = ax.state != state || ax.fault != fault;
            ax.state = state;
            ax.fault = fault;
            changed
        };
        if changed {
            self.publish(StateEvent::Transition {
                axis,
                state,
                fault,
                timestamp_us: now_us(),
            });
        }
    }

    pub fn state_of(&self, axis: AxisId) -> Option<ControlState> {
        self.axes.get(axis as usize).map(|c| c.read().state)
    }

    /// Store a freshly discovered calibration and notify subscribers so
    /// the persistence collaborator can write it out.
    pub fn store_calibration(&self, axis: AxisId, mapping: CalibrationMapping) {
        let Some(cell) = self.axes.get(axis as usize) else {
            return;
        };
        {
            let mut ax = cell.write();
            ax.calibration = Some(mapping);
            ax.alarms.remove(AxisAlarm::NOT_CALIBRATED);
        }
        self.publish(StateEvent::CalibrationStored {
            axis,
            mapping,
            timestamp_us: now_us(),
        });
    }

    /// Consume a pending calibration request.
    pub fn take_calibration_request(&self, axis: AxisId) -> bool {
        self.axes
            .get(axis as usize)
            .map(|cell| {
                let mut ax = cell.write();
                std::mem::take(&mut ax.calibration_requested)
            })
            .unwrap_or(false)
    }

    /// Latest accepted target with its sequence number.
    pub fn current_target(&self, axis: AxisId) -> Option<(u64, ControlTarget)> {
        let ax = self.axes.get(axis as usize)?.read();
        ax.target.map(|t| (ax.target_seq, t))
    }

    pub fn set_alarm(&self, axis: AxisId, alarm: AxisAlarm, engaged: bool) {
        if let Some(cell) = self.axes.get(axis as usize) {
            cell.write().alarms.set(alarm, engaged);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_axis_state() -> SharedState {
        SharedState::new(vec![
            AxisMeta {
                name: "x".into(),
                tolerance_percent: 3.0,
                seek_timeout: Duration::from_secs(30),
            },
            AxisMeta {
                name: "y".into(),
                tolerance_percent: 3.0,
                seek_timeout: Duration::from_secs(30),
            },
        ])
    }

    fn cal() -> CalibrationMapping {
        CalibrationMapping::new(0.5, 3.0, 0.1).unwrap()
    }

    #[test]
    fn uncalibrated_axis_rejects_targets() {
        let shared = two_axis_state();
        assert_eq!(
            shared.set_target(0, 50.0),
            Err(CommandError::NotCalibrated(0))
        );
        shared.load_calibration(0, cal()).unwrap();
        assert!(shared.set_target(0, 50.0).is_ok());
        // Axis 1 is still uncalibrated.
        assert_eq!(
            shared.set_target(1, 50.0),
            Err(CommandError::NotCalibrated(1))
        );
    }

    #[test]
    fn targets_are_clamped_and_sequenced() {
        let shared = two_axis_state();
        shared.load_calibration(0, cal()).unwrap();
        let t = shared.set_target(0, 130.0).unwrap();
        assert_eq!(t.position_percent, 100.0);
        let (seq1, _) = shared.current_target(0).unwrap();
        shared.set_target(0, -10.0).unwrap();
        let (seq2, stored) = shared.current_target(0).unwrap();
        assert_eq!(stored.position_percent, 0.0);
        assert_eq!(seq2, seq1 + 1);
    }

    #[test]
    fn non_finite_target_rejected() {
        let shared = two_axis_state();
        shared.load_calibration(0, cal()).unwrap();
        assert!(matches!(
            shared.set_target(0, f64::NAN),
            Err(CommandError::NonFiniteTarget(_))
        ));
    }

    #[test]
    fn calibrating_axis_rejects_targets() {
        let shared = two_axis_state();
        shared.load_calibration(0, cal()).unwrap();
        shared.set_state(0, ControlState::Calibrating, None);
        assert_eq!(
            shared.set_target(0, 50.0),
            Err(CommandError::CalibrationInProgress(0))
        );
    }

    #[test]
    fn estop_latches_until_next_command() {
        let shared = two_axis_state();
        shared.load_calibration(0, cal()).unwrap();
        shared.emergency_stop();
        assert!(shared.estop_engaged());
        shared.set_target(0, 25.0).unwrap();
        assert!(!shared.estop_engaged());

        shared.emergency_stop();
        shared.request_calibration(1).unwrap();
        assert!(!shared.estop_engaged());
    }

    #[test]
    fn transitions_are_pushed_to_subscribers() {
        let shared = two_axis_state();
        let events = shared.subscribe_events();
        shared.set_state(0, ControlState::Seeking, None);
        shared.set_state(0, ControlState::Seeking, None); // no change, no event
        shared.set_state(0, ControlState::Faulted, Some(FaultReason::SeekTimeout));

        let first = events.try_recv().unwrap();
        assert!(matches!(
            first,
            StateEvent::Transition {
                axis: 0,
                state: ControlState::Seeking,
                fault: None,
                ..
            }
        ));
        let second = events.try_recv().unwrap();
        assert!(matches!(
            second,
            StateEvent::Transition {
                axis: 0,
                state: ControlState::Faulted,
                fault: Some(FaultReason::SeekTimeout),
                ..
            }
        ));
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn stored_calibration_emits_event_but_loaded_does_not() {
        let shared = two_axis_state();
        let events = shared.subscribe_events();
        shared.load_calibration(0, cal()).unwrap();
        assert!(events.try_recv().is_err());

        shared.store_calibration(1, cal());
        assert!(matches!(
            events.try_recv().unwrap(),
            StateEvent::CalibrationStored { axis: 1, .. }
        ));
    }

    #[test]
    fn load_calibration_revalidates() {
        let shared = two_axis_state();
        let bogus = CalibrationMapping {
            min_voltage: 3.0,
            max_voltage: 0.5,
        };
        assert!(shared.load_calibration(0, bogus).is_err());
        assert!(shared.get_calibration(0).is_none());
    }

    #[test]
    fn snapshot_reflects_axis_fields() {
        let shared = two_axis_state();
        shared.load_calibration(0, cal()).unwrap();
        shared.set_target(0, 40.0).unwrap();
        shared.store_reading(
            0,
            PositionReading {
                axis: 0,
                voltage: 1.75,
                position_percent: 50.0,
                stale: false,
                timestamp_us: now_us(),
            },
        );
        shared.set_state(0, ControlState::Seeking, None);

        let snap = shared.snapshot(0).unwrap();
        assert_eq!(snap.state, ControlState::Seeking);
        assert_eq!(snap.target_percent, Some(40.0));
        assert!(snap.calibrated);
        assert_eq!(snap.reading.unwrap().position_percent, 50.0);
        assert!(!snap.alarms.contains(AxisAlarm::NOT_CALIBRATED));

        let snap_y = shared.snapshot(1).unwrap();
        assert!(!snap_y.calibrated);
        assert!(snap_y.alarms.contains(AxisAlarm::NOT_CALIBRATED));
    }

    #[test]
    fn calibration_request_is_consumed_once() {
        let shared = two_axis_state();
        shared.request_calibration(0).unwrap();
        assert!(shared.take_calibration_request(0));
        assert!(!shared.take_calibration_request(0));
    }

    #[test]
    fn axis_lookup_by_name() {
        let shared = two_axis_state();
        assert_eq!(shared.axis_by_name("y"), Some(1));
        assert_eq!(shared.axis_by_name("z"), None);
        assert_eq!(shared.axis_name(0), Some("x"));
    }
}

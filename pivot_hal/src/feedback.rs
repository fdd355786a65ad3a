//! Analog position feedback.
//!
//! [`AdcInput`] is the raw sampling contract; [`AnalogFeedback`] turns raw
//! voltages into calibrated [`PositionReading`]s, caches the last
//! known-good value, and filters implausible jumps the way the original
//! rig filtered erratic potentiometer wipers.

use pivot_common::calibration::CalibrationMapping;
use pivot_common::error::HalError;
use pivot_common::state::{AxisId, PositionReading, now_us};
use tracing::{debug, trace};

/// Consecutive implausible-jump rejections tolerated before the filter
/// re-baselines on the next live sample. Without this, a wiper that
/// genuinely jumped (e.g. after a brown-out) would be filtered forever.
const DRIFT_RESET_LIMIT: u32 = 3;

/// One ADC channel.
///
/// `read_voltage` must return within the configured per-call deadline —
/// a stalled bus becomes an error here, never a blocked control tick.
/// No retries inside implementations; the caller decides.
pub trait AdcInput: Send {
    fn read_voltage(&mut self) -> Result<f64, HalError>;

    /// Channel number, for diagnostics.
    fn channel(&self) -> u8;
}

/// Calibrated feedback for one axis.
pub struct AnalogFeedback {
    axis: AxisId,
    input: Box<dyn AdcInput>,
    /// Largest credible voltage jump between consecutive samples, as a
    /// percentage of the calibrated span.
    max_drift_percent: f64,
    last_good: Option<(f64, u64)>,
    rejected_run: u32,
}

impl AnalogFeedback {
    pub fn new(axis: AxisId, input: Box<dyn AdcInput>, max_drift_percent: f64) -> Self {
        Self {
            axis,
            input,
            max_drift_percent,
            last_good: None,
            rejected_run: 0,
        }
    }

    /// Raw voltage for calibration, before any mapping exists.
    ///
    /// No drift filtering and no stale fallback — the calibrator wants to
    /// see exactly what the wiper reports, and handles failures itself.
    pub fn sample_raw(&mut self) -> Result<f64, HalError> {
        self.input.read_voltage()
    }

    /// Acquire one calibrated reading.
    ///
    /// On a failed or implausible sample the last known-good voltage is
    /// served tagged `stale = true` instead of blocking or guessing. Only
    /// when no good sample has ever been seen does the error propagate.
    pub fn acquire(&mut self, cal: &CalibrationMapping) -> Result<PositionReading, HalError> {
        match self.input.read_voltage() {
            Ok(voltage) if self.credible(voltage, cal) => {
                self.rejected_run = 0;
                let timestamp_us = now_us();
                self.last_good = Some((voltage, timestamp_us));
                trace!(axis = self.axis, voltage, "live sample");
                Ok(self.reading(voltage, false, timestamp_us, cal))
            }
            Ok(voltage) => {
                self.rejected_run += 1;
                debug!(
                    axis = self.axis,
                    voltage,
                    run = self.rejected_run,
                    "implausible jump rejected"
                );
                self.stale_or(
                    HalError::SensorUnavailable {
                        channel: self.input.channel(),
                        detail: format!("implausible jump to {voltage:.3} V"),
                    },
                    cal,
                )
            }
            Err(e) => {
                self.rejected_run += 1;
                debug!(axis = self.axis, error = %e, "sample failed");
                self.stale_or(e, cal)
            }
        }
    }

    fn credible(&self, voltage: f64, cal: &CalibrationMapping) -> bool {
        if !voltage.is_finite() {
            return false;
        }
        let Some((prev, _)) = self.last_good else {
            return true;
        };
        if self.rejected_run >= DRIFT_RESET_LIMIT {
            // Re-baseline: the "jump" has persisted long enough to be real.
            return true;
        }
        let drift_percent = (voltage - prev).abs() / cal.span() * 100.0;
        drift_percent <= self.max_drift_percent
    }

    fn stale_or(
        &mut self,
        err: HalError,
        cal: &CalibrationMapping,
    ) -> Result<PositionReading, HalError> {
        match self.last_good {
            Some((voltage, timestamp_us)) => Ok(self.reading(voltage, true, timestamp_us, cal)),
            None => Err(err),
        }
    }

    fn reading(
        &self,
        voltage: f64,
        stale: bool,
        timestamp_us: u64,
        cal: &CalibrationMapping,
    ) -> PositionReading {
        PositionReading {
            axis: self.axis,
            voltage,
            position_percent: cal.position_percent(voltage),
            stale,
            timestamp_us,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    /// ADC double that plays back a script of results.
    struct ScriptedAdc {
        script: VecDeque<Result<f64, HalError>>,
    }

    impl ScriptedAdc {
        fn new(script: Vec<Result<f64, HalError>>) -> Box<Self> {
            Box::new(Self {
                script: script.into(),
            })
        }
    }

    impl AdcInput for ScriptedAdc {
        fn read_voltage(&mut self) -> Result<f64, HalError> {
            self.script.pop_front().unwrap_or(Err(HalError::SensorUnavailable {
                channel: 7,
                detail: "script exhausted".into(),
            }))
        }

        fn channel(&self) -> u8 {
            7
        }
    }

    fn cal() -> CalibrationMapping {
        CalibrationMapping::new(0.0, 4.0, 0.5).unwrap()
    }

    fn sensor_err() -> Result<f64, HalError> {
        Err(HalError::SensorUnavailable {
            channel: 7,
            detail: "conversion timeout".into(),
        })
    }

    #[test]
    fn live_sample_is_fresh_and_converted() {
        let mut fb = AnalogFeedback::new(0, ScriptedAdc::new(vec![Ok(2.0)]), 10.0);
        let reading = fb.acquire(&cal()).unwrap();
        assert!(!reading.stale);
        assert_eq!(reading.voltage, 2.0);
        assert_eq!(reading.position_percent, 50.0);
    }

    #[test]
    fn failed_sample_serves_last_good_as_stale() {
        let mut fb = AnalogFeedback::new(0, ScriptedAdc::new(vec![Ok(1.0), sensor_err()]), 10.0);
        let first = fb.acquire(&cal()).unwrap();
        assert!(!first.stale);
        let second = fb.acquire(&cal()).unwrap();
        assert!(second.stale);
        assert_eq!(second.voltage, 1.0);
        assert_eq!(second.timestamp_us, first.timestamp_us);
    }

    #[test]
    fn failure_without_baseline_propagates() {
        let mut fb = AnalogFeedback::new(0, ScriptedAdc::new(vec![sensor_err()]), 10.0);
        let err = fb.acquire(&cal()).unwrap_err();
        assert!(matches!(err, HalError::SensorUnavailable { channel: 7, .. }));
    }

    #[test]
    fn implausible_jump_is_filtered_then_rebaselined() {
        // 1.0 V → 3.5 V is a 62.5 % jump over a 4 V span; limit is 10 %.
        let mut fb = AnalogFeedback::new(
            0,
            ScriptedAdc::new(vec![Ok(1.0), Ok(3.5), Ok(3.5), Ok(3.5), Ok(3.5)]),
            10.0,
        );
        assert!(!fb.acquire(&cal()).unwrap().stale);
        for _ in 0..DRIFT_RESET_LIMIT {
            let reading = fb.acquire(&cal()).unwrap();
            assert!(reading.stale);
            assert_eq!(reading.voltage, 1.0);
        }
        // The jump persisted: accept it as the new baseline.
        let reading = fb.acquire(&cal()).unwrap();
        assert!(!reading.stale);
        assert_eq!(reading.voltage, 3.5);
    }

    #[test]
    fn small_drift_passes_the_filter() {
        let mut fb = AnalogFeedback::new(0, ScriptedAdc::new(vec![Ok(2.0), Ok(2.2)]), 10.0);
        assert!(!fb.acquire(&cal()).unwrap().stale);
        let reading = fb.acquire(&cal()).unwrap();
        assert!(!reading.stale);
        assert_eq!(reading.voltage, 2.2);
    }

    #[test]
    fn raw_sampling_bypasses_filter_and_cache() {
        let mut fb = AnalogFeedback::new(0, ScriptedAdc::new(vec![Ok(0.1), sensor_err()]), 10.0);
        assert_eq!(fb.sample_raw().unwrap(), 0.1);
        assert!(fb.sample_raw().is_err());
    }
}

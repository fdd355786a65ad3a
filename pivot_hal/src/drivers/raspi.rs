//! Raspberry Pi backend: GPIO direction pins, PWM outputs and an ADS1115
//! ADC on the I2C bus. Compiled only with the `raspi` feature.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use pivot_common::config::{AxisConfig, DriveConfig, PivotConfig};
use pivot_common::error::HalError;
use pivot_common::state::AxisId;
use rppal::gpio::{Gpio, OutputPin};
use rppal::i2c::I2c;
use rppal::pwm::{Channel, Polarity, Pwm};
use tracing::info;

use crate::drive::{AxisDrive, DigitalOutput, HBridgeMotor, PwmOutput, PwmServo};
use crate::feedback::{AdcInput, AnalogFeedback};

/// Default ADS1115 bus address (ADDR pin to ground).
pub const ADS1115_ADDR: u16 = 0x48;

const REG_CONVERSION: u8 = 0x00;
const REG_CONFIG: u8 = 0x01;
/// Full-scale voltage for the ±4.096 V PGA setting.
const FULL_SCALE_V: f64 = 4.096;

fn gpio_err(detail: impl std::fmt::Display, axis: AxisId) -> HalError {
    HalError::DriveUnavailable {
        axis,
        detail: detail.to_string(),
    }
}

// ─── Digital outputs ────────────────────────────────────────────────

/// One GPIO pin driven as an output.
pub struct RpiPin {
    pin: OutputPin,
}

impl RpiPin {
    pub fn new(gpio: &Gpio, bcm_pin: u8, axis: AxisId) -> Result<Self, HalError> {
        let pin = gpio
            .get(bcm_pin)
            .map_err(|e| gpio_err(format!("GPIO {bcm_pin}: {e}"), axis))?
            .into_output();
        Ok(Self { pin })
    }
}

impl DigitalOutput for RpiPin {
    fn write(&mut self, high: bool) -> Result<(), HalError> {
        if high {
            self.pin.set_high();
        } else {
            self.pin.set_low();
        }
        Ok(())
    }
}

// ─── PWM outputs ────────────────────────────────────────────────────

/// Hardware PWM channel (servo signal quality).
pub struct RpiHardwarePwm {
    axis: AxisId,
    pwm: Pwm,
}

impl RpiHardwarePwm {
    pub fn new(axis: AxisId, channel: u8, period_ms: u64) -> Result<Self, HalError> {
        let channel = match channel {
            0 => Channel::Pwm0,
            1 => Channel::Pwm1,
            other => {
                return Err(gpio_err(format!("no hardware PWM channel {other}"), axis));
            }
        };
        let pwm = Pwm::with_period(
            channel,
            Duration::from_millis(period_ms),
            Duration::ZERO,
            Polarity::Normal,
            true,
        )
        .map_err(|e| gpio_err(e, axis))?;
        Ok(Self { axis, pwm })
    }
}

impl PwmOutput for RpiHardwarePwm {
    fn set_pulse_width_us(&mut self, width_us: u64) -> Result<(), HalError> {
        self.pwm
            .set_pulse_width(Duration::from_micros(width_us))
            .map_err(|e| gpio_err(e, self.axis))
    }

    fn set_duty_percent(&mut self, percent: f64) -> Result<(), HalError> {
        self.pwm
            .set_duty_cycle(percent.clamp(0.0, 100.0) / 100.0)
            .map_err(|e| gpio_err(e, self.axis))
    }
}

/// Software PWM on an ordinary GPIO pin (H-bridge speed input; motor
/// drivers tolerate the software-PWM jitter that servos do not).
pub struct RpiSoftPwm {
    axis: AxisId,
    pin: OutputPin,
    frequency_hz: f64,
}

impl RpiSoftPwm {
    pub fn new(gpio: &Gpio, bcm_pin: u8, frequency_hz: f64, axis: AxisId) -> Result<Self, HalError> {
        let pin = gpio
            .get(bcm_pin)
            .map_err(|e| gpio_err(format!("GPIO {bcm_pin}: {e}"), axis))?
            .into_output();
        Ok(Self {
            axis,
            pin,
            frequency_hz,
        })
    }
}

impl PwmOutput for RpiSoftPwm {
    fn set_pulse_width_us(&mut self, width_us: u64) -> Result<(), HalError> {
        let period = Duration::from_secs_f64(1.0 / self.frequency_hz);
        self.pin
            .set_pwm(period, Duration::from_micros(width_us))
            .map_err(|e| gpio_err(e, self.axis))
    }

    fn set_duty_percent(&mut self, percent: f64) -> Result<(), HalError> {
        self.pin
            .set_pwm_frequency(self.frequency_hz, percent.clamp(0.0, 100.0) / 100.0)
            .map_err(|e| gpio_err(e, self.axis))
    }
}

// ─── ADS1115 ────────────────────────────────────────────────────────

/// ADS1115 over I2C, single-shot conversions at 128 SPS with the PGA at
/// ±4.096 V. The bus is shared by all axis channels behind one mutex.
pub struct Ads1115 {
    i2c: I2c,
    /// Hard per-conversion deadline.
    timeout: Duration,
}

impl Ads1115 {
    pub fn new(address: u16, timeout: Duration) -> Result<Self, HalError> {
        let mut i2c = I2c::new().map_err(|e| sensor_err(0, e))?;
        i2c.set_slave_address(address)
            .map_err(|e| sensor_err(0, e))?;
        info!(address, "ADS1115 initialized");
        Ok(Self { i2c, timeout })
    }

    /// One single-shot conversion on `channel` (0-3, single-ended).
    pub fn read_channel(&mut self, channel: u8) -> Result<f64, HalError> {
        if channel > 3 {
            return Err(HalError::SensorUnavailable {
                channel,
                detail: "ADS1115 has channels 0-3".into(),
            });
        }
        // OS=1 start, MUX=single-ended channel, PGA=±4.096 V, MODE=single,
        // DR=128 SPS, comparator disabled.
        let config: u16 = 0x8000
            | ((0b100 + channel as u16) << 12)
            | (0b001 << 9)
            | (1 << 8)
            | (0b100 << 5)
            | 0b11;
        self.i2c
            .write(&[REG_CONFIG, (config >> 8) as u8, config as u8])
            .map_err(|e| sensor_err(channel, e))?;

        // Poll the OS bit until the conversion completes or the deadline
        // passes; a stalled bus must surface as an error, not a hang.
        let deadline = Instant::now() + self.timeout;
        loop {
            let mut buf = [0u8; 2];
            self.i2c
                .write_read(&[REG_CONFIG], &mut buf)
                .map_err(|e| sensor_err(channel, e))?;
            if buf[0] & 0x80 != 0 {
                break;
            }
            if Instant::now() >= deadline {
                return Err(HalError::SensorUnavailable {
                    channel,
                    detail: format!("conversion timeout after {:?}", self.timeout),
                });
            }
            std::thread::sleep(Duration::from_micros(500));
        }

        let mut buf = [0u8; 2];
        self.i2c
            .write_read(&[REG_CONVERSION], &mut buf)
            .map_err(|e| sensor_err(channel, e))?;
        let raw = i16::from_be_bytes(buf);
        Ok(raw as f64 * FULL_SCALE_V / 32768.0)
    }
}

fn sensor_err(channel: u8, detail: impl std::fmt::Display) -> HalError {
    HalError::SensorUnavailable {
        channel,
        detail: detail.to_string(),
    }
}

/// One ADS1115 input channel, sharing the bus with the other axes.
pub struct Ads1115Channel {
    adc: Arc<Mutex<Ads1115>>,
    channel: u8,
}

impl Ads1115Channel {
    pub fn new(adc: Arc<Mutex<Ads1115>>, channel: u8) -> Self {
        Self { adc, channel }
    }
}

impl AdcInput for Ads1115Channel {
    fn read_voltage(&mut self) -> Result<f64, HalError> {
        self.adc.lock().read_channel(self.channel)
    }

    fn channel(&self) -> u8 {
        self.channel
    }
}

// ─── Rig builder ────────────────────────────────────────────────────

/// Build feedback + drive pairs for every configured axis on real
/// hardware. The ADS1115 deadline uses the tightest configured
/// per-sample timeout.
pub fn build_rig(config: &PivotConfig) -> Result<Vec<(AnalogFeedback, AxisDrive)>, HalError> {
    let gpio = Gpio::new().map_err(|e| gpio_err(e, 0))?;
    let timeout_ms = config
        .axes
        .iter()
        .map(|a| a.sensor.sample_timeout_ms)
        .min()
        .unwrap_or(50);
    let adc = Arc::new(Mutex::new(Ads1115::new(
        ADS1115_ADDR,
        Duration::from_millis(timeout_ms),
    )?));

    config
        .axes
        .iter()
        .enumerate()
        .map(|(i, axis)| build_axis(i as AxisId, axis, &gpio, &adc))
        .collect()
}

fn build_axis(
    axis: AxisId,
    config: &AxisConfig,
    gpio: &Gpio,
    adc: &Arc<Mutex<Ads1115>>,
) -> Result<(AnalogFeedback, AxisDrive), HalError> {
    let input = Box::new(Ads1115Channel::new(adc.clone(), config.sensor.channel));
    let feedback = AnalogFeedback::new(axis, input, config.sensor.max_drift_percent);

    let drive = match &config.drive {
        DriveConfig::Servo {
            pwm_channel,
            min_pulse_us,
            max_pulse_us,
            period_ms,
        } => {
            let pwm = Box::new(RpiHardwarePwm::new(axis, *pwm_channel, *period_ms)?);
            AxisDrive::Position(Box::new(PwmServo::new(
                axis,
                pwm,
                *min_pulse_us,
                *max_pulse_us,
            )))
        }
        DriveConfig::Motor {
            forward_pin,
            reverse_pin,
            pwm_pin,
            standby_pin,
            pwm_frequency_hz,
        } => {
            let forward = Box::new(RpiPin::new(gpio, *forward_pin, axis)?);
            let reverse = Box::new(RpiPin::new(gpio, *reverse_pin, axis)?);
            let pwm = Box::new(RpiSoftPwm::new(gpio, *pwm_pin, *pwm_frequency_hz, axis)?);
            let standby = match standby_pin {
                Some(pin) => Some(Box::new(RpiPin::new(gpio, *pin, axis)?) as Box<dyn DigitalOutput>),
                None => None,
            };
            AxisDrive::Velocity(Box::new(HBridgeMotor::new(
                axis, forward, reverse, pwm, standby,
            )?))
        }
    };

    Ok((feedback, drive))
}

//! PCA9685 PWM controller driving a hobby servo

use embedded_hal::i2c::{Error as _, I2c};
use serde::{Deserialize, Serialize};

use super::{OutputError, Result, ServoOutput};

pub const PCA9685_ADDRESS: u8 = 0x40;

const MODE1: u8 = 0x00;
const PRESCALE: u8 = 0xFE;
const LED0_ON_L: u8 = 0x06;

const MODE1_SLEEP: u8 = 0x10;
const MODE1_AUTO_INCREMENT: u8 = 0x20;

const OSCILLATOR_HZ: u32 = 25_000_000;
const PWM_FREQUENCY_HZ: u32 = 50;
const PWM_STEPS: u32 = 4096;
const PERIOD_US: u32 = 1_000_000 / PWM_FREQUENCY_HZ;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServoSettings {
    pub address: u8,
    pub channel: u8,
    /// Degrees of travel between the two pulse limits
    pub arc_range: u16,
    pub pulse_min_us: u32,
    pub pulse_max_us: u32,
}

impl Default for ServoSettings {
    fn default() -> Self {
        Self {
            address: PCA9685_ADDRESS,
            channel: 0,
            arc_range: 180,
            pulse_min_us: 500,
            pulse_max_us: 2500,
        }
    }
}

impl ServoSettings {
    /// Pulse width for an angle, clamped to the arc
    pub fn pulse_for_angle(&self, angle: i32) -> u32 {
        let arc = u32::from(self.arc_range.max(1));
        let angle = angle.clamp(0, arc as i32) as u32;
        let span = self.pulse_max_us.saturating_sub(self.pulse_min_us);
        self.pulse_min_us + span * angle / arc
    }
}

/// Off-count for a pulse width within one PWM period
pub fn pulse_to_ticks(pulse_us: u32) -> u16 {
    let ticks = pulse_us.min(PERIOD_US) * PWM_STEPS / PERIOD_US;
    ticks.min(PWM_STEPS - 1) as u16
}

pub struct Pca9685Servo<I2C> {
    bus: I2C,
    settings: ServoSettings,
}

impl<I2C: I2c> Pca9685Servo<I2C> {
    pub fn new(bus: I2C, settings: ServoSettings) -> Result<Self> {
        if settings.channel > 15 {
            return Err(OutputError::OutOfRange(format!("PCA9685 channel {}", settings.channel)));
        }
        let mut servo = Self { bus, settings };
        servo.configure()?;
        Ok(servo)
    }

    pub fn release(self) -> I2C {
        self.bus
    }

    fn write(&mut self, bytes: &[u8]) -> Result<()> {
        let address = self.settings.address;
        self.bus
            .write(address, bytes)
            .map_err(|e| OutputError::Bus(format!("PCA9685 0x{:02x}: {:?}", address, e.kind())))
    }

    /// Prescale can only be written while the oscillator sleeps
    fn configure(&mut self) -> Result<()> {
        let prescale = (OSCILLATOR_HZ / (PWM_STEPS * PWM_FREQUENCY_HZ)).saturating_sub(1) as u8;
        self.write(&[MODE1, MODE1_SLEEP])?;
        self.write(&[PRESCALE, prescale])?;
        self.write(&[MODE1, MODE1_AUTO_INCREMENT])?;
        log::debug!("PCA9685 at 0x{:02x} configured, prescale {}", self.settings.address, prescale);
        Ok(())
    }

    pub fn set_pulse(&mut self, pulse_us: u32) -> Result<()> {
        let off = pulse_to_ticks(pulse_us);
        let register = LED0_ON_L + 4 * self.settings.channel;
        let [off_l, off_h] = off.to_le_bytes();
        self.write(&[register, 0, 0, off_l, off_h])
    }
}

impl<I2C: I2c + Send> ServoOutput for Pca9685Servo<I2C> {
    fn set_angle(&mut self, angle: i32) -> Result<()> {
        let pulse = self.settings.pulse_for_angle(angle);
        log::debug!("Servo angle {} -> {}us", angle, pulse);
        self.set_pulse(pulse)
    }
}

use embedded_hal::i2c::{Error as _, I2c};

use super::{Digits, OutputBackend, OutputError, Result, SoundOutput, DIGITS_PER_UNIT};

/// Default address of the display controller board
pub const DISPLAY_ADDRESS: u8 = 0x11;

/// Display controller on an I2C bus; each frame is `[unit, d0..d6]`
pub struct I2cDisplay<I2C> {
    bus: I2C,
    address: u8,
    sound: Option<Box<dyn SoundOutput>>,
}

impl<I2C: I2c> I2cDisplay<I2C> {
    pub fn new(bus: I2C, address: u8) -> Self {
        Self {
            bus,
            address,
            sound: None,
        }
    }

    /// Sound codes go through a separate latch on this hardware
    pub fn with_sound(mut self, sound: Box<dyn SoundOutput>) -> Self {
        self.sound = Some(sound);
        self
    }

    pub fn address(&self) -> u8 {
        self.address
    }

    pub fn release(self) -> I2C {
        self.bus
    }

    pub fn write_unit(&mut self, unit: u8, digits: &Digits) -> Result<()> {
        let mut frame = [0u8; DIGITS_PER_UNIT + 1];
        frame[0] = unit;
        frame[1..].copy_from_slice(digits);
        self.bus
            .write(self.address, &frame)
            .map_err(|e| OutputError::Bus(format!("display 0x{:02x}: {:?}", self.address, e.kind())))
    }
}

impl<I2C: I2c + Send> OutputBackend for I2cDisplay<I2C> {
    fn unit_changed(&mut self, unit: usize, digits: &Digits) -> Result<()> {
        let unit = u8::try_from(unit).map_err(|_| OutputError::OutOfRange(format!("display unit {}", unit)))?;
        self.write_unit(unit, digits)
    }

    fn sound_changed(&mut self, code: u8) -> Result<()> {
        match self.sound.as_mut() {
            Some(sound) => sound.stage(code),
            None => Ok(()),
        }
    }
}

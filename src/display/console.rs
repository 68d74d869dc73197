use super::{digits_to_number, Digits, OutputBackend, Result};

/// Backend for console mode: logs what the hardware would show
#[derive(Debug, Default)]
pub struct ConsoleOutput {
    last_sound: Option<u8>,
}

impl ConsoleOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_sound(&self) -> Option<u8> {
        self.last_sound
    }
}

impl OutputBackend for ConsoleOutput {
    fn unit_changed(&mut self, unit: usize, digits: &Digits) -> Result<()> {
        match digits_to_number(digits) {
            Some(value) => log::info!("Display {}: {} {:?}", unit, value, digits),
            None => log::info!("Display {}: blank", unit),
        }
        Ok(())
    }

    fn sound_changed(&mut self, code: u8) -> Result<()> {
        log::debug!("Sound register: {}", code);
        self.last_sound = Some(code);
        Ok(())
    }
}

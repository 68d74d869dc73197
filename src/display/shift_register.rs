//! Bit-banged display and sound output over three GPIO lines
//!
//! The display boards chain three 8-bit shift registers: digit strobes
//! (inverted), per-unit latch clocks, and a register carrying the sound code
//! in its high nibble and a BCD digit in its low nibble. Every frame scans
//! all digit positions across all units so the multiplexed digits appear lit
//! together. The pin and delay work of a frame is blocking, so the scanning
//! backend owns a dedicated thread and the async side only publishes frames.

use std::thread;
use std::time::Duration;

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::OutputPin;
use tokio::sync::watch;

use super::{
    Digits, DisplayBuffer, OutputBackend, OutputError, Result, SoundOutput, BLANK, DIGITS_PER_UNIT,
    DISPLAY_UNITS, NO_SOUND,
};

const SHIFT_SETTLE_US: u32 = 2;
const LATCH_SETUP_NS: u32 = 25;
const DIGIT_SETUP_US: u32 = 10;
const DIGIT_HOLD_US: u32 = 200;
const SOUND_PRESENT_US: u32 = 20;

/// Data, clock and latch lines of a 74HC595-style chain
pub struct ShiftChain<DATA, CLK, LATCH, D> {
    data: DATA,
    clock: CLK,
    latch: LATCH,
    delay: D,
}

fn pin_err<E: embedded_hal::digital::Error>(e: E) -> OutputError {
    OutputError::Pin(format!("{:?}", e.kind()))
}

impl<DATA, CLK, LATCH, D> ShiftChain<DATA, CLK, LATCH, D>
where
    DATA: OutputPin,
    CLK: OutputPin,
    LATCH: OutputPin,
    D: DelayNs,
{
    pub fn new(data: DATA, clock: CLK, latch: LATCH, delay: D) -> Self {
        Self { data, clock, latch, delay }
    }

    pub fn release(self) -> (DATA, CLK, LATCH, D) {
        (self.data, self.clock, self.latch, self.delay)
    }

    /// Shift one byte out, most significant bit first
    pub fn shift_out(&mut self, value: u8) -> Result<()> {
        for bit in (0..8).rev() {
            self.clock.set_low().map_err(pin_err)?;
            if value & (1 << bit) != 0 {
                self.data.set_high().map_err(pin_err)?;
            } else {
                self.data.set_low().map_err(pin_err)?;
            }
            self.clock.set_high().map_err(pin_err)?;
            self.delay.delay_us(SHIFT_SETTLE_US);
        }
        Ok(())
    }

    fn open_latch(&mut self) -> Result<()> {
        self.clock.set_low().map_err(pin_err)?;
        self.latch.set_low().map_err(pin_err)
    }

    fn close_latch(&mut self) -> Result<()> {
        self.clock.set_low().map_err(pin_err)?;
        self.latch.set_high().map_err(pin_err)
    }
}

/// Everything one multiplex frame draws
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame {
    pub units: [Digits; DISPLAY_UNITS],
    pub sound: u8,
}

impl Frame {
    pub fn new(buffer: &DisplayBuffer, sound: u8) -> Self {
        Self {
            units: *buffer.units(),
            sound,
        }
    }
}

impl Default for Frame {
    fn default() -> Self {
        Self {
            units: [[BLANK; DIGITS_PER_UNIT]; DISPLAY_UNITS],
            sound: NO_SOUND,
        }
    }
}

/// Bit-banged display driver; the sound code rides along in every frame
pub struct ShiftRegisterDisplay<DATA, CLK, LATCH, D> {
    chain: ShiftChain<DATA, CLK, LATCH, D>,
}

impl<DATA, CLK, LATCH, D> ShiftRegisterDisplay<DATA, CLK, LATCH, D>
where
    DATA: OutputPin,
    CLK: OutputPin,
    LATCH: OutputPin,
    D: DelayNs,
{
    pub fn new(chain: ShiftChain<DATA, CLK, LATCH, D>) -> Self {
        Self { chain }
    }

    pub fn release(self) -> ShiftChain<DATA, CLK, LATCH, D> {
        self.chain
    }

    /// Load one unit latch with `data`, then drive the digit strobes.
    /// The strobe bank is inverted by the board.
    fn digit_out(&mut self, strobe: u8, clock: u8, data: u8, sound: u8) -> Result<()> {
        let third = (sound << 4) | (data & 0x0F);
        let strobes = !strobe & 0x7F;

        self.chain.open_latch()?;
        self.chain.shift_out(third)?;
        self.chain.shift_out(0)?;
        // digits off, enable high while the new data latches
        self.chain.shift_out(0x7F)?;
        self.chain.close_latch()?;
        self.chain.delay.delay_ns(LATCH_SETUP_NS);

        self.chain.open_latch()?;
        self.chain.shift_out(third)?;
        self.chain.shift_out(clock)?;
        self.chain.shift_out(strobes)?;
        self.chain.close_latch()?;
        self.chain.delay.delay_us(DIGIT_SETUP_US);
        Ok(())
    }

    /// One full multiplex frame. Blocks for the whole scan.
    pub fn scan(&mut self, frame: &Frame) -> Result<()> {
        let units = &frame.units;
        let sound = frame.sound;
        let last = DISPLAY_UNITS - 1;
        let mut strobe = 0x01u8;

        for digit in 0..DIGITS_PER_UNIT {
            for (unit, digits) in units.iter().enumerate().take(last) {
                self.digit_out(0, 1u8 << unit, digits[digit], sound)?;
            }

            let clock = 1u8 << last;
            let data = units[last][digit];
            self.digit_out(0, clock, data, sound)?;
            self.digit_out(strobe, clock, data, sound)?;
            strobe <<= 1;

            self.chain.delay.delay_us(DIGIT_HOLD_US);
        }
        Ok(())
    }
}

/// Output backend that redraws a [`ShiftRegisterDisplay`] on its own thread.
///
/// Buffer and sound changes are published through a `watch` channel; the
/// scan thread always draws the latest frame and exits once the backend is
/// dropped or shut down.
pub struct ScanningDisplay {
    frame: Frame,
    frames: watch::Sender<Frame>,
    scanner: thread::JoinHandle<()>,
}

impl ScanningDisplay {
    /// Move `display` onto a scan thread that draws a frame, then sleeps `interval`
    pub fn spawn<DATA, CLK, LATCH, D>(
        mut display: ShiftRegisterDisplay<DATA, CLK, LATCH, D>,
        interval: Duration,
    ) -> Result<Self>
    where
        DATA: OutputPin + Send + 'static,
        CLK: OutputPin + Send + 'static,
        LATCH: OutputPin + Send + 'static,
        D: DelayNs + Send + 'static,
    {
        let (frames, mut rx) = watch::channel(Frame::default());
        let scanner = thread::Builder::new()
            .name("display-scan".to_string())
            .spawn(move || {
                log::debug!("Display scan thread started");
                let mut failing = false;
                // Err once the sending side is gone
                while rx.has_changed().is_ok() {
                    let frame = *rx.borrow_and_update();
                    match display.scan(&frame) {
                        Ok(()) if failing => {
                            log::info!("Display scan recovered");
                            failing = false;
                        }
                        Ok(()) => {}
                        Err(e) if !failing => {
                            log::error!("Display scan failed: {}", e);
                            failing = true;
                        }
                        Err(_) => {}
                    }
                    thread::sleep(interval);
                }
                log::debug!("Display scan thread stopped");
            })
            .map_err(OutputError::Spawn)?;

        Ok(Self {
            frame: Frame::default(),
            frames,
            scanner,
        })
    }

    /// Frame the scan thread is drawing
    pub fn frame(&self) -> Frame {
        self.frame
    }

    pub fn is_running(&self) -> bool {
        !self.scanner.is_finished()
    }

    /// Stop the scan thread and wait for its current frame to finish
    pub fn shutdown(self) {
        let Self { frames, scanner, .. } = self;
        drop(frames);
        if scanner.join().is_err() {
            log::error!("Display scan thread panicked");
        }
    }

    fn publish(&self) {
        self.frames.send_replace(self.frame);
    }
}

impl OutputBackend for ScanningDisplay {
    fn unit_changed(&mut self, unit: usize, digits: &Digits) -> Result<()> {
        let slot = self
            .frame
            .units
            .get_mut(unit)
            .ok_or_else(|| OutputError::OutOfRange(format!("display unit {}", unit)))?;
        *slot = *digits;
        self.publish();
        Ok(())
    }

    fn sound_changed(&mut self, code: u8) -> Result<()> {
        self.frame.sound = code;
        self.publish();
        Ok(())
    }
}

/// Standalone sound latch for boards whose displays are not bit-banged
pub struct SoundLatch<DATA, CLK, LATCH, D> {
    chain: ShiftChain<DATA, CLK, LATCH, D>,
}

impl<DATA, CLK, LATCH, D> SoundLatch<DATA, CLK, LATCH, D>
where
    DATA: OutputPin,
    CLK: OutputPin,
    LATCH: OutputPin,
    D: DelayNs,
{
    pub fn new(chain: ShiftChain<DATA, CLK, LATCH, D>) -> Self {
        Self { chain }
    }

    pub fn release(self) -> ShiftChain<DATA, CLK, LATCH, D> {
        self.chain
    }
}

impl<DATA, CLK, LATCH, D> SoundOutput for SoundLatch<DATA, CLK, LATCH, D>
where
    DATA: OutputPin + Send,
    CLK: OutputPin + Send,
    LATCH: OutputPin + Send,
    D: DelayNs + Send,
{
    fn stage(&mut self, code: u8) -> Result<()> {
        log::debug!("Staging sound code {}", code);
        self.chain.latch.set_low().map_err(pin_err)?;
        self.chain.shift_out(code)?;
        self.chain.latch.set_high().map_err(pin_err)?;
        self.chain.clock.set_low().map_err(pin_err)?;
        self.chain.delay.delay_us(SOUND_PRESENT_US);
        Ok(())
    }
}

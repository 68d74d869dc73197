//! Score displays, sound register and servo output
//!
//! The [`DisplayBuffer`] mirrors what every physical display unit shows. It is
//! owned by the [`Multiplexer`] task and only changes through display commands;
//! an [`OutputBackend`] pushes it to hardware.

pub mod console;
pub mod i2c;
pub mod multiplexer;
pub mod servo;
pub mod shift_register;

pub use console::ConsoleOutput;
pub use i2c::I2cDisplay;
pub use multiplexer::Multiplexer;
pub use servo::{Pca9685Servo, ServoSettings};
pub use shift_register::{Frame, ScanningDisplay, ShiftChain, ShiftRegisterDisplay, SoundLatch};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Player displays 1..=4 plus the shared credit/ball-in-play unit 0
pub const DISPLAY_UNITS: usize = 5;
pub const DIGITS_PER_UNIT: usize = 7;
pub const MAX_PLAYER_DISPLAYS: u8 = 4;

/// Digit code the BCD decoders render as an unlit digit
pub const BLANK: u8 = 0x0F;
/// Display value that clears a whole field instead of rendering `0`
pub const BLANK_SCORE: i32 = -1;
/// Sound register value meaning "nothing playing"
pub const NO_SOUND: u8 = 15;

pub const CREDIT_UNIT: usize = 0;
pub const CREDITS_OFFSET: usize = 0;
pub const BALL_IN_PLAY_OFFSET: usize = 4;

/// Digit codes of one unit, least significant digit first
pub type Digits = [u8; DIGITS_PER_UNIT];

#[derive(Error, Debug)]
pub enum OutputError {
    #[error("Bus error: {0}")]
    Bus(String),

    #[error("Pin error: {0}")]
    Pin(String),

    #[error("Value out of range: {0}")]
    OutOfRange(String),

    #[error("Failed to start scan thread: {0}")]
    Spawn(#[source] std::io::Error),
}

pub type Result<T> = std::result::Result<T, OutputError>;

/// Logical readout a display command addresses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DisplayTarget {
    /// 1-based player display
    Player(u8),
    BallInPlay,
    Credits,
}

impl DisplayTarget {
    /// Numeric display ids as game code historically addresses them:
    /// 1..=4 players, 5 ball in play, 6 credits
    pub fn from_index(index: u8) -> Option<Self> {
        match index {
            1..=MAX_PLAYER_DISPLAYS => Some(DisplayTarget::Player(index)),
            5 => Some(DisplayTarget::BallInPlay),
            6 => Some(DisplayTarget::Credits),
            _ => None,
        }
    }

    pub fn index(&self) -> u8 {
        match self {
            DisplayTarget::Player(n) => *n,
            DisplayTarget::BallInPlay => 5,
            DisplayTarget::Credits => 6,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisplayCommand {
    pub target: DisplayTarget,
    pub value: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SoundCommand {
    Play(u8),
    /// Return the register to [`NO_SOUND`] after the dwell of the play with
    /// this generation; stale resets are ignored
    Reset { generation: u64 },
}

/// Strategy that moves the display buffer and sound register onto hardware
pub trait OutputBackend: Send {
    /// A unit's digits changed
    fn unit_changed(&mut self, unit: usize, digits: &Digits) -> Result<()>;

    /// The sound register changed
    fn sound_changed(&mut self, code: u8) -> Result<()>;

    /// Periodic tick on the multiplexer task. Must not block; hardware that
    /// needs continuous scanning runs it elsewhere (see [`ScanningDisplay`]).
    fn refresh(&mut self, _buffer: &DisplayBuffer, _sound: u8) -> Result<()> {
        Ok(())
    }
}

pub trait SoundOutput: Send {
    fn stage(&mut self, code: u8) -> Result<()>;
}

pub trait ServoOutput: Send {
    fn set_angle(&mut self, angle: i32) -> Result<()>;
}

/// Split a non-negative value into digit codes, least significant first.
/// Unused positions are [`BLANK`]; any negative value blanks every position.
/// Digits past the unit's capacity are dropped.
pub fn number_to_digits(value: i32) -> Digits {
    let mut digits = [BLANK; DIGITS_PER_UNIT];
    if value < 0 {
        return digits;
    }

    let mut rest = value;
    for slot in digits.iter_mut() {
        *slot = (rest % 10) as u8;
        rest /= 10;
        if rest == 0 {
            break;
        }
    }
    digits
}

/// Place-value decode of a digit array; blank positions contribute nothing.
/// Returns `None` when every position is blank.
pub fn digits_to_number(digits: &[u8]) -> Option<u64> {
    let mut value = 0u64;
    let mut seen = false;
    for (place, digit) in digits.iter().enumerate().rev() {
        if *digit > 9 {
            continue;
        }
        seen = true;
        value += u64::from(*digit) * 10u64.pow(place as u32);
    }
    seen.then_some(value)
}

/// Two-digit sub-field of the credit unit
fn field_digits(value: i32) -> [u8; 2] {
    let digits = number_to_digits(value);
    [digits[0], digits[1]]
}

/// What every display unit currently shows
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayBuffer {
    units: [Digits; DISPLAY_UNITS],
}

impl Default for DisplayBuffer {
    fn default() -> Self {
        Self {
            units: [[BLANK; DIGITS_PER_UNIT]; DISPLAY_UNITS],
        }
    }
}

impl DisplayBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn units(&self) -> &[Digits; DISPLAY_UNITS] {
        &self.units
    }

    pub fn unit(&self, unit: usize) -> Option<&Digits> {
        self.units.get(unit)
    }

    /// Apply a command and return the unit it touched, or `None` for a
    /// target with no physical display
    pub fn apply(&mut self, cmd: DisplayCommand) -> Option<usize> {
        match cmd.target {
            DisplayTarget::Player(n) if (1..=MAX_PLAYER_DISPLAYS).contains(&n) => {
                let unit = usize::from(n);
                self.units[unit] = number_to_digits(cmd.value);
                Some(unit)
            }
            DisplayTarget::Player(_) => None,
            DisplayTarget::BallInPlay => {
                self.write_field(BALL_IN_PLAY_OFFSET, cmd.value);
                Some(CREDIT_UNIT)
            }
            DisplayTarget::Credits => {
                self.write_field(CREDITS_OFFSET, cmd.value);
                Some(CREDIT_UNIT)
            }
        }
    }

    fn write_field(&mut self, offset: usize, value: i32) {
        let field = field_digits(value);
        self.units[CREDIT_UNIT][offset..offset + 2].copy_from_slice(&field);
    }

    /// Numeric value of a player display, `None` while blank
    pub fn player_value(&self, player: u8) -> Option<u64> {
        if !(1..=MAX_PLAYER_DISPLAYS).contains(&player) {
            return None;
        }
        digits_to_number(&self.units[usize::from(player)])
    }

    pub fn ball_in_play(&self) -> Option<u64> {
        digits_to_number(&self.units[CREDIT_UNIT][BALL_IN_PLAY_OFFSET..BALL_IN_PLAY_OFFSET + 2])
    }

    pub fn credits(&self) -> Option<u64> {
        digits_to_number(&self.units[CREDIT_UNIT][CREDITS_OFFSET..CREDITS_OFFSET + 2])
    }
}

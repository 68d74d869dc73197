pub mod monitor;
pub mod reader;

pub use monitor::{SwitchCallback, SwitchIntake, READ_ERROR_BACKOFF};
pub use reader::{read_switch_events, SIMULATED_EVENT, SWITCH_READ_SIZE};

/// Switch ids fit in the seven bits left after the released flag
pub const SWITCH_COUNT: usize = 128;

/// Latest pressed/released level of every switch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SwitchStates(u128);

impl SwitchStates {
    pub fn set(&mut self, switch_id: u8, pressed: bool) {
        let bit = 1u128 << (switch_id as usize % SWITCH_COUNT);
        if pressed {
            self.0 |= bit;
        } else {
            self.0 &= !bit;
        }
    }

    pub fn is_pressed(&self, switch_id: u8) -> bool {
        self.0 & (1u128 << (switch_id as usize % SWITCH_COUNT)) != 0
    }
}

pub mod config;
pub mod device;
pub mod display;
pub mod game;
pub mod machine;
pub mod router;
pub mod serial;
pub mod switches;

pub use config::MachineConfig;
pub use game::{Completion, GameState, GameStats, Observer, PlayerState};
pub use machine::{Machine, MachineBuilder, MachineError};
pub use router::{CommandRouter, LampState};
pub use serial::{DeviceMessage, SwitchEvent};

//! Command queues between game logic and the peripheral-driving tasks
//!
//! Every command category has its own bounded queue. Callers hold a cloneable
//! [`CommandRouter`]; each queue is drained by exactly one task, so delivery
//! within a category is FIFO while categories are independent of each other.

pub mod lamp;
pub mod solenoid;

pub use lamp::LampWorker;
pub use solenoid::SolenoidWorker;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::serial;

use crate::display::{DisplayCommand, DisplayTarget, SoundCommand, BLANK_SCORE};
use crate::serial::protocol::{
    DeviceMessage, FLIPPER_DISABLE, FLIPPER_ENABLE, FLIPPER_RELAY_ID, LAMP_FAST_BLINK, LAMP_OFF,
    LAMP_ON, LAMP_SLOW_BLINK, SOLENOID_ALWAYS_ON, SOLENOID_FIRE_PULSE, SOLENOID_OFF,
};

/// Consecutive failed writes after which a worker gives up on its link
pub const MAX_WRITE_FAILURES: u32 = 5;

/// Tracks consecutive write failures of one worker's link
#[derive(Debug, Default)]
pub(crate) struct WriteHealth {
    failures: u32,
}

impl WriteHealth {
    /// False once the link has failed [`MAX_WRITE_FAILURES`] writes in a row
    pub(crate) fn record(&mut self, result: serial::Result<()>) -> bool {
        match result {
            Ok(()) => {
                self.failures = 0;
                true
            }
            Err(_) => {
                self.failures += 1;
                self.failures < MAX_WRITE_FAILURES
            }
        }
    }
}

/// Queue item: either a payload or the request for the draining task to exit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control<T> {
    Data(T),
    Quit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum LampState {
    #[default]
    Off,
    On,
    SlowBlink,
    FastBlink,
}

impl LampState {
    pub fn value(self) -> u16 {
        match self {
            LampState::Off => LAMP_OFF,
            LampState::On => LAMP_ON,
            LampState::SlowBlink => LAMP_SLOW_BLINK,
            LampState::FastBlink => LAMP_FAST_BLINK,
        }
    }

    pub fn from_value(value: u16) -> Option<Self> {
        match value {
            LAMP_OFF => Some(LampState::Off),
            LAMP_ON => Some(LampState::On),
            LAMP_SLOW_BLINK => Some(LampState::SlowBlink),
            LAMP_FAST_BLINK => Some(LampState::FastBlink),
            _ => None,
        }
    }
}

/// Receive ends, handed to the tasks that drain them
pub struct CommandReceivers {
    pub lamp_rx: mpsc::Receiver<Control<DeviceMessage>>,
    pub solenoid_rx: mpsc::Receiver<Control<DeviceMessage>>,
    pub display_rx: mpsc::Receiver<Control<DisplayCommand>>,
    pub sound_rx: mpsc::Receiver<SoundCommand>,
    pub servo_rx: mpsc::Receiver<i32>,
}

/// Send handles for every command category. Each operation only enqueues:
/// it returns once the queue accepted the item (waiting while it is full).
#[derive(Clone)]
pub struct CommandRouter {
    lamp_tx: mpsc::Sender<Control<DeviceMessage>>,
    solenoid_tx: mpsc::Sender<Control<DeviceMessage>>,
    display_tx: mpsc::Sender<Control<DisplayCommand>>,
    sound_tx: mpsc::Sender<SoundCommand>,
    servo_tx: mpsc::Sender<i32>,
}

impl CommandRouter {
    pub fn new(capacity: usize) -> (Self, CommandReceivers) {
        let capacity = capacity.max(1);
        let (lamp_tx, lamp_rx) = mpsc::channel(capacity);
        let (solenoid_tx, solenoid_rx) = mpsc::channel(capacity);
        let (display_tx, display_rx) = mpsc::channel(capacity);
        let (sound_tx, sound_rx) = mpsc::channel(capacity);
        let (servo_tx, servo_rx) = mpsc::channel(capacity);

        let router = Self {
            lamp_tx,
            solenoid_tx,
            display_tx,
            sound_tx,
            servo_tx,
        };
        let receivers = CommandReceivers {
            lamp_rx,
            solenoid_rx,
            display_rx,
            sound_rx,
            servo_rx,
        };
        (router, receivers)
    }

    /// Sender the display multiplexer uses to schedule its own sound resets
    pub fn sound_sender(&self) -> mpsc::Sender<SoundCommand> {
        self.sound_tx.clone()
    }

    // Lamps

    pub async fn send_lamp(&self, msg: DeviceMessage) {
        enqueue(&self.lamp_tx, Control::Data(msg), "lamp").await;
    }

    pub async fn set_lamp_state(&self, lamp_ids: &[u8], state: LampState) {
        for id in lamp_ids {
            self.send_lamp(DeviceMessage::new(*id, state.value())).await;
        }
    }

    pub async fn lamp_on(&self, lamp_ids: &[u8]) {
        self.set_lamp_state(lamp_ids, LampState::On).await;
    }

    pub async fn lamp_off(&self, lamp_ids: &[u8]) {
        self.set_lamp_state(lamp_ids, LampState::Off).await;
    }

    pub async fn lamp_slow_blink(&self, lamp_ids: &[u8]) {
        self.set_lamp_state(lamp_ids, LampState::SlowBlink).await;
    }

    pub async fn lamp_fast_blink(&self, lamp_ids: &[u8]) {
        self.set_lamp_state(lamp_ids, LampState::FastBlink).await;
    }

    // Solenoids

    pub async fn send_solenoid(&self, msg: DeviceMessage) {
        enqueue(&self.solenoid_tx, Control::Data(msg), "solenoid").await;
    }

    pub async fn solenoid_off(&self, solenoid_id: u8) {
        self.send_solenoid(DeviceMessage::new(solenoid_id, SOLENOID_OFF)).await;
    }

    pub async fn solenoid_fire(&self, solenoid_id: u8) {
        self.send_solenoid(DeviceMessage::new(solenoid_id, SOLENOID_FIRE_PULSE)).await;
    }

    pub async fn solenoid_always_on(&self, solenoid_id: u8) {
        self.send_solenoid(DeviceMessage::new(solenoid_id, SOLENOID_ALWAYS_ON)).await;
    }

    /// Energize for a firmware-defined duration code
    pub async fn solenoid_on_duration(&self, solenoid_id: u8, duration: u16) {
        self.send_solenoid(DeviceMessage::new(solenoid_id, duration)).await;
    }

    /// Enable or disable the flipper relay
    pub async fn flipper_control(&self, enabled: bool) {
        let value = if enabled { FLIPPER_ENABLE } else { FLIPPER_DISABLE };
        self.send_solenoid(DeviceMessage::new(FLIPPER_RELAY_ID, value)).await;
    }

    // Displays, sound, servo

    pub async fn set_display(&self, target: DisplayTarget, value: i32) {
        let cmd = DisplayCommand { target, value };
        enqueue(&self.display_tx, Control::Data(cmd), "display").await;
    }

    /// Show a player display as `0`, or blank it
    pub async fn show_display(&self, player: u8, on: bool) {
        let value = if on { 0 } else { BLANK_SCORE };
        self.set_display(DisplayTarget::Player(player), value).await;
    }

    pub async fn blank_display(&self, target: DisplayTarget) {
        self.set_display(target, BLANK_SCORE).await;
    }

    pub async fn set_credits(&self, credits: i32) {
        self.set_display(DisplayTarget::Credits, credits).await;
    }

    pub async fn set_ball_in_play(&self, ball: i32) {
        self.set_display(DisplayTarget::BallInPlay, ball).await;
    }

    pub async fn play_sound(&self, code: u8) {
        enqueue(&self.sound_tx, SoundCommand::Play(code), "sound").await;
    }

    pub async fn servo_angle(&self, angle: i32) {
        enqueue(&self.servo_tx, angle, "servo").await;
    }

    /// Ask the lamp, solenoid and display tasks to exit
    pub async fn quit(&self) {
        enqueue(&self.lamp_tx, Control::Quit, "lamp").await;
        enqueue(&self.solenoid_tx, Control::Quit, "solenoid").await;
        enqueue(&self.display_tx, Control::Quit, "display").await;
    }
}

async fn enqueue<T>(tx: &mpsc::Sender<T>, item: T, queue: &str) {
    if tx.send(item).await.is_err() {
        log::warn!("{} queue is closed; command dropped", queue);
    }
}

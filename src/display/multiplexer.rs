use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval, sleep, MissedTickBehavior};

use super::{DisplayBuffer, DisplayCommand, OutputBackend, ServoOutput, SoundCommand, NO_SOUND};
use crate::router::Control;

/// Single task draining the display, sound and servo queues and ticking the
/// hardware refresh
pub struct Multiplexer {
    buffer: DisplayBuffer,
    sound: u8,
    backend: Box<dyn OutputBackend>,
    servo: Option<Box<dyn ServoOutput>>,
    display_rx: mpsc::Receiver<Control<DisplayCommand>>,
    sound_rx: mpsc::Receiver<SoundCommand>,
    servo_rx: mpsc::Receiver<i32>,
    sound_tx: mpsc::Sender<SoundCommand>,
    refresh_interval: Duration,
    sound_dwell: Duration,
    sound_generation: u64,
    refresh_failing: bool,
}

impl Multiplexer {
    pub fn new(
        backend: Box<dyn OutputBackend>,
        display_rx: mpsc::Receiver<Control<DisplayCommand>>,
        sound_rx: mpsc::Receiver<SoundCommand>,
        servo_rx: mpsc::Receiver<i32>,
        sound_tx: mpsc::Sender<SoundCommand>,
    ) -> Self {
        Self {
            buffer: DisplayBuffer::new(),
            sound: NO_SOUND,
            backend,
            servo: None,
            display_rx,
            sound_rx,
            servo_rx,
            sound_tx,
            refresh_interval: Duration::from_millis(5),
            sound_dwell: Duration::from_millis(100),
            sound_generation: 0,
            refresh_failing: false,
        }
    }

    pub fn with_servo(mut self, servo: Option<Box<dyn ServoOutput>>) -> Self {
        self.servo = servo;
        self
    }

    pub fn with_refresh_interval(mut self, refresh_interval: Duration) -> Self {
        self.refresh_interval = refresh_interval;
        self
    }

    pub fn with_sound_dwell(mut self, sound_dwell: Duration) -> Self {
        self.sound_dwell = sound_dwell;
        self
    }

    /// Run until Quit arrives on the display queue; returns the final buffer
    pub async fn run(mut self) -> DisplayBuffer {
        log::debug!("Starting display multiplexer");
        let mut ticker = interval(self.refresh_interval.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                cmd = self.display_rx.recv() => match cmd {
                    Some(Control::Data(cmd)) => self.apply_display(cmd),
                    Some(Control::Quit) | None => break,
                },
                Some(cmd) = self.sound_rx.recv() => self.apply_sound(cmd),
                Some(angle) = self.servo_rx.recv() => self.apply_servo(angle),
                _ = ticker.tick() => self.refresh(),
            }
        }

        log::debug!("Display multiplexer stopped");
        self.buffer
    }

    fn apply_display(&mut self, cmd: DisplayCommand) {
        let Some(unit) = self.buffer.apply(cmd) else {
            log::warn!("No display for target {:?}", cmd.target);
            return;
        };
        let Some(digits) = self.buffer.unit(unit) else { return };
        if let Err(e) = self.backend.unit_changed(unit, digits) {
            log::error!("Display {} update failed: {}", unit, e);
        }
    }

    fn apply_sound(&mut self, cmd: SoundCommand) {
        let code = match cmd {
            SoundCommand::Play(code) => {
                self.sound_generation = self.sound_generation.wrapping_add(1);
                let generation = self.sound_generation;
                let tx = self.sound_tx.clone();
                let dwell = self.sound_dwell;
                // reset on the side so the same code can retrigger right after
                tokio::spawn(async move {
                    sleep(dwell).await;
                    let _ = tx.send(SoundCommand::Reset { generation }).await;
                });
                code
            }
            SoundCommand::Reset { generation } if generation == self.sound_generation => NO_SOUND,
            SoundCommand::Reset { generation } => {
                log::debug!("Ignoring reset for superseded sound {}", generation);
                return;
            }
        };

        self.sound = code;
        if let Err(e) = self.backend.sound_changed(code) {
            log::error!("Sound output failed for code {}: {}", code, e);
        }
    }

    fn apply_servo(&mut self, angle: i32) {
        match self.servo.as_mut() {
            Some(servo) => {
                if let Err(e) = servo.set_angle(angle) {
                    log::error!("Servo move to {} failed: {}", angle, e);
                }
            }
            None => log::debug!("No servo configured; angle {} ignored", angle),
        }
    }

    fn refresh(&mut self) {
        match self.backend.refresh(&self.buffer, self.sound) {
            Ok(()) => {
                if self.refresh_failing {
                    log::info!("Display refresh recovered");
                    self.refresh_failing = false;
                }
            }
            Err(e) => {
                if !self.refresh_failing {
                    log::error!("Display refresh failed: {}", e);
                    self.refresh_failing = true;
                }
            }
        }
    }
}

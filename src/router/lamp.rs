use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::sleep;

use super::{Control, WriteHealth, MAX_WRITE_FAILURES};
use crate::serial::protocol::{DeviceMessage, KEEPALIVE, LAMP_FAST_BLINK};
use crate::serial::PeripheralLink;

pub const KEEPALIVE_INTERVAL: Duration = Duration::from_millis(250);

/// Drains the lamp queue into the lamp driver unit
pub struct LampWorker {
    link: PeripheralLink,
    rx: mpsc::Receiver<Control<DeviceMessage>>,
    keepalive: Duration,
    value_bias: u16,
}

impl LampWorker {
    pub fn new(link: PeripheralLink, rx: mpsc::Receiver<Control<DeviceMessage>>) -> Self {
        Self {
            link,
            rx,
            keepalive: KEEPALIVE_INTERVAL,
            value_bias: 1,
        }
    }

    pub fn with_keepalive(mut self, keepalive: Duration) -> Self {
        self.keepalive = keepalive;
        self
    }

    /// Offset added to every lamp value so host states line up with the firmware's
    pub fn with_value_bias(mut self, bias: u16) -> Self {
        self.value_bias = bias;
        self
    }

    /// Drain until Quit, a closed queue, an out-of-range value or a dead
    /// link; returns the link
    pub async fn run(mut self) -> PeripheralLink {
        log::debug!("Starting LDU subscribing");
        let mut health = WriteHealth::default();

        loop {
            let result = tokio::select! {
                msg = self.rx.recv() => match msg {
                    Some(Control::Data(msg)) => {
                        if msg.value > LAMP_FAST_BLINK {
                            log::error!("Invalid message value received for Lamp Control: {}", msg.value);
                            break;
                        }
                        self.link.send(msg.with_bias(self.value_bias)).await
                    }
                    Some(Control::Quit) | None => break,
                },
                _ = sleep(self.keepalive) => self.link.send(KEEPALIVE).await,
            };

            if !health.record(result) {
                log::error!("LDU link {} failed {} writes in a row; stopping", self.link.port(), MAX_WRITE_FAILURES);
                break;
            }
        }

        log::debug!("LDU subscriber stopped");
        self.link
    }
}

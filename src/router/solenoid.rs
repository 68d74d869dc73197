use tokio::sync::mpsc;

use super::{Control, WriteHealth, MAX_WRITE_FAILURES};
use crate::serial::protocol::{DeviceMessage, SOLENOID_INVALID_FLOOR};
use crate::serial::{PeripheralLink, ShortFieldWidth};

/// Drains the solenoid queue into the solenoid driver unit as short messages
pub struct SolenoidWorker {
    link: PeripheralLink,
    rx: mpsc::Receiver<Control<DeviceMessage>>,
    width: ShortFieldWidth,
}

impl SolenoidWorker {
    pub fn new(link: PeripheralLink, rx: mpsc::Receiver<Control<DeviceMessage>>) -> Self {
        Self {
            link,
            rx,
            width: ShortFieldWidth::Three,
        }
    }

    pub fn with_field_width(mut self, width: ShortFieldWidth) -> Self {
        self.width = width;
        self
    }

    pub async fn run(mut self) -> PeripheralLink {
        log::debug!("Starting Solenoid subscribing");
        let mut health = WriteHealth::default();

        while let Some(Control::Data(msg)) = self.rx.recv().await {
            log::debug!("Solenoid Msg id:{} value:{}", msg.id, msg.value);
            if msg.value >= SOLENOID_INVALID_FLOOR {
                log::error!("Invalid message value received for Solenoid Control: {}", msg.value);
                continue;
            }
            let result = self.link.send_short(msg, self.width).await;
            if !health.record(result) {
                log::error!("SDU link {} failed {} writes in a row; stopping", self.link.port(), MAX_WRITE_FAILURES);
                break;
            }
        }

        log::debug!("Solenoid subscriber stopped");
        self.link
    }
}

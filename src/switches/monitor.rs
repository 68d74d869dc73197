use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::sleep;

use super::reader::read_switch_events;
use super::SwitchStates;
use crate::router::Control;
use crate::serial::{PeripheralLink, SwitchEvent};

/// Low-level hook run for every decoded switch edge, ahead of the observers
pub type SwitchCallback = Arc<dyn Fn(SwitchEvent) + Send + Sync>;

/// Pause after a failed or empty read
pub const READ_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Polls the switch matrix and feeds decoded edges to the broadcast queue
pub struct SwitchIntake {
    link: PeripheralLink,
    states: Arc<Mutex<SwitchStates>>,
    callback: Option<SwitchCallback>,
    events_tx: mpsc::Sender<Control<SwitchEvent>>,
    shutdown_rx: watch::Receiver<bool>,
    simulated_interval: Duration,
}

impl SwitchIntake {
    pub fn new(
        link: PeripheralLink,
        states: Arc<Mutex<SwitchStates>>,
        callback: Option<SwitchCallback>,
        events_tx: mpsc::Sender<Control<SwitchEvent>>,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            link,
            states,
            callback,
            events_tx,
            shutdown_rx,
            simulated_interval: Duration::from_secs(1),
        }
    }

    /// Pace of the fixture events a simulated switch matrix produces
    pub fn with_simulated_interval(mut self, interval: Duration) -> Self {
        self.simulated_interval = interval;
        self
    }

    /// Run until shutdown is signalled, then hand the link back
    pub async fn run(mut self) -> PeripheralLink {
        log::debug!("Starting switch monitoring on {}", self.link.port());

        loop {
            if *self.shutdown_rx.borrow() {
                break;
            }

            if self.link.is_simulated() {
                tokio::select! {
                    changed = self.shutdown_rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        continue;
                    }
                    _ = sleep(self.simulated_interval) => {}
                }
            }

            let batch = tokio::select! {
                changed = self.shutdown_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
                batch = read_switch_events(&mut self.link) => batch,
            };

            match batch {
                Ok(events) if !events.is_empty() => {
                    log::debug!("Received {} switch events", events.len());
                    if !self.dispatch(events).await {
                        log::info!("Switch broadcast closed; stopping intake");
                        break;
                    }
                }
                // zero-byte read (link at EOF) or an error the reader already logged
                Ok(_) | Err(_) => self.back_off().await,
            }
        }

        log::debug!("Switch monitoring stopped");
        self.link
    }

    async fn back_off(&mut self) {
        tokio::select! {
            _ = self.shutdown_rx.changed() => {}
            _ = sleep(READ_ERROR_BACKOFF) => {}
        }
    }

    async fn dispatch(&mut self, events: Vec<SwitchEvent>) -> bool {
        for event in events {
            self.states
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .set(event.switch_id, event.pressed);

            if let Some(callback) = &self.callback {
                callback(event);
            }

            if self.events_tx.send(Control::Data(event)).await.is_err() {
                return false;
            }
        }
        true
    }
}

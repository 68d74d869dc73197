use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;

use crate::machine::Machine;
use crate::serial::SwitchEvent;

/// Game logic hooked into the machine's lifecycle.
///
/// Callbacks run on the machine's tasks and are awaited in registration
/// order, so they should hand long-running work to a spawned task. Every
/// method defaults to doing nothing.
#[async_trait]
pub trait Observer: Send + Sync {
    /// Called once at startup, before any other callback
    async fn init(&self, _machine: &Machine) {}

    async fn game_start(&self, _machine: &Machine) {}

    async fn player_added(&self, _machine: &Machine, _player: u8) {}

    /// First ball of each player
    async fn player_start(&self, _machine: &Machine, _player: u8) {}

    async fn player_up(&self, _machine: &Machine, _player: u8) {}

    /// The ball ended for `player`. The next turn begins once every observer
    /// has finished with (or dropped) its `done` token.
    async fn player_end(&self, _machine: &Machine, _player: u8, done: Completion) {
        done.done();
    }

    async fn player_finish(&self, _machine: &Machine, _player: u8) {}

    async fn switch_handler(&self, _machine: &Machine, _event: SwitchEvent) {}

    async fn ball_drained(&self, _machine: &Machine) {}

    async fn game_over(&self, _machine: &Machine) {}
}

/// One observer's share of a [`CompletionBarrier`]; completes when dropped
#[derive(Debug)]
pub struct Completion {
    _token: mpsc::Sender<()>,
}

impl Completion {
    pub fn done(self) {}
}

/// Fan-in for the player-end callbacks
pub struct CompletionBarrier {
    tx: mpsc::Sender<()>,
    rx: mpsc::Receiver<()>,
}

impl Default for CompletionBarrier {
    fn default() -> Self {
        Self::new()
    }
}

impl CompletionBarrier {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel(1);
        Self { tx, rx }
    }

    pub fn token(&self) -> Completion {
        Completion { _token: self.tx.clone() }
    }

    /// Wait for every handed-out token; false if `limit` ran out first
    pub async fn wait(self, limit: Duration) -> bool {
        let Self { tx, mut rx } = self;
        drop(tx);
        // nothing is ever sent: recv yields None once the last token is gone
        timeout(limit, rx.recv()).await.is_ok()
    }
}

//! The machine handle: shared context, command router, observers and the
//! tasks that drive the peripherals

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::OutputPin;
use embedded_hal::i2c::I2c;

use crate::config::MachineConfig;
use crate::device::{DeviceError, DeviceSet};
use crate::display::{
    ConsoleOutput, DisplayBuffer, I2cDisplay, Multiplexer, OutputBackend, OutputError, Pca9685Servo,
    ScanningDisplay, ServoOutput, ShiftRegisterDisplay,
};
use crate::game::{GameContext, GameState, GameStats, Observer, PlayerState};
use crate::router::{CommandReceivers, CommandRouter, Control, LampState, LampWorker, SolenoidWorker};
use crate::serial::{LinkOpener, PeripheralLink, PeripheralRole, SerialOpener, SwitchEvent};
use crate::switches::{SwitchCallback, SwitchIntake, SwitchStates};

const TASK_JOIN_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Error, Debug)]
pub enum MachineError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Machine already started")]
    AlreadyStarted,

    #[error("Device connection failed: {0}")]
    Connect(#[from] DeviceError),

    #[error("Output setup failed: {0}")]
    Output(#[from] OutputError),
}

pub type Result<T> = std::result::Result<T, MachineError>;

/// Everything `start` consumes
struct Startup {
    receivers: CommandReceivers,
    events_rx: mpsc::Receiver<Control<SwitchEvent>>,
    backend: Box<dyn OutputBackend>,
    servo: Option<Box<dyn ServoOutput>>,
    opener: Arc<dyn LinkOpener>,
    switch_callback: Option<SwitchCallback>,
}

#[derive(Default)]
struct Tasks {
    lamp: Option<JoinHandle<PeripheralLink>>,
    solenoid: Option<JoinHandle<PeripheralLink>>,
    intake: Option<JoinHandle<PeripheralLink>>,
    multiplexer: Option<JoinHandle<DisplayBuffer>>,
    broadcast: Option<JoinHandle<()>>,
}

struct Inner {
    config: MachineConfig,
    context: Mutex<GameContext>,
    switch_states: Arc<Mutex<SwitchStates>>,
    router: CommandRouter,
    observers: Vec<Arc<dyn Observer>>,
    diagnostic: Option<Arc<dyn Observer>>,
    events_tx: mpsc::Sender<Control<SwitchEvent>>,
    shutdown_tx: watch::Sender<bool>,
    startup: Mutex<Option<Startup>>,
    tasks: Mutex<Tasks>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub struct MachineBuilder {
    config: MachineConfig,
    observers: Vec<Arc<dyn Observer>>,
    diagnostic: Option<Arc<dyn Observer>>,
    switch_callback: Option<SwitchCallback>,
    backend: Option<Box<dyn OutputBackend>>,
    servo: Option<Box<dyn ServoOutput>>,
    opener: Option<Arc<dyn LinkOpener>>,
}

impl MachineBuilder {
    pub fn new(config: MachineConfig) -> Self {
        Self {
            config,
            observers: Vec::new(),
            diagnostic: None,
            switch_callback: None,
            backend: None,
            servo: None,
            opener: None,
        }
    }

    /// Observers are notified in the order they are added
    pub fn observer(mut self, observer: Arc<dyn Observer>) -> Self {
        self.observers.push(observer);
        self
    }

    /// Receives every switch event, test mode or not
    pub fn diagnostic_observer(mut self, observer: Arc<dyn Observer>) -> Self {
        self.diagnostic = Some(observer);
        self
    }

    /// Raw hook run for every decoded switch edge before it is broadcast
    pub fn switch_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(SwitchEvent) + Send + Sync + 'static,
    {
        self.switch_callback = Some(Arc::new(callback));
        self
    }

    pub fn output_backend(mut self, backend: Box<dyn OutputBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn servo(mut self, servo: Box<dyn ServoOutput>) -> Self {
        self.servo = Some(servo);
        self
    }

    /// Addressable I2C display board at `display.i2c_address`
    pub fn i2c_display<I2C>(self, bus: I2C) -> Self
    where
        I2C: I2c + Send + 'static,
    {
        let address = self.config.display.i2c_address;
        self.output_backend(Box::new(I2cDisplay::new(bus, address)))
    }

    /// Bit-banged displays, scanned every `refresh_interval_ms` on their own thread
    pub fn shift_register_display<DATA, CLK, LATCH, D>(
        self,
        display: ShiftRegisterDisplay<DATA, CLK, LATCH, D>,
    ) -> Result<Self>
    where
        DATA: OutputPin + Send + 'static,
        CLK: OutputPin + Send + 'static,
        LATCH: OutputPin + Send + 'static,
        D: DelayNs + Send + 'static,
    {
        let scanning = ScanningDisplay::spawn(display, self.config.refresh_interval())?;
        Ok(self.output_backend(Box::new(scanning)))
    }

    /// PCA9685 servo configured from the `servo` section (defaults when absent).
    /// The chip is set up here, so bus faults surface before the machine starts.
    pub fn pca9685_servo<I2C>(self, bus: I2C) -> Result<Self>
    where
        I2C: I2c + Send + 'static,
    {
        let settings = self.config.servo.clone().unwrap_or_default();
        let servo = Pca9685Servo::new(bus, settings)?;
        Ok(self.servo(Box::new(servo)))
    }

    pub fn link_opener(mut self, opener: Arc<dyn LinkOpener>) -> Self {
        self.opener = Some(opener);
        self
    }

    /// Create the context and queues. No task runs until [`Machine::start`].
    pub fn build(self) -> Result<Machine> {
        self.config
            .validate()
            .map_err(|e| MachineError::InvalidConfig(e.to_string()))?;

        let config = self.config;
        let (router, receivers) = CommandRouter::new(config.command_queue_capacity);
        let (events_tx, events_rx) = mpsc::channel(config.switch_queue_capacity);
        let (shutdown_tx, _) = watch::channel(false);

        let backend = self
            .backend
            .unwrap_or_else(|| Box::new(ConsoleOutput::new()));
        let opener = self.opener.unwrap_or_else(|| {
            Arc::new(SerialOpener {
                baud_rate: config.baud_rate,
            })
        });

        let startup = Startup {
            receivers,
            events_rx,
            backend,
            servo: self.servo,
            opener,
            switch_callback: self.switch_callback,
        };

        let inner = Inner {
            context: Mutex::new(GameContext::new(config.max_players, config.total_balls)),
            config,
            switch_states: Arc::new(Mutex::new(SwitchStates::default())),
            router,
            observers: self.observers,
            diagnostic: self.diagnostic,
            events_tx,
            shutdown_tx,
            startup: Mutex::new(Some(startup)),
            tasks: Mutex::new(Tasks::default()),
        };

        Ok(Machine {
            inner: Arc::new(inner),
        })
    }
}

/// Cloneable handle to one running machine
#[derive(Clone)]
pub struct Machine {
    inner: Arc<Inner>,
}

impl Machine {
    pub fn builder(config: MachineConfig) -> MachineBuilder {
        MachineBuilder::new(config)
    }

    /// Connect the controllers, start every task and initialize observers.
    ///
    /// Outside console mode the connection is retried per the config; if it
    /// still fails the machine stays unstarted and `start` may be called again.
    pub async fn start(&self) -> Result<()> {
        let startup = lock(&self.inner.startup)
            .take()
            .ok_or(MachineError::AlreadyStarted)?;
        let config = &self.inner.config;

        let mut devices = if config.console_mode {
            log::info!("Console mode: using simulated controllers");
            DeviceSet::simulated(startup.opener.clone())
        } else {
            DeviceSet::new(startup.opener.clone())
        };

        if !config.console_mode {
            if let Err(e) = devices.connect_with_retry(&config.connect_options()).await {
                log::error!("Machine initialization failed: {}", e);
                *lock(&self.inner.startup) = Some(startup);
                return Err(e.into());
            }
        }

        let switch_link = devices.take(PeripheralRole::SwitchMatrix)?;
        let lamp_link = devices.take(PeripheralRole::Ldu)?;
        let solenoid_link = devices.take(PeripheralRole::Sdu)?;

        let Startup {
            receivers,
            events_rx,
            backend,
            servo,
            switch_callback,
            ..
        } = startup;
        let CommandReceivers {
            lamp_rx,
            solenoid_rx,
            display_rx,
            sound_rx,
            servo_rx,
        } = receivers;

        log::info!("Starting command workers");
        let lamp = LampWorker::new(lamp_link, lamp_rx)
            .with_keepalive(config.keepalive())
            .with_value_bias(config.encoding.lamp_value_bias);
        let solenoid = SolenoidWorker::new(solenoid_link, solenoid_rx)
            .with_field_width(config.encoding.solenoid_field_width);
        let multiplexer = Multiplexer::new(
            backend,
            display_rx,
            sound_rx,
            servo_rx,
            self.inner.router.sound_sender(),
        )
        .with_servo(servo)
        .with_refresh_interval(config.refresh_interval())
        .with_sound_dwell(config.sound_dwell());

        {
            let mut tasks = lock(&self.inner.tasks);
            tasks.lamp = Some(tokio::spawn(lamp.run()));
            tasks.solenoid = Some(tokio::spawn(solenoid.run()));
            tasks.multiplexer = Some(tokio::spawn(multiplexer.run()));
        }

        if let Some(diagnostic) = &self.inner.diagnostic {
            diagnostic.init(self).await;
        }
        for observer in self.observers() {
            observer.init(self).await;
        }

        let intake = SwitchIntake::new(
            switch_link,
            self.inner.switch_states.clone(),
            switch_callback,
            self.inner.events_tx.clone(),
            self.inner.shutdown_tx.subscribe(),
        )
        .with_simulated_interval(config.simulated_switch_interval());

        let mut tasks = lock(&self.inner.tasks);
        tasks.broadcast = Some(tokio::spawn(broadcast(self.clone(), events_rx)));
        tasks.intake = Some(tokio::spawn(intake.run()));
        log::info!("Machine started");
        Ok(())
    }

    /// Stop every task and close the controller links
    pub async fn quit(&self) {
        self.context().quitting = true;
        let tasks = std::mem::take(&mut *lock(&self.inner.tasks));
        if tasks.lamp.is_none() {
            log::debug!("Quit before start; nothing to stop");
            return;
        }

        log::info!("Machine quitting");
        self.inner.router.quit().await;
        let _ = self.inner.events_tx.send(Control::Quit).await;
        let _ = self.inner.shutdown_tx.send(true);

        for (name, handle) in [("lamp", tasks.lamp), ("solenoid", tasks.solenoid), ("switch intake", tasks.intake)] {
            if let Some(mut link) = join_task(name, handle).await {
                if let Err(e) = link.close().await {
                    log::warn!("Error closing {}: {}", link.port(), e);
                }
            }
        }
        join_task("display", tasks.multiplexer).await;
        join_task("broadcast", tasks.broadcast).await;
        log::info!("Machine stopped");
    }

    pub fn config(&self) -> &MachineConfig {
        &self.inner.config
    }

    pub fn router(&self) -> &CommandRouter {
        &self.inner.router
    }

    pub(crate) fn observers(&self) -> &[Arc<dyn Observer>] {
        &self.inner.observers
    }

    pub(crate) fn context(&self) -> MutexGuard<'_, GameContext> {
        lock(&self.inner.context)
    }

    /// Copy of the whole context
    pub fn snapshot(&self) -> GameContext {
        self.context().clone()
    }

    pub fn stats(&self) -> GameStats {
        self.context().stats()
    }

    pub fn game_state(&self) -> GameState {
        self.context().game_state
    }

    pub fn player_state(&self) -> PlayerState {
        self.context().player_state
    }

    pub fn ball_in_play(&self) -> u32 {
        self.context().ball_in_play
    }

    pub fn current_player(&self) -> u8 {
        self.context().current_player
    }

    pub fn num_players(&self) -> u8 {
        self.context().num_players
    }

    pub fn ball_score(&self) -> i32 {
        self.context().ball_score
    }

    /// 1-based
    pub fn player_score(&self, player: u8) -> i32 {
        self.context().player_score(player)
    }

    pub fn is_game_in_play(&self) -> bool {
        self.context().ball_in_play > 0
    }

    pub fn is_quitting(&self) -> bool {
        self.context().quitting
    }

    pub fn is_test_mode(&self) -> bool {
        self.context().test_mode
    }

    pub fn set_test_mode(&self, enabled: bool) {
        log::info!("Test mode {}", if enabled { "enabled" } else { "disabled" });
        self.context().test_mode = enabled;
    }

    pub fn credits(&self) -> i32 {
        self.context().credits
    }

    pub async fn set_credits(&self, credits: i32) {
        self.context().credits = credits;
        self.inner.router.set_credits(credits).await;
    }

    pub async fn add_credit(&self) {
        let credits = {
            let mut ctx = self.context();
            ctx.credits += 1;
            ctx.credits
        };
        self.inner.router.set_credits(credits).await;
    }

    pub fn lamp_state(&self, lamp_id: u8) -> LampState {
        self.context().lamp_state(lamp_id)
    }

    /// Record and send a lamp state for each id
    pub async fn set_lamp_state(&self, lamp_ids: &[u8], state: LampState) {
        {
            let mut ctx = self.context();
            for id in lamp_ids {
                ctx.lamp_states.insert(*id, state);
            }
        }
        self.inner.router.set_lamp_state(lamp_ids, state).await;
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

    pub fn switch_pressed(&self, switch_id: u8) -> bool {
        lock(&self.inner.switch_states).is_pressed(switch_id)
    }

    /// Inject a switch event into the observer broadcast
    pub async fn broadcast_event(&self, event: SwitchEvent) {
        if self.inner.events_tx.send(Control::Data(event)).await.is_err() {
            log::warn!("Switch broadcast is closed; event {:?} dropped", event);
        }
    }

    async fn dispatch_switch(&self, event: SwitchEvent) {
        if let Some(diagnostic) = &self.inner.diagnostic {
            diagnostic.switch_handler(self, event).await;
        }
        if self.is_test_mode() {
            return;
        }
        for observer in self.observers() {
            observer.switch_handler(self, event).await;
        }
    }
}

async fn broadcast(machine: Machine, mut events_rx: mpsc::Receiver<Control<SwitchEvent>>) {
    log::debug!("Starting switch broadcast");
    while let Some(Control::Data(event)) = events_rx.recv().await {
        machine.dispatch_switch(event).await;
    }
    log::debug!("Switch broadcast stopped");
}

async fn join_task<T>(name: &str, handle: Option<JoinHandle<T>>) -> Option<T> {
    let handle = handle?;
    match timeout(TASK_JOIN_TIMEOUT, handle).await {
        Ok(Ok(value)) => Some(value),
        Ok(Err(e)) => {
            log::error!("{} task failed: {}", name, e);
            None
        }
        Err(_) => {
            log::warn!("{} task did not stop within {:?}", name, TASK_JOIN_TIMEOUT);
            None
        }
    }
}

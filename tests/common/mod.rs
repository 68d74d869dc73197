#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use flipctl::display::{
    digits_to_number, Digits, DisplayBuffer, OutputBackend, ServoOutput, BALL_IN_PLAY_OFFSET, CREDIT_UNIT,
};
use flipctl::serial::{LinkError, LinkIo, LinkOpener};
use flipctl::{Completion, Machine, Observer, SwitchEvent};

/// LinkIo that replays queued read chunks and records every write
#[derive(Clone, Default)]
pub struct ScriptedIo {
    reads: Arc<Mutex<VecDeque<Vec<u8>>>>,
    written: Arc<Mutex<Vec<u8>>>,
    closed: Arc<AtomicBool>,
}

impl ScriptedIo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_reads(chunks: Vec<Vec<u8>>) -> Self {
        let io = Self::new();
        for chunk in &chunks {
            io.push_read(chunk);
        }
        io
    }

    pub fn push_read(&self, chunk: &[u8]) {
        self.reads.lock().unwrap().push_back(chunk.to_vec());
    }

    pub fn written(&self) -> Vec<u8> {
        self.written.lock().unwrap().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl LinkIo for ScriptedIo {
    async fn write_all(&mut self, data: &[u8]) -> flipctl::serial::Result<()> {
        self.written.lock().unwrap().extend_from_slice(data);
        Ok(())
    }

    async fn read(&mut self, buffer: &mut [u8]) -> flipctl::serial::Result<usize> {
        let next = self.reads.lock().unwrap().pop_front();
        match next {
            Some(chunk) => {
                let n = chunk.len().min(buffer.len());
                buffer[..n].copy_from_slice(&chunk[..n]);
                Ok(n)
            }
            None => {
                tokio::time::sleep(Duration::from_millis(5)).await;
                Ok(0)
            }
        }
    }

    async fn close(&mut self) -> flipctl::serial::Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// LinkIo for an adapter that went away: reads hit EOF at once, writes fail
#[derive(Clone, Default)]
pub struct DeadIo {
    pub reads: Arc<AtomicUsize>,
    pub writes: Arc<AtomicUsize>,
}

#[async_trait::async_trait]
impl LinkIo for DeadIo {
    async fn write_all(&mut self, _data: &[u8]) -> flipctl::serial::Result<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        Err(LinkError::IoError(std::io::Error::from(std::io::ErrorKind::BrokenPipe)))
    }

    async fn read(&mut self, _buffer: &mut [u8]) -> flipctl::serial::Result<usize> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        Ok(0)
    }
}

/// Opener over a fixed port list; each port answers the identify request
/// with a scripted response
#[derive(Default)]
pub struct FakeOpener {
    ports: Vec<String>,
    responses: HashMap<String, Vec<u8>>,
    opened: Mutex<Vec<String>>,
    handles: Mutex<HashMap<String, ScriptedIo>>,
}

impl FakeOpener {
    /// `(port, identify response)`; an empty response never answers
    pub fn new(ports: &[(&str, &str)]) -> Self {
        Self {
            ports: ports.iter().map(|(p, _)| p.to_string()).collect(),
            responses: ports
                .iter()
                .map(|(p, r)| (p.to_string(), r.as_bytes().to_vec()))
                .collect(),
            ..Default::default()
        }
    }

    pub fn open_count(&self, port: &str) -> usize {
        self.opened.lock().unwrap().iter().filter(|p| p.as_str() == port).count()
    }

    /// Most recent io opened on `port`
    pub fn io(&self, port: &str) -> Option<ScriptedIo> {
        self.handles.lock().unwrap().get(port).cloned()
    }
}

#[async_trait::async_trait]
impl LinkOpener for FakeOpener {
    fn discover(&self) -> flipctl::serial::Result<Vec<String>> {
        Ok(self.ports.clone())
    }

    async fn open(&self, port: &str) -> flipctl::serial::Result<Box<dyn LinkIo>> {
        let response = self
            .responses
            .get(port)
            .ok_or_else(|| LinkError::PortNotFound(port.to_string()))?;
        self.opened.lock().unwrap().push(port.to_string());

        let io = if response.is_empty() {
            ScriptedIo::new()
        } else {
            ScriptedIo::with_reads(vec![response.clone()])
        };
        self.handles.lock().unwrap().insert(port.to_string(), io.clone());
        Ok(Box::new(io))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Emitted {
    Unit(usize, Digits),
    Sound(u8),
}

#[derive(Clone, Default)]
pub struct RecordingBackend {
    pub emitted: Arc<Mutex<Vec<Emitted>>>,
    pub refreshes: Arc<AtomicUsize>,
}

impl RecordingBackend {
    pub fn emitted(&self) -> Vec<Emitted> {
        self.emitted.lock().unwrap().clone()
    }

    /// Ball-in-play sub-field as last written, `None` while blank or untouched
    pub fn ball_in_play_shown(&self) -> Option<u64> {
        let credit_unit = self.emitted().iter().rev().find_map(|e| match e {
            Emitted::Unit(CREDIT_UNIT, digits) => Some(*digits),
            _ => None,
        })?;
        digits_to_number(&credit_unit[BALL_IN_PLAY_OFFSET..BALL_IN_PLAY_OFFSET + 2])
    }
}

impl OutputBackend for RecordingBackend {
    fn unit_changed(&mut self, unit: usize, digits: &Digits) -> flipctl::display::Result<()> {
        self.emitted.lock().unwrap().push(Emitted::Unit(unit, *digits));
        Ok(())
    }

    fn sound_changed(&mut self, code: u8) -> flipctl::display::Result<()> {
        self.emitted.lock().unwrap().push(Emitted::Sound(code));
        Ok(())
    }

    fn refresh(&mut self, _buffer: &DisplayBuffer, _sound: u8) -> flipctl::display::Result<()> {
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct RecordingServo {
    pub angles: Arc<Mutex<Vec<i32>>>,
}

impl ServoOutput for RecordingServo {
    fn set_angle(&mut self, angle: i32) -> flipctl::display::Result<()> {
        self.angles.lock().unwrap().push(angle);
        Ok(())
    }
}

/// Observer that logs every callback it receives
#[derive(Default)]
pub struct RecordingObserver {
    calls: Mutex<Vec<String>>,
    end_delay: Option<Duration>,
    hold_end: bool,
    held: Mutex<Vec<Completion>>,
}

impl RecordingObserver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Releases its player-end token after `delay`
    pub fn with_end_delay(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            end_delay: Some(delay),
            ..Default::default()
        })
    }

    /// Never releases its player-end tokens
    pub fn holding_end() -> Arc<Self> {
        Arc::new(Self {
            hold_end: true,
            ..Default::default()
        })
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: impl Into<String>) {
        self.calls.lock().unwrap().push(call.into());
    }
}

#[async_trait::async_trait]
impl Observer for RecordingObserver {
    async fn init(&self, _machine: &Machine) {
        self.record("init");
    }

    async fn game_start(&self, _machine: &Machine) {
        self.record("game_start");
    }

    async fn player_added(&self, _machine: &Machine, player: u8) {
        self.record(format!("player_added:{}", player));
    }

    async fn player_start(&self, _machine: &Machine, player: u8) {
        self.record(format!("player_start:{}", player));
    }

    async fn player_up(&self, _machine: &Machine, player: u8) {
        self.record(format!("player_up:{}", player));
    }

    async fn player_end(&self, _machine: &Machine, player: u8, done: Completion) {
        self.record(format!("player_end:{}", player));
        if self.hold_end {
            self.held.lock().unwrap().push(done);
        } else if let Some(delay) = self.end_delay {
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                done.done();
            });
        } else {
            done.done();
        }
    }

    async fn player_finish(&self, _machine: &Machine, player: u8) {
        self.record(format!("player_finish:{}", player));
    }

    async fn switch_handler(&self, _machine: &Machine, event: SwitchEvent) {
        self.record(format!("switch:{}:{}", event.switch_id, event.pressed));
    }

    async fn ball_drained(&self, _machine: &Machine) {
        self.record("ball_drained");
    }

    async fn game_over(&self, _machine: &Machine) {
        self.record("game_over");
    }
}

/// Poll `check` until it holds or `limit` elapses
pub async fn wait_until<F, Fut>(limit: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + limit;
    loop {
        if check().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

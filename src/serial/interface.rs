use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_serial::{SerialPortBuilderExt, SerialStream};

use super::protocol::{DeviceMessage, PeripheralRole, ShortFieldWidth};
use super::{LinkError, Result};

// Arduino-based controllers run their UART at this rate
pub const BAUD_RATE: u32 = 38400;

/// Device node name fragments of the USB-serial adapters the controllers use
pub const USB_SERIAL_PATTERNS: [&str; 2] = ["tty.usbserial", "ttyUSB"];

/// Byte-level duplex transport behind a [`PeripheralLink`]
#[async_trait::async_trait]
pub trait LinkIo: Send {
    async fn write_all(&mut self, data: &[u8]) -> Result<()>;

    /// Read whatever is available, blocking until at least one byte arrives
    async fn read(&mut self, buffer: &mut [u8]) -> Result<usize>;

    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Discovers and opens ports for connection logic
#[async_trait::async_trait]
pub trait LinkOpener: Send + Sync {
    fn discover(&self) -> Result<Vec<String>>;

    async fn open(&self, port: &str) -> Result<Box<dyn LinkIo>>;
}

pub fn matches_usb_serial(port_name: &str) -> bool {
    USB_SERIAL_PATTERNS.iter().any(|pattern| port_name.contains(pattern))
}

/// Enumerate host serial ports that look like the controllers' USB adapters
pub fn discover_ports() -> Result<Vec<String>> {
    let ports = serialport::available_ports()?;
    let found: Vec<String> = ports
        .into_iter()
        .map(|p| p.port_name)
        .filter(|name| matches_usb_serial(name))
        .collect();

    for port in &found {
        log::debug!("Found candidate controller at {}", port);
    }
    Ok(found)
}

/// Async serial stream for a real controller
pub struct SerialLinkIo {
    stream: SerialStream,
}

impl SerialLinkIo {
    pub fn open(port_name: &str, baud_rate: u32) -> Result<Self> {
        let stream = tokio_serial::new(port_name, baud_rate)
            .timeout(Duration::from_millis(1000))
            .open_native_async()
            .map_err(|e| match e.kind {
                tokio_serial::ErrorKind::NoDevice => LinkError::PortNotFound(port_name.to_string()),
                _ => LinkError::ConnectionFailed(format!("{}: {}", port_name, e)),
            })?;
        Ok(Self { stream })
    }
}

#[async_trait::async_trait]
impl LinkIo for SerialLinkIo {
    async fn write_all(&mut self, data: &[u8]) -> Result<()> {
        self.stream.write_all(data).await?;
        self.stream.flush().await?;
        Ok(())
    }

    async fn read(&mut self, buffer: &mut [u8]) -> Result<usize> {
        match self.stream.read(buffer).await {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => Err(LinkError::Timeout),
            Err(e) => Err(LinkError::IoError(e)),
        }
    }

    async fn close(&mut self) -> Result<()> {
        self.stream.shutdown().await?;
        Ok(())
    }
}

/// Opens real serial ports at a fixed baud rate
pub struct SerialOpener {
    pub baud_rate: u32,
}

impl Default for SerialOpener {
    fn default() -> Self {
        Self { baud_rate: BAUD_RATE }
    }
}

#[async_trait::async_trait]
impl LinkOpener for SerialOpener {
    fn discover(&self) -> Result<Vec<String>> {
        discover_ports()
    }

    async fn open(&self, port: &str) -> Result<Box<dyn LinkIo>> {
        let io = SerialLinkIo::open(port, self.baud_rate)?;
        Ok(Box::new(io))
    }
}

/// Console-mode stand-in: writes are recorded, reads never produce data
#[derive(Clone, Default)]
pub struct SimulatedIo {
    written: Arc<Mutex<Vec<u8>>>,
}

impl SimulatedIo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything written so far
    pub fn written(&self) -> Vec<u8> {
        self.written
            .lock()
            .map(|w| w.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }
}

#[async_trait::async_trait]
impl LinkIo for SimulatedIo {
    async fn write_all(&mut self, data: &[u8]) -> Result<()> {
        let mut written = self
            .written
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        written.extend_from_slice(data);
        Ok(())
    }

    async fn read(&mut self, _buffer: &mut [u8]) -> Result<usize> {
        Ok(0)
    }
}

/// One open connection to a peripheral controller
pub struct PeripheralLink {
    port: String,
    role: PeripheralRole,
    io: Box<dyn LinkIo>,
    simulated: bool,
    closed: bool,
}

impl PeripheralLink {
    pub fn new(port: impl Into<String>, role: PeripheralRole, io: Box<dyn LinkIo>) -> Self {
        Self {
            port: port.into(),
            role,
            io,
            simulated: false,
            closed: false,
        }
    }

    /// Link that bypasses hardware entirely (console mode)
    pub fn simulated(role: PeripheralRole) -> Self {
        Self::simulated_with(role, SimulatedIo::new())
    }

    pub fn simulated_with(role: PeripheralRole, io: SimulatedIo) -> Self {
        Self {
            port: format!("console:{}", role.as_str()),
            role,
            io: Box::new(io),
            simulated: true,
            closed: false,
        }
    }

    pub fn port(&self) -> &str {
        &self.port
    }

    pub fn role(&self) -> PeripheralRole {
        self.role
    }

    pub fn is_simulated(&self) -> bool {
        self.simulated
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Write a long-form `[0x00, id, value]` frame
    pub async fn send(&mut self, msg: DeviceMessage) -> Result<()> {
        self.write(&msg.encode_long()).await
    }

    /// Write a single-byte short message
    pub async fn send_short(&mut self, msg: DeviceMessage, width: ShortFieldWidth) -> Result<()> {
        self.write(&[msg.encode_short(width)]).await
    }

    pub async fn write(&mut self, data: &[u8]) -> Result<()> {
        if self.closed {
            return Err(LinkError::ConnectionFailed(format!("{} is closed", self.port)));
        }
        self.io.write_all(data).await.map_err(|e| {
            log::error!("Write to {} ({}) failed: {}", self.port, self.role.as_str(), e);
            e
        })
    }

    pub async fn read(&mut self, buffer: &mut [u8]) -> Result<usize> {
        if self.closed {
            return Err(LinkError::ConnectionFailed(format!("{} is closed", self.port)));
        }
        self.io.read(buffer).await
    }

    /// Close a real link; simulated links and already-closed links are left alone
    pub async fn close(&mut self) -> Result<()> {
        if self.simulated || self.closed {
            return Ok(());
        }
        self.closed = true;
        log::info!("Closing {} link on {}", self.role.as_str(), self.port);
        self.io.close().await
    }
}

impl std::fmt::Debug for PeripheralLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeripheralLink")
            .field("port", &self.port)
            .field("role", &self.role)
            .field("simulated", &self.simulated)
            .field("closed", &self.closed)
            .finish()
    }
}

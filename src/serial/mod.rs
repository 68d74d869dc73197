pub mod identify;
pub mod interface;
pub mod protocol;

pub use identify::{IdentifyEvent, IdentifyState};
pub use interface::{
    discover_ports, matches_usb_serial, LinkIo, LinkOpener, PeripheralLink, SerialLinkIo,
    SerialOpener, SimulatedIo,
};
pub use protocol::{DeviceMessage, PeripheralRole, ShortFieldWidth, SwitchEvent};

#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("Port not found: {0}")]
    PortNotFound(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Communication timeout")]
    Timeout,

    #[error("Protocol error: {0}")]
    ProtocolError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialport error: {0}")]
    SerialportError(#[from] serialport::Error),
}

pub type Result<T> = std::result::Result<T, LinkError>;

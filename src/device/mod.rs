pub mod manager;

pub use manager::{ConnectOptions, DeviceSet};

use crate::serial::PeripheralRole;

#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("Required controllers not identified: {0:?}")]
    MissingRoles(Vec<PeripheralRole>),

    #[error("Device not connected: {0:?}")]
    NotConnected(PeripheralRole),

    #[error("Serial communication error: {0}")]
    SerialError(#[from] crate::serial::LinkError),
}

pub type Result<T> = std::result::Result<T, DeviceError>;

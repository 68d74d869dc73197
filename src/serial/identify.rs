//! Request/response handshake used to learn which controller sits behind a port
//!
//! Port enumeration order is not stable across boots, so every peripheral
//! announces its role when it receives [`IDENTIFY_REQUEST`]. The handshake is
//! kept as a pure state machine; [`identify`] drives it over a [`LinkIo`].

use std::time::Duration;
use tokio::time::{sleep, timeout, Instant};

use super::interface::LinkIo;
use super::protocol::{PeripheralRole, IDENTIFY_REQUEST};
use super::{LinkError, Result};

const RESPONSE_BUFFER: usize = 128;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentifyState {
    /// Port is open, nothing written yet
    Opened,
    /// Request byte written; collecting response bytes
    AwaitingResponse { received: Vec<u8> },
    Identified(PeripheralRole),
    /// Request written but the window closed with nothing received
    NoResponse,
    Failed(String),
}

#[derive(Debug)]
pub enum IdentifyEvent<'a> {
    RequestWritten,
    Bytes(&'a [u8]),
    /// Read window closed
    TimedOut,
    IoFailed(String),
}

impl IdentifyState {
    pub fn advance(self, event: IdentifyEvent<'_>) -> IdentifyState {
        match (self, event) {
            (_, IdentifyEvent::IoFailed(reason)) => IdentifyState::Failed(reason),
            (IdentifyState::Opened, IdentifyEvent::RequestWritten) => {
                IdentifyState::AwaitingResponse { received: Vec::new() }
            }
            (IdentifyState::AwaitingResponse { mut received }, IdentifyEvent::Bytes(bytes)) => {
                received.extend_from_slice(bytes);
                match PeripheralRole::from_response(&received) {
                    PeripheralRole::Unknown => IdentifyState::AwaitingResponse { received },
                    role => IdentifyState::Identified(role),
                }
            }
            (IdentifyState::AwaitingResponse { received }, IdentifyEvent::TimedOut) => {
                if received.is_empty() {
                    IdentifyState::NoResponse
                } else {
                    IdentifyState::Identified(PeripheralRole::Unknown)
                }
            }
            (IdentifyState::Opened, IdentifyEvent::TimedOut) => {
                IdentifyState::Failed("identification request never written".to_string())
            }
            (state @ IdentifyState::Identified(_), _)
            | (state @ IdentifyState::NoResponse, _)
            | (state @ IdentifyState::Failed(_), _) => state,
            (state, event) => {
                IdentifyState::Failed(format!("unexpected {:?} while {:?}", event, state))
            }
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(
            self,
            IdentifyState::Identified(_) | IdentifyState::NoResponse | IdentifyState::Failed(_)
        )
    }
}

/// Run the identification handshake on an already opened link.
///
/// `settle` is waited after opening before the request goes out (boards that
/// reset on open need it); `window` bounds how long response bytes are
/// collected.
pub async fn identify(io: &mut dyn LinkIo, settle: Duration, window: Duration) -> Result<PeripheralRole> {
    if !settle.is_zero() {
        sleep(settle).await;
    }

    let mut state = IdentifyState::Opened;
    state = match io.write_all(&[IDENTIFY_REQUEST]).await {
        Ok(()) => state.advance(IdentifyEvent::RequestWritten),
        Err(e) => state.advance(IdentifyEvent::IoFailed(e.to_string())),
    };

    let deadline = Instant::now() + window;
    let mut buffer = [0u8; RESPONSE_BUFFER];
    while !state.is_finished() {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            state = state.advance(IdentifyEvent::TimedOut);
            break;
        }
        state = match timeout(remaining, io.read(&mut buffer)).await {
            Ok(Ok(0)) => {
                sleep(Duration::from_millis(10)).await;
                continue;
            }
            Ok(Ok(n)) => state.advance(IdentifyEvent::Bytes(&buffer[..n])),
            Ok(Err(LinkError::Timeout)) | Err(_) => state.advance(IdentifyEvent::TimedOut),
            Ok(Err(e)) => state.advance(IdentifyEvent::IoFailed(e.to_string())),
        };
    }

    match state {
        IdentifyState::Identified(role) => Ok(role),
        IdentifyState::Failed(reason) => Err(LinkError::ProtocolError(reason)),
        _ => Err(LinkError::Timeout),
    }
}

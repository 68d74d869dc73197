use crate::serial::{PeripheralLink, Result, SwitchEvent};

/// Most bytes taken from the switch matrix in one read
pub const SWITCH_READ_SIZE: usize = 16;

/// Event returned on every poll of a simulated switch matrix
pub const SIMULATED_EVENT: SwitchEvent = SwitchEvent {
    switch_id: 1,
    pressed: false,
};

/// Block on the switch matrix link and decode every status byte it delivers.
///
/// A zero-byte read is logged and returned as an empty batch so the caller
/// can simply poll again.
pub async fn read_switch_events(link: &mut PeripheralLink) -> Result<Vec<SwitchEvent>> {
    if link.is_simulated() {
        log::debug!("Switch {} pressed = {}", SIMULATED_EVENT.switch_id, SIMULATED_EVENT.pressed);
        return Ok(vec![SIMULATED_EVENT]);
    }

    let mut buffer = [0u8; SWITCH_READ_SIZE];
    let n = link.read(&mut buffer).await.map_err(|e| {
        log::error!("Error reading switch: {}", e);
        e
    })?;

    if n == 0 {
        log::warn!("Switch matrix on {} returned no bytes; link may be stalled", link.port());
        return Ok(Vec::new());
    }

    let events: Vec<SwitchEvent> = buffer[..n].iter().map(|b| SwitchEvent::decode(*b)).collect();
    for (byte, event) in buffer[..n].iter().zip(&events) {
        log::debug!("SW received: {:#04x}, switch_id={}, pressed={}", byte, event.switch_id, event.pressed);
    }
    Ok(events)
}

use std::sync::Arc;
use std::time::Duration;

use crate::serial::identify::identify;
use crate::serial::{LinkOpener, PeripheralLink, PeripheralRole};
use super::{DeviceError, Result};

/// The roles every machine needs before the game can run
pub const MANDATORY_ROLES: [PeripheralRole; 3] = [
    PeripheralRole::SwitchMatrix,
    PeripheralRole::Ldu,
    PeripheralRole::Sdu,
];

/// Timing used while identifying and (re)connecting
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    pub settle: Duration,
    pub response_window: Duration,
    pub attempts: u32,
    pub backoff: Duration,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            settle: Duration::from_millis(100),
            response_window: Duration::from_millis(1000),
            attempts: 5,
            backoff: Duration::from_secs(1),
        }
    }
}

/// Role slots for the three peripheral controllers
pub struct DeviceSet {
    opener: Arc<dyn LinkOpener>,
    ports: Vec<String>,
    switch_matrix: Option<PeripheralLink>,
    ldu: Option<PeripheralLink>,
    sdu: Option<PeripheralLink>,
}

impl DeviceSet {
    pub fn new(opener: Arc<dyn LinkOpener>) -> Self {
        Self {
            opener,
            ports: Vec::new(),
            switch_matrix: None,
            ldu: None,
            sdu: None,
        }
    }

    /// A set whose every slot holds a simulated link
    pub fn simulated(opener: Arc<dyn LinkOpener>) -> Self {
        let mut set = Self::new(opener);
        set.switch_matrix = Some(PeripheralLink::simulated(PeripheralRole::SwitchMatrix));
        set.ldu = Some(PeripheralLink::simulated(PeripheralRole::Ldu));
        set.sdu = Some(PeripheralLink::simulated(PeripheralRole::Sdu));
        set
    }

    /// Refresh the cached candidate port list. Does not open anything.
    pub fn discover_ports(&mut self) -> Result<&[String]> {
        self.ports = self.opener.discover()?;
        log::debug!("Discovered {} candidate port(s)", self.ports.len());
        Ok(&self.ports)
    }

    pub fn ports(&self) -> &[String] {
        &self.ports
    }

    /// Open and identify one port. Unknown peripherals are closed and reported
    /// as `PeripheralRole::Unknown`.
    pub async fn identify(&self, port: &str, options: &ConnectOptions) -> Result<(PeripheralRole, Option<PeripheralLink>)> {
        let mut io = self.opener.open(port).await?;
        let role = match identify(io.as_mut(), options.settle, options.response_window).await {
            Ok(role) => role,
            Err(e) => {
                let _ = io.close().await;
                return Err(e.into());
            }
        };

        if role == PeripheralRole::Unknown {
            log::info!("Unknown connected device: {}", port);
            let _ = io.close().await;
            return Ok((role, None));
        }
        Ok((role, Some(PeripheralLink::new(port, role, io))))
    }

    /// Identify every candidate port and fill the role slots.
    ///
    /// Returns true only when all mandatory roles are assigned. Failures on
    /// individual ports are logged and skipped.
    pub async fn connect_all(&mut self, options: &ConnectOptions) -> bool {
        // Links from an earlier attempt hold their ports open
        self.disconnect_all().await;

        if self.ports.is_empty() {
            if let Err(e) = self.discover_ports() {
                log::error!("Port discovery failed: {}", e);
                return false;
            }
        }

        let ports = self.ports.clone();
        for port in ports {
            match self.identify(&port, options).await {
                Ok((role, Some(link))) => {
                    log::info!("{} controller connected at {}", role.as_str(), port);
                    let Some(slot) = self.slot_mut(role) else { continue };
                    if let Some(mut previous) = slot.replace(link) {
                        log::warn!("Second {} controller at {}; replacing {}", role.as_str(), port, previous.port());
                        let _ = previous.close().await;
                    }
                }
                Ok((_, None)) => {}
                Err(e) => log::warn!("Could not identify {}: {}", port, e),
            }
        }

        self.missing_roles().is_empty()
    }

    /// `connect_all` with a fixed backoff between attempts
    pub async fn connect_with_retry(&mut self, options: &ConnectOptions) -> Result<()> {
        for attempt in 1..=options.attempts.max(1) {
            if self.connect_all(options).await {
                log::info!("All controllers connected on attempt {}", attempt);
                return Ok(());
            }
            log::warn!("Devices were unable to connect, try {}", attempt);
            if attempt < options.attempts {
                tokio::time::sleep(options.backoff).await;
            }
        }

        let missing = self.missing_roles();
        log::error!("Devices were unable to connect, missing {:?}. Check USB connections", missing);
        Err(DeviceError::MissingRoles(missing))
    }

    /// Close every open, non-simulated link. Safe to call repeatedly.
    pub async fn disconnect_all(&mut self) {
        for slot in [&mut self.switch_matrix, &mut self.ldu, &mut self.sdu] {
            if let Some(link) = slot.as_mut() {
                if link.is_simulated() {
                    continue;
                }
                if let Err(e) = link.close().await {
                    log::warn!("Error closing {}: {}", link.port(), e);
                }
            }
            *slot = None;
        }
    }

    pub fn missing_roles(&self) -> Vec<PeripheralRole> {
        MANDATORY_ROLES
            .into_iter()
            .filter(|role| self.link(*role).is_none())
            .collect()
    }

    pub fn is_connected(&self, role: PeripheralRole) -> bool {
        self.link(role).is_some()
    }

    pub fn link(&self, role: PeripheralRole) -> Option<&PeripheralLink> {
        match role {
            PeripheralRole::SwitchMatrix => self.switch_matrix.as_ref(),
            PeripheralRole::Ldu => self.ldu.as_ref(),
            PeripheralRole::Sdu => self.sdu.as_ref(),
            PeripheralRole::Unknown => None,
        }
    }

    /// Hand a link over to the task that will drive it
    pub fn take(&mut self, role: PeripheralRole) -> Result<PeripheralLink> {
        self.slot_mut(role)
            .and_then(Option::take)
            .ok_or(DeviceError::NotConnected(role))
    }

    fn slot_mut(&mut self, role: PeripheralRole) -> Option<&mut Option<PeripheralLink>> {
        match role {
            PeripheralRole::SwitchMatrix => Some(&mut self.switch_matrix),
            PeripheralRole::Ldu => Some(&mut self.ldu),
            PeripheralRole::Sdu => Some(&mut self.sdu),
            PeripheralRole::Unknown => None,
        }
    }
}

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::device::ConnectOptions;
use crate::display::i2c::DISPLAY_ADDRESS;
use crate::display::{ServoSettings, MAX_PLAYER_DISPLAYS};
use crate::serial::interface::BAUD_RATE;
use crate::serial::ShortFieldWidth;

/// Wire conventions that differ between controller firmware revisions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncodingConfig {
    /// Added to every lamp value before it is written
    pub lamp_value_bias: u16,
    pub solenoid_field_width: ShortFieldWidth,
}

impl Default for EncodingConfig {
    fn default() -> Self {
        Self {
            lamp_value_bias: 1,
            solenoid_field_width: ShortFieldWidth::Three,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    pub i2c_address: u8,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            i2c_address: DISPLAY_ADDRESS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MachineConfig {
    pub max_players: u8,
    pub total_balls: u32,
    /// Run without hardware: every link is simulated
    pub console_mode: bool,
    pub baud_rate: u32,
    pub connect_attempts: u32,
    pub connect_backoff_ms: u64,
    pub identify_settle_ms: u64,
    pub identify_timeout_ms: u64,
    pub keepalive_ms: u64,
    pub sound_dwell_ms: u64,
    pub refresh_interval_ms: u64,
    pub player_end_timeout_ms: u64,
    pub command_queue_capacity: usize,
    pub switch_queue_capacity: usize,
    pub simulated_switch_interval_ms: u64,
    pub encoding: EncodingConfig,
    pub display: DisplayConfig,
    pub servo: Option<ServoSettings>,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            max_players: 4,
            total_balls: 3,
            console_mode: false,
            baud_rate: BAUD_RATE,
            connect_attempts: 5,
            connect_backoff_ms: 1000,
            identify_settle_ms: 100,
            identify_timeout_ms: 1000,
            keepalive_ms: 250,
            sound_dwell_ms: 100,
            refresh_interval_ms: 5,
            player_end_timeout_ms: 30_000,
            command_queue_capacity: 64,
            switch_queue_capacity: 100,
            simulated_switch_interval_ms: 1000,
            encoding: EncodingConfig::default(),
            display: DisplayConfig::default(),
            servo: None,
        }
    }
}

impl MachineConfig {
    pub fn from_json_str(json: &str) -> anyhow::Result<Self> {
        let config: Self = serde_json::from_str(json).context("Failed to parse machine config")?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read machine config {}", path.display()))?;
        let config = Self::from_json_str(&json)?;
        log::info!("Loaded machine config from {}", path.display());
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_players == 0 || self.max_players > MAX_PLAYER_DISPLAYS {
            bail!("max_players must be between 1 and {}, got {}", MAX_PLAYER_DISPLAYS, self.max_players);
        }
        if self.total_balls == 0 {
            bail!("total_balls must be at least 1");
        }
        if self.command_queue_capacity == 0 || self.switch_queue_capacity == 0 {
            bail!("queue capacities must be non-zero");
        }
        if let Some(servo) = &self.servo {
            if servo.pulse_min_us >= servo.pulse_max_us {
                bail!(
                    "servo pulse_min_us ({}) must be below pulse_max_us ({})",
                    servo.pulse_min_us,
                    servo.pulse_max_us
                );
            }
        }
        Ok(())
    }

    pub fn connect_options(&self) -> ConnectOptions {
        ConnectOptions {
            settle: Duration::from_millis(self.identify_settle_ms),
            response_window: Duration::from_millis(self.identify_timeout_ms),
            attempts: self.connect_attempts,
            backoff: Duration::from_millis(self.connect_backoff_ms),
        }
    }

    pub fn keepalive(&self) -> Duration {
        Duration::from_millis(self.keepalive_ms)
    }

    pub fn sound_dwell(&self) -> Duration {
        Duration::from_millis(self.sound_dwell_ms)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.refresh_interval_ms)
    }

    pub fn player_end_timeout(&self) -> Duration {
        Duration::from_millis(self.player_end_timeout_ms)
    }

    pub fn simulated_switch_interval(&self) -> Duration {
        Duration::from_millis(self.simulated_switch_interval_ms)
    }
}

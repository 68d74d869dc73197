use serde::{Deserialize, Serialize};

/// Identification request byte written to every candidate port
pub const IDENTIFY_REQUEST: u8 = b'|';

/// Leading byte of every long-form control frame
pub const FRAME_START: u8 = 0x00;

/// Frame sent to the lamp driver when the lamp queue has been idle
pub const KEEPALIVE: DeviceMessage = DeviceMessage { id: 0, value: 0 };

/// Lamp states as the host enumerates them (before the wire bias)
pub const LAMP_OFF: u16 = 0;
pub const LAMP_ON: u16 = 1;
pub const LAMP_SLOW_BLINK: u16 = 2;
pub const LAMP_FAST_BLINK: u16 = 3;

/// Solenoid codes understood by the SDU firmware
pub const SOLENOID_OFF: u16 = 0;
pub const SOLENOID_FIRE_PULSE: u16 = 2; // roughly a 100ms pulse
pub const SOLENOID_ALWAYS_ON: u16 = 0x07;
pub const SOLENOID_INVALID_FLOOR: u16 = 255;

pub const FLIPPER_RELAY_ID: u8 = 0x0F;
pub const FLIPPER_ENABLE: u16 = 0x03;
pub const FLIPPER_DISABLE: u16 = 0x02;

/// Controller role a peripheral reports during identification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PeripheralRole {
    SwitchMatrix,
    Ldu,
    Sdu,
    Unknown,
}

impl PeripheralRole {
    /// Map a single response byte to the role it announces
    pub fn from_id_byte(byte: u8) -> Option<Self> {
        match byte {
            b'a' => Some(PeripheralRole::SwitchMatrix),
            b'b' => Some(PeripheralRole::Ldu),
            b'c' => Some(PeripheralRole::Sdu),
            _ => None,
        }
    }

    /// Resolve a whole identification response. Firmware may emit boot noise
    /// before its role byte, so the last recognizable byte wins.
    pub fn from_response(response: &[u8]) -> Self {
        response
            .iter()
            .rev()
            .find_map(|b| Self::from_id_byte(*b))
            .unwrap_or(PeripheralRole::Unknown)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PeripheralRole::SwitchMatrix => "switch matrix",
            PeripheralRole::Ldu => "LDU",
            PeripheralRole::Sdu => "SDU",
            PeripheralRole::Unknown => "unknown",
        }
    }
}

/// Number of low bits carrying the value in a short message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum ShortFieldWidth {
    Two,
    Three,
}

impl ShortFieldWidth {
    pub fn bits(self) -> u8 {
        match self {
            ShortFieldWidth::Two => 2,
            ShortFieldWidth::Three => 3,
        }
    }

    pub fn value_mask(self) -> u8 {
        (1u8 << self.bits()) - 1
    }
}

impl TryFrom<u8> for ShortFieldWidth {
    type Error = String;

    fn try_from(bits: u8) -> std::result::Result<Self, Self::Error> {
        match bits {
            2 => Ok(ShortFieldWidth::Two),
            3 => Ok(ShortFieldWidth::Three),
            other => Err(format!("unsupported short message field width: {}", other)),
        }
    }
}

impl From<ShortFieldWidth> for u8 {
    fn from(width: ShortFieldWidth) -> Self {
        width.bits()
    }
}

/// One unit of outbound control for a peripheral
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceMessage {
    pub id: u8,
    pub value: u16,
}

impl DeviceMessage {
    pub fn new(id: u8, value: u16) -> Self {
        Self { id, value }
    }

    /// Long form: `[0x00, id, value]`
    pub fn encode_long(&self) -> [u8; 3] {
        [FRAME_START, self.id, self.value as u8]
    }

    /// Short form: id in the high bits, value masked into the low `width` bits
    pub fn encode_short(&self, width: ShortFieldWidth) -> u8 {
        (self.id << width.bits()) | (self.value as u8 & width.value_mask())
    }

    pub fn decode_short(byte: u8, width: ShortFieldWidth) -> Self {
        Self {
            id: byte >> width.bits(),
            value: u16::from(byte & width.value_mask()),
        }
    }

    /// Apply the lamp wire bias (host Off=0 is firmware Off=1)
    pub fn with_bias(self, bias: u16) -> Self {
        Self {
            id: self.id,
            value: self.value + bias,
        }
    }
}

/// Switch edge reported by the switch matrix
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwitchEvent {
    pub switch_id: u8,
    pub pressed: bool,
}

impl SwitchEvent {
    pub fn new(switch_id: u8, pressed: bool) -> Self {
        Self { switch_id, pressed }
    }

    /// Low bit set means released; the remaining bits are the switch id
    pub fn decode(byte: u8) -> Self {
        Self {
            switch_id: byte >> 1,
            pressed: byte & 0x01 == 0,
        }
    }

    pub fn encode(&self) -> u8 {
        (self.switch_id << 1) | u8::from(!self.pressed)
    }
}

//! Bit positions and packed sub-fields of the controller's registers.
//!
//! This table is shared by the decoder and by anything presenting state,
//! so nothing has to re-derive bit meanings from raw words.

use crate::prelude::*;
use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::Serialize;

// AlarmModeBit {{{
/// Register 0, alarm and mode flags.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, IntoPrimitive, TryFromPrimitive, Serialize)]
#[repr(u16)]
pub enum AlarmModeBit {
    FloorWashing = 1 << 0,
    AlarmZone1 = 1 << 1,
    AlarmZone2 = 1 << 2,
    BatteryDrain = 1 << 3,
    LostConnection = 1 << 4,
    CloseGroup1OnSensorLoss = 1 << 5,
    CloseGroup2OnSensorLoss = 1 << 6,
    WirelessPairing = 1 << 7,
    Zone1 = 1 << 8,
    Zone2 = 1 << 9,
    DualZoneMode = 1 << 10,
    CloseTapsOnSensorLost = 1 << 11,
    KeypadLocks = 1 << 12,
}

impl AlarmModeBit {
    pub const ALL: [AlarmModeBit; 13] = [
        Self::FloorWashing,
        Self::AlarmZone1,
        Self::AlarmZone2,
        Self::BatteryDrain,
        Self::LostConnection,
        Self::CloseGroup1OnSensorLoss,
        Self::CloseGroup2OnSensorLoss,
        Self::WirelessPairing,
        Self::Zone1,
        Self::Zone2,
        Self::DualZoneMode,
        Self::CloseTapsOnSensorLost,
        Self::KeypadLocks,
    ];

    pub fn mask(self) -> u16 {
        self.into()
    }

    pub fn is_set(self, raw: u16) -> bool {
        raw & self.mask() == self.mask()
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::FloorWashing => "floor_washing_mode",
            Self::AlarmZone1 => "alarm_zone_1",
            Self::AlarmZone2 => "alarm_zone_2",
            Self::BatteryDrain => "battery_drain_wireless_sensors",
            Self::LostConnection => "lost_connection_wireless_sensors",
            Self::CloseGroup1OnSensorLoss => "close_group_1_on_sensor_loss",
            Self::CloseGroup2OnSensorLoss => "close_group_2_on_sensor_loss",
            Self::WirelessPairing => "wireless_pairing",
            Self::Zone1 => "zone_1",
            Self::Zone2 => "zone_2",
            Self::DualZoneMode => "dual_zone_mode",
            Self::CloseTapsOnSensorLost => "close_taps_on_sensor_lost",
            Self::KeypadLocks => "keypad_locks",
        }
    }
}

/// Both valve zones together.
pub const MASK_ZONE_BOTH: u16 = (1 << 8) | (1 << 9);
// }}}

// AlarmMode {{{
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct AlarmMode {
    pub floor_washing_mode: bool,
    pub alarm_zone_1: bool,
    pub alarm_zone_2: bool,
    pub battery_drain: bool,
    pub lost_connection: bool,
    pub close_group_1_on_sensor_loss: bool,
    pub close_group_2_on_sensor_loss: bool,
    pub wireless_pairing: bool,
    pub zone_1: bool,
    pub zone_2: bool,
    pub dual_zone_mode: bool,
    pub close_taps_on_sensor_lost: bool,
    pub keypad_locks: bool,
}

impl AlarmMode {
    pub fn new(raw: u16) -> Self {
        use AlarmModeBit::*;

        Self {
            floor_washing_mode: FloorWashing.is_set(raw),
            alarm_zone_1: AlarmZone1.is_set(raw),
            alarm_zone_2: AlarmZone2.is_set(raw),
            battery_drain: BatteryDrain.is_set(raw),
            lost_connection: LostConnection.is_set(raw),
            close_group_1_on_sensor_loss: CloseGroup1OnSensorLoss.is_set(raw),
            close_group_2_on_sensor_loss: CloseGroup2OnSensorLoss.is_set(raw),
            wireless_pairing: WirelessPairing.is_set(raw),
            zone_1: Zone1.is_set(raw),
            zone_2: Zone2.is_set(raw),
            dual_zone_mode: DualZoneMode.is_set(raw),
            close_taps_on_sensor_lost: CloseTapsOnSensorLost.is_set(raw),
            keypad_locks: KeypadLocks.is_set(raw),
        }
    }

    /// Zone 2 is only independently switchable in dual zone mode.
    pub fn zone_2_available(&self) -> bool {
        self.dual_zone_mode
    }
} // }}}

/// Sets zone 1. Outside dual zone mode both valves move together.
pub fn set_zone_1(raw: u16, open: bool) -> u16 {
    let mask = if AlarmModeBit::DualZoneMode.is_set(raw) {
        AlarmModeBit::Zone1.mask()
    } else {
        MASK_ZONE_BOTH
    };

    if open {
        raw | mask
    } else {
        raw & !mask
    }
}

/// Reads `width` bits starting at `shift`.
pub fn field(raw: u16, shift: u8, width: u8) -> u16 {
    (raw >> shift) & ((1u16 << width) - 1)
}

/// Replaces `width` bits starting at `shift` with `value`.
pub fn with_field(raw: u16, shift: u8, width: u8, value: u16) -> u16 {
    let mask = ((1u16 << width) - 1) << shift;
    (raw & !mask) | ((value << shift) & mask)
}

// enumerations {{{
#[derive(Clone, Copy, Debug, Eq, PartialEq, IntoPrimitive, TryFromPrimitive, Serialize)]
#[repr(u16)]
pub enum ValveGroup {
    None = 0,
    Group1 = 1,
    Group2 = 2,
    Both = 3,
}

impl FromStr for ValveGroup {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "none" => Self::None,
            "group_1" => Self::Group1,
            "group_2" => Self::Group2,
            "both" | "group_1_2" => Self::Both,
            _ => bail!("unknown valve group {}", s),
        })
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, IntoPrimitive, TryFromPrimitive, Serialize)]
#[repr(u16)]
pub enum LineType {
    Sensors = 0,
    Button = 1,
}

impl FromStr for LineType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "sensors" => Self::Sensors,
            "button" => Self::Button,
            _ => bail!("unknown line type {}", s),
        })
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, IntoPrimitive, TryFromPrimitive, Serialize)]
#[repr(u16)]
pub enum ConnectionType {
    Normal = 0,
    Namur = 1,
}

impl FromStr for ConnectionType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "normal" => Self::Normal,
            "namur" => Self::Namur,
            _ => bail!("unknown connection type {}", s),
        })
    }
}

/// Litres per counter pulse.
#[derive(Clone, Copy, Debug, Eq, PartialEq, IntoPrimitive, TryFromPrimitive, Serialize)]
#[repr(u16)]
pub enum CounterStep {
    One = 1,
    Ten = 10,
    Hundred = 100,
}

impl FromStr for CounterStep {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let value: u16 = s.parse()?;
        Self::try_from(value).map_err(|_| anyhow!("counter step must be 1, 10 or 100, got {}", s))
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, IntoPrimitive, TryFromPrimitive, Serialize)]
#[repr(u16)]
pub enum BaudRate {
    B1200 = 0x00,
    B2400 = 0x01,
    B4800 = 0x02,
    B9600 = 0x03,
    B19200 = 0x04,
    B38400 = 0x05,
    B57600 = 0x06,
    B115200 = 0x07,
    B230400 = 0x08,
    B460800 = 0x09,
    B921600 = 0x0A,
}

impl BaudRate {
    pub fn bits_per_second(self) -> u32 {
        match self {
            Self::B1200 => 1200,
            Self::B2400 => 2400,
            Self::B4800 => 4800,
            Self::B9600 => 9600,
            Self::B19200 => 19200,
            Self::B38400 => 38400,
            Self::B57600 => 57600,
            Self::B115200 => 115200,
            Self::B230400 => 230400,
            Self::B460800 => 460800,
            Self::B921600 => 921600,
        }
    }
}

impl FromStr for BaudRate {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let bps: u32 = s.parse()?;
        (0x00u16..=0x0A)
            .filter_map(|code| Self::try_from(code).ok())
            .find(|b| b.bits_per_second() == bps)
            .ok_or_else(|| anyhow!("unsupported baud rate {}", s))
    }
} // }}}

// packed register layouts {{{
/// Line config registers hold two lines each: the odd line in the high
/// byte, the even line in the low byte. Returns (type shift, group shift).
pub fn line_config_shifts(line: u8) -> (u8, u8) {
    if line % 2 == 1 {
        (10, 8)
    } else {
        (2, 0)
    }
}

pub const RELAY_ALARM_GROUP_SHIFT: u8 = 0;
pub const RELAY_CLOSE_GROUP_SHIFT: u8 = 2;

pub const COUNTER_ENABLED_SHIFT: u8 = 0;
pub const COUNTER_CONNECTION_SHIFT: u8 = 1;
pub const COUNTER_NAMUR_SHIFT: u8 = 2;
pub const COUNTER_STEP_SHIFT: u8 = 8;

pub const WIRELESS_ALARM: u16 = 1 << 0;
pub const WIRELESS_CATEGORY: u16 = 1 << 1;
pub const WIRELESS_LOST: u16 = 1 << 2;
pub const WIRELESS_SIGNAL_SHIFT: u8 = 3;
pub const WIRELESS_BATTERY_SHIFT: u8 = 8;
pub const WIRELESS_MAX_SIGNAL: u8 = 4;
// }}}

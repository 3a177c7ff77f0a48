use crate::prelude::*;

use crate::bits::{AlarmMode, BaudRate, ConnectionType, CounterStep, LineType, ValveGroup};
use crate::register::{COUNTER_COUNT, COUNTER_SCALE};

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;

// CounterId {{{
/// One water counter input: slot 1..4, port 1..2.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct CounterId {
    slot: u8,
    port: u8,
}

impl CounterId {
    pub fn new(slot: u8, port: u8) -> Result<Self> {
        if !(1..=4).contains(&slot) || !(1..=2).contains(&port) {
            bail!("counter s{}_p{} does not exist", slot, port);
        }
        Ok(Self { slot, port })
    }

    pub fn from_index(index: usize) -> Option<Self> {
        if index >= COUNTER_COUNT {
            return None;
        }
        Some(Self {
            slot: (index / 2) as u8 + 1,
            port: (index % 2) as u8 + 1,
        })
    }

    pub fn all() -> impl Iterator<Item = CounterId> {
        (0..COUNTER_COUNT).filter_map(Self::from_index)
    }

    pub fn slot(&self) -> u8 {
        self.slot
    }

    pub fn port(&self) -> u8 {
        self.port
    }

    /// Position 0..7, in register order.
    pub fn index(&self) -> usize {
        (self.slot as usize - 1) * 2 + (self.port as usize - 1)
    }
}

impl std::fmt::Display for CounterId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "s{}_p{}", self.slot, self.port)
    }
}

impl FromStr for CounterId {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let rest = s
            .strip_prefix('s')
            .ok_or_else(|| anyhow!("bad counter id {}", s))?;
        let (slot, port) = rest
            .split_once("_p")
            .ok_or_else(|| anyhow!("bad counter id {}", s))?;

        Self::new(slot.parse()?, port.parse()?)
    }
}

impl Serialize for CounterId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
} // }}}

// WirelessSlot {{{
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
pub enum SlotCategory {
    Absent,
    Present,
    Unknown,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct WirelessSlot {
    pub index: u8,
    pub battery_pct: Option<u8>,
    pub signal_level: Option<u8>,
    pub alarm: bool,
    pub category: SlotCategory,
    pub lost: bool,
    pub group: Option<ValveGroup>,
}

impl WirelessSlot {
    pub fn unknown(index: u8) -> Self {
        Self {
            index,
            battery_pct: None,
            signal_level: None,
            alarm: false,
            category: SlotCategory::Unknown,
            lost: false,
            group: None,
        }
    }

    /// Signal level as a percentage, 25% per bar.
    pub fn signal_pct(&self) -> Option<u8> {
        self.signal_level.map(|level| level * 25)
    }
} // }}}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct LeakLine {
    pub index: u8,
    pub leaking: bool,
    pub input_type: Option<LineType>,
    pub group: Option<ValveGroup>,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct CounterSettings {
    pub enabled: bool,
    pub connection: ConnectionType,
    pub namur_error: u8,
    pub status: u8,
    pub step: Option<CounterStep>,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct ModbusSettings {
    pub address: u8,
    pub baud_rate: Option<BaudRate>,
}

// ControllerSnapshot {{{
/// One fully decoded poll cycle. Never mutated after publication.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ControllerSnapshot {
    pub alarm_mode_raw: u16,
    pub leak_raw: u16,
    pub wireless_raw: u16,
    pub line_config_raw: [u16; 2],
    pub relay_config_raw: u16,
    pub modbus_config_raw: u16,

    /// After the counter filter.
    pub counters: BTreeMap<CounterId, u32>,
    /// As read from the controller.
    pub raw_counters: BTreeMap<CounterId, u32>,
    pub counter_settings: Vec<CounterSettings>,

    pub leak_lines: Vec<LeakLine>,
    pub wireless_slots: Vec<WirelessSlot>,

    pub timestamp: DateTime<Utc>,
    pub is_valid: bool,
}

impl ControllerSnapshot {
    /// Placeholder published before the first successful poll.
    pub fn empty(map: &RegisterMap) -> Self {
        Self {
            alarm_mode_raw: 0,
            leak_raw: 0,
            wireless_raw: 0,
            line_config_raw: [0; 2],
            relay_config_raw: 0,
            modbus_config_raw: 0,
            counters: BTreeMap::new(),
            raw_counters: BTreeMap::new(),
            counter_settings: Vec::new(),
            leak_lines: (1..=map.leak_lines())
                .map(|index| LeakLine {
                    index,
                    leaking: false,
                    input_type: None,
                    group: None,
                })
                .collect(),
            wireless_slots: (1..=map.wireless_slots() as u8)
                .map(WirelessSlot::unknown)
                .collect(),
            timestamp: Utc::now(),
            is_valid: false,
        }
    }

    pub fn alarm_mode(&self) -> AlarmMode {
        AlarmMode::new(self.alarm_mode_raw)
    }

    pub fn counter(&self, id: CounterId) -> Option<u32> {
        self.counters.get(&id).copied()
    }

    /// Filtered counter in cubic metres.
    pub fn counter_m3(&self, id: CounterId) -> Option<f64> {
        self.counter(id).map(|litres| litres as f64 * COUNTER_SCALE)
    }

    /// Any leak line reporting water.
    pub fn leak_detected(&self) -> bool {
        self.leak_lines.iter().any(|l| l.leaking)
    }

    pub fn relay_groups(&self) -> (Option<ValveGroup>, Option<ValveGroup>) {
        use crate::bits::{field, RELAY_ALARM_GROUP_SHIFT, RELAY_CLOSE_GROUP_SHIFT};

        let alarm = field(self.relay_config_raw, RELAY_ALARM_GROUP_SHIFT, 2);
        let close = field(self.relay_config_raw, RELAY_CLOSE_GROUP_SHIFT, 2);
        (ValveGroup::try_from(alarm).ok(), ValveGroup::try_from(close).ok())
    }

    pub fn modbus_settings(&self) -> ModbusSettings {
        ModbusSettings {
            address: (self.modbus_config_raw >> 8) as u8,
            baud_rate: BaudRate::try_from(self.modbus_config_raw & 0xFF).ok(),
        }
    }
} // }}}

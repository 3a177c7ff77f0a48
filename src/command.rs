use crate::prelude::*;

use crate::bits::{self, AlarmModeBit, BaudRate, ConnectionType, CounterStep, ValveGroup};
use crate::coordinator::commands::{self as ops, Edit, RegisterOp};
use crate::register::{self, *};

/// Largest value the controller accepts for a counter calibration.
pub const MAX_CALIBRATION_LITRES: u32 = 0x7FFF_FFFF;

/// Single-bit switches in the alarm/mode register.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Switch {
    Zone1,
    Zone2,
    /// Both valve zones at once.
    Zones,
    DualZoneMode,
    FloorWashing,
    KeypadLocks,
    CloseTapsOnSensorLost,
    CloseGroup1OnSensorLoss,
    CloseGroup2OnSensorLoss,
    WirelessPairing,
}

impl Switch {
    pub const ALL: [Switch; 10] = [
        Switch::Zone1,
        Switch::Zone2,
        Switch::Zones,
        Switch::DualZoneMode,
        Switch::FloorWashing,
        Switch::KeypadLocks,
        Switch::CloseTapsOnSensorLost,
        Switch::CloseGroup1OnSensorLoss,
        Switch::CloseGroup2OnSensorLoss,
        Switch::WirelessPairing,
    ];

    pub fn key(self) -> &'static str {
        match self {
            Switch::Zones => "zones",
            Switch::Zone1 => AlarmModeBit::Zone1.name(),
            Switch::Zone2 => AlarmModeBit::Zone2.name(),
            Switch::DualZoneMode => AlarmModeBit::DualZoneMode.name(),
            Switch::FloorWashing => AlarmModeBit::FloorWashing.name(),
            Switch::KeypadLocks => AlarmModeBit::KeypadLocks.name(),
            Switch::CloseTapsOnSensorLost => AlarmModeBit::CloseTapsOnSensorLost.name(),
            Switch::CloseGroup1OnSensorLoss => AlarmModeBit::CloseGroup1OnSensorLoss.name(),
            Switch::CloseGroup2OnSensorLoss => AlarmModeBit::CloseGroup2OnSensorLoss.name(),
            Switch::WirelessPairing => AlarmModeBit::WirelessPairing.name(),
        }
    }

    fn edit(self, on: bool) -> Edit {
        let bit = match self {
            Switch::Zone1 => return Edit::Zone1(on),
            Switch::Zones => return Edit::flag(bits::MASK_ZONE_BOTH, on),
            Switch::Zone2 => AlarmModeBit::Zone2,
            Switch::DualZoneMode => AlarmModeBit::DualZoneMode,
            Switch::FloorWashing => AlarmModeBit::FloorWashing,
            Switch::KeypadLocks => AlarmModeBit::KeypadLocks,
            Switch::CloseTapsOnSensorLost => AlarmModeBit::CloseTapsOnSensorLost,
            Switch::CloseGroup1OnSensorLoss => AlarmModeBit::CloseGroup1OnSensorLoss,
            Switch::CloseGroup2OnSensorLoss => AlarmModeBit::CloseGroup2OnSensorLoss,
            Switch::WirelessPairing => AlarmModeBit::WirelessPairing,
        };

        Edit::flag(bit.mask(), on)
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Command {
    Switch(Switch, bool),
    LineType(u8, bits::LineType),
    LineGroup(u8, ValveGroup),
    RelayAlarmGroup(ValveGroup),
    RelayCloseGroup(ValveGroup),
    ModbusBaud(BaudRate),
    CounterEnabled(u8, bool),
    CounterStep(u8, CounterStep),
    CounterConnection(u8, ConnectionType),
    WirelessGroup(u8, ValveGroup),
    /// New counter reading in litres.
    CounterCalibration(CounterId, u32),
    ResetCounters,
}

impl Command {
    /// Works out which register(s) to touch. Fails without any I/O when
    /// the target does not exist or is switched off in the configuration.
    pub fn resolve(&self, map: &RegisterMap) -> Result<RegisterOp, CommandError> {
        let op = match self {
            Command::Switch(Switch::WirelessPairing, on) => {
                ops::require_wireless(map)?;
                Self::alarm_mode(Switch::WirelessPairing.edit(*on))
            }
            Command::Switch(switch, on) => Self::alarm_mode(switch.edit(*on)),
            Command::LineType(line, input_type) => {
                ops::validate_line(*line, map)?;
                let (shift, _) = bits::line_config_shifts(*line);
                Self::field(Self::line_register(*line), shift, 2, u16::from(*input_type))
            }
            Command::LineGroup(line, group) => {
                ops::validate_line(*line, map)?;
                let (_, shift) = bits::line_config_shifts(*line);
                Self::field(Self::line_register(*line), shift, 2, u16::from(*group))
            }
            Command::RelayAlarmGroup(group) => Self::field(
                REG_RELAY_CONFIG,
                bits::RELAY_ALARM_GROUP_SHIFT,
                2,
                u16::from(*group),
            ),
            Command::RelayCloseGroup(group) => Self::field(
                REG_RELAY_CONFIG,
                bits::RELAY_CLOSE_GROUP_SHIFT,
                2,
                u16::from(*group),
            ),
            Command::ModbusBaud(baud) => Self::field(REG_MODBUS_CONFIG, 0, 8, u16::from(*baud)),
            Command::CounterEnabled(counter, on) => {
                ops::validate_counter(*counter)?;
                Self::field(
                    Self::counter_config_register(*counter),
                    bits::COUNTER_ENABLED_SHIFT,
                    1,
                    *on as u16,
                )
            }
            Command::CounterStep(counter, step) => {
                ops::validate_counter(*counter)?;
                Self::field(
                    Self::counter_config_register(*counter),
                    bits::COUNTER_STEP_SHIFT,
                    8,
                    u16::from(*step),
                )
            }
            Command::CounterConnection(counter, connection) => {
                ops::validate_counter(*counter)?;
                Self::field(
                    Self::counter_config_register(*counter),
                    bits::COUNTER_CONNECTION_SHIFT,
                    1,
                    u16::from(*connection),
                )
            }
            Command::WirelessGroup(sensor, group) => {
                ops::validate_wireless(*sensor, map)?;
                Self::field(
                    REG_WIRELESS_CONFIG_START + *sensor as u16 - 1,
                    0,
                    8,
                    u16::from(*group),
                )
            }
            Command::CounterCalibration(id, litres) => RegisterOp::WriteMany {
                address: register::counter_address(*id),
                values: register::counter_to_words((*litres).min(MAX_CALIBRATION_LITRES)).to_vec(),
            },
            Command::ResetCounters => RegisterOp::WriteMany {
                address: REG_COUNTERS_START,
                values: vec![0; COUNTER_COUNT * 2],
            },
        };

        Ok(op)
    }

    /// Counters whose next zero reading should be trusted once this
    /// command has been written.
    pub fn resets(&self) -> Vec<CounterId> {
        match self {
            Command::CounterCalibration(id, _) => vec![*id],
            Command::ResetCounters => CounterId::all().collect(),
            _ => Vec::new(),
        }
    }

    fn alarm_mode(edit: Edit) -> RegisterOp {
        RegisterOp::Modify {
            address: REG_ALARM_MODE,
            edit,
        }
    }

    fn field(address: u16, shift: u8, width: u8, value: u16) -> RegisterOp {
        RegisterOp::Modify {
            address,
            edit: Edit::Field {
                shift,
                width,
                value,
            },
        }
    }

    fn line_register(line: u8) -> u16 {
        if line <= 2 {
            REG_LINE_CONFIG_1_2
        } else {
            REG_LINE_CONFIG_3_4
        }
    }

    fn counter_config_register(counter: u8) -> u16 {
        REG_COUNTER_CONFIG_START + counter as u16 - 1
    }
}

// parsing {{{
fn parse_bool(value: &str) -> Result<bool> {
    match value {
        "1" | "on" | "true" | "open" => Ok(true),
        "0" | "off" | "false" | "closed" => Ok(false),
        _ => bail!("expected on/off, got {}", value),
    }
}

/// Splits `line_2_group` into (`line`, 2, `group`).
fn indexed(key: &str) -> Option<(&str, u8, &str)> {
    let mut parts = key.splitn(3, '_');
    let prefix = parts.next()?;
    let index = parts.next()?.parse().ok()?;
    let suffix = parts.next()?;
    Some((prefix, index, suffix))
}

/// Textual form used on the command line: `key=value`, or a bare
/// `reset_counters`.
impl FromStr for Command {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s == "reset_counters" {
            return Ok(Command::ResetCounters);
        }

        let (key, value) = s
            .split_once('=')
            .ok_or_else(|| anyhow!("expected key=value, got {}", s))?;
        let (key, value) = (key.trim(), value.trim());

        if let Some(switch) = Switch::ALL.iter().find(|sw| sw.key() == key) {
            return Ok(Command::Switch(*switch, parse_bool(value)?));
        }

        match key {
            "relay_alarm_group" => return Ok(Command::RelayAlarmGroup(value.parse()?)),
            "relay_close_group" => return Ok(Command::RelayCloseGroup(value.parse()?)),
            "modbus_baud" => return Ok(Command::ModbusBaud(value.parse()?)),
            _ => {}
        }

        if let Some(id) = key.strip_prefix("counter_").and_then(|id| id.parse::<CounterId>().ok()) {
            let m3: f64 = value.parse()?;
            if !(0.0..=MAX_CALIBRATION_LITRES as f64 / 1000.0).contains(&m3) {
                bail!("counter value {} out of range", value);
            }
            return Ok(Command::CounterCalibration(id, (m3 * 1000.0).round() as u32));
        }

        let r = match indexed(key) {
            Some(("line", n, "type")) => Command::LineType(n, value.parse()?),
            Some(("line", n, "group")) => Command::LineGroup(n, value.parse()?),
            Some(("counter", n, "enabled")) => Command::CounterEnabled(n, parse_bool(value)?),
            Some(("counter", n, "step")) => Command::CounterStep(n, value.parse()?),
            Some(("counter", n, "connection")) => Command::CounterConnection(n, value.parse()?),
            Some(("wireless", n, "group")) => Command::WirelessGroup(n, value.parse()?),
            _ => bail!("unknown command {}", key),
        };

        Ok(r)
    }
} // }}}

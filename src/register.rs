use crate::prelude::*;
use crate::config::check_range;
use serde::Serialize;

pub const REG_ALARM_MODE: u16 = 0;
pub const REG_LINE_CONFIG_1_2: u16 = 1;
pub const REG_LINE_CONFIG_3_4: u16 = 2;
pub const REG_LEAK_SENSORS: u16 = 3;
pub const REG_RELAY_CONFIG: u16 = 4;
pub const REG_MODBUS_CONFIG: u16 = 5;
pub const REG_WIRELESS_STATUS: u16 = 6;
pub const REG_WIRELESS_CONFIG_START: u16 = 7;
pub const REG_WIRELESS_SLOTS_START: u16 = 57;
pub const REG_COUNTERS_START: u16 = 107;
pub const REG_COUNTER_CONFIG_START: u16 = 123;

/// Water counters on the controller: four slots with two ports each.
pub const COUNTER_COUNT: usize = 8;
pub const MAX_WIRELESS_SENSORS: u8 = 5;
pub const MAX_LEAK_LINES: u8 = 4;

/// Largest read a Modbus holding-register request may ask for.
pub const MAX_READ_SPAN: u16 = 125;

/// Counters are reported in litres.
pub const COUNTER_SCALE: f64 = 0.001;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
pub enum FieldKind {
    Raw16,
    BitFlags16,
    Counter32,
    WirelessSlot,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RegisterField {
    pub name: String,
    pub address: u16,
    pub word_count: u16,
    pub kind: FieldKind,
    pub scale: f64,
}

impl RegisterField {
    fn new(name: impl Into<String>, address: u16, kind: FieldKind) -> Self {
        let (word_count, scale) = match kind {
            FieldKind::Counter32 => (2, COUNTER_SCALE),
            _ => (1, 1.0),
        };

        Self {
            name: name.into(),
            address,
            word_count,
            kind,
            scale,
        }
    }

    /// One past the last address this field occupies.
    pub fn end(&self) -> u16 {
        self.address + self.word_count
    }
}

/// One contiguous holding-register read.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
pub struct ReadSpan {
    pub start: u16,
    pub count: u16,
}

impl ReadSpan {
    pub fn end(&self) -> u16 {
        self.start + self.count
    }

    pub fn contains(&self, address: u16) -> bool {
        address >= self.start && address < self.end()
    }
}

/// Register layout for one configured controller. Built once at startup
/// and never mutated.
#[derive(Clone, Debug)]
pub struct RegisterMap {
    enable_wireless: bool,
    wireless_sensors: u8,
    leak_lines: u8,
    fields: Vec<RegisterField>,
    spans: Vec<ReadSpan>,
}

impl RegisterMap {
    pub fn build(config: &config::Controller) -> Result<Self, ConfigError> {
        Self::new(
            config.enable_wireless(),
            config.wireless_sensors(),
            config.leak_lines(),
        )
    }

    pub fn new(enable_wireless: bool, wireless_sensors: u8, leak_lines: u8) -> Result<Self, ConfigError> {
        check_range(
            "wireless_sensors",
            wireless_sensors as u64,
            1,
            MAX_WIRELESS_SENSORS as u64,
        )?;
        check_range("leak_lines", leak_lines as u64, 1, MAX_LEAK_LINES as u64)?;

        let mut fields = vec![
            RegisterField::new("alarm_mode", REG_ALARM_MODE, FieldKind::BitFlags16),
            RegisterField::new("line_config_1_2", REG_LINE_CONFIG_1_2, FieldKind::Raw16),
            RegisterField::new("line_config_3_4", REG_LINE_CONFIG_3_4, FieldKind::Raw16),
            RegisterField::new("leak_sensors", REG_LEAK_SENSORS, FieldKind::BitFlags16),
            RegisterField::new("relay_config", REG_RELAY_CONFIG, FieldKind::Raw16),
            RegisterField::new("modbus_config", REG_MODBUS_CONFIG, FieldKind::Raw16),
            RegisterField::new("wireless_status", REG_WIRELESS_STATUS, FieldKind::Raw16),
        ];

        if enable_wireless {
            for i in 1..=wireless_sensors as u16 {
                fields.push(RegisterField::new(
                    format!("wireless_config_{}", i),
                    REG_WIRELESS_CONFIG_START + i - 1,
                    FieldKind::Raw16,
                ));
            }
            for i in 1..=wireless_sensors as u16 {
                fields.push(RegisterField::new(
                    format!("wireless_slot_{}", i),
                    REG_WIRELESS_SLOTS_START + i - 1,
                    FieldKind::WirelessSlot,
                ));
            }
        }

        for id in CounterId::all() {
            fields.push(RegisterField::new(
                format!("counter_{}", id),
                counter_address(id),
                FieldKind::Counter32,
            ));
        }

        for i in 1..=COUNTER_COUNT as u16 {
            fields.push(RegisterField::new(
                format!("counter_config_{}", i),
                REG_COUNTER_CONFIG_START + i - 1,
                FieldKind::Raw16,
            ));
        }

        let spans = Self::coalesce(&fields);

        Ok(Self {
            enable_wireless,
            wireless_sensors,
            leak_lines,
            fields,
            spans,
        })
    }

    // fields must already be in address order
    fn coalesce(fields: &[RegisterField]) -> Vec<ReadSpan> {
        let mut spans: Vec<ReadSpan> = Vec::new();

        for field in fields {
            match spans.last_mut() {
                Some(span)
                    if span.end() == field.address
                        && span.count + field.word_count <= MAX_READ_SPAN =>
                {
                    span.count += field.word_count;
                }
                _ => spans.push(ReadSpan {
                    start: field.address,
                    count: field.word_count,
                }),
            }
        }

        spans
    }

    pub fn enable_wireless(&self) -> bool {
        self.enable_wireless
    }

    /// Number of wireless slots decoded per snapshot; zero when wireless
    /// support is disabled.
    pub fn wireless_slots(&self) -> usize {
        if self.enable_wireless {
            self.wireless_sensors as usize
        } else {
            0
        }
    }

    pub fn wireless_sensors(&self) -> u8 {
        self.wireless_sensors
    }

    pub fn leak_lines(&self) -> u8 {
        self.leak_lines
    }

    pub fn fields(&self) -> &[RegisterField] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&RegisterField> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn spans(&self) -> &[ReadSpan] {
        &self.spans
    }

    /// Total words one poll cycle reads.
    pub fn words_required(&self) -> usize {
        self.spans.iter().map(|s| s.count as usize).sum()
    }

    /// Position of `address` within the concatenated words of one poll
    /// cycle, if the map reads it.
    pub fn word_offset(&self, address: u16) -> Option<usize> {
        let mut offset = 0;
        for span in &self.spans {
            if span.contains(address) {
                return Some(offset + (address - span.start) as usize);
            }
            offset += span.count as usize;
        }
        None
    }
}

pub fn counter_address(id: CounterId) -> u16 {
    REG_COUNTERS_START + 2 * id.index() as u16
}

/// Splits a 32-bit counter into the two register words the controller
/// stores, high word first.
pub fn counter_to_words(value: u32) -> [u16; 2] {
    [(value >> 16) as u16, (value & 0xFFFF) as u16]
}

/// Inverse of [`counter_to_words`].
pub fn counter_from_words(hi: u16, lo: u16) -> u32 {
    ((hi as u32) << 16) | lo as u32
}

use crate::prelude::*;

use crate::bits::{self, ConnectionType, CounterStep, LineType, ValveGroup};
use crate::register::{self, *};
use crate::snapshot::{CounterSettings, LeakLine, SlotCategory, WirelessSlot};

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

/// Turns the words of one poll cycle, concatenated in span order, into a
/// snapshot. Counters come out unfiltered; the coordinator runs them
/// through the counter filter afterwards.
pub struct Decoder<'a> {
    words: &'a [u16],
    map: &'a RegisterMap,
}

impl<'a> Decoder<'a> {
    pub fn decode(words: &'a [u16], map: &'a RegisterMap, timestamp: DateTime<Utc>) -> ControllerSnapshot {
        let decoder = Self { words, map };

        if words.len() < map.words_required() {
            warn!(
                "short read: got {} words, map requires {}",
                words.len(),
                map.words_required()
            );
            let mut snapshot = ControllerSnapshot::empty(map);
            snapshot.timestamp = timestamp;
            return snapshot;
        }

        let raw_counters: BTreeMap<CounterId, u32> = CounterId::all()
            .map(|id| (id, decoder.counter(id)))
            .collect();

        let leak_raw = decoder.word(REG_LEAK_SENSORS);

        ControllerSnapshot {
            alarm_mode_raw: decoder.word(REG_ALARM_MODE),
            leak_raw,
            wireless_raw: decoder.word(REG_WIRELESS_STATUS),
            line_config_raw: [
                decoder.word(REG_LINE_CONFIG_1_2),
                decoder.word(REG_LINE_CONFIG_3_4),
            ],
            relay_config_raw: decoder.word(REG_RELAY_CONFIG),
            modbus_config_raw: decoder.word(REG_MODBUS_CONFIG),
            counters: raw_counters.clone(),
            raw_counters,
            counter_settings: (0..COUNTER_COUNT as u16)
                .map(|i| counter_settings(decoder.word(REG_COUNTER_CONFIG_START + i)))
                .collect(),
            leak_lines: (1..=map.leak_lines())
                .map(|line| decoder.leak_line(line, leak_raw))
                .collect(),
            wireless_slots: (1..=map.wireless_slots() as u8)
                .map(|index| decoder.wireless_slot(index))
                .collect(),
            timestamp,
            is_valid: true,
        }
    }

    // only called with addresses the map reads, after the length check
    fn word(&self, address: u16) -> u16 {
        self.map
            .word_offset(address)
            .and_then(|offset| self.words.get(offset))
            .copied()
            .unwrap_or(0)
    }

    fn counter(&self, id: CounterId) -> u32 {
        let address = register::counter_address(id);
        register::counter_from_words(self.word(address), self.word(address + 1))
    }

    fn leak_line(&self, line: u8, leak_raw: u16) -> LeakLine {
        let config = if line <= 2 {
            self.word(REG_LINE_CONFIG_1_2)
        } else {
            self.word(REG_LINE_CONFIG_3_4)
        };
        let (type_shift, group_shift) = bits::line_config_shifts(line);

        LeakLine {
            index: line,
            leaking: leak_raw & (1 << (line - 1)) != 0,
            input_type: LineType::try_from(bits::field(config, type_shift, 2)).ok(),
            group: ValveGroup::try_from(bits::field(config, group_shift, 2)).ok(),
        }
    }

    fn wireless_slot(&self, index: u8) -> WirelessSlot {
        let config = self.word(REG_WIRELESS_CONFIG_START + index as u16 - 1);
        let raw = self.word(REG_WIRELESS_SLOTS_START + index as u16 - 1);

        let mut slot = decode_wireless_slot(index, raw);
        slot.group = ValveGroup::try_from(config & 0xFF).ok();
        slot
    }
}

/// Decodes one wireless slot word. 0x0000 and 0xFFFF mean the controller
/// has nothing to report for that slot.
pub fn decode_wireless_slot(index: u8, raw: u16) -> WirelessSlot {
    if raw == 0x0000 || raw == 0xFFFF {
        return WirelessSlot::unknown(index);
    }

    let battery = bits::field(raw, bits::WIRELESS_BATTERY_SHIFT, 8) as u8;
    let signal = bits::field(raw, bits::WIRELESS_SIGNAL_SHIFT, 3) as u8;

    WirelessSlot {
        index,
        battery_pct: (battery <= 100).then_some(battery),
        signal_level: (signal <= bits::WIRELESS_MAX_SIGNAL).then_some(signal),
        alarm: raw & bits::WIRELESS_ALARM != 0,
        category: if raw & bits::WIRELESS_CATEGORY != 0 {
            SlotCategory::Present
        } else {
            SlotCategory::Absent
        },
        lost: raw & bits::WIRELESS_LOST != 0,
        group: None,
    }
}

pub fn counter_settings(raw: u16) -> CounterSettings {
    CounterSettings {
        enabled: bits::field(raw, bits::COUNTER_ENABLED_SHIFT, 1) == 1,
        connection: if bits::field(raw, bits::COUNTER_CONNECTION_SHIFT, 1) == 1 {
            ConnectionType::Namur
        } else {
            ConnectionType::Normal
        },
        namur_error: bits::field(raw, bits::COUNTER_NAMUR_SHIFT, 2) as u8,
        status: bits::field(raw, 0, 4) as u8,
        step: CounterStep::try_from(bits::field(raw, bits::COUNTER_STEP_SHIFT, 8)).ok(),
    }
}

mod common;
use common::*;

use chrono::{TimeZone, Utc};
use neptun_bridge::bits::{AlarmModeBit, ConnectionType, CounterStep, LineType, ValveGroup};
use neptun_bridge::decoder::{self, Decoder};
use neptun_bridge::register;
use neptun_bridge::snapshot::SlotCategory;

fn timestamp() -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
}

// a plausible register image: zone 1 + 2 open, line 2 leaking, counters set
fn sample(address: u16) -> u16 {
    match address {
        0 => 0x0300,
        // line 1: button, group 2; line 2: sensors, group both
        1 => (1 << 10) | (2 << 8) | 3,
        2 => 0,
        3 => 0b0010,
        4 => (2 << 2) | 1,
        5 => (240 << 8) | 0x03,
        6 => 2,
        7 => 0x0001,
        8 => 0x0002,
        57 => (87 << 8) | (3 << 3) | 0b011,
        58 => 0xFFFF,
        107 => 0x0001,
        108 => 0x0002,
        109 => 0,
        110 => 1234,
        123 => (10 << 8) | 0b11,
        _ => 0,
    }
}

#[test]
fn decodes_full_image() {
    common_setup();

    let map = Factory::map(true, 2, 4);
    let words = Factory::words(&map, sample);
    let snapshot = Decoder::decode(&words, &map, timestamp());

    assert!(snapshot.is_valid);
    assert_eq!(snapshot.timestamp, timestamp());
    assert_eq!(snapshot.alarm_mode_raw, 0x0300);
    assert_eq!(snapshot.leak_raw, 0b0010);
    assert_eq!(snapshot.wireless_raw, 2);

    let mode = snapshot.alarm_mode();
    assert!(mode.zone_1 && mode.zone_2);
    assert!(!mode.dual_zone_mode);
    assert!(!mode.zone_2_available());
    assert!(AlarmModeBit::Zone2.is_set(snapshot.alarm_mode_raw));

    let s1_p1: CounterId = "s1_p1".parse().unwrap();
    let s1_p2: CounterId = "s1_p2".parse().unwrap();
    assert_eq!(snapshot.raw_counters[&s1_p1], 0x0001_0002);
    assert_eq!(snapshot.raw_counters[&s1_p2], 1234);
    assert!((snapshot.counter_m3(s1_p2).unwrap() - 1.234).abs() < 1e-9);
    assert_eq!(snapshot.raw_counters.len(), 8);
}

#[test]
fn leak_lines_and_config() {
    let map = Factory::map(false, 1, 2);
    let words = Factory::words(&map, sample);
    let snapshot = Decoder::decode(&words, &map, timestamp());

    assert_eq!(snapshot.leak_lines.len(), 2);
    let line1 = &snapshot.leak_lines[0];
    assert_eq!(line1.index, 1);
    assert!(!line1.leaking);
    assert_eq!(line1.input_type, Some(LineType::Button));
    assert_eq!(line1.group, Some(ValveGroup::Group2));

    let line2 = &snapshot.leak_lines[1];
    assert!(line2.leaking);
    assert_eq!(line2.input_type, Some(LineType::Sensors));
    assert_eq!(line2.group, Some(ValveGroup::Both));
    assert!(snapshot.leak_detected());

    assert_eq!(snapshot.relay_groups(), (Some(ValveGroup::Group1), Some(ValveGroup::Group2)));
    let modbus = snapshot.modbus_settings();
    assert_eq!(modbus.address, 240);
    assert_eq!(modbus.baud_rate.map(|b| b.bits_per_second()), Some(9600));

    let settings = &snapshot.counter_settings[0];
    assert!(settings.enabled);
    assert_eq!(settings.connection, ConnectionType::Namur);
    assert_eq!(settings.step, Some(CounterStep::Ten));
    assert_eq!(snapshot.counter_settings.len(), 8);
    assert!(!snapshot.counter_settings[1].enabled);
    // step 0 is not a valid setting
    assert_eq!(snapshot.counter_settings[1].step, None);
}

#[test]
fn wireless_slots() {
    let map = Factory::map(true, 2, 4);
    let words = Factory::words(&map, sample);
    let snapshot = Decoder::decode(&words, &map, timestamp());

    assert_eq!(snapshot.wireless_slots.len(), 2);

    let slot = &snapshot.wireless_slots[0];
    assert_eq!(slot.index, 1);
    assert_eq!(slot.battery_pct, Some(87));
    assert_eq!(slot.signal_level, Some(3));
    assert_eq!(slot.signal_pct(), Some(75));
    assert!(slot.alarm);
    assert_eq!(slot.category, SlotCategory::Present);
    assert!(!slot.lost);
    assert_eq!(slot.group, Some(ValveGroup::Group1));

    // 0xFFFF sentinel
    let slot = &snapshot.wireless_slots[1];
    assert_eq!(slot.battery_pct, None);
    assert_eq!(slot.signal_level, None);
    assert_eq!(slot.category, SlotCategory::Unknown);
    assert_eq!(slot.group, Some(ValveGroup::Group2));
}

#[test]
fn wireless_field_ranges() {
    assert_eq!(decoder::decode_wireless_slot(1, 0x0000).category, SlotCategory::Unknown);

    // battery 150% and signal 7 are both out of range
    let slot = decoder::decode_wireless_slot(1, (150 << 8) | (7 << 3) | 0b100);
    assert_eq!(slot.battery_pct, None);
    assert_eq!(slot.signal_level, None);
    assert!(slot.lost);
    assert_eq!(slot.category, SlotCategory::Absent);

    let slot = decoder::decode_wireless_slot(1, (100 << 8) | (4 << 3));
    assert_eq!(slot.battery_pct, Some(100));
    assert_eq!(slot.signal_level, Some(4));
}

#[test]
fn no_wireless_slots_when_disabled() {
    let map = Factory::map(false, 5, 4);
    let words = Factory::words(&map, sample);
    let snapshot = Decoder::decode(&words, &map, timestamp());

    assert!(snapshot.is_valid);
    assert!(snapshot.wireless_slots.is_empty());
}

#[test]
fn short_read_is_invalid() {
    let map = Factory::map(true, 3, 4);
    let mut words = Factory::words(&map, sample);
    words.pop();

    let snapshot = Decoder::decode(&words, &map, timestamp());
    assert!(!snapshot.is_valid);
    assert!(snapshot.counters.is_empty());
    // shape is kept even when the content is not
    assert_eq!(snapshot.wireless_slots.len(), 3);
}

#[test]
fn deterministic() {
    let map = Factory::map(true, 5, 4);
    let words = Factory::words(&map, |a| a.wrapping_mul(0x9E37));

    assert_eq!(
        Decoder::decode(&words, &map, timestamp()),
        Decoder::decode(&words, &map, timestamp())
    );
}

#[test]
fn counters_are_high_word_first() {
    let map = Factory::map(false, 1, 4);
    let id: CounterId = "s4_p2".parse().unwrap();
    let address = register::counter_address(id);
    let words = Factory::words(&map, |a| match a {
        a if a == address => 0xABCD,
        a if a == address + 1 => 0x1234,
        _ => 0,
    });

    let snapshot = Decoder::decode(&words, &map, timestamp());
    assert_eq!(snapshot.raw_counters[&id], 0xABCD_1234);
}

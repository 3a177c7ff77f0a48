use crate::prelude::*;

use crate::register::{COUNTER_COUNT, MAX_LEAK_LINES, MAX_WIRELESS_SENSORS};

/// Checks a leak line index against the hardware, then against the lines
/// this installation has configured.
pub fn validate_line(line: u8, map: &RegisterMap) -> Result<(), CommandError> {
    if line == 0 || line > MAX_LEAK_LINES {
        return Err(CommandError::Invalid(format!(
            "line {} out of range 1..{}",
            line, MAX_LEAK_LINES
        )));
    }
    if line > map.leak_lines() {
        return Err(CommandError::Unsupported(format!(
            "line {} (only {} configured)",
            line,
            map.leak_lines()
        )));
    }

    Ok(())
}

/// Counter config registers are numbered 1..8.
pub fn validate_counter(counter: u8) -> Result<(), CommandError> {
    if counter == 0 || counter as usize > COUNTER_COUNT {
        return Err(CommandError::Invalid(format!(
            "counter {} out of range 1..{}",
            counter, COUNTER_COUNT
        )));
    }

    Ok(())
}

pub fn validate_wireless(sensor: u8, map: &RegisterMap) -> Result<(), CommandError> {
    if sensor == 0 || sensor > MAX_WIRELESS_SENSORS {
        return Err(CommandError::Invalid(format!(
            "wireless sensor {} out of range 1..{}",
            sensor, MAX_WIRELESS_SENSORS
        )));
    }
    require_wireless(map)?;
    if sensor > map.wireless_sensors() {
        return Err(CommandError::Unsupported(format!(
            "wireless sensor {} (only {} configured)",
            sensor,
            map.wireless_sensors()
        )));
    }

    Ok(())
}

pub fn require_wireless(map: &RegisterMap) -> Result<(), CommandError> {
    if !map.enable_wireless() {
        return Err(CommandError::Unsupported(
            "wireless (enable_wireless is off)".to_string(),
        ));
    }

    Ok(())
}

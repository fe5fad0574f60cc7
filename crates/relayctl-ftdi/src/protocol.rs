//! FT232H MPSSE GPIO protocol
//!
//! Only the GPIO subset of MPSSE is used: the sixteen lines ADBUS0-7 (low
//! byte) and ACBUS0-7 (high byte) are driven directly with `SET_BITS_*` and
//! sampled with `GET_BITS_*`.

use crate::error::{FtdiError, Result};

/// Number of GPIO lines on an FT232H
pub const FT232H_LINES: u8 = 16;

/// MPSSE base clock with divide-by-5 disabled
pub const BASE_CLOCK_HZ: u32 = 60_000_000;

/// Highest clock the MPSSE engine can produce
pub const MAX_FREQUENCY_HZ: u32 = BASE_CLOCK_HZ / 2;

/// Latency timer in milliseconds
pub const LATENCY_TIMER_MS: u8 = 2;

// MPSSE commands

/// Set data bits low byte (value, direction)
pub const SET_BITS_LOW: u8 = 0x80;

/// Read data bits low byte
pub const GET_BITS_LOW: u8 = 0x81;

/// Set data bits high byte (value, direction)
pub const SET_BITS_HIGH: u8 = 0x82;

/// Read data bits high byte
pub const GET_BITS_HIGH: u8 = 0x83;

/// Disconnect TDI/DO from TDO/DI loopback
pub const LOOPBACK_END: u8 = 0x85;

/// Set clock divisor
pub const TCK_DIVISOR: u8 = 0x86;

/// Flush the adapter's send buffer to the host
pub const SEND_IMMEDIATE: u8 = 0x87;

/// Disable divide-by-5 prescaler (60 MHz base clock)
pub const DIS_DIV_5: u8 = 0x8A;

/// Every line is an output
pub const ALL_OUTPUTS: u16 = 0xFFFF;

/// Clock divisor for the requested frequency
///
/// Rounds towards the next slower clock so the result never exceeds the
/// request.
pub fn divisor_for(frequency_hz: u32) -> Result<u16> {
    if frequency_hz == 0 || frequency_hz > MAX_FREQUENCY_HZ {
        return Err(FtdiError::InvalidParameter(format!(
            "frequency {} Hz out of range (1..={} Hz)",
            frequency_hz, MAX_FREQUENCY_HZ
        )));
    }
    let half_periods = BASE_CLOCK_HZ.div_ceil(2 * frequency_hz);
    u16::try_from(half_periods - 1).map_err(|_| {
        FtdiError::InvalidParameter(format!("frequency {} Hz is too low", frequency_hz))
    })
}

/// Clock produced by a divisor
pub fn frequency_for(divisor: u16) -> u32 {
    BASE_CLOCK_HZ / (2 * (u32::from(divisor) + 1))
}

/// MPSSE setup: 60 MHz base, clock divisor, no loopback, all lines driven
pub fn init_sequence(divisor: u16, levels: u16) -> Vec<u8> {
    let mut buf = Vec::with_capacity(11);
    buf.push(DIS_DIV_5);
    buf.push(TCK_DIVISOR);
    buf.push((divisor & 0xFF) as u8);
    buf.push((divisor >> 8) as u8);
    buf.push(LOOPBACK_END);
    buf.extend_from_slice(&set_bits(levels, ALL_OUTPUTS));
    buf
}

/// Drive both bytes
pub fn set_bits(levels: u16, direction: u16) -> [u8; 6] {
    let [low, high] = levels.to_le_bytes();
    let [dir_low, dir_high] = direction.to_le_bytes();
    [SET_BITS_LOW, low, dir_low, SET_BITS_HIGH, high, dir_high]
}

/// Drive only the byte that contains `line`
pub fn set_line_bits(line: u8, levels: u16) -> [u8; 3] {
    let [low, high] = levels.to_le_bytes();
    let [dir_low, dir_high] = ALL_OUTPUTS.to_le_bytes();
    if line < 8 {
        [SET_BITS_LOW, low, dir_low]
    } else {
        [SET_BITS_HIGH, high, dir_high]
    }
}

/// Sample all sixteen lines; the adapter answers with two bytes (low, high)
pub const READ_BITS: [u8; 3] = [GET_BITS_LOW, GET_BITS_HIGH, SEND_IMMEDIATE];

/// Return every line to an input
pub fn release_bits() -> [u8; 6] {
    set_bits(0x0000, 0x0000)
}

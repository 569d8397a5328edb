//! Numeric payload decoding
//!
//! Pure functions that turn fixed-layout frame payloads into values. No I/O
//! and no state; the frame decoder in [`super::packet`] calls into these once
//! a frame's tail byte has been validated.

use byteorder::{BigEndian, ByteOrder, LittleEndian};

/// Payload length of a resistance frame
pub const RESISTANCE_PAYLOAD_LEN: usize = 6;

/// Payload length of a reset/info frame
pub const RESET_PAYLOAD_LEN: usize = 1;

/// Payload length of a test-value frame
pub const TEST_PAYLOAD_LEN: usize = 4;

/// Fractional digits carried by resistance and test values
pub const VALUE_DECIMALS: u32 = 3;

/// Decode a resistance payload into Ohms.
///
/// Layout:
/// - bytes 0..4: integer part, big-endian `u32`
/// - bytes 4..6: fractional numerator out of 1000, big-endian `u16`
///
/// The numerator is not clamped to 999; the device is trusted to send values
/// below 1000 but larger numerators simply carry into the integer part.
pub fn decode_resistance(payload: &[u8; RESISTANCE_PAYLOAD_LEN]) -> f64 {
    let integer = BigEndian::read_u32(&payload[0..4]);
    let millis = BigEndian::read_u16(&payload[4..6]);
    round_decimals(
        f64::from(integer) + f64::from(millis) / 1000.0,
        VALUE_DECIMALS,
    )
}

/// Encode Ohms into a resistance payload (inverse of [`decode_resistance`]).
///
/// Negative and non-finite values encode as zero; values above `u32::MAX`
/// saturate.
pub fn encode_resistance(ohms: f64) -> [u8; RESISTANCE_PAYLOAD_LEN] {
    let mut payload = [0u8; RESISTANCE_PAYLOAD_LEN];
    if !ohms.is_finite() || ohms <= 0.0 {
        return payload;
    }
    let total_millis = (ohms * 1000.0).round();
    let integer = (total_millis / 1000.0).floor().min(f64::from(u32::MAX)) as u32;
    let millis = (total_millis - f64::from(integer) * 1000.0).clamp(0.0, 999.0) as u16;
    BigEndian::write_u32(&mut payload[0..4], integer);
    BigEndian::write_u16(&mut payload[4..6], millis);
    payload
}

/// Decode a test-value payload.
///
/// The device copies the raw bytes of a 32-bit float out of a union, so they
/// arrive in its native little-endian order. The widened value is truncated
/// to [`VALUE_DECIMALS`] to strip `f32` → `f64` reconstruction noise.
pub fn decode_test_value(payload: &[u8; TEST_PAYLOAD_LEN]) -> f64 {
    let raw = LittleEndian::read_f32(payload);
    truncate_decimals(f64::from(raw), VALUE_DECIMALS)
}

/// Encode a test value the way the device firmware does.
pub fn encode_test_value(value: f32) -> [u8; TEST_PAYLOAD_LEN] {
    let mut payload = [0u8; TEST_PAYLOAD_LEN];
    LittleEndian::write_f32(&mut payload, value);
    payload
}

/// Round to `digits` fractional digits, halves away from zero.
pub fn round_decimals(value: f64, digits: u32) -> f64 {
    if !value.is_finite() {
        return value;
    }
    let factor = 10f64.powi(digits as i32);
    if !factor.is_finite() {
        return value;
    }
    (value * factor).round() / factor
}

/// Truncate toward zero at `digits` fractional digits.
///
/// Only values whose shortest decimal representation already has more than
/// `digits` fractional digits are touched; anything shorter is returned
/// unchanged, so `5.1` stays `5.1` rather than becoming `5.0999…` after a
/// multiply/divide round trip.
pub fn truncate_decimals(value: f64, digits: u32) -> f64 {
    if !value.is_finite() || fractional_digits(value) <= digits as usize {
        return value;
    }
    let factor = 10f64.powi(digits as i32);
    // Past 308 digits the factor overflows and no f64 has anything left to cut
    if !factor.is_finite() {
        return value;
    }
    (value * factor).trunc() / factor
}

/// Count the digits after the decimal point in the shortest round-trip form.
fn fractional_digits(value: f64) -> usize {
    // `Display` for f64 never switches to exponent notation
    let repr = value.to_string();
    match repr.split_once('.') {
        Some((_, fraction)) => fraction.len(),
        None => 0,
    }
}

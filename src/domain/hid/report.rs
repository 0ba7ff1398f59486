//! Report encoders.
//!
//! # Layouts
//!
//! ```text
//! Mouse (ID 2, 4 bytes)
//! [0] : Buttons - bit 0 left, bit 1 right, bit 2 middle, bits 3-7 padding
//! [1] : X  (i8, two's complement)
//! [2] : Y  (i8, two's complement)
//! [3] : Wheel (i8, two's complement)
//!
//! Keyboard (ID 1, 8 bytes)
//! [0] : Modifier mask
//! [1] : Reserved (0x00)
//! [2] : Key slot 1
//! [3-7] : Key slots 2-6 (always 0x00, one key at a time)
//!
//! Consumer (ID 3, 2 bytes)
//! [0-1] : Usage code (u16 little-endian), 0x0000 = key up
//! ```

use super::descriptor::{ReportKind, CONSUMER_REPORT_SIZE, KEYBOARD_REPORT_SIZE, MOUSE_REPORT_SIZE};
use super::CodecError;

/// Smallest value the descriptor's relative axes accept
const AXIS_MIN: i8 = -127;

fn check_axis(axis: &'static str, value: i8) -> Result<i8, CodecError> {
    if value < AXIS_MIN {
        return Err(CodecError::OutOfRange { axis, value });
    }
    Ok(value)
}

/// Encode a 4-byte mouse report.
///
/// Callers clamp to -127..=127 first; `-128` is rejected.
pub fn encode_mouse_report(
    buttons: u8,
    dx: i8,
    dy: i8,
    wheel: i8,
) -> Result<[u8; MOUSE_REPORT_SIZE], CodecError> {
    let dx = check_axis("x", dx)?;
    let dy = check_axis("y", dy)?;
    let wheel = check_axis("wheel", wheel)?;
    Ok([buttons, dx as u8, dy as u8, wheel as u8])
}

/// Encode an 8-byte keyboard report with at most one key held
pub fn encode_keyboard_report(modifiers: u8, key_code: Option<u8>) -> [u8; KEYBOARD_REPORT_SIZE] {
    [modifiers, 0x00, key_code.unwrap_or(0), 0, 0, 0, 0, 0]
}

/// Encode a 2-byte consumer control report; usage `0` is the key-up report
pub fn encode_media_report(usage_code: u16) -> [u8; CONSUMER_REPORT_SIZE] {
    usage_code.to_le_bytes()
}

/// The neutral (nothing held, no motion) report for a report ID.
///
/// Used to answer host GET_REPORT requests and to release stuck input.
pub fn idle_report(report_id: u8) -> Result<Vec<u8>, CodecError> {
    let kind = ReportKind::from_id(report_id)?;
    Ok(vec![0u8; kind.payload_len()])
}

/// Check that a raw payload matches the layout declared for its report ID
pub fn validate_report(report_id: u8, payload: &[u8]) -> Result<ReportKind, CodecError> {
    let kind = ReportKind::from_id(report_id)?;
    if payload.len() != kind.payload_len() {
        return Err(CodecError::LengthMismatch {
            report_id,
            expected: kind.payload_len(),
            actual: payload.len(),
        });
    }
    Ok(kind)
}

/// Clamp any integer delta into the range the descriptor accepts
pub fn clamp_axis(value: i32) -> i8 {
    value.clamp(AXIS_MIN as i32, i8::MAX as i32) as i8
}

//! HID Report Codec
//!
//! Pure encoders that turn semantic input events into the fixed-layout
//! report payloads described by [`descriptor::REPORT_DESCRIPTOR`].
//!
//! ## Modules
//!
//! - [`descriptor`] - Report descriptor bytes, report IDs and the registration record
//! - [`report`] - Mouse, keyboard and consumer report encoders
//! - [`usage`] - Button masks, modifier masks, key codes and consumer usages

pub mod descriptor;
pub mod report;
pub mod usage;

use thiserror::Error;

pub use descriptor::{ReportKind, HID_REGISTRATION, REPORT_DESCRIPTOR};
pub use report::{
    encode_keyboard_report, encode_media_report, encode_mouse_report, idle_report,
    validate_report,
};

/// Errors produced while encoding or validating a report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CodecError {
    /// A relative axis value fell outside the descriptor's logical range (-127..=127)
    #[error("{axis} value {value} is outside the logical range -127..=127")]
    OutOfRange { axis: &'static str, value: i8 },

    /// The report ID is not declared by the descriptor
    #[error("unknown report id {0}")]
    UnknownReportId(u8),

    /// The payload length does not match the report layout
    #[error("report id {report_id} expects {expected} bytes, got {actual}")]
    LengthMismatch {
        report_id: u8,
        expected: usize,
        actual: usize,
    },
}

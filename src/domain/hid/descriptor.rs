//! HID report descriptor and registration record.
//!
//! The host parses these bytes once when the device is registered, so the
//! layout below must never change shape.

use super::CodecError;

/// Keyboard report ID
pub const ID_KEYBOARD: u8 = 0x01;
/// Mouse report ID
pub const ID_MOUSE: u8 = 0x02;
/// Consumer control (media) report ID
pub const ID_CONSUMER: u8 = 0x03;

/// Keyboard payload: modifier byte, reserved byte, 6 key slots
pub const KEYBOARD_REPORT_SIZE: usize = 8;
/// Mouse payload: buttons, X, Y, wheel
pub const MOUSE_REPORT_SIZE: usize = 4;
/// Consumer payload: little-endian 16-bit usage code
pub const CONSUMER_REPORT_SIZE: usize = 2;

/// The three logical collections multiplexed by report ID
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportKind {
    Keyboard,
    Mouse,
    Consumer,
}

impl ReportKind {
    /// Look up the collection for a report ID
    pub fn from_id(report_id: u8) -> Result<Self, CodecError> {
        match report_id {
            ID_KEYBOARD => Ok(Self::Keyboard),
            ID_MOUSE => Ok(Self::Mouse),
            ID_CONSUMER => Ok(Self::Consumer),
            other => Err(CodecError::UnknownReportId(other)),
        }
    }

    pub fn id(&self) -> u8 {
        match self {
            Self::Keyboard => ID_KEYBOARD,
            Self::Mouse => ID_MOUSE,
            Self::Consumer => ID_CONSUMER,
        }
    }

    /// Payload length in bytes, excluding the report ID
    pub fn payload_len(&self) -> usize {
        match self {
            Self::Keyboard => KEYBOARD_REPORT_SIZE,
            Self::Mouse => MOUSE_REPORT_SIZE,
            Self::Consumer => CONSUMER_REPORT_SIZE,
        }
    }
}

/// Combined keyboard + mouse + consumer control report descriptor.
///
/// Every report is prefixed by its report ID (1 keyboard, 2 mouse,
/// 3 consumer), so hosts must use the report protocol.
pub const REPORT_DESCRIPTOR: &[u8] = &[
    // Keyboard (Report ID 1)
    0x05, 0x01, // Usage Page (Generic Desktop)
    0x09, 0x06, // Usage (Keyboard)
    0xA1, 0x01, // Collection (Application)
    0x85, ID_KEYBOARD, //   Report ID (1)
    0x05, 0x07, //   Usage Page (Key Codes)
    0x19, 0xE0, //   Usage Minimum (224)
    0x29, 0xE7, //   Usage Maximum (231)
    0x15, 0x00, //   Logical Minimum (0)
    0x25, 0x01, //   Logical Maximum (1)
    0x75, 0x01, //   Report Size (1)
    0x95, 0x08, //   Report Count (8)
    0x81, 0x02, //   Input (Data, Variable, Absolute) - modifier byte
    0x95, 0x01, //   Report Count (1)
    0x75, 0x08, //   Report Size (8)
    0x81, 0x01, //   Input (Constant) - reserved byte
    0x95, 0x06, //   Report Count (6)
    0x75, 0x08, //   Report Size (8)
    0x15, 0x00, //   Logical Minimum (0)
    0x25, 0x65, //   Logical Maximum (101)
    0x05, 0x07, //   Usage Page (Key Codes)
    0x19, 0x00, //   Usage Minimum (0)
    0x29, 0x65, //   Usage Maximum (101)
    0x81, 0x00, //   Input (Data, Array) - key slots
    0xC0, // End Collection
    //
    // Mouse (Report ID 2)
    0x05, 0x01, // Usage Page (Generic Desktop)
    0x09, 0x02, // Usage (Mouse)
    0xA1, 0x01, // Collection (Application)
    0x85, ID_MOUSE, //   Report ID (2)
    0x09, 0x01, //   Usage (Pointer)
    0xA1, 0x00, //   Collection (Physical)
    0x05, 0x09, //     Usage Page (Buttons)
    0x19, 0x01, //     Usage Minimum (1)
    0x29, 0x03, //     Usage Maximum (3)
    0x15, 0x00, //     Logical Minimum (0)
    0x25, 0x01, //     Logical Maximum (1)
    0x95, 0x03, //     Report Count (3)
    0x75, 0x01, //     Report Size (1)
    0x81, 0x02, //     Input (Data, Variable, Absolute) - buttons
    0x95, 0x01, //     Report Count (1)
    0x75, 0x05, //     Report Size (5)
    0x81, 0x01, //     Input (Constant) - padding
    0x05, 0x01, //     Usage Page (Generic Desktop)
    0x09, 0x30, //     Usage (X)
    0x09, 0x31, //     Usage (Y)
    0x09, 0x38, //     Usage (Wheel)
    0x15, 0x81, //     Logical Minimum (-127)
    0x25, 0x7F, //     Logical Maximum (127)
    0x75, 0x08, //     Report Size (8)
    0x95, 0x03, //     Report Count (3)
    0x81, 0x06, //     Input (Data, Variable, Relative) - X, Y, wheel
    0xC0, //   End Collection (Physical)
    0xC0, // End Collection (Application)
    //
    // Consumer Control (Report ID 3)
    0x05, 0x0C, // Usage Page (Consumer)
    0x09, 0x01, // Usage (Consumer Control)
    0xA1, 0x01, // Collection (Application)
    0x85, ID_CONSUMER, //   Report ID (3)
    0x19, 0x00, //   Usage Minimum (0)
    0x2A, 0x3C, 0x02, //   Usage Maximum (572)
    0x15, 0x00, //   Logical Minimum (0)
    0x26, 0x3C, 0x02, //   Logical Maximum (572)
    0x95, 0x01, //   Report Count (1)
    0x75, 0x10, //   Report Size (16)
    0x81, 0x00, //   Input (Data, Array)
    0xC0, // End Collection
];

/// SDP record handed to the platform's HID-profile registration call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HidRegistration {
    pub name: &'static str,
    pub description: &'static str,
    pub provider: &'static str,
    /// Combo keyboard/pointer device subclass
    pub subclass: u8,
    pub descriptor: &'static [u8],
}

/// Combined keyboard/mouse subclass from the Bluetooth HID profile
pub const SUBCLASS_COMBO: u8 = 0xC0;

pub const HID_REGISTRATION: HidRegistration = HidRegistration {
    name: "Wear HID Controller",
    description: "Keyboard, mouse and media remote",
    provider: "wear_hid_controller",
    subclass: SUBCLASS_COMBO,
    descriptor: REPORT_DESCRIPTOR,
};

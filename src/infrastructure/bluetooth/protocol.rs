//! HID over GATT Protocol
//!
//! GATT identifiers used to locate the HID service on the remote device.

use uuid::Uuid;

/// Human Interface Device service
pub const UUID_HID_SERVICE: Uuid = Uuid::from_u128(0x00001812_0000_1000_8000_00805f9b34fb);

/// HID Report characteristic (input/output reports)
pub const UUID_HID_REPORT: Uuid = Uuid::from_u128(0x00002a4d_0000_1000_8000_00805f9b34fb);

/// HID Report Map characteristic (the report descriptor)
pub const UUID_HID_REPORT_MAP: Uuid = Uuid::from_u128(0x00002a4b_0000_1000_8000_00805f9b34fb);

/// HID Information characteristic
pub const UUID_HID_INFORMATION: Uuid = Uuid::from_u128(0x00002a4a_0000_1000_8000_00805f9b34fb);

/// HID Control Point characteristic
pub const UUID_HID_CONTROL_POINT: Uuid = Uuid::from_u128(0x00002a4c_0000_1000_8000_00805f9b34fb);

/// Client Characteristic Configuration descriptor
pub const UUID_CCCD: Uuid = Uuid::from_u128(0x00002902_0000_1000_8000_00805f9b34fb);

/// GATT status code for a successful operation
pub const GATT_SUCCESS: u8 = 0x00;

/// Build a full 128-bit UUID from a 16-bit Bluetooth SIG assigned number
pub const fn sig_uuid(short: u16) -> Uuid {
    Uuid::from_u128(((short as u128) << 96) | 0x0000_0000_0000_1000_8000_00805f9b34fb)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sig_uuid_expansion() {
        assert_eq!(sig_uuid(0x1812), UUID_HID_SERVICE);
        assert_eq!(sig_uuid(0x2A4D), UUID_HID_REPORT);
        assert_eq!(sig_uuid(0x2902), UUID_CCCD);
        assert_eq!(
            UUID_HID_REPORT.to_string(),
            "00002a4d-0000-1000-8000-00805f9b34fb"
        );
    }
}

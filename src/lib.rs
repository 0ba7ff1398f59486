//! Bluetooth HID controller core for a wrist-worn device: mouse, keyboard,
//! media remote and D-pad over a single HID over GATT connection.

pub mod domain;
pub mod infrastructure;

//! Platform-independent core: report codec, sensor fusion, models and settings.

pub mod fusion;
pub mod hid;
pub mod models;
pub mod profile;
pub mod settings;

//! Bluetooth Module
//!
//! Carries HID reports to the host over a HID over GATT link.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                       HidService                         │
//! │  (Main coordinator - public API for the application)     │
//! └─────────────────────┬───────────────────────────────────┘
//!                       │
//!         ┌─────────────┼─────────────┐
//!         │             │             │
//!         ▼             ▼             ▼
//! ┌────────────┐ ┌────────────┐ ┌──────────┐
//! │ Connection │ │ Transport  │ │ Protocol │
//! │            │ │            │ │          │
//! │ - State    │ │ - Platform │ │ - UUIDs  │
//! │ - Timers   │ │   contract │ │ - Status │
//! │ - Retries  │ │ - Loopback │ │          │
//! └────────────┘ └────────────┘ └──────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`] - HID over GATT identifiers
//! - [`transport`] - The platform stack contract and its event types
//! - [`connection`] - Connection state machine, timeouts and reconnection
//! - [`loopback`] - In-process transport that records what it is sent
//! - [`service`] - Main service coordinator

pub mod connection;
pub mod loopback;
pub mod protocol;
pub mod service;
pub mod transport;

// Re-export main service for convenience
pub use service::HidService;

//! Device identity, connection states and observer events.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable identifier of a remote device (its Bluetooth address)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceId(String);

impl DeviceId {
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceId {
    fn from(address: &str) -> Self {
        Self::new(address)
    }
}

/// Lifecycle state of the single managed connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Nothing in flight; also the state after an explicit disconnect
    Idle,
    Connecting,
    ServiceDiscovery,
    Ready,
    /// Link lost or gave up; an automatic reconnect may still be pending
    Disconnected,
}

impl ConnectionState {
    /// A connect request is already being served
    pub fn is_busy(&self) -> bool {
        matches!(
            self,
            Self::Connecting | Self::ServiceDiscovery | Self::Ready
        )
    }
}

/// Notifications delivered to external observers (UI, service layer)
#[derive(Debug, Clone, PartialEq)]
pub enum HidEvent {
    ConnectionStateChanged { connected: bool, device: DeviceId },
    ServiceDiscovered(bool),
    WriteResult(bool),
    Error(String),
}

#[derive(Debug, Clone)]
pub struct StatusMessage {
    pub message: String,
    pub severity: MessageSeverity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageSeverity {
    Info,
    Success,
    Warning,
    Error,
}

impl From<&HidEvent> for StatusMessage {
    fn from(event: &HidEvent) -> Self {
        match event {
            HidEvent::ConnectionStateChanged { connected: true, device } => StatusMessage {
                message: format!("Connected to {}", device),
                severity: MessageSeverity::Success,
            },
            HidEvent::ConnectionStateChanged { connected: false, device } => StatusMessage {
                message: format!("Disconnected from {}", device),
                severity: MessageSeverity::Info,
            },
            HidEvent::ServiceDiscovered(true) => StatusMessage {
                message: "HID service ready".to_string(),
                severity: MessageSeverity::Success,
            },
            HidEvent::ServiceDiscovered(false) => StatusMessage {
                message: "HID service discovery failed".to_string(),
                severity: MessageSeverity::Warning,
            },
            HidEvent::WriteResult(ok) => StatusMessage {
                message: format!("Report write {}", if *ok { "ok" } else { "failed" }),
                severity: if *ok {
                    MessageSeverity::Info
                } else {
                    MessageSeverity::Warning
                },
            },
            HidEvent::Error(message) => StatusMessage {
                message: message.clone(),
                severity: MessageSeverity::Error,
            },
        }
    }
}

//! Transport Abstraction
//!
//! The narrow contract the connection state machine needs from a platform
//! Bluetooth stack. Callbacks come back as [`TransportEvent`]s through an
//! [`EventSink`] tagged with the session that opened the link, so events from
//! an abandoned attempt can be recognised and dropped.

use crate::domain::models::DeviceId;
use tokio::sync::mpsc;
use tracing::trace;
use uuid::Uuid;

/// Attribute handle of a remote characteristic
pub type Handle = u16;

/// Monotonic id of one `open_connection` call
pub type SessionId = u64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredCharacteristic {
    pub uuid: Uuid,
    pub handle: Handle,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredService {
    pub uuid: Uuid,
    pub characteristics: Vec<DiscoveredCharacteristic>,
}

impl DiscoveredService {
    pub fn characteristic(&self, uuid: Uuid) -> Option<&DiscoveredCharacteristic> {
        self.characteristics.iter().find(|c| c.uuid == uuid)
    }
}

/// Callbacks raised by the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Connected,
    /// `status == protocol::GATT_SUCCESS` means the link was closed on purpose
    Disconnected { status: u8 },
    ServicesDiscovered {
        status: u8,
        services: Vec<DiscoveredService>,
    },
    WriteComplete { success: bool },
}

/// Where a transport delivers callbacks for one session
#[derive(Debug, Clone)]
pub struct EventSink {
    session: SessionId,
    tx: mpsc::UnboundedSender<(SessionId, TransportEvent)>,
}

impl EventSink {
    pub fn new(session: SessionId, tx: mpsc::UnboundedSender<(SessionId, TransportEvent)>) -> Self {
        Self { session, tx }
    }

    pub fn session(&self) -> SessionId {
        self.session
    }

    /// Returns false once the connection manager is gone
    pub fn emit(&self, event: TransportEvent) -> bool {
        trace!("Transport event (session {}): {:?}", self.session, event);
        self.tx.send((self.session, event)).is_ok()
    }
}

/// Platform Bluetooth stack as seen by the connection state machine.
///
/// Every method is non-blocking: results that take time arrive later as
/// events on the [`EventSink`] passed to [`Transport::open_connection`].
pub trait Transport: Send + Sync {
    /// Whether the platform has granted Bluetooth connect access
    fn has_permissions(&self) -> bool;

    /// Begin connecting; false if the stack refused to start
    fn open_connection(&self, device: &DeviceId, events: EventSink) -> bool;

    /// Request service discovery on the open link
    fn discover_services(&self) -> bool;

    /// Write one value; false if the write could not be queued
    fn write_characteristic(&self, handle: Handle, data: &[u8]) -> bool;

    fn enable_notifications(&self, handle: Handle) -> bool;

    /// Tear down the link; must tolerate being called when nothing is open
    fn close(&self);
}

//! In-process transport.
//!
//! Behaves like a well-mannered HID over GATT peer: it connects at once,
//! exposes the HID service on discovery and acknowledges every write. Each
//! step can be scripted to misbehave, and every call is recorded.

use crate::domain::models::DeviceId;
use crate::infrastructure::bluetooth::protocol::{
    sig_uuid, GATT_SUCCESS, UUID_HID_CONTROL_POINT, UUID_HID_INFORMATION, UUID_HID_REPORT,
    UUID_HID_REPORT_MAP, UUID_HID_SERVICE,
};
use crate::infrastructure::bluetooth::transport::{
    DiscoveredCharacteristic, DiscoveredService, EventSink, Handle, Transport, TransportEvent,
};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::time::Instant;
use tracing::debug;
use uuid::Uuid;

/// Handle the loopback peer assigns to the HID report characteristic
pub const REPORT_HANDLE: Handle = 0x0012;

/// Generic Access service, present on every peer
const UUID_GENERIC_ACCESS: Uuid = sig_uuid(0x1800);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenBehavior {
    /// Report connected immediately
    Connect,
    /// `open_connection` returns false
    Refuse,
    /// Accept, then report an immediate disconnect with `status`
    Drop { status: u8 },
    /// Accept and never answer
    Silent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryBehavior {
    HidService,
    NoHidService,
    /// HID service present without its report characteristic
    MissingReport,
    Status(u8),
    Silent,
    /// `discover_services` returns false
    Refuse,
}

/// One characteristic write as seen by the peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedWrite {
    pub handle: Handle,
    pub data: Vec<u8>,
    pub at: Instant,
}

impl RecordedWrite {
    pub fn report_id(&self) -> Option<u8> {
        self.data.first().copied()
    }

    pub fn payload(&self) -> &[u8] {
        self.data.get(1..).unwrap_or_default()
    }
}

struct LoopbackState {
    permissions: bool,
    open_behavior: OpenBehavior,
    discovery_behavior: DiscoveryBehavior,
    write_ok: bool,

    sink: Option<EventSink>,
    device: Option<DeviceId>,
    opens: usize,
    closes: usize,
    discoveries: usize,
    notifications: Vec<Handle>,
    writes: Vec<RecordedWrite>,
}

pub struct LoopbackTransport {
    state: Mutex<LoopbackState>,
}

impl Default for LoopbackTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopbackTransport {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(LoopbackState {
                permissions: true,
                open_behavior: OpenBehavior::Connect,
                discovery_behavior: DiscoveryBehavior::HidService,
                write_ok: true,
                sink: None,
                device: None,
                opens: 0,
                closes: 0,
                discoveries: 0,
                notifications: Vec::new(),
                writes: Vec::new(),
            }),
        }
    }

    /// The service table of a healthy HID over GATT peer
    pub fn hid_services() -> Vec<DiscoveredService> {
        vec![
            DiscoveredService {
                uuid: UUID_GENERIC_ACCESS,
                characteristics: Vec::new(),
            },
            DiscoveredService {
                uuid: UUID_HID_SERVICE,
                characteristics: vec![
                    DiscoveredCharacteristic {
                        uuid: UUID_HID_INFORMATION,
                        handle: 0x000E,
                    },
                    DiscoveredCharacteristic {
                        uuid: UUID_HID_REPORT_MAP,
                        handle: 0x0010,
                    },
                    DiscoveredCharacteristic {
                        uuid: UUID_HID_REPORT,
                        handle: REPORT_HANDLE,
                    },
                    DiscoveredCharacteristic {
                        uuid: UUID_HID_CONTROL_POINT,
                        handle: 0x0016,
                    },
                ],
            },
        ]
    }

    fn lock(&self) -> MutexGuard<'_, LoopbackState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_permissions(&self, granted: bool) {
        self.lock().permissions = granted;
    }

    pub fn set_open_behavior(&self, behavior: OpenBehavior) {
        self.lock().open_behavior = behavior;
    }

    pub fn set_discovery_behavior(&self, behavior: DiscoveryBehavior) {
        self.lock().discovery_behavior = behavior;
    }

    pub fn set_write_ok(&self, ok: bool) {
        self.lock().write_ok = ok;
    }

    /// Simulate the peer dropping the link
    pub fn drop_link(&self, status: u8) {
        if let Some(sink) = self.lock().sink.as_ref() {
            sink.emit(TransportEvent::Disconnected { status });
        }
    }

    pub fn current_sink(&self) -> Option<EventSink> {
        self.lock().sink.clone()
    }

    pub fn connected_device(&self) -> Option<DeviceId> {
        self.lock().device.clone()
    }

    pub fn opens(&self) -> usize {
        self.lock().opens
    }

    pub fn closes(&self) -> usize {
        self.lock().closes
    }

    pub fn discovery_requests(&self) -> usize {
        self.lock().discoveries
    }

    pub fn notifications(&self) -> Vec<Handle> {
        self.lock().notifications.clone()
    }

    pub fn writes(&self) -> Vec<RecordedWrite> {
        self.lock().writes.clone()
    }

    pub fn clear_writes(&self) {
        self.lock().writes.clear();
    }
}

impl Transport for LoopbackTransport {
    fn has_permissions(&self) -> bool {
        self.lock().permissions
    }

    fn open_connection(&self, device: &DeviceId, events: EventSink) -> bool {
        let mut state = self.lock();
        state.opens += 1;
        debug!("Loopback open #{} for {}", state.opens, device);

        match state.open_behavior {
            OpenBehavior::Refuse => return false,
            OpenBehavior::Connect => {
                events.emit(TransportEvent::Connected);
            }
            OpenBehavior::Drop { status } => {
                events.emit(TransportEvent::Disconnected { status });
            }
            OpenBehavior::Silent => {}
        }
        state.device = Some(device.clone());
        state.sink = Some(events);
        true
    }

    fn discover_services(&self) -> bool {
        let mut state = self.lock();
        state.discoveries += 1;
        let Some(sink) = state.sink.as_ref() else {
            return false;
        };

        let (status, services) = match state.discovery_behavior {
            DiscoveryBehavior::Refuse => return false,
            DiscoveryBehavior::Silent => return true,
            DiscoveryBehavior::HidService => (GATT_SUCCESS, Self::hid_services()),
            DiscoveryBehavior::NoHidService => {
                let mut services = Self::hid_services();
                services.retain(|s| s.uuid != UUID_HID_SERVICE);
                (GATT_SUCCESS, services)
            }
            DiscoveryBehavior::MissingReport => {
                let mut services = Self::hid_services();
                for service in &mut services {
                    service.characteristics.retain(|c| c.uuid != UUID_HID_REPORT);
                }
                (GATT_SUCCESS, services)
            }
            DiscoveryBehavior::Status(status) => (status, Vec::new()),
        };
        sink.emit(TransportEvent::ServicesDiscovered { status, services });
        true
    }

    fn write_characteristic(&self, handle: Handle, data: &[u8]) -> bool {
        let mut state = self.lock();
        if !state.write_ok || state.sink.is_none() {
            return false;
        }

        state.writes.push(RecordedWrite {
            handle,
            data: data.to_vec(),
            at: Instant::now(),
        });
        if let Some(sink) = state.sink.as_ref() {
            sink.emit(TransportEvent::WriteComplete { success: true });
        }
        true
    }

    fn enable_notifications(&self, handle: Handle) -> bool {
        self.lock().notifications.push(handle);
        true
    }

    fn close(&self) {
        let mut state = self.lock();
        state.closes += 1;
        state.sink = None;
        state.device = None;
    }
}

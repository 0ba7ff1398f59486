//! BLE Connection Module
//!
//! Owns one device connection end to end: connect, service discovery,
//! report writes, timeouts and automatic reconnection.
//!
//! ```text
//! Idle -> Connecting -> ServiceDiscovery -> Ready
//!            |  ^              |              |
//!            v  | (retry)      v              v
//!           Disconnected <-----+--------------+
//! ```
//!
//! Transport callbacks and timer expirations are applied under one lock, so
//! they are serialized per connection. Every timer carries the epoch it was
//! armed with; a timer that fires after being cancelled or re-armed sees a
//! newer epoch and does nothing. Transport events carry the session id of
//! the `open_connection` call that produced them and are dropped once that
//! session has been abandoned.

use crate::domain::models::{ConnectionState, DeviceId, HidEvent};
use crate::domain::settings::{ConnectionSettings, Settings};
use crate::infrastructure::bluetooth::protocol::{GATT_SUCCESS, UUID_HID_REPORT, UUID_HID_SERVICE};
use crate::infrastructure::bluetooth::transport::{
    DiscoveredService, EventSink, Handle, SessionId, Transport, TransportEvent,
};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tokio::runtime::Handle as RuntimeHandle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ConnectionError {
    #[error("a connection is already in progress")]
    AlreadyInProgress,
    #[error("missing Bluetooth permissions")]
    PermissionDenied,
    #[error("connection is not ready for reports")]
    NotReady,
    #[error("transport refused to open a connection")]
    TransportRejected,
    #[error("report write failed")]
    WriteFailed,
}

/// Anything that can carry a framed HID report to the host
pub trait ReportSink: Send + Sync {
    fn send_report(&self, report_id: u8, payload: &[u8]) -> Result<(), ConnectionError>;
}

/// One cancellable timer slot
#[derive(Default)]
struct Timer {
    epoch: u64,
    task: Option<JoinHandle<()>>,
}

impl Timer {
    fn cancel(&mut self) {
        self.epoch += 1;
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    /// Cancel any previous instance and return the epoch for the new one
    fn arm(&mut self) -> u64 {
        self.cancel();
        self.epoch
    }

    /// Called from the timer's own task; the handle is released, not aborted
    fn fire(&mut self, epoch: u64) -> bool {
        if self.epoch != epoch {
            return false;
        }
        self.task = None;
        true
    }

    fn is_current(&self, epoch: u64) -> bool {
        self.epoch == epoch
    }
}

struct Inner {
    state: ConnectionState,
    device: Option<DeviceId>,
    attempt: u32,
    report_handle: Option<Handle>,
    session: SessionId,

    connect_timer: Timer,
    discovery_timer: Timer,
    retry_timer: Timer,
}

impl Inner {
    fn cancel_timers(&mut self) {
        self.connect_timer.cancel();
        self.discovery_timer.cancel();
        self.retry_timer.cancel();
    }
}

struct Shared {
    transport: Arc<dyn Transport>,
    settings: ConnectionSettings,
    auto_reconnect: bool,
    observer: mpsc::UnboundedSender<HidEvent>,
    transport_tx: mpsc::UnboundedSender<(SessionId, TransportEvent)>,
    runtime: RuntimeHandle,
    inner: Mutex<Inner>,
}

/// Connection state machine for a single remote device
pub struct ConnectionManager {
    shared: Arc<Shared>,
    worker: JoinHandle<()>,
}

impl ConnectionManager {
    /// Create a manager that reports to `observer`.
    ///
    /// Must be called from within a tokio runtime; timers and the transport
    /// event worker run on that runtime.
    pub fn new(
        transport: Arc<dyn Transport>,
        settings: &Settings,
        observer: mpsc::UnboundedSender<HidEvent>,
    ) -> Self {
        let (transport_tx, mut transport_rx) = mpsc::unbounded_channel();
        let runtime = RuntimeHandle::current();

        let shared = Arc::new(Shared {
            transport,
            settings: settings.connection.clone(),
            auto_reconnect: settings.auto_reconnect,
            observer,
            transport_tx,
            runtime: runtime.clone(),
            inner: Mutex::new(Inner {
                state: ConnectionState::Idle,
                device: None,
                attempt: 0,
                report_handle: None,
                session: 0,
                connect_timer: Timer::default(),
                discovery_timer: Timer::default(),
                retry_timer: Timer::default(),
            }),
        });

        let worker_shared = shared.clone();
        let worker = runtime.spawn(async move {
            while let Some((session, event)) = transport_rx.recv().await {
                worker_shared.handle_event(session, event);
            }
        });

        Self { shared, worker }
    }

    /// Start connecting to `device`
    pub fn connect(&self, device: &DeviceId) -> Result<(), ConnectionError> {
        self.shared.connect(device)
    }

    /// Drop the connection and any pending retry; never triggers a reconnect
    pub fn disconnect(&self) {
        self.shared.disconnect();
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.lock().state
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Ready
    }

    /// Attempts made since the last explicit disconnect or exhausted budget
    pub fn attempts(&self) -> u32 {
        self.shared.lock().attempt
    }

    pub fn device(&self) -> Option<DeviceId> {
        self.shared.lock().device.clone()
    }
}

impl ReportSink for ConnectionManager {
    fn send_report(&self, report_id: u8, payload: &[u8]) -> Result<(), ConnectionError> {
        self.shared.send_report(report_id, payload)
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.shared.lock().cancel_timers();
        self.worker.abort();
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn notify(&self, event: HidEvent) {
        debug!("Observer event: {:?}", event);
        let _ = self.observer.send(event);
    }

    fn report_error(&self, message: impl Into<String>) {
        let message = message.into();
        error!("{}", message);
        self.notify(HidEvent::Error(message));
    }

    fn spawn_timer<F>(&self, fut: F) -> JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.runtime.spawn(fut)
    }

    fn connect(self: &Arc<Self>, device: &DeviceId) -> Result<(), ConnectionError> {
        let mut inner = self.lock();

        if inner.state.is_busy() {
            warn!(
                "Already connecting or connected to {}",
                inner.device.as_ref().map(DeviceId::as_str).unwrap_or("?")
            );
            return Err(ConnectionError::AlreadyInProgress);
        }

        // A user-initiated connect supersedes any scheduled reconnect
        inner.retry_timer.cancel();
        if inner.attempt >= self.settings.max_attempts {
            inner.attempt = 0;
        }

        info!("Connecting to HID device: {}", device);
        self.start_attempt(&mut inner, device.clone())
    }

    fn start_attempt(
        self: &Arc<Self>,
        inner: &mut Inner,
        device: DeviceId,
    ) -> Result<(), ConnectionError> {
        inner.attempt += 1;
        if !self.transport.has_permissions() {
            self.report_error("Missing Bluetooth permissions");
            return Err(ConnectionError::PermissionDenied);
        }

        inner.session += 1;
        inner.device = Some(device.clone());
        inner.report_handle = None;
        inner.state = ConnectionState::Connecting;

        let sink = EventSink::new(inner.session, self.transport_tx.clone());
        if !self.transport.open_connection(&device, sink) {
            inner.state = ConnectionState::Disconnected;
            self.report_error("Failed to create GATT connection");
            return Err(ConnectionError::TransportRejected);
        }
        debug!(
            "GATT connection initiated (attempt {}, session {})",
            inner.attempt, inner.session
        );

        let epoch = inner.connect_timer.arm();
        let shared = self.clone();
        let timeout = self.settings.connect_timeout();
        inner.connect_timer.task = Some(self.spawn_timer(async move {
            tokio::time::sleep(timeout).await;
            shared.on_connect_timeout(epoch);
        }));

        Ok(())
    }

    fn on_connect_timeout(&self, epoch: u64) {
        let mut inner = self.lock();
        if !inner.connect_timer.fire(epoch) || inner.state != ConnectionState::Connecting {
            return;
        }

        warn!(
            "Connection timeout after {}ms",
            self.settings.connect_timeout_ms
        );
        self.teardown(&mut inner, ConnectionState::Disconnected);
        self.report_error("Connection timeout - device may be out of range");
    }

    fn handle_event(self: &Arc<Self>, session: SessionId, event: TransportEvent) {
        let mut inner = self.lock();
        if session != inner.session {
            debug!(
                "Dropping stale transport event from session {} (current {}): {:?}",
                session, inner.session, event
            );
            return;
        }

        match event {
            TransportEvent::Connected => self.on_connected(&mut inner),
            TransportEvent::Disconnected { status } => self.on_disconnected(&mut inner, status),
            TransportEvent::ServicesDiscovered { status, services } => {
                self.on_services_discovered(&mut inner, status, &services)
            }
            TransportEvent::WriteComplete { success } => {
                if success {
                    debug!("Characteristic write successful");
                } else {
                    warn!("Characteristic write failed");
                }
                self.notify(HidEvent::WriteResult(success));
            }
        }
    }

    fn on_connected(self: &Arc<Self>, inner: &mut Inner) {
        if inner.state != ConnectionState::Connecting {
            debug!("Ignoring connected event in state {:?}", inner.state);
            return;
        }
        let Some(device) = inner.device.clone() else {
            return;
        };

        info!("Successfully connected to {}", device);
        inner.connect_timer.cancel();
        inner.state = ConnectionState::ServiceDiscovery;
        self.notify(HidEvent::ConnectionStateChanged {
            connected: true,
            device,
        });

        let epoch = inner.discovery_timer.arm();
        let shared = self.clone();
        let settle = self.settings.settle_delay();
        let timeout = self.settings.discovery_timeout();
        inner.discovery_timer.task = Some(self.spawn_timer(async move {
            tokio::time::sleep(settle).await;
            if !shared.request_discovery(epoch) {
                return;
            }
            tokio::time::sleep(timeout).await;
            shared.on_discovery_timeout(epoch);
        }));
    }

    fn request_discovery(&self, epoch: u64) -> bool {
        let mut inner = self.lock();
        if !inner.discovery_timer.is_current(epoch)
            || inner.state != ConnectionState::ServiceDiscovery
        {
            return false;
        }

        if !self.transport.discover_services() {
            self.fail_discovery(&mut inner, "Failed to start service discovery");
            return false;
        }
        debug!("Service discovery requested");
        true
    }

    fn on_discovery_timeout(&self, epoch: u64) {
        let mut inner = self.lock();
        if !inner.discovery_timer.fire(epoch) || inner.state != ConnectionState::ServiceDiscovery {
            return;
        }
        warn!("Service discovery timeout");
        self.fail_discovery(&mut inner, "Service discovery timeout");
    }

    fn on_services_discovered(&self, inner: &mut Inner, status: u8, services: &[DiscoveredService]) {
        if inner.state != ConnectionState::ServiceDiscovery {
            debug!("Ignoring discovery result in state {:?}", inner.state);
            return;
        }
        inner.discovery_timer.cancel();

        if status != GATT_SUCCESS {
            self.fail_discovery(
                inner,
                &format!("Service discovery failed (status: {})", status),
            );
            return;
        }
        info!("Services discovered ({} services)", services.len());

        let Some(service) = services.iter().find(|s| s.uuid == UUID_HID_SERVICE) else {
            self.fail_discovery(inner, "Device does not support HID over GATT");
            return;
        };
        let Some(report) = service.characteristic(UUID_HID_REPORT) else {
            self.fail_discovery(inner, "HID report characteristic not available");
            return;
        };

        if !self.transport.enable_notifications(report.handle) {
            warn!("Failed to enable notifications on HID report characteristic");
        }

        inner.report_handle = Some(report.handle);
        inner.state = ConnectionState::Ready;
        info!("HID service ready (report handle {:#06x})", report.handle);
        self.notify(HidEvent::ServiceDiscovered(true));
    }

    /// Discovery problems are capability mismatches or stalls; not retried
    fn fail_discovery(&self, inner: &mut Inner, message: &str) {
        self.notify(HidEvent::ServiceDiscovered(false));
        self.report_error(message);
        self.teardown(inner, ConnectionState::Disconnected);
    }

    fn on_disconnected(self: &Arc<Self>, inner: &mut Inner, status: u8) {
        if matches!(
            inner.state,
            ConnectionState::Idle | ConnectionState::Disconnected
        ) {
            debug!("Ignoring repeated disconnect (status {})", status);
            return;
        }
        let Some(device) = inner.device.clone() else {
            return;
        };

        inner.cancel_timers();
        inner.report_handle = None;
        self.transport.close();
        inner.state = ConnectionState::Disconnected;
        info!("Disconnected from {} (status {})", device, status);
        self.notify(HidEvent::ConnectionStateChanged {
            connected: false,
            device: device.clone(),
        });

        if status == GATT_SUCCESS || !self.auto_reconnect {
            return;
        }

        if inner.attempt < self.settings.max_attempts {
            let delay = self.settings.retry_delay(inner.attempt);
            warn!(
                "Unexpected disconnection, scheduling reconnection attempt {} in {}ms",
                inner.attempt + 1,
                delay.as_millis()
            );
            let epoch = inner.retry_timer.arm();
            let shared = self.clone();
            inner.retry_timer.task = Some(self.spawn_timer(async move {
                tokio::time::sleep(delay).await;
                shared.on_retry(epoch, device);
            }));
        } else {
            self.report_error(format!(
                "Connection lost after {} attempts",
                inner.attempt
            ));
        }
    }

    fn on_retry(self: &Arc<Self>, epoch: u64, device: DeviceId) {
        let mut inner = self.lock();
        if !inner.retry_timer.fire(epoch) || inner.state != ConnectionState::Disconnected {
            return;
        }
        info!("Reconnecting to {} (attempt {})", device, inner.attempt + 1);
        if let Err(e) = self.start_attempt(&mut inner, device) {
            warn!("Reconnection attempt failed to start: {}", e);
            self.report_error(format!(
                "Connection lost after {} attempts",
                inner.attempt
            ));
        }
    }

    /// Cancel timers, close the transport and abandon the current session
    fn teardown(&self, inner: &mut Inner, next: ConnectionState) {
        let was_connected = matches!(
            inner.state,
            ConnectionState::ServiceDiscovery | ConnectionState::Ready
        );

        inner.cancel_timers();
        inner.report_handle = None;
        inner.session += 1;
        self.transport.close();
        inner.state = next;

        if was_connected {
            if let Some(device) = inner.device.clone() {
                self.notify(HidEvent::ConnectionStateChanged {
                    connected: false,
                    device,
                });
            }
        }
    }

    fn disconnect(&self) {
        let mut inner = self.lock();
        info!("Disconnecting from device");
        self.teardown(&mut inner, ConnectionState::Idle);
        inner.attempt = 0;
        inner.device = None;
    }

    fn send_report(&self, report_id: u8, payload: &[u8]) -> Result<(), ConnectionError> {
        let inner = self.lock();

        let handle = match (inner.state, inner.report_handle) {
            (ConnectionState::Ready, Some(handle)) => handle,
            _ => {
                warn!("Cannot send report: not connected or missing characteristic");
                return Err(ConnectionError::NotReady);
            }
        };

        if !self.transport.has_permissions() {
            warn!("Cannot send report: missing permissions");
            return Err(ConnectionError::PermissionDenied);
        }

        let mut frame = Vec::with_capacity(payload.len() + 1);
        frame.push(report_id);
        frame.extend_from_slice(payload);
        debug!("Sending report {}: {:02X?}", report_id, payload);

        if !self.transport.write_characteristic(handle, &frame) {
            warn!("Failed to write characteristic");
            self.notify(HidEvent::WriteResult(false));
            return Err(ConnectionError::WriteFailed);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::bluetooth::loopback::{
        DiscoveryBehavior, LoopbackTransport, OpenBehavior, REPORT_HANDLE,
    };
    use std::time::Duration;
    use tokio::time::sleep;

    struct Harness {
        transport: Arc<LoopbackTransport>,
        manager: ConnectionManager,
        events: mpsc::UnboundedReceiver<HidEvent>,
    }

    impl Harness {
        fn new() -> Self {
            let transport = Arc::new(LoopbackTransport::new());
            let (tx, events) = mpsc::unbounded_channel();
            let manager = ConnectionManager::new(transport.clone(), &Settings::default(), tx);
            Self {
                transport,
                manager,
                events,
            }
        }

        fn drain(&mut self) -> Vec<HidEvent> {
            let mut out = Vec::new();
            while let Ok(event) = self.events.try_recv() {
                out.push(event);
            }
            out
        }

        fn errors(&mut self) -> Vec<String> {
            self.drain()
                .into_iter()
                .filter_map(|e| match e {
                    HidEvent::Error(m) => Some(m),
                    _ => None,
                })
                .collect()
        }
    }

    fn device() -> DeviceId {
        DeviceId::new("AA:BB:CC:DD:EE:FF")
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_reaches_ready() {
        let mut h = Harness::new();
        h.manager.connect(&device()).unwrap();
        sleep(Duration::from_millis(600)).await;

        assert_eq!(h.manager.state(), ConnectionState::Ready);
        assert!(h.manager.is_connected());
        assert_eq!(h.manager.attempts(), 1);
        assert_eq!(h.transport.notifications(), vec![REPORT_HANDLE]);

        let events = h.drain();
        assert!(events.contains(&HidEvent::ConnectionStateChanged {
            connected: true,
            device: device()
        }));
        assert!(events.contains(&HidEvent::ServiceDiscovered(true)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_discovery_waits_for_settle_delay() {
        let h = Harness::new();
        h.manager.connect(&device()).unwrap();
        sleep(Duration::from_millis(400)).await;
        assert_eq!(h.manager.state(), ConnectionState::ServiceDiscovery);
        assert_eq!(h.transport.discovery_requests(), 0);
        sleep(Duration::from_millis(200)).await;
        assert_eq!(h.transport.discovery_requests(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_while_busy_is_rejected() {
        let h = Harness::new();
        h.transport.set_open_behavior(OpenBehavior::Silent);
        h.manager.connect(&device()).unwrap();
        assert_eq!(h.manager.state(), ConnectionState::Connecting);

        let other = DeviceId::new("11:22:33:44:55:66");
        assert_eq!(
            h.manager.connect(&other),
            Err(ConnectionError::AlreadyInProgress)
        );
        assert_eq!(h.transport.opens(), 1);
        assert_eq!(h.manager.attempts(), 1);
        assert_eq!(h.manager.device(), Some(device()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_timeout_is_not_retried() {
        let mut h = Harness::new();
        h.transport.set_open_behavior(OpenBehavior::Silent);
        h.manager.connect(&device()).unwrap();

        sleep(Duration::from_secs(29)).await;
        assert_eq!(h.manager.state(), ConnectionState::Connecting);
        sleep(Duration::from_secs(2)).await;

        assert_eq!(h.manager.state(), ConnectionState::Disconnected);
        assert_eq!(h.transport.closes(), 1);
        assert_eq!(
            h.errors(),
            vec!["Connection timeout - device may be out of range".to_string()]
        );

        sleep(Duration::from_secs(60)).await;
        assert_eq!(h.transport.opens(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_hid_service_is_terminal() {
        let mut h = Harness::new();
        h.transport
            .set_discovery_behavior(DiscoveryBehavior::NoHidService);
        h.manager.connect(&device()).unwrap();
        sleep(Duration::from_secs(1)).await;

        assert_eq!(h.manager.state(), ConnectionState::Disconnected);
        let events = h.drain();
        assert!(events.contains(&HidEvent::ServiceDiscovered(false)));
        assert!(events.contains(&HidEvent::Error(
            "Device does not support HID over GATT".to_string()
        )));

        sleep(Duration::from_secs(60)).await;
        assert_eq!(h.transport.opens(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_report_characteristic_is_terminal() {
        let mut h = Harness::new();
        h.transport
            .set_discovery_behavior(DiscoveryBehavior::MissingReport);
        h.manager.connect(&device()).unwrap();
        sleep(Duration::from_secs(1)).await;

        assert_eq!(h.manager.state(), ConnectionState::Disconnected);
        assert!(h
            .errors()
            .contains(&"HID report characteristic not available".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_discovery_timeout() {
        let mut h = Harness::new();
        h.transport.set_discovery_behavior(DiscoveryBehavior::Silent);
        h.manager.connect(&device()).unwrap();

        sleep(Duration::from_millis(10_400)).await;
        assert_eq!(h.manager.state(), ConnectionState::ServiceDiscovery);
        sleep(Duration::from_millis(200)).await;

        assert_eq!(h.manager.state(), ConnectionState::Disconnected);
        assert_eq!(h.errors(), vec!["Service discovery timeout".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_discovery_result_after_disconnect_is_ignored() {
        let h = Harness::new();
        h.transport.set_discovery_behavior(DiscoveryBehavior::Silent);
        h.manager.connect(&device()).unwrap();
        sleep(Duration::from_secs(1)).await;
        let stale = h.transport.current_sink().unwrap();

        h.manager.disconnect();
        stale.emit(TransportEvent::ServicesDiscovered {
            status: GATT_SUCCESS,
            services: LoopbackTransport::hid_services(),
        });
        sleep(Duration::from_secs(20)).await;

        assert_eq!(h.manager.state(), ConnectionState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unexpected_disconnect_retries_with_backoff() {
        let h = Harness::new();
        h.manager.connect(&device()).unwrap();
        sleep(Duration::from_secs(1)).await;
        assert!(h.manager.is_connected());

        h.transport.set_open_behavior(OpenBehavior::Silent);
        h.transport.drop_link(0x08);
        sleep(Duration::from_millis(10)).await;
        assert_eq!(h.manager.state(), ConnectionState::Disconnected);

        assert_eq!(h.transport.opens(), 1);

        sleep(Duration::from_secs(2)).await;
        assert_eq!(h.transport.opens(), 2);
        assert_eq!(h.manager.state(), ConnectionState::Connecting);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_budget_is_bounded() {
        let mut h = Harness::new();
        h.transport
            .set_open_behavior(OpenBehavior::Drop { status: 133 });
        h.manager.connect(&device()).unwrap();

        // Backoff 2 + 4 + 6 + 8 seconds
        sleep(Duration::from_secs(30)).await;
        assert_eq!(h.transport.opens(), 5);
        assert_eq!(h.manager.state(), ConnectionState::Disconnected);
        assert_eq!(
            h.errors(),
            vec!["Connection lost after 5 attempts".to_string()]
        );

        sleep(Duration::from_secs(60)).await;
        assert_eq!(h.transport.opens(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clean_disconnect_does_not_retry() {
        let h = Harness::new();
        h.manager.connect(&device()).unwrap();
        sleep(Duration::from_secs(1)).await;

        h.transport.drop_link(GATT_SUCCESS);
        sleep(Duration::from_secs(30)).await;
        assert_eq!(h.manager.state(), ConnectionState::Disconnected);
        assert_eq!(h.transport.opens(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_explicit_disconnect_cancels_pending_retry() {
        let h = Harness::new();
        h.transport
            .set_open_behavior(OpenBehavior::Drop { status: 133 });
        h.manager.connect(&device()).unwrap();
        sleep(Duration::from_millis(10)).await;
        assert_eq!(h.manager.state(), ConnectionState::Disconnected);

        h.manager.disconnect();
        assert_eq!(h.manager.state(), ConnectionState::Idle);
        assert_eq!(h.manager.attempts(), 0);

        sleep(Duration::from_secs(60)).await;
        assert_eq!(h.transport.opens(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_permissions() {
        let mut h = Harness::new();
        h.transport.set_permissions(false);
        assert_eq!(
            h.manager.connect(&device()),
            Err(ConnectionError::PermissionDenied)
        );
        assert_eq!(h.transport.opens(), 0);
        assert_eq!(h.manager.attempts(), 1);
        assert_eq!(h.manager.state(), ConnectionState::Idle);
        assert_eq!(h.errors(), vec!["Missing Bluetooth permissions".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_revoked_permissions_end_reconnection() {
        let mut h = Harness::new();
        h.manager.connect(&device()).unwrap();
        sleep(Duration::from_secs(1)).await;
        h.drain();

        h.transport.set_permissions(false);
        h.transport.drop_link(0x08);
        sleep(Duration::from_secs(3)).await;

        assert_eq!(h.manager.state(), ConnectionState::Disconnected);
        assert_eq!(h.manager.attempts(), 2);
        assert_eq!(
            h.errors(),
            vec![
                "Missing Bluetooth permissions".to_string(),
                "Connection lost after 2 attempts".to_string(),
            ]
        );

        sleep(Duration::from_secs(60)).await;
        assert_eq!(h.transport.opens(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_flapping_link_exhausts_retry_budget() {
        let mut h = Harness::new();
        h.manager.connect(&device()).unwrap();

        for _ in 0..10 {
            sleep(Duration::from_secs(1)).await;
            if h.manager.is_connected() {
                h.transport.drop_link(0x08);
            }
            // Longest backoff is 4 x 2 s
            sleep(Duration::from_secs(9)).await;
        }

        assert_eq!(h.transport.opens(), 5);
        assert_eq!(h.manager.state(), ConnectionState::Disconnected);
        assert!(h
            .errors()
            .contains(&"Connection lost after 5 attempts".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_user_connect_supersedes_scheduled_retry() {
        let h = Harness::new();
        h.manager.connect(&device()).unwrap();
        sleep(Duration::from_secs(1)).await;

        h.transport.drop_link(0x08);
        sleep(Duration::from_millis(10)).await;
        assert_eq!(h.manager.state(), ConnectionState::Disconnected);

        h.transport.set_open_behavior(OpenBehavior::Silent);
        h.manager.connect(&device()).unwrap();
        assert_eq!(h.transport.opens(), 2);

        // Past the 2 s backoff of the superseded retry
        sleep(Duration::from_secs(5)).await;
        assert_eq!(h.transport.opens(), 2);
        assert_eq!(h.manager.attempts(), 2);
        assert_eq!(h.manager.state(), ConnectionState::Connecting);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refused_open() {
        let mut h = Harness::new();
        h.transport.set_open_behavior(OpenBehavior::Refuse);
        assert_eq!(
            h.manager.connect(&device()),
            Err(ConnectionError::TransportRejected)
        );
        assert_eq!(h.manager.state(), ConnectionState::Disconnected);
        assert_eq!(
            h.errors(),
            vec!["Failed to create GATT connection".to_string()]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_report_requires_ready() {
        let h = Harness::new();
        assert_eq!(
            h.manager.send_report(2, &[0, 0, 0, 0]),
            Err(ConnectionError::NotReady)
        );

        h.manager.connect(&device()).unwrap();
        sleep(Duration::from_secs(1)).await;
        h.manager.send_report(2, &[1, 0, 0, 0]).unwrap();

        let writes = h.transport.writes();
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].handle, REPORT_HANDLE);
        assert_eq!(writes[0].data, vec![2, 1, 0, 0, 0]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_failure_and_result_events() {
        let mut h = Harness::new();
        h.manager.connect(&device()).unwrap();
        sleep(Duration::from_secs(1)).await;
        h.drain();

        h.manager.send_report(3, &[0xE9, 0x00]).unwrap();
        sleep(Duration::from_millis(1)).await;
        assert_eq!(h.drain(), vec![HidEvent::WriteResult(true)]);

        h.transport.set_write_ok(false);
        assert_eq!(
            h.manager.send_report(3, &[0, 0]),
            Err(ConnectionError::WriteFailed)
        );
        assert_eq!(h.drain(), vec![HidEvent::WriteResult(false)]);
    }
}

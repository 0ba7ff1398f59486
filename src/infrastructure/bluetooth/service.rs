//! HID Service Module
//!
//! Wires the connection state machine, the input dispatcher and the sensor
//! fusion engine together behind one object for the application layer.
//!
//! Connection events pass through the service on their way to the caller;
//! losing the link drops held buttons, modifiers and pending pulses so an
//! automatic reconnect starts from a neutral state.

use crate::domain::fusion::{FusionError, OrientationSource, SensorFusionEngine};
use crate::domain::models::{ConnectionState, DeviceId, HidEvent};
use crate::domain::settings::Settings;
use crate::infrastructure::bluetooth::connection::{ConnectionError, ConnectionManager};
use crate::infrastructure::bluetooth::transport::Transport;
use crate::infrastructure::input_dispatcher::InputDispatcher;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace};

/// Main HID service coordinating connection, input and air-mouse
pub struct HidService {
    connection: Arc<ConnectionManager>,
    dispatcher: InputDispatcher,
    fusion: SensorFusionEngine,
    air_mouse: Option<JoinHandle<()>>,
    events: JoinHandle<()>,
    last_device: Option<DeviceId>,
}

impl HidService {
    /// Create the service and the receiver for its observer events.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(
        settings: &Settings,
        transport: Arc<dyn Transport>,
        sensor: Arc<dyn OrientationSource>,
    ) -> (Self, mpsc::UnboundedReceiver<HidEvent>) {
        let (link_tx, mut link_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let connection = Arc::new(ConnectionManager::new(transport, settings, link_tx));
        let dispatcher = InputDispatcher::new(
            connection.clone(),
            settings.device_profile,
            settings.dispatch.clone(),
        );

        let link_dispatcher = dispatcher.clone();
        let events = tokio::spawn(async move {
            while let Some(event) = link_rx.recv().await {
                if let HidEvent::ConnectionStateChanged {
                    connected: false, ..
                } = &event
                {
                    link_dispatcher.forget_held_input();
                }
                if event_tx.send(event).is_err() {
                    trace!("Event receiver dropped");
                }
            }
        });
        let fusion = SensorFusionEngine::new(sensor, &settings.fusion);

        info!(
            "HID service created (profile: {})",
            settings.device_profile.display_name()
        );

        let service = Self {
            connection,
            dispatcher,
            fusion,
            air_mouse: None,
            events,
            last_device: settings
                .last_connected_address
                .as_deref()
                .map(DeviceId::from),
        };
        (service, event_rx)
    }

    pub fn connect(&mut self, device: &DeviceId) -> Result<(), ConnectionError> {
        self.connection.connect(device)?;
        self.last_device = Some(device.clone());
        Ok(())
    }

    /// Connect to the most recently used device, if one is known
    pub fn connect_last(&mut self) -> Option<Result<(), ConnectionError>> {
        let device = self.last_device.clone()?;
        Some(self.connect(&device))
    }

    /// Release held input, stop the air mouse and drop the connection
    pub fn disconnect(&mut self) {
        self.stop_air_mouse();
        if let Err(e) = self.dispatcher.release_all() {
            debug!("Neutral reports not delivered before disconnect: {}", e);
        }
        self.connection.disconnect();
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    pub fn connection(&self) -> &ConnectionManager {
        &self.connection
    }

    pub fn dispatcher(&self) -> &InputDispatcher {
        &self.dispatcher
    }

    pub fn fusion(&self) -> &SensorFusionEngine {
        &self.fusion
    }

    pub fn last_device(&self) -> Option<&DeviceId> {
        self.last_device.as_ref()
    }

    /// Feed sensor fusion output into pointer movement
    pub fn start_air_mouse(&mut self) -> Result<(), FusionError> {
        self.stop_forwarding();

        let (delta_tx, mut delta_rx) = mpsc::unbounded_channel();
        self.fusion.start(delta_tx)?;

        let dispatcher = self.dispatcher.clone();
        self.air_mouse = Some(tokio::spawn(async move {
            while let Some(delta) = delta_rx.recv().await {
                if let Err(e) = dispatcher.move_mouse(delta.x as f32, delta.y as f32) {
                    trace!("Air-mouse move dropped: {}", e);
                }
            }
        }));
        info!("Air mouse started");
        Ok(())
    }

    pub fn stop_air_mouse(&mut self) {
        let was_running = self.air_mouse.is_some();
        self.fusion.stop();
        self.stop_forwarding();

        if !was_running {
            return;
        }
        if self.connection.is_connected() {
            if let Err(e) = self.dispatcher.release_all() {
                debug!("Release after air mouse failed: {}", e);
            }
        } else {
            self.dispatcher.cancel_pending();
        }
        info!("Air mouse stopped");
    }

    pub fn is_air_mouse_active(&self) -> bool {
        self.air_mouse.is_some() && self.fusion.is_running()
    }

    fn stop_forwarding(&mut self) {
        if let Some(task) = self.air_mouse.take() {
            task.abort();
        }
    }
}

impl Drop for HidService {
    fn drop(&mut self) {
        self.fusion.stop();
        self.stop_forwarding();
        self.events.abort();
        self.dispatcher.cancel_pending();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::fusion::OrientationSample;
    use crate::domain::hid::descriptor::ID_MOUSE;
    use crate::infrastructure::bluetooth::loopback::LoopbackTransport;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::time::sleep;

    #[derive(Default)]
    struct ScriptedSensor {
        tx: Mutex<Option<mpsc::UnboundedSender<OrientationSample>>>,
    }

    impl ScriptedSensor {
        fn push_yaw(&self, yaw: f64) {
            let half = yaw / 2.0;
            let sample =
                OrientationSample::new(0.0, 0.0, half.sin() as f32, Some(half.cos() as f32));
            if let Some(tx) = self.tx.lock().unwrap().as_ref() {
                tx.send(sample).unwrap();
            }
        }
    }

    impl OrientationSource for ScriptedSensor {
        fn subscribe(
            &self,
            _interval: Duration,
        ) -> Result<mpsc::UnboundedReceiver<OrientationSample>, FusionError> {
            let (tx, rx) = mpsc::unbounded_channel();
            *self.tx.lock().unwrap() = Some(tx);
            Ok(rx)
        }

        fn unsubscribe(&self) {
            self.tx.lock().unwrap().take();
        }
    }

    fn service() -> (HidService, Arc<LoopbackTransport>, Arc<ScriptedSensor>) {
        let transport = Arc::new(LoopbackTransport::new());
        let sensor = Arc::new(ScriptedSensor::default());
        let (service, _events) =
            HidService::new(&Settings::default(), transport.clone(), sensor.clone());
        (service, transport, sensor)
    }

    #[tokio::test(start_paused = true)]
    async fn test_air_mouse_moves_pointer() {
        let (mut service, transport, sensor) = service();
        service.connect(&DeviceId::from("00:11:22:33:44:55")).unwrap();
        sleep(Duration::from_secs(1)).await;
        assert!(service.is_connected());

        service.start_air_mouse().unwrap();
        assert!(service.is_air_mouse_active());
        sensor.push_yaw(0.0);
        sensor.push_yaw(0.05);
        sleep(Duration::from_millis(10)).await;

        let writes = transport.writes();
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].report_id(), Some(ID_MOUSE));
        // 0.05 rad is ~65 cursor units
        assert_eq!(writes[0].payload()[1], 65);

        service.stop_air_mouse();
        assert!(!service.is_air_mouse_active());
        assert!(sensor.tx.lock().unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_sends_neutral_reports_first() {
        let (mut service, transport, _sensor) = service();
        service.connect(&DeviceId::from("00:11:22:33:44:55")).unwrap();
        sleep(Duration::from_secs(1)).await;

        service.dispatcher().left_click().unwrap();
        service.disconnect();
        sleep(Duration::from_millis(100)).await;

        let ids: Vec<Option<u8>> = transport.writes().iter().map(|w| w.report_id()).collect();
        assert_eq!(ids, vec![Some(2), Some(2), Some(1), Some(3)]);
        assert_eq!(service.state(), ConnectionState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_link_loss_releases_held_buttons() {
        let (mut service, transport, _sensor) = service();
        service.connect(&DeviceId::from("00:11:22:33:44:55")).unwrap();
        sleep(Duration::from_secs(1)).await;

        service.dispatcher().drag_move(5.0, 0.0).unwrap();
        assert_eq!(service.dispatcher().state().buttons(), 0x01);

        transport.drop_link(0x08);
        sleep(Duration::from_millis(10)).await;
        assert_eq!(service.dispatcher().state().buttons(), 0);

        // Automatic reconnect after the 2 s backoff
        sleep(Duration::from_secs(3)).await;
        assert!(service.is_connected());
        transport.clear_writes();

        service.dispatcher().move_mouse(3.0, 0.0).unwrap();
        let writes = transport.writes();
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].payload(), &[0, 3, 0, 0]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_events_reach_the_caller() {
        let transport = Arc::new(LoopbackTransport::new());
        let (mut service, mut events) = HidService::new(
            &Settings::default(),
            transport,
            Arc::new(ScriptedSensor::default()),
        );
        service.connect(&DeviceId::from("00:11:22:33:44:55")).unwrap();
        sleep(Duration::from_secs(1)).await;

        let mut seen = Vec::new();
        while let Ok(event) = events.try_recv() {
            seen.push(event);
        }
        assert!(seen.contains(&HidEvent::ServiceDiscovered(true)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_last_uses_settings() {
        let transport = Arc::new(LoopbackTransport::new());
        let settings = Settings {
            last_connected_address: Some("AA:AA:AA:AA:AA:AA".to_string()),
            ..Settings::default()
        };
        let (mut service, _events) = HidService::new(
            &settings,
            transport.clone(),
            Arc::new(ScriptedSensor::default()),
        );
        assert_eq!(service.connect_last(), Some(Ok(())));
        assert_eq!(
            transport.connected_device(),
            Some(DeviceId::from("AA:AA:AA:AA:AA:AA"))
        );
    }
}

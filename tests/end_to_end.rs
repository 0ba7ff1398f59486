//! End-to-end scenarios over the loopback transport.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::sleep;

use wear_hid_controller::domain::fusion::{FusionError, OrientationSample, OrientationSource};
use wear_hid_controller::domain::hid::descriptor::{ID_CONSUMER, ID_MOUSE};
use wear_hid_controller::domain::hid::usage::ConsumerUsage;
use wear_hid_controller::domain::models::{ConnectionState, DeviceId, HidEvent};
use wear_hid_controller::domain::settings::Settings;
use wear_hid_controller::infrastructure::bluetooth::connection::{ConnectionError, ReportSink};
use wear_hid_controller::infrastructure::bluetooth::loopback::{LoopbackTransport, OpenBehavior};
use wear_hid_controller::infrastructure::bluetooth::HidService;

struct NoSensor;

impl OrientationSource for NoSensor {
    fn subscribe(
        &self,
        _interval: Duration,
    ) -> Result<mpsc::UnboundedReceiver<OrientationSample>, FusionError> {
        Err(FusionError::NoOrientationSensor)
    }

    fn unsubscribe(&self) {}
}

fn setup() -> (
    HidService,
    Arc<LoopbackTransport>,
    mpsc::UnboundedReceiver<HidEvent>,
) {
    let transport = Arc::new(LoopbackTransport::new());
    let (service, events) = HidService::new(&Settings::default(), transport.clone(), Arc::new(NoSensor));
    (service, transport, events)
}

fn device() -> DeviceId {
    DeviceId::from("C0:FF:EE:00:00:01")
}

async fn connect_ready(service: &mut HidService) {
    service.connect(&device()).unwrap();
    sleep(Duration::from_secs(1)).await;
    assert_eq!(service.state(), ConnectionState::Ready);
}

#[tokio::test(start_paused = true)]
async fn left_click_sends_press_then_release() {
    let (mut service, transport, _events) = setup();
    connect_ready(&mut service).await;

    service.dispatcher().left_click().unwrap();
    sleep(Duration::from_millis(200)).await;

    let writes = transport.writes();
    assert_eq!(writes.len(), 2);
    assert!(writes.iter().all(|w| w.report_id() == Some(ID_MOUSE)));
    assert_eq!(writes[0].payload(), &[0x01, 0x00, 0x00, 0x00]);
    assert_eq!(writes[1].payload(), &[0x00, 0x00, 0x00, 0x00]);
    assert_eq!(writes[1].at - writes[0].at, Duration::from_millis(50));
}

#[tokio::test(start_paused = true)]
async fn volume_up_is_followed_by_key_up() {
    let (mut service, transport, _events) = setup();
    connect_ready(&mut service).await;

    service
        .dispatcher()
        .send_media_key(ConsumerUsage::VolumeUp)
        .unwrap();

    let writes = transport.writes();
    assert_eq!(writes.len(), 2);
    assert_eq!(writes[0].report_id(), Some(ID_CONSUMER));
    assert_eq!(writes[0].payload(), &[0xE9, 0x00]);
    assert_eq!(writes[1].payload(), &[0x00, 0x00]);
}

#[tokio::test(start_paused = true)]
async fn connect_while_connecting_is_a_no_op() {
    let (mut service, transport, _events) = setup();
    transport.set_open_behavior(OpenBehavior::Silent);

    service.connect(&device()).unwrap();
    assert_eq!(
        service.connect(&DeviceId::from("C0:FF:EE:00:00:02")),
        Err(ConnectionError::AlreadyInProgress)
    );
    assert_eq!(transport.opens(), 1);
    assert_eq!(service.connection().attempts(), 1);
    assert_eq!(service.last_device(), Some(&device()));
}

#[tokio::test(start_paused = true)]
async fn unexpected_disconnects_exhaust_the_retry_budget() {
    let (mut service, transport, mut events) = setup();
    transport.set_open_behavior(OpenBehavior::Drop { status: 0x13 });

    service.connect(&device()).unwrap();
    sleep(Duration::from_secs(120)).await;

    assert_eq!(transport.opens(), 5);
    assert_eq!(service.state(), ConnectionState::Disconnected);

    let mut errors = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let HidEvent::Error(message) = event {
            errors.push(message);
        }
    }
    assert_eq!(errors, vec!["Connection lost after 5 attempts".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn explicit_disconnect_resets_and_never_retries() {
    let (mut service, transport, _events) = setup();
    connect_ready(&mut service).await;

    service.disconnect();
    assert_eq!(service.state(), ConnectionState::Idle);
    assert_eq!(service.connection().attempts(), 0);

    sleep(Duration::from_secs(60)).await;
    assert_eq!(transport.opens(), 1);
    assert_eq!(
        service.connection().send_report(ID_MOUSE, &[0, 0, 0, 0]),
        Err(ConnectionError::NotReady)
    );
}

#[tokio::test(start_paused = true)]
async fn late_timer_after_ready_is_harmless() {
    let (mut service, _transport, mut events) = setup();
    connect_ready(&mut service).await;

    // Past both the connect (30 s) and discovery (10 s) bounds
    sleep(Duration::from_secs(45)).await;
    assert_eq!(service.state(), ConnectionState::Ready);
    while let Ok(event) = events.try_recv() {
        assert!(!matches!(event, HidEvent::Error(_)), "unexpected {:?}", event);
    }
}

#[tokio::test(start_paused = true)]
async fn air_mouse_without_sensor_fails_cleanly() {
    let (mut service, transport, _events) = setup();
    connect_ready(&mut service).await;

    assert_eq!(
        service.start_air_mouse(),
        Err(FusionError::NoOrientationSensor)
    );
    assert!(!service.is_air_mouse_active());
    service.stop_air_mouse();
    assert!(transport.writes().is_empty());
}

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use wear_hid_controller::domain::fusion::{FusionError, OrientationSample, OrientationSource};
use wear_hid_controller::domain::hid::usage::{ConsumerUsage, DpadDirection};
use wear_hid_controller::domain::hid::HID_REGISTRATION;
use wear_hid_controller::domain::models::{DeviceId, HidEvent, MessageSeverity, StatusMessage};
use wear_hid_controller::domain::settings::SettingsService;
use wear_hid_controller::infrastructure::bluetooth::loopback::LoopbackTransport;
use wear_hid_controller::infrastructure::bluetooth::HidService;
use wear_hid_controller::infrastructure::logging;

const DEFAULT_DEVICE: &str = "00:00:00:00:00:00";

/// Stand-in for hardware without a rotation-vector sensor
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

fn log_event(event: &HidEvent) {
    let status = StatusMessage::from(event);
    match status.severity {
        MessageSeverity::Error => error!("{}", status.message),
        MessageSeverity::Warning => warn!("{}", status.message),
        MessageSeverity::Info | MessageSeverity::Success => info!("{}", status.message),
    }
}

async fn wait_until_ready(events: &mut mpsc::UnboundedReceiver<HidEvent>) -> anyhow::Result<()> {
    let wait = async {
        while let Some(event) = events.recv().await {
            log_event(&event);
            match event {
                HidEvent::ServiceDiscovered(true) => return Ok(()),
                HidEvent::ServiceDiscovered(false) | HidEvent::Error(_) => {
                    anyhow::bail!("connection failed")
                }
                _ => {}
            }
        }
        anyhow::bail!("event channel closed")
    };
    tokio::time::timeout(Duration::from_secs(45), wait)
        .await
        .context("waiting for the HID service")?
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings_service = SettingsService::load().context("loading settings")?;
    let settings = settings_service.get().clone();
    let _log_guard = logging::init_logger(&settings.log_settings)?;

    info!("Starting Wear HID Controller (loopback transport)");
    if let Some(path) = settings_service.path() {
        info!("Settings file: {}", path.display());
    }

    info!(
        "Registering \"{}\" (subclass {:#04x}, {} descriptor bytes)",
        HID_REGISTRATION.name,
        HID_REGISTRATION.subclass,
        HID_REGISTRATION.descriptor.len()
    );

    let transport = Arc::new(LoopbackTransport::new());
    let (mut service, mut events) = HidService::new(&settings, transport.clone(), Arc::new(NoSensor));

    let device = std::env::args()
        .nth(1)
        .map(DeviceId::new)
        .or_else(|| service.last_device().cloned())
        .unwrap_or_else(|| DeviceId::new(DEFAULT_DEVICE));

    service.connect(&device)?;
    wait_until_ready(&mut events).await?;

    if let Err(e) = service.start_air_mouse() {
        warn!("Air mouse unavailable: {}", e);
    }

    let input = service.dispatcher().clone();
    input.move_mouse(40.0, -12.0)?;
    input.left_click()?;
    input.scroll(-3.0)?;
    input.send_media_key(ConsumerUsage::PlayPause)?;
    input.dpad(DpadDirection::UpRight)?;
    input.send_text("hello")?;

    tokio::time::sleep(Duration::from_millis(500)).await;
    service.disconnect();

    while let Ok(event) = events.try_recv() {
        if !matches!(event, HidEvent::WriteResult(true)) {
            log_event(&event);
        }
    }

    for write in transport.writes() {
        info!(
            "report {:?}: {:02X?}",
            write.report_id(),
            write.payload()
        );
    }
    info!("{} reports delivered", transport.writes().len());

    Ok(())
}

//! Sensor Fusion Engine
//!
//! Turns a stream of orientation samples (rotation-vector quaternions) into
//! relative cursor deltas for air-mouse control.
//!
//! Per sample:
//! 1. quaternion -> yaw / pitch (radians)
//! 2. first sample after (re)start only records the baseline
//! 3. delta against the previous angles, unwrapped across the ±π (yaw)
//!    and ±π/2 (pitch) seams
//! 4. scaled to cursor units by [`CURSOR_SPEED`]
//! 5. optional quadratic damping of deltas below [`STABILIZE_BIAS`]
//! 6. accumulated until one axis passes [`MIN_MOTION`], then hand-mode
//!    rotation and left-handed mirroring are applied and the delta is emitted

use crate::domain::settings::FusionSettings;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

/// Radians to cursor units: a quarter turn sweeps 1024 units
pub const CURSOR_SPEED: f64 = 1024.0 / (PI / 4.0);
/// Deltas below this many cursor units are damped when stabilizing
pub const STABILIZE_BIAS: f64 = 16.0;
/// Smallest accumulated motion (cursor units, either axis) worth emitting
pub const MIN_MOTION: f64 = 0.5;

/// Which wrist the device is worn on
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum HandMode {
    Left,
    #[default]
    Center,
    Right,
}

/// One rotation-vector reading: quaternion vector part plus optional scalar part
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OrientationSample {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    /// cos(θ/2); derived from the vector part when the sensor omits it
    pub w: Option<f32>,
}

impl OrientationSample {
    pub fn new(x: f32, y: f32, z: f32, w: Option<f32>) -> Self {
        Self { x, y, z, w }
    }

    /// Yaw and pitch in radians, or `None` if the sample is degenerate
    pub fn yaw_pitch(&self) -> Option<(f64, f64)> {
        let (q1, q2, q3) = (self.x as f64, self.y as f64, self.z as f64);
        let q0 = match self.w {
            Some(w) => w as f64,
            None => (1.0 - (q1 * q1 + q2 * q2 + q3 * q3)).max(0.0).sqrt(),
        };

        let yaw = (2.0 * (q0 * q3 - q1 * q2)).atan2(1.0 - 2.0 * (q1 * q1 + q3 * q3));
        let pitch = (2.0 * (q0 * q1 + q2 * q3)).asin();

        if yaw.is_nan() || pitch.is_nan() {
            return None;
        }
        Some((yaw, pitch))
    }
}

/// Relative pointer motion in cursor units
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CursorDelta {
    pub x: f64,
    pub y: f64,
}

/// Fold a delta back into `(-half_range, half_range]` after crossing a seam
pub fn unwrap_angle(delta: f64, half_range: f64) -> f64 {
    if delta > half_range {
        delta - 2.0 * half_range
    } else if delta < -half_range {
        delta + 2.0 * half_range
    } else {
        delta
    }
}

/// Quadratic damping: `value * |value| / threshold` below the threshold
pub fn stabilize(value: f64, threshold: f64) -> f64 {
    if value.abs() < threshold {
        value * value.abs() / threshold
    } else {
        value
    }
}

/// Rotate `(x, y)` by 90° to compensate for the wrist the device is worn on
pub fn apply_hand_mode(mode: HandMode, x: f64, y: f64) -> (f64, f64) {
    match mode {
        HandMode::Center => (x, y),
        HandMode::Left => (-y, x),
        HandMode::Right => (y, -x),
    }
}

/// Mutable fusion state; only the engine's sample step touches it
#[derive(Debug, Clone)]
pub struct FusionState {
    yaw: f64,
    pitch: f64,
    first_read: bool,
    acc_x: f64,
    acc_y: f64,

    hand_mode: HandMode,
    stabilize: bool,
    left_handed: bool,
}

impl FusionState {
    pub fn new(settings: &FusionSettings) -> Self {
        Self {
            yaw: 0.0,
            pitch: 0.0,
            first_read: true,
            acc_x: 0.0,
            acc_y: 0.0,
            hand_mode: settings.hand_mode,
            stabilize: settings.stabilize,
            left_handed: settings.left_handed,
        }
    }

    /// Forget the baseline; the next sample only re-anchors
    pub fn reset(&mut self) {
        self.yaw = 0.0;
        self.pitch = 0.0;
        self.first_read = true;
        self.acc_x = 0.0;
        self.acc_y = 0.0;
    }

    pub fn set_hand_mode(&mut self, mode: HandMode) {
        self.hand_mode = mode;
    }

    pub fn set_stabilize(&mut self, enable: bool) {
        self.stabilize = enable;
    }

    pub fn set_left_handed(&mut self, enable: bool) {
        self.left_handed = enable;
    }

    pub fn process(&mut self, sample: &OrientationSample) -> Option<CursorDelta> {
        match sample.yaw_pitch() {
            Some((yaw, pitch)) => self.process_angles(yaw, pitch),
            None => {
                trace!("Skipping degenerate orientation sample {:?}", sample);
                None
            }
        }
    }

    pub fn process_angles(&mut self, yaw: f64, pitch: f64) -> Option<CursorDelta> {
        if self.first_read {
            self.yaw = yaw;
            self.pitch = pitch;
            self.first_read = false;
            return None;
        }

        let d_yaw = unwrap_angle(yaw - self.yaw, PI);
        let d_pitch = unwrap_angle(pitch - self.pitch, PI / 2.0);
        self.yaw = yaw;
        self.pitch = pitch;

        let mut dx = d_yaw * CURSOR_SPEED;
        let mut dy = d_pitch * CURSOR_SPEED;
        if self.stabilize {
            dx = stabilize(dx, STABILIZE_BIAS);
            dy = stabilize(dy, STABILIZE_BIAS);
        }

        self.acc_x += dx;
        self.acc_y += dy;

        if self.acc_x.abs() <= MIN_MOTION && self.acc_y.abs() <= MIN_MOTION {
            return None;
        }

        let (mut x, y) = apply_hand_mode(self.hand_mode, self.acc_x, self.acc_y);
        if self.left_handed {
            x = -x;
        }
        self.acc_x = 0.0;
        self.acc_y = 0.0;

        Some(CursorDelta { x, y })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FusionError {
    #[error("no rotation-vector sensor available")]
    NoOrientationSensor,
    #[error("sensor subscription failed: {0}")]
    Subscription(String),
}

/// Platform orientation sensor
pub trait OrientationSource: Send + Sync {
    /// Begin delivering samples at roughly `interval`
    fn subscribe(
        &self,
        interval: Duration,
    ) -> Result<mpsc::UnboundedReceiver<OrientationSample>, FusionError>;

    /// Stop delivering samples; must tolerate being called when not subscribed
    fn unsubscribe(&self);
}

/// Runs [`FusionState`] over a sensor subscription on its own task
pub struct SensorFusionEngine {
    source: Arc<dyn OrientationSource>,
    state: Arc<Mutex<FusionState>>,
    interval: Duration,
    task: Option<JoinHandle<()>>,
}

impl SensorFusionEngine {
    pub fn new(source: Arc<dyn OrientationSource>, settings: &FusionSettings) -> Self {
        Self {
            source,
            state: Arc::new(Mutex::new(FusionState::new(settings))),
            interval: settings.sample_interval(),
            task: None,
        }
    }

    /// Start (or restart) fusion, sending each emitted delta to `sink`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&mut self, sink: mpsc::UnboundedSender<CursorDelta>) -> Result<(), FusionError> {
        self.stop();
        self.lock_state().reset();

        let mut samples = match self.source.subscribe(self.interval) {
            Ok(rx) => rx,
            Err(e) => {
                warn!("Sensor fusion not started: {}", e);
                return Err(e);
            }
        };

        let state = self.state.clone();
        self.task = Some(tokio::spawn(async move {
            while let Some(sample) = samples.recv().await {
                let delta = state
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .process(&sample);
                if let Some(delta) = delta {
                    trace!("Fusion delta ({:.2}, {:.2})", delta.x, delta.y);
                    if sink.send(delta).is_err() {
                        debug!("Fusion sink dropped, ending sample loop");
                        break;
                    }
                }
            }
        }));

        info!(
            "Sensor fusion started ({} us sample interval)",
            self.interval.as_micros()
        );
        Ok(())
    }

    /// Stop fusion and release the sensor subscription; safe to call repeatedly
    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            self.source.unsubscribe();
            info!("Sensor fusion stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    pub fn set_hand_mode(&self, mode: HandMode) {
        self.lock_state().set_hand_mode(mode);
    }

    pub fn set_stabilize(&self, enable: bool) {
        self.lock_state().set_stabilize(enable);
    }

    pub fn set_left_handed(&self, enable: bool) {
        self.lock_state().set_left_handed(enable);
    }

    /// Re-baseline on the next sample
    pub fn reset(&self) {
        self.lock_state().reset();
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, FusionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for SensorFusionEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

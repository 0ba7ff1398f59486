//! Input Dispatch Facade
//!
//! Turns typed input intents (move, click, key, media key, D-pad, text) into
//! HID reports and hands them to a [`ReportSink`]. Held mouse buttons and
//! modifiers are tracked here so partial updates compose into valid reports.
//!
//! Press/release pulses never sleep on the caller's thread: the press is sent
//! immediately and the release runs as a scheduled continuation. Pending
//! continuations are cancelled by [`InputDispatcher::release_all`] and
//! [`InputDispatcher::forget_held_input`].

use crate::domain::hid::descriptor::{ID_CONSUMER, ID_KEYBOARD, ID_MOUSE};
use crate::domain::hid::report::clamp_axis;
use crate::domain::hid::usage::{self, button, key, modifier, ConsumerUsage, DpadDirection};
use crate::domain::hid::{
    encode_keyboard_report, encode_media_report, encode_mouse_report, idle_report,
    validate_report, CodecError,
};
use crate::domain::profile::{DeviceProfile, ProfileScaling};
use crate::domain::settings::DispatchSettings;
use crate::infrastructure::bluetooth::connection::{ConnectionError, ReportSink};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::runtime::Handle as RuntimeHandle;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Connection(#[from] ConnectionError),
}

/// Held mouse buttons and keyboard modifiers.
///
/// Updated from the caller, from scheduled releases and from the air-mouse
/// task, so every change is a single atomic read-modify-write.
#[derive(Debug, Default)]
pub struct InputState {
    buttons: AtomicU8,
    modifiers: AtomicU8,
}

impl InputState {
    /// Set `mask` bits and return the new button mask
    pub fn press_buttons(&self, mask: u8) -> u8 {
        let mask = mask & button::ALL;
        self.buttons.fetch_or(mask, Ordering::AcqRel) | mask
    }

    /// Clear `mask` bits and return the new button mask
    pub fn release_buttons(&self, mask: u8) -> u8 {
        self.buttons.fetch_and(!mask, Ordering::AcqRel) & !mask
    }

    pub fn buttons(&self) -> u8 {
        self.buttons.load(Ordering::Acquire)
    }

    pub fn hold_modifiers(&self, mask: u8) -> u8 {
        self.modifiers.fetch_or(mask, Ordering::AcqRel) | mask
    }

    pub fn release_modifiers(&self, mask: u8) -> u8 {
        self.modifiers.fetch_and(!mask, Ordering::AcqRel) & !mask
    }

    pub fn modifiers(&self) -> u8 {
        self.modifiers.load(Ordering::Acquire)
    }

    pub fn clear(&self) {
        self.buttons.store(0, Ordering::Release);
        self.modifiers.store(0, Ordering::Release);
    }
}

struct DispatchInner {
    sink: Arc<dyn ReportSink>,
    state: InputState,
    scaling: Mutex<ProfileScaling>,
    timing: DispatchSettings,
    pending: Mutex<Vec<JoinHandle<()>>>,
    runtime: RuntimeHandle,
}

impl DispatchInner {
    fn send(&self, report_id: u8, payload: &[u8]) -> Result<(), DispatchError> {
        trace!("Dispatch report {}: {:02X?}", report_id, payload);
        self.sink.send_report(report_id, payload)?;
        Ok(())
    }

    fn send_mouse(&self, buttons: u8, dx: i8, dy: i8, wheel: i8) -> Result<(), DispatchError> {
        let report = encode_mouse_report(buttons, dx, dy, wheel)?;
        self.send(ID_MOUSE, &report)
    }

    fn send_keyboard(&self, modifiers: u8, key_code: Option<u8>) -> Result<(), DispatchError> {
        self.send(ID_KEYBOARD, &encode_keyboard_report(modifiers, key_code))
    }

    fn press_key(&self, key_code: u8, modifiers: u8) -> Result<(), DispatchError> {
        debug!("Key down {:#04x} (modifiers {:#04x})", key_code, modifiers);
        self.send_keyboard(self.state.modifiers() | modifiers, Some(key_code))
    }

    fn release_key(&self) -> Result<(), DispatchError> {
        self.send_keyboard(self.state.modifiers(), None)
    }

    fn press_button(&self, mask: u8) -> Result<(), DispatchError> {
        let buttons = self.state.press_buttons(mask);
        self.send_mouse(buttons, 0, 0, 0)
    }

    fn release_button(&self, mask: u8) -> Result<(), DispatchError> {
        let buttons = self.state.release_buttons(mask);
        self.send_mouse(buttons, 0, 0, 0)
    }

    fn lock_pending(&self) -> MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn log_continuation(what: &str, result: Result<(), DispatchError>) {
    if let Err(e) = result {
        warn!("Scheduled {} failed: {}", what, e);
    }
}

/// Single call surface for all host input
#[derive(Clone)]
pub struct InputDispatcher {
    inner: Arc<DispatchInner>,
}

impl InputDispatcher {
    /// Must be called from within a tokio runtime; releases are scheduled on it
    pub fn new(sink: Arc<dyn ReportSink>, profile: DeviceProfile, timing: DispatchSettings) -> Self {
        Self {
            inner: Arc::new(DispatchInner {
                sink,
                state: InputState::default(),
                scaling: Mutex::new(profile.scaling()),
                timing,
                pending: Mutex::new(Vec::new()),
                runtime: RuntimeHandle::current(),
            }),
        }
    }

    pub fn set_profile(&self, profile: DeviceProfile) {
        debug!("Dispatch profile set to {}", profile.display_name());
        *self
            .inner
            .scaling
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = profile.scaling();
    }

    fn scaling(&self) -> ProfileScaling {
        *self
            .inner
            .scaling
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> &InputState {
        &self.inner.state
    }

    fn press_release_delay(&self) -> Duration {
        Duration::from_millis(self.inner.timing.press_release_delay_ms)
    }

    /// Run `f` after `delay`; cancelled by [`Self::release_all`]
    fn schedule<F>(&self, delay: Duration, f: F)
    where
        F: FnOnce(&DispatchInner) + Send + 'static,
    {
        let inner = self.inner.clone();
        let task = self.inner.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            f(&*inner);
        });

        let mut pending = self.inner.lock_pending();
        pending.retain(|t| !t.is_finished());
        pending.push(task);
    }

    /// Abort every scheduled release without sending anything
    pub fn cancel_pending(&self) {
        let tasks: Vec<_> = self.inner.lock_pending().drain(..).collect();
        if !tasks.is_empty() {
            debug!("Cancelling {} pending input continuations", tasks.len());
        }
        for task in tasks {
            task.abort();
        }
    }

    /// Relative pointer move; deltas are profile-scaled, rounded and clamped
    pub fn move_mouse(&self, dx: f32, dy: f32) -> Result<(), DispatchError> {
        let scale = self.scaling().movement;
        let x = clamp_axis((dx * scale).round() as i32);
        let y = clamp_axis((dy * scale).round() as i32);
        if x == 0 && y == 0 {
            return Ok(());
        }
        self.inner.send_mouse(self.inner.state.buttons(), x, y, 0)
    }

    pub fn scroll(&self, amount: f32) -> Result<(), DispatchError> {
        let scale = self.scaling().scroll;
        let wheel = clamp_axis((amount * scale).round() as i32);
        self.inner
            .send_mouse(self.inner.state.buttons(), 0, 0, wheel)
    }

    fn click(&self, mask: u8, delay: Duration) {
        self.schedule(delay, move |inner| {
            log_continuation("button press", inner.press_button(mask));
        });
        let release_at = delay + self.press_release_delay();
        self.schedule(release_at, move |inner| {
            log_continuation("button release", inner.release_button(mask));
        });
    }

    /// Press now, release after the pulse delay
    fn pulse_button(&self, mask: u8) -> Result<(), DispatchError> {
        self.inner.press_button(mask)?;
        self.schedule(self.press_release_delay(), move |inner| {
            log_continuation("button release", inner.release_button(mask));
        });
        Ok(())
    }

    pub fn left_click(&self) -> Result<(), DispatchError> {
        self.pulse_button(button::LEFT)
    }

    pub fn right_click(&self) -> Result<(), DispatchError> {
        self.pulse_button(button::RIGHT)
    }

    pub fn middle_click(&self) -> Result<(), DispatchError> {
        self.pulse_button(button::MIDDLE)
    }

    /// Two left-click pulses separated by the double-click gap
    pub fn double_click(&self) -> Result<(), DispatchError> {
        self.pulse_button(button::LEFT)?;
        let gap = Duration::from_millis(self.inner.timing.double_click_gap_ms);
        self.click(button::LEFT, self.press_release_delay() + gap);
        Ok(())
    }

    pub fn press_mouse_buttons(&self, mask: u8) -> Result<(), DispatchError> {
        self.inner.press_button(mask)
    }

    pub fn release_mouse_buttons(&self, mask: u8) -> Result<(), DispatchError> {
        self.inner.release_button(mask)
    }

    /// Move with the left button held
    pub fn drag_move(&self, dx: f32, dy: f32) -> Result<(), DispatchError> {
        self.inner.state.press_buttons(button::LEFT);
        let scale = self.scaling().movement;
        let x = clamp_axis((dx * scale).round() as i32);
        let y = clamp_axis((dy * scale).round() as i32);
        self.inner
            .send_mouse(self.inner.state.buttons(), x, y, 0)
    }

    pub fn drag_end(&self) -> Result<(), DispatchError> {
        self.inner.release_button(button::LEFT)
    }

    /// Key pulse with transient `modifiers` on top of any held ones
    pub fn send_key(&self, key_code: u8, modifiers: u8) -> Result<(), DispatchError> {
        self.inner.press_key(key_code, modifiers)?;
        self.schedule(self.press_release_delay(), |inner| {
            log_continuation("key release", inner.release_key());
        });
        Ok(())
    }

    pub fn hold_modifiers(&self, mask: u8) -> Result<(), DispatchError> {
        let modifiers = self.inner.state.hold_modifiers(mask);
        self.inner.send_keyboard(modifiers, None)
    }

    pub fn release_modifiers(&self, mask: u8) -> Result<(), DispatchError> {
        let modifiers = self.inner.state.release_modifiers(mask);
        self.inner.send_keyboard(modifiers, None)
    }

    pub fn escape(&self) -> Result<(), DispatchError> {
        self.send_key(key::ESCAPE, 0)
    }

    /// GUI+K: ask the host to switch audio/video output
    pub fn switch_output(&self) -> Result<(), DispatchError> {
        self.send_key(key::K, modifier::LEFT_GUI)
    }

    /// Momentary consumer control: usage, then key-up straight away
    pub fn send_media_key(&self, usage: ConsumerUsage) -> Result<(), DispatchError> {
        self.send_consumer(usage.code())
    }

    pub fn send_consumer(&self, usage_code: u16) -> Result<(), DispatchError> {
        debug!("Consumer usage {:#06x}", usage_code);
        self.inner
            .send(ID_CONSUMER, &encode_media_report(usage_code))?;
        self.inner.send(ID_CONSUMER, &encode_media_report(0))
    }

    /// Arrow/enter pulses; diagonals send two pulses back to back
    pub fn dpad(&self, direction: DpadDirection) -> Result<(), DispatchError> {
        let keys = direction.keys();
        let Some((&first, rest)) = keys.split_first() else {
            return Ok(());
        };
        self.send_key(first, 0)?;

        let step = self.press_release_delay()
            + Duration::from_millis(self.inner.timing.dpad_diagonal_gap_ms);
        for (i, &key_code) in rest.iter().enumerate() {
            let at = step * (i as u32 + 1);
            self.key_pulse_at(key_code, 0, at);
        }
        Ok(())
    }

    fn key_pulse_at(&self, key_code: u8, modifiers: u8, at: Duration) {
        self.schedule(at, move |inner| {
            log_continuation("key press", inner.press_key(key_code, modifiers));
        });
        self.schedule(at + self.press_release_delay(), |inner| {
            log_continuation("key release", inner.release_key());
        });
    }

    /// Type printable ASCII, one pulse per character; other characters are skipped
    pub fn send_text(&self, text: &str) -> Result<(), DispatchError> {
        let step = self.press_release_delay()
            + Duration::from_millis(self.inner.timing.key_repeat_delay_ms);

        let mut slot = 0u32;
        for c in text.chars() {
            let Some((modifiers, key_code)) = usage::ascii_to_key(c) else {
                warn!("No key mapping for {:?}, skipping", c);
                continue;
            };
            if slot == 0 {
                self.send_key(key_code, modifiers)?;
            } else {
                self.key_pulse_at(key_code, modifiers, step * slot);
            }
            slot += 1;
        }
        Ok(())
    }

    /// Send a caller-built report after checking it against the descriptor
    pub fn send_raw_report(&self, report_id: u8, payload: &[u8]) -> Result<(), DispatchError> {
        validate_report(report_id, payload)?;
        self.inner.send(report_id, payload)
    }

    /// Drop pending pulses and held state without sending anything.
    ///
    /// Used when the link is already gone, so the host has released
    /// everything on its side.
    pub fn forget_held_input(&self) {
        self.cancel_pending();
        self.inner.state.clear();
        debug!("Held input cleared after link loss");
    }

    /// Cancel pending pulses, clear held state and send neutral reports
    pub fn release_all(&self) -> Result<(), DispatchError> {
        self.cancel_pending();
        self.inner.state.clear();

        let mut first_error = None;
        for report_id in [ID_MOUSE, ID_KEYBOARD, ID_CONSUMER] {
            let result = idle_report(report_id)
                .map_err(DispatchError::from)
                .and_then(|payload| self.inner.send(report_id, &payload));
            if let Err(e) = result {
                debug!("Neutral report {} not sent: {}", report_id, e);
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

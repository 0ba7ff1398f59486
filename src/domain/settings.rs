use crate::domain::fusion::HandMode;
use crate::domain::profile::DeviceProfile;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogSettings {
    #[serde(default = "default_level")]
    pub level: String, // "trace", "debug", "info", "warn", "error"
    #[serde(default = "default_false")]
    pub file_logging_enabled: bool,
    #[serde(default = "default_true")]
    pub console_logging_enabled: bool,
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
    #[serde(default = "default_prefix")]
    pub file_name_prefix: String,
    #[serde(default = "default_true")]
    pub show_file_line: bool,
    #[serde(default = "default_false")]
    pub show_thread_ids: bool,
    #[serde(default = "default_true")]
    pub show_target: bool,
    #[serde(default = "default_true")]
    pub ansi_colors: bool,
    #[serde(default = "default_rotation")]
    pub rotation: String, // "daily", "hourly", "minutely", "never"
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: default_level(),
            file_logging_enabled: default_false(),
            console_logging_enabled: default_true(),
            log_dir: default_log_dir(),
            file_name_prefix: default_prefix(),
            show_file_line: default_true(),
            show_thread_ids: default_false(),
            show_target: default_true(),
            ansi_colors: default_true(),
            rotation: default_rotation(),
        }
    }
}

fn default_level() -> String {
    "info".to_string()
}
fn default_true() -> bool {
    true
}
fn default_false() -> bool {
    false
}
fn default_log_dir() -> String {
    "logs".to_string()
}
fn default_prefix() -> String {
    "wear_hid_controller".to_string()
}
fn default_rotation() -> String {
    "daily".to_string()
}

/// Connection timing and retry budget
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionSettings {
    pub connect_timeout_ms: u64,
    pub discovery_timeout_ms: u64,
    /// Pause between "connected" and the discovery request
    pub settle_delay_ms: u64,
    pub max_attempts: u32,
    /// Reconnect backoff is `attempt * retry_base_delay_ms`
    pub retry_base_delay_ms: u64,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 30_000,
            discovery_timeout_ms: 10_000,
            settle_delay_ms: 500,
            max_attempts: 5,
            retry_base_delay_ms: 2_000,
        }
    }
}

impl ConnectionSettings {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn discovery_timeout(&self) -> Duration {
        Duration::from_millis(self.discovery_timeout_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn retry_delay(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms * attempt as u64)
    }
}

/// Air-mouse sensor fusion options
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionSettings {
    pub hand_mode: HandMode,
    pub stabilize: bool,
    pub left_handed: bool,
    /// Target sensor sampling interval (11.25 ms ~ 89 Hz)
    pub sample_interval_us: u64,
}

impl Default for FusionSettings {
    fn default() -> Self {
        Self {
            hand_mode: HandMode::Center,
            stabilize: true,
            left_handed: false,
            sample_interval_us: 11_250,
        }
    }
}

impl FusionSettings {
    pub fn sample_interval(&self) -> Duration {
        Duration::from_micros(self.sample_interval_us)
    }
}

/// Press/release pulse timing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchSettings {
    pub press_release_delay_ms: u64,
    pub double_click_gap_ms: u64,
    pub key_repeat_delay_ms: u64,
    pub dpad_diagonal_gap_ms: u64,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            press_release_delay_ms: 50,
            double_click_gap_ms: 100,
            key_repeat_delay_ms: 5,
            dpad_diagonal_gap_ms: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub device_profile: DeviceProfile,
    #[serde(default = "default_true")]
    pub auto_reconnect: bool,
    #[serde(default)]
    pub last_connected_address: Option<String>,

    // Logging Settings
    #[serde(default)]
    pub log_settings: LogSettings,

    #[serde(default)]
    pub connection: ConnectionSettings,
    #[serde(default)]
    pub fusion: FusionSettings,
    #[serde(default)]
    pub dispatch: DispatchSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            device_profile: DeviceProfile::default(),
            auto_reconnect: true,
            last_connected_address: None,
            log_settings: LogSettings::default(),
            connection: ConnectionSettings::default(),
            fusion: FusionSettings::default(),
            dispatch: DispatchSettings::default(),
        }
    }
}

/// Read-only access to the settings file
pub struct SettingsService {
    settings: Settings,
    settings_path: Option<PathBuf>,
}

impl SettingsService {
    /// Load from the per-user config directory, falling back to defaults
    pub fn load() -> anyhow::Result<Self> {
        let settings_path = Self::get_settings_path()?;
        Ok(Self::from_path(settings_path))
    }

    /// Load from an explicit file; a missing or malformed file yields defaults
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let settings = match Self::load_from_file(&path) {
            Ok(settings) => settings,
            Err(e) => {
                tracing::debug!("Using default settings ({:#})", e);
                Settings::default()
            }
        };
        Self {
            settings,
            settings_path: Some(path),
        }
    }

    pub fn with_settings(settings: Settings) -> Self {
        Self {
            settings,
            settings_path: None,
        }
    }

    fn get_settings_path() -> anyhow::Result<PathBuf> {
        let mut path = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
        path.push("WearHidController");
        path.push("settings.json");
        Ok(path)
    }

    fn load_from_file(path: &Path) -> anyhow::Result<Settings> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let settings = serde_json::from_str(&contents)
            .with_context(|| format!("parsing {}", path.display()))?;
        Ok(settings)
    }

    pub fn get(&self) -> &Settings {
        &self.settings
    }

    pub fn path(&self) -> Option<&Path> {
        self.settings_path.as_deref()
    }
}

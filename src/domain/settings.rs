use crate::domain::mapping::ControlMode;
use crate::domain::models::CalibrationData;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogSettings {
    #[serde(default = "default_level")]
    pub level: String, // "trace", "debug", "info", "warn", "error"
    #[serde(default = "default_true")]
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
            file_logging_enabled: default_true(),
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
    "gear_vr_session".to_string()
}
fn default_rotation() -> String {
    "daily".to_string()
}

pub const MIN_SMOOTHING_LEVEL: usize = 1;
pub const MAX_SMOOTHING_LEVEL: usize = 10;
pub const MIN_CURVE_POWER: f64 = 1.0;
pub const MAX_CURVE_POWER: f64 = 3.0;

/// Numeric tuning applied by the session at runtime
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    // Pointer
    pub sensitivity: f64,
    pub dead_zone: f64,
    pub enable_smoothing: bool,
    pub smoothing_level: usize,
    pub enable_acceleration: bool,
    pub curve_power: f64,
    pub move_threshold: f64,
    /// Keep drifting while the finger rests near the pad edge
    pub edge_joystick: bool,

    // Touch detection and gestures
    pub touch_threshold: u16,
    pub min_gesture_distance: f64,
    pub gesture_sensitivity: f64,
    pub gesture_tolerance_deg: f64,

    // Buttons
    pub debounce_ms: u64,
    pub watchdog_interval_ms: u64,
    pub inactivity_timeout_ms: u64,

    // Link
    pub max_reconnect_attempts: u32,
    pub reconnect_delay_ms: u64,
    pub connect_timeout_ms: u64,
    pub command_delay_ms: u64,
    pub pairing_max_retries: u32,
    pub pairing_retry_delay_ms: u64,

    // Motion (air mouse mode)
    pub enable_tilt_scroll: bool,

    pub enable_touchpad: bool,
    pub enable_buttons: bool,
    pub enable_gestures: bool,
    pub control_mode: ControlMode,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            sensitivity: 2.0,
            dead_zone: 0.01,
            enable_smoothing: true,
            smoothing_level: 5,
            enable_acceleration: true,
            curve_power: 1.5,
            move_threshold: 1.0,
            edge_joystick: false,
            touch_threshold: 10,
            min_gesture_distance: 0.2,
            gesture_sensitivity: 1.0,
            gesture_tolerance_deg: 60.0,
            debounce_ms: 50,
            watchdog_interval_ms: 1000,
            inactivity_timeout_ms: 5000,
            max_reconnect_attempts: 3,
            reconnect_delay_ms: 2000,
            connect_timeout_ms: 10_000,
            command_delay_ms: 50,
            pairing_max_retries: 3,
            pairing_retry_delay_ms: 1000,
            enable_tilt_scroll: false,
            enable_touchpad: true,
            enable_buttons: true,
            enable_gestures: true,
            control_mode: ControlMode::default(),
        }
    }
}

impl SessionConfig {
    /// Merge a partial update, keeping every value inside its supported range
    pub fn apply(&mut self, update: &ConfigUpdate) {
        macro_rules! merge {
            ($($field:ident),* $(,)?) => {
                $(if let Some(value) = update.$field.clone() {
                    self.$field = value;
                })*
            };
        }
        merge!(
            sensitivity,
            dead_zone,
            enable_smoothing,
            smoothing_level,
            enable_acceleration,
            curve_power,
            move_threshold,
            edge_joystick,
            touch_threshold,
            min_gesture_distance,
            gesture_sensitivity,
            gesture_tolerance_deg,
            debounce_ms,
            watchdog_interval_ms,
            inactivity_timeout_ms,
            max_reconnect_attempts,
            reconnect_delay_ms,
            connect_timeout_ms,
            command_delay_ms,
            pairing_max_retries,
            pairing_retry_delay_ms,
            enable_tilt_scroll,
            enable_touchpad,
            enable_buttons,
            enable_gestures,
            control_mode,
        );
        self.normalize();
    }

    pub fn normalize(&mut self) {
        self.smoothing_level = self
            .smoothing_level
            .clamp(MIN_SMOOTHING_LEVEL, MAX_SMOOTHING_LEVEL);
        self.curve_power = if self.curve_power.is_finite() {
            self.curve_power.clamp(MIN_CURVE_POWER, MAX_CURVE_POWER)
        } else {
            MIN_CURVE_POWER
        };
        self.dead_zone = self.dead_zone.clamp(0.0, 1.0);
        self.sensitivity = self.sensitivity.max(0.0);
        self.gesture_sensitivity = self.gesture_sensitivity.max(0.0);
        self.gesture_tolerance_deg = self.gesture_tolerance_deg.clamp(0.0, 180.0);
        self.watchdog_interval_ms = self.watchdog_interval_ms.max(1);
    }
}

/// Partial configuration change; `None` keeps the current value
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigUpdate {
    pub sensitivity: Option<f64>,
    pub dead_zone: Option<f64>,
    pub enable_smoothing: Option<bool>,
    pub smoothing_level: Option<usize>,
    pub enable_acceleration: Option<bool>,
    pub curve_power: Option<f64>,
    pub move_threshold: Option<f64>,
    pub edge_joystick: Option<bool>,
    pub touch_threshold: Option<u16>,
    pub min_gesture_distance: Option<f64>,
    pub gesture_sensitivity: Option<f64>,
    pub gesture_tolerance_deg: Option<f64>,
    pub debounce_ms: Option<u64>,
    pub watchdog_interval_ms: Option<u64>,
    pub inactivity_timeout_ms: Option<u64>,
    pub max_reconnect_attempts: Option<u32>,
    pub reconnect_delay_ms: Option<u64>,
    pub connect_timeout_ms: Option<u64>,
    pub command_delay_ms: Option<u64>,
    pub pairing_max_retries: Option<u32>,
    pub pairing_retry_delay_ms: Option<u64>,
    pub enable_tilt_scroll: Option<bool>,
    pub enable_touchpad: Option<bool>,
    pub enable_buttons: Option<bool>,
    pub enable_gestures: Option<bool>,
    pub control_mode: Option<ControlMode>,
}

/// Everything persisted between runs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub touchpad_calibration: Option<CalibrationData>,
    #[serde(default)]
    pub known_bluetooth_addresses: Vec<u64>,
    #[serde(default)]
    pub last_connected_address: Option<u64>,

    // Logging Settings
    #[serde(default)]
    pub log_settings: LogSettings,

    #[serde(default)]
    pub input: SessionConfig,

    // Advanced BLE Settings
    #[serde(default = "default_service_uuid")]
    pub ble_service_uuid: String,
    #[serde(default = "default_data_uuid")]
    pub ble_data_char_uuid: String,
    #[serde(default = "default_command_uuid")]
    pub ble_command_char_uuid: String,

    // Debug Settings
    #[serde(default = "default_false")]
    pub debug_raw_data_logging: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            touchpad_calibration: None,
            known_bluetooth_addresses: Vec::new(),
            last_connected_address: None,
            log_settings: LogSettings::default(),
            input: SessionConfig::default(),
            ble_service_uuid: default_service_uuid(),
            ble_data_char_uuid: default_data_uuid(),
            ble_command_char_uuid: default_command_uuid(),
            debug_raw_data_logging: false,
        }
    }
}

fn default_service_uuid() -> String {
    "4f63756c-7573-2054-6872-65656d6f7465".to_string()
}
fn default_data_uuid() -> String {
    "c8c51726-81bc-483b-a052-f7a14ea3d281".to_string()
}
fn default_command_uuid() -> String {
    "c8c51726-81bc-483b-a052-f7a14ea3d282".to_string()
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("could not determine config directory")]
    NoConfigDir,
    #[error("settings I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("settings could not be serialized: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("settings lock poisoned")]
    Poisoned,
}

/// Where calibration and tuning live between sessions
pub trait SettingsStore: Send + Sync {
    fn load_calibration(&self) -> Option<CalibrationData>;
    fn save_calibration(&self, data: &CalibrationData) -> Result<(), StoreError>;
    fn load_config(&self) -> SessionConfig;
    fn save_config(&self, config: &SessionConfig) -> Result<(), StoreError>;
    fn remember_address(&self, address: u64) -> Result<(), StoreError>;
}

/// Store that keeps everything in memory
#[derive(Debug, Default)]
pub struct MemorySettingsStore {
    settings: Mutex<Settings>,
}

impl MemorySettingsStore {
    pub fn new(settings: Settings) -> Self {
        Self {
            settings: Mutex::new(settings),
        }
    }

    pub fn snapshot(&self) -> Settings {
        match self.settings.lock() {
            Ok(settings) => settings.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn with<R>(&self, f: impl FnOnce(&mut Settings) -> R) -> Result<R, StoreError> {
        let mut settings = self.settings.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(f(&mut settings))
    }
}

impl SettingsStore for MemorySettingsStore {
    fn load_calibration(&self) -> Option<CalibrationData> {
        self.snapshot().touchpad_calibration
    }

    fn save_calibration(&self, data: &CalibrationData) -> Result<(), StoreError> {
        self.with(|s| s.touchpad_calibration = Some(data.clone()))
    }

    fn load_config(&self) -> SessionConfig {
        self.snapshot().input
    }

    fn save_config(&self, config: &SessionConfig) -> Result<(), StoreError> {
        self.with(|s| s.input = config.clone())
    }

    fn remember_address(&self, address: u64) -> Result<(), StoreError> {
        self.with(|s| {
            if !s.known_bluetooth_addresses.contains(&address) {
                s.known_bluetooth_addresses.push(address);
            }
            s.last_connected_address = Some(address);
        })
    }
}

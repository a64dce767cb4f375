//! Settings persisted as pretty JSON under the user's config directory.

use crate::domain::models::CalibrationData;
use crate::domain::settings::{SessionConfig, Settings, SettingsStore, StoreError};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};

pub struct JsonSettingsStore {
    settings: Mutex<Settings>,
    settings_path: PathBuf,
}

impl JsonSettingsStore {
    /// Open `<config dir>/GearVRController/settings.json`
    pub fn new() -> Result<Self, StoreError> {
        Ok(Self::open(Self::default_path()?))
    }

    /// Open a settings file at an explicit path. A missing or unreadable
    /// file yields defaults; it is only written on the first save.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let settings_path = path.into();
        let settings = match Self::load_from_file(&settings_path) {
            Ok(settings) => settings,
            Err(StoreError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No settings at {}, using defaults", settings_path.display());
                Settings::default()
            }
            Err(e) => {
                warn!(
                    "Ignoring unreadable settings at {}: {}",
                    settings_path.display(),
                    e
                );
                Settings::default()
            }
        };

        Self {
            settings: Mutex::new(settings),
            settings_path,
        }
    }

    pub fn default_path() -> Result<PathBuf, StoreError> {
        let mut path = dirs::config_dir().ok_or(StoreError::NoConfigDir)?;
        path.push("GearVRController");
        path.push("settings.json");
        Ok(path)
    }

    fn load_from_file(path: &Path) -> Result<Settings, StoreError> {
        let contents = fs::read_to_string(path)?;
        let mut settings: Settings = serde_json::from_str(&contents)?;
        settings.input.normalize();
        Ok(settings)
    }

    pub fn path(&self) -> &Path {
        &self.settings_path
    }

    /// Copy of the current settings
    pub fn settings(&self) -> Settings {
        self.lock().clone()
    }

    /// Apply `f` to the settings and write the result to disk
    pub fn update(&self, f: impl FnOnce(&mut Settings)) -> Result<(), StoreError> {
        let mut settings = self.lock();
        f(&mut settings);
        self.save(&settings)
    }

    fn lock(&self) -> MutexGuard<'_, Settings> {
        // Settings stay consistent between statements, so a poisoned lock is
        // still usable
        self.settings
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn save(&self, settings: &Settings) -> Result<(), StoreError> {
        if let Some(dir) = self.settings_path.parent() {
            fs::create_dir_all(dir)?;
        }
        let json = serde_json::to_string_pretty(settings)?;
        fs::write(&self.settings_path, json)?;
        debug!("Settings saved to {}", self.settings_path.display());
        Ok(())
    }
}

impl SettingsStore for JsonSettingsStore {
    fn load_calibration(&self) -> Option<CalibrationData> {
        self.lock().touchpad_calibration.clone()
    }

    fn save_calibration(&self, data: &CalibrationData) -> Result<(), StoreError> {
        self.update(|settings| settings.touchpad_calibration = Some(data.clone()))
    }

    fn load_config(&self) -> SessionConfig {
        self.lock().input.clone()
    }

    fn save_config(&self, config: &SessionConfig) -> Result<(), StoreError> {
        self.update(|settings| settings.input = config.clone())
    }

    fn remember_address(&self, address: u64) -> Result<(), StoreError> {
        self.update(|settings| {
            if !settings.known_bluetooth_addresses.contains(&address) {
                settings.known_bluetooth_addresses.push(address);
            }
            settings.last_connected_address = Some(address);
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> PathBuf {
        let mut path = std::env::temp_dir();
        path.push(format!("gear_vr_session_{}_{}", std::process::id(), name));
        path.push("settings.json");
        let _ = fs::remove_file(&path);
        path
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let store = JsonSettingsStore::open(temp_path("missing"));
        assert!(store.load_calibration().is_none());
        assert_eq!(store.load_config(), SessionConfig::default());
        assert!(!store.path().exists());
    }

    #[test]
    fn test_calibration_survives_reopen() {
        let path = temp_path("reopen");
        let store = JsonSettingsStore::open(&path);
        let calibration = CalibrationData::from_bounds(80, 940, 60, 960);
        store.save_calibration(&calibration).unwrap();
        store.remember_address(0x2CBABA2E17E3).unwrap();

        let reopened = JsonSettingsStore::open(&path);
        assert_eq!(reopened.load_calibration(), Some(calibration));
        assert_eq!(reopened.settings().last_connected_address, Some(0x2CBABA2E17E3));
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn test_corrupt_file_falls_back_to_defaults() {
        let path = temp_path("corrupt");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "{ not json").unwrap();
        let store = JsonSettingsStore::open(&path);
        assert_eq!(store.load_config(), SessionConfig::default());
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn test_loaded_config_is_clamped() {
        let path = temp_path("clamped");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, r#"{"input": {"smoothing_level": 99, "curve_power": 7.5}}"#).unwrap();
        let config = JsonSettingsStore::open(&path).load_config();
        assert_eq!(config.smoothing_level, 10);
        assert_eq!(config.curve_power, 3.0);
        let _ = fs::remove_file(&path);
    }
}

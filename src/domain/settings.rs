use crate::infrastructure::bluetooth::protocol::{
    COMMAND_CHAR_UUID, DEFAULT_BUTTON_THRESHOLDS, NOTIFY_CHAR_UUID, SERVICE_UUID,
};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

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
    "magic_caster_wand".to_string()
}
fn default_rotation() -> String {
    "daily".to_string()
}

/// Where spell inference runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionBackend {
    #[default]
    Remote,
    OnDevice,
}

/// Colour the wand tip shows while a gesture is being captured.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum CastingColor {
    #[default]
    White,
    Red,
    Green,
    Blue,
    Yellow,
    Cyan,
    Magenta,
    Orange,
    Purple,
}

impl CastingColor {
    pub fn rgb(&self) -> u32 {
        match self {
            Self::White => 0xFFFFFF,
            Self::Red => 0xFF0000,
            Self::Green => 0x00FF00,
            Self::Blue => 0x0000FF,
            Self::Yellow => 0xFFFF00,
            Self::Cyan => 0x00FFFF,
            Self::Magenta => 0xFF00FF,
            Self::Orange => 0xFF8000,
            Self::Purple => 0x8000FF,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    // Classifier Settings
    #[serde(default = "default_tflite_url")]
    pub tflite_url: String,
    /// Flatbuffer uploaded to the inference server
    #[serde(default = "default_remote_model_path")]
    pub remote_model_path: String,
    /// Dense network evaluated in process
    #[serde(default = "default_on_device_model_path")]
    pub on_device_model_path: String,
    #[serde(default)]
    pub detection_backend: DetectionBackend,
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f32,
    #[serde(default = "default_classifier_timeout_ms")]
    pub classifier_timeout_ms: u64,

    #[serde(default)]
    pub casting_led_color: CastingColor,

    // Command Settings
    #[serde(default = "default_command_timeout_ms")]
    pub command_timeout_ms: u64,
    #[serde(default = "default_command_retries")]
    pub command_retries: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    #[serde(default = "default_button_thresholds")]
    pub button_thresholds: [u8; 8],

    // Pairing Settings
    #[serde(default)]
    pub known_addresses: Vec<u64>,
    #[serde(default)]
    pub last_connected_address: Option<u64>,

    // Advanced BLE Settings
    #[serde(default = "default_service_uuid")]
    pub ble_service_uuid: String,
    #[serde(default = "default_command_uuid")]
    pub ble_command_char_uuid: String,
    #[serde(default = "default_notify_uuid")]
    pub ble_notify_char_uuid: String,

    // Logging Settings
    #[serde(default)]
    pub log_settings: LogSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            tflite_url: default_tflite_url(),
            remote_model_path: default_remote_model_path(),
            on_device_model_path: default_on_device_model_path(),
            detection_backend: DetectionBackend::default(),
            confidence_threshold: default_confidence_threshold(),
            classifier_timeout_ms: default_classifier_timeout_ms(),
            casting_led_color: CastingColor::default(),
            command_timeout_ms: default_command_timeout_ms(),
            command_retries: default_command_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
            button_thresholds: default_button_thresholds(),
            known_addresses: Vec::new(),
            last_connected_address: None,
            ble_service_uuid: default_service_uuid(),
            ble_command_char_uuid: default_command_uuid(),
            ble_notify_char_uuid: default_notify_uuid(),
            log_settings: LogSettings::default(),
        }
    }
}

impl Settings {
    /// Model file for the selected detection backend.
    pub fn model_path(&self) -> &str {
        match self.detection_backend {
            DetectionBackend::Remote => &self.remote_model_path,
            DetectionBackend::OnDevice => &self.on_device_model_path,
        }
    }

    /// Addresses to try when none is given: last connected first, then the
    /// remaining known wands in pairing order.
    pub fn reconnect_candidates(&self) -> Vec<u64> {
        let mut candidates: Vec<u64> = self.last_connected_address.into_iter().collect();
        for address in &self.known_addresses {
            if !candidates.contains(address) {
                candidates.push(*address);
            }
        }
        candidates
    }
}

fn default_tflite_url() -> String {
    "http://b5e3f765-tflite-server:8000".to_string()
}
fn default_remote_model_path() -> String {
    "model.tflite".to_string()
}
fn default_on_device_model_path() -> String {
    "model.json".to_string()
}
fn default_confidence_threshold() -> f32 {
    0.99
}
fn default_classifier_timeout_ms() -> u64 {
    5000
}
fn default_command_timeout_ms() -> u64 {
    5000
}
fn default_command_retries() -> u32 {
    3
}
fn default_retry_backoff_ms() -> u64 {
    500
}
fn default_button_thresholds() -> [u8; 8] {
    DEFAULT_BUTTON_THRESHOLDS
}
fn default_service_uuid() -> String {
    SERVICE_UUID.to_string()
}
fn default_command_uuid() -> String {
    COMMAND_CHAR_UUID.to_string()
}
fn default_notify_uuid() -> String {
    NOTIFY_CHAR_UUID.to_string()
}

pub struct SettingsService {
    settings: Settings,
    settings_path: PathBuf,
}

impl SettingsService {
    pub fn new() -> anyhow::Result<Self> {
        let settings_path = Self::get_settings_path()?;
        Ok(Self::with_path(settings_path))
    }

    /// Load from an explicit file, falling back to defaults.
    pub fn with_path(settings_path: impl Into<PathBuf>) -> Self {
        let settings_path = settings_path.into();
        let settings = match Self::load_from_file(&settings_path) {
            Ok(settings) => settings,
            Err(e) => {
                debug!(
                    "Using default settings ({}): {}",
                    settings_path.display(),
                    e
                );
                Settings::default()
            }
        };

        Self {
            settings,
            settings_path,
        }
    }

    fn get_settings_path() -> anyhow::Result<PathBuf> {
        let mut path = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
        path.push("MagicCasterWand");
        fs::create_dir_all(&path)?;
        path.push("settings.json");
        Ok(path)
    }

    fn load_from_file(path: &Path) -> anyhow::Result<Settings> {
        let contents = fs::read_to_string(path)?;
        let settings = serde_json::from_str(&contents)?;
        Ok(settings)
    }

    pub fn path(&self) -> &Path {
        &self.settings_path
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(&self.settings)?;
        fs::write(&self.settings_path, json)?;
        Ok(())
    }

    pub fn get(&self) -> &Settings {
        &self.settings
    }

    pub fn get_mut(&mut self) -> &mut Settings {
        &mut self.settings
    }

    pub fn add_known_address(&mut self, address: u64) -> anyhow::Result<()> {
        if !self.settings.known_addresses.contains(&address) {
            self.settings.known_addresses.push(address);
        }
        if self.settings.last_connected_address != Some(address) {
            self.settings.last_connected_address = Some(address);
            if let Err(e) = self.save() {
                warn!("Failed to persist wand address: {}", e);
                return Err(e);
            }
        }
        Ok(())
    }
}

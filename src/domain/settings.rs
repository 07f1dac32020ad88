use crate::domain::models::PointerButton;
use crate::error::BridgeError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use uuid::Uuid;

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
    #[serde(default = "default_false")]
    pub show_file_line: bool,
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
            show_file_line: default_false(),
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
    "ble_motion_pointer".to_string()
}
fn default_rotation() -> String {
    "daily".to_string()
}

/// Maps raw button-mask bits to a logical pointer button.
///
/// The button counts as held when every bit of `mask` is set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ButtonBinding {
    pub mask: u8,
    pub button: PointerButton,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MotionSettings {
    #[serde(default = "default_tick_hz")]
    pub tick_hz: u32,
    /// Samples averaged into the analog center after each fresh subscription
    #[serde(default = "default_calibration_samples")]
    pub calibration_samples: usize,
    #[serde(default = "default_y_half_span")]
    pub y_half_span: f64,
    #[serde(default = "default_dead_zone")]
    pub dead_zone: f64, // fraction of the half span
    #[serde(default = "default_max_speed")]
    pub max_speed: f64, // device units per tick
    #[serde(default = "default_x_speed")]
    pub x_speed: f64,
    #[serde(default = "default_true")]
    pub enable_acceleration: bool,
    #[serde(default = "default_acceleration_power")]
    pub acceleration_power: f64,
    #[serde(default = "default_false")]
    pub invert_y: bool,
}

impl Default for MotionSettings {
    fn default() -> Self {
        Self {
            tick_hz: default_tick_hz(),
            calibration_samples: default_calibration_samples(),
            y_half_span: default_y_half_span(),
            dead_zone: default_dead_zone(),
            max_speed: default_max_speed(),
            x_speed: default_x_speed(),
            enable_acceleration: default_true(),
            acceleration_power: default_acceleration_power(),
            invert_y: default_false(),
        }
    }
}

impl MotionSettings {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.tick_hz.max(1) as f64)
    }
}

fn default_tick_hz() -> u32 {
    60
}
fn default_calibration_samples() -> usize {
    16
}
fn default_y_half_span() -> f64 {
    64.0
}
fn default_dead_zone() -> f64 {
    0.1
}
fn default_max_speed() -> f64 {
    12.0
}
fn default_x_speed() -> f64 {
    8.0
}
fn default_acceleration_power() -> f64 {
    1.5
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkSettings {
    #[serde(default = "default_scan_timeout_ms")]
    pub scan_timeout_ms: u64,
    #[serde(default = "default_connect_attempts")]
    pub connect_attempts: u32,
    #[serde(default = "default_stale_timeout_ms")]
    pub stale_timeout_ms: u64,
    #[serde(default = "default_backoff_min_ms")]
    pub backoff_min_ms: u64,
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
    #[serde(default = "default_frame_queue_capacity")]
    pub frame_queue_capacity: usize,
}

impl Default for LinkSettings {
    fn default() -> Self {
        Self {
            scan_timeout_ms: default_scan_timeout_ms(),
            connect_attempts: default_connect_attempts(),
            stale_timeout_ms: default_stale_timeout_ms(),
            backoff_min_ms: default_backoff_min_ms(),
            backoff_max_ms: default_backoff_max_ms(),
            frame_queue_capacity: default_frame_queue_capacity(),
        }
    }
}

fn default_scan_timeout_ms() -> u64 {
    10_000
}
fn default_connect_attempts() -> u32 {
    3
}
fn default_stale_timeout_ms() -> u64 {
    1500
}
fn default_backoff_min_ms() -> u64 {
    1000
}
fn default_backoff_max_ms() -> u64 {
    30_000
}
fn default_frame_queue_capacity() -> usize {
    64
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputBackendKind {
    /// uinput on Linux, SendInput on Windows
    Native,
    /// Trace events instead of moving the real pointer
    Log,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputSettings {
    #[serde(default = "default_backend")]
    pub backend: OutputBackendKind,
    #[serde(default = "default_emit_timeout_ms")]
    pub emit_timeout_ms: u64,
    #[serde(default = "default_device_name")]
    pub device_name: String,
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            emit_timeout_ms: default_emit_timeout_ms(),
            device_name: default_device_name(),
        }
    }
}

fn default_backend() -> OutputBackendKind {
    OutputBackendKind::Native
}
fn default_emit_timeout_ms() -> u64 {
    8
}
fn default_device_name() -> String {
    "BLE Motion Pointer".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_name_prefix")]
    pub device_name_prefix: String,
    #[serde(default = "default_service_uuid")]
    pub ble_service_uuid: String,
    #[serde(default = "default_notify_uuid")]
    pub ble_notify_char_uuid: String,

    /// Which raw codes are which click. Left empty on purpose: there is no
    /// reliable default for this controller.
    #[serde(default)]
    pub button_bindings: Vec<ButtonBinding>,
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    #[serde(default)]
    pub motion: MotionSettings,
    #[serde(default)]
    pub link: LinkSettings,
    #[serde(default)]
    pub output: OutputSettings,

    #[serde(default)]
    pub log_settings: LogSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            device_name_prefix: default_name_prefix(),
            ble_service_uuid: default_service_uuid(),
            ble_notify_char_uuid: default_notify_uuid(),
            button_bindings: Vec::new(),
            debounce_ms: default_debounce_ms(),
            motion: MotionSettings::default(),
            link: LinkSettings::default(),
            output: OutputSettings::default(),
            log_settings: LogSettings::default(),
        }
    }
}

fn default_name_prefix() -> String {
    "BLE-M".to_string()
}
fn default_service_uuid() -> String {
    "0000ffe0-0000-1000-8000-00805f9b34fb".to_string()
}
fn default_notify_uuid() -> String {
    "0000ffe4-0000-1000-8000-00805f9b34fb".to_string()
}
fn default_debounce_ms() -> u64 {
    40
}

/// Where [`Settings::load`] got its values from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingsSource {
    File,
    Defaults,
}

impl Settings {
    /// Default location: `<config dir>/BleMotionPointer/settings.json`
    pub fn default_path() -> anyhow::Result<PathBuf> {
        let mut path = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
        path.push("BleMotionPointer");
        path.push("settings.json");
        Ok(path)
    }

    /// Load and validate settings. A missing file yields the defaults.
    ///
    /// Runs before logging is up, so the caller reports the source.
    pub fn load(path: &Path) -> anyhow::Result<(Self, SettingsSource)> {
        let (settings, source) = if path.exists() {
            let contents = fs::read_to_string(path)?;
            (serde_json::from_str(&contents)?, SettingsSource::File)
        } else {
            (Self::default(), SettingsSource::Defaults)
        };
        settings.validate()?;
        Ok((settings, source))
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    pub fn service_uuid(&self) -> Result<Uuid, BridgeError> {
        parse_uuid(&self.ble_service_uuid)
    }

    pub fn notify_char_uuid(&self) -> Result<Uuid, BridgeError> {
        parse_uuid(&self.ble_notify_char_uuid)
    }

    pub fn debounce_interval(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn validate(&self) -> Result<(), BridgeError> {
        let invalid = |msg: String| Err(BridgeError::Config(msg));

        if self.device_name_prefix.is_empty() {
            return invalid("device_name_prefix must not be empty".into());
        }
        self.service_uuid()?;
        self.notify_char_uuid()?;

        if let Some(binding) = self.button_bindings.iter().find(|b| b.mask == 0) {
            return invalid(format!("button binding for {} has an empty mask", binding.button));
        }

        let motion = &self.motion;
        if motion.tick_hz == 0 {
            return invalid("motion.tick_hz must be positive".into());
        }
        if motion.calibration_samples == 0 {
            return invalid("motion.calibration_samples must be positive".into());
        }
        if !(motion.y_half_span > 0.0) {
            return invalid("motion.y_half_span must be positive".into());
        }
        if !(0.0..1.0).contains(&motion.dead_zone) {
            return invalid(format!("motion.dead_zone {} is outside [0, 1)", motion.dead_zone));
        }
        if motion.max_speed < 0.0 || motion.x_speed < 0.0 {
            return invalid("motion speeds must not be negative".into());
        }
        if !(motion.acceleration_power > 0.0) {
            return invalid("motion.acceleration_power must be positive".into());
        }

        let link = &self.link;
        if link.connect_attempts == 0 {
            return invalid("link.connect_attempts must be at least 1".into());
        }
        if link.stale_timeout_ms == 0 || link.scan_timeout_ms == 0 {
            return invalid("link timeouts must be positive".into());
        }
        if link.backoff_min_ms == 0 || link.backoff_min_ms > link.backoff_max_ms {
            return invalid(format!(
                "link backoff bounds {}..{} ms are invalid",
                link.backoff_min_ms, link.backoff_max_ms
            ));
        }
        if link.frame_queue_capacity == 0 {
            return invalid("link.frame_queue_capacity must be positive".into());
        }

        if self.output.emit_timeout_ms == 0 {
            return invalid("output.emit_timeout_ms must be positive".into());
        }
        Ok(())
    }
}

pub fn parse_uuid(uuid_str: &str) -> Result<Uuid, BridgeError> {
    Uuid::parse_str(uuid_str).map_err(|_| BridgeError::InvalidUuid(uuid_str.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let settings = Settings::default();
        settings.validate().unwrap();
        assert!(settings.button_bindings.is_empty());
        assert_eq!(settings.link.backoff_min_ms, 1000);
        assert_eq!(settings.link.backoff_max_ms, 30_000);
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let json = r#"{
            "device_name_prefix": "Remote",
            "button_bindings": [
                { "mask": 16, "button": "primary" },
                { "mask": 32, "button": "secondary" }
            ],
            "motion": { "max_speed": 20.0 }
        }"#;
        let settings: Settings = serde_json::from_str(json).unwrap();
        settings.validate().unwrap();

        assert_eq!(settings.device_name_prefix, "Remote");
        assert_eq!(
            settings.button_bindings,
            vec![
                ButtonBinding { mask: 0x10, button: PointerButton::Primary },
                ButtonBinding { mask: 0x20, button: PointerButton::Secondary },
            ]
        );
        assert_eq!(settings.motion.max_speed, 20.0);
        assert_eq!(settings.motion.tick_hz, 60);
        assert_eq!(settings.debounce_ms, 40);
    }

    #[test]
    fn test_rejects_bad_values() {
        let mut settings = Settings::default();
        settings.motion.dead_zone = 1.0;
        assert!(matches!(settings.validate(), Err(BridgeError::Config(_))));

        let mut settings = Settings::default();
        settings.link.backoff_min_ms = 60_000;
        assert!(matches!(settings.validate(), Err(BridgeError::Config(_))));

        let mut settings = Settings::default();
        settings.button_bindings.push(ButtonBinding { mask: 0, button: PointerButton::Primary });
        assert!(matches!(settings.validate(), Err(BridgeError::Config(_))));

        let mut settings = Settings::default();
        settings.ble_notify_char_uuid = "not-a-uuid".into();
        assert!(matches!(settings.validate(), Err(BridgeError::InvalidUuid(_))));
    }

    #[test]
    fn test_save_and_load() {
        let dir = std::env::temp_dir().join(format!("ble_motion_pointer_{}", std::process::id()));
        let path = dir.join("settings.json");

        let mut settings = Settings::default();
        settings.debounce_ms = 55;
        settings.save(&path).unwrap();

        let (loaded, source) = Settings::load(&path).unwrap();
        assert_eq!(source, SettingsSource::File);
        assert_eq!(loaded.debounce_ms, 55);

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let path = std::env::temp_dir().join("ble_motion_pointer_does_not_exist.json");
        let (loaded, source) = Settings::load(&path).unwrap();
        assert_eq!(source, SettingsSource::Defaults);
        assert_eq!(loaded.device_name_prefix, "BLE-M");
    }

    #[test]
    fn test_tick_interval() {
        let motion = MotionSettings { tick_hz: 50, ..Default::default() };
        assert_eq!(motion.tick_interval(), Duration::from_millis(20));
    }
}

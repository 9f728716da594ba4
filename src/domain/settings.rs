use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

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
            show_file_line: default_false(),
            show_thread_ids: default_false(),
            show_target: default_true(),
            ansi_colors: default_true(),
            rotation: default_rotation(),
        }
    }
}

/// What to do when characteristic discovery or notification setup fails
/// on an otherwise healthy connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscribeFailurePolicy {
    /// Log and stay connected, possibly only partially subscribed.
    #[default]
    Continue,
    /// Drop the link and start over from scanning.
    Reconnect,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BleSettings {
    #[serde(default = "default_device_address")]
    pub device_address: String,
    #[serde(default = "default_scan_timeout_secs")]
    pub scan_timeout_secs: u64,
    /// Pause between failed scans; 0 retries immediately.
    #[serde(default)]
    pub scan_retry_delay_ms: u64,
    #[serde(default)]
    pub subscribe_failure_policy: SubscribeFailurePolicy,
    #[serde(default = "default_false")]
    pub invalidate_cache_on_disconnect: bool,
    /// Token prepended to every fan speed write.
    #[serde(default)]
    pub relay_secret: String,
}

impl Default for BleSettings {
    fn default() -> Self {
        Self {
            device_address: default_device_address(),
            scan_timeout_secs: default_scan_timeout_secs(),
            scan_retry_delay_ms: 0,
            subscribe_failure_policy: SubscribeFailurePolicy::default(),
            invalidate_cache_on_disconnect: default_false(),
            relay_secret: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MqttSettings {
    #[serde(default = "default_mqtt_host")]
    pub host: String,
    #[serde(default = "default_mqtt_port")]
    pub port: u16,
    #[serde(default = "default_client_id")]
    pub client_id: String,
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,
    #[serde(default = "default_topic_prefix")]
    pub topic_prefix: String,
    #[serde(default)]
    pub qos: u8,
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    #[serde(default = "default_true")]
    pub relay_commands_enabled: bool,
}

impl Default for MqttSettings {
    fn default() -> Self {
        Self {
            host: default_mqtt_host(),
            port: default_mqtt_port(),
            client_id: default_client_id(),
            keep_alive_secs: default_keep_alive_secs(),
            topic_prefix: default_topic_prefix(),
            qos: 0,
            reconnect_delay_ms: default_reconnect_delay_ms(),
            relay_commands_enabled: default_true(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub ble: BleSettings,
    #[serde(default)]
    pub mqtt: MqttSettings,
    #[serde(default)]
    pub log_settings: LogSettings,
}

impl Settings {
    pub fn validate(&self) -> anyhow::Result<()> {
        if !is_hardware_address(&self.ble.device_address) {
            anyhow::bail!(
                "Invalid BLE device address '{}', expected AA:BB:CC:DD:EE:FF",
                self.ble.device_address
            );
        }
        if self.mqtt.host.trim().is_empty() {
            anyhow::bail!("MQTT host must not be empty");
        }
        if self.mqtt.topic_prefix.trim_matches('/').is_empty() {
            anyhow::bail!("MQTT topic prefix must not be empty");
        }
        if self.mqtt.qos > 2 {
            anyhow::bail!("Invalid MQTT QoS {}, must be 0, 1 or 2", self.mqtt.qos);
        }
        Ok(())
    }
}

fn is_hardware_address(address: &str) -> bool {
    let octets: Vec<&str> = address.split(':').collect();
    octets.len() == 6
        && octets
            .iter()
            .all(|o| o.len() == 2 && o.chars().all(|c| c.is_ascii_hexdigit()))
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
    "env_sensor_bridge".to_string()
}
fn default_rotation() -> String {
    "daily".to_string()
}
fn default_device_address() -> String {
    "98:4F:EE:0F:50:00".to_string()
}
fn default_scan_timeout_secs() -> u64 {
    30
}
fn default_mqtt_host() -> String {
    "raspberrypi.lan".to_string()
}
fn default_mqtt_port() -> u16 {
    1883
}
fn default_client_id() -> String {
    "env-sensor-bridge".to_string()
}
fn default_keep_alive_secs() -> u64 {
    30
}
fn default_topic_prefix() -> String {
    "bt2mqtt".to_string()
}
fn default_reconnect_delay_ms() -> u64 {
    5000
}

pub struct SettingsService {
    settings: Settings,
    settings_path: PathBuf,
}

impl SettingsService {
    /// Load settings from `path`, or from the per-user config directory.
    ///
    /// A missing file yields defaults, which are written back so they can be
    /// edited. A file that exists but does not parse is an error.
    pub fn load(path: Option<PathBuf>) -> anyhow::Result<Self> {
        let settings_path = match path {
            Some(path) => path,
            None => Self::get_settings_path()?,
        };

        if settings_path.exists() {
            let settings = Self::load_from_file(&settings_path)?;
            return Ok(Self {
                settings,
                settings_path,
            });
        }

        let service = Self {
            settings: Settings::default(),
            settings_path,
        };
        if let Err(e) = service.save() {
            warn!(
                "Could not write default settings to {}: {}",
                service.settings_path.display(),
                e
            );
        } else {
            info!(
                "Wrote default settings to {}",
                service.settings_path.display()
            );
        }
        Ok(service)
    }

    fn get_settings_path() -> anyhow::Result<PathBuf> {
        let mut path = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
        path.push("env-sensor-bridge");
        path.push("settings.json");
        Ok(path)
    }

    fn load_from_file(path: &Path) -> anyhow::Result<Settings> {
        let contents = fs::read_to_string(path)?;
        let settings = serde_json::from_str(&contents)
            .map_err(|e| anyhow::anyhow!("Invalid settings file {}: {}", path.display(), e))?;
        Ok(settings)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        if let Some(dir) = self.settings_path.parent() {
            fs::create_dir_all(dir)?;
        }
        let json = serde_json::to_string_pretty(&self.settings)?;
        fs::write(&self.settings_path, json)?;
        Ok(())
    }

    pub fn get(&self) -> &Settings {
        &self.settings
    }

    pub fn path(&self) -> &Path {
        &self.settings_path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_path(name: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("env-sensor-bridge-{}-{}", name, std::process::id()))
            .join("settings.json")
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let settings: Settings =
            serde_json::from_str(r#"{"ble": {"device_address": "AA:BB:CC:DD:EE:FF"}}"#).unwrap();
        assert_eq!(settings.ble.device_address, "AA:BB:CC:DD:EE:FF");
        assert_eq!(settings.ble.scan_timeout_secs, 30);
        assert_eq!(
            settings.ble.subscribe_failure_policy,
            SubscribeFailurePolicy::Continue
        );
        assert_eq!(settings.mqtt.topic_prefix, "bt2mqtt");
        assert_eq!(settings.mqtt.port, 1883);
        assert_eq!(settings.log_settings.level, "info");
    }

    #[test]
    fn test_subscribe_policy_is_lowercase() {
        let ble: BleSettings =
            serde_json::from_str(r#"{"subscribe_failure_policy": "reconnect"}"#).unwrap();
        assert_eq!(ble.subscribe_failure_policy, SubscribeFailurePolicy::Reconnect);
    }

    #[test]
    fn test_validate() {
        assert!(Settings::default().validate().is_ok());

        let mut settings = Settings::default();
        settings.ble.device_address = "98:4F:EE:0F:50".to_string();
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.ble.device_address = "98:4F:EE:0F:50:ZZ".to_string();
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.mqtt.qos = 3;
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.mqtt.topic_prefix = "/".to_string();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_missing_file_writes_defaults() {
        let path = scratch_path("defaults");
        let _ = fs::remove_file(&path);

        let service = SettingsService::load(Some(path.clone())).unwrap();
        assert_eq!(service.get().mqtt.host, "raspberrypi.lan");
        assert!(path.exists());

        let reloaded = SettingsService::load(Some(path.clone())).unwrap();
        assert_eq!(reloaded.get().ble.device_address, "98:4F:EE:0F:50:00");

        let _ = fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let path = scratch_path("corrupt");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "{ not json").unwrap();

        assert!(SettingsService::load(Some(path.clone())).is_err());

        let _ = fs::remove_dir_all(path.parent().unwrap());
    }
}

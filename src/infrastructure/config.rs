use crate::domain::device::Device;
use anyhow::Context;
use chrono::FixedOffset;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_CONFIG_PATH: &str = "config/monitor";

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct AppConfig {
    pub serial: SerialConfig,
    pub collector: CollectorConfig,
    pub monitor: MonitorConfig,
    pub audit_log: AuditLogConfig,
    pub devices: Vec<DeviceConfig>,
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub display: DisplayConfig,
    pub auth: AuthConfig,
    pub simulator: SimulatorConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SerialConfig {
    pub port: String,
    pub baud_rate: u32,
    pub read_timeout_ms: u64,
    pub settle_ms: u64,
    pub max_line_bytes: usize,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: "/dev/ttyUSB0".to_string(),
            baud_rate: 115_200,
            read_timeout_ms: 1000,
            settle_ms: 2000,
            max_line_bytes: 4096,
        }
    }
}

impl SerialConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct CollectorConfig {
    pub base_url: String,
    pub timeout_secs: u64,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8000".to_string(),
            timeout_secs: 5,
        }
    }
}

impl CollectorConfig {
    pub fn data_url(&self) -> String {
        format!("{}/data", self.base_url.trim_end_matches('/'))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct MonitorConfig {
    pub interval_secs: u64,
    pub stagger_ms: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval_secs: 5,
            stagger_ms: 500,
        }
    }
}

impl MonitorConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn stagger(&self) -> Duration {
        Duration::from_millis(self.stagger_ms)
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct AuditLogConfig {
    pub path: PathBuf,
}

impl Default for AuditLogConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("raw_esp32_data.log"),
        }
    }
}

/// A monitored device; `port` / `baud_rate` override the `[serial]` section.
#[derive(Debug, Deserialize, Clone)]
pub struct DeviceConfig {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub port: Option<String>,
    #[serde(default)]
    pub baud_rate: Option<u32>,
}

impl DeviceConfig {
    pub fn device(&self) -> Device {
        match &self.name {
            Some(name) => Device::new(self.id.clone(), name.clone()),
            None => Device::from_id(self.id.clone()),
        }
    }

    pub fn link(&self, serial: &SerialConfig) -> SerialConfig {
        SerialConfig {
            port: self.port.clone().unwrap_or_else(|| serial.port.clone()),
            baud_rate: self.baud_rate.unwrap_or(serial.baud_rate),
            ..serial.clone()
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8000".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "water_quality.db".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DisplayConfig {
    pub utc_offset_minutes: i32,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        // Central Africa Time
        Self {
            utc_offset_minutes: 120,
        }
    }
}

impl DisplayConfig {
    pub fn offset(&self) -> anyhow::Result<FixedOffset> {
        self.utc_offset_minutes
            .checked_mul(60)
            .and_then(FixedOffset::east_opt)
            .with_context(|| {
                format!("display.utc_offset_minutes out of range: {}", self.utc_offset_minutes)
            })
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct AuthConfig {
    pub seed_user: Option<SeedUser>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            seed_user: Some(SeedUser {
                username: "admin".to_string(),
                password: "1234".to_string(),
            }),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SeedUser {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SimulatorConfig {
    pub devices: Vec<DeviceConfig>,
    pub interval_secs: u64,
    pub stagger_ms: u64,
}

impl SimulatorConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn stagger(&self) -> Duration {
        Duration::from_millis(self.stagger_ms)
    }
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        let devices = (1..=4)
            .map(|n| DeviceConfig {
                id: format!("device_{n:03}"),
                name: Some(format!("Device {n}")),
                port: None,
                baud_rate: None,
            })
            .collect();
        Self {
            devices,
            interval_secs: 5,
            stagger_ms: 500,
        }
    }
}

impl AppConfig {
    /// Configured devices, falling back to a single ESP32 on the default link.
    pub fn monitored_devices(&self) -> Vec<DeviceConfig> {
        if !self.devices.is_empty() {
            return self.devices.clone();
        }
        vec![DeviceConfig {
            id: "esp32_001".to_string(),
            name: Some("ESP32 Device 1".to_string()),
            port: None,
            baud_rate: None,
        }]
    }
}

pub fn load_config(path: &str) -> anyhow::Result<AppConfig> {
    let settings = config::Config::builder()
        .add_source(config::File::with_name(path).required(false))
        .add_source(
            config::Environment::with_prefix("WQM")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        )
        .build()
        .with_context(|| format!("Failed to load configuration from {path}"))?;

    settings
        .try_deserialize()
        .context("Invalid configuration")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_without_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent");
        let config = load_config(path.to_str().unwrap()).unwrap();

        assert_eq!(config.serial.baud_rate, 115_200);
        assert_eq!(config.collector.data_url(), "http://127.0.0.1:8000/data");
        assert_eq!(config.monitor.interval(), Duration::from_secs(5));
        assert_eq!(config.audit_log.path, PathBuf::from("raw_esp32_data.log"));

        let devices = config.monitored_devices();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].device().name, "ESP32 Device 1");
        assert_eq!(config.simulator.devices.len(), 4);
        assert_eq!(config.simulator.devices[3].id, "device_004");
    }

    #[test]
    fn test_load_from_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("monitor.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            r#"
[serial]
port = "/dev/ttyACM0"
baud_rate = 9600

[collector]
base_url = "http://collector.local:9000/"
timeout_secs = 3

[[devices]]
id = "lake_north"

[[devices]]
id = "lake_south"
name = "South Shore"
port = "/dev/ttyACM1"
"#
        )
        .unwrap();

        let config = load_config(path.with_extension("").to_str().unwrap()).unwrap();
        assert_eq!(config.collector.data_url(), "http://collector.local:9000/data");
        assert_eq!(config.collector.timeout(), Duration::from_secs(3));
        assert_eq!(config.serial.read_timeout_ms, 1000);

        let devices = config.monitored_devices();
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].device().name, "lake north");
        assert_eq!(devices[0].link(&config.serial).port, "/dev/ttyACM0");
        assert_eq!(devices[1].device().name, "South Shore");
        let south = devices[1].link(&config.serial);
        assert_eq!(south.port, "/dev/ttyACM1");
        assert_eq!(south.baud_rate, 9600);
    }

    #[test]
    fn test_display_offset() {
        let display = DisplayConfig::default();
        assert_eq!(display.offset().unwrap().local_minus_utc(), 7200);

        let broken = DisplayConfig {
            utc_offset_minutes: 100_000,
        };
        assert!(broken.offset().is_err());

        for minutes in [i32::MAX, i32::MIN] {
            let overflowing = DisplayConfig {
                utc_offset_minutes: minutes,
            };
            let err = overflowing.offset().unwrap_err();
            assert!(err.to_string().contains("out of range"), "{err}");
        }
    }
}

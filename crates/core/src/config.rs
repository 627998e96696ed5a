use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::bluetooth::constants::{device, timing};
use crate::protocol::constants::{CHUNK_HEADER_LEN, MAX_PAYLOAD_LEN};
use crate::protocol::initiator::InitiatorTimeouts;
use crate::protocol::session::WifiConfig;

/// File name of the device registry inside the data directory
pub const REGISTRY_FILE: &str = "devices.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub data_dir: PathBuf,
    #[serde(default)]
    pub scanner: ScannerConfig,
    #[serde(default)]
    pub emulator: EmulatorConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("quadlink"),
            scanner: ScannerConfig::default(),
            emulator: EmulatorConfig::default(),
        }
    }
}

impl Config {
    pub fn load_from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    pub fn save_to_file(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn registry_path(&self) -> PathBuf {
        self.data_dir.join(REGISTRY_FILE)
    }

    pub fn validate(&self) -> Result<(), String> {
        self.scanner.validate()?;
        self.emulator.validate()
    }
}

/// Initiator sweep settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    /// Advertised name prefixes treated as robots
    pub name_prefixes: Vec<String>,

    /// Length of one discovery sweep
    pub scan_duration_ms: u64,

    pub connect_timeout_secs: u64,

    pub handshake_timeout_ms: u64,

    /// Bound on each request/response exchange after the handshake
    pub response_timeout_ms: u64,

    pub rescan_delay_ms: u64,

    pub chunk_gap_ms: u64,

    /// Credentials pushed to each robot after its serial is read
    pub wifi: Option<WifiConfig>,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            name_prefixes: device::ROBOT_NAME_PREFIXES
                .iter()
                .map(|p| p.to_string())
                .collect(),
            scan_duration_ms: timing::DEFAULT_SCAN_DURATION.as_millis() as u64,
            connect_timeout_secs: timing::CONNECTION_TIMEOUT.as_secs(),
            handshake_timeout_ms: timing::HANDSHAKE_TIMEOUT.as_millis() as u64,
            response_timeout_ms: timing::RESPONSE_TIMEOUT.as_millis() as u64,
            rescan_delay_ms: timing::RESCAN_DELAY.as_millis() as u64,
            chunk_gap_ms: timing::CHUNK_GAP.as_millis() as u64,
            wifi: None,
        }
    }
}

impl ScannerConfig {
    pub fn with_prefixes<I, S>(mut self, prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.name_prefixes = prefixes.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_wifi(mut self, wifi: WifiConfig) -> Self {
        self.wifi = Some(wifi);
        self
    }

    pub fn with_timeouts(mut self, connect_secs: u64, response_ms: u64) -> Self {
        self.connect_timeout_secs = connect_secs;
        self.response_timeout_ms = response_ms;
        self
    }

    pub fn scan_duration(&self) -> Duration {
        Duration::from_millis(self.scan_duration_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn rescan_delay(&self) -> Duration {
        Duration::from_millis(self.rescan_delay_ms)
    }

    pub fn initiator_timeouts(&self) -> InitiatorTimeouts {
        InitiatorTimeouts {
            handshake: Duration::from_millis(self.handshake_timeout_ms),
            response: Duration::from_millis(self.response_timeout_ms),
            chunk_gap: Duration::from_millis(self.chunk_gap_ms),
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.name_prefixes.is_empty() || self.name_prefixes.iter().any(|p| p.is_empty()) {
            return Err("Name prefixes must be non-empty".to_string());
        }

        if self.scan_duration_ms < 500 {
            return Err("Scan duration must be at least 500 ms".to_string());
        }

        if self.connect_timeout_secs == 0 {
            return Err("Connect timeout must be greater than 0".to_string());
        }

        if self.handshake_timeout_ms == 0 || self.response_timeout_ms == 0 {
            return Err("Response timeouts must be greater than 0".to_string());
        }

        if let Some(wifi) = &self.wifi {
            if wifi.ssid.is_empty() {
                return Err("WiFi SSID must not be empty".to_string());
            }
            // SetCountry carries one leading byte ahead of the country text
            if wifi.country.len() + 1 > MAX_PAYLOAD_LEN {
                return Err("WiFi country too long".to_string());
            }
        }

        Ok(())
    }
}

/// Responder identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmulatorConfig {
    /// Robot name the emulator identifies as in its banner and logs.
    ///
    /// Held to the BLE local name limit so it matches what a real robot
    /// could carry.
    pub device_name: String,

    /// Serial number reported to GetSerial
    pub serial: String,
}

impl Default for EmulatorConfig {
    fn default() -> Self {
        Self {
            device_name: device::DEFAULT_EMULATOR_NAME.to_string(),
            serial: device::DEFAULT_EMULATOR_SERIAL.to_string(),
        }
    }
}

impl EmulatorConfig {
    pub fn with_device_name(mut self, name: impl Into<String>) -> Self {
        self.device_name = name.into();
        self
    }

    pub fn with_serial(mut self, serial: impl Into<String>) -> Self {
        self.serial = serial.into();
        self
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.device_name.is_empty() || self.device_name.len() > device::MAX_DEVICE_NAME_LENGTH {
            return Err(format!(
                "Device name must be 1..={} bytes",
                device::MAX_DEVICE_NAME_LENGTH
            ));
        }

        if self.serial.is_empty() {
            return Err("Serial must not be empty".to_string());
        }

        if self.serial.len() + CHUNK_HEADER_LEN > MAX_PAYLOAD_LEN {
            return Err("Serial does not fit in a single response".to_string());
        }

        Ok(())
    }
}

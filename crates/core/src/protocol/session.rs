//! Per-connection protocol state

use serde::{Deserialize, Serialize};
use std::fmt;

use super::chunks::Reassembler;

/// Shell sequences that flag a password as an injection attempt
pub const INJECTION_MARKERS: [&str; 4] = [";$(", "`;", "&&", "||"];

/// Script the robot firmware invokes with the received credentials
pub const HOSTAPD_RESTART_SCRIPT: &str =
    "/unitree/module/network_manager/upper_bluetooth/hostapd_restart.sh";

/// Radio mode requested by InitWifi
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum WifiMode {
    AccessPoint,
    #[default]
    Station,
    Unknown(u8),
}

impl WifiMode {
    pub fn from_u8(value: u8) -> Self {
        match value {
            0x01 => WifiMode::AccessPoint,
            0x02 => WifiMode::Station,
            other => WifiMode::Unknown(other),
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            WifiMode::AccessPoint => 0x01,
            WifiMode::Station => 0x02,
            WifiMode::Unknown(other) => other,
        }
    }
}

impl fmt::Display for WifiMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WifiMode::AccessPoint => write!(f, "AP (Access Point)"),
            WifiMode::Station => write!(f, "STA (Station)"),
            WifiMode::Unknown(b) => write!(f, "Unknown (0x{:02X})", b),
        }
    }
}

/// Wi-Fi credentials carried by the provisioning instructions
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WifiConfig {
    #[serde(default)]
    pub mode: WifiMode,
    pub ssid: String,
    pub password: String,
    pub country: String,
}

impl WifiConfig {
    pub fn new(ssid: impl Into<String>, password: impl Into<String>, country: impl Into<String>) -> Self {
        Self {
            mode: WifiMode::Station,
            ssid: ssid.into(),
            password: password.into(),
            country: country.into(),
        }
    }

    pub fn with_mode(mut self, mode: WifiMode) -> Self {
        self.mode = mode;
        self
    }

    /// Command line the robot would hand to a root shell
    pub fn simulated_command(&self) -> String {
        format!(
            "sudo sh {} \"{} {}\"",
            HOSTAPD_RESTART_SCRIPT, self.ssid, self.password
        )
    }
}

pub fn contains_injection_marker(value: &str) -> bool {
    INJECTION_MARKERS.iter().any(|marker| value.contains(marker))
}

/// Text between `;$(` and the following `);`, i.e. what a root shell would run
pub fn injected_command(password: &str) -> Option<&str> {
    let start = password.find(";$(")? + 3;
    let len = password[start..].find(");")?;
    if len == 0 {
        return None;
    }
    Some(&password[start..start + len])
}

/// State for exactly one physical connection.
///
/// Created on connect and dropped on disconnect; nothing is carried over.
#[derive(Debug, Clone)]
pub struct Session {
    pub authenticated: bool,
    pub wifi_mode: Option<WifiMode>,
    pub ssid_chunks: Reassembler,
    pub password_chunks: Reassembler,
    pub ssid: String,
    pub password: String,
    pub country: String,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    pub fn new() -> Self {
        Self {
            authenticated: false,
            wifi_mode: None,
            ssid_chunks: Reassembler::arrival_order(),
            password_chunks: Reassembler::arrival_order(),
            ssid: String::new(),
            password: String::new(),
            country: String::new(),
        }
    }

    /// Current credentials as the robot would apply them
    pub fn wifi_config(&self) -> WifiConfig {
        WifiConfig {
            mode: self.wifi_mode.unwrap_or_default(),
            ssid: self.ssid.clone(),
            password: self.password.clone(),
            country: self.country.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_session_is_blank() {
        let session = Session::new();
        assert!(!session.authenticated);
        assert!(session.ssid_chunks.is_idle());
        assert!(session.password_chunks.is_idle());
        assert!(session.ssid.is_empty() && session.password.is_empty() && session.country.is_empty());
    }

    #[test]
    fn test_wifi_mode_bytes() {
        assert_eq!(WifiMode::from_u8(0x01), WifiMode::AccessPoint);
        assert_eq!(WifiMode::from_u8(0x02), WifiMode::Station);
        assert_eq!(WifiMode::from_u8(0x7F), WifiMode::Unknown(0x7F));
        assert_eq!(WifiMode::Unknown(0x7F).as_u8(), 0x7F);
    }

    #[test]
    fn test_injection_markers() {
        assert!(contains_injection_marker("x;$(id);"));
        assert!(contains_injection_marker("pw`;ls"));
        assert!(contains_injection_marker("a && b"));
        assert!(contains_injection_marker("a||b"));
        assert!(!contains_injection_marker("plain-password"));
        assert!(!contains_injection_marker("one & two | three"));
    }

    #[test]
    fn test_injected_command_extraction() {
        assert_eq!(injected_command("pass;$(touch /tmp/pwned);"), Some("touch /tmp/pwned"));
        assert_eq!(injected_command("pass;$();"), None);
        assert_eq!(injected_command("pass;$(unterminated"), None);
        assert_eq!(injected_command("pass && reboot"), None);
    }

    #[test]
    fn test_simulated_command() {
        let config = WifiConfig::new("Net", "Pass", "US");
        assert_eq!(
            config.simulated_command(),
            "sudo sh /unitree/module/network_manager/upper_bluetooth/hostapd_restart.sh \"Net Pass\""
        );
    }
}

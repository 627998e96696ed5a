// ==============================================================================
// crates/core/src/bluetooth/constants.rs
// GATT layout, advertised names and timing of the robot configuration service
// ==============================================================================

//! Bluetooth constants
//!
//! UUIDs of the configuration service, the device name prefixes robots
//! advertise under, and the timing the scanner uses between attempts.

use uuid::Uuid;

/// Robot configuration service and characteristic UUIDs
pub mod service_uuids {
    use super::*;

    /// Primary service exposed by the robot
    pub const ROBOT_SERVICE: Uuid = Uuid::from_u128(0x0000FFE0_0000_1000_8000_00805F9B34FB);

    /// Responses arrive here as notifications
    pub const NOTIFY_CHARACTERISTIC: Uuid = Uuid::from_u128(0x0000FFE1_0000_1000_8000_00805F9B34FB);

    /// Requests are written here
    pub const WRITE_CHARACTERISTIC: Uuid = Uuid::from_u128(0x0000FFE2_0000_1000_8000_00805F9B34FB);
}

/// Timing constants
pub mod timing {
    use std::time::Duration;

    /// Length of one discovery sweep
    pub const DEFAULT_SCAN_DURATION: Duration = Duration::from_secs(5);

    pub const CONNECTION_TIMEOUT: Duration = Duration::from_secs(30);

    /// Bound on each request/response exchange
    pub const RESPONSE_TIMEOUT: Duration = Duration::from_secs(10);

    pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

    /// Pause before the next sweep once an attempt has finished
    pub const RESCAN_DELAY: Duration = Duration::from_secs(2);

    /// Pause between unacknowledged chunk writes
    pub const CHUNK_GAP: Duration = Duration::from_millis(50);
}

/// Advertised device identification
pub mod device {
    /// Name prefixes of the supported robot families
    pub const ROBOT_NAME_PREFIXES: [&str; 5] = ["G1_", "Go2_", "B2_", "H1_", "X1_"];

    /// Robot name the emulator reports in its banner by default
    pub const DEFAULT_EMULATOR_NAME: &str = "Go2_ESP32EMU";

    /// Serial number the emulator reports by default
    pub const DEFAULT_EMULATOR_SERIAL: &str = "ESP32-EMULATOR-v1.0-TESTDEVICE";

    /// Maximum advertised name length
    pub const MAX_DEVICE_NAME_LENGTH: usize = 31;

    /// True when `name` starts with one of `prefixes`
    pub fn matches_prefix<S: AsRef<str>>(name: &str, prefixes: &[S]) -> bool {
        prefixes.iter().any(|prefix| name.starts_with(prefix.as_ref()))
    }
}

/// Helper functions for working with UUIDs
pub mod service_uuid_helpers {
    use super::service_uuids;
    use uuid::Uuid;

    pub fn is_robot_service(uuid: &Uuid) -> bool {
        *uuid == service_uuids::ROBOT_SERVICE
    }

    /// Get characteristic name from UUID
    pub fn characteristic_name(uuid: &Uuid) -> &'static str {
        match *uuid {
            service_uuids::NOTIFY_CHARACTERISTIC => "Notify",
            service_uuids::WRITE_CHARACTERISTIC => "Write",
            _ => "Unknown",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uuid_strings() {
        assert_eq!(
            service_uuids::ROBOT_SERVICE.to_string(),
            "0000ffe0-0000-1000-8000-00805f9b34fb"
        );
        assert_eq!(
            service_uuids::NOTIFY_CHARACTERISTIC.to_string(),
            "0000ffe1-0000-1000-8000-00805f9b34fb"
        );
        assert_eq!(
            service_uuids::WRITE_CHARACTERISTIC.to_string(),
            "0000ffe2-0000-1000-8000-00805f9b34fb"
        );
        assert!(service_uuid_helpers::is_robot_service(&service_uuids::ROBOT_SERVICE));
        assert!(!service_uuid_helpers::is_robot_service(&service_uuids::NOTIFY_CHARACTERISTIC));
        assert_eq!(
            service_uuid_helpers::characteristic_name(&service_uuids::WRITE_CHARACTERISTIC),
            "Write"
        );
        assert_eq!(service_uuid_helpers::characteristic_name(&Uuid::nil()), "Unknown");
    }

    #[test]
    fn test_robot_name_prefixes() {
        let robots = device::ROBOT_NAME_PREFIXES;
        assert!(device::matches_prefix("Go2_123456", &robots));
        assert!(device::matches_prefix("G1_ABC", &robots));
        assert!(device::matches_prefix(device::DEFAULT_EMULATOR_NAME, &robots));
        assert!(!device::matches_prefix("go2_lowercase", &robots));
        assert!(!device::matches_prefix("Headphones", &robots));
        assert!(!device::matches_prefix("Go2", &robots));

        let custom = vec!["Lab_".to_string()];
        assert!(device::matches_prefix("Lab_robot", &custom));
        assert!(!device::matches_prefix("Go2_robot", &custom));
    }
}

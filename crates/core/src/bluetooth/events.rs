//! Bluetooth event types

use crate::registry::{DeviceAddress, DeviceRecord};

/// Events emitted by the [`DeviceScanner`](super::scanner::DeviceScanner)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanEvent {
    /// Scanning state changed
    ScanningStateChanged {
        scanning: bool,
    },
    /// A robot-named peripheral showed up
    DeviceDiscovered {
        address: DeviceAddress,
        name: String,
        rssi: Option<i16>,
    },
    /// Skipped before connecting because the registry already has it
    AlreadyKnown {
        address: DeviceAddress,
    },
    /// Serial read and record stored
    SerialHarvested {
        record: DeviceRecord,
    },
    /// Connect, handshake or exchange failed; the peer may be tried again later
    AttemptFailed {
        address: DeviceAddress,
        error: String,
    },
}


//! QuadLink Core Library
//!
//! Encrypted BLE configuration protocol spoken by legged robots, with both
//! ends implemented: a responder that emulates the robot and an initiator
//! that discovers robots and harvests their serial numbers.

pub mod bluetooth;
pub mod config;
pub mod crypto;
pub mod error;
pub mod protocol;
pub mod registry;
pub mod storage;

// Re-export important types for easier access
pub use bluetooth::{attempt_device, AttemptOutcome, LoopbackLink, PeerLink, ScanEvent};
#[cfg(feature = "bluetooth")]
pub use bluetooth::DeviceScanner;
pub use config::{Config, EmulatorConfig, ScannerConfig};
pub use crypto::FrameCipher;
pub use error::{ChunkError, MalformedPacket, ProtocolError, StoreError};
pub use protocol::{
    Harvest, Initiator, InitiatorTimeouts, Instruction, LinkEvent, PacketCodec, Responder,
    ResponderEvent, Role, SessionEvent, WifiConfig, WifiMode,
};
pub use registry::{DeviceAddress, DeviceRecord, DeviceRegistry};
pub use storage::{FileStore, KeyValueStore, MemoryStore};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

//! Bluetooth Low Energy transport for the robot configuration service

pub mod attempt;
pub mod constants;
pub mod events;
pub mod link;
pub mod loopback;
#[cfg(feature = "bluetooth")]
pub mod scanner;

pub use attempt::{attempt_device, AttemptOutcome};
pub use events::ScanEvent;
pub use link::PeerLink;
#[cfg(feature = "bluetooth")]
pub use link::BlePeerLink;
pub use loopback::LoopbackLink;
#[cfg(feature = "bluetooth")]
pub use scanner::DeviceScanner;

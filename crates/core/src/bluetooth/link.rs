//! Connected-peer transport used by the initiator
//!
//! A [`PeerLink`] is one open connection to a robot with notifications
//! already subscribed. The btleplug implementation lives behind the
//! `bluetooth` feature; tests and the simulator use the in-memory loopback.

use crate::error::Result;

/// Write/notify pair of an open connection
#[allow(async_fn_in_trait)]
pub trait PeerLink {
    /// Write one encrypted frame to the remote write characteristic
    async fn write(&mut self, frame: &[u8]) -> Result<()>;

    /// Wait for the next notification; `None` once the link is closed
    async fn next_notification(&mut self) -> Option<Vec<u8>>;

    async fn disconnect(&mut self) -> Result<()>;
}

#[cfg(feature = "bluetooth")]
pub use self::ble::BlePeerLink;

#[cfg(feature = "bluetooth")]
mod ble {
    use super::PeerLink;
    use crate::bluetooth::constants::{service_uuid_helpers, service_uuids};
    use crate::error::{ProtocolError, Result};

    use btleplug::api::{CharPropFlags, Characteristic, Peripheral as _, ValueNotification, WriteType};
    use btleplug::platform::Peripheral;
    use futures::stream::Stream;
    use futures::StreamExt;
    use std::pin::Pin;
    use tracing::{debug, warn};

    type NotificationStream = Pin<Box<dyn Stream<Item = ValueNotification> + Send>>;

    /// A connected robot reached through btleplug
    pub struct BlePeerLink {
        peripheral: Peripheral,
        write_characteristic: Characteristic,
        notifications: NotificationStream,
    }

    impl BlePeerLink {
        /// Discover the robot service on an already connected peripheral and
        /// subscribe to its notify characteristic
        pub async fn attach(peripheral: Peripheral) -> Result<Self> {
            peripheral
                .discover_services()
                .await
                .map_err(|e| ProtocolError::Connection(format!("service discovery failed: {}", e)))?;

            let characteristics = peripheral.characteristics();
            let find = |uuid| {
                characteristics
                    .iter()
                    .find(|c| {
                        c.uuid == uuid && service_uuid_helpers::is_robot_service(&c.service_uuid)
                    })
                    .cloned()
            };

            let notify_characteristic = find(service_uuids::NOTIFY_CHARACTERISTIC)
                .ok_or_else(|| ProtocolError::Connection("notify characteristic not found".into()))?;
            let write_characteristic = find(service_uuids::WRITE_CHARACTERISTIC)
                .ok_or_else(|| ProtocolError::Connection("write characteristic not found".into()))?;

            if !notify_characteristic.properties.contains(CharPropFlags::NOTIFY) {
                warn!("Notify characteristic does not advertise NOTIFY; subscribing anyway");
            }

            peripheral
                .subscribe(&notify_characteristic)
                .await
                .map_err(|e| ProtocolError::Connection(format!("subscribe failed: {}", e)))?;

            let notifications = peripheral
                .notifications()
                .await
                .map_err(|e| ProtocolError::Connection(format!("notification stream failed: {}", e)))?;

            Ok(Self {
                peripheral,
                write_characteristic,
                notifications,
            })
        }
    }

    impl PeerLink for BlePeerLink {
        async fn write(&mut self, frame: &[u8]) -> Result<()> {
            self.peripheral
                .write(&self.write_characteristic, frame, WriteType::WithResponse)
                .await
                .map_err(|e| ProtocolError::Connection(format!("write failed: {}", e)))
        }

        async fn next_notification(&mut self) -> Option<Vec<u8>> {
            while let Some(notification) = self.notifications.next().await {
                if notification.uuid == service_uuids::NOTIFY_CHARACTERISTIC {
                    return Some(notification.value);
                }
                debug!(
                    "Ignoring notification from {} characteristic {}",
                    service_uuid_helpers::characteristic_name(&notification.uuid),
                    notification.uuid
                );
            }
            None
        }

        async fn disconnect(&mut self) -> Result<()> {
            self.peripheral
                .disconnect()
                .await
                .map_err(|e| ProtocolError::Connection(format!("disconnect failed: {}", e)))
        }
    }
}

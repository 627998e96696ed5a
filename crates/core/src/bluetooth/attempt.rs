//! One attempt on a discovered robot
//!
//! The registry is consulted before any connection is made. A record is
//! stored only after the whole exchange succeeded, and an opened link is
//! always disconnected, whatever the outcome.

use std::future::Future;
use tracing::{debug, info, warn};

use super::link::PeerLink;
use crate::error::Result;
use crate::protocol::initiator::{Initiator, InitiatorTimeouts};
use crate::protocol::session::WifiConfig;
use crate::registry::{DeviceAddress, DeviceRecord, DeviceRegistry};
use crate::storage::KeyValueStore;

/// What an attempt did with a robot
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// Already registered; no connection was opened
    AlreadyKnown,
    /// Serial read and record stored
    Harvested(DeviceRecord),
}

/// Harvest `address` unless the registry already knows it.
///
/// `connect` is only awaited for unknown addresses and must hand back a link
/// with notifications subscribed. A failed connect leaves its own cleanup to
/// `connect`; from then on the link is disconnected here.
pub async fn attempt_device<S, L, C, F>(
    registry: &mut DeviceRegistry<S>,
    address: &DeviceAddress,
    connect: C,
    timeouts: InitiatorTimeouts,
    wifi: Option<&WifiConfig>,
) -> Result<AttemptOutcome>
where
    S: KeyValueStore,
    L: PeerLink,
    C: FnOnce() -> F,
    F: Future<Output = Result<L>>,
{
    if registry.exists(address)? {
        debug!("{} already registered, skipping", address);
        return Ok(AttemptOutcome::AlreadyKnown);
    }

    let link = connect().await?;
    info!("🔗 Connected to {}", address);

    let mut initiator = Initiator::new(link, timeouts);
    let stored = match initiator.harvest(wifi).await {
        Ok(harvest) => {
            let record = DeviceRecord::from_harvest(address.clone(), &harvest);
            registry
                .insert(&record)
                .map(|_| AttemptOutcome::Harvested(record))
                .map_err(Into::into)
        }
        Err(e) => Err(e),
    };

    if let Err(e) = initiator.disconnect().await {
        warn!("Disconnect from {} failed: {}", address, e);
    }

    stored
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bluetooth::loopback::LoopbackLink;
    use crate::error::ProtocolError;
    use crate::protocol::constants::{Instruction, Role};
    use crate::protocol::packet::PacketCodec;
    use crate::protocol::responder::ResponderEvent;
    use crate::storage::MemoryStore;
    use std::cell::Cell;
    use std::rc::Rc;
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn fast() -> InitiatorTimeouts {
        InitiatorTimeouts {
            handshake: Duration::from_millis(200),
            response: Duration::from_millis(200),
            chunk_gap: Duration::ZERO,
        }
    }

    /// Robot that refuses every handshake and records its disconnect
    struct RefusingLink {
        codec: PacketCodec,
        pending: Option<Vec<u8>>,
        disconnected: Rc<Cell<bool>>,
    }

    impl PeerLink for RefusingLink {
        async fn write(&mut self, _frame: &[u8]) -> Result<()> {
            self.pending = Some(self.codec.encode(Instruction::Handshake, &[0x00])?);
            Ok(())
        }

        async fn next_notification(&mut self) -> Option<Vec<u8>> {
            self.pending.take()
        }

        async fn disconnect(&mut self) -> Result<()> {
            self.disconnected.set(true);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_new_robot_is_stored_then_disconnected() {
        let (tx, mut events) = mpsc::unbounded_channel();
        let mut registry = DeviceRegistry::new(MemoryStore::new());
        let address = DeviceAddress::new("c8:47:8c:00:12:ab");

        let connect = move || async move {
            Ok::<_, ProtocolError>(LoopbackLink::with_events("Go2-SN-42", tx))
        };
        let outcome = attempt_device(&mut registry, &address, connect, fast(), None)
            .await
            .unwrap();

        let record = registry.get(&address).unwrap().unwrap();
        assert_eq!(record.serial, "Go2-SN-42");
        assert_eq!(outcome, AttemptOutcome::Harvested(record));

        let mut last = None;
        while let Ok(event) = events.try_recv() {
            last = Some(event);
        }
        assert_eq!(last, Some(ResponderEvent::Disconnected { reason: 0 }));
    }

    #[tokio::test]
    async fn test_known_address_never_connects() {
        let mut registry = DeviceRegistry::new(MemoryStore::new());
        let address = DeviceAddress::new("AA:BB:CC:00:00:01");
        registry
            .insert(&DeviceRecord::new(address.clone(), "FIRST"))
            .unwrap();

        let connected = Cell::new(false);
        let flag = &connected;
        let outcome = attempt_device(
            &mut registry,
            &DeviceAddress::new("aa-bb-cc-00-00-01"),
            move || async move {
                flag.set(true);
                Ok::<_, ProtocolError>(LoopbackLink::new("SECOND"))
            },
            fast(),
            None,
        )
        .await
        .unwrap();

        assert_eq!(outcome, AttemptOutcome::AlreadyKnown);
        assert!(!connected.get());
        assert_eq!(registry.get(&address).unwrap().unwrap().serial, "FIRST");
    }

    #[tokio::test]
    async fn test_rejected_handshake_still_disconnects() {
        let mut registry = DeviceRegistry::new(MemoryStore::new());
        let address = DeviceAddress::new("AA:BB:CC:00:00:02");
        let disconnected = Rc::new(Cell::new(false));

        let link = RefusingLink {
            codec: PacketCodec::new(Role::Responder),
            pending: None,
            disconnected: Rc::clone(&disconnected),
        };
        let connect = move || async move { Ok::<_, ProtocolError>(link) };
        let err = attempt_device(&mut registry, &address, connect, fast(), None)
            .await
            .unwrap_err();

        assert!(matches!(err, ProtocolError::Rejected(Instruction::Handshake)));
        assert!(disconnected.get());
        assert!(!registry.exists(&address).unwrap());
    }

    #[tokio::test]
    async fn test_failed_connect_stores_nothing() {
        let mut registry = DeviceRegistry::new(MemoryStore::new());
        let address = DeviceAddress::new("AA:BB:CC:00:00:03");

        let err = attempt_device(
            &mut registry,
            &address,
            || async { Err::<LoopbackLink, _>(ProtocolError::Connection("out of range".into())) },
            fast(),
            None,
        )
        .await
        .unwrap_err();

        assert!(matches!(err, ProtocolError::Connection(_)));
        assert_eq!(registry.count().unwrap(), 0);
    }
}

//! Robot-side adapter: decrypt inbound writes, dispatch, encrypt and notify
//!
//! Runs synchronously inside the transport's callbacks and never blocks.
//! At most one connection is served; its [`Session`] is created on connect
//! and dropped on disconnect.

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::constants::Role;
use super::handler::{InstructionHandler, SessionEvent};
use super::packet::PacketCodec;
use super::session::Session;
use crate::error::{ProtocolError, Result};

/// Transport callbacks delivered to the responder
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    Connected,
    Disconnected { reason: i32 },
    /// Raw bytes written to the write characteristic
    Write(Vec<u8>),
}

/// Push channel to the subscribed peer (the notify characteristic)
pub trait Notifier {
    fn notify(&mut self, frame: &[u8]) -> Result<()>;
}

impl Notifier for Vec<Vec<u8>> {
    fn notify(&mut self, frame: &[u8]) -> Result<()> {
        self.push(frame.to_vec());
        Ok(())
    }
}

impl Notifier for mpsc::UnboundedSender<Vec<u8>> {
    fn notify(&mut self, frame: &[u8]) -> Result<()> {
        self.send(frame.to_vec())
            .map_err(|_| ProtocolError::Connection("notify channel closed".to_string()))
    }
}

/// Events surfaced to whoever hosts the responder
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponderEvent {
    Connected,
    Disconnected { reason: i32 },
    PacketDropped { reason: String },
    Session(SessionEvent),
}

/// Robot emulator bound to one notifier
pub struct Responder<N: Notifier> {
    codec: PacketCodec,
    handler: InstructionHandler,
    notifier: N,
    session: Option<Session>,
    event_sender: Option<mpsc::UnboundedSender<ResponderEvent>>,
}

impl<N: Notifier> Responder<N> {
    pub fn new(serial: impl Into<String>, notifier: N) -> Self {
        Self {
            codec: PacketCodec::new(Role::Responder),
            handler: InstructionHandler::new(serial),
            notifier,
            session: None,
            event_sender: None,
        }
    }

    /// Forward protocol events to `sender`
    pub fn with_events(mut self, sender: mpsc::UnboundedSender<ResponderEvent>) -> Self {
        self.event_sender = Some(sender);
        self
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn notifier(&self) -> &N {
        &self.notifier
    }

    pub fn notifier_mut(&mut self) -> &mut N {
        &mut self.notifier
    }

    pub fn is_connected(&self) -> bool {
        self.session.is_some()
    }

    /// Single entry point for transport callbacks
    pub fn handle_event(&mut self, event: LinkEvent) {
        match event {
            LinkEvent::Connected => self.on_connect(),
            LinkEvent::Disconnected { reason } => self.on_disconnect(reason),
            LinkEvent::Write(data) => {
                self.on_write(&data);
            }
        }
    }

    pub fn on_connect(&mut self) {
        info!("🤝 Client connected");
        self.session = Some(Session::new());
        self.emit(ResponderEvent::Connected);
    }

    pub fn on_disconnect(&mut self, reason: i32) {
        info!("❌ Client disconnected (reason {})", reason);
        self.session = None;
        self.emit(ResponderEvent::Disconnected { reason });
    }

    /// Handle one write. Returns true when a response was notified.
    pub fn on_write(&mut self, data: &[u8]) -> bool {
        if data.is_empty() {
            debug!("Ignoring empty write");
            return false;
        }

        let packet = match self.codec.decode(data) {
            Ok(packet) => packet,
            Err(e) => {
                warn!("Dropping packet: {}", e);
                self.emit(ResponderEvent::PacketDropped {
                    reason: e.to_string(),
                });
                return false;
            }
        };
        debug!("✅ Valid packet - instruction {:?}", packet.instruction);

        let session = self.session.get_or_insert_with(|| {
            debug!("Write without prior connect event; starting a session");
            Session::new()
        });
        let outcome = self.handler.dispatch(session, &packet);

        for event in outcome.events {
            self.emit(ResponderEvent::Session(event));
        }

        let Some(reply) = outcome.reply else {
            debug!("Intermediate chunk - no response sent");
            return false;
        };

        match self
            .codec
            .encode(reply.instruction, &reply.payload)
            .and_then(|frame| self.notifier.notify(&frame))
        {
            Ok(()) => {
                debug!("Response to {:?} sent", reply.instruction);
                true
            }
            Err(e) => {
                error!("Failed to send response to {:?}: {}", reply.instruction, e);
                false
            }
        }
    }

    fn emit(&self, event: ResponderEvent) {
        if let Some(sender) = &self.event_sender {
            // Receiver dropped is fine during shutdown
            let _ = sender.send(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::constants::Instruction;
    use crate::protocol::handler::Reply;

    fn responder() -> Responder<Vec<Vec<u8>>> {
        Responder::new("UNIT-TEST-SERIAL", Vec::new())
    }

    fn request(instruction: Instruction, payload: &[u8]) -> Vec<u8> {
        PacketCodec::new(Role::Initiator)
            .encode(instruction, payload)
            .unwrap()
    }

    fn replies(responder: &Responder<Vec<Vec<u8>>>) -> Vec<(Instruction, Vec<u8>)> {
        let codec = PacketCodec::new(Role::Initiator);
        responder
            .notifier()
            .iter()
            .map(|frame| {
                let packet = codec.decode(frame).unwrap();
                (packet.instruction, packet.payload)
            })
            .collect()
    }

    #[test]
    fn test_handshake_over_the_wire() {
        let mut responder = responder();
        responder.handle_event(LinkEvent::Connected);
        responder.handle_event(LinkEvent::Write(request(
            Instruction::Handshake,
            b"\x00\x00unitree",
        )));

        assert!(responder.session().unwrap().authenticated);
        assert_eq!(replies(&responder), vec![(Instruction::Handshake, vec![0x01])]);
    }

    #[test]
    fn test_malformed_writes_get_no_response() {
        let mut responder = responder();
        responder.on_connect();

        // Response opcode at a responder
        let wrong_opcode = PacketCodec::new(Role::Responder)
            .encode(Instruction::Handshake, b"\x00\x00unitree")
            .unwrap();
        assert!(!responder.on_write(&wrong_opcode));

        // Corrupted ciphertext breaks the checksum
        let mut corrupted = request(Instruction::InitWifi, &[0x02]);
        corrupted[4] ^= 0x01;
        assert!(!responder.on_write(&corrupted));

        assert!(!responder.on_write(&[0x00, 0x01]));
        assert!(!responder.on_write(&[]));
        assert!(responder.notifier().is_empty());
    }

    #[test]
    fn test_ssid_chunks_answered_once() {
        let mut responder = responder();
        responder.on_connect();

        for (i, data) in [b"Ho".as_slice(), b"me", b"Net"].iter().enumerate() {
            let mut payload = vec![i as u8 + 1, 3];
            payload.extend_from_slice(data);
            responder.on_write(&request(Instruction::SetSsid, &payload));
        }

        assert_eq!(replies(&responder), vec![(Instruction::SetSsid, vec![0x01])]);
        assert_eq!(responder.session().unwrap().ssid, "HomeNet");
    }

    #[test]
    fn test_disconnect_discards_session() {
        let mut responder = responder();
        responder.on_connect();
        responder.on_write(&request(Instruction::Handshake, b"\x00\x00unitree"));
        responder.on_write(&request(Instruction::SetSsid, &[1, 2, b'h', b'a']));
        assert!(responder.session().unwrap().authenticated);

        responder.handle_event(LinkEvent::Disconnected { reason: 19 });
        assert!(responder.session().is_none());

        responder.on_connect();
        let session = responder.session().unwrap();
        assert!(!session.authenticated);
        assert!(session.ssid_chunks.is_idle());

        responder.on_write(&request(Instruction::GetSerial, &[0x00]));
        let last = replies(&responder).pop().unwrap();
        assert_eq!(last, (Instruction::GetSerial, Reply::failure(Instruction::GetSerial).payload));
    }

    #[test]
    fn test_events_are_forwarded() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut responder = responder().with_events(tx);

        responder.on_connect();
        responder.on_write(&request(Instruction::Handshake, b"\x00\x00nope"));
        responder.on_disconnect(0);

        assert_eq!(rx.try_recv().unwrap(), ResponderEvent::Connected);
        assert_eq!(
            rx.try_recv().unwrap(),
            ResponderEvent::Session(SessionEvent::Authenticated { success: false })
        );
        assert_eq!(rx.try_recv().unwrap(), ResponderEvent::Disconnected { reason: 0 });
    }
}

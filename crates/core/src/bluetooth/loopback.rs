//! In-process link: an initiator talking straight to an emulated robot
//!
//! Writes are handed to a [`Responder`] synchronously and its notifications
//! come back through an unbounded channel, so the full encrypted exchange
//! runs without a radio.

use tokio::sync::mpsc;
use tracing::debug;

use super::link::PeerLink;
use crate::error::{ProtocolError, Result};
use crate::protocol::responder::{LinkEvent, Responder, ResponderEvent};

/// Connection to an emulated robot living in this process
pub struct LoopbackLink {
    responder: Responder<mpsc::UnboundedSender<Vec<u8>>>,
    notifications: mpsc::UnboundedReceiver<Vec<u8>>,
    connected: bool,
}

impl LoopbackLink {
    /// Connect to a fresh emulated robot reporting `serial`
    pub fn new(serial: impl Into<String>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self::connect(Responder::new(serial, tx), rx)
    }

    /// Like [`LoopbackLink::new`], forwarding the robot's events to `events`
    pub fn with_events(
        serial: impl Into<String>,
        events: mpsc::UnboundedSender<ResponderEvent>,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self::connect(Responder::new(serial, tx).with_events(events), rx)
    }

    fn connect(
        mut responder: Responder<mpsc::UnboundedSender<Vec<u8>>>,
        notifications: mpsc::UnboundedReceiver<Vec<u8>>,
    ) -> Self {
        responder.handle_event(LinkEvent::Connected);
        Self {
            responder,
            notifications,
            connected: true,
        }
    }

    /// The emulated robot on the other end
    pub fn responder(&self) -> &Responder<mpsc::UnboundedSender<Vec<u8>>> {
        &self.responder
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }
}

impl PeerLink for LoopbackLink {
    async fn write(&mut self, frame: &[u8]) -> Result<()> {
        if !self.connected {
            return Err(ProtocolError::Connection("loopback link is closed".to_string()));
        }
        self.responder.handle_event(LinkEvent::Write(frame.to_vec()));
        Ok(())
    }

    async fn next_notification(&mut self) -> Option<Vec<u8>> {
        if !self.connected {
            return None;
        }
        // The responder holds the sender, so this only waits; callers bound it
        self.notifications.recv().await
    }

    async fn disconnect(&mut self) -> Result<()> {
        if self.connected {
            debug!("Closing loopback link");
            self.connected = false;
            self.responder.handle_event(LinkEvent::Disconnected { reason: 0 });
        }
        Ok(())
    }
}

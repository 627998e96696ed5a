//! Scanner-side adapter: encrypt requests, await notifications, interpret
//!
//! Every request/response pair is bounded by a deadline. When it passes,
//! the attempt is abandoned with [`ProtocolError::ResponseTimeout`] and the
//! caller tears the connection down. Nothing here retries.

use std::time::Duration;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, warn};

use super::chunks::{split_default, Reassembler};
use super::constants::{status, Instruction, Role, HANDSHAKE_PASSPHRASE, HANDSHAKE_RESERVED_LEN};
use super::packet::{Packet, PacketCodec};
use super::session::WifiConfig;
use crate::bluetooth::link::PeerLink;
use crate::error::{ProtocolError, Result};

/// Bounds on each wait the initiator performs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InitiatorTimeouts {
    pub handshake: Duration,
    /// Whole serial fetch, or one acknowledged provisioning step
    pub response: Duration,
    /// Pause between unacknowledged chunk writes
    pub chunk_gap: Duration,
}

impl Default for InitiatorTimeouts {
    fn default() -> Self {
        Self {
            handshake: Duration::from_secs(5),
            response: Duration::from_secs(10),
            chunk_gap: Duration::from_millis(50),
        }
    }
}

/// Fields collected from one robot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Harvest {
    pub serial: String,
    /// Credentials the robot acknowledged, when provisioning was requested
    pub wifi: Option<WifiConfig>,
}

/// Drives one connected robot through the instruction sequence
pub struct Initiator<L: PeerLink> {
    link: L,
    codec: PacketCodec,
    timeouts: InitiatorTimeouts,
    serial_chunks: Reassembler,
}

impl<L: PeerLink> Initiator<L> {
    pub fn new(link: L, timeouts: InitiatorTimeouts) -> Self {
        Self {
            link,
            codec: PacketCodec::new(Role::Initiator),
            timeouts,
            serial_chunks: Reassembler::indexed(),
        }
    }

    pub fn link(&self) -> &L {
        &self.link
    }

    pub fn into_link(self) -> L {
        self.link
    }

    pub async fn disconnect(mut self) -> Result<()> {
        self.link.disconnect().await
    }

    /// Handshake, fetch the serial and optionally push Wi-Fi credentials
    pub async fn harvest(&mut self, wifi: Option<&WifiConfig>) -> Result<Harvest> {
        self.handshake().await?;
        let serial = self.fetch_serial().await?;

        let wifi = match wifi {
            Some(config) => {
                self.provision_wifi(config).await?;
                Some(config.clone())
            }
            None => None,
        };

        Ok(Harvest { serial, wifi })
    }

    pub async fn handshake(&mut self) -> Result<()> {
        let mut payload = vec![0x00; HANDSHAKE_RESERVED_LEN];
        payload.extend_from_slice(HANDSHAKE_PASSPHRASE);

        let response = self
            .transact(Instruction::Handshake, &payload, self.timeouts.handshake)
            .await?;
        expect_success(&response)?;

        info!("✅ Handshake accepted");
        Ok(())
    }

    /// Request the serial number and reassemble its chunks by index
    pub async fn fetch_serial(&mut self) -> Result<String> {
        let timeout = self.timeouts.response;
        let deadline = Instant::now() + timeout;

        self.serial_chunks.reset();
        self.send(Instruction::GetSerial, &[0x00]).await?;

        loop {
            let response = self
                .await_response(Instruction::GetSerial, deadline, timeout)
                .await?;

            if response.status() == Some(status::FAILURE) {
                warn!("Serial request refused (not authenticated)");
                return Err(ProtocolError::Rejected(Instruction::GetSerial));
            }

            match self.serial_chunks.push(&response.payload) {
                Ok(Some(bytes)) => {
                    let serial = String::from_utf8_lossy(&bytes).into_owned();
                    info!("📟 Serial: {}", serial);
                    return Ok(serial);
                }
                Ok(None) => debug!(
                    "Serial chunk {}/{}",
                    self.serial_chunks.received(),
                    self.serial_chunks.expected()
                ),
                Err(e) => debug!("Ignoring unusable serial chunk: {}", e),
            }
        }
    }

    /// InitWifi, SSID, password, then the country trigger
    pub async fn provision_wifi(&mut self, config: &WifiConfig) -> Result<()> {
        let response = self
            .transact(Instruction::InitWifi, &[config.mode.as_u8()], self.timeouts.response)
            .await?;
        expect_success(&response)?;

        self.send_chunked(Instruction::SetSsid, config.ssid.as_bytes()).await?;
        self.send_chunked(Instruction::SetPassword, config.password.as_bytes())
            .await?;

        let mut payload = vec![0x01];
        payload.extend_from_slice(config.country.as_bytes());
        let response = self
            .transact(Instruction::SetCountry, &payload, self.timeouts.response)
            .await?;
        expect_success(&response)?;

        info!(
            "📶 Robot accepted WiFi configuration (ssid='{}', country='{}')",
            config.ssid, config.country
        );
        Ok(())
    }

    /// Only the final chunk is acknowledged; earlier ones are written blind
    async fn send_chunked(&mut self, instruction: Instruction, data: &[u8]) -> Result<()> {
        let mut chunks = split_default(data)?;
        let last = chunks.pop().unwrap_or_else(|| vec![0x01, 0x01]);

        for chunk in &chunks {
            self.send(instruction, chunk).await?;
            if !self.timeouts.chunk_gap.is_zero() {
                tokio::time::sleep(self.timeouts.chunk_gap).await;
            }
        }

        let response = self
            .transact(instruction, &last, self.timeouts.response)
            .await?;
        expect_success(&response)
    }

    async fn transact(
        &mut self,
        instruction: Instruction,
        payload: &[u8],
        timeout: Duration,
    ) -> Result<Packet> {
        let deadline = Instant::now() + timeout;
        self.send(instruction, payload).await?;
        self.await_response(instruction, deadline, timeout).await
    }

    async fn send(&mut self, instruction: Instruction, payload: &[u8]) -> Result<()> {
        let frame = self.codec.encode(instruction, payload)?;
        debug!("➡️ {:?} [{} bytes]", instruction, frame.len());
        self.link.write(&frame).await
    }

    /// Wait until a valid response for `instruction` decodes or `deadline` passes.
    ///
    /// Undecodable frames and responses to other instructions are skipped.
    async fn await_response(
        &mut self,
        instruction: Instruction,
        deadline: Instant,
        timeout: Duration,
    ) -> Result<Packet> {
        loop {
            let raw = match timeout_at(deadline, self.link.next_notification()).await {
                Ok(Some(raw)) => raw,
                Ok(None) => {
                    return Err(ProtocolError::Connection(
                        "link closed while awaiting response".to_string(),
                    ))
                }
                Err(_) => {
                    warn!("⏱️ No {:?} response within {:?}", instruction, timeout);
                    return Err(ProtocolError::ResponseTimeout {
                        instruction,
                        timeout,
                    });
                }
            };

            match self.codec.decode(&raw) {
                Ok(packet) if packet.instruction == instruction => return Ok(packet),
                Ok(packet) => debug!(
                    "Skipping stale {:?} response while awaiting {:?}",
                    packet.instruction, instruction
                ),
                Err(e) if e.is_drop() => debug!("Dropping notification: {}", e),
                Err(e) => return Err(e),
            }
        }
    }
}

fn expect_success(response: &Packet) -> Result<()> {
    if response.status() == Some(status::SUCCESS) {
        Ok(())
    } else {
        Err(ProtocolError::Rejected(response.instruction))
    }
}

//! Packet codec
//!
//! Plaintext layout:
//! - byte 0: opcode (0x52 request, 0x51 response)
//! - byte 1: declared total length (informational only)
//! - byte 2: instruction
//! - bytes 3..N-1: payload
//! - byte N-1: checksum, chosen so the byte sum of the frame is 0 mod 256
//!
//! Frames travel encrypted with [`FrameCipher`].

use bytes::{BufMut, BytesMut};
use tracing::{debug, warn};

use super::constants::{
    Instruction, Opcode, Role, FRAME_OVERHEAD, MAX_PACKET_LEN, MAX_PAYLOAD_LEN, MIN_PACKET_LEN,
};
use crate::crypto::FrameCipher;
use crate::error::{MalformedPacket, ProtocolError, Result};

/// A decoded, checksum-valid frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub opcode: Opcode,
    /// Length as declared by the sender, which may disagree with reality
    pub declared_len: u8,
    pub instruction: Instruction,
    pub payload: Vec<u8>,
    pub checksum: u8,
}

impl Packet {
    /// Build a plaintext packet with a correct length and checksum
    pub fn new(opcode: Opcode, instruction: Instruction, payload: Vec<u8>) -> Result<Self> {
        if payload.len() > MAX_PAYLOAD_LEN {
            return Err(ProtocolError::PayloadTooLarge(payload.len()));
        }

        let declared_len = (payload.len() + FRAME_OVERHEAD) as u8;
        let header_sum = byte_sum(&[opcode as u8, declared_len, instruction as u8]);
        let checksum = header_sum.wrapping_add(byte_sum(&payload)).wrapping_neg();

        Ok(Self {
            opcode,
            declared_len,
            instruction,
            payload,
            checksum,
        })
    }

    /// Total number of bytes on the wire
    pub fn wire_len(&self) -> usize {
        self.payload.len() + FRAME_OVERHEAD
    }

    /// Serialize to plaintext bytes
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(self.wire_len());
        buf.put_u8(self.opcode as u8);
        buf.put_u8(self.declared_len);
        buf.put_u8(self.instruction as u8);
        buf.put_slice(&self.payload);
        buf.put_u8(self.checksum);
        buf.to_vec()
    }

    /// Parse and validate a plaintext frame.
    ///
    /// A declared length that disagrees with the frame size is only logged.
    pub fn parse(plain: &[u8], expected: Opcode) -> Result<Self, MalformedPacket> {
        if plain.len() < MIN_PACKET_LEN {
            return Err(MalformedPacket::TooShort(plain.len()));
        }
        if plain.len() > MAX_PACKET_LEN {
            return Err(MalformedPacket::TooLong(plain.len()));
        }

        let opcode = plain[0];
        if opcode != expected as u8 {
            return Err(MalformedPacket::UnexpectedOpcode {
                expected,
                found: opcode,
            });
        }

        let declared_len = plain[1];
        if declared_len as usize != plain.len() {
            warn!(
                "Length mismatch (header={}, actual={})",
                declared_len,
                plain.len()
            );
        }

        let sum = byte_sum(plain);
        if sum != 0 {
            return Err(MalformedPacket::ChecksumMismatch(sum));
        }

        let instruction = Instruction::try_from_u8(plain[2])?;
        let last = plain.len() - 1;

        Ok(Self {
            opcode: expected,
            declared_len,
            instruction,
            payload: plain[3..last].to_vec(),
            checksum: plain[last],
        })
    }

    /// Status byte of a single-byte response payload
    pub fn status(&self) -> Option<u8> {
        match self.payload.as_slice() {
            [code] => Some(*code),
            _ => None,
        }
    }
}

/// Sum of all bytes modulo 256
pub fn byte_sum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, b| acc.wrapping_add(*b))
}

/// Encrypting codec bound to one side of the conversation
#[derive(Debug, Clone, Copy)]
pub struct PacketCodec {
    role: Role,
    cipher: FrameCipher,
}

impl PacketCodec {
    pub fn new(role: Role) -> Self {
        Self {
            role,
            cipher: FrameCipher::new(),
        }
    }

    /// Build, checksum and encrypt an outbound frame
    pub fn encode(&self, instruction: Instruction, payload: &[u8]) -> Result<Vec<u8>> {
        let packet = Packet::new(self.role.outbound_opcode(), instruction, payload.to_vec())?;
        let plain = packet.to_bytes();
        debug!("Plain frame out [{} bytes]: {}", plain.len(), hex::encode(&plain));
        self.cipher.encrypt(&plain)
    }

    /// Decrypt and validate an inbound frame
    pub fn decode(&self, raw: &[u8]) -> Result<Packet> {
        debug!("Encrypted frame in [{} bytes]: {}", raw.len(), hex::encode(raw));
        let plain = self.cipher.decrypt(raw)?;
        debug!("Decrypted frame [{} bytes]: {}", plain.len(), hex::encode(&plain));

        Ok(Packet::parse(&plain, self.role.inbound_opcode())?)
    }
}

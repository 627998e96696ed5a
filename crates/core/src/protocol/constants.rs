//! Wire constants for the robot configuration protocol
//!
//! Values are fixed by the robot firmware; none of them are negotiated.

use serde::{Deserialize, Serialize};

use crate::error::MalformedPacket;

/// Smallest valid frame: opcode + length + instruction + checksum
pub const MIN_PACKET_LEN: usize = 4;

/// The length field is a single byte, so no frame can honestly exceed this
pub const MAX_PACKET_LEN: usize = u8::MAX as usize;

/// Frame bytes that are not payload
pub const FRAME_OVERHEAD: usize = MIN_PACKET_LEN;

/// Largest payload the encoder will accept
pub const MAX_PAYLOAD_LEN: usize = MAX_PACKET_LEN - FRAME_OVERHEAD;

/// Chunked payloads carry `[chunk_index, total_chunks]` before their data
pub const CHUNK_HEADER_LEN: usize = 2;

/// Upper bound on `total_chunks`; peers declaring more are rejected
pub const MAX_CHUNKS: usize = 64;

/// Data bytes per outbound chunk when the initiator splits SSID/password
pub const CHUNK_DATA_LEN: usize = 14;

/// Literal passphrase expected by the handshake
pub const HANDSHAKE_PASSPHRASE: &[u8] = b"unitree";

/// Reserved bytes preceding the passphrase in a handshake payload
pub const HANDSHAKE_RESERVED_LEN: usize = 2;

/// Single-byte status codes carried in response payloads
pub mod status {
    pub const SUCCESS: u8 = 0x01;
    pub const FAILURE: u8 = 0x00;
}

/// First packet byte: who sent the frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Opcode {
    Request = 0x52,
    Response = 0x51,
}

/// Instruction byte selecting the handler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Instruction {
    Handshake = 0x01,
    GetSerial = 0x02,
    InitWifi = 0x03,
    SetSsid = 0x04,
    SetPassword = 0x05,
    SetCountry = 0x06,
}

impl Instruction {
    pub fn try_from_u8(value: u8) -> Result<Self, MalformedPacket> {
        match value {
            0x01 => Ok(Instruction::Handshake),
            0x02 => Ok(Instruction::GetSerial),
            0x03 => Ok(Instruction::InitWifi),
            0x04 => Ok(Instruction::SetSsid),
            0x05 => Ok(Instruction::SetPassword),
            0x06 => Ok(Instruction::SetCountry),
            other => Err(MalformedPacket::UnknownInstruction(other)),
        }
    }
}

/// Role a codec speaks for; decides which opcode is sent and which is accepted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Emulates the robot: accepts requests, sends responses
    Responder,
    /// Queries robots: sends requests, accepts responses
    Initiator,
}

impl Role {
    pub fn outbound_opcode(self) -> Opcode {
        match self {
            Role::Responder => Opcode::Response,
            Role::Initiator => Opcode::Request,
        }
    }

    pub fn inbound_opcode(self) -> Opcode {
        match self {
            Role::Responder => Opcode::Request,
            Role::Initiator => Opcode::Response,
        }
    }
}

//! Error taxonomy for the configuration protocol

use std::time::Duration;
use thiserror::Error;

use crate::protocol::constants::{Instruction, Opcode};

/// Reasons a decrypted frame is dropped before dispatch
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MalformedPacket {
    #[error("frame too short: {0} bytes")]
    TooShort(usize),

    #[error("frame too long: {0} bytes")]
    TooLong(usize),

    #[error("unexpected opcode 0x{found:02X} (expected {expected:?})")]
    UnexpectedOpcode { expected: Opcode, found: u8 },

    #[error("checksum mismatch (byte sum 0x{0:02X})")]
    ChecksumMismatch(u8),

    #[error("unknown instruction 0x{0:02X}")]
    UnknownInstruction(u8),
}

/// Chunk header problems found while feeding a reassembler
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChunkError {
    #[error("chunk payload shorter than its 2-byte header")]
    MissingHeader,

    #[error("declared chunk total {0} outside 1..={max}", max = crate::protocol::constants::MAX_CHUNKS)]
    InvalidTotal(u8),
}

/// Backing store failures
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("store file is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("corrupt record under key {0}")]
    CorruptRecord(String),
}

/// Errors surfaced by the protocol core
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Cipher primitive failure; fatal to the current packet only
    #[error("framing failure: {0}")]
    Framing(String),

    #[error("malformed packet: {0}")]
    Malformed(#[from] MalformedPacket),

    #[error("{instruction:?} precondition failed: {reason}")]
    Precondition {
        instruction: Instruction,
        reason: &'static str,
    },

    /// The peer answered with a failure-coded response
    #[error("peer rejected {0:?}")]
    Rejected(Instruction),

    #[error("no response to {instruction:?} within {timeout:?}")]
    ResponseTimeout {
        instruction: Instruction,
        timeout: Duration,
    },

    #[error("connection failure: {0}")]
    Connection(String),

    #[error("payload of {0} bytes does not fit in one packet")]
    PayloadTooLarge(usize),

    #[error("chunk error: {0}")]
    Chunk(#[from] ChunkError),

    #[error("storage error: {0}")]
    Storage(#[from] StoreError),
}

impl ProtocolError {
    /// Errors that mean the current packet should be dropped without a reply
    pub fn is_drop(&self) -> bool {
        matches!(self, ProtocolError::Framing(_) | ProtocolError::Malformed(_))
    }
}

pub type Result<T, E = ProtocolError> = std::result::Result<T, E>;

//! Per-packet AES-128/CFB128 framing
//!
//! Every frame is transformed independently: the feedback register is
//! re-seeded from the fixed IV on each call, so all frames share the same
//! initial keystream. The robot firmware does exactly this and any other
//! scheme desynchronizes against it.

use aes::Aes128;
use cfb_mode::cipher::{AsyncStreamCipher, KeyIvInit};
use tracing::error;

use crate::error::{ProtocolError, Result};

type Aes128CfbEnc = cfb_mode::Encryptor<Aes128>;
type Aes128CfbDec = cfb_mode::Decryptor<Aes128>;

/// AES-128 key hardcoded in the robot firmware
pub const FRAME_KEY: [u8; 16] = [
    0xdf, 0x98, 0xb7, 0x15, 0xd5, 0xc6, 0xed, 0x2b,
    0x25, 0x81, 0x7b, 0x6f, 0x25, 0x54, 0x12, 0x4a,
];

/// CFB128 initialization vector hardcoded in the robot firmware
pub const FRAME_IV: [u8; 16] = [
    0x28, 0x41, 0xae, 0x97, 0x41, 0x9c, 0x29, 0x73,
    0x29, 0x6a, 0x0d, 0x4b, 0xdf, 0xe1, 0x9a, 0x4f,
];

/// Which way bytes flow through the cipher
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Encrypt,
    Decrypt,
}

/// Stateless framing engine over the fixed key/IV pair
#[derive(Debug, Clone, Copy)]
pub struct FrameCipher {
    key: [u8; 16],
    iv: [u8; 16],
}

impl Default for FrameCipher {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameCipher {
    pub const fn new() -> Self {
        Self {
            key: FRAME_KEY,
            iv: FRAME_IV,
        }
    }

    /// Transform `data` in the given direction; output has the same length.
    ///
    /// Both directions only drive the block cipher forward. Decryption
    /// differs in feeding the ciphertext, rather than the output, back into
    /// the register.
    pub fn transform(&self, direction: Direction, data: &[u8]) -> Result<Vec<u8>> {
        let mut buf = data.to_vec();

        match direction {
            Direction::Encrypt => Aes128CfbEnc::new_from_slices(&self.key, &self.iv)
                .map_err(|e| framing_failure(direction, e))?
                .encrypt(&mut buf),
            Direction::Decrypt => Aes128CfbDec::new_from_slices(&self.key, &self.iv)
                .map_err(|e| framing_failure(direction, e))?
                .decrypt(&mut buf),
        }

        Ok(buf)
    }

    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        self.transform(Direction::Encrypt, plaintext)
    }

    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        self.transform(Direction::Decrypt, ciphertext)
    }
}

fn framing_failure(direction: Direction, cause: impl std::fmt::Display) -> ProtocolError {
    error!("CFB128 {:?} setup failed: {}", direction, cause);
    ProtocolError::Framing(format!("{:?}: {}", direction, cause))
}

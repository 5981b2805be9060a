//! Cryptographic layer: passphrase-derived key material and the legacy CBC cipher.
//!
//! # Compatibility warning
//!
//! Everything here reproduces the legacy peers bit for bit, including their
//! weaknesses:
//!
//! - AES-256-CBC runs with a **fixed, public IV** for every connection and
//!   every one-shot block, so identical plaintext prefixes produce identical
//!   ciphertext.
//! - The 32-bit magic number mixes its hash bytes asymmetrically and offers no
//!   real authentication.
//!
//! Neither may be changed without a negotiated protocol version; doing so
//! silently breaks interoperability with every existing peer.

pub mod cipher;
pub mod kdf;

use thiserror::Error;

pub use cipher::{CipherDirection, StreamCipher, BLOCK_SIZE};
pub use kdf::{
    derive_key, derive_magic, derive_session_key, normalize_passphrase, validate_passphrase,
    KDF_ITERATIONS, LEGACY_SEED, MAGIC_HASH_ITERATIONS, MIN_PASSPHRASE_LEN,
};

/// Errors produced by key derivation and the cipher.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CryptoError {
    /// The passphrase has fewer significant characters than the protocol requires.
    #[error("passphrase too short: {len} characters after removing spaces, need {min}")]
    PassphraseTooShort { len: usize, min: usize },

    /// PBKDF2 rejected its parameters.
    #[error("key derivation failed: {0}")]
    KeyDerivation(String),

    /// Ciphertext handed to the decryptor is not a whole number of blocks.
    #[error("invalid cipher input length {0}: must be a multiple of 16")]
    InvalidLength(usize),
}

/// Key material shared by every session of one pairing.
///
/// Immutable once derived; a passphrase change produces a new value and
/// restarts all sessions.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionKey {
    key: [u8; 32],
    magic: u32,
}

impl SessionKey {
    /// Wraps already-derived material.
    pub fn from_parts(key: [u8; 32], magic: u32) -> Self {
        Self { key, magic }
    }

    pub fn key(&self) -> &[u8; 32] {
        &self.key
    }

    /// The 32-bit magic number whose upper half tags every packet.
    pub fn magic(&self) -> u32 {
        self.magic
    }

    /// One-shot encryption starting from the fixed IV. Input is zero-padded.
    pub fn encrypt_block(&self, data: &[u8]) -> Vec<u8> {
        cipher::encrypt_block(&self.key, data)
    }

    /// One-shot decryption starting from the fixed IV.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidLength`] unless `data` is a whole number of blocks.
    pub fn decrypt_block(&self, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        cipher::decrypt_block(&self.key, data)
    }

    /// Creates a persistent CBC context whose chaining state survives across calls.
    pub fn make_stream_cipher(&self, direction: CipherDirection) -> StreamCipher {
        StreamCipher::new(&self.key, direction)
    }
}

impl std::fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionKey")
            .field("key", &"<redacted>")
            .field("magic", &format_args!("0x{:08X}", self.magic))
            .finish()
    }
}

//! AES-256-CBC with the fixed legacy IV.
//!
//! Two shapes are exposed: one-shot helpers that start every call from the
//! IV, and [`StreamCipher`], a persistent context whose chaining block
//! carries over between calls. A connection uses one stream per direction
//! for its whole lifetime.

use aes::cipher::{Block, BlockDecrypt, BlockEncrypt, KeyInit};
use aes::Aes256;

use super::kdf::LEGACY_SEED;
use super::CryptoError;

/// AES block size in bytes.
pub const BLOCK_SIZE: usize = 16;

/// The IV: the first 16 ASCII bytes of the legacy seed.
fn legacy_iv() -> [u8; BLOCK_SIZE] {
    let mut iv = [0u8; BLOCK_SIZE];
    iv.copy_from_slice(&LEGACY_SEED.as_bytes()[..BLOCK_SIZE]);
    iv
}

fn xor_in_place(block: &mut [u8], mask: &[u8; BLOCK_SIZE]) {
    for (b, m) in block.iter_mut().zip(mask.iter()) {
        *b ^= m;
    }
}

/// Which way a [`StreamCipher`] transforms data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CipherDirection {
    Encrypt,
    Decrypt,
}

/// Persistent CBC context for one direction of one connection.
pub struct StreamCipher {
    cipher: Aes256,
    chain: [u8; BLOCK_SIZE],
    direction: CipherDirection,
}

impl StreamCipher {
    /// Creates a context positioned at the legacy IV.
    pub fn new(key: &[u8; 32], direction: CipherDirection) -> Self {
        Self {
            cipher: Aes256::new(key.into()),
            chain: legacy_iv(),
            direction,
        }
    }

    pub fn direction(&self) -> CipherDirection {
        self.direction
    }

    /// Transforms `data` in place, advancing the chaining state.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidLength`] unless `data` is a whole number
    /// of blocks. On error the chaining state is untouched.
    pub fn apply(&mut self, data: &mut [u8]) -> Result<(), CryptoError> {
        if data.len() % BLOCK_SIZE != 0 {
            return Err(CryptoError::InvalidLength(data.len()));
        }
        for chunk in data.chunks_exact_mut(BLOCK_SIZE) {
            match self.direction {
                CipherDirection::Encrypt => self.encrypt_chunk(chunk),
                CipherDirection::Decrypt => self.decrypt_chunk(chunk),
            }
        }
        Ok(())
    }

    /// Copying variant of [`apply`](Self::apply).
    pub fn process(&mut self, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let mut out = data.to_vec();
        self.apply(&mut out)?;
        Ok(out)
    }

    fn encrypt_chunk(&mut self, chunk: &mut [u8]) {
        xor_in_place(chunk, &self.chain);
        let block = Block::<Aes256>::from_mut_slice(chunk);
        self.cipher.encrypt_block(block);
        self.chain.copy_from_slice(chunk);
    }

    fn decrypt_chunk(&mut self, chunk: &mut [u8]) {
        let mut next_chain = [0u8; BLOCK_SIZE];
        next_chain.copy_from_slice(chunk);
        let block = Block::<Aes256>::from_mut_slice(chunk);
        self.cipher.decrypt_block(block);
        xor_in_place(chunk, &self.chain);
        self.chain = next_chain;
    }
}

impl std::fmt::Debug for StreamCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamCipher")
            .field("direction", &self.direction)
            .finish_non_exhaustive()
    }
}

/// Encrypts `data` from a fresh IV, zero-padding to the block size.
pub(crate) fn encrypt_block(key: &[u8; 32], data: &[u8]) -> Vec<u8> {
    let padded_len = data.len().div_ceil(BLOCK_SIZE) * BLOCK_SIZE;
    let mut out = vec![0u8; padded_len];
    out[..data.len()].copy_from_slice(data);

    let mut stream = StreamCipher::new(key, CipherDirection::Encrypt);
    for chunk in out.chunks_exact_mut(BLOCK_SIZE) {
        stream.encrypt_chunk(chunk);
    }
    out
}

/// Decrypts `data` from a fresh IV. Padding, if any, is left in place.
pub(crate) fn decrypt_block(key: &[u8; 32], data: &[u8]) -> Result<Vec<u8>, CryptoError> {
    StreamCipher::new(key, CipherDirection::Decrypt).process(data)
}

//! Inbound byte pipeline: ciphertext in, validated packets out.
//!
//! A connection is one continuous CBC stream without length prefixes.
//! Ciphertext is decrypted in whole blocks, the peer's leading
//! synchronisation block is thrown away, and packets are cut from the
//! plaintext by peeking at their type byte.

use tracing::{debug, trace};

use crate::crypto::{CipherDirection, CryptoError, SessionKey, StreamCipher, BLOCK_SIZE};
use crate::protocol::{codec, Packet};

/// Decrypts and frames one direction of one connection.
#[derive(Debug)]
pub struct DecryptPipeline {
    cipher: StreamCipher,
    magic: u32,
    ciphertext: Vec<u8>,
    plaintext: Vec<u8>,
    sync_discarded: bool,
    invalid_packets: u64,
}

impl DecryptPipeline {
    pub fn new(key: &SessionKey) -> Self {
        Self {
            cipher: key.make_stream_cipher(CipherDirection::Decrypt),
            magic: key.magic(),
            ciphertext: Vec::new(),
            plaintext: Vec::new(),
            sync_discarded: false,
            invalid_packets: 0,
        }
    }

    /// Feeds received bytes and returns every complete packet that validates.
    ///
    /// Packets failing the magic or checksum test are dropped and counted.
    pub fn push(&mut self, data: &[u8]) -> Result<Vec<Packet>, CryptoError> {
        self.ciphertext.extend_from_slice(data);

        let whole = self.ciphertext.len() - self.ciphertext.len() % BLOCK_SIZE;
        if whole > 0 {
            let mut blocks: Vec<u8> = self.ciphertext.drain(..whole).collect();
            self.cipher.apply(&mut blocks)?;

            let mut plain = blocks.as_slice();
            if !self.sync_discarded {
                plain = &plain[BLOCK_SIZE..];
                self.sync_discarded = true;
                trace!("discarded synchronisation block");
            }
            self.plaintext.extend_from_slice(plain);
        }

        Ok(self.extract())
    }

    fn extract(&mut self) -> Vec<Packet> {
        let mut packets = Vec::new();
        let mut offset = 0;

        while offset < self.plaintext.len() {
            let size = codec::packet_len(self.plaintext[offset]);
            if self.plaintext.len() - offset < size {
                break;
            }
            let packet = codec::decode(&self.plaintext[offset..offset + size]);
            offset += size;

            if codec::validate(&packet, self.magic) {
                packets.push(packet);
            } else {
                self.invalid_packets += 1;
                debug!(
                    type_byte = packet.type_byte(),
                    dropped = self.invalid_packets,
                    "dropping packet that failed validation"
                );
            }
        }

        self.plaintext.drain(..offset);
        packets
    }

    /// Packets dropped so far for a bad magic tag, checksum or type.
    pub fn invalid_packets(&self) -> u64 {
        self.invalid_packets
    }

    /// Plaintext bytes waiting for the rest of their packet.
    pub fn buffered(&self) -> usize {
        self.plaintext.len()
    }
}

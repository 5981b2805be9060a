//! Binary codec for MWB-compat packets: decoding, checksum and magic tag.
//!
//! Wire format:
//! ```text
//! [type:1][checksum:1][magic_tag:2][id:4][src:4][des:4][union:16]([name:32])
//! ```
//! The checksum is the 8-bit wrapping sum of bytes `[2..32]`, computed with
//! the checksum byte zeroed. Only the first 32 bytes are covered, even for
//! extended packets. The magic tag is the upper half of the 32-bit magic
//! number derived from the shared passphrase.

use thiserror::Error;

use crate::protocol::packet::{Packet, PACKET_SIZE, PACKET_SIZE_EX};
use crate::protocol::packet_type::{is_extended, PacketType};

/// Errors that can occur while decoding a packet.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    /// The byte slice is shorter than the size implied by its type byte.
    #[error("insufficient data: need at least {needed} bytes, got {available}")]
    InsufficientData { needed: usize, available: usize },

    /// The type byte is not a recognised packet type.
    #[error("unknown packet type: 0x{0:02X}")]
    UnknownPacketType(u8),
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Returns the wire size implied by the first byte of `bytes`, if any.
pub fn packet_len(type_byte: u8) -> usize {
    if is_extended(type_byte) {
        PACKET_SIZE_EX
    } else {
        PACKET_SIZE
    }
}

/// Decodes one packet from the start of `bytes`.
///
/// # Errors
///
/// Returns [`ProtocolError`] for empty or truncated input and for type bytes
/// outside the protocol's enumeration.
pub fn try_decode(bytes: &[u8]) -> Result<Packet, ProtocolError> {
    let Some(&type_byte) = bytes.first() else {
        return Err(ProtocolError::InsufficientData {
            needed: PACKET_SIZE,
            available: 0,
        });
    };

    let needed = packet_len(type_byte);
    if bytes.len() < needed {
        return Err(ProtocolError::InsufficientData {
            needed,
            available: bytes.len(),
        });
    }

    let packet_type = PacketType::try_from(type_byte)
        .map_err(|_| ProtocolError::UnknownPacketType(type_byte))?;
    if packet_type == PacketType::Invalid {
        return Err(ProtocolError::UnknownPacketType(type_byte));
    }

    let mut raw = [0u8; PACKET_SIZE_EX];
    raw[..needed].copy_from_slice(&bytes[..needed]);
    Ok(Packet::from_raw(raw))
}

/// Decodes one packet, mapping any failure to the typed invalid packet.
///
/// Never panics, whatever the input.
///
/// # Examples
///
/// ```rust
/// use mwb_core::protocol::{decode, PacketType};
///
/// assert_eq!(decode(&[]).packet_type(), PacketType::Invalid);
/// assert_eq!(decode(&[123; 3]).packet_type(), PacketType::Invalid);
/// ```
pub fn decode(bytes: &[u8]) -> Packet {
    try_decode(bytes).unwrap_or_else(|_| Packet::invalid())
}

/// Computes the legacy checksum over bytes `[2..32]`.
pub fn checksum(packet: &Packet) -> u8 {
    packet.as_bytes()[2..PACKET_SIZE]
        .iter()
        .fold(0u8, |acc, b| acc.wrapping_add(*b))
}

/// Upper 16 bits of the magic number, as stored in the magic tag.
pub fn magic_tag(magic: u32) -> u16 {
    (magic >> 16) as u16
}

/// Writes the magic tag and then the checksum into `packet`.
pub fn finalize(packet: &mut Packet, magic: u32) {
    let raw = packet.raw_mut();
    raw[2..4].copy_from_slice(&magic_tag(magic).to_le_bytes());
    raw[1] = 0;
    let sum = checksum(packet);
    packet.raw_mut()[1] = sum;
}

/// Recomputes the magic tag and checksum and compares them with the stored values.
pub fn validate(packet: &Packet, magic: u32) -> bool {
    packet.packet_type() != PacketType::Invalid
        && packet.magic_tag() == magic_tag(magic)
        && packet.checksum() == checksum(packet)
}

/// Finalizes a copy of `packet` and returns its wire image.
///
/// # Examples
///
/// ```rust
/// use mwb_core::protocol::{encode, decode, validate, Packet, PacketType};
///
/// let bytes = encode(&Packet::new(PacketType::ByeBye), 0xABCD_0000);
/// assert_eq!(bytes.len(), 32);
/// assert!(validate(&decode(&bytes), 0xABCD_0000));
/// ```
pub fn encode(packet: &Packet, magic: u32) -> Vec<u8> {
    let mut packet = packet.clone();
    finalize(&mut packet, magic);
    packet.as_bytes().to_vec()
}

// ── Tests ─────────────────────────────────────────────────────────────────────

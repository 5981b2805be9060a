//! Challenge/response handshake.
//!
//! Each side sends a `Handshake` whose four machine words are random; the
//! peer proves it holds the same key by echoing them back complemented in a
//! `HandshakeAck`. Since every packet already carries the magic tag this is
//! a liveness and key check rather than strong authentication.

use rand::RngCore;

use crate::domain::machine::ID_NONE;
use crate::protocol::{Packet, PacketType, PACKET_SIZE_EX};

/// Times the message channel repeats its challenge.
pub const MESSAGE_HANDSHAKE_REPEAT: usize = 10;

/// The clipboard channel sends its challenge once.
pub const CLIPBOARD_HANDSHAKE_REPEAT: usize = 1;

/// Bitwise complement of every word.
pub fn complement(words: [u32; 4]) -> [u32; 4] {
    words.map(|w| !w)
}

/// Builds a challenge packet from 64 random bytes, typed as `Handshake`.
///
/// The caller still stamps the local identity and seals it.
pub fn challenge_packet() -> Packet {
    let mut bytes = [0u8; PACKET_SIZE_EX];
    rand::thread_rng().fill_bytes(&mut bytes);

    let mut packet = Packet::from_raw(bytes);
    packet.set_type_byte(PacketType::Handshake as u8);
    packet.set_des(ID_NONE);
    packet
}

/// Builds the `HandshakeAck` answering `challenge`.
pub fn ack_packet(challenge: &Packet) -> Packet {
    let mut ack = Packet::new(PacketType::HandshakeAck);
    ack.set_des(challenge.src());
    ack.set_machine_words(complement(challenge.machine_words()));
    ack
}

/// `true` when every word of `ack` is the complement of the word sent.
pub fn verify(sent: [u32; 4], ack: &Packet) -> bool {
    ack.machine_words() == complement(sent)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_complement_is_self_inverse() {
        let words = [0, 1, 0xDEAD_BEEF, u32::MAX];
        assert_eq!(complement(complement(words)), words);
        assert_eq!(complement(words), [u32::MAX, u32::MAX - 1, 0x2152_4110, 0]);
    }

    #[test]
    fn test_challenge_is_typed_and_random() {
        let a = challenge_packet();
        let b = challenge_packet();
        assert_eq!(a.packet_type(), PacketType::Handshake);
        assert_eq!(a.des(), ID_NONE);
        assert_ne!(a.machine_words(), b.machine_words());
    }

    #[test]
    fn test_ack_verifies_against_its_challenge() {
        let mut challenge = challenge_packet();
        challenge.set_src(77);

        let ack = ack_packet(&challenge);

        assert_eq!(ack.packet_type(), PacketType::HandshakeAck);
        assert_eq!(ack.des(), 77);
        assert!(verify(challenge.machine_words(), &ack));
    }

    #[test]
    fn test_verify_requires_all_four_words() {
        let sent = [10, 20, 30, 40];
        for i in 0..4 {
            let mut words = complement(sent);
            words[i] ^= 1;
            let mut ack = Packet::new(PacketType::HandshakeAck);
            ack.set_machine_words(words);
            assert!(!verify(sent, &ack), "word {i} mismatch must fail");
        }
    }
}

//! Machine identities.

use rand::Rng;

use crate::protocol::{Packet, NAME_SIZE};

/// Numeric machine identifier as carried in `src` / `des`.
pub type MachineId = u32;

/// "No machine"; also the `des` of packets addressed to nobody in particular.
pub const ID_NONE: MachineId = 0;

/// Broadcast destination.
pub const ID_ALL: MachineId = 255;

/// This machine's identity, stamped into every outgoing packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalMachine {
    id: MachineId,
    name: String,
}

impl LocalMachine {
    /// Builds an identity, forcing the name into at most 32 ASCII characters.
    pub fn new(id: MachineId, name: &str) -> Self {
        let name = name
            .chars()
            .map(|c| if c.is_ascii() && !c.is_ascii_control() { c } else { '?' })
            .take(NAME_SIZE)
            .collect::<String>()
            .trim_end()
            .to_string();
        Self { id, name }
    }

    /// Builds an identity with a random id outside the reserved range.
    pub fn with_random_id(name: &str) -> Self {
        Self::new(random_machine_id(), name)
    }

    pub fn id(&self) -> MachineId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Writes `src` and, for extended packets, the name region.
    ///
    /// Chunk-carrying packets keep their payload; the name region overlaps it.
    pub fn stamp(&self, packet: &mut Packet) {
        packet.set_src(self.id);
        if packet.is_extended() && !packet.packet_type().carries_chunk() {
            packet.set_machine_name(&self.name);
        }
    }
}

/// Picks an id that cannot collide with [`ID_NONE`], [`ID_ALL`] or a matrix slot.
pub fn random_machine_id() -> MachineId {
    rand::thread_rng().gen_range(256..u32::MAX)
}

/// A remote machine as learned from its verified handshake.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PeerIdentity {
    pub id: MachineId,
    pub name: String,
}

impl PeerIdentity {
    /// Reads the identity from a packet's `src` and name region.
    pub fn from_packet(packet: &Packet) -> Self {
        Self {
            id: packet.src(),
            name: packet.machine_name().unwrap_or_default(),
        }
    }

    /// Two identities denote the same peer if either the id or a non-empty name matches.
    pub fn same_peer(&self, other: &PeerIdentity) -> bool {
        self.id == other.id || (!self.name.is_empty() && self.name.eq_ignore_ascii_case(&other.name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::PacketType;

    #[test]
    fn test_name_is_truncated_and_sanitised() {
        let m = LocalMachine::new(7, "désktop-with-a-really-long-name-that-overflows");
        assert_eq!(m.name().len(), 32);
        assert!(m.name().starts_with("d?sktop"));
    }

    #[test]
    fn test_random_id_avoids_reserved_values() {
        for _ in 0..100 {
            let id = random_machine_id();
            assert!(id > ID_ALL);
        }
    }

    #[test]
    fn test_stamp_sets_src_and_name_on_extended_packets() {
        let m = LocalMachine::new(42, "alpha");
        let mut p = Packet::new(PacketType::Handshake);

        m.stamp(&mut p);

        assert_eq!(p.src(), 42);
        assert_eq!(p.machine_name().as_deref(), Some("alpha"));
        assert_eq!(PeerIdentity::from_packet(&p), PeerIdentity { id: 42, name: "alpha".into() });
    }

    #[test]
    fn test_stamp_leaves_base_packets_without_name() {
        let m = LocalMachine::new(42, "alpha");
        let mut p = Packet::new(PacketType::Mouse);
        m.stamp(&mut p);
        assert_eq!(p.src(), 42);
        assert_eq!(p.len(), 32);
    }

    #[test]
    fn test_stamp_preserves_chunk_payload() {
        let m = LocalMachine::new(42, "alpha");
        let mut p = Packet::new(PacketType::ClipboardText);
        p.set_chunk(&[0xAB; 48]);

        m.stamp(&mut p);

        assert_eq!(p.src(), 42);
        assert_eq!(p.chunk(), &[0xAB; 48][..]);
    }

    #[test]
    fn test_same_peer_matches_on_id_or_name() {
        let a = PeerIdentity { id: 1, name: "alpha".into() };
        assert!(a.same_peer(&PeerIdentity { id: 1, name: "other".into() }));
        assert!(a.same_peer(&PeerIdentity { id: 2, name: "ALPHA".into() }));
        assert!(!a.same_peer(&PeerIdentity { id: 2, name: "beta".into() }));

        let anon = PeerIdentity { id: 3, name: String::new() };
        assert!(!anon.same_peer(&PeerIdentity { id: 4, name: String::new() }));
    }
}

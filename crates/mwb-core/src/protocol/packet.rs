//! Fixed-size packet record and typed views over its fields.
//!
//! Wire layout (all integers little-endian):
//! ```text
//! [0] type  [1] checksum  [2..4] magic tag  [4..8] id  [8..12] src  [12..16] des
//! [16..32]  16-byte union: timestamp | mouse | keyboard | four machine words
//! [32..64]  extended only: ASCII machine name, space padded
//! ```
//! Chunk-carrying packets reuse `[16..64]` as a single 48-byte payload region.

use crate::protocol::packet_type::{is_extended, MatrixOptions, PacketType};

/// Size of a base packet in bytes.
pub const PACKET_SIZE: usize = 32;

/// Size of an extended packet in bytes.
pub const PACKET_SIZE_EX: usize = 64;

/// Offset of the 16-byte union (and of the payload chunk region).
pub const UNION_OFFSET: usize = 16;

/// Offset of the machine name in extended packets.
pub const NAME_OFFSET: usize = 32;

/// Length of the machine name field.
pub const NAME_SIZE: usize = 32;

/// Size of one payload chunk carried by clipboard and drag/drop packets.
pub const CHUNK_SIZE: usize = PACKET_SIZE_EX - UNION_OFFSET;

/// Mouse event carried in the packet union.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MouseData {
    pub x: i32,
    pub y: i32,
    pub wheel_delta: i32,
    pub flags: i32,
}

/// Keyboard event carried in the packet union.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct KeyboardData {
    /// Legacy virtual-key code.
    pub vk: i32,
    pub flags: i32,
}

/// One protocol packet, 32 or 64 bytes depending on its type byte.
///
/// The backing buffer is always 64 bytes; only the first [`Packet::len`]
/// bytes are meaningful and transmitted.
#[derive(Clone, PartialEq, Eq)]
pub struct Packet {
    bytes: [u8; PACKET_SIZE_EX],
}

impl Packet {
    /// Creates a zeroed packet of the given type.
    pub fn new(packet_type: PacketType) -> Self {
        Self::with_type_byte(packet_type as u8)
    }

    /// Creates a zeroed packet with a raw type byte (used for matrix options).
    pub fn with_type_byte(type_byte: u8) -> Self {
        let mut bytes = [0u8; PACKET_SIZE_EX];
        bytes[0] = type_byte;
        Self { bytes }
    }

    /// The typed "invalid" packet returned for undecodable input.
    pub fn invalid() -> Self {
        Self::new(PacketType::Invalid)
    }

    /// Wraps a full 64-byte image. Bytes past [`Packet::len`] are ignored.
    pub fn from_raw(bytes: [u8; PACKET_SIZE_EX]) -> Self {
        Self { bytes }
    }

    // ── Typed constructors ───────────────────────────────────────────────────

    /// A packet with no payload beyond its header, e.g. `ByeBye` or `HideMouse`.
    pub fn control(packet_type: PacketType, des: u32) -> Self {
        let mut packet = Self::new(packet_type);
        packet.set_des(des);
        packet
    }

    pub fn mouse_event(data: MouseData, des: u32) -> Self {
        let mut packet = Self::control(PacketType::Mouse, des);
        packet.set_mouse(data);
        packet
    }

    pub fn key_event(data: KeyboardData, des: u32) -> Self {
        let mut packet = Self::control(PacketType::Keyboard, des);
        packet.set_keyboard(data);
        packet
    }

    /// `HeartbeatEx` on a verified session, plain `Heartbeat` as a clipboard keep-alive.
    pub fn heartbeat(extended: bool, des: u32) -> Self {
        let kind = if extended {
            PacketType::HeartbeatEx
        } else {
            PacketType::Heartbeat
        };
        Self::control(kind, des)
    }

    /// One 48-byte payload chunk of a clipboard or drag/drop transfer.
    pub fn payload_chunk(packet_type: PacketType, chunk: &[u8], des: u32) -> Self {
        let mut packet = Self::control(packet_type, des);
        packet.set_chunk(chunk);
        packet
    }

    /// Closes a chunked transfer; the total length travels in the first machine word.
    pub fn end_marker(packet_type: PacketType, total_len: u32, des: u32) -> Self {
        let mut packet = Self::control(packet_type, des);
        packet.set_machine_words([total_len, 0, 0, 0]);
        packet
    }

    /// One slot of the machine matrix. `src` carries the slot number.
    pub fn matrix_slot(slot: u32, name: &str, options: MatrixOptions) -> Self {
        let mut packet = Self::with_type_byte(options.type_byte());
        packet.set_src(slot);
        packet.set_machine_name(name);
        packet
    }

    // ── Header ───────────────────────────────────────────────────────────────

    pub fn type_byte(&self) -> u8 {
        self.bytes[0]
    }

    /// Overwrites the type byte, keeping every other field.
    pub fn set_type_byte(&mut self, type_byte: u8) {
        self.bytes[0] = type_byte;
    }

    /// Resolved packet kind; matrix option bits are masked out.
    pub fn packet_type(&self) -> PacketType {
        PacketType::from_byte(self.bytes[0])
    }

    /// Matrix layout options, present only for matrix packets.
    pub fn matrix_options(&self) -> Option<MatrixOptions> {
        MatrixOptions::from_type_byte(self.bytes[0])
    }

    pub fn is_extended(&self) -> bool {
        is_extended(self.bytes[0])
    }

    /// Number of bytes this packet occupies on the wire.
    pub fn len(&self) -> usize {
        if self.is_extended() {
            PACKET_SIZE_EX
        } else {
            PACKET_SIZE
        }
    }

    /// Wire image, 32 or 64 bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len()]
    }

    pub(crate) fn raw_mut(&mut self) -> &mut [u8; PACKET_SIZE_EX] {
        &mut self.bytes
    }

    pub fn checksum(&self) -> u8 {
        self.bytes[1]
    }

    /// The 16-bit magic tag stored at `[2..4]`.
    pub fn magic_tag(&self) -> u16 {
        u16::from_le_bytes([self.bytes[2], self.bytes[3]])
    }

    pub fn id(&self) -> u32 {
        self.read_u32(4)
    }

    pub fn set_id(&mut self, id: u32) {
        self.write_u32(4, id);
    }

    pub fn src(&self) -> u32 {
        self.read_u32(8)
    }

    pub fn set_src(&mut self, src: u32) {
        self.write_u32(8, src);
    }

    pub fn des(&self) -> u32 {
        self.read_u32(12)
    }

    pub fn set_des(&mut self, des: u32) {
        self.write_u32(12, des);
    }

    // ── Union views ──────────────────────────────────────────────────────────

    pub fn timestamp(&self) -> i64 {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(&self.bytes[UNION_OFFSET..UNION_OFFSET + 8]);
        i64::from_le_bytes(buf)
    }

    pub fn set_timestamp(&mut self, timestamp: i64) {
        self.bytes[UNION_OFFSET..UNION_OFFSET + 8].copy_from_slice(&timestamp.to_le_bytes());
    }

    pub fn mouse(&self) -> MouseData {
        MouseData {
            x: self.read_u32(16) as i32,
            y: self.read_u32(20) as i32,
            wheel_delta: self.read_u32(24) as i32,
            flags: self.read_u32(28) as i32,
        }
    }

    pub fn set_mouse(&mut self, data: MouseData) {
        self.write_u32(16, data.x as u32);
        self.write_u32(20, data.y as u32);
        self.write_u32(24, data.wheel_delta as u32);
        self.write_u32(28, data.flags as u32);
    }

    pub fn keyboard(&self) -> KeyboardData {
        KeyboardData {
            vk: self.read_u32(16) as i32,
            flags: self.read_u32(20) as i32,
        }
    }

    pub fn set_keyboard(&mut self, data: KeyboardData) {
        self.write_u32(16, data.vk as u32);
        self.write_u32(20, data.flags as u32);
    }

    /// The four machine-identifier words (matrix slots / handshake challenge).
    pub fn machine_words(&self) -> [u32; 4] {
        [
            self.read_u32(16),
            self.read_u32(20),
            self.read_u32(24),
            self.read_u32(28),
        ]
    }

    pub fn set_machine_words(&mut self, words: [u32; 4]) {
        for (i, word) in words.iter().enumerate() {
            self.write_u32(UNION_OFFSET + i * 4, *word);
        }
    }

    /// Machine name with padding removed; `None` for base packets.
    pub fn machine_name(&self) -> Option<String> {
        if !self.is_extended() {
            return None;
        }
        let raw = &self.bytes[NAME_OFFSET..NAME_OFFSET + NAME_SIZE];
        let name: String = raw
            .iter()
            .map(|&b| if b.is_ascii() { b as char } else { '?' })
            .collect();
        Some(name.trim_end_matches(|c| c == ' ' || c == '\0').to_string())
    }

    /// Writes `name` as space-padded ASCII, truncated to 32 bytes.
    ///
    /// Non-ASCII characters are replaced by `?`.
    pub fn set_machine_name(&mut self, name: &str) {
        let field = &mut self.bytes[NAME_OFFSET..NAME_OFFSET + NAME_SIZE];
        field.fill(b' ');
        for (slot, ch) in field.iter_mut().zip(name.chars()) {
            *slot = if ch.is_ascii() { ch as u8 } else { b'?' };
        }
    }

    /// The 48-byte payload region `[16..64]`.
    pub fn chunk(&self) -> &[u8] {
        &self.bytes[UNION_OFFSET..PACKET_SIZE_EX]
    }

    /// Copies up to 48 bytes into the payload region, zero-filling the rest.
    pub fn set_chunk(&mut self, chunk: &[u8]) {
        let region = &mut self.bytes[UNION_OFFSET..PACKET_SIZE_EX];
        region.fill(0);
        let n = chunk.len().min(CHUNK_SIZE);
        region[..n].copy_from_slice(&chunk[..n]);
    }

    // ── Helpers ──────────────────────────────────────────────────────────────

    fn read_u32(&self, offset: usize) -> u32 {
        u32::from_le_bytes([
            self.bytes[offset],
            self.bytes[offset + 1],
            self.bytes[offset + 2],
            self.bytes[offset + 3],
        ])
    }

    fn write_u32(&mut self, offset: usize, value: u32) {
        self.bytes[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
    }
}

impl std::fmt::Debug for Packet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Packet")
            .field("type", &self.packet_type())
            .field("type_byte", &format_args!("0x{:02X}", self.type_byte()))
            .field("id", &self.id())
            .field("src", &self.src())
            .field("des", &self.des())
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_typed_constructors_fill_their_fields() {
        let key = Packet::key_event(KeyboardData { vk: 0x1B, flags: 0x80 }, 9);
        assert_eq!(key.packet_type(), PacketType::Keyboard);
        assert_eq!(key.des(), 9);
        assert_eq!(key.keyboard().vk, 0x1B);

        let end = Packet::end_marker(PacketType::ClipboardDataEnd, 481, 3);
        assert_eq!(end.machine_words(), [481, 0, 0, 0]);
        assert!(end.is_extended());

        let chunk = Packet::payload_chunk(PacketType::ClipboardPush, &[7; 10], 3);
        assert_eq!(&chunk.chunk()[..10], &[7; 10]);
        assert!(chunk.chunk()[10..].iter().all(|b| *b == 0));

        assert_eq!(Packet::heartbeat(true, 1).packet_type(), PacketType::HeartbeatEx);
        assert_eq!(Packet::heartbeat(false, 1).packet_type(), PacketType::Heartbeat);
    }

    #[test]
    fn test_matrix_slot_keeps_slot_and_options() {
        let options = MatrixOptions { swap: true, two_row: false };
        let p = Packet::matrix_slot(4, "laptop", options);
        assert_eq!(p.packet_type(), PacketType::Matrix);
        assert_eq!(p.src(), 4);
        assert_eq!(p.machine_name().as_deref(), Some("laptop"));
        assert_eq!(p.matrix_options(), Some(options));
    }

    #[test]
    fn test_new_packet_length_follows_type() {
        assert_eq!(Packet::new(PacketType::Mouse).len(), PACKET_SIZE);
        assert_eq!(Packet::new(PacketType::Handshake).len(), PACKET_SIZE_EX);
        assert_eq!(Packet::new(PacketType::Mouse).as_bytes().len(), 32);
    }

    #[test]
    fn test_routing_fields_are_little_endian() {
        let mut p = Packet::new(PacketType::Keyboard);
        p.set_id(0x0102_0304);
        p.set_src(7);
        p.set_des(255);
        assert_eq!(&p.as_bytes()[4..8], &[0x04, 0x03, 0x02, 0x01]);
        assert_eq!(p.src(), 7);
        assert_eq!(p.des(), 255);
    }

    #[test]
    fn test_mouse_view_keeps_negative_coordinates() {
        let mut p = Packet::new(PacketType::Mouse);
        let data = MouseData { x: -100, y: 65_535, wheel_delta: -120, flags: 0x0201 };
        p.set_mouse(data);
        assert_eq!(p.mouse(), data);
    }

    #[test]
    fn test_keyboard_view() {
        let mut p = Packet::new(PacketType::Keyboard);
        p.set_keyboard(KeyboardData { vk: 0x41, flags: 0x80 });
        assert_eq!(p.keyboard(), KeyboardData { vk: 0x41, flags: 0x80 });
        assert_eq!(&p.as_bytes()[16..20], &[0x41, 0, 0, 0]);
    }

    #[test]
    fn test_machine_name_is_space_padded_and_trimmed() {
        let mut p = Packet::new(PacketType::HeartbeatEx);
        p.set_machine_name("DESKTOP-1");
        assert_eq!(&p.as_bytes()[32..41], b"DESKTOP-1");
        assert!(p.as_bytes()[41..64].iter().all(|&b| b == b' '));
        assert_eq!(p.machine_name().as_deref(), Some("DESKTOP-1"));
    }

    #[test]
    fn test_machine_name_truncated_to_field() {
        let mut p = Packet::new(PacketType::Hello);
        p.set_machine_name(&"x".repeat(40));
        assert_eq!(p.machine_name().unwrap().len(), NAME_SIZE);
    }

    #[test]
    fn test_machine_name_absent_on_base_packet() {
        assert_eq!(Packet::new(PacketType::Mouse).machine_name(), None);
    }

    #[test]
    fn test_chunk_region_is_zero_filled() {
        let mut p = Packet::new(PacketType::ClipboardText);
        p.set_chunk(&[0xAA; CHUNK_SIZE]);
        p.set_chunk(&[1, 2, 3]);
        assert_eq!(&p.chunk()[..3], &[1, 2, 3]);
        assert!(p.chunk()[3..].iter().all(|&b| b == 0));
        assert_eq!(p.chunk().len(), 48);
    }

    #[test]
    fn test_machine_words_overlay_union() {
        let mut p = Packet::new(PacketType::Handshake);
        p.set_machine_words([1, 2, 3, 0xFFFF_FFFF]);
        assert_eq!(p.machine_words(), [1, 2, 3, 0xFFFF_FFFF]);
        assert_eq!(p.mouse().flags, -1);
    }
}

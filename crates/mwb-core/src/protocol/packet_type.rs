//! Packet type byte: the closed set of legacy packet kinds plus the matrix flag.
//!
//! The numeric values are fixed by the legacy peers and must never change.
//! The type byte is also the only framing information on the wire: whether a
//! packet occupies 32 or 64 bytes is decided by [`is_extended`] alone.

/// High bit of the type byte marking a machine-matrix packet.
pub const MATRIX_FLAG: u8 = 0x80;

/// Matrix option bit: the cursor wraps around the outer edges.
pub const MATRIX_SWAP_FLAG: u8 = 0x02;

/// Matrix option bit: machines are arranged in two rows of two.
pub const MATRIX_TWO_ROW_FLAG: u8 = 0x04;

/// All packet kinds understood by the protocol engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketType {
    Hi = 2,
    Hello = 3,
    ByeBye = 4,
    Heartbeat = 20,
    Awake = 21,
    HideMouse = 50,
    HeartbeatEx = 51,
    HeartbeatExL2 = 52,
    HeartbeatExL3 = 53,
    Clipboard = 69,
    ClipboardDragDrop = 70,
    ClipboardDragDropEnd = 71,
    ExplorerDragDrop = 72,
    ClipboardCapture = 73,
    CaptureScreenCommand = 74,
    ClipboardDragDropOperation = 75,
    ClipboardDataEnd = 76,
    MachineSwitched = 77,
    ClipboardAsk = 78,
    /// Also carries file-list chunks while a drag/drop transfer is open.
    ClipboardPush = 79,
    NextMachine = 121,
    Keyboard = 122,
    Mouse = 123,
    ClipboardText = 124,
    ClipboardImage = 125,
    Handshake = 126,
    HandshakeAck = 127,
    /// Base value of the matrix variant; option bits live in the low bits.
    Matrix = 0x80,
    Error = 0xFE,
    /// Unknown, truncated or otherwise undecodable input.
    Invalid = 0xFF,
}

impl TryFrom<u8> for PacketType {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, ()> {
        match value {
            2 => Ok(PacketType::Hi),
            3 => Ok(PacketType::Hello),
            4 => Ok(PacketType::ByeBye),
            20 => Ok(PacketType::Heartbeat),
            21 => Ok(PacketType::Awake),
            50 => Ok(PacketType::HideMouse),
            51 => Ok(PacketType::HeartbeatEx),
            52 => Ok(PacketType::HeartbeatExL2),
            53 => Ok(PacketType::HeartbeatExL3),
            69 => Ok(PacketType::Clipboard),
            70 => Ok(PacketType::ClipboardDragDrop),
            71 => Ok(PacketType::ClipboardDragDropEnd),
            72 => Ok(PacketType::ExplorerDragDrop),
            73 => Ok(PacketType::ClipboardCapture),
            74 => Ok(PacketType::CaptureScreenCommand),
            75 => Ok(PacketType::ClipboardDragDropOperation),
            76 => Ok(PacketType::ClipboardDataEnd),
            77 => Ok(PacketType::MachineSwitched),
            78 => Ok(PacketType::ClipboardAsk),
            79 => Ok(PacketType::ClipboardPush),
            121 => Ok(PacketType::NextMachine),
            122 => Ok(PacketType::Keyboard),
            123 => Ok(PacketType::Mouse),
            124 => Ok(PacketType::ClipboardText),
            125 => Ok(PacketType::ClipboardImage),
            126 => Ok(PacketType::Handshake),
            127 => Ok(PacketType::HandshakeAck),
            0xFE => Ok(PacketType::Error),
            0xFF => Ok(PacketType::Invalid),
            // Any other byte with the high bit set is a matrix packet whose
            // option bits have been overlaid on the type.
            b if b & MATRIX_FLAG == MATRIX_FLAG => Ok(PacketType::Matrix),
            _ => Err(()),
        }
    }
}

impl PacketType {
    /// Resolves a raw type byte, mapping anything unknown to [`PacketType::Invalid`].
    pub fn from_byte(byte: u8) -> Self {
        PacketType::try_from(byte).unwrap_or(PacketType::Invalid)
    }

    /// Returns `true` for packet kinds whose bytes `16..64` carry a payload chunk.
    pub fn carries_chunk(self) -> bool {
        matches!(
            self,
            PacketType::ClipboardText | PacketType::ClipboardImage | PacketType::ClipboardPush
        )
    }
}

/// Returns `true` when a packet with this type byte occupies 64 bytes on the wire.
///
/// This is a pure function of the byte: the fixed set of extended kinds, plus
/// anything carrying the matrix flag (which includes `Error` and `Invalid`).
pub fn is_extended(type_byte: u8) -> bool {
    if type_byte & MATRIX_FLAG == MATRIX_FLAG {
        return true;
    }
    matches!(
        PacketType::try_from(type_byte),
        Ok(PacketType::Hello
            | PacketType::Awake
            | PacketType::Heartbeat
            | PacketType::HeartbeatEx
            | PacketType::Handshake
            | PacketType::HandshakeAck
            | PacketType::Clipboard
            | PacketType::ClipboardAsk
            | PacketType::ClipboardPush
            | PacketType::ClipboardText
            | PacketType::ClipboardImage
            | PacketType::ClipboardDataEnd)
    )
}

/// Layout options overlaid on the type byte of a matrix packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MatrixOptions {
    pub swap: bool,
    pub two_row: bool,
}

impl MatrixOptions {
    /// Extracts the option bits, or `None` if the byte is not a matrix packet.
    ///
    /// `Error` (0xFE) and `Invalid` (0xFF) also have the high bit set but are
    /// never treated as matrix packets.
    pub fn from_type_byte(type_byte: u8) -> Option<Self> {
        if PacketType::from_byte(type_byte) != PacketType::Matrix {
            return None;
        }
        Some(Self {
            swap: type_byte & MATRIX_SWAP_FLAG != 0,
            two_row: type_byte & MATRIX_TWO_ROW_FLAG != 0,
        })
    }

    /// Builds the matrix type byte carrying these options.
    pub fn type_byte(self) -> u8 {
        let mut byte = MATRIX_FLAG;
        if self.swap {
            byte |= MATRIX_SWAP_FLAG;
        }
        if self.two_row {
            byte |= MATRIX_TWO_ROW_FLAG;
        }
        byte
    }
}

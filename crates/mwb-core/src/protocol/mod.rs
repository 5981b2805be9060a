//! Protocol module: packet types, the fixed-size packet record and its codec.

pub mod codec;
pub mod packet;
pub mod packet_id;
pub mod packet_type;

pub use codec::{
    checksum, decode, encode, finalize, magic_tag, packet_len, try_decode, validate,
    ProtocolError,
};
pub use packet::{
    KeyboardData, MouseData, Packet, CHUNK_SIZE, NAME_OFFSET, NAME_SIZE, PACKET_SIZE,
    PACKET_SIZE_EX, UNION_OFFSET,
};
pub use packet_id::PacketIdCounter;
pub use packet_type::{
    is_extended, MatrixOptions, PacketType, MATRIX_FLAG, MATRIX_SWAP_FLAG, MATRIX_TWO_ROW_FLAG,
};

//! Splitting large payloads into 48-byte packet chunks and putting them back together.
//!
//! Clipboard text, images and file-drop lists are too large for a single
//! packet. The sender slices them with [`split_payload`] and follows the
//! chunks with an end marker; the receiver feeds chunks into a
//! [`ChunkReassembler`] and flushes it when the marker arrives.

pub mod payload;
pub mod reassembler;

use thiserror::Error;

pub use payload::{
    decode_clipboard_text, decode_file_drop, encode_clipboard_text, encode_file_drop,
    split_payload,
};
pub use reassembler::{ChunkReassembler, ClipboardPayload, DEFAULT_MAX_PAYLOAD};

/// Errors raised while building or rebuilding a chunked payload.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChunkError {
    /// An accumulator grew past its limit and was discarded.
    #[error("payload too large: {size} bytes exceeds limit of {limit} bytes")]
    PayloadTooLarge { size: usize, limit: usize },

    /// Deflating clipboard text failed.
    #[error("compression failed: {0}")]
    Compression(String),

    /// The received clipboard text is not a valid raw deflate stream.
    #[error("decompression failed: {0}")]
    Decompression(String),
}

//! Payload encodings carried inside chunk packets.

use std::io::{Read, Write};

use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;

use super::{ChunkError, DEFAULT_MAX_PAYLOAD};
use crate::protocol::CHUNK_SIZE;

/// Slices `bytes` into 48-byte chunks, zero-padding the last one.
///
/// Empty input yields no chunks.
pub fn split_payload(bytes: &[u8]) -> Vec<[u8; CHUNK_SIZE]> {
    bytes
        .chunks(CHUNK_SIZE)
        .map(|piece| {
            let mut chunk = [0u8; CHUNK_SIZE];
            chunk[..piece.len()].copy_from_slice(piece);
            chunk
        })
        .collect()
}

fn to_utf16le(text: &str) -> Vec<u8> {
    text.encode_utf16().flat_map(|u| u.to_le_bytes()).collect()
}

fn from_utf16le(bytes: &[u8]) -> Vec<u16> {
    bytes
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}

/// Encodes clipboard text as UTF-16LE and compresses it with raw deflate.
///
/// # Errors
///
/// Returns [`ChunkError::Compression`] if the encoder fails.
pub fn encode_clipboard_text(text: &str) -> Result<Vec<u8>, ChunkError> {
    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(&to_utf16le(text))
        .map_err(|e| ChunkError::Compression(e.to_string()))?;
    encoder
        .finish()
        .map_err(|e| ChunkError::Compression(e.to_string()))
}

/// Inflates raw-deflate bytes and decodes the UTF-16LE text they hold.
///
/// An empty transfer decodes to an empty string. Invalid surrogates are replaced, a dangling odd byte is ignored and
/// trailing NULs are trimmed.
///
/// # Errors
///
/// Returns [`ChunkError::Decompression`] if `bytes` is not a deflate stream,
/// and [`ChunkError::PayloadTooLarge`] if it inflates past the payload cap.
pub fn decode_clipboard_text(bytes: &[u8]) -> Result<String, ChunkError> {
    if bytes.is_empty() {
        return Ok(String::new());
    }
    let limit = DEFAULT_MAX_PAYLOAD;
    let mut inflated = Vec::new();
    DeflateDecoder::new(bytes)
        .take(limit as u64 + 1)
        .read_to_end(&mut inflated)
        .map_err(|e| ChunkError::Decompression(e.to_string()))?;
    if inflated.len() > limit {
        return Err(ChunkError::PayloadTooLarge {
            size: inflated.len(),
            limit,
        });
    }

    let text = String::from_utf16_lossy(&from_utf16le(&inflated));
    Ok(text.trim_end_matches('\0').to_string())
}

/// Encodes a file list as NUL-separated UTF-16LE terminated by a double NUL.
pub fn encode_file_drop<S: AsRef<str>>(paths: &[S]) -> Vec<u8> {
    let mut units: Vec<u16> = Vec::new();
    for path in paths {
        units.extend(path.as_ref().encode_utf16());
        units.push(0);
    }
    units.push(0);
    if paths.is_empty() {
        units.push(0);
    }
    units.into_iter().flat_map(|u| u.to_le_bytes()).collect()
}

/// Decodes a file list up to its double-NUL terminator.
///
/// Empty entries are dropped. A list with no terminator is read to the end.
pub fn decode_file_drop(bytes: &[u8]) -> Vec<String> {
    let units = from_utf16le(bytes);
    let end = units
        .windows(2)
        .position(|w| w[0] == 0 && w[1] == 0)
        .unwrap_or(units.len());

    units[..end]
        .split(|u| *u == 0)
        .filter(|entry| !entry.is_empty())
        .map(String::from_utf16_lossy)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_empty_yields_no_chunks() {
        assert!(split_payload(&[]).is_empty());
    }

    #[test]
    fn test_split_chunk_counts_at_boundaries() {
        for (len, expected) in [(1, 1), (47, 1), (48, 1), (49, 2), (481, 11)] {
            let data = vec![0xAB; len];
            assert_eq!(split_payload(&data).len(), expected, "len {len}");
        }
    }

    #[test]
    fn test_split_pads_last_chunk_with_zeros() {
        let data: Vec<u8> = (1..=50).collect();
        let chunks = split_payload(&data);
        assert_eq!(&chunks[1][..2], &[49, 50]);
        assert!(chunks[1][2..].iter().all(|b| *b == 0));
    }

    #[test]
    fn test_clipboard_text_survives_compression() {
        let text = "Hello, wörld! 你好 🎉\r\nline two";
        let encoded = encode_clipboard_text(text).unwrap();
        assert_eq!(decode_clipboard_text(&encoded).unwrap(), text);
    }

    #[test]
    fn test_clipboard_text_tolerates_trailing_zero_padding() {
        let mut encoded = encode_clipboard_text("padded").unwrap();
        encoded.extend_from_slice(&[0u8; 20]);
        assert_eq!(decode_clipboard_text(&encoded).unwrap(), "padded");
    }

    #[test]
    fn test_empty_clipboard_transfer_decodes_to_empty_text() {
        assert_eq!(decode_clipboard_text(&[]).unwrap(), "");
    }

    #[test]
    fn test_clipboard_text_rejects_garbage() {
        assert!(matches!(
            decode_clipboard_text(&[0xFF; 16]),
            Err(ChunkError::Decompression(_))
        ));
    }

    #[test]
    fn test_clipboard_text_refuses_oversized_inflation() {
        let mut encoder = DeflateEncoder::new(Vec::new(), Compression::best());
        encoder.write_all(&vec![0u8; DEFAULT_MAX_PAYLOAD + 2]).unwrap();
        let bomb = encoder.finish().unwrap();

        assert!(matches!(
            decode_clipboard_text(&bomb),
            Err(ChunkError::PayloadTooLarge { .. })
        ));
    }

    #[test]
    fn test_file_drop_layout() {
        let bytes = encode_file_drop(&["a", "b"]);
        assert_eq!(bytes, vec![b'a', 0, 0, 0, b'b', 0, 0, 0, 0, 0]);
    }

    #[test]
    fn test_file_drop_decode_drops_empty_entries_and_stops_at_terminator() {
        let mut bytes = encode_file_drop(&[r"C:\tmp\one.txt", r"D:\two"]);
        bytes.extend_from_slice(&[b'x', 0, 0, 0]);
        assert_eq!(
            decode_file_drop(&bytes),
            vec![r"C:\tmp\one.txt".to_string(), r"D:\two".to_string()]
        );
    }

    #[test]
    fn test_file_drop_empty_list() {
        assert!(decode_file_drop(&encode_file_drop::<&str>(&[])).is_empty());
    }
}

//! Per-session accumulators for chunked clipboard and drag/drop payloads.

use tracing::warn;

use super::ChunkError;

/// Default cap on a single reassembled payload (16 MiB).
pub const DEFAULT_MAX_PAYLOAD: usize = 16 * 1024 * 1024;

/// A flushed clipboard payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClipboardPayload {
    pub bytes: Vec<u8>,
    /// `true` when the most recent chunk was a `ClipboardImage`.
    pub is_image: bool,
}

/// Rebuilds chunked payloads.
///
/// Text and image chunks share one buffer, tagged by the type of the most
/// recent chunk. Drag/drop file lists use a second, independent buffer that
/// only accepts chunks between [`begin_drag_drop`](Self::begin_drag_drop)
/// and [`finish_drag_drop`](Self::finish_drag_drop).
#[derive(Debug)]
pub struct ChunkReassembler {
    clipboard: Vec<u8>,
    is_image: bool,
    drag_drop: Vec<u8>,
    drag_drop_open: bool,
    limit: usize,
}

impl Default for ChunkReassembler {
    fn default() -> Self {
        Self::new()
    }
}

impl ChunkReassembler {
    pub fn new() -> Self {
        Self::with_limit(DEFAULT_MAX_PAYLOAD)
    }

    pub fn with_limit(limit: usize) -> Self {
        Self {
            clipboard: Vec::new(),
            is_image: false,
            drag_drop: Vec::new(),
            drag_drop_open: false,
            limit,
        }
    }

    /// Appends a text or image chunk.
    ///
    /// # Errors
    ///
    /// Returns [`ChunkError::PayloadTooLarge`] and discards the accumulator
    /// when the limit would be exceeded.
    pub fn push_clipboard(&mut self, chunk: &[u8], is_image: bool) -> Result<(), ChunkError> {
        self.is_image = is_image;
        append_capped(&mut self.clipboard, chunk, self.limit)
    }

    /// Opens a drag/drop transfer, discarding any earlier partial list.
    pub fn begin_drag_drop(&mut self) {
        self.drag_drop = Vec::new();
        self.drag_drop_open = true;
    }

    pub fn is_drag_drop_open(&self) -> bool {
        self.drag_drop_open
    }

    /// Appends a drag/drop chunk.
    ///
    /// # Errors
    ///
    /// Same overflow behaviour as [`push_clipboard`](Self::push_clipboard).
    pub fn push_drag_drop(&mut self, chunk: &[u8]) -> Result<(), ChunkError> {
        append_capped(&mut self.drag_drop, chunk, self.limit)
    }

    /// Takes the clipboard accumulator, trimmed to `declared_len` when that
    /// is non-zero and fits. A transfer with no chunks yields an empty payload.
    pub fn finish_clipboard(&mut self, declared_len: u32) -> ClipboardPayload {
        let bytes = take_trimmed(&mut self.clipboard, declared_len);
        let is_image = std::mem::take(&mut self.is_image);
        ClipboardPayload { bytes, is_image }
    }

    /// Takes the drag/drop accumulator and closes the transfer.
    pub fn finish_drag_drop(&mut self, declared_len: u32) -> Vec<u8> {
        self.drag_drop_open = false;
        take_trimmed(&mut self.drag_drop, declared_len)
    }

    pub fn pending_clipboard_len(&self) -> usize {
        self.clipboard.len()
    }

    pub fn pending_drag_drop_len(&self) -> usize {
        self.drag_drop.len()
    }

    /// Drops both accumulators and releases their memory.
    pub fn clear(&mut self) {
        self.clipboard = Vec::new();
        self.drag_drop = Vec::new();
        self.drag_drop_open = false;
        self.is_image = false;
    }
}

fn append_capped(buffer: &mut Vec<u8>, chunk: &[u8], limit: usize) -> Result<(), ChunkError> {
    let size = buffer.len() + chunk.len();
    if size > limit {
        warn!(size, limit, "chunk accumulator overflow, discarding payload");
        *buffer = Vec::new();
        return Err(ChunkError::PayloadTooLarge { size, limit });
    }
    buffer.extend_from_slice(chunk);
    Ok(())
}

fn take_trimmed(buffer: &mut Vec<u8>, declared_len: u32) -> Vec<u8> {
    let mut bytes = std::mem::take(buffer);
    let declared = declared_len as usize;
    if declared > 0 && declared <= bytes.len() {
        bytes.truncate(declared);
    }
    bytes
}

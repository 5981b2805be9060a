//! Counter stamping the `id` field of outgoing packets.
//!
//! Legacy peers use the id only for diagnostics and duplicate suppression, so
//! the counter just needs to be monotonic and wrap silently. Zero is skipped
//! because peers read it as "no id".

use std::sync::atomic::{AtomicU32, Ordering};

/// A monotonically increasing, wrapping packet id source.
///
/// # Examples
///
/// ```rust
/// use mwb_core::protocol::PacketIdCounter;
///
/// let ids = PacketIdCounter::new();
/// assert_eq!(ids.next(), 1);
/// assert_eq!(ids.next(), 2);
/// ```
#[derive(Debug)]
pub struct PacketIdCounter {
    inner: AtomicU32,
}

impl PacketIdCounter {
    /// Creates a counter whose first id is 1.
    pub fn new() -> Self {
        Self {
            inner: AtomicU32::new(1),
        }
    }

    /// Returns the next id, wrapping from `u32::MAX` back to 1.
    ///
    /// `Relaxed` ordering is enough: ids carry no memory-synchronisation meaning.
    pub fn next(&self) -> u32 {
        loop {
            let id = self.inner.fetch_add(1, Ordering::Relaxed);
            if id != 0 {
                return id;
            }
        }
    }

    /// Returns the id the next call to [`next`](Self::next) will most likely hand out.
    pub fn current(&self) -> u32 {
        self.inner.load(Ordering::Relaxed)
    }
}

impl Default for PacketIdCounter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packet_id_counter_starts_at_one() {
        // Arrange
        let ids = PacketIdCounter::new();

        // Act
        let first = ids.next();

        // Assert
        assert_eq!(first, 1);
    }

    #[test]
    fn test_packet_id_counter_increments_monotonically() {
        let ids = PacketIdCounter::new();
        let values: Vec<u32> = (0..100).map(|_| ids.next()).collect();
        for window in values.windows(2) {
            assert!(window[1] > window[0], "ids must be monotonically increasing");
        }
    }

    #[test]
    fn test_packet_id_counter_wraps_past_zero() {
        // Arrange – one step before overflow
        let ids = PacketIdCounter {
            inner: AtomicU32::new(u32::MAX),
        };

        // Act
        let before_wrap = ids.next();
        let after_wrap = ids.next();

        // Assert – zero is never handed out
        assert_eq!(before_wrap, u32::MAX);
        assert_eq!(after_wrap, 1);
    }

    #[test]
    fn test_current_does_not_increment() {
        let ids = PacketIdCounter::new();
        ids.next();
        assert_eq!(ids.current(), 2);
        assert_eq!(ids.next(), 2);
    }
}

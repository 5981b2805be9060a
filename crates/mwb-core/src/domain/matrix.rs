//! The machine matrix: up to four machines arranged in one or two rows.
//!
//! The matrix travels as four `Matrix` packets, one per slot. The slot number
//! rides in `src` (1..=4) and the machine name in the name region. Only the
//! last packet carries the swap and two-row option bits in its type byte.

use crate::protocol::{MatrixOptions, Packet};

/// Number of slots in the matrix.
pub const MATRIX_SLOTS: usize = 4;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MachineMatrix {
    slots: [String; MATRIX_SLOTS],
    /// Wrap the cursor around the outer edges.
    pub swap: bool,
    /// Arrange the four slots as a 2x2 grid instead of one row.
    pub two_row: bool,
}

impl MachineMatrix {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a matrix from up to four names. Missing names become blank slots;
    /// extra names are ignored.
    pub fn from_names<S: AsRef<str>>(names: &[S], two_row: bool, swap: bool) -> Self {
        let mut matrix = Self {
            two_row,
            swap,
            ..Self::default()
        };
        for (slot, name) in matrix.slots.iter_mut().zip(names) {
            *slot = name.as_ref().trim().to_string();
        }
        matrix
    }

    /// Name in slot `slot` (1-based). `None` outside 1..=4.
    pub fn slot(&self, slot: u32) -> Option<&str> {
        let index = slot_index(slot)?;
        Some(self.slots[index].as_str())
    }

    /// Stores `name` in slot `slot` (1-based). Returns `false` for an
    /// out-of-range slot, leaving the matrix unchanged.
    pub fn set_slot(&mut self, slot: u32, name: &str) -> bool {
        match slot_index(slot) {
            Some(index) => {
                self.slots[index] = name.trim().to_string();
                true
            }
            None => false,
        }
    }

    pub fn names(&self) -> &[String; MATRIX_SLOTS] {
        &self.slots
    }

    pub fn options(&self) -> MatrixOptions {
        MatrixOptions {
            swap: self.swap,
            two_row: self.two_row,
        }
    }

    /// Folds one received `Matrix` packet into the matrix.
    ///
    /// Returns `true` when the packet completed an update, which happens on
    /// slot 4. The option flags are taken from that packet only.
    pub fn apply_packet(&mut self, packet: &Packet) -> bool {
        let slot = packet.src();
        let name = packet.machine_name().unwrap_or_default();
        if !self.set_slot(slot, &name) {
            return false;
        }
        if slot as usize != MATRIX_SLOTS {
            return false;
        }
        if let Some(options) = packet.matrix_options() {
            self.swap = options.swap;
            self.two_row = options.two_row;
        }
        true
    }

    /// Encodes the matrix as four unsealed packets in slot order.
    pub fn to_packets(&self) -> [Packet; MATRIX_SLOTS] {
        std::array::from_fn(|index| {
            let options = if index + 1 == MATRIX_SLOTS {
                self.options()
            } else {
                MatrixOptions::default()
            };
            Packet::matrix_slot(index as u32 + 1, &self.slots[index], options)
        })
    }
}

fn slot_index(slot: u32) -> Option<usize> {
    match slot {
        1..=4 => Some(slot as usize - 1),
        _ => None,
    }
}

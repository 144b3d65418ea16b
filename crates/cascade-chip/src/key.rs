//! Chip identity and the addressable id space.
//!
//! A chip is identified by `(io_group, io_channel, chip_id)`. The chip id is
//! drawn from a rows × columns grid of ten columns per row: row r covers ids
//! `r*10 + 1 ..= r*10 + 10`, so 21–30 is one row and 23 sits in row 2,
//! column 3. Consecutive ids x0/x1 are therefore in different rows despite
//! differing by one; the link algebra excludes that pairing.

use std::fmt;

/// Reserved setup address. Every unaddressed chip listens here until its
/// chip-id register is written.
pub const SETUP_CHIP_ID: u8 = 1;

/// Smallest assignable chip id (row 1, column 1).
pub const CHIP_ID_MIN: u8 = 11;

/// Largest assignable chip id (row 11, column 0 boundary).
pub const CHIP_ID_MAX: u8 = 110;

/// Identity of one chip on the serial bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ChipKey {
    /// Bridge I/O group.
    pub io_group: u8,
    /// UART channel on the bridge (1-based).
    pub io_channel: u8,
    /// Chip id on that channel.
    pub chip_id: u8,
}

impl ChipKey {
    /// Build a key from its three coordinates.
    #[must_use]
    pub const fn new(io_group: u8, io_channel: u8, chip_id: u8) -> Self {
        Self { io_group, io_channel, chip_id }
    }

    /// Key of the setup address on the same group/channel.
    #[must_use]
    pub const fn setup_key(io_group: u8, io_channel: u8) -> Self {
        Self::new(io_group, io_channel, SETUP_CHIP_ID)
    }

    /// Same group/channel, different chip id.
    #[must_use]
    pub const fn sibling(&self, chip_id: u8) -> Self {
        Self::new(self.io_group, self.io_channel, chip_id)
    }
}

impl fmt::Display for ChipKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}-{}", self.io_group, self.io_channel, self.chip_id)
    }
}

/// Whether `chip_id` lies in the assignable range.
#[must_use]
pub const fn is_assignable_id(chip_id: u8) -> bool {
    chip_id >= CHIP_ID_MIN && chip_id <= CHIP_ID_MAX
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_display() {
        assert_eq!(ChipKey::new(3, 1, 21).to_string(), "3-1-21");
    }

    #[test]
    fn setup_key_uses_sentinel() {
        let key = ChipKey::setup_key(1, 4);
        assert_eq!(key.chip_id, SETUP_CHIP_ID);
        assert_eq!(key.io_channel, 4);
    }

    #[test]
    fn assignable_range() {
        assert!(!is_assignable_id(10));
        assert!(is_assignable_id(11));
        assert!(is_assignable_id(110));
        assert!(!is_assignable_id(111));
    }
}

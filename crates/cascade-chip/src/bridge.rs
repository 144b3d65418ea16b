//! Bridge (bus controller) register constants.
//!
//! The bridge multiplexes up to eight chip UART channels onto one
//! single-master serial bus per I/O group. Chip traffic only returns on a
//! channel whose select bit is asserted in [`UART_POSI_ENABLE`]; the driver
//! keeps at most one bit set at a time.

/// Channel select bitmap: bit n−1 enables UART channel n.
pub const UART_POSI_ENABLE: u32 = 0x18;

/// Value deselecting every channel.
pub const CHANNEL_DESELECT: u32 = 0;

/// Number of UART channels per bridge.
pub const NUM_CHANNELS: u8 = 8;

/// Select mask for one channel (1-based, 1..=[`NUM_CHANNELS`]).
#[must_use]
pub const fn channel_select_mask(io_channel: u8) -> u32 {
    1 << (io_channel - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn select_masks_are_disjoint() {
        let mut seen = 0u32;
        for ch in 1..=NUM_CHANNELS {
            let mask = channel_select_mask(ch);
            assert_eq!(seen & mask, 0);
            seen |= mask;
        }
        assert_eq!(seen, 0xff);
    }
}

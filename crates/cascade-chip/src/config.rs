//! Per-chip configuration image.
//!
//! The chip exposes 38 single-byte configuration registers. The driver keeps
//! a local [`ChipConfig`] per chip and reconciles it against the device by
//! read-back; [`ChipConfig::register_value`] is the local side of that
//! comparison.
//!
//! Register layout:
//!
//! ```text
//! 0x00        RESERVED            non-physical scratch, always 0
//! 0x01        CHIP_ID
//! 0x02        ENABLE_PISO_UPSTREAM    bit n = lane n
//! 0x03        ENABLE_PISO_DOWNSTREAM  bit n = lane n
//! 0x04        ENABLE_POSI             bit n = lane n
//! 0x05-0x08   I_TX_DIFF[0..4]     per-lane transmit bias
//! 0x09-0x0c   TX_SLICES[0..4]     per-lane transmit slices
//! 0x0d-0x10   R_TERM[0..4]        per-lane receive termination
//! 0x11-0x14   I_RX[0..4]          per-lane receive bias
//! 0x15        REF_CURRENT_TRIM
//! 0x16-0x1d   CSA_ENABLE          64-channel bitmap, little-endian
//! 0x1e-0x25   CHANNEL_MASK        64-channel bitmap, little-endian
//! ```

use crate::key::SETUP_CHIP_ID;

/// Non-physical scratch register.
pub const REG_RESERVED: u8 = 0x00;
/// Chip id register. Writing it re-addresses the chip.
pub const REG_CHIP_ID: u8 = 0x01;
/// Upstream-transmit lane enable bitmap.
pub const REG_ENABLE_PISO_UPSTREAM: u8 = 0x02;
/// Downstream-transmit lane enable bitmap.
pub const REG_ENABLE_PISO_DOWNSTREAM: u8 = 0x03;
/// Receive lane enable bitmap.
pub const REG_ENABLE_POSI: u8 = 0x04;
/// First per-lane transmit bias register.
pub const REG_I_TX_DIFF_BASE: u8 = 0x05;
/// First per-lane transmit slice register.
pub const REG_TX_SLICES_BASE: u8 = 0x09;
/// First per-lane receive termination register.
pub const REG_R_TERM_BASE: u8 = 0x0d;
/// First per-lane receive bias register.
pub const REG_I_RX_BASE: u8 = 0x11;
/// Master reference current trim.
pub const REG_REF_CURRENT_TRIM: u8 = 0x15;
/// First CSA enable bitmap register.
pub const REG_CSA_ENABLE_BASE: u8 = 0x16;
/// First channel mask bitmap register.
pub const REG_CHANNEL_MASK_BASE: u8 = 0x1e;
/// Total configuration registers per chip.
pub const NUM_REGISTERS: usize = 0x26;

/// Quiescent transmit bias restored by a lossy lane disable.
pub const QUIESCENT_TX_DIFF: u8 = 15;
/// Quiescent transmit slice count restored by a lossy lane disable.
pub const QUIESCENT_TX_SLICES: u8 = 0;

/// Transmit bias register for one lane.
#[must_use]
pub const fn i_tx_diff_reg(lane: u8) -> u8 {
    REG_I_TX_DIFF_BASE + lane
}

/// Transmit slice register for one lane.
#[must_use]
pub const fn tx_slices_reg(lane: u8) -> u8 {
    REG_TX_SLICES_BASE + lane
}

/// Receive termination register for one lane.
#[must_use]
pub const fn r_term_reg(lane: u8) -> u8 {
    REG_R_TERM_BASE + lane
}

/// Receive bias register for one lane.
#[must_use]
pub const fn i_rx_reg(lane: u8) -> u8 {
    REG_I_RX_BASE + lane
}

/// The eight CSA enable bitmap registers.
pub const CSA_ENABLE_REGS: [u8; 8] = bitmap_regs(REG_CSA_ENABLE_BASE);
/// The eight channel mask bitmap registers.
pub const CHANNEL_MASK_REGS: [u8; 8] = bitmap_regs(REG_CHANNEL_MASK_BASE);

const fn bitmap_regs(base: u8) -> [u8; 8] {
    [base, base + 1, base + 2, base + 3, base + 4, base + 5, base + 6, base + 7]
}

/// All register addresses, for full-image reconciliation.
pub fn all_registers() -> impl Iterator<Item = u8> {
    0..NUM_REGISTERS as u8
}

/// Local model of one chip's configuration.
///
/// `Default` is the power-on state of a fresh chip: listening at the setup
/// address, all lanes disabled, transmitters at their quiescent trim, every
/// front-end CSA live and no channel masked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChipConfig {
    /// Chip id the device answers to.
    pub chip_id: u8,
    /// Upstream-transmit lane enables.
    pub enable_piso_upstream: [bool; 4],
    /// Downstream-transmit lane enables.
    pub enable_piso_downstream: [bool; 4],
    /// Receive lane enables.
    pub enable_posi: [bool; 4],
    /// Per-lane transmit bias.
    pub i_tx_diff: [u8; 4],
    /// Per-lane transmit slices.
    pub tx_slices: [u8; 4],
    /// Per-lane receive termination.
    pub r_term: [u8; 4],
    /// Per-lane receive bias.
    pub i_rx: [u8; 4],
    /// Master reference current trim.
    pub ref_current_trim: u8,
    /// 64-channel CSA enable bitmap.
    pub csa_enable: u64,
    /// 64-channel mask bitmap.
    pub channel_mask: u64,
    /// Non-physical scratch register.
    pub reserved: u8,
}

impl Default for ChipConfig {
    fn default() -> Self {
        Self {
            chip_id: SETUP_CHIP_ID,
            enable_piso_upstream: [false; 4],
            enable_piso_downstream: [false; 4],
            enable_posi: [false; 4],
            i_tx_diff: [QUIESCENT_TX_DIFF; 4],
            tx_slices: [QUIESCENT_TX_SLICES; 4],
            r_term: [0; 4],
            i_rx: [0; 4],
            ref_current_trim: 16,
            csa_enable: u64::MAX,
            channel_mask: 0,
            reserved: 0,
        }
    }
}

impl ChipConfig {
    /// Local value of one register, `None` for addresses past the map.
    #[must_use]
    pub fn register_value(&self, register: u8) -> Option<u8> {
        Some(match register {
            REG_RESERVED => self.reserved,
            REG_CHIP_ID => self.chip_id,
            REG_ENABLE_PISO_UPSTREAM => pack_lanes(self.enable_piso_upstream),
            REG_ENABLE_PISO_DOWNSTREAM => pack_lanes(self.enable_piso_downstream),
            REG_ENABLE_POSI => pack_lanes(self.enable_posi),
            r if (REG_I_TX_DIFF_BASE..REG_I_TX_DIFF_BASE + 4).contains(&r) => {
                self.i_tx_diff[(r - REG_I_TX_DIFF_BASE) as usize]
            }
            r if (REG_TX_SLICES_BASE..REG_TX_SLICES_BASE + 4).contains(&r) => {
                self.tx_slices[(r - REG_TX_SLICES_BASE) as usize]
            }
            r if (REG_R_TERM_BASE..REG_R_TERM_BASE + 4).contains(&r) => {
                self.r_term[(r - REG_R_TERM_BASE) as usize]
            }
            r if (REG_I_RX_BASE..REG_I_RX_BASE + 4).contains(&r) => {
                self.i_rx[(r - REG_I_RX_BASE) as usize]
            }
            REG_REF_CURRENT_TRIM => self.ref_current_trim,
            r if (REG_CSA_ENABLE_BASE..REG_CSA_ENABLE_BASE + 8).contains(&r) => {
                bitmap_byte(self.csa_enable, r - REG_CSA_ENABLE_BASE)
            }
            r if (REG_CHANNEL_MASK_BASE..REG_CHANNEL_MASK_BASE + 8).contains(&r) => {
                bitmap_byte(self.channel_mask, r - REG_CHANNEL_MASK_BASE)
            }
            _ => return None,
        })
    }

    /// The full register image.
    #[must_use]
    pub fn encode(&self) -> [u8; NUM_REGISTERS] {
        let mut image = [0u8; NUM_REGISTERS];
        for (reg, slot) in image.iter_mut().enumerate() {
            // every address below NUM_REGISTERS is mapped
            *slot = self.register_value(reg as u8).unwrap_or(0);
        }
        image
    }

    /// Number of currently enabled POSI lanes.
    #[must_use]
    pub fn enabled_posi_lanes(&self) -> usize {
        self.enable_posi.iter().filter(|e| **e).count()
    }
}

fn pack_lanes(lanes: [bool; 4]) -> u8 {
    lanes
        .iter()
        .enumerate()
        .fold(0u8, |acc, (i, on)| if *on { acc | (1 << i) } else { acc })
}

fn bitmap_byte(bitmap: u64, byte: u8) -> u8 {
    (bitmap >> (8 * u32::from(byte))) as u8
}

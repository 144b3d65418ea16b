//! Per-chip bring-up procedures.
//!
//! Four directional sub-procedures (parent transmit/receive, daughter
//! receive/transmit) composed from the link algebra, each pushed through the
//! reconciliation engine. [`attempt_link`] runs the full sequence for one
//! parent/daughter pair and rolls the parent back on failure — best effort:
//! rollback writes are fire-and-forget and are not themselves retried.

use crate::bus::BusTransport;
use crate::controller::Controller;
use crate::error::Result;
use crate::reconcile::{reconcile_chip, ReconcileOptions};
use cascade_chip::config::{
    i_rx_reg, i_tx_diff_reg, r_term_reg, tx_slices_reg, CHANNEL_MASK_REGS, CSA_ENABLE_REGS,
    QUIESCENT_TX_DIFF, QUIESCENT_TX_SLICES, REG_CHIP_ID, REG_ENABLE_PISO_DOWNSTREAM,
    REG_ENABLE_PISO_UPSTREAM, REG_ENABLE_POSI, REG_REF_CURRENT_TRIM, REG_RESERVED,
};
use cascade_chip::link;
use cascade_chip::ChipKey;
use tracing::{debug, info, warn};

/// Link tuning parameters, applied to every lane brought up.
#[derive(Debug, Clone, Copy)]
pub struct TuningParams {
    /// Transmit bias per slice.
    pub tx_diff: u8,
    /// Transmit slice count.
    pub tx_slices: u8,
    /// Master reference current trim.
    pub ref_current_trim: u8,
    /// Receive termination.
    pub r_term: u8,
    /// Receive bias.
    pub i_rx: u8,
    /// Reconciliation bounds used throughout bring-up.
    pub reconcile: ReconcileOptions,
}

impl Default for TuningParams {
    fn default() -> Self {
        Self {
            tx_diff: 0,
            tx_slices: 15,
            ref_current_trim: 16,
            r_term: 2,
            i_rx: 8,
            reconcile: ReconcileOptions::default(),
        }
    }
}

/// Outcome of one parent → daughter link attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkAttempt {
    /// Daughter addressed, linked and verified.
    Configured {
        /// Daughter downstream-transmit lane that was enabled.
        piso_lane: u8,
    },
    /// The parent's upstream-transmit enable did not verify; nothing was
    /// changed on the daughter side.
    ParentTxFailed,
    /// The daughter did not verify; parent lanes were rolled back and the
    /// daughter evicted from the working set.
    DaughterFailed {
        /// Daughter downstream-transmit lane that had been enabled.
        piso_lane: u8,
    },
}

/// Address a chip: write the chip-id register through the setup address,
/// then re-assert it at the new address (the silicon may retain a stale id
/// across resets, so the id is always written twice).
///
/// Write failures are silent here; they surface through the caller's next
/// reconcile.
///
/// # Errors
///
/// Returns an error only for working-set misuse.
pub fn assign_chip_id<B: BusTransport>(
    ctrl: &mut Controller<B>,
    io_group: u8,
    io_channel: u8,
    chip_id: u8,
) -> Result<ChipKey> {
    let setup = ChipKey::setup_key(io_group, io_channel);
    ctrl.ensure_chip(setup);
    ctrl.config_mut(setup)?.chip_id = chip_id;
    ctrl.write_registers(setup, &[REG_CHIP_ID])?;
    ctrl.remove_chip(setup);

    let key = ChipKey::new(io_group, io_channel, chip_id);
    ctrl.ensure_chip(key);
    ctrl.config_mut(key)?.chip_id = chip_id;
    ctrl.write_registers(key, &[REG_CHIP_ID])?;
    debug!(%key, "chip id assigned");
    Ok(key)
}

/// Quiet the trigger front-end: scratch register zeroed, every CSA off,
/// every channel masked, reference current trimmed.
///
/// # Errors
///
/// Returns an error only for working-set misuse.
pub fn quiesce_trigger_frontend<B: BusTransport>(
    ctrl: &mut Controller<B>,
    key: ChipKey,
    params: &TuningParams,
) -> Result<()> {
    let cfg = ctrl.config_mut(key)?;
    cfg.reserved = 0;
    ctrl.write_registers(key, &[REG_RESERVED])?;

    ctrl.config_mut(key)?.csa_enable = 0;
    ctrl.write_registers(key, &CSA_ENABLE_REGS)?;

    ctrl.config_mut(key)?.channel_mask = u64::MAX;
    ctrl.write_registers(key, &CHANNEL_MASK_REGS)?;

    ctrl.config_mut(key)?.ref_current_trim = params.ref_current_trim;
    ctrl.write_registers(key, &[REG_REF_CURRENT_TRIM])
}

/// Enable the parent's upstream-transmit lane facing `daughter_id` and
/// apply transmit trims. Returns the lane.
///
/// # Errors
///
/// `InvalidOffset` if the pair are not neighbors.
pub fn enable_parent_piso_us<B: BusTransport>(
    ctrl: &mut Controller<B>,
    parent: ChipKey,
    daughter_id: u8,
    params: &TuningParams,
) -> Result<u8> {
    let lane = link::parent_piso_us_lane(link::delta(parent.chip_id, daughter_id))?;
    debug!(%parent, daughter_id, lane, "enable parent PISO-US");

    let cfg = ctrl.config_mut(parent)?;
    cfg.enable_piso_upstream[lane as usize] = true;
    ctrl.write_registers(parent, &[REG_ENABLE_PISO_UPSTREAM])?;

    let cfg = ctrl.config_mut(parent)?;
    cfg.i_tx_diff[lane as usize] = params.tx_diff;
    cfg.tx_slices[lane as usize] = params.tx_slices;
    ctrl.write_registers(parent, &[i_tx_diff_reg(lane), tx_slices_reg(lane)])?;
    Ok(lane)
}

/// Disable the parent's upstream-transmit lane facing `daughter_id`.
///
/// Lossy: the transmit trims are restored to the quiescent values, not to
/// whatever they were before the enable.
///
/// # Errors
///
/// `InvalidOffset` if the pair are not neighbors.
pub fn disable_parent_piso_us<B: BusTransport>(
    ctrl: &mut Controller<B>,
    parent: ChipKey,
    daughter_id: u8,
) -> Result<()> {
    let lane = link::parent_piso_us_lane(link::delta(parent.chip_id, daughter_id))?;
    debug!(%parent, daughter_id, lane, "disable parent PISO-US");

    let cfg = ctrl.config_mut(parent)?;
    cfg.enable_piso_upstream[lane as usize] = false;
    ctrl.write_registers(parent, &[REG_ENABLE_PISO_UPSTREAM])?;

    let cfg = ctrl.config_mut(parent)?;
    cfg.i_tx_diff[lane as usize] = QUIESCENT_TX_DIFF;
    cfg.tx_slices[lane as usize] = QUIESCENT_TX_SLICES;
    ctrl.write_registers(parent, &[i_tx_diff_reg(lane), tx_slices_reg(lane)])
}

/// Enable the parent's receive lane facing `daughter_id` with termination
/// and bias.
///
/// # Errors
///
/// `InvalidOffset` if the pair are not neighbors.
pub fn enable_parent_posi<B: BusTransport>(
    ctrl: &mut Controller<B>,
    parent: ChipKey,
    daughter_id: u8,
    params: &TuningParams,
) -> Result<()> {
    let lane = link::parent_posi_lane(link::delta(parent.chip_id, daughter_id))?;
    debug!(%parent, daughter_id, lane, "enable parent POSI");

    let cfg = ctrl.config_mut(parent)?;
    cfg.enable_posi[lane as usize] = true;
    ctrl.write_registers(parent, &[REG_ENABLE_POSI])?;

    let cfg = ctrl.config_mut(parent)?;
    cfg.r_term[lane as usize] = params.r_term;
    cfg.i_rx[lane as usize] = params.i_rx;
    ctrl.write_registers(parent, &[r_term_reg(lane), i_rx_reg(lane)])
}

/// Disable the parent's receive lane facing `daughter_id`.
///
/// When this is the sole enabled receive lane, the bitmap is flipped to
/// "all other lanes open, this one closed" instead of a clean single-bit
/// clear. Deliberate failure-recovery policy carried from the bring-up
/// procedure this driver replaces; do not "fix" it to a plain clear.
///
/// # Errors
///
/// `InvalidOffset` if the pair are not neighbors.
pub fn disable_parent_posi<B: BusTransport>(
    ctrl: &mut Controller<B>,
    parent: ChipKey,
    daughter_id: u8,
) -> Result<()> {
    let lane = link::parent_posi_lane(link::delta(parent.chip_id, daughter_id))?;
    debug!(%parent, daughter_id, lane, "disable parent POSI");

    let cfg = ctrl.config_mut(parent)?;
    if cfg.enabled_posi_lanes() == 1 {
        cfg.enable_posi = [true; 4];
    }
    cfg.enable_posi[lane as usize] = false;
    ctrl.write_registers(parent, &[REG_ENABLE_POSI])
}

/// Point the daughter's receive bitmap at its parent: full reset to
/// all-zero, then the single target lane. The daughter was just addressed,
/// so there is no prior state to preserve.
///
/// # Errors
///
/// `InvalidOffset` if the pair are not neighbors.
pub fn enable_daughter_posi<B: BusTransport>(
    ctrl: &mut Controller<B>,
    daughter: ChipKey,
    parent_id: u8,
    params: &TuningParams,
) -> Result<()> {
    let lane = link::daughter_posi_lane(link::delta(parent_id, daughter.chip_id))?;
    debug!(%daughter, parent_id, lane, "enable daughter POSI");

    let cfg = ctrl.config_mut(daughter)?;
    cfg.enable_posi = [false; 4];
    cfg.enable_posi[lane as usize] = true;
    ctrl.write_registers(daughter, &[REG_ENABLE_POSI])?;

    let cfg = ctrl.config_mut(daughter)?;
    cfg.r_term[lane as usize] = params.r_term;
    cfg.i_rx[lane as usize] = params.i_rx;
    ctrl.write_registers(daughter, &[r_term_reg(lane), i_rx_reg(lane)])
}

/// Point the daughter's downstream transmitter at its parent: upstream
/// transmitters all off, downstream reset then the single target lane.
/// Returns the downstream lane.
///
/// # Errors
///
/// `InvalidOffset` if the pair are not neighbors.
pub fn enable_daughter_piso<B: BusTransport>(
    ctrl: &mut Controller<B>,
    daughter: ChipKey,
    parent_id: u8,
    params: &TuningParams,
) -> Result<u8> {
    let cfg = ctrl.config_mut(daughter)?;
    cfg.enable_piso_upstream = [false; 4];
    ctrl.write_registers(daughter, &[REG_ENABLE_PISO_UPSTREAM])?;

    let lane = link::daughter_piso_ds_lane(link::delta(parent_id, daughter.chip_id))?;
    debug!(%daughter, parent_id, lane, "enable daughter PISO-DS");

    let cfg = ctrl.config_mut(daughter)?;
    cfg.enable_piso_downstream = [false; 4];
    cfg.enable_piso_downstream[lane as usize] = true;
    ctrl.write_registers(daughter, &[REG_ENABLE_PISO_DOWNSTREAM])?;

    let cfg = ctrl.config_mut(daughter)?;
    cfg.i_tx_diff[lane as usize] = params.tx_diff;
    cfg.tx_slices[lane as usize] = params.tx_slices;
    ctrl.write_registers(daughter, &[i_tx_diff_reg(lane), tx_slices_reg(lane)])?;
    Ok(lane)
}

/// Run the full bring-up sequence for one parent → daughter link:
/// parent transmit → address daughter → daughter receive → daughter
/// transmit → parent receive → quiesce trigger front-end → verify.
///
/// On failure the parent-side enables are rolled back and the daughter is
/// evicted, so the id can be retried under a different parent later.
///
/// # Errors
///
/// `InvalidOffset` for a non-neighbor pair, `UnknownChip` for an absent
/// parent. Verify failures are outcomes, not errors.
pub fn attempt_link<B: BusTransport>(
    ctrl: &mut Controller<B>,
    parent: ChipKey,
    daughter_id: u8,
    params: &TuningParams,
) -> Result<LinkAttempt> {
    enable_parent_piso_us(ctrl, parent, daughter_id, params)?;
    let parent_check = reconcile_chip(ctrl, parent, params.reconcile)?;
    if !parent_check.ok {
        warn!(%parent, daughter_id, "parent PISO-US failed to configure");
        disable_parent_piso_us(ctrl, parent, daughter_id)?;
        return Ok(LinkAttempt::ParentTxFailed);
    }

    let daughter = assign_chip_id(ctrl, parent.io_group, parent.io_channel, daughter_id)?;
    enable_daughter_posi(ctrl, daughter, parent.chip_id, params)?;
    let piso_lane = enable_daughter_piso(ctrl, daughter, parent.chip_id, params)?;
    enable_parent_posi(ctrl, parent, daughter_id, params)?;
    quiesce_trigger_frontend(ctrl, daughter, params)?;

    let daughter_check = reconcile_chip(ctrl, daughter, params.reconcile)?;
    if daughter_check.ok {
        info!(%daughter, %parent, piso_lane, "daughter configured");
        Ok(LinkAttempt::Configured { piso_lane })
    } else {
        warn!(%daughter, %parent, "daughter failed to configure");
        disable_parent_piso_us(ctrl, parent, daughter_id)?;
        disable_parent_posi(ctrl, parent, daughter_id)?;
        ctrl.remove_chip(daughter);
        Ok(LinkAttempt::DaughterFailed { piso_lane })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimBus;

    fn chain(ids: &[u8]) -> Controller<SimBus> {
        Controller::new(SimBus::new().with_chain(1, 1, ids))
    }

    #[test]
    fn assign_writes_the_id_twice() {
        let mut ctrl = chain(&[21]);
        let key = assign_chip_id(&mut ctrl, 1, 1, 21).unwrap();

        let setup = ChipKey::setup_key(1, 1);
        assert_eq!(ctrl.bus().write_count(setup, REG_CHIP_ID), 1);
        assert_eq!(ctrl.bus().write_count(key, REG_CHIP_ID), 1);
        assert!(!ctrl.contains_id(cascade_chip::key::SETUP_CHIP_ID));
        assert!(ctrl.contains_id(21));
    }

    #[test]
    fn parent_posi_disable_keeps_other_lanes_open_when_sole_lane() {
        let mut ctrl = chain(&[22]);
        let parent = assign_chip_id(&mut ctrl, 1, 1, 22).unwrap();
        let params = TuningParams::default();

        // single enabled lane toward daughter 23 (Δ = −1 → POSI lane 3)
        enable_parent_posi(&mut ctrl, parent, 23, &params).unwrap();
        assert_eq!(ctrl.config(parent).unwrap().enabled_posi_lanes(), 1);

        disable_parent_posi(&mut ctrl, parent, 23).unwrap();
        assert_eq!(ctrl.config(parent).unwrap().enable_posi, [true, true, true, false]);
    }

    #[test]
    fn parent_posi_disable_clears_one_bit_when_several_enabled() {
        let mut ctrl = chain(&[22]);
        let parent = assign_chip_id(&mut ctrl, 1, 1, 22).unwrap();
        let params = TuningParams::default();

        enable_parent_posi(&mut ctrl, parent, 23, &params).unwrap(); // lane 3
        enable_parent_posi(&mut ctrl, parent, 21, &params).unwrap(); // lane 1

        disable_parent_posi(&mut ctrl, parent, 23).unwrap();
        assert_eq!(ctrl.config(parent).unwrap().enable_posi, [false, true, false, false]);
    }

    #[test]
    fn piso_disable_restores_quiescent_trims() {
        let mut ctrl = chain(&[22]);
        let parent = assign_chip_id(&mut ctrl, 1, 1, 22).unwrap();
        let params = TuningParams { tx_diff: 3, tx_slices: 9, ..TuningParams::default() };

        let lane = enable_parent_piso_us(&mut ctrl, parent, 23, &params).unwrap();
        assert_eq!(ctrl.config(parent).unwrap().i_tx_diff[lane as usize], 3);

        disable_parent_piso_us(&mut ctrl, parent, 23).unwrap();
        let cfg = ctrl.config(parent).unwrap();
        assert!(!cfg.enable_piso_upstream[lane as usize]);
        assert_eq!(cfg.i_tx_diff[lane as usize], QUIESCENT_TX_DIFF);
        assert_eq!(cfg.tx_slices[lane as usize], QUIESCENT_TX_SLICES);
    }

    #[test]
    fn non_neighbor_pair_is_a_programming_error() {
        let mut ctrl = chain(&[21]);
        let parent = assign_chip_id(&mut ctrl, 1, 1, 21).unwrap();
        let err = enable_parent_piso_us(&mut ctrl, parent, 24, &TuningParams::default());
        assert!(err.is_err());
    }
}

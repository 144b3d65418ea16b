//! Tile bring-up orchestration.
//!
//! Ties the phases together: address and configure the root chip of each
//! channel, walk each root's chain, then iterate the waitlist to a
//! fixpoint. The result is the working set held by the controller plus a
//! report of what could not be reached.

use crate::bringup::{assign_chip_id, quiesce_trigger_frontend, TuningParams};
use crate::bus::BusTransport;
use crate::controller::Controller;
use crate::error::Result;
use crate::reconcile::reconcile_chip;
use crate::waitlist::{iterate_waitlist, Gate, UnresolvedChip};
use crate::walk::walk_root;
use cascade_chip::config::{
    i_tx_diff_reg, r_term_reg, tx_slices_reg, REG_ENABLE_PISO_DOWNSTREAM,
    REG_ENABLE_PISO_UPSTREAM, REG_ENABLE_POSI,
};
use cascade_chip::ChipKey;
use std::collections::BTreeSet;
use std::ops::RangeInclusive;
use tracing::{info, warn};

/// Default root chip ids, paired positionally with a tile's four channels.
pub const DEFAULT_ROOT_IDS: [u8; 4] = [21, 41, 71, 91];

/// Chip ids a channel is responsible for, derived from its root.
///
/// Each channel owns its root's row plus one or both adjacent rows,
/// depending on where the channel sits on the tile (channel number mod 4).
#[must_use]
pub fn channel_span(io_channel: u8, root_id: u8) -> RangeInclusive<u8> {
    match io_channel % 4 {
        2 => root_id..=root_id + 19,
        3 => root_id - 10..=root_id + 9,
        _ => root_id - 10..=root_id + 19,
    }
}

/// One channel's root: where discovery starts and which ids the channel
/// answers for.
#[derive(Debug, Clone)]
pub struct RootAssignment {
    /// Bridge I/O group.
    pub io_group: u8,
    /// UART channel on the bridge.
    pub io_channel: u8,
    /// Chip id assigned to the root.
    pub chip_id: u8,
    span: Option<(u8, u8)>,
}

impl RootAssignment {
    /// Root with the default span for its channel.
    #[must_use]
    pub fn new(io_group: u8, io_channel: u8, chip_id: u8) -> Self {
        Self { io_group, io_channel, chip_id, span: None }
    }

    /// Override the id span the channel answers for.
    #[must_use]
    pub fn with_span(mut self, first: u8, last: u8) -> Self {
        self.span = Some((first, last));
        self
    }

    /// Key of the root chip.
    #[must_use]
    pub fn key(&self) -> ChipKey {
        ChipKey::new(self.io_group, self.io_channel, self.chip_id)
    }

    /// Ids this channel answers for.
    #[must_use]
    pub fn span(&self) -> RangeInclusive<u8> {
        match self.span {
            Some((first, last)) => first..=last,
            None => channel_span(self.io_channel, self.chip_id),
        }
    }
}

/// Default layout for one tile: channels 1–4 for tile 1, 5–8 for tile 2,
/// roots 21/41/71/91 in channel order.
#[must_use]
pub fn default_root_assignments(io_group: u8, tile: u8) -> Vec<RootAssignment> {
    let first_channel = if tile == 2 { 5 } else { 1 };
    DEFAULT_ROOT_IDS
        .iter()
        .enumerate()
        .map(|(i, &id)| RootAssignment::new(io_group, first_channel + i as u8, id))
        .collect()
}

/// Everything a bring-up run produces besides the working set itself.
#[derive(Debug)]
pub struct DiscoveryReport {
    /// Roots that configured and were walked.
    pub roots: Vec<ChipKey>,
    /// Ids never brought into the working set, with the lanes attempted
    /// during the final waitlist pass.
    pub unresolved: Vec<UnresolvedChip>,
}

/// Address and configure one root chip.
///
/// The root receives from the bridge on POSI lane 1 and transmits back on
/// PISO-DS lane 0; its upstream transmitters start all-off and are opened
/// lane by lane as the walk extends. On verify failure the root is left
/// listening on every chip-facing receive lane, with its downstream
/// transmitter silenced, then evicted; its span falls to the waitlist.
///
/// # Errors
///
/// Returns an error only for working-set misuse.
pub fn setup_root<B: BusTransport>(
    ctrl: &mut Controller<B>,
    root: &RootAssignment,
    params: &TuningParams,
) -> Result<bool> {
    let key = assign_chip_id(ctrl, root.io_group, root.io_channel, root.chip_id)?;

    let cfg = ctrl.config_mut(key)?;
    cfg.enable_posi = [false, true, false, false];
    ctrl.write_registers(key, &[REG_ENABLE_POSI])?;
    let cfg = ctrl.config_mut(key)?;
    cfg.r_term[1] = params.r_term;
    cfg.r_term[0] = params.r_term;
    ctrl.write_registers(key, &[r_term_reg(1), r_term_reg(0)])?;

    quiesce_trigger_frontend(ctrl, key, params)?;

    let cfg = ctrl.config_mut(key)?;
    cfg.enable_piso_downstream = [true, false, false, false];
    ctrl.write_registers(key, &[REG_ENABLE_PISO_DOWNSTREAM])?;
    let cfg = ctrl.config_mut(key)?;
    cfg.enable_piso_upstream = [false; 4];
    ctrl.write_registers(key, &[REG_ENABLE_PISO_UPSTREAM])?;
    let cfg = ctrl.config_mut(key)?;
    cfg.i_tx_diff[0] = params.tx_diff;
    cfg.tx_slices[0] = params.tx_slices;
    ctrl.write_registers(key, &[i_tx_diff_reg(0), tx_slices_reg(0)])?;

    ctrl.select_channel(root.io_group, root.io_channel);
    let check = reconcile_chip(ctrl, key, params.reconcile)?;
    if !check.ok {
        warn!(%key, "root failed to configure");
        let cfg = ctrl.config_mut(key)?;
        cfg.enable_posi = [false, true, true, true];
        ctrl.write_registers(key, &[REG_ENABLE_POSI])?;
        let cfg = ctrl.config_mut(key)?;
        cfg.enable_piso_downstream = [false; 4];
        ctrl.write_registers(key, &[REG_ENABLE_PISO_DOWNSTREAM])?;
        let _ = reconcile_chip(ctrl, key, params.reconcile)?;
        ctrl.remove_chip(key);
    } else {
        info!(%key, "root configured");
    }
    ctrl.release_channel();
    Ok(check.ok)
}

/// Run the full discovery sequence over `roots`.
///
/// # Errors
///
/// Returns an error only for working-set/link-algebra misuse; chips that
/// fail to verify end up in the report, not in an `Err`.
pub fn run_discovery<B: BusTransport, G: Gate>(
    ctrl: &mut Controller<B>,
    roots: &[RootAssignment],
    params: &TuningParams,
    gate: &mut G,
) -> Result<DiscoveryReport> {
    let mut configured_roots = Vec::new();
    for root in roots {
        if setup_root(ctrl, root, params)? {
            configured_roots.push(root.key());
        }
    }
    info!(roots = configured_roots.len(), "roots configured");

    let mut walk_waitlist = BTreeSet::new();
    for &root in &configured_roots {
        walk_root(ctrl, root, params, &mut walk_waitlist)?;
    }

    let unresolved = iterate_waitlist(ctrl, roots, params, gate)?;
    info!(
        configured = ctrl.chip_count(),
        unresolved = unresolved.len(),
        "discovery complete"
    );
    Ok(DiscoveryReport { roots: configured_roots, unresolved })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimBus;

    #[test]
    fn spans_reproduce_the_stock_tile_layout() {
        assert_eq!(channel_span(1, 21), 11..=40);
        assert_eq!(channel_span(2, 41), 41..=60);
        assert_eq!(channel_span(3, 71), 61..=80);
        assert_eq!(channel_span(4, 91), 81..=110);
    }

    #[test]
    fn tile_two_uses_upper_channels() {
        let roots = default_root_assignments(2, 2);
        let channels: Vec<u8> = roots.iter().map(|r| r.io_channel).collect();
        assert_eq!(channels, vec![5, 6, 7, 8]);
        assert_eq!(roots[2].chip_id, 71);
    }

    #[test]
    fn root_setup_configures_bridge_facing_lanes() {
        let mut ctrl = Controller::new(SimBus::new().with_chain(1, 1, &[21]));
        let root = RootAssignment::new(1, 1, 21);
        let ok = setup_root(&mut ctrl, &root, &TuningParams::default()).unwrap();
        assert!(ok);

        let cfg = ctrl.config(root.key()).unwrap();
        assert_eq!(cfg.enable_posi, [false, true, false, false]);
        assert_eq!(cfg.enable_piso_downstream, [true, false, false, false]);
        assert_eq!(cfg.enable_piso_upstream, [false; 4]);
        assert_eq!(cfg.tx_slices[0], 15);
        assert_eq!(cfg.csa_enable, 0);
        assert_eq!(cfg.channel_mask, u64::MAX);
    }

    #[test]
    fn absent_root_is_evicted() {
        let mut ctrl = Controller::new(SimBus::new());
        let root = RootAssignment::new(1, 1, 21);
        let ok = setup_root(&mut ctrl, &root, &TuningParams::default()).unwrap();
        assert!(!ok);
        assert_eq!(ctrl.chip_count(), 0);
    }
}

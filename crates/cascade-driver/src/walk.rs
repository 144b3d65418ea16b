//! Initial discovery walk.
//!
//! From each root chip, extend the chain through ids `root+1 ..= root+9`.
//! At every step the three non-ancestor parent directions are tried in
//! fixed priority: the ±10 rows first (PISO-US lanes 3 and 1), then the +1
//! column (lane 2) that carries the rest of the chain. Failure handling is
//! asymmetric: a parent-transmit failure, or a daughter failure on the
//! load-bearing lane 2, ends the whole root's walk; a daughter failure on
//! the row lanes only waitlists that single id.

use crate::bringup::{attempt_link, LinkAttempt, TuningParams};
use crate::bus::BusTransport;
use crate::controller::Controller;
use crate::error::Result;
use crate::reconcile::reconcile_chip;
use cascade_chip::key::{is_assignable_id, CHIP_ID_MAX};
use cascade_chip::link;
use cascade_chip::ChipKey;
use std::collections::BTreeSet;
use tracing::{debug, info, warn};

/// Parent PISO-US lanes in walk priority order: +10 row, −10 row, +1 column.
pub const WALK_LANE_PRIORITY: [u8; 3] = [3, 1, 2];

/// Walk progress for one root.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WalkState {
    /// Still extending the chain.
    Extending,
    /// A load-bearing link failed; the rest of this root is unreachable
    /// through the walk and is left to the waitlist fixpoint.
    Bailed,
}

/// Seed the waitlist with every id unreachable without the link at
/// `from_id`, per the channel's enumeration rule.
///
/// Channels cover their span differently depending on where they sit on the
/// tile (channel number mod 4): edge channels lose one adjacent row, inner
/// channels lose both.
pub fn seed_unreachable(io_channel: u8, root_id: u8, from_id: u8, waitlist: &mut BTreeSet<u8>) {
    let mut insert = |id: i16| {
        if id >= 0 && id <= i16::from(CHIP_ID_MAX) && is_assignable_id(id as u8) {
            waitlist.insert(id as u8);
        }
    };
    let end = i16::from(root_id) + 10;
    for i in i16::from(from_id)..end {
        insert(i);
        match io_channel % 4 {
            1 | 0 => {
                insert(i - 10);
                insert(i + 10);
            }
            2 => insert(i + 10),
            _ => insert(i - 10),
        }
    }
}

/// Walk one root's chain, recording unreached ids into `waitlist`.
///
/// The waitlist collected here is diagnostic: the fixpoint recomputes its
/// own worklist from the working set. Returns the number of daughters
/// configured under this root.
///
/// # Errors
///
/// Propagates only working-set/link-algebra misuse; per-chip verify
/// failures degrade to waitlist entries.
pub fn walk_root<B: BusTransport>(
    ctrl: &mut Controller<B>,
    root: ChipKey,
    params: &TuningParams,
    waitlist: &mut BTreeSet<u8>,
) -> Result<usize> {
    let root_id = root.chip_id;

    // the root must still verify before anything is chained off it
    ctrl.select_channel(root.io_group, root.io_channel);
    let root_check = reconcile_chip(ctrl, root, params.reconcile)?;
    ctrl.release_channel();
    if !root_check.ok {
        warn!(%root, "root failed to reconcile, seeding its whole span");
        seed_unreachable(root.io_channel, root_id, root_id, waitlist);
        return Ok(0);
    }

    let mut configured = 0usize;
    let mut state = WalkState::Extending;
    let mut last = root_id;

    while state == WalkState::Extending && last <= root_id + 9 {
        let mut next = last;
        for lane in WALK_LANE_PRIORITY {
            if state == WalkState::Bailed {
                break;
            }
            let daughter_id = link::daughter_id_for_piso_lane(lane, last)?;
            next = daughter_id;
            if !is_assignable_id(daughter_id) || ctrl.contains_id(daughter_id) {
                continue;
            }
            let parent = root.sibling(last);

            ctrl.select_channel(root.io_group, root.io_channel);
            match attempt_link(ctrl, parent, daughter_id, params)? {
                LinkAttempt::Configured { .. } => {
                    configured += 1;
                    debug!(%parent, daughter_id, lane, "walk extended");
                }
                LinkAttempt::ParentTxFailed => {
                    seed_unreachable(root.io_channel, root_id, daughter_id, waitlist);
                    state = WalkState::Bailed;
                }
                LinkAttempt::DaughterFailed { .. } if lane == 2 => {
                    // the +1 column carries the rest of the chain
                    seed_unreachable(root.io_channel, root_id, daughter_id, waitlist);
                    state = WalkState::Bailed;
                }
                LinkAttempt::DaughterFailed { .. } => {
                    waitlist.insert(daughter_id);
                }
            }
            ctrl.release_channel();
        }
        last = next;
    }

    info!(%root, configured, waitlisted = waitlist.len(), "walk complete");
    Ok(configured)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded(io_channel: u8, root_id: u8, from_id: u8) -> BTreeSet<u8> {
        let mut wl = BTreeSet::new();
        seed_unreachable(io_channel, root_id, from_id, &mut wl);
        wl
    }

    #[test]
    fn inner_channel_seeds_both_rows() {
        let wl = seeded(1, 21, 23);
        assert!(wl.contains(&23));
        assert!(wl.contains(&13));
        assert!(wl.contains(&33));
        assert!(wl.contains(&30));
        assert!(!wl.contains(&41));
    }

    #[test]
    fn forward_channel_seeds_upper_row_only() {
        let wl = seeded(2, 41, 45);
        assert!(wl.contains(&45));
        assert!(wl.contains(&55));
        assert!(!wl.contains(&35));
    }

    #[test]
    fn backward_channel_seeds_lower_row_only() {
        let wl = seeded(3, 71, 75);
        assert!(wl.contains(&75));
        assert!(wl.contains(&65));
        assert!(!wl.contains(&85));
    }

    #[test]
    fn seeding_from_span_end_is_empty() {
        assert!(seeded(1, 21, 31).is_empty());
    }
}

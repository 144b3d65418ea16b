//! Waitlist fixpoint.
//!
//! After the initial walks, every id in the tile's spans that is not in the
//! working set is retried against all topologically-plausible parents that
//! *are* configured. Passes repeat until a full pass resolves nothing. An
//! injected [`Gate`] may veto individual attempts or stop the loop between
//! passes; the default gate is headless and always proceeds.

use crate::bringup::{attempt_link, LinkAttempt, TuningParams};
use crate::bus::BusTransport;
use crate::controller::Controller;
use crate::error::Result;
use crate::run::RootAssignment;
use cascade_chip::link;
use cascade_chip::ChipKey;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};

/// Decision for one waitlist attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Run the attempt.
    Proceed,
    /// Skip this parent and move on.
    Skip,
}

/// External veto hook for waitlist iteration.
///
/// Implementations can prompt a user, consult a script, or do nothing; the
/// core stays headless and testable.
pub trait Gate {
    /// Decide whether to run one parent → daughter attempt.
    fn attempt(&mut self, parent: ChipKey, daughter: ChipKey) -> Decision {
        let _ = (parent, daughter);
        Decision::Proceed
    }

    /// Decide whether to start another pass over `remaining`.
    fn continue_iteration(&mut self, remaining: &BTreeSet<u8>) -> bool {
        let _ = remaining;
        true
    }
}

/// Always-proceed gate.
#[derive(Debug, Default, Clone, Copy)]
pub struct Headless;

impl Gate for Headless {}

/// A chip id left unresolved when the fixpoint terminated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnresolvedChip {
    /// Key in the channel whose span owns the id.
    pub key: ChipKey,
    /// Daughter PISO-DS lanes attempted during the final pass; empty when
    /// no configured parent was ever reachable.
    pub piso_lanes: Vec<u8>,
}

/// Ids in the tile's spans missing from the working set, plus the id → key
/// map of configured chips.
fn find_waitlist<B: BusTransport>(
    ctrl: &Controller<B>,
    roots: &[RootAssignment],
) -> (BTreeSet<u8>, BTreeMap<u8, ChipKey>) {
    let by_id: BTreeMap<u8, ChipKey> =
        ctrl.chips().map(|(key, _)| (key.chip_id, *key)).collect();
    let mut waitlist = BTreeSet::new();
    for root in roots {
        for id in root.span() {
            if !by_id.contains_key(&id) {
                waitlist.insert(id);
            }
        }
    }
    (waitlist, by_id)
}

/// Configured chips at valid neighbor offsets, in fixed priority order
/// (+10, −10, +1, −1).
fn potential_parents(chip_id: u8, by_id: &BTreeMap<u8, ChipKey>) -> Vec<ChipKey> {
    link::VALID_OFFSETS
        .iter()
        .filter_map(|&d| {
            let candidate = i16::from(chip_id) + d;
            let candidate = u8::try_from(candidate).ok()?;
            if !link::is_valid_neighbor(chip_id, candidate) {
                return None;
            }
            by_id.get(&candidate).copied()
        })
        .collect()
}

/// Iterate the waitlist to a fixpoint.
///
/// Returns one entry per id still unresolved at termination, tagged with
/// the lanes attempted during the final pass.
///
/// # Errors
///
/// Propagates only working-set/link-algebra misuse.
pub fn iterate_waitlist<B: BusTransport, G: Gate>(
    ctrl: &mut Controller<B>,
    roots: &[RootAssignment],
    params: &TuningParams,
    gate: &mut G,
) -> Result<Vec<UnresolvedChip>> {
    let mut attempts: BTreeMap<u8, Vec<u8>> = BTreeMap::new();

    loop {
        let (waitlist, by_id) = find_waitlist(ctrl, roots);
        if waitlist.is_empty() {
            attempts.clear();
            break;
        }
        info!(remaining = waitlist.len(), "waitlist pass");
        attempts.clear();
        let mut resolved = 0usize;

        for &chip_id in &waitlist {
            for parent in potential_parents(chip_id, &by_id) {
                let daughter = parent.sibling(chip_id);
                if gate.attempt(parent, daughter) == Decision::Skip {
                    debug!(%parent, %daughter, "attempt vetoed");
                    continue;
                }

                ctrl.select_channel(parent.io_group, parent.io_channel);
                let outcome = attempt_link(ctrl, parent, chip_id, params)?;
                ctrl.release_channel();

                match outcome {
                    LinkAttempt::Configured { .. } => {
                        info!(%daughter, %parent, "waitlist resolved");
                        resolved += 1;
                        break;
                    }
                    LinkAttempt::DaughterFailed { piso_lane } => {
                        attempts.entry(chip_id).or_default().push(piso_lane);
                    }
                    LinkAttempt::ParentTxFailed => {}
                }
            }
        }

        if resolved == 0 {
            break;
        }
        let (remaining, _) = find_waitlist(ctrl, roots);
        if !gate.continue_iteration(&remaining) {
            break;
        }
    }

    let (final_waitlist, _) = find_waitlist(ctrl, roots);
    let unresolved = final_waitlist
        .into_iter()
        .filter_map(|id| {
            let root = roots.iter().find(|r| r.span().contains(&id))?;
            Some(UnresolvedChip {
                key: ChipKey::new(root.io_group, root.io_channel, id),
                piso_lanes: attempts.remove(&id).unwrap_or_default(),
            })
        })
        .collect();
    Ok(unresolved)
}

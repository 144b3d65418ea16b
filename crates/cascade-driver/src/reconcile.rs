//! Write/verify reconciliation engine.
//!
//! The single point where transient bus and timing failures are absorbed:
//! read the requested registers back, rewrite exactly the mismatched ones,
//! and repeat for a bounded number of retries. Convergence is not
//! guaranteed — the caller decides what a persistent diff means (usually:
//! roll back and waitlist the chip).

use crate::bus::BusTransport;
use crate::controller::{Controller, Diff};
use crate::error::Result;
use cascade_chip::config::all_registers;
use cascade_chip::ChipKey;
use tracing::debug;

/// Bounds for one reconciliation.
#[derive(Debug, Clone, Copy)]
pub struct ReconcileOptions {
    /// Write passes over the mismatched subset. With 1, a single rewrite is
    /// followed by one final verify whose result is returned unconditionally.
    pub write_retries: u8,
    /// Read attempts per register per verify pass.
    pub verify_reads: u8,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self { write_retries: 2, verify_reads: 2 }
    }
}

/// Outcome of a reconciliation. `diff` is empty iff `ok`.
#[derive(Debug, Clone)]
pub struct ReconcileResult {
    /// Whether the device matched the local model after the final pass.
    pub ok: bool,
    /// Remaining mismatches, per chip per register.
    pub diff: Diff,
}

/// Reconcile explicit (chip, registers) pairs.
///
/// Bounded loop, not a fixpoint: verify, rewrite the mismatched subset,
/// and re-verify at most `write_retries` times. Registers that matched on
/// a read are never rewritten.
///
/// # Errors
///
/// Returns an error only for working-set misuse (unknown chip); register
/// mismatches and read timeouts are data, not errors.
pub fn reconcile_registers<B: BusTransport>(
    ctrl: &mut Controller<B>,
    pairs: &[(ChipKey, Vec<u8>)],
    opts: ReconcileOptions,
) -> Result<ReconcileResult> {
    let (mut ok, mut diff) = ctrl.verify_registers(pairs, opts.verify_reads)?;
    let mut remaining = opts.write_retries;

    while !ok {
        let mismatched: Vec<(ChipKey, Vec<u8>)> = diff
            .iter()
            .map(|(key, regs)| (*key, regs.keys().copied().collect()))
            .collect();
        debug!(
            chips = mismatched.len(),
            registers = mismatched.iter().map(|(_, r)| r.len()).sum::<usize>(),
            remaining,
            "rewriting mismatched registers"
        );
        for (key, regs) in &mismatched {
            ctrl.write_registers(*key, regs)?;
        }
        let pass = ctrl.verify_registers(&mismatched, opts.verify_reads)?;
        ok = pass.0;
        diff = pass.1;
        if remaining <= 1 {
            break;
        }
        remaining -= 1;
    }

    Ok(ReconcileResult { ok, diff })
}

/// Reconcile a chip's full register image.
///
/// # Errors
///
/// See [`reconcile_registers`].
pub fn reconcile_chip<B: BusTransport>(
    ctrl: &mut Controller<B>,
    key: ChipKey,
    opts: ReconcileOptions,
) -> Result<ReconcileResult> {
    reconcile_registers(ctrl, &[(key, all_registers().collect())], opts)
}

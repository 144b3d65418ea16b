//! Bus transport abstraction.
//!
//! The chips sit behind a shared, single-master serial bus per channel; this
//! trait is the seam between the bring-up core and whatever moves the bytes.
//! [`crate::sim::SimBus`] implements it in memory for CI and the CLI; a
//! hardware bridge implementation is a collaborator of this crate.

use crate::error::Result;
use cascade_chip::ChipKey;
use std::fmt::Debug;

/// Register-level access to the chip network.
pub trait BusTransport: Debug {
    /// Write one configuration register on one chip.
    ///
    /// Fire-and-forget: the bus gives no acknowledgement, so a lost write
    /// only surfaces later through read-back reconciliation.
    fn write_register(&mut self, key: ChipKey, register: u8, value: u8);

    /// Read one configuration register back from a chip.
    ///
    /// # Errors
    ///
    /// Returns `CascadeError::Transport` on timeout or a dropped response.
    /// Callers treat that identically to a mismatched value.
    fn read_register(&mut self, key: ChipKey, register: u8) -> Result<u8>;

    /// Write a bridge (bus controller) register, e.g. the channel select.
    fn set_bridge_register(&mut self, io_group: u8, address: u32, value: u32);
}

//! Working chip set and bus access.
//!
//! The controller owns the arena of local chip configurations plus the bus
//! handle. All components mutate chips through it; there is no ambient
//! global state. It also enforces the exclusive channel select: the previous
//! channel's select bit is cleared before the next is asserted.

use crate::bus::BusTransport;
use crate::error::{CascadeError, Result};
use cascade_chip::bridge::{channel_select_mask, CHANNEL_DESELECT, UART_POSI_ENABLE};
use cascade_chip::config::ChipConfig;
use cascade_chip::ChipKey;
use std::collections::BTreeMap;

/// Per-register verify outcome: local expectation vs device read-back.
/// `observed` is `None` when every read attempt timed out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterDiff {
    /// Value the local model expects.
    pub expected: u8,
    /// Last value the device returned, if any read completed.
    pub observed: Option<u8>,
}

/// Mismatched registers per chip after a verify pass. Empty iff the pass
/// was clean.
pub type Diff = BTreeMap<ChipKey, BTreeMap<u8, RegisterDiff>>;

/// Chip arena plus bus handle.
#[derive(Debug)]
pub struct Controller<B: BusTransport> {
    bus: B,
    chips: BTreeMap<ChipKey, ChipConfig>,
    selected: Option<(u8, u8)>,
}

impl<B: BusTransport> Controller<B> {
    /// Wrap a bus with an empty working set.
    pub fn new(bus: B) -> Self {
        Self { bus, chips: BTreeMap::new(), selected: None }
    }

    /// Shared access to the bus.
    pub fn bus(&self) -> &B {
        &self.bus
    }

    /// Exclusive access to the bus.
    pub fn bus_mut(&mut self) -> &mut B {
        &mut self.bus
    }

    /// Add a chip at `key` with power-on configuration.
    ///
    /// # Errors
    ///
    /// Returns `CascadeError::AddressConflict` if the key is already present.
    pub fn add_chip(&mut self, key: ChipKey) -> Result<()> {
        if self.chips.contains_key(&key) {
            return Err(CascadeError::AddressConflict { key });
        }
        self.chips.insert(key, ChipConfig::default());
        Ok(())
    }

    /// Add a chip at `key` unless it already exists.
    pub fn ensure_chip(&mut self, key: ChipKey) {
        self.chips.entry(key).or_default();
    }

    /// Evict a chip from the working set. Returns whether it was present.
    pub fn remove_chip(&mut self, key: ChipKey) -> bool {
        self.chips.remove(&key).is_some()
    }

    /// Whether any chip in the working set carries this id (ids are unique
    /// tile-wide, so the check spans channels).
    #[must_use]
    pub fn contains_id(&self, chip_id: u8) -> bool {
        self.chips.keys().any(|k| k.chip_id == chip_id)
    }

    /// Key of the configured chip carrying `chip_id`, if any.
    #[must_use]
    pub fn key_for_id(&self, chip_id: u8) -> Option<ChipKey> {
        self.chips.keys().find(|k| k.chip_id == chip_id).copied()
    }

    /// Number of chips in the working set.
    #[must_use]
    pub fn chip_count(&self) -> usize {
        self.chips.len()
    }

    /// Iterate the working set in key order.
    pub fn chips(&self) -> impl Iterator<Item = (&ChipKey, &ChipConfig)> {
        self.chips.iter()
    }

    /// Local configuration of one chip.
    ///
    /// # Errors
    ///
    /// Returns `CascadeError::UnknownChip` if absent.
    pub fn config(&self, key: ChipKey) -> Result<&ChipConfig> {
        self.chips.get(&key).ok_or(CascadeError::UnknownChip { key })
    }

    /// Mutable local configuration of one chip.
    ///
    /// # Errors
    ///
    /// Returns `CascadeError::UnknownChip` if absent.
    pub fn config_mut(&mut self, key: ChipKey) -> Result<&mut ChipConfig> {
        self.chips.get_mut(&key).ok_or(CascadeError::UnknownChip { key })
    }

    /// Assert one channel's select bit, clearing the previously selected
    /// channel first. At most one channel is selected at any time.
    pub fn select_channel(&mut self, io_group: u8, io_channel: u8) {
        match self.selected {
            Some(current) if current == (io_group, io_channel) => return,
            Some((group, _)) => {
                self.bus.set_bridge_register(group, UART_POSI_ENABLE, CHANNEL_DESELECT);
            }
            None => {}
        }
        self.bus
            .set_bridge_register(io_group, UART_POSI_ENABLE, channel_select_mask(io_channel));
        self.selected = Some((io_group, io_channel));
    }

    /// Clear the current channel select, if any.
    pub fn release_channel(&mut self) {
        if let Some((group, _)) = self.selected.take() {
            self.bus.set_bridge_register(group, UART_POSI_ENABLE, CHANNEL_DESELECT);
        }
    }

    /// Push the local values of `registers` out to one chip.
    ///
    /// # Errors
    ///
    /// Returns `CascadeError::UnknownChip` if the chip is absent.
    pub fn write_registers(&mut self, key: ChipKey, registers: &[u8]) -> Result<()> {
        for &reg in registers {
            let value = self
                .chips
                .get(&key)
                .ok_or(CascadeError::UnknownChip { key })?
                .register_value(reg)
                .ok_or(CascadeError::UnknownChip { key })?;
            self.bus.write_register(key, reg, value);
        }
        Ok(())
    }

    /// Read back `pairs` and report mismatches against the local model.
    ///
    /// Each register is read up to `verify_reads` times; the first read that
    /// matches passes it, otherwise the last observation lands in the diff.
    /// A timed-out read counts as a mismatch with `observed = None`.
    ///
    /// # Errors
    ///
    /// Returns `CascadeError::UnknownChip` if a pair names an absent chip.
    pub fn verify_registers(
        &mut self,
        pairs: &[(ChipKey, Vec<u8>)],
        verify_reads: u8,
    ) -> Result<(bool, Diff)> {
        let reads = verify_reads.max(1);
        let mut diff: Diff = BTreeMap::new();
        for (key, registers) in pairs {
            for &reg in registers {
                let expected = self
                    .chips
                    .get(key)
                    .ok_or(CascadeError::UnknownChip { key: *key })?
                    .register_value(reg)
                    .ok_or(CascadeError::UnknownChip { key: *key })?;
                let mut last = RegisterDiff { expected, observed: None };
                let mut matched = false;
                for _ in 0..reads {
                    match self.bus.read_register(*key, reg) {
                        Ok(value) if value == expected => {
                            matched = true;
                            break;
                        }
                        Ok(value) => last.observed = Some(value),
                        Err(_) => last.observed = None,
                    }
                }
                if !matched {
                    diff.entry(*key).or_default().insert(reg, last);
                }
            }
        }
        Ok((diff.is_empty(), diff))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimBus;
    use cascade_chip::config::REG_ENABLE_POSI;

    #[test]
    fn add_chip_rejects_duplicates() {
        let mut ctrl = Controller::new(SimBus::new());
        let key = ChipKey::new(1, 1, 21);
        ctrl.add_chip(key).unwrap();
        assert!(matches!(ctrl.add_chip(key), Err(CascadeError::AddressConflict { .. })));
    }

    #[test]
    fn channel_select_is_exclusive() {
        let mut ctrl = Controller::new(SimBus::new());
        ctrl.select_channel(1, 1);
        ctrl.select_channel(1, 3);
        ctrl.release_channel();

        let log = ctrl.bus().bridge_log();
        assert_eq!(
            log,
            &[
                (1, UART_POSI_ENABLE, channel_select_mask(1)),
                (1, UART_POSI_ENABLE, CHANNEL_DESELECT),
                (1, UART_POSI_ENABLE, channel_select_mask(3)),
                (1, UART_POSI_ENABLE, CHANNEL_DESELECT),
            ]
        );
    }

    #[test]
    fn reselecting_the_same_channel_is_a_no_op() {
        let mut ctrl = Controller::new(SimBus::new());
        ctrl.select_channel(1, 2);
        ctrl.select_channel(1, 2);
        assert_eq!(ctrl.bus().bridge_log().len(), 1);
    }

    #[test]
    fn verify_flags_timeouts_as_none() {
        // chip in the arena, but nothing physically present
        let mut ctrl = Controller::new(SimBus::new());
        let key = ChipKey::new(1, 1, 21);
        ctrl.ensure_chip(key);
        ctrl.select_channel(1, 1);

        let (ok, diff) = ctrl.verify_registers(&[(key, vec![REG_ENABLE_POSI])], 2).unwrap();
        assert!(!ok);
        assert_eq!(diff[&key][&REG_ENABLE_POSI].observed, None);
    }

    #[test]
    fn verify_passes_a_live_matching_chip() {
        let mut ctrl = Controller::new(SimBus::new().with_chain(1, 1, &[21]));
        let key = ChipKey::new(1, 1, 21);
        ctrl.ensure_chip(key);
        ctrl.select_channel(1, 1);

        let regs: Vec<u8> = cascade_chip::config::all_registers().collect();
        let (ok, diff) = ctrl.verify_registers(&[(key, regs)], 1).unwrap();
        assert!(ok, "diff: {diff:?}");
    }
}

//! Simulated bus.
//!
//! In-memory implementation of [`BusTransport`] modelling a tile of chips.
//! This plays the same role the software backend does for the hardware
//! driver: full end-to-end coverage in CI and a working CLI target without a
//! physical tile.
//!
//! Behavioral model:
//!
//! - A chip exists per `(group, channel, position)`; the position is the id
//!   the chip answers to once addressed. A fresh chip listens at the setup
//!   address; writing its chip-id register moves its register bank to the
//!   new key, and the write is dropped when no chip occupies that position.
//! - Reads only succeed while the channel's select bit is asserted on the
//!   bridge. Writes always go out (the select gates the return path only).
//! - Fault injection: a register can be stuck at a value (writes ignored,
//!   reads return the stuck value) or flaky (the first N writes dropped).

use crate::bus::BusTransport;
use crate::error::{CascadeError, Result};
use cascade_chip::bridge::{channel_select_mask, UART_POSI_ENABLE};
use cascade_chip::config::{ChipConfig, NUM_REGISTERS, REG_CHIP_ID};
use cascade_chip::key::SETUP_CHIP_ID;
use cascade_chip::ChipKey;
use std::collections::{HashMap, HashSet};

type Bank = [u8; NUM_REGISTERS];

/// Simulated tile of Cascade chips.
#[derive(Debug, Default)]
pub struct SimBus {
    /// Physical chip positions, keyed by the id they will answer to.
    present: HashSet<ChipKey>,
    /// Device-side register banks, keyed by current address.
    banks: HashMap<ChipKey, Bank>,
    /// Bridge register file per group.
    bridge: HashMap<(u8, u32), u32>,
    /// Registers stuck at a value: writes ignored, reads return the value.
    stuck: HashMap<(ChipKey, u8), u8>,
    /// Registers that drop their next N writes.
    flaky: HashMap<(ChipKey, u8), u32>,
    write_log: Vec<(ChipKey, u8, u8)>,
    read_log: Vec<(ChipKey, u8)>,
    bridge_log: Vec<(u8, u32, u32)>,
}

impl SimBus {
    /// Empty tile: no chips, nothing answers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a chain of physical chips on one channel.
    #[must_use]
    pub fn with_chain(mut self, io_group: u8, io_channel: u8, chip_ids: &[u8]) -> Self {
        for &id in chip_ids {
            self.present.insert(ChipKey::new(io_group, io_channel, id));
        }
        self
    }

    /// Stick one register at a value.
    #[must_use]
    pub fn with_stuck_register(mut self, key: ChipKey, register: u8, value: u8) -> Self {
        self.stuck.insert((key, register), value);
        self
    }

    /// Drop the next `drops` writes to one register.
    #[must_use]
    pub fn with_flaky_register(mut self, key: ChipKey, register: u8, drops: u32) -> Self {
        self.flaky.insert((key, register), drops);
        self
    }

    /// Writes issued so far against one register.
    #[must_use]
    pub fn write_count(&self, key: ChipKey, register: u8) -> usize {
        self.write_log.iter().filter(|(k, r, _)| *k == key && *r == register).count()
    }

    /// Reads issued so far against one register.
    #[must_use]
    pub fn read_count(&self, key: ChipKey, register: u8) -> usize {
        self.read_log.iter().filter(|(k, r)| *k == key && *r == register).count()
    }

    /// Every bridge register write, in order.
    #[must_use]
    pub fn bridge_log(&self) -> &[(u8, u32, u32)] {
        &self.bridge_log
    }

    /// Device-side value of one register, if a chip answers at `key`.
    #[must_use]
    pub fn device_register(&self, key: ChipKey, register: u8) -> Option<u8> {
        self.banks.get(&key).map(|bank| bank[register as usize])
    }

    fn selected(&self, io_group: u8, io_channel: u8) -> bool {
        self.bridge
            .get(&(io_group, UART_POSI_ENABLE))
            .is_some_and(|v| v & channel_select_mask(io_channel) != 0)
    }

    fn power_on_bank() -> Bank {
        ChipConfig::default().encode()
    }
}

impl BusTransport for SimBus {
    fn write_register(&mut self, key: ChipKey, register: u8, value: u8) {
        self.write_log.push((key, register, value));

        if let Some(drops) = self.flaky.get_mut(&(key, register)) {
            if *drops > 0 {
                *drops -= 1;
                return;
            }
        }
        if self.stuck.contains_key(&(key, register)) {
            return;
        }

        // Re-addressing: the bank follows the chip to its new key.
        if register == REG_CHIP_ID && key.chip_id == SETUP_CHIP_ID {
            let target = key.sibling(value);
            if !self.present.contains(&target) {
                return; // no chip occupies that position
            }
            let mut bank = self.banks.remove(&key).unwrap_or_else(Self::power_on_bank);
            bank[REG_CHIP_ID as usize] = value;
            self.banks.entry(target).or_insert(bank);
            return;
        }

        if key.chip_id != SETUP_CHIP_ID && !self.present.contains(&key) {
            return;
        }
        let bank = self.banks.entry(key).or_insert_with(Self::power_on_bank);
        bank[register as usize] = value;
    }

    fn read_register(&mut self, key: ChipKey, register: u8) -> Result<u8> {
        self.read_log.push((key, register));

        if !self.selected(key.io_group, key.io_channel) {
            return Err(CascadeError::transport(format!(
                "read timeout: channel {} not selected",
                key.io_channel
            )));
        }
        if let Some(value) = self.stuck.get(&(key, register)) {
            return Ok(*value);
        }
        if key.chip_id != SETUP_CHIP_ID && !self.present.contains(&key) {
            return Err(CascadeError::transport(format!("read timeout: no chip at {key}")));
        }
        match self.banks.get(&key) {
            Some(bank) => Ok(bank[register as usize]),
            None if key.chip_id != SETUP_CHIP_ID => {
                // live but never-written chip answers with its power-on image
                let bank = self.banks.entry(key).or_insert_with(Self::power_on_bank);
                Ok(bank[register as usize])
            }
            None => Err(CascadeError::transport(format!("read timeout: no chip at {key}"))),
        }
    }

    fn set_bridge_register(&mut self, io_group: u8, address: u32, value: u32) {
        self.bridge_log.push((io_group, address, value));
        self.bridge.insert((io_group, address), value);
    }
}
